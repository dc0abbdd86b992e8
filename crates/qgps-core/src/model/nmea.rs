// ── NMEA sentence ──

use std::fmt;

use serde::Serialize;

/// One NMEA sentence with its line terminator removed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct NmeaSentence {
    text: String,
}

impl NmeaSentence {
    /// Strip trailing control characters (`\r`, `\n`) from `raw`.
    pub fn new(raw: &str) -> Self {
        Self {
            text: raw.trim_end_matches(|c: char| c.is_ascii_control()).to_owned(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Talker and sentence type, e.g. `GPGGA`.
    pub fn sentence_type(&self) -> Option<&str> {
        let body = self
            .text
            .strip_prefix('$')
            .or_else(|| self.text.strip_prefix('!'))?;
        body.split([',', '*']).next().filter(|t| !t.is_empty())
    }

    /// Whether the `*hh` checksum matches the body. `None` when the
    /// sentence carries no parseable checksum.
    pub fn checksum_valid(&self) -> Option<bool> {
        let body = self
            .text
            .strip_prefix('$')
            .or_else(|| self.text.strip_prefix('!'))?;
        let (payload, checksum) = body.rsplit_once('*')?;
        let expected = u8::from_str_radix(checksum.get(..2)?, 16).ok()?;
        let actual = payload.bytes().fold(0u8, |acc, b| acc ^ b);
        Some(actual == expected)
    }
}

impl fmt::Display for NmeaSentence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl AsRef<str> for NmeaSentence {
    fn as_ref(&self) -> &str {
        &self.text
    }
}
