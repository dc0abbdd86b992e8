// ── LOC indications ──
//
// Unsolicited messages a LOC client delivers after events have been
// registered. Every field the modem may omit is optional.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::message::MessageId;

/// The indication classes the session controller subscribes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "kebab-case", ascii_case_insensitive)]
#[serde(rename_all = "kebab-case")]
pub enum IndicationKind {
    Nmea,
    SatelliteInfo,
    PositionReport,
}

impl IndicationKind {
    pub const ALL: [Self; 3] = [Self::Nmea, Self::SatelliteInfo, Self::PositionReport];

    pub const fn message_id(self) -> MessageId {
        match self {
            Self::Nmea => MessageId::NMEA,
            Self::SatelliteInfo => MessageId::GNSS_SV_INFO,
            Self::PositionReport => MessageId::POSITION_REPORT,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Indication {
    Nmea(NmeaIndication),
    GnssSvInfo(GnssSvInfoIndication),
    PositionReport(PositionReportIndication),
}

impl Indication {
    pub const fn kind(&self) -> IndicationKind {
        match self {
            Self::Nmea(_) => IndicationKind::Nmea,
            Self::GnssSvInfo(_) => IndicationKind::SatelliteInfo,
            Self::PositionReport(_) => IndicationKind::PositionReport,
        }
    }
}

/// One NMEA sentence as emitted by the engine, line terminator included.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NmeaIndication {
    pub sentence: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GnssSvInfoIndication {
    /// The engine assumed altitude for the current solution.
    pub altitude_assumed: Option<bool>,
    pub satellites: Vec<SvInfo>,
}

/// Constellation a space vehicle belongs to.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum GnssSystem {
    Gps,
    Galileo,
    Sbas,
    Compass,
    Glonass,
    #[default]
    Unknown,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SvInfo {
    pub system: GnssSystem,
    pub prn: u16,
    /// Degrees above the horizon.
    pub elevation: Option<f32>,
    /// Degrees from true north.
    pub azimuth: Option<f32>,
    /// Carrier to noise density, dB-Hz.
    pub snr: Option<f32>,
    pub in_use: Option<bool>,
}

/// Outcome of the fix session a position report belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum SessionStatus {
    Success,
    InProgress,
    GeneralFailure,
    Unsupported,
    BadParameter,
    EngineLocked,
    PhoneOffline,
    Timeout,
}

/// Position fix. Latitude and longitude are degrees, altitude and
/// uncertainties are metres.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PositionReportIndication {
    pub session_status: Option<SessionStatus>,
    pub session_id: Option<u8>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub altitude_from_sealevel: Option<f32>,
    pub horizontal_uncertainty_circular: Option<f32>,
    pub vertical_uncertainty: Option<f32>,
    /// PRNs of the space vehicles used in the solution.
    pub satellites_used: Option<Vec<u16>>,
    /// UTC milliseconds since the Unix epoch.
    pub timestamp_utc_ms: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_maps_to_message() {
        let ind = Indication::Nmea(NmeaIndication {
            sentence: "$GPGGA,*00\r\n".into(),
        });
        assert_eq!(ind.kind(), IndicationKind::Nmea);
        assert_eq!(ind.kind().message_id(), MessageId::NMEA);
        assert_eq!(
            IndicationKind::SatelliteInfo.message_id(),
            MessageId::GNSS_SV_INFO
        );
    }

    #[test]
    fn kind_names_are_kebab_case() {
        assert_eq!(IndicationKind::PositionReport.to_string(), "position-report");
        assert_eq!(
            "satellite-info".parse::<IndicationKind>().ok(),
            Some(IndicationKind::SatelliteInfo)
        );
    }
}
