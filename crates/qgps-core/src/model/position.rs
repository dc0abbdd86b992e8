// ── Position report ──

use chrono::{DateTime, Utc};
use serde::Serialize;

use qgps_api::SessionStatus;

/// A position fix. Every field is optional: the modem omits whatever it
/// does not know yet.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PositionReport {
    pub session_status: Option<SessionStatus>,
    pub session_id: Option<u8>,
    /// Degrees, WGS84.
    pub latitude: Option<f64>,
    /// Degrees, WGS84.
    pub longitude: Option<f64>,
    /// Metres above mean sea level.
    pub altitude: Option<f32>,
    /// Horizontal circular uncertainty, metres.
    pub horizontal_accuracy: Option<f32>,
    /// Vertical uncertainty, metres.
    pub vertical_accuracy: Option<f32>,
    /// PRNs of the satellites used in the fix.
    pub satellites_used: Option<Vec<u16>>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl PositionReport {
    /// `(latitude, longitude)` when both are present.
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        Some((self.latitude?, self.longitude?))
    }

    /// `(horizontal, vertical)` uncertainty when both are present.
    pub fn accuracy(&self) -> Option<(f32, f32)> {
        Some((self.horizontal_accuracy?, self.vertical_accuracy?))
    }

    pub fn satellites_used_count(&self) -> Option<usize> {
        self.satellites_used.as_ref().map(Vec::len)
    }

    pub fn has_fix(&self) -> bool {
        self.coordinates().is_some()
            && !matches!(
                self.session_status,
                Some(
                    SessionStatus::GeneralFailure
                        | SessionStatus::Unsupported
                        | SessionStatus::BadParameter
                        | SessionStatus::EngineLocked
                        | SessionStatus::PhoneOffline
                        | SessionStatus::Timeout
                )
            )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_values_need_their_inputs() {
        let report = PositionReport {
            latitude: Some(52.5),
            longitude: Some(13.4),
            ..PositionReport::default()
        };
        assert_eq!(report.coordinates(), Some((52.5, 13.4)));
        assert_eq!(report.accuracy(), None);
        assert_eq!(report.satellites_used_count(), None);
        assert!(report.has_fix());
    }

    #[test]
    fn failed_session_is_not_a_fix() {
        let report = PositionReport {
            session_status: Some(SessionStatus::Timeout),
            latitude: Some(1.0),
            longitude: Some(2.0),
            ..PositionReport::default()
        };
        assert!(!report.has_fix());
    }
}
