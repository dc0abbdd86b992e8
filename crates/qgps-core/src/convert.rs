// ── Indication-to-domain conversions ──
//
// Bridges raw `qgps_api` indication payloads into canonical
// `qgps_core::model` types. Fields the modem omitted stay `None`.

use chrono::{DateTime, Utc};

use qgps_api::{GnssSvInfoIndication, NmeaIndication, PositionReportIndication, SvInfo};

use crate::model::{NmeaSentence, PositionReport, SatelliteInfo, SatelliteSv};

fn timestamp_from_millis(ms: u64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(i64::try_from(ms).ok()?)
}

impl From<NmeaIndication> for NmeaSentence {
    fn from(ind: NmeaIndication) -> Self {
        NmeaSentence::new(&ind.sentence)
    }
}

impl From<SvInfo> for SatelliteSv {
    fn from(sv: SvInfo) -> Self {
        Self {
            system: sv.system,
            prn: sv.prn,
            elevation: sv.elevation,
            azimuth: sv.azimuth,
            snr: sv.snr,
            in_use: sv.in_use,
        }
    }
}

impl From<GnssSvInfoIndication> for SatelliteInfo {
    fn from(ind: GnssSvInfoIndication) -> Self {
        Self {
            altitude_assumed: ind.altitude_assumed,
            satellites: ind.satellites.into_iter().map(SatelliteSv::from).collect(),
        }
    }
}

impl From<PositionReportIndication> for PositionReport {
    fn from(ind: PositionReportIndication) -> Self {
        Self {
            session_status: ind.session_status,
            session_id: ind.session_id,
            latitude: ind.latitude,
            longitude: ind.longitude,
            altitude: ind.altitude_from_sealevel,
            horizontal_accuracy: ind.horizontal_uncertainty_circular,
            vertical_accuracy: ind.vertical_uncertainty,
            satellites_used: ind.satellites_used,
            timestamp: ind.timestamp_utc_ms.and_then(timestamp_from_millis),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use qgps_api::{GnssSystem, SessionStatus};

    use super::*;

    #[test]
    fn position_keeps_absent_fields_absent() {
        let report = PositionReport::from(PositionReportIndication {
            latitude: Some(48.1),
            longitude: Some(11.5),
            ..PositionReportIndication::default()
        });
        assert_eq!(
            report,
            PositionReport {
                latitude: Some(48.1),
                longitude: Some(11.5),
                ..PositionReport::default()
            }
        );
    }

    #[test]
    fn position_timestamp_is_utc_millis() {
        let report = PositionReport::from(PositionReportIndication {
            session_status: Some(SessionStatus::Success),
            timestamp_utc_ms: Some(1_700_000_000_123),
            ..PositionReportIndication::default()
        });
        let ts = report.timestamp.map(|t| t.timestamp_millis());
        assert_eq!(ts, Some(1_700_000_000_123));
    }

    #[test]
    fn out_of_range_timestamp_is_dropped() {
        let report = PositionReport::from(PositionReportIndication {
            timestamp_utc_ms: Some(u64::MAX),
            ..PositionReportIndication::default()
        });
        assert_eq!(report.timestamp, None);
    }

    #[test]
    fn satellite_table_is_carried_over() {
        let info = SatelliteInfo::from(GnssSvInfoIndication {
            altitude_assumed: Some(true),
            satellites: vec![
                SvInfo {
                    system: GnssSystem::Gps,
                    prn: 12,
                    snr: Some(30.0),
                    in_use: Some(true),
                    ..SvInfo::default()
                },
                SvInfo {
                    system: GnssSystem::Glonass,
                    prn: 70,
                    snr: Some(41.5),
                    ..SvInfo::default()
                },
            ],
        });
        assert_eq!(info.len(), 2);
        assert_eq!(info.in_use().count(), 1);
        assert_eq!(info.best_snr(), Some(41.5));
        assert_eq!(info.satellites[1].elevation, None);
    }
}
