// ── Domain model ──
//
// Canonical payloads handed to indication handlers. Built from the raw
// LOC indications in `convert`, so handlers never see transport types.

pub mod nmea;
pub mod position;
pub mod satellite;

// ── Re-exports ──────────────────────────────────────────────────────

pub use nmea::NmeaSentence;
pub use position::PositionReport;
pub use satellite::{SatelliteInfo, SatelliteSv};

pub use qgps_api::{GnssSystem, SessionStatus};
