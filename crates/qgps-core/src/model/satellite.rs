// ── Satellite info ──

use serde::Serialize;

use qgps_api::GnssSystem;

/// Space vehicles currently tracked by the engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SatelliteInfo {
    pub altitude_assumed: Option<bool>,
    pub satellites: Vec<SatelliteSv>,
}

impl SatelliteInfo {
    pub fn len(&self) -> usize {
        self.satellites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.satellites.is_empty()
    }

    /// Satellites reported as part of the current solution.
    pub fn in_use(&self) -> impl Iterator<Item = &SatelliteSv> {
        self.satellites.iter().filter(|sv| sv.in_use == Some(true))
    }

    /// Strongest signal across the table, dB-Hz.
    pub fn best_snr(&self) -> Option<f32> {
        self.satellites
            .iter()
            .filter_map(|sv| sv.snr)
            .reduce(f32::max)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SatelliteSv {
    pub system: GnssSystem,
    pub prn: u16,
    pub elevation: Option<f32>,
    pub azimuth: Option<f32>,
    pub snr: Option<f32>,
    pub in_use: Option<bool>,
}
