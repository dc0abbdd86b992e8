//! Output formatting: text and JSON.
//!
//! Streaming commands print one line per indication; listings use
//! `tabled` in text mode and serde in JSON mode.

use std::fmt::Write as _;
use std::io::{self, IsTerminal, Write};

use owo_colors::OwoColorize;
use serde::Serialize;
use tabled::{Table, Tabled, settings::Style};

use qgps_api::{Node, ServiceNode};
use qgps_core::{NmeaSentence, PositionReport, SatelliteInfo};

use crate::cli::{ColorMode, OutputFormat};
use crate::error::CliError;

// ── Color helpers ────────────────────────────────────────────────────

/// Determine whether color output should be enabled.
pub fn should_color(mode: ColorMode) -> bool {
    match mode {
        ColorMode::Always => true,
        ColorMode::Never => false,
        ColorMode::Auto => io::stdout().is_terminal() && std::env::var_os("NO_COLOR").is_none(),
    }
}

fn label(text: &str, color: bool) -> String {
    if color {
        text.bold().cyan().to_string()
    } else {
        text.to_owned()
    }
}

// ── Indication events ────────────────────────────────────────────────

/// One delivered indication, as printed by `qgps run`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", content = "data", rename_all = "kebab-case")]
pub enum Event {
    Nmea(NmeaSentence),
    Satellites(SatelliteInfo),
    Position(PositionReport),
}

pub fn render_event(format: OutputFormat, event: &Event, color: bool) -> Result<String, CliError> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string(event)?),
        OutputFormat::Text => Ok(match event {
            Event::Nmea(sentence) => format!("{} {sentence}", label("nmea", color)),
            Event::Satellites(info) => format_satellites(info, color),
            Event::Position(report) => format_position(report, color),
        }),
    }
}

fn format_satellites(info: &SatelliteInfo, color: bool) -> String {
    let mut out = format!(
        "{} {}/{} in use",
        label("sats", color),
        info.in_use().count(),
        info.len()
    );
    if let Some(snr) = info.best_snr() {
        let _ = write!(out, ", best {snr:.1} dB-Hz");
    }
    if info.altitude_assumed == Some(true) {
        out.push_str(", altitude assumed");
    }
    out
}

fn format_position(report: &PositionReport, color: bool) -> String {
    let mut out = label("fix ", color);
    match report.coordinates() {
        Some((lat, lon)) => {
            let _ = write!(out, " {lat:.6}, {lon:.6}");
        }
        None => out.push_str(" no position"),
    }
    if let Some(alt) = report.altitude {
        let _ = write!(out, "  alt {alt:.1} m");
    }
    if let Some(h) = report.horizontal_accuracy {
        let _ = write!(out, "  \u{b1}{h:.1} m");
    }
    if let Some(count) = report.satellites_used_count() {
        let _ = write!(out, "  {count} sv");
    }
    if let Some(ts) = report.timestamp {
        let _ = write!(out, "  {}", ts.format("%H:%M:%S%.3f"));
    }
    if let Some(status) = report.session_status {
        let status = status.to_string();
        if color {
            let _ = write!(out, "  [{}]", status.dimmed());
        } else {
            let _ = write!(out, "  [{status}]");
        }
    }
    out
}

// ── Bus listing ──────────────────────────────────────────────────────

#[derive(Tabled)]
struct NodeRow {
    #[tabled(rename = "Node")]
    node: u32,
    #[tabled(rename = "Service")]
    service: String,
    #[tabled(rename = "Port")]
    port: u32,
    #[tabled(rename = "GNSS")]
    gnss: &'static str,
}

/// Render every advertised service, marking the one a session would use.
pub fn render_nodes(
    format: OutputFormat,
    nodes: &[Node],
    gnss: Option<ServiceNode>,
) -> Result<String, CliError> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(nodes)?),
        OutputFormat::Text => {
            if nodes.iter().all(|n| n.services.is_empty()) {
                return Ok("No services advertised on the bus".into());
            }
            let rows: Vec<NodeRow> = nodes
                .iter()
                .flat_map(|node| {
                    node.services.iter().map(move |entry| NodeRow {
                        node: node.id,
                        service: entry.service.to_string(),
                        port: entry.port,
                        gnss: if gnss == Some(ServiceNode {
                            node: node.id,
                            port: entry.port,
                        }) {
                            "*"
                        } else {
                            ""
                        },
                    })
                })
                .collect();
            Ok(Table::new(rows).with(Style::rounded()).to_string())
        }
    }
}

/// Print the rendered output to stdout, respecting quiet mode.
pub fn print_output(output: &str, quiet: bool) {
    if quiet || output.is_empty() {
        return;
    }
    let mut stdout = io::stdout().lock();
    let _ = writeln!(stdout, "{output}");
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use qgps_api::ServiceId;
    use qgps_core::SatelliteSv;
    use qgps_core::model::{GnssSystem, SessionStatus};

    use super::*;

    fn sv(prn: u16, snr: Option<f32>, in_use: Option<bool>) -> SatelliteSv {
        SatelliteSv {
            system: GnssSystem::Gps,
            prn,
            elevation: None,
            azimuth: None,
            snr,
            in_use,
        }
    }

    #[test]
    fn nmea_text_is_the_sentence() {
        let event = Event::Nmea(NmeaSentence::new("$GPGGA,1*00\r\n"));
        assert_eq!(
            render_event(OutputFormat::Text, &event, false).unwrap(),
            "nmea $GPGGA,1*00"
        );
    }

    #[test]
    fn json_events_are_tagged() {
        let event = Event::Nmea(NmeaSentence::new("$GPRMC*00"));
        let line = render_event(OutputFormat::Json, &event, false).unwrap();
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["kind"], "nmea");
        assert_eq!(value["data"], "$GPRMC*00");
    }

    #[test]
    fn satellites_summary_counts_used_vehicles() {
        let info = SatelliteInfo {
            altitude_assumed: None,
            satellites: vec![
                sv(3, Some(41.5), Some(true)),
                sv(9, Some(22.0), Some(false)),
                sv(12, None, None),
            ],
        };
        assert_eq!(
            format_satellites(&info, false),
            "sats 1/3 in use, best 41.5 dB-Hz"
        );
    }

    #[test]
    fn position_line_omits_missing_fields() {
        let partial = PositionReport {
            latitude: Some(52.5),
            longitude: Some(13.4),
            ..PositionReport::default()
        };
        assert_eq!(format_position(&partial, false), "fix  52.500000, 13.400000");

        let empty = PositionReport {
            session_status: Some(SessionStatus::InProgress),
            ..PositionReport::default()
        };
        assert_eq!(format_position(&empty, false), "fix  no position  [in-progress]");
    }

    #[test]
    fn node_table_marks_the_gnss_service() {
        let nodes = vec![
            Node::new(0)
                .with_service(ServiceId::DMS, 2)
                .with_service(ServiceId::LOC, 7),
        ];
        let table = render_nodes(
            OutputFormat::Text,
            &nodes,
            Some(ServiceNode { node: 0, port: 7 }),
        )
        .unwrap();
        assert!(table.contains("loc"), "{table}");
        assert!(table.contains('*'), "{table}");
        assert_eq!(
            render_nodes(OutputFormat::Text, &[Node::new(4)], None).unwrap(),
            "No services advertised on the bus"
        );
    }
}
