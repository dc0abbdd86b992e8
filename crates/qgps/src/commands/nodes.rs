//! `qgps nodes`: enumerate the bus without opening a session.

use qgps_api::ServiceId;
use qgps_core::Gps;
use qgps_core::steps::find_service;

use crate::commands::Context;
use crate::error::CliError;
use crate::output;

pub async fn handle(ctx: &Context) -> Result<(), CliError> {
    let session = ctx.session_config()?;
    let event_loop = ctx.spawn_loop()?;
    let scanned = Gps::scan_bus(&event_loop.handle(), &session).await;
    event_loop.shutdown();

    let nodes = scanned?;
    tracing::debug!(nodes = nodes.len(), "bus scanned");
    let gnss = find_service(&nodes, ServiceId::LOC);
    let rendered = output::render_nodes(ctx.format, &nodes, gnss)?;
    output::print_output(&rendered, ctx.quiet);
    Ok(())
}
