//! `qgps run`: bring a session up and stream its indications.

use owo_colors::OwoColorize;
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until};
use tracing::debug;

use qgps_api::{LockType, OperationMode};
use qgps_core::{Gps, Handler, NmeaSentence, PositionReport, SatelliteInfo, ServiceNode};

use crate::cli::{LockArg, ModeArg, OutputFormat, RunArgs, ShowKind};
use crate::commands::Context;
use crate::error::CliError;
use crate::output::{self, Event};

pub async fn handle(args: &RunArgs, ctx: &Context) -> Result<(), CliError> {
    let mut session = ctx.session_config()?;
    if let Some(interval) = args.interval {
        session.start.report_interval = interval;
    }
    if let Some(mode) = args.operation_mode {
        session.configure.operation_mode = Some(operation_mode(mode));
    }
    if let Some(lock) = args.engine_lock {
        session.configure.engine_lock = Some(engine_lock(lock));
    }

    let event_loop = ctx.spawn_loop()?;
    let gps = Gps::new(event_loop.handle(), session);

    let (tx, mut rx) = mpsc::unbounded_channel();
    install_handlers(&gps, &args.show, &tx);
    drop(tx);

    let outcome = match gps.bring_up().await {
        Ok(node) => {
            announce(ctx, node);
            stream(args, ctx, &mut rx).await
        }
        Err(err) => Err(err.into()),
    };

    gps.close().await;
    drop(gps);
    event_loop.shutdown();
    outcome
}

fn install_handlers(gps: &Gps, show: &[ShowKind], tx: &mpsc::UnboundedSender<Event>) {
    let wants = |kind: ShowKind| show.is_empty() || show.contains(&kind);

    if wants(ShowKind::Nmea) {
        let tx = tx.clone();
        gps.set_nmea_handler(Some(Handler::from_fn(move |sentence: NmeaSentence| {
            let _ = tx.send(Event::Nmea(sentence));
        })));
    }
    if wants(ShowKind::Satellites) {
        let tx = tx.clone();
        gps.set_satellite_info_handler(Some(Handler::from_fn(move |info: SatelliteInfo| {
            let _ = tx.send(Event::Satellites(info));
        })));
    }
    if wants(ShowKind::Position) {
        let tx = tx.clone();
        gps.set_position_handler(Some(Handler::from_fn(move |report: PositionReport| {
            let _ = tx.send(Event::Position(report));
        })));
    }
}

fn announce(ctx: &Context, node: ServiceNode) {
    if ctx.quiet || ctx.format == OutputFormat::Json {
        return;
    }
    if ctx.color {
        eprintln!("{} session started on {node}", "::".green().bold());
    } else {
        eprintln!(":: session started on {node}");
    }
}

async fn stream(
    args: &RunArgs,
    ctx: &Context,
    rx: &mut mpsc::UnboundedReceiver<Event>,
) -> Result<(), CliError> {
    let deadline = args.duration.map(|d| Instant::now() + d);
    let mut printed = 0usize;

    loop {
        let expired = async {
            match deadline {
                Some(at) => sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                debug!("interrupted");
                break;
            }
            () = expired => {
                debug!("run duration elapsed");
                break;
            }
            event = rx.recv() => {
                let Some(event) = event else { break };
                let line = output::render_event(ctx.format, &event, ctx.color)?;
                output::print_output(&line, ctx.quiet);
                printed += 1;
                if args.count.is_some_and(|max| printed >= max) {
                    break;
                }
            }
        }
    }

    debug!(printed, "stream finished");
    Ok(())
}

fn operation_mode(arg: ModeArg) -> OperationMode {
    match arg {
        ModeArg::Default => OperationMode::Default,
        ModeArg::Msb => OperationMode::Msb,
        ModeArg::Msa => OperationMode::Msa,
        ModeArg::Standalone => OperationMode::Standalone,
        ModeArg::CellId => OperationMode::CellId,
    }
}

fn engine_lock(arg: LockArg) -> LockType {
    match arg {
        LockArg::None => LockType::None,
        LockArg::MobileInitiated => LockType::MobileInitiated,
        LockArg::NetworkInitiated => LockType::NetworkInitiated,
        LockArg::All => LockType::All,
    }
}
