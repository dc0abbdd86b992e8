// ── Setup steps ──
//
// The work each session step submits to the event loop. Handles are
// stored in the session's slot on the loop thread; only plain values
// (service node, reply presence) travel back to the caller.

use std::rc::Rc;
use std::time::Duration;

use qgps_api::{
    DeviceOpenFlags, EventRegistration, Node, Reply, Request, ServiceId, ServiceNode, SessionKey,
    StartRequest,
};
use tracing::{debug, info};

use crate::bridge::Bridge;
use crate::config::{ConfigureOptions, StartOptions};
use crate::dispatch::Dispatcher;
use crate::error::CoreError;

/// First node advertising `service`, in bus iteration order.
pub fn find_service(nodes: &[Node], service: ServiceId) -> Option<ServiceNode> {
    let mut candidates = nodes.iter().filter_map(|node| {
        node.lookup_port(service).map(|port| ServiceNode {
            node: node.id,
            port,
        })
    });
    let chosen = candidates.next()?;
    let ignored: Vec<ServiceNode> = candidates.collect();
    if !ignored.is_empty() {
        debug!(%chosen, ?ignored, %service, "several nodes advertise the service, using the first");
    }
    Some(chosen)
}

/// List every node on a freshly created bus. The bus is dropped afterwards.
pub async fn scan(
    bridge: &Bridge,
    window: Duration,
    timeout: Duration,
) -> Result<Vec<Node>, CoreError> {
    bridge
        .await_once("scan bus", window + timeout, move |ctx, done| {
            ctx.transport().new_bus(
                window,
                Box::new(move |result| {
                    done.complete(result.map(|bus| bus.nodes()));
                }),
            );
            Ok(())
        })
        .await
}

pub async fn discover(
    bridge: &Bridge,
    key: SessionKey,
    window: Duration,
    timeout: Duration,
) -> Result<ServiceNode, CoreError> {
    let found = bridge
        .await_once("discover", window + timeout, move |ctx, done| {
            let slot = ctx.session(key);
            ctx.transport().new_bus(
                window,
                Box::new(move |result| {
                    let bus = match result {
                        Ok(bus) => bus,
                        Err(err) => {
                            done.complete(Err(err));
                            return;
                        }
                    };
                    let node = find_service(&bus.nodes(), ServiceId::LOC);
                    let mut handles = slot.borrow_mut();
                    handles.bus = Some(bus);
                    handles.node = node;
                    done.complete(Ok(node));
                }),
            );
            Ok(())
        })
        .await?;

    let node = found.ok_or(CoreError::ServiceNotFound {
        service: ServiceId::LOC,
    })?;
    info!(node = node.node, port = node.port, "GNSS service found");
    Ok(node)
}

pub async fn open_device(
    bridge: &Bridge,
    key: SessionKey,
    node: ServiceNode,
    timeout: Duration,
) -> Result<(), CoreError> {
    bridge
        .await_once("open device", timeout, move |ctx, done| {
            let slot = ctx.session(key);
            let flags = DeviceOpenFlags::AUTO | DeviceOpenFlags::EXPECT_INDICATIONS;
            ctx.transport().open_device(
                node,
                flags,
                Box::new(move |result| match result {
                    Ok(device) => {
                        slot.borrow_mut().device = Some(device);
                        done.complete(Ok(()));
                    }
                    Err(err) => {
                        done.complete(Err(err));
                    }
                }),
            );
            Ok(())
        })
        .await?;
    debug!(%node, "device open");
    Ok(())
}

/// Allocate the LOC client and attach the dispatcher's sinks to it before
/// reporting success, so nothing delivered after setup is missed.
pub async fn allocate_client(
    bridge: &Bridge,
    key: SessionKey,
    dispatcher: Dispatcher,
    timeout: Duration,
) -> Result<(), CoreError> {
    bridge
        .await_once("allocate client", timeout, move |ctx, done| {
            let slot = ctx.session(key);
            let mut device = slot
                .borrow_mut()
                .device
                .take()
                .ok_or(qgps_api::Error::MissingHandle("device"))?;
            let callback_slot = Rc::clone(&slot);
            device.allocate_client(
                ServiceId::LOC,
                Box::new(move |result| match result {
                    Ok(mut client) => {
                        dispatcher.attach(client.as_mut());
                        callback_slot.borrow_mut().client = Some(client);
                        done.complete(Ok(()));
                    }
                    Err(err) => {
                        done.complete(Err(err));
                    }
                }),
            );
            slot.borrow_mut().device = Some(device);
            Ok(())
        })
        .await
}

async fn request(
    bridge: &Bridge,
    key: SessionKey,
    operation: &str,
    request: Request,
    timeout: Duration,
) -> Result<Option<Reply>, CoreError> {
    debug!(request = ?request.kind(), timeout_ms = timeout.as_millis(), "sending");
    bridge
        .await_once(operation, timeout, move |ctx, done| {
            let slot = ctx.session(key);
            let mut handles = slot.borrow_mut();
            let client = handles
                .client
                .as_mut()
                .ok_or(qgps_api::Error::MissingHandle("client"))?;
            client.send(
                request,
                timeout,
                Box::new(move |result| {
                    done.complete(result);
                }),
            );
            Ok(())
        })
        .await
}

pub async fn register_events(
    bridge: &Bridge,
    key: SessionKey,
    mask: EventRegistration,
    timeout: Duration,
) -> Result<(), CoreError> {
    request(
        bridge,
        key,
        "register events",
        Request::RegisterEvents { mask },
        timeout,
    )
    .await?;
    info!(events = ?mask, "events registered");
    Ok(())
}

pub async fn configure(
    bridge: &Bridge,
    key: SessionKey,
    options: &ConfigureOptions,
    timeout: Duration,
) -> Result<(), CoreError> {
    if let Some(mode) = options.operation_mode {
        request(
            bridge,
            key,
            "set operation mode",
            Request::SetOperationMode { mode },
            timeout,
        )
        .await?;
    }
    if let Some(lock) = options.engine_lock {
        request(
            bridge,
            key,
            "set engine lock",
            Request::SetEngineLock { lock },
            timeout,
        )
        .await?;
    }
    request(
        bridge,
        key,
        "set NMEA types",
        Request::SetNmeaTypes {
            types: options.nmea_types,
        },
        timeout,
    )
    .await?;
    debug!(nmea = ?options.nmea_types, "engine configured");
    Ok(())
}

/// Start the fix session. An empty reply means the modem refused it.
pub async fn start(
    bridge: &Bridge,
    key: SessionKey,
    options: &StartOptions,
    timeout: Duration,
) -> Result<(), CoreError> {
    let start = StartRequest {
        session_id: options.session_id,
        fix_recurrence: options.fix_recurrence,
        min_interval: options.report_interval,
        intermediate_reports: options.intermediate_reports,
    };
    let reply = request(bridge, key, "start", Request::Start(start), timeout).await?;
    if reply.is_none() {
        return Err(CoreError::StartRejected {
            session_id: options.session_id,
        });
    }
    info!(
        session_id = options.session_id,
        interval_ms = start.min_interval_ms(),
        "fix session started"
    );
    Ok(())
}

pub async fn stop(
    bridge: &Bridge,
    key: SessionKey,
    session_id: u8,
    timeout: Duration,
) -> Result<(), CoreError> {
    request(bridge, key, "stop", Request::Stop { session_id }, timeout).await?;
    debug!(session_id, "fix session stopped");
    Ok(())
}
