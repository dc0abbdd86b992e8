// ── GNSS client façade ──
//
// One `Gps` owns one modem session: a slot of transport handles on the
// event loop, the state machine gating the setup steps, and the
// dispatcher feeding indication handlers.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use qgps_api::{EventRegistration, LoopHandle, Node, ServiceNode, SessionKey};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::bridge::Bridge;
use crate::config::{ConfigureOptions, SessionConfig};
use crate::dispatch::{Dispatcher, Handler};
use crate::error::CoreError;
use crate::model::{NmeaSentence, PositionReport, SatelliteInfo};
use crate::session::{SessionMachine, SessionState, Step};
use crate::steps;

/// The main entry point for consumers.
///
/// Setup runs in a fixed order: [`open`](Self::open),
/// [`register_events`](Self::register_events),
/// [`configure`](Self::configure), [`start`](Self::start). Configure may
/// be skipped but never follows Start. Each call fails
/// with [`CoreError::InvalidState`] when made out of order. Handlers can be
/// installed or removed at any time.
pub struct Gps {
    config: SessionConfig,
    bridge: Bridge,
    machine: SessionMachine,
    dispatcher: Dispatcher,
    session: Mutex<SessionSlot>,
}

#[derive(Debug)]
struct SessionSlot {
    key: SessionKey,
    node: Option<ServiceNode>,
    request_timeout: Duration,
}

impl Gps {
    /// Create a session on `event_loop`. Handlers run on the current tokio
    /// runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn new(event_loop: LoopHandle, config: SessionConfig) -> Self {
        Self::with_runtime(event_loop, config, &Handle::current())
    }

    /// Create a session whose handlers run on `runtime`.
    pub fn with_runtime(event_loop: LoopHandle, config: SessionConfig, runtime: &Handle) -> Self {
        let key = event_loop.new_session_key();
        Self {
            session: Mutex::new(SessionSlot {
                key,
                node: None,
                request_timeout: config.request_timeout,
            }),
            bridge: Bridge::new(event_loop),
            machine: SessionMachine::new(),
            dispatcher: Dispatcher::new(runtime),
            config,
        }
    }

    fn slot(&self) -> MutexGuard<'_, SessionSlot> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn key(&self) -> SessionKey {
        self.slot().key
    }

    fn timeout(&self) -> Duration {
        self.slot().request_timeout
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    // ── Setup sequence ───────────────────────────────────────────

    /// Discover the GNSS node, open the device and allocate the LOC client.
    ///
    /// Accepted on a fresh session and after a failure; re-opening releases
    /// the handles of the failed attempt first.
    pub async fn open(&self) -> Result<ServiceNode, CoreError> {
        let guard = self.machine.begin(Step::Discover)?;
        if guard.prior_state() == SessionState::Failed {
            let fresh = self.bridge.handle().new_session_key();
            let stale = {
                let mut slot = self.slot();
                slot.node = None;
                std::mem::replace(&mut slot.key, fresh)
            };
            self.bridge.handle().release_session(stale);
            debug!(%stale, %fresh, "re-opening failed session");
        }

        let key = self.key();
        let timeout = self.timeout();

        let node = guard.finish(
            steps::discover(&self.bridge, key, self.config.discovery_window, timeout).await,
        )?;
        self.slot().node = Some(node);

        let guard = self.machine.begin(Step::OpenDevice)?;
        guard.finish(steps::open_device(&self.bridge, key, node, timeout).await)?;

        let guard = self.machine.begin(Step::AllocateClient)?;
        guard.finish(
            steps::allocate_client(&self.bridge, key, self.dispatcher.clone(), timeout).await,
        )?;

        info!(%node, "GNSS session open");
        Ok(node)
    }

    /// Enable the indication classes from the session config.
    pub async fn register_events(&self) -> Result<(), CoreError> {
        self.register_events_with(self.config.events).await
    }

    /// Enable an explicit set of indication classes.
    pub async fn register_events_with(&self, mask: EventRegistration) -> Result<(), CoreError> {
        let guard = self.machine.begin(Step::RegisterEvents)?;
        guard.finish(steps::register_events(&self.bridge, self.key(), mask, self.timeout()).await)
    }

    pub async fn configure(&self, options: &ConfigureOptions) -> Result<(), CoreError> {
        let guard = self.machine.begin(Step::Configure)?;
        guard.finish(steps::configure(&self.bridge, self.key(), options, self.timeout()).await)
    }

    /// Start periodic fixes, reporting at most every `report_interval`.
    pub async fn start(&self, report_interval: Duration) -> Result<(), CoreError> {
        let guard = self.machine.begin(Step::Start)?;
        let options = crate::config::StartOptions {
            report_interval,
            ..self.config.start
        };
        guard.finish(steps::start(&self.bridge, self.key(), &options, self.timeout()).await)
    }

    /// Run the whole sequence with the configured defaults.
    pub async fn bring_up(&self) -> Result<ServiceNode, CoreError> {
        let node = self.open().await?;
        self.register_events().await?;
        self.configure(&self.config.configure).await?;
        self.start(self.config.start.report_interval).await?;
        Ok(node)
    }

    /// Stop the fix session if one is running, release every handle and
    /// enter [`SessionState::Closed`]. Idempotent.
    pub async fn close(&self) {
        let state = self.machine.current();
        if state == SessionState::Closed {
            return;
        }
        if state == SessionState::Started {
            let session_id = self.config.start.session_id;
            if let Err(err) =
                steps::stop(&self.bridge, self.key(), session_id, self.timeout()).await
            {
                warn!(error = %err, "stop request failed during close");
            }
        }
        self.dispatcher.shutdown();
        self.bridge.handle().release_session(self.key());
        self.machine.close();
        info!("GNSS session closed");
    }

    // ── Handlers ─────────────────────────────────────────────────

    pub fn set_nmea_handler(&self, handler: Option<Handler<NmeaSentence>>) {
        self.dispatcher.set_nmea_handler(handler);
    }

    pub fn set_satellite_info_handler(&self, handler: Option<Handler<SatelliteInfo>>) {
        self.dispatcher.set_satellite_info_handler(handler);
    }

    pub fn set_position_handler(&self, handler: Option<Handler<PositionReport>>) {
        self.dispatcher.set_position_handler(handler);
    }

    // ── Observation ──────────────────────────────────────────────

    pub fn current_state(&self) -> SessionState {
        self.machine.current()
    }

    /// Subscribe to state transitions.
    pub fn state_changes(&self) -> watch::Receiver<SessionState> {
        self.machine.subscribe()
    }

    pub fn last_completed_step(&self) -> Option<Step> {
        self.machine.last_completed_step()
    }

    /// The node/port the session is bound to, once discovered.
    pub fn service_node(&self) -> Option<ServiceNode> {
        self.slot().node
    }

    /// Timeout applied to every later request of this session.
    pub fn set_request_timeout(&self, timeout: Duration) {
        self.slot().request_timeout = timeout;
    }

    pub fn request_timeout(&self) -> Duration {
        self.timeout()
    }

    // ── Bus inspection ───────────────────────────────────────────

    /// List every node on the bus without opening a session.
    pub async fn scan_bus(
        event_loop: &LoopHandle,
        config: &SessionConfig,
    ) -> Result<Vec<Node>, CoreError> {
        let bridge = Bridge::new(event_loop.clone());
        steps::scan(&bridge, config.discovery_window, config.request_timeout).await
    }
}

impl Drop for Gps {
    fn drop(&mut self) {
        if self.machine.current() != SessionState::Closed {
            self.dispatcher.shutdown();
            self.bridge.handle().release_session(self.key());
        }
    }
}

impl std::fmt::Debug for Gps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gps")
            .field("state", &self.current_state())
            .field("session", &*self.slot())
            .field("dispatcher", &self.dispatcher)
            .finish_non_exhaustive()
    }
}
