// ── Simulated modem ──
//
// An in-process `Transport` that behaves like a QRTR bus with one or more
// modem nodes. Responses can be scripted per request kind, indications
// can be injected from any thread, and an optional fix feed produces a
// steady stream of NMEA, satellite and position indications once a
// session is started.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::rc::Rc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::{self, JoinHandle};
use tracing::{debug, trace};

use crate::error::{Error, QmiErrorCode};
use crate::indication::{
    GnssSvInfoIndication, GnssSystem, Indication, IndicationKind, NmeaIndication,
    PositionReportIndication, SessionStatus, SvInfo,
};
use crate::message::{
    DeviceOpenFlags, Node, Reply, Request, RequestKind, ServiceId, ServiceNode, StartRequest,
};
use crate::transport::{Bus, Callback, Client, Device, IndicationSink, Transport};

const MIN_FEED_INTERVAL: Duration = Duration::from_millis(10);

// ── Scripting ───────────────────────────────────────────────────────

/// How the simulated modem answers a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Non-empty success response.
    Ok,
    /// The modem answers with an empty response.
    Empty,
    /// The modem answers with a QMI error status.
    Fail(QmiErrorCode),
    /// The modem never answers.
    Never,
}

#[derive(Debug, Clone, Copy)]
struct Script {
    outcome: Outcome,
    delay: Duration,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            outcome: Outcome::Ok,
            delay: Duration::ZERO,
        }
    }
}

/// A synthetic receiver position and sky.
#[derive(Debug, Clone, PartialEq)]
pub struct FixFeed {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f32,
    pub satellites: Vec<SvInfo>,
}

impl FixFeed {
    pub fn new(latitude: f64, longitude: f64, altitude: f32) -> Self {
        Self {
            latitude,
            longitude,
            altitude,
            satellites: default_constellation(),
        }
    }

    pub fn with_satellites(mut self, satellites: Vec<SvInfo>) -> Self {
        self.satellites = satellites;
        self
    }

    fn used_prns(&self) -> Vec<u16> {
        self.satellites
            .iter()
            .filter(|sv| sv.in_use == Some(true))
            .map(|sv| sv.prn)
            .collect()
    }

    /// The indications one reporting interval produces.
    pub fn indications(&self, session_id: u8, now: DateTime<Utc>) -> Vec<Indication> {
        let used = self.used_prns();
        let lat = nmea_coordinate(self.latitude, 2, ('N', 'S'));
        let lon = nmea_coordinate(self.longitude, 3, ('E', 'W'));
        let time = now.format("%H%M%S%.3f");

        let gga = nmea_sentence(&format!(
            "GPGGA,{time},{lat},{lon},1,{:02},0.9,{:.1},M,0.0,M,,",
            used.len(),
            self.altitude,
        ));
        let rmc = nmea_sentence(&format!(
            "GPRMC,{time},A,{lat},{lon},0.0,0.0,{},,,A",
            now.format("%d%m%y"),
        ));

        vec![
            Indication::Nmea(NmeaIndication { sentence: gga }),
            Indication::Nmea(NmeaIndication { sentence: rmc }),
            Indication::GnssSvInfo(GnssSvInfoIndication {
                altitude_assumed: Some(false),
                satellites: self.satellites.clone(),
            }),
            Indication::PositionReport(PositionReportIndication {
                session_status: Some(SessionStatus::Success),
                session_id: Some(session_id),
                latitude: Some(self.latitude),
                longitude: Some(self.longitude),
                altitude_from_sealevel: Some(self.altitude),
                horizontal_uncertainty_circular: Some(4.5),
                vertical_uncertainty: Some(7.0),
                satellites_used: Some(used),
                timestamp_utc_ms: u64::try_from(now.timestamp_millis()).ok(),
            }),
        ]
    }
}

fn default_constellation() -> Vec<SvInfo> {
    [
        (GnssSystem::Gps, 3, 61.0, 92.0, 41.0, true),
        (GnssSystem::Gps, 7, 44.0, 301.0, 38.0, true),
        (GnssSystem::Gps, 16, 23.0, 188.0, 33.0, true),
        (GnssSystem::Gps, 27, 12.0, 47.0, 24.0, false),
        (GnssSystem::Glonass, 68, 52.0, 250.0, 36.0, true),
        (GnssSystem::Galileo, 301, 35.0, 130.0, 30.0, false),
    ]
    .into_iter()
    .map(|(system, prn, elevation, azimuth, snr, in_use)| SvInfo {
        system,
        prn,
        elevation: Some(elevation),
        azimuth: Some(azimuth),
        snr: Some(snr),
        in_use: Some(in_use),
    })
    .collect()
}

/// Wrap an NMEA body as `$body*CS\r\n`.
pub fn nmea_sentence(body: &str) -> String {
    let checksum = body.bytes().fold(0u8, |acc, b| acc ^ b);
    format!("${body}*{checksum:02X}\r\n")
}

/// Degrees to NMEA `dddmm.mmmm,H`.
fn nmea_coordinate(value: f64, degree_width: usize, hemispheres: (char, char)) -> String {
    let hemisphere = if value < 0.0 {
        hemispheres.1
    } else {
        hemispheres.0
    };
    let abs = value.abs();
    let degrees = abs.trunc();
    let minutes = (abs - degrees) * 60.0;
    let mut out = format!("{degrees:0degree_width$.0}");
    let _ = write!(out, "{minutes:07.4},{hemisphere}");
    out
}

// ── SimModem ────────────────────────────────────────────────────────

struct ClientLink {
    id: u32,
    tx: mpsc::UnboundedSender<Indication>,
}

#[derive(Default)]
struct SimState {
    nodes: Vec<Node>,
    discovery_error: Option<String>,
    discovery_delay: Duration,
    scripts: HashMap<RequestKind, Script>,
    journal: Vec<Request>,
    open_flags: Option<DeviceOpenFlags>,
    open_devices: usize,
    clients: Vec<ClientLink>,
    next_client_id: u32,
    fix_feed: Option<FixFeed>,
}

/// Shared, thread-safe control surface of the simulated modem.
///
/// Clones observe and script the same modem. Hand [`SimModem::factory`]
/// to [`EventLoop::spawn`](crate::EventLoop::spawn) to drive it.
#[derive(Clone, Default)]
pub struct SimModem {
    state: Arc<Mutex<SimState>>,
}

impl SimModem {
    /// A bus with no nodes.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn with_node(self, node: Node) -> Self {
        self.lock().nodes.push(node);
        self
    }

    /// Add a node exposing the LOC service on `port`.
    pub fn with_gnss_node(self, node: u32, port: u32) -> Self {
        self.with_node(Node::new(node).with_service(ServiceId::LOC, port))
    }

    /// Make bus creation fail.
    pub fn with_discovery_error(self, reason: impl Into<String>) -> Self {
        self.lock().discovery_error = Some(reason.into());
        self
    }

    /// Delay bus creation, capped at the requested discovery window.
    pub fn with_discovery_delay(self, delay: Duration) -> Self {
        self.lock().discovery_delay = delay;
        self
    }

    /// Emit fixes for `feed` while a session is started.
    pub fn with_fix_feed(self, feed: FixFeed) -> Self {
        self.lock().fix_feed = Some(feed);
        self
    }

    /// Script the answer to every later request of `kind`.
    pub fn respond(&self, kind: RequestKind, outcome: Outcome, delay: Duration) -> &Self {
        self.lock()
            .scripts
            .insert(kind, Script { outcome, delay });
        self
    }

    /// Deliver `indication` to every live client. Returns how many clients
    /// it was queued for.
    pub fn inject(&self, indication: Indication) -> usize {
        let mut state = self.lock();
        state.clients.retain(|link| !link.tx.is_closed());
        state
            .clients
            .iter()
            .filter(|link| link.tx.send(indication.clone()).is_ok())
            .count()
    }

    /// Every request sent so far, in order.
    pub fn requests(&self) -> Vec<Request> {
        self.lock().journal.clone()
    }

    pub fn last_open_flags(&self) -> Option<DeviceOpenFlags> {
        self.lock().open_flags
    }

    pub fn open_devices(&self) -> usize {
        self.lock().open_devices
    }

    pub fn live_clients(&self) -> usize {
        let mut state = self.lock();
        state.clients.retain(|link| !link.tx.is_closed());
        state.clients.len()
    }

    /// Transport factory for the event loop.
    pub fn factory(&self) -> impl FnOnce() -> Box<dyn Transport> + Send + 'static {
        let modem = self.clone();
        move || -> Box<dyn Transport> { Box::new(SimTransport { modem }) }
    }

    fn script(&self, kind: RequestKind) -> Script {
        self.lock().scripts.get(&kind).copied().unwrap_or_default()
    }

    fn fix_feed(&self) -> Option<FixFeed> {
        self.lock().fix_feed.clone()
    }

    fn register_client(&self, tx: mpsc::UnboundedSender<Indication>) -> u32 {
        let mut state = self.lock();
        state.next_client_id += 1;
        let id = state.next_client_id;
        state.clients.push(ClientLink { id, tx });
        id
    }

    fn unregister_client(&self, id: u32) {
        self.lock().clients.retain(|link| link.id != id);
    }
}

impl std::fmt::Debug for SimModem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("SimModem")
            .field("nodes", &state.nodes)
            .field("requests", &state.journal.len())
            .field("open_devices", &state.open_devices)
            .field("clients", &state.clients.len())
            .finish_non_exhaustive()
    }
}

// ── Transport implementation ────────────────────────────────────────

struct SimTransport {
    modem: SimModem,
}

impl Transport for SimTransport {
    fn new_bus(&mut self, window: Duration, done: Callback<Box<dyn Bus>>) {
        let (nodes, error, delay) = {
            let state = self.modem.lock();
            (
                state.nodes.clone(),
                state.discovery_error.clone(),
                state.discovery_delay.min(window),
            )
        };
        task::spawn_local(async move {
            defer(delay).await;
            match error {
                Some(reason) => done(Err(Error::Bus(reason))),
                None => {
                    debug!(nodes = nodes.len(), "simulated bus discovered");
                    done(Ok(Box::new(SimBus { nodes })));
                }
            }
        });
    }

    fn open_device(
        &mut self,
        peer: ServiceNode,
        flags: DeviceOpenFlags,
        done: Callback<Box<dyn Device>>,
    ) {
        let modem = self.modem.clone();
        task::spawn_local(async move {
            defer(Duration::ZERO).await;
            let reachable = modem
                .lock()
                .nodes
                .iter()
                .any(|n| n.id == peer.node && n.services.iter().any(|s| s.port == peer.port));
            if !reachable {
                done(Err(Error::DeviceOpen {
                    node: peer.node,
                    reason: format!("nothing listening on port {}", peer.port),
                }));
                return;
            }
            {
                let mut state = modem.lock();
                state.open_flags = Some(flags);
                state.open_devices += 1;
            }
            done(Ok(Box::new(SimDevice {
                modem,
                flags,
                closed: Rc::new(Cell::new(false)),
            })));
        });
    }
}

struct SimBus {
    nodes: Vec<Node>,
}

impl Bus for SimBus {
    fn nodes(&self) -> Vec<Node> {
        self.nodes.clone()
    }
}

struct SimDevice {
    modem: SimModem,
    flags: DeviceOpenFlags,
    closed: Rc<Cell<bool>>,
}

impl Device for SimDevice {
    fn allocate_client(&mut self, service: ServiceId, done: Callback<Box<dyn Client>>) {
        let modem = self.modem.clone();
        let closed = Rc::clone(&self.closed);
        let expect_indications = self.flags.contains(DeviceOpenFlags::EXPECT_INDICATIONS);
        task::spawn_local(async move {
            defer(Duration::ZERO).await;
            if closed.get() {
                done(Err(Error::Closed));
                return;
            }
            if service != ServiceId::LOC {
                done(Err(Error::ClientAllocation {
                    service,
                    reason: "service not provided by the simulator".into(),
                }));
                return;
            }
            done(Ok(Box::new(SimClient::new(modem, expect_indications))));
        });
    }

    fn close(&mut self) {
        if !self.closed.replace(true) {
            let mut state = self.modem.lock();
            state.open_devices = state.open_devices.saturating_sub(1);
        }
    }
}

impl Drop for SimDevice {
    fn drop(&mut self) {
        self.close();
    }
}

type Sinks = Rc<RefCell<HashMap<IndicationKind, IndicationSink>>>;

struct SimClient {
    id: u32,
    modem: SimModem,
    tx: mpsc::UnboundedSender<Indication>,
    sinks: Sinks,
    released: Rc<Cell<bool>>,
    parked: Vec<Callback<Option<Reply>>>,
    pump: JoinHandle<()>,
    feed: Rc<RefCell<Option<JoinHandle<()>>>>,
}

impl SimClient {
    fn new(modem: SimModem, expect_indications: bool) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = modem.register_client(tx.clone());
        let sinks: Sinks = Rc::default();
        let pump = task::spawn_local(pump_indications(rx, Rc::clone(&sinks), expect_indications));
        debug!(client = id, "simulated LOC client allocated");
        Self {
            id,
            modem,
            tx,
            sinks,
            released: Rc::new(Cell::new(false)),
            parked: Vec::new(),
            pump,
            feed: Rc::default(),
        }
    }
}

impl Client for SimClient {
    fn send(&mut self, request: Request, _timeout: Duration, done: Callback<Option<Reply>>) {
        let message = request.message_id();
        self.modem.lock().journal.push(request.clone());
        let script = self.modem.script(request.kind());
        trace!(%message, outcome = ?script.outcome, "simulated request");

        if self.released.get() {
            task::spawn_local(async move {
                defer(Duration::ZERO).await;
                done(Err(Error::Closed));
            });
            return;
        }

        let result = match script.outcome {
            Outcome::Never => {
                self.parked.push(done);
                return;
            }
            Outcome::Ok => Ok(Some(Reply { message })),
            Outcome::Empty => Ok(None),
            Outcome::Fail(code) => Err(Error::Protocol { message, code }),
        };

        let released = Rc::clone(&self.released);
        let feed = Rc::clone(&self.feed);
        let tx = self.tx.clone();
        let modem = self.modem.clone();
        task::spawn_local(async move {
            defer(script.delay).await;
            if released.get() {
                done(Err(Error::Closed));
                return;
            }
            let answered = matches!(result, Ok(Some(_)));
            done(result);
            if !answered {
                return;
            }
            match request {
                Request::Start(start) => {
                    if let Some(fix) = modem.fix_feed() {
                        let task = task::spawn_local(run_fix_feed(fix, start, tx));
                        if let Some(previous) = feed.borrow_mut().replace(task) {
                            previous.abort();
                        }
                    }
                }
                Request::Stop { .. } => {
                    if let Some(task) = feed.borrow_mut().take() {
                        task.abort();
                    }
                }
                _ => {}
            }
        });
    }

    fn on(&mut self, kind: IndicationKind, sink: IndicationSink) {
        self.sinks.borrow_mut().insert(kind, sink);
    }

    fn release(&mut self) {
        if self.released.replace(true) {
            return;
        }
        self.pump.abort();
        if let Some(task) = self.feed.borrow_mut().take() {
            task.abort();
        }
        self.parked.clear();
        self.sinks.borrow_mut().clear();
        self.modem.unregister_client(self.id);
        debug!(client = self.id, "simulated LOC client released");
    }
}

impl Drop for SimClient {
    fn drop(&mut self) {
        self.release();
    }
}

async fn pump_indications(
    mut rx: mpsc::UnboundedReceiver<Indication>,
    sinks: Sinks,
    expect_indications: bool,
) {
    while let Some(indication) = rx.recv().await {
        let kind = indication.kind();
        if !expect_indications {
            trace!(%kind, "device not expecting indications, dropped");
            continue;
        }
        let taken = sinks.borrow_mut().remove(&kind);
        match taken {
            Some(mut sink) => {
                sink(indication);
                sinks.borrow_mut().entry(kind).or_insert(sink);
            }
            None => trace!(%kind, "no subscriber, indication dropped"),
        }
    }
}

async fn run_fix_feed(feed: FixFeed, start: StartRequest, tx: mpsc::UnboundedSender<Indication>) {
    let mut ticker = tokio::time::interval(start.min_interval.max(MIN_FEED_INTERVAL));
    loop {
        ticker.tick().await;
        for indication in feed.indications(start.session_id, Utc::now()) {
            if tx.send(indication).is_err() {
                return;
            }
        }
    }
}

/// Completions always arrive on a later loop turn, never inline.
async fn defer(delay: Duration) {
    if delay.is_zero() {
        task::yield_now().await;
    } else {
        tokio::time::sleep(delay).await;
    }
}
