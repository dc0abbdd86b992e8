// ── Indication dispatcher ──
//
// Routes indications from the loop thread to caller-supplied handlers.
// Each kind has its own lane: a handler slot plus a worker task on the
// caller's runtime, so deliveries of one kind stay in order and never
// wait on another kind's handler.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use qgps_api::mainloop::panic_message;
use qgps_api::{Client, Indication, IndicationKind};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::model::{NmeaSentence, PositionReport, SatelliteInfo};

// ── Handler ──────────────────────────────────────────────────────

/// An async indication handler. Cheap to clone.
pub struct Handler<T> {
    f: Arc<dyn Fn(T) -> BoxFuture<'static, ()> + Send + Sync>,
}

impl<T> Clone for Handler<T> {
    fn clone(&self) -> Self {
        Self {
            f: Arc::clone(&self.f),
        }
    }
}

impl<T> std::fmt::Debug for Handler<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Handler")
    }
}

impl<T: Send + 'static> Handler<T> {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            f: Arc::new(move |value| f(value).boxed()),
        }
    }

    /// Wrap a synchronous closure.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Self::new(move |value| {
            let f = Arc::clone(&f);
            async move { f(value) }
        })
    }

    fn call(&self, value: T) -> BoxFuture<'static, ()> {
        (self.f)(value)
    }
}

// ── Lane ─────────────────────────────────────────────────────────

type Slot<T> = Arc<ArcSwapOption<Handler<T>>>;

struct Lane<T> {
    handler: Slot<T>,
    tx: mpsc::UnboundedSender<T>,
}

impl<T: Send + 'static> Lane<T> {
    fn spawn(
        runtime: &Handle,
        kind: IndicationKind,
        cancel: CancellationToken,
        fallback: fn(&T),
    ) -> Self {
        let handler: Slot<T> = Arc::new(ArcSwapOption::empty());
        let (tx, rx) = mpsc::unbounded_channel();
        runtime.spawn(deliver(kind, rx, Arc::clone(&handler), cancel, fallback));
        Self { handler, tx }
    }

    fn set(&self, handler: Option<Handler<T>>) {
        self.handler.store(handler.map(Arc::new));
    }

    fn has_handler(&self) -> bool {
        self.handler.load().is_some()
    }

    /// Queue `value` for the handler, or log it when nobody listens.
    fn offer(&self, kind: IndicationKind, value: T, fallback: fn(&T)) {
        if !self.has_handler() {
            fallback(&value);
            return;
        }
        if let Err(mpsc::error::SendError(value)) = self.tx.send(value) {
            trace!(%kind, "delivery worker gone");
            fallback(&value);
        }
    }
}

async fn deliver<T: Send + 'static>(
    kind: IndicationKind,
    mut rx: mpsc::UnboundedReceiver<T>,
    handler: Slot<T>,
    cancel: CancellationToken,
    fallback: fn(&T),
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            value = rx.recv() => {
                let Some(value) = value else { break };
                // The handler may have been cleared since the value was queued.
                let Some(current) = handler.load_full() else {
                    fallback(&value);
                    continue;
                };
                let run = AssertUnwindSafe(async move { current.call(value).await });
                if let Err(panic) = run.catch_unwind().await {
                    warn!(
                        %kind,
                        reason = %panic_message(panic.as_ref()),
                        "indication handler panicked"
                    );
                }
            }
        }
    }
    trace!(%kind, "delivery worker stopped");
}

// ── Fallback logging ─────────────────────────────────────────────

fn log_nmea(sentence: &NmeaSentence) {
    debug!(sentence = %sentence, "NMEA");
}

fn log_satellites(info: &SatelliteInfo) {
    debug!(
        satellites = info.len(),
        in_use = info.in_use().count(),
        "satellite info"
    );
}

fn log_position(report: &PositionReport) {
    if let Some((horizontal, vertical)) = report.accuracy() {
        debug!(horizontal_m = horizontal, vertical_m = vertical, "position accuracy");
    }
    if let Some((latitude, longitude)) = report.coordinates() {
        debug!(latitude, longitude, "position");
    }
}

// ── Dispatcher ───────────────────────────────────────────────────

/// Fan-out point between transport indications and handlers.
///
/// Cloned into the loop-side sinks; `dispatch` runs on the loop thread and
/// never blocks.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    nmea: Lane<NmeaSentence>,
    satellites: Lane<SatelliteInfo>,
    positions: Lane<PositionReport>,
    cancel: CancellationToken,
}

impl Drop for DispatcherInner {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("nmea", &self.inner.nmea.has_handler())
            .field("satellites", &self.inner.satellites.has_handler())
            .field("positions", &self.inner.positions.has_handler())
            .finish()
    }
}

impl Dispatcher {
    /// Create the dispatcher; delivery workers run on `runtime`.
    pub fn new(runtime: &Handle) -> Self {
        let cancel = CancellationToken::new();
        Self {
            inner: Arc::new(DispatcherInner {
                nmea: Lane::spawn(runtime, IndicationKind::Nmea, cancel.clone(), log_nmea),
                satellites: Lane::spawn(
                    runtime,
                    IndicationKind::SatelliteInfo,
                    cancel.clone(),
                    log_satellites,
                ),
                positions: Lane::spawn(
                    runtime,
                    IndicationKind::PositionReport,
                    cancel.clone(),
                    log_position,
                ),
                cancel,
            }),
        }
    }

    /// Register one sink per indication kind on `client`.
    pub fn attach(&self, client: &mut dyn Client) {
        for kind in IndicationKind::ALL {
            let dispatcher = self.clone();
            client.on(kind, Box::new(move |indication| dispatcher.dispatch(indication)));
        }
        debug!("indication sinks attached");
    }

    pub fn dispatch(&self, indication: Indication) {
        let inner = &self.inner;
        match indication {
            Indication::Nmea(ind) => {
                inner
                    .nmea
                    .offer(IndicationKind::Nmea, NmeaSentence::from(ind), log_nmea);
            }
            Indication::GnssSvInfo(ind) => inner.satellites.offer(
                IndicationKind::SatelliteInfo,
                SatelliteInfo::from(ind),
                log_satellites,
            ),
            Indication::PositionReport(ind) => inner.positions.offer(
                IndicationKind::PositionReport,
                PositionReport::from(ind),
                log_position,
            ),
        }
    }

    pub fn set_nmea_handler(&self, handler: Option<Handler<NmeaSentence>>) {
        self.inner.nmea.set(handler);
    }

    pub fn set_satellite_info_handler(&self, handler: Option<Handler<SatelliteInfo>>) {
        self.inner.satellites.set(handler);
    }

    pub fn set_position_handler(&self, handler: Option<Handler<PositionReport>>) {
        self.inner.positions.set(handler);
    }

    /// Remove every handler.
    pub fn clear(&self) {
        self.set_nmea_handler(None);
        self.set_satellite_info_handler(None);
        self.set_position_handler(None);
    }

    /// Stop the delivery workers. Later indications are only logged.
    pub fn shutdown(&self) {
        self.clear();
        self.inner.cancel.cancel();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use qgps_api::{NmeaIndication, PositionReportIndication};

    use super::*;

    fn nmea(text: &str) -> Indication {
        Indication::Nmea(NmeaIndication {
            sentence: text.to_owned(),
        })
    }

    #[tokio::test]
    async fn nmea_reaches_handler_in_order_and_stripped() {
        let dispatcher = Dispatcher::new(&Handle::current());
        let (tx, mut rx) = mpsc::unbounded_channel();
        dispatcher.set_nmea_handler(Some(Handler::from_fn(move |s: NmeaSentence| {
            tx.send(s.as_str().to_owned()).unwrap();
        })));

        dispatcher.dispatch(nmea("$GPGGA,1*00\r\n"));
        dispatcher.dispatch(nmea("$GPRMC,2*00\r\n"));

        assert_eq!(rx.recv().await.unwrap(), "$GPGGA,1*00");
        assert_eq!(rx.recv().await.unwrap(), "$GPRMC,2*00");
    }

    #[tokio::test]
    async fn missing_handler_discards() {
        let dispatcher = Dispatcher::new(&Handle::current());
        let calls = Arc::new(AtomicUsize::new(0));

        dispatcher.dispatch(nmea("$GPGGA*00\r\n"));
        let counter = Arc::clone(&calls);
        dispatcher.set_nmea_handler(Some(Handler::from_fn(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })));
        dispatcher.set_nmea_handler(None);
        dispatcher.dispatch(nmea("$GPGGA*00\r\n"));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn partial_position_is_delivered() {
        let dispatcher = Dispatcher::new(&Handle::current());
        let (tx, mut rx) = mpsc::unbounded_channel();
        dispatcher.set_position_handler(Some(Handler::new(move |report: PositionReport| {
            let tx = tx.clone();
            async move {
                tx.send(report).unwrap();
            }
        })));

        dispatcher.dispatch(Indication::PositionReport(PositionReportIndication {
            latitude: Some(10.0),
            longitude: Some(20.0),
            ..PositionReportIndication::default()
        }));

        let report = rx.recv().await.unwrap();
        assert_eq!(report.coordinates(), Some((10.0, 20.0)));
        assert_eq!(report.altitude, None);
        assert_eq!(report.accuracy(), None);
    }

    #[tokio::test]
    async fn panicking_handler_keeps_lane_alive() {
        let dispatcher = Dispatcher::new(&Handle::current());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        dispatcher.set_nmea_handler(Some(Handler::from_fn(move |s: NmeaSentence| {
            assert!(!s.as_str().contains("BAD"), "poisoned sentence");
            sink.lock().unwrap().push(s.as_str().to_owned());
        })));

        dispatcher.dispatch(nmea("$BAD*00"));
        dispatcher.dispatch(nmea("$GOOD*00"));

        for _ in 0..100 {
            if !seen.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(*seen.lock().unwrap(), ["$GOOD*00"]);
    }

    #[tokio::test]
    async fn stuck_handler_blocks_neither_dispatch_nor_other_kinds() {
        let dispatcher = Dispatcher::new(&Handle::current());
        let entered = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&entered);
        dispatcher.set_nmea_handler(Some(Handler::new(move |_: NmeaSentence| {
            counter.fetch_add(1, Ordering::SeqCst);
            std::future::pending::<()>()
        })));
        let (tx, mut rx) = mpsc::unbounded_channel();
        dispatcher.set_position_handler(Some(Handler::from_fn(move |report: PositionReport| {
            tx.send(report).unwrap();
        })));

        let started = std::time::Instant::now();
        for text in ["$GPGGA*00", "$GPRMC*00", "$GPGSV*00"] {
            dispatcher.dispatch(nmea(text));
        }
        dispatcher.dispatch(Indication::PositionReport(PositionReportIndication {
            latitude: Some(1.0),
            longitude: Some(2.0),
            ..PositionReportIndication::default()
        }));
        assert!(started.elapsed() < Duration::from_millis(100));

        let report = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.coordinates(), Some((1.0, 2.0)));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(entered.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn shutdown_stops_delivery() {
        let dispatcher = Dispatcher::new(&Handle::current());
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        dispatcher.set_nmea_handler(Some(Handler::from_fn(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })));
        dispatcher.shutdown();
        dispatcher.dispatch(nmea("$GPGGA*00"));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
