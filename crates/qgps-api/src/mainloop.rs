// ── Event loop adapter ──
//
// A dedicated thread running a current-thread tokio runtime inside a
// LocalSet. It owns the transport and every bus/device/client handle;
// other threads only ever hand it closures through a `LoopHandle`.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle, ThreadId};

use tokio::sync::mpsc;
use tokio::task::LocalSet;
use tracing::{debug, error, warn};

use crate::error::Error;
use crate::message::ServiceNode;
use crate::transport::{Bus, Client, Device, Transport};

const LOOP_THREAD_NAME: &str = "qgps-loop";

type Work = Box<dyn FnOnce(&mut LoopContext) + Send>;

enum Envelope {
    Work(Work),
    Quit,
}

// ── SessionKey ──────────────────────────────────────────────────────

/// Identifies one session's handle slot on the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionKey(u64);

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

// ── SessionHandles ──────────────────────────────────────────────────

/// Transport handles acquired by one session, owned by the loop thread.
#[derive(Default)]
pub struct SessionHandles {
    pub bus: Option<Box<dyn Bus>>,
    pub node: Option<ServiceNode>,
    pub device: Option<Box<dyn Device>>,
    pub client: Option<Box<dyn Client>>,
}

impl SessionHandles {
    /// Release everything in reverse acquisition order. Idempotent.
    pub fn teardown(&mut self) {
        if let Some(mut client) = self.client.take() {
            client.release();
        }
        if let Some(mut device) = self.device.take() {
            device.close();
        }
        self.node = None;
        self.bus = None;
    }
}

impl Drop for SessionHandles {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl fmt::Debug for SessionHandles {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandles")
            .field("bus", &self.bus.is_some())
            .field("node", &self.node)
            .field("device", &self.device.is_some())
            .field("client", &self.client.is_some())
            .finish()
    }
}

// ── LoopContext ─────────────────────────────────────────────────────

/// What a work item sees when it runs on the loop thread.
pub struct LoopContext {
    transport: Box<dyn Transport>,
    sessions: HashMap<SessionKey, Rc<RefCell<SessionHandles>>>,
}

impl LoopContext {
    fn new(transport: Box<dyn Transport>) -> Self {
        Self {
            transport,
            sessions: HashMap::new(),
        }
    }

    pub fn transport(&mut self) -> &mut dyn Transport {
        self.transport.as_mut()
    }

    /// The handle slot for `key`, created empty on first use.
    ///
    /// Callbacks capture the returned `Rc` rather than the key, so a slot
    /// released while a callback is in flight is torn down once that
    /// callback drops it.
    pub fn session(&mut self, key: SessionKey) -> Rc<RefCell<SessionHandles>> {
        Rc::clone(self.sessions.entry(key).or_default())
    }

    pub fn release_session(&mut self, key: SessionKey) {
        let Some(slot) = self.sessions.remove(&key) else {
            return;
        };
        match slot.try_borrow_mut() {
            Ok(mut handles) => {
                handles.teardown();
                debug!(%key, "session handles released");
            }
            Err(_) => warn!(%key, "session slot busy, deferring teardown to drop"),
        }
    }

    fn teardown_all(&mut self) {
        let keys: Vec<_> = self.sessions.keys().copied().collect();
        for key in keys {
            self.release_session(key);
        }
    }
}

// ── LoopHandle ──────────────────────────────────────────────────────

/// Cloneable, `Send` handle for submitting work to the loop thread.
#[derive(Clone)]
pub struct LoopHandle {
    inner: Arc<HandleInner>,
}

struct HandleInner {
    tx: mpsc::UnboundedSender<Envelope>,
    next_key: AtomicU64,
    thread: ThreadId,
}

impl LoopHandle {
    /// Queue `work` to run on the loop thread. Never blocks and never runs
    /// `work` inline, even when called from the loop thread itself.
    pub fn submit<F>(&self, work: F) -> Result<(), Error>
    where
        F: FnOnce(&mut LoopContext) + Send + 'static,
    {
        self.inner
            .tx
            .send(Envelope::Work(Box::new(work)))
            .map_err(|_| Error::LoopStopped)
    }

    /// Reserve a fresh session slot key.
    pub fn new_session_key(&self) -> SessionKey {
        SessionKey(self.inner.next_key.fetch_add(1, Ordering::Relaxed))
    }

    /// Tear down a session's handles on the loop thread. A no-op once the
    /// loop has stopped, since shutdown already released everything.
    pub fn release_session(&self, key: SessionKey) {
        if self.submit(move |ctx| ctx.release_session(key)).is_err() {
            debug!(%key, "event loop gone, session already released");
        }
    }

    pub fn is_running(&self) -> bool {
        !self.inner.tx.is_closed()
    }

    pub fn on_loop_thread(&self) -> bool {
        thread::current().id() == self.inner.thread
    }

    fn quit(&self) {
        let _ = self.inner.tx.send(Envelope::Quit);
    }
}

impl fmt::Debug for LoopHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopHandle")
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

// ── EventLoop ───────────────────────────────────────────────────────

/// Owner of the loop thread. Dropping it stops the loop and releases
/// every session's handles.
pub struct EventLoop {
    handle: LoopHandle,
    thread: Option<JoinHandle<()>>,
}

impl EventLoop {
    /// Start the loop thread. `factory` runs on that thread, so the
    /// transport it builds does not have to be `Send`.
    pub fn spawn<F>(factory: F) -> Result<Self, Error>
    where
        F: FnOnce() -> Box<dyn Transport> + Send + 'static,
    {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .map_err(|e| Error::LoopStart(e.to_string()))?;
        let (tx, rx) = mpsc::unbounded_channel();

        let thread = thread::Builder::new()
            .name(LOOP_THREAD_NAME.into())
            .spawn(move || {
                let local = LocalSet::new();
                local.block_on(&runtime, run(factory, rx));
            })
            .map_err(|e| Error::LoopStart(e.to_string()))?;

        let handle = LoopHandle {
            inner: Arc::new(HandleInner {
                tx,
                next_key: AtomicU64::new(1),
                thread: thread.thread().id(),
            }),
        };
        debug!("event loop started");

        Ok(Self {
            handle,
            thread: Some(thread),
        })
    }

    pub fn handle(&self) -> LoopHandle {
        self.handle.clone()
    }

    /// Stop the loop and wait for the thread to exit.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        self.handle.quit();
        if self.handle.on_loop_thread() {
            // Joining ourselves would deadlock; the quit message is enough.
            return;
        }
        if let Err(panic) = thread.join() {
            error!(
                reason = %panic_message(panic.as_ref()),
                "event loop thread panicked"
            );
        }
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLoop")
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

#[allow(clippy::future_not_send)]
async fn run<F>(factory: F, mut rx: mpsc::UnboundedReceiver<Envelope>)
where
    F: FnOnce() -> Box<dyn Transport>,
{
    let mut ctx = LoopContext::new(factory());

    while let Some(envelope) = rx.recv().await {
        match envelope {
            Envelope::Work(work) => {
                if let Err(panic) = catch_unwind(AssertUnwindSafe(|| work(&mut ctx))) {
                    error!(
                        reason = %panic_message(panic.as_ref()),
                        "work item panicked on event loop"
                    );
                }
            }
            Envelope::Quit => break,
        }
    }

    rx.close();
    ctx.teardown_all();
    debug!("event loop stopped");
}

/// Best-effort text of a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_owned()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::mpsc as std_mpsc;
    use std::time::Duration;

    use super::*;
    use crate::sim::SimModem;

    #[test]
    fn work_runs_on_loop_thread_in_submission_order() {
        let event_loop = EventLoop::spawn(SimModem::new().factory()).unwrap();
        let handle = event_loop.handle();
        let (tx, rx) = std_mpsc::channel();

        for i in 0..5 {
            let tx = tx.clone();
            let h = handle.clone();
            handle
                .submit(move |_| tx.send((i, h.on_loop_thread())).unwrap())
                .unwrap();
        }

        let seen: Vec<_> = (0..5)
            .map(|_| rx.recv_timeout(Duration::from_secs(2)).unwrap())
            .collect();
        assert_eq!(seen, (0..5).map(|i| (i, true)).collect::<Vec<_>>());
        assert!(!handle.on_loop_thread());
    }

    #[test]
    fn panicking_work_does_not_stop_the_loop() {
        let event_loop = EventLoop::spawn(SimModem::new().factory()).unwrap();
        let handle = event_loop.handle();
        let (tx, rx) = std_mpsc::channel();

        handle.submit(|_| panic!("boom")).unwrap();
        handle.submit(move |_| tx.send(()).unwrap()).unwrap();

        rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(handle.is_running());
    }

    #[test]
    fn submit_after_shutdown_reports_loop_stopped() {
        let event_loop = EventLoop::spawn(SimModem::new().factory()).unwrap();
        let handle = event_loop.handle();
        event_loop.shutdown();

        assert!(!handle.is_running());
        assert!(matches!(handle.submit(|_| {}), Err(Error::LoopStopped)));
    }

    #[test]
    fn session_keys_are_unique() {
        let event_loop = EventLoop::spawn(SimModem::new().factory()).unwrap();
        let handle = event_loop.handle();
        let a = handle.new_session_key();
        let b = handle.clone().new_session_key();
        assert_ne!(a, b);
    }

    #[test]
    fn panic_message_reads_common_payloads() {
        let payload: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(payload.as_ref()), "static");
        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");
        let payload: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }
}
