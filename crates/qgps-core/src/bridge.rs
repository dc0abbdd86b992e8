// ── Completion bridge ──
//
// Turns callback-style work on the event loop into a single awaitable
// result. Each request gets a oneshot channel; the loop side holds a
// `Completer`, the caller holds the receiver and a deadline.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use qgps_api::mainloop::panic_message;
use qgps_api::{LoopContext, LoopHandle};
use tokio::sync::oneshot;
use tracing::{debug, trace};

use crate::error::CoreError;

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

type Slot<T> = Arc<Mutex<Option<oneshot::Sender<Result<T, qgps_api::Error>>>>>;

// ── Completer ────────────────────────────────────────────────────

/// Loop-side end of a pending request. Clones share one slot: the first
/// `complete` wins and every later call is a no-op.
pub struct Completer<T> {
    id: u64,
    slot: Slot<T>,
}

impl<T> Clone for Completer<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<T> std::fmt::Debug for Completer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Completer")
            .field("id", &self.id)
            .field("pending", &self.is_pending())
            .finish()
    }
}

impl<T> Completer<T> {
    fn new(tx: oneshot::Sender<Result<T, qgps_api::Error>>) -> Self {
        Self {
            id: NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed),
            slot: Arc::new(Mutex::new(Some(tx))),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_pending(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }

    /// Resolve the request. Returns `false` when it was already resolved
    /// or its waiter has given up.
    pub fn complete(&self, result: Result<T, qgps_api::Error>) -> bool {
        let sender = self
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(tx) = sender else {
            debug!(request = self.id, "duplicate completion ignored");
            return false;
        };
        if tx.send(result).is_err() {
            debug!(request = self.id, "late completion ignored, waiter gone");
            return false;
        }
        true
    }
}

// ── Bridge ───────────────────────────────────────────────────────

/// Submits work to the event loop and awaits its completion.
#[derive(Debug, Clone)]
pub struct Bridge {
    handle: LoopHandle,
}

impl Bridge {
    pub fn new(handle: LoopHandle) -> Self {
        Self { handle }
    }

    pub fn handle(&self) -> &LoopHandle {
        &self.handle
    }

    /// Run `submit` on the loop and wait up to `timeout` for the completer
    /// it receives to fire.
    ///
    /// An `Err` returned by `submit`, or a panic inside it, resolves the
    /// request with that error. A completer dropped by a stopping loop
    /// resolves it with [`CoreError::LoopStopped`]. On timeout the request is abandoned and a
    /// late completion is discarded.
    pub async fn await_once<T, F>(
        &self,
        operation: &str,
        timeout: Duration,
        submit: F,
    ) -> Result<T, CoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut LoopContext, Completer<T>) -> Result<(), qgps_api::Error> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let completer = Completer::new(tx);
        let id = completer.id();
        trace!(request = id, operation, "submitting");

        let on_loop = completer.clone();
        self.handle
            .submit(move |ctx| {
                let fallback = on_loop.clone();
                match catch_unwind(AssertUnwindSafe(|| submit(ctx, on_loop))) {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => {
                        fallback.complete(Err(err));
                    }
                    Err(panic) => {
                        fallback.complete(Err(qgps_api::Error::WorkFailed(panic_message(
                            panic.as_ref(),
                        ))));
                    }
                }
            })
            .map_err(|err| CoreError::from_transport(operation, err))?;
        drop(completer);

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => {
                trace!(request = id, operation, ok = result.is_ok(), "completed");
                result.map_err(|err| CoreError::from_transport(operation, err))
            }
            Ok(Err(_)) if !self.handle.is_running() => {
                debug!(request = id, operation, "event loop stopped with request pending");
                Err(CoreError::LoopStopped)
            }
            Ok(Err(_)) => Err(CoreError::from_transport(
                operation,
                qgps_api::Error::CompletionDropped,
            )),
            Err(_) => {
                let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
                debug!(request = id, operation, timeout_ms, "request abandoned");
                Err(CoreError::Timeout {
                    operation: operation.to_owned(),
                    timeout_ms,
                })
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::mpsc as std_mpsc;

    use qgps_api::{EventLoop, SimModem};

    use super::*;

    fn spawn_loop() -> (EventLoop, Bridge) {
        let event_loop = EventLoop::spawn(SimModem::new().factory()).unwrap();
        let bridge = Bridge::new(event_loop.handle());
        (event_loop, bridge)
    }

    #[tokio::test]
    async fn immediate_completion_resolves() {
        let (_loop, bridge) = spawn_loop();
        let value = bridge
            .await_once("echo", Duration::from_secs(2), |_, done| {
                done.complete(Ok(41 + 1));
                Ok(())
            })
            .await
            .unwrap();
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn submit_error_resolves_as_protocol_error() {
        let (_loop, bridge) = spawn_loop();
        let err = bridge
            .await_once::<(), _>("fail", Duration::from_secs(2), |_, _| {
                Err(qgps_api::Error::MissingHandle("client"))
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::Protocol {
                source: qgps_api::Error::MissingHandle("client"),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn panicking_work_resolves_as_error() {
        let (_loop, bridge) = spawn_loop();
        let err = bridge
            .await_once::<(), _>("explode", Duration::from_secs(2), |_, _| panic!("kaboom"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("kaboom"));
    }

    #[tokio::test]
    async fn dropped_completer_does_not_hang() {
        let (_loop, bridge) = spawn_loop();
        let err = bridge
            .await_once::<(), _>("forget", Duration::from_secs(5), |_, done| {
                drop(done);
                Ok(())
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::Protocol {
                source: qgps_api::Error::CompletionDropped,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn late_completion_after_timeout_is_ignored() {
        let (_loop, bridge) = spawn_loop();
        let (stash_tx, stash_rx) = std_mpsc::channel::<Completer<u32>>();

        let err = bridge
            .await_once("slow", Duration::from_millis(20), move |_, done| {
                stash_tx.send(done).unwrap();
                Ok(())
            })
            .await
            .unwrap_err();
        assert!(err.is_timeout());

        let late = stash_rx.recv().unwrap();
        assert!(!late.complete(Ok(7)));
        assert!(!late.is_pending());

        // A fresh request on the same bridge is unaffected.
        let value = bridge
            .await_once("next", Duration::from_secs(2), |_, done| {
                done.complete(Ok(9_u32));
                Ok(())
            })
            .await
            .unwrap();
        assert_eq!(value, 9);
    }

    #[test]
    fn first_completion_wins() {
        let (tx, mut rx) = oneshot::channel::<Result<u8, qgps_api::Error>>();
        let completer = Completer::new(tx);
        let twin = completer.clone();
        assert!(completer.complete(Ok(1)));
        assert!(!twin.complete(Ok(2)));
        assert_eq!(rx.try_recv().unwrap().unwrap(), 1);
    }

    #[tokio::test]
    async fn stopped_loop_reports_loop_stopped() {
        let (event_loop, bridge) = spawn_loop();
        event_loop.shutdown();
        let err = bridge
            .await_once::<(), _>("orphan", Duration::from_secs(1), |_, _| Ok(()))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::LoopStopped));
    }
}
