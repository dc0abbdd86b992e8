// ── Transport contract ──
//
// Callback-style interface to the QRTR/QMI stack. Every method is called
// on the event loop thread and every callback fires on that same thread,
// after the initiating call has returned. Implementations never invoke a
// callback re-entrantly from inside the call that registered it.

use std::time::Duration;

use crate::error::Error;
use crate::indication::{Indication, IndicationKind};
use crate::message::{DeviceOpenFlags, Node, Reply, Request, ServiceId, ServiceNode};

/// One-shot completion callback. Lives on the loop thread, so it need not
/// be `Send`.
pub type Callback<T> = Box<dyn FnOnce(Result<T, Error>)>;

/// Receives every indication of one kind delivered to a client.
pub type IndicationSink = Box<dyn FnMut(Indication)>;

/// Entry point into the modem stack.
pub trait Transport {
    /// Create a bus handle and wait up to `window` for nodes to appear.
    fn new_bus(&mut self, window: Duration, done: Callback<Box<dyn Bus>>);

    /// Open a QMI device against the given bus peer.
    fn open_device(
        &mut self,
        peer: ServiceNode,
        flags: DeviceOpenFlags,
        done: Callback<Box<dyn Device>>,
    );
}

/// A discovered QRTR bus. Dropping it releases the bus.
pub trait Bus {
    /// Nodes seen during the discovery window, in announcement order.
    fn nodes(&self) -> Vec<Node>;
}

/// An open QMI device.
pub trait Device {
    fn allocate_client(&mut self, service: ServiceId, done: Callback<Box<dyn Client>>);

    /// Close the device. Outstanding work fails with [`Error::Closed`].
    fn close(&mut self);
}

/// A service client allocated on a device.
pub trait Client {
    /// Issue a request. `done` receives `Ok(None)` when the modem answered
    /// with an empty response.
    fn send(&mut self, request: Request, timeout: Duration, done: Callback<Option<Reply>>);

    /// Route indications of `kind` to `sink`, replacing any previous sink.
    fn on(&mut self, kind: IndicationKind, sink: IndicationSink);

    /// Release the client id on the device.
    fn release(&mut self);
}
