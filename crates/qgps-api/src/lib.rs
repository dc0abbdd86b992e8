//! QMI LOC vocabulary, the transport contract and the event loop that
//! owns every transport handle.
//!
//! Nothing here is async-aware beyond the loop thread itself; `qgps-core`
//! builds the session controller on top.

pub mod error;
pub mod indication;
pub mod mainloop;
pub mod message;
pub mod sim;
pub mod transport;

pub use error::{Error, QmiErrorCode};
pub use indication::{
    GnssSvInfoIndication, GnssSystem, Indication, IndicationKind, NmeaIndication,
    PositionReportIndication, SessionStatus, SvInfo,
};
pub use mainloop::{EventLoop, LoopContext, LoopHandle, SessionHandles, SessionKey};
pub use message::{
    DeviceOpenFlags, EventRegistration, FixRecurrence, LockType, MessageId, NmeaTypes, Node,
    OperationMode, Reply, Request, RequestKind, ServiceEntry, ServiceId, ServiceNode,
    StartRequest,
};
pub use sim::{FixFeed, Outcome, SimModem};
pub use transport::{Bus, Callback, Client, Device, IndicationSink, Transport};
