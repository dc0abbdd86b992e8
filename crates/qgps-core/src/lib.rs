//! Session controller between `qgps-api` and consumers (CLI, services).
//!
//! This crate owns the async side of a GNSS modem session:
//!
//! - **[`Gps`]**: the façade. Walks the setup sequence (discover, open
//!   device, allocate client, register events, configure, start), exposes
//!   the session state and routes indications to handlers.
//!
//! - **[`Bridge`]**: turns callback-style work on the event loop into a
//!   single awaited result with a per-request deadline.
//!
//! - **[`SessionMachine`]**: gates steps so that they run strictly in
//!   order, publishes [`SessionState`] on a watch channel.
//!
//! - **[`Dispatcher`]**: per-kind delivery lanes from the loop thread to
//!   async [`Handler`]s on the caller's runtime.
//!
//! - **Domain model** ([`model`]): `NmeaSentence`, `SatelliteInfo`,
//!   `PositionReport`, with every modem-optional field kept optional.

pub mod bridge;
pub mod config;
pub mod convert;
pub mod dispatch;
pub mod error;
pub mod gps;
pub mod model;
pub mod session;
pub mod steps;

// ── Primary re-exports ──────────────────────────────────────────────
pub use bridge::{Bridge, Completer};
pub use config::{
    ConfigureOptions, DEFAULT_DISCOVERY_WINDOW, DEFAULT_REQUEST_TIMEOUT, SessionConfig,
    StartOptions,
};
pub use dispatch::{Dispatcher, Handler};
pub use error::CoreError;
pub use gps::Gps;
pub use model::{NmeaSentence, PositionReport, SatelliteInfo, SatelliteSv};
pub use session::{SessionMachine, SessionState, Step, StepGuard};

// Transport-side types consumers need to drive a session.
pub use qgps_api::{
    EventLoop, EventRegistration, FixRecurrence, LockType, LoopHandle, Node, NmeaTypes,
    OperationMode, ServiceId, ServiceNode,
};
