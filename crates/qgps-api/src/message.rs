// ── QMI LOC message vocabulary ──
//
// Identity of services, messages and requests as seen by the session
// controller. Encoding these into QMI TLVs is the transport's job; the
// types here only carry the values a request is built from.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

// ── Flag sets ───────────────────────────────────────────────────────

/// Declares a transparent bit-mask newtype with named flags.
macro_rules! flag_set {
    (
        $(#[$meta:meta])*
        $name:ident: $repr:ty {
            $( $(#[$fmeta:meta])* $flag:ident = $value:expr => $label:literal, )+
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name($repr);

        impl $name {
            $( $(#[$fmeta])* pub const $flag: Self = Self($value); )+

            const NAMED: &'static [(Self, &'static str)] = &[$( (Self::$flag, $label), )+];

            pub const fn empty() -> Self {
                Self(0)
            }

            pub const fn bits(self) -> $repr {
                self.0
            }

            pub const fn from_bits_retain(bits: $repr) -> Self {
                Self(bits)
            }

            pub const fn contains(self, other: Self) -> bool {
                self.0 & other.0 == other.0
            }

            pub const fn is_empty(self) -> bool {
                self.0 == 0
            }

            /// Names of the flags set in this mask, in declaration order.
            pub fn names(self) -> impl Iterator<Item = &'static str> {
                Self::NAMED
                    .iter()
                    .filter(move |(flag, _)| self.contains(*flag))
                    .map(|(_, name)| *name)
            }

            /// Look up a single flag by its kebab-case name (case-insensitive).
            pub fn from_name(name: &str) -> Option<Self> {
                Self::NAMED
                    .iter()
                    .find(|(_, label)| label.eq_ignore_ascii_case(name))
                    .map(|(flag, _)| *flag)
            }
        }

        impl BitOr for $name {
            type Output = Self;

            fn bitor(self, rhs: Self) -> Self {
                Self(self.0 | rhs.0)
            }
        }

        impl BitOrAssign for $name {
            fn bitor_assign(&mut self, rhs: Self) {
                self.0 |= rhs.0;
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}(", stringify!($name))?;
                let mut first = true;
                for name in self.names() {
                    if !first {
                        f.write_str(" | ")?;
                    }
                    f.write_str(name)?;
                    first = false;
                }
                f.write_str(")")
            }
        }
    };
}

flag_set! {
    /// Indication classes a LOC client asks the modem to deliver.
    EventRegistration: u64 {
        POSITION_REPORT = 1 << 0 => "position-report",
        GNSS_SATELLITE_INFO = 1 << 1 => "gnss-satellite-info",
        NMEA = 1 << 2 => "nmea",
        ENGINE_STATE = 1 << 10 => "engine-state",
        FIX_SESSION_STATE = 1 << 11 => "fix-session-state",
        GEOFENCE_GENERAL_ALERT = 1 << 15 => "geofence-general-alert",
        GEOFENCE_BREACH_NOTIFICATION = 1 << 16 => "geofence-breach-notification",
    }
}

flag_set! {
    /// NMEA sentence types the engine emits through NMEA indications.
    NmeaTypes: u32 {
        GGA = 1 << 0 => "gga",
        RMC = 1 << 1 => "rmc",
        GSV = 1 << 2 => "gsv",
        GSA = 1 << 3 => "gsa",
        VTG = 1 << 4 => "vtg",
        PQXFI = 1 << 5 => "pqxfi",
        PSTIS = 1 << 6 => "pstis",
    }
}

flag_set! {
    /// Flags used when opening a QMI device.
    DeviceOpenFlags: u32 {
        AUTO = 1 << 1 => "auto",
        EXPECT_INDICATIONS = 1 << 7 => "expect-indications",
    }
}

// ── Enumerated request values ───────────────────────────────────────

/// Positioning operation mode (standalone vs. network assisted).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "kebab-case", ascii_case_insensitive)]
#[serde(rename_all = "kebab-case")]
pub enum OperationMode {
    Default,
    /// Mobile-station based (assisted).
    Msb,
    /// Mobile-station assisted.
    Msa,
    Standalone,
    CellId,
}

/// Which location sessions the engine refuses to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "kebab-case", ascii_case_insensitive)]
#[serde(rename_all = "kebab-case")]
pub enum LockType {
    None,
    MobileInitiated,
    NetworkInitiated,
    All,
}

/// Whether a session produces one fix or keeps reporting.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "kebab-case", ascii_case_insensitive)]
#[serde(rename_all = "kebab-case")]
pub enum FixRecurrence {
    #[default]
    Periodic,
    Single,
}

// ── Identity ────────────────────────────────────────────────────────

/// QMI service identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceId(pub u8);

impl ServiceId {
    pub const WDS: Self = Self(0x01);
    pub const DMS: Self = Self(0x02);
    pub const NAS: Self = Self(0x03);
    pub const LOC: Self = Self(0x10);

    fn name(self) -> Option<&'static str> {
        Some(match self {
            Self::WDS => "wds",
            Self::DMS => "dms",
            Self::NAS => "nas",
            Self::LOC => "loc",
            _ => return None,
        })
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "0x{:02x}", self.0),
        }
    }
}

impl fmt::Debug for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ServiceId({self})")
    }
}

/// QMI LOC message identifier, shared by requests and indications.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub u16);

impl MessageId {
    pub const REGISTER_EVENTS: Self = Self(0x0021);
    pub const START: Self = Self(0x0022);
    pub const STOP: Self = Self(0x0023);
    pub const POSITION_REPORT: Self = Self(0x0024);
    pub const GNSS_SV_INFO: Self = Self(0x0025);
    pub const NMEA: Self = Self(0x0026);
    pub const ENGINE_STATE: Self = Self(0x002B);
    pub const FIX_SESSION_STATE: Self = Self(0x002C);
    pub const SET_ENGINE_LOCK: Self = Self(0x0037);
    pub const SET_NMEA_TYPES: Self = Self(0x003E);
    pub const SET_OPERATION_MODE: Self = Self(0x004A);

    fn name(self) -> Option<&'static str> {
        Some(match self {
            Self::REGISTER_EVENTS => "register-events",
            Self::START => "start",
            Self::STOP => "stop",
            Self::POSITION_REPORT => "position-report",
            Self::GNSS_SV_INFO => "gnss-sv-info",
            Self::NMEA => "nmea",
            Self::ENGINE_STATE => "engine-state",
            Self::FIX_SESSION_STATE => "fix-session-state",
            Self::SET_ENGINE_LOCK => "set-engine-lock",
            Self::SET_NMEA_TYPES => "set-nmea-types",
            Self::SET_OPERATION_MODE => "set-operation-mode",
            _ => return None,
        })
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{name} (0x{:04x})", self.0),
            None => write!(f, "0x{:04x}", self.0),
        }
    }
}

impl fmt::Debug for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageId({self})")
    }
}

// ── Bus topology ────────────────────────────────────────────────────

/// One service advertised by a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceEntry {
    pub service: ServiceId,
    pub port: u32,
}

/// An addressable endpoint on the QRTR bus and the services it offers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: u32,
    pub services: Vec<ServiceEntry>,
}

impl Node {
    pub fn new(id: u32) -> Self {
        Self {
            id,
            services: Vec::new(),
        }
    }

    pub fn with_service(mut self, service: ServiceId, port: u32) -> Self {
        self.services.push(ServiceEntry { service, port });
        self
    }

    /// Port on which this node exposes `service`, if it does.
    pub fn lookup_port(&self, service: ServiceId) -> Option<u32> {
        self.services
            .iter()
            .find(|entry| entry.service == service)
            .map(|entry| entry.port)
    }
}

/// The peer endpoint a device is opened against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceNode {
    pub node: u32,
    pub port: u32,
}

impl fmt::Display for ServiceNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.node, self.port)
    }
}

// ── Requests ────────────────────────────────────────────────────────

/// Parameters of a LOC start request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartRequest {
    pub session_id: u8,
    pub fix_recurrence: FixRecurrence,
    /// Minimum time between two position reports.
    pub min_interval: Duration,
    /// Accept reports before the fix has converged.
    pub intermediate_reports: bool,
}

impl StartRequest {
    /// The interval as carried on the wire (milliseconds, saturating).
    pub fn min_interval_ms(&self) -> u32 {
        u32::try_from(self.min_interval.as_millis()).unwrap_or(u32::MAX)
    }
}

/// Every request the session controller issues against a LOC client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    RegisterEvents { mask: EventRegistration },
    SetOperationMode { mode: OperationMode },
    SetEngineLock { lock: LockType },
    SetNmeaTypes { types: NmeaTypes },
    Start(StartRequest),
    Stop { session_id: u8 },
}

/// Fieldless discriminant of [`Request`], used for scripting and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum RequestKind {
    RegisterEvents,
    SetOperationMode,
    SetEngineLock,
    SetNmeaTypes,
    Start,
    Stop,
}

impl RequestKind {
    pub const fn message_id(self) -> MessageId {
        match self {
            Self::RegisterEvents => MessageId::REGISTER_EVENTS,
            Self::SetOperationMode => MessageId::SET_OPERATION_MODE,
            Self::SetEngineLock => MessageId::SET_ENGINE_LOCK,
            Self::SetNmeaTypes => MessageId::SET_NMEA_TYPES,
            Self::Start => MessageId::START,
            Self::Stop => MessageId::STOP,
        }
    }
}

impl Request {
    pub const fn kind(&self) -> RequestKind {
        match self {
            Self::RegisterEvents { .. } => RequestKind::RegisterEvents,
            Self::SetOperationMode { .. } => RequestKind::SetOperationMode,
            Self::SetEngineLock { .. } => RequestKind::SetEngineLock,
            Self::SetNmeaTypes { .. } => RequestKind::SetNmeaTypes,
            Self::Start(_) => RequestKind::Start,
            Self::Stop { .. } => RequestKind::Stop,
        }
    }

    pub const fn message_id(&self) -> MessageId {
        self.kind().message_id()
    }
}

/// A non-empty response to a request. An empty response is `None` at the
/// transport callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reply {
    pub message: MessageId,
}
