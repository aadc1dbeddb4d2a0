//! # IOC Runtime
//!
//! An in-process inter-object communication runtime. Independent components
//! inside one address space exchange three kinds of messages — events
//! (fire-and-forget, one-to-many), commands (request/response, one-to-one,
//! synchronous), and data (reliable byte payloads with flow control) —
//! behind a uniform service/connect model with typed endpoint roles and
//! pluggable protocol backends.
//!
//! ## Quick Tour
//!
//! ```
//! use ioc_runtime::{IocRuntime, LinkId, Options, SubEvtArgs, EvtDesc, EvtCallback};
//! use std::sync::Arc;
//!
//! let ioc = IocRuntime::new().unwrap();
//!
//! // Connectionless pub/sub over the reserved auto-link.
//! let cb: EvtCallback = Arc::new(|desc: &EvtDesc| {
//!     println!("event {:#x} value {}", desc.evt_id, desc.value);
//! });
//! ioc.sub_evt(LinkId::AUTO, &SubEvtArgs::new(vec![0xA1], cb)).unwrap();
//! ioc.post_evt(LinkId::AUTO, &EvtDesc::new(0xA1, 7), &Options::new().sync()).unwrap();
//! ```
//!
//! Connected mode goes through [`IocRuntime::online_service`],
//! [`IocRuntime::connect_service`], and [`IocRuntime::accept_client`]; the
//! same facade then carries events, commands, and data over the accepted
//! peer pair.

pub mod conles;
pub mod error;
pub mod link;
pub mod logging;
pub mod message;
pub mod options;
pub mod protocol;
pub mod queue;
pub mod runtime;
pub mod service;
pub mod uri;

mod registry;

pub use conles::{EvtCallback, SubEvtArgs, UnsubEvtArgs};
pub use error::{IocError, Result};
pub use link::{ConnArgs, ConnState, LinkId, LinkState, LinkSubState};
pub use message::{CmdDesc, CmdId, CmdStatus, DatDesc, DatStatus, EvtDesc, EvtId, MsgCommon};
pub use options::Options;
pub use protocol::ProtocolBackend;
pub use runtime::{CapabilityDesc, IocRuntime};
pub use service::{
    Capabilities, CmdCallback, CmdExecutorArgs, DatCallback, DatReceiverArgs, ServiceArgs,
    ServiceFlags, ServiceId, Usage, UsageArgs,
};
pub use uri::IocUri;

/// The current version of the runtime crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Compile-time limits of this build.
pub mod defaults {
    use std::time::Duration;

    /// Service table size.
    pub const MAX_SERVICES: usize = 16;

    /// Connected-mode link table size.
    pub const MAX_LINKS: usize = 128;

    /// Manual-accept tracking cap per service.
    pub const MAX_SERVICE_CLIENTS: usize = 64;

    /// Connectionless subscriber table size.
    pub const MAX_CONLES_CONSUMERS: usize = 16;

    /// Subscription cap per connected link.
    pub const MAX_LINK_CONSUMERS: usize = 16;

    /// Depth of each subscriber's bounded event queue.
    pub const MAX_QUEUED_EVTDESC: usize = 20;

    /// Depth of each polling executor's command inbox.
    pub const MAX_PENDING_CMDS: usize = 16;

    /// Depth of each link's data inbox.
    pub const MAX_QUEUED_DATDESC: usize = 64;

    /// Connects allowed to queue against a service awaiting accept.
    pub const MAX_PENDING_CONNECTS: usize = 16;

    /// Largest accepted data payload, in bytes.
    pub const MAX_DAT_SIZE: usize = 16 * 1024 * 1024;

    /// Accept-daemon poll slice; bounds how fast a stop is observed.
    pub const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(100);

    /// Back-off after a hard accept failure.
    pub const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(10);
}
