//! # Service Objects and Usage Roles
//!
//! A service is an accepting endpoint: a URI, a capability mask saying which
//! message roles it can serve, per-role argument records carrying the
//! callbacks it executes, and bookkeeping for every link it has accepted.
//!
//! ## Roles and Capabilities
//!
//! Roles come in complementary pairs across a link: event producer/consumer,
//! command initiator/executor, data sender/receiver. A service advertises a
//! mask of roles ([`Capabilities`]); each link exercises exactly one
//! ([`Usage`]), and a link's usage must be legal against the owning service's
//! mask.
//!
//! ## Ownership of Callbacks
//!
//! Usage argument records are stored **by value** in service and link
//! objects. Callback handles are `Arc`s cloned into the runtime, so the
//! caller's own record may go out of scope the moment the facade call
//! returns.

use crate::conles::SubEvtArgs;
use crate::error::Result;
use crate::link::LinkId;
use crate::message::{CmdDesc, CmdId, DatDesc};
use crate::protocol::ProtocolBackend;
use crate::uri::IocUri;
use bitflags::bitflags;
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread::JoinHandle;

/// Unique identifier of an online service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceId(pub(crate) u64);

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "srv:{}", self.0)
    }
}

bitflags! {
    /// Service-level behavior flags, OR-able.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct ServiceFlags: u32 {
        /// Run a broadcast daemon and allow [`broadcast_evt`](crate::runtime::IocRuntime::broadcast_evt).
        const BROADCAST_EVENT = 1 << 0;
        /// Run an auto-accept daemon; manual accept is refused.
        const AUTO_ACCEPT = 1 << 1;
        /// Leave accepted links open when the service goes offline.
        const KEEP_ACCEPTED_LINK = 1 << 2;
    }
}

/// The role one end of a link exercises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Usage {
    /// Posts events.
    EvtProducer,
    /// Subscribes to and consumes events.
    EvtConsumer,
    /// Issues commands and waits for their results.
    CmdInitiator,
    /// Executes commands, by callback or by polling.
    CmdExecutor,
    /// Sends data payloads.
    DatSender,
    /// Receives data payloads, by callback or by polling.
    DatReceiver,
}

impl Usage {
    /// The role the peer end must exercise.
    pub fn complement(self) -> Usage {
        match self {
            Usage::EvtProducer => Usage::EvtConsumer,
            Usage::EvtConsumer => Usage::EvtProducer,
            Usage::CmdInitiator => Usage::CmdExecutor,
            Usage::CmdExecutor => Usage::CmdInitiator,
            Usage::DatSender => Usage::DatReceiver,
            Usage::DatReceiver => Usage::DatSender,
        }
    }

    fn flag(self) -> Capabilities {
        match self {
            Usage::EvtProducer => Capabilities::EVT_PRODUCER,
            Usage::EvtConsumer => Capabilities::EVT_CONSUMER,
            Usage::CmdInitiator => Capabilities::CMD_INITIATOR,
            Usage::CmdExecutor => Capabilities::CMD_EXECUTOR,
            Usage::DatSender => Capabilities::DAT_SENDER,
            Usage::DatReceiver => Capabilities::DAT_RECEIVER,
        }
    }
}

bitflags! {
    /// A mask of [`Usage`] roles a service can serve.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct Capabilities: u32 {
        /// Serves event producers.
        const EVT_PRODUCER = 1 << 0;
        /// Serves event consumers.
        const EVT_CONSUMER = 1 << 1;
        /// Serves command initiators.
        const CMD_INITIATOR = 1 << 2;
        /// Serves command executors.
        const CMD_EXECUTOR = 1 << 3;
        /// Serves data senders.
        const DAT_SENDER = 1 << 4;
        /// Serves data receivers.
        const DAT_RECEIVER = 1 << 5;
    }
}

impl Capabilities {
    /// Build a mask from a set of roles.
    pub fn of(usages: &[Usage]) -> Self {
        usages.iter().fold(Self::empty(), |acc, u| acc | u.flag())
    }

    /// Whether the mask includes `usage`.
    pub fn supports(self, usage: Usage) -> bool {
        self.contains(usage.flag())
    }

    /// The first role in the mask, in declaration order.
    ///
    /// Used as the default usage of accepted links when a service serves
    /// several roles.
    pub fn primary(self) -> Option<Usage> {
        [
            Usage::EvtProducer,
            Usage::EvtConsumer,
            Usage::CmdInitiator,
            Usage::CmdExecutor,
            Usage::DatSender,
            Usage::DatReceiver,
        ]
        .into_iter()
        .find(|u| self.supports(*u))
    }
}

impl From<Usage> for Capabilities {
    fn from(usage: Usage) -> Self {
        usage.flag()
    }
}

/// Command-executor callback: runs the command, writes `output`, returns
/// `Ok` for success. Invoked with the executor-side link id.
pub type CmdCallback = Arc<dyn Fn(LinkId, &mut CmdDesc) -> Result<()> + Send + Sync>;

/// Data-receiver callback for push-style delivery. Invoked with the
/// receiver-side link id.
pub type DatCallback = Arc<dyn Fn(LinkId, &DatDesc) -> Result<()> + Send + Sync>;

/// Command-executor argument record: the supported command-id set and, for
/// callback mode, the executor itself. With no callback the executor side
/// polls via `wait_cmd` / `ack_cmd`.
#[derive(Clone)]
pub struct CmdExecutorArgs {
    /// Command ids this executor accepts; anything else is refused with
    /// `NotSupport`.
    pub cmd_ids: Vec<CmdId>,
    /// Executor callback; `None` selects polling mode.
    pub callback: Option<CmdCallback>,
}

impl fmt::Debug for CmdExecutorArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CmdExecutorArgs")
            .field("cmd_ids", &self.cmd_ids)
            .field("callback", &self.callback.as_ref().map(|_| "..."))
            .finish()
    }
}

/// Data-receiver argument record. With no callback the receiver side polls
/// via `recv_dat`.
#[derive(Clone, Default)]
pub struct DatReceiverArgs {
    /// Receiver callback; `None` selects polling mode.
    pub callback: Option<DatCallback>,
}

impl fmt::Debug for DatReceiverArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatReceiverArgs")
            .field("callback", &self.callback.as_ref().map(|_| "..."))
            .finish()
    }
}

/// Per-role argument records carried by services and inherited by the links
/// they accept. All fields optional; a role without a record simply has no
/// callbacks bound.
#[derive(Clone, Debug, Default)]
pub struct UsageArgs {
    /// Event-consumer record: subscription auto-installed on accept/connect.
    pub evt: Option<SubEvtArgs>,
    /// Command-executor record.
    pub cmd: Option<CmdExecutorArgs>,
    /// Data-receiver record.
    pub dat: Option<DatReceiverArgs>,
}

/// Hook invoked by the auto-accept daemon right after a client is accepted.
pub type AutoAcceptHook = Arc<dyn Fn(ServiceId, LinkId) + Send + Sync>;

/// Everything needed to bring a service online.
#[derive(Clone)]
pub struct ServiceArgs {
    /// Where the service listens.
    pub uri: IocUri,
    /// Behavior flags.
    pub flags: ServiceFlags,
    /// Roles the service serves.
    pub capabilities: Capabilities,
    /// Per-role callback records.
    pub usage_args: UsageArgs,
    /// Optional notification hook for auto-accepted links.
    pub on_auto_accepted: Option<AutoAcceptHook>,
}

impl fmt::Debug for ServiceArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceArgs")
            .field("uri", &self.uri)
            .field("flags", &self.flags)
            .field("capabilities", &self.capabilities)
            .field("usage_args", &self.usage_args)
            .field("on_auto_accepted", &self.on_auto_accepted.as_ref().map(|_| "..."))
            .finish()
    }
}

impl ServiceArgs {
    /// Minimal arguments: a URI and a capability mask.
    pub fn new(uri: IocUri, capabilities: Capabilities) -> Self {
        Self {
            uri,
            flags: ServiceFlags::empty(),
            capabilities,
            usage_args: UsageArgs::default(),
            on_auto_accepted: None,
        }
    }
}

/// Lifecycle state of a service slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    /// Slot free or being torn down.
    Offline,
    /// Between allocation and a successful backend online.
    Onlining,
    /// Reachable: slot live and protocol methods bound.
    Online,
    /// Tear-down in progress.
    Offlining,
}

/// Handle of a per-service daemon thread (auto-accept or broadcast accept).
pub(crate) struct DaemonHandle {
    pub(crate) stop: Arc<AtomicBool>,
    pub(crate) thread: JoinHandle<()>,
}

/// Runtime record of one online service.
///
/// Owned by the registry; reachable iff its slot is live **and** its
/// protocol-method handle is bound.
pub struct ServiceObj {
    pub(crate) id: ServiceId,
    pub(crate) args: ServiceArgs,
    pub(crate) state: Mutex<ServiceState>,
    pub(crate) methods: RwLock<Option<Arc<dyn ProtocolBackend>>>,
    /// Links recorded by manual `accept_client` calls.
    pub(crate) manual_accepted: Mutex<Vec<LinkId>>,
    /// Links recorded by the auto-accept daemon.
    pub(crate) auto_accepted: Mutex<Vec<LinkId>>,
    /// Links the broadcast path fans out to.
    pub(crate) broadcast_accepted: Mutex<Vec<LinkId>>,
    pub(crate) accept_daemon: Mutex<Option<DaemonHandle>>,
    pub(crate) broadcast_daemon: Mutex<Option<DaemonHandle>>,
}

impl ServiceObj {
    pub(crate) fn new(id: ServiceId, args: ServiceArgs) -> Self {
        Self {
            id,
            args,
            state: Mutex::new(ServiceState::Onlining),
            methods: RwLock::new(None),
            manual_accepted: Mutex::new(Vec::new()),
            auto_accepted: Mutex::new(Vec::new()),
            broadcast_accepted: Mutex::new(Vec::new()),
            accept_daemon: Mutex::new(None),
            broadcast_daemon: Mutex::new(None),
        }
    }

    /// This service's id.
    pub fn id(&self) -> ServiceId {
        self.id
    }

    /// The arguments the service was brought online with.
    pub fn args(&self) -> &ServiceArgs {
        &self.args
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ServiceState {
        *self.state.lock()
    }

    /// The bound protocol backend, if online.
    pub(crate) fn backend(&self) -> Result<Arc<dyn ProtocolBackend>> {
        self.methods
            .read()
            .clone()
            .ok_or(crate::error::IocError::NotExistService)
    }

    /// Snapshot of every link id this service tracks, deduplicated, in
    /// accept order within each tracking array.
    pub(crate) fn tracked_links(&self) -> Vec<LinkId> {
        let mut ids: Vec<LinkId> = Vec::new();
        for list in [
            &self.manual_accepted,
            &self.auto_accepted,
            &self.broadcast_accepted,
        ] {
            for id in list.lock().iter() {
                if !ids.contains(id) {
                    ids.push(*id);
                }
            }
        }
        ids
    }

    /// Remove `link` from every tracking array.
    pub(crate) fn untrack_link(&self, link: LinkId) {
        for list in [
            &self.manual_accepted,
            &self.auto_accepted,
            &self.broadcast_accepted,
        ] {
            list.lock().retain(|id| *id != link);
        }
    }
}

impl fmt::Debug for ServiceObj {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceObj")
            .field("id", &self.id)
            .field("uri", &self.args.uri)
            .field("state", &self.state())
            .finish()
    }
}
