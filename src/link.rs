//! # Link Objects and Link State
//!
//! A link is one end of a peer pair in connected mode, or the reserved
//! auto-link that denotes the connectionless event subsystem. Link ids are a
//! sum type so classification is a `match`, never a table lookup:
//! auto-link ids occupy `[0, AUTO_MAX]` and connected-mode ids start right
//! above that range.
//!
//! ## Role Sub-States
//!
//! Each connected link tracks a role sub-state (command initiator/executor,
//! data sender/receiver) behind the per-link state mutex — the only legal
//! serializer for sub-state reads and writes. Sub-states are point events
//! driven by API entry and exit: an operation moves the link from its
//! `...Ready` sub-state into the matching `...Busy...` sub-state for the
//! duration of the critical section, so no observer ever sees a transition
//! skip the busy value. Events on connected links have no dedicated
//! sub-state because posting is an instantaneous insertion.

use crate::conles::{EvtCallback, SubEvtArgs, UnsubEvtArgs};
use crate::error::{IocError, Result};
use crate::message::{EvtDesc, EvtId};
use crate::protocol::ProtocolBackend;
use crate::service::{ServiceId, Usage, UsageArgs};
use crate::uri::IocUri;
use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// A link identifier.
///
/// `Auto` ids denote the connectionless event subsystem (only
/// [`LinkId::AUTO`] is valid today; the rest of the range is reserved).
/// `Conet` ids denote connected-mode links and are biased above
/// [`LinkId::AUTO_MAX`] so the two ranges never collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkId {
    /// Reserved connectionless range.
    Auto(u16),
    /// Connected-mode link id.
    Conet(u64),
}

impl LinkId {
    /// The reserved auto-link: connectionless, process-global event dispatch.
    pub const AUTO: LinkId = LinkId::Auto(0);

    /// Upper bound of the reserved auto-link range.
    pub const AUTO_MAX: u16 = 1024;

    /// Whether this id addresses the connectionless subsystem.
    pub fn is_auto(self) -> bool {
        matches!(self, LinkId::Auto(_))
    }

    /// Registry slot index for a connected-mode id; `None` for auto ids or
    /// ids below the connected range.
    pub(crate) fn conet_slot(self) -> Option<usize> {
        match self {
            LinkId::Auto(_) => None,
            LinkId::Conet(raw) => raw.checked_sub(Self::AUTO_MAX as u64 + 1).map(|s| s as usize),
        }
    }

    /// Connected-mode id for a registry slot index.
    pub(crate) fn from_slot(slot: usize) -> LinkId {
        LinkId::Conet(Self::AUTO_MAX as u64 + 1 + slot as u64)
    }
}

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkId::Auto(0) => write!(f, "link:auto"),
            LinkId::Auto(n) => write!(f, "link:auto:{n}"),
            LinkId::Conet(n) => write!(f, "link:{n}"),
        }
    }
}

/// Main processing state of a link.
///
/// The auto-link reports the busy values while the connectionless subsystem
/// runs callbacks or mutates the subscriber table in the caller's thread;
/// connected links report `Ready`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LinkState {
    /// Idle; operations may start.
    #[default]
    Ready,
    /// A consumer callback is running.
    BusyCbProcEvt,
    /// A subscribe is mutating the consumer table.
    BusySubEvt,
    /// An unsubscribe is mutating the consumer table.
    BusyUnsubEvt,
}

/// Role sub-state of a connected link.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LinkSubState {
    /// No role-specific operation performed yet.
    #[default]
    Default,
    /// Command initiator idle.
    CmdInitiatorReady,
    /// Command initiator blocked in `exec_cmd`.
    CmdInitiatorBusyExecCmd,
    /// Command executor idle.
    CmdExecutorReady,
    /// Command executor running a callback.
    CmdExecutorBusyExecCmd,
    /// Command executor holding a polled command, not yet acknowledged.
    CmdExecutorBusyWaitCmd,
    /// Data sender idle.
    DatSenderReady,
    /// Data sender inside `send_dat`.
    DatSenderBusySendDat,
    /// Data receiver idle.
    DatReceiverReady,
    /// Data receiver blocked in `recv_dat`.
    DatReceiverBusyRecvDat,
    /// Data receiver running a push-delivery callback.
    DatReceiverBusyCbRecvDat,
}

impl LinkSubState {
    /// The idle sub-state a link of the given usage starts in.
    pub fn initial_for(usage: Usage) -> LinkSubState {
        match usage {
            Usage::CmdInitiator => LinkSubState::CmdInitiatorReady,
            Usage::CmdExecutor => LinkSubState::CmdExecutorReady,
            Usage::DatSender => LinkSubState::DatSenderReady,
            Usage::DatReceiver => LinkSubState::DatReceiverReady,
            Usage::EvtProducer | Usage::EvtConsumer => LinkSubState::Default,
        }
    }
}

/// Connection state of a connected-mode link.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnState {
    /// No transport attached.
    #[default]
    Disconnected,
    /// Connect in flight.
    Connecting,
    /// Peer attached and usable.
    Connected,
    /// Close in flight.
    Disconnecting,
    /// The transport failed; next operation reports `LinkBroken`.
    Broken,
}

/// Arguments of an outgoing connection.
#[derive(Clone, Debug)]
pub struct ConnArgs {
    /// Target service address.
    pub uri: IocUri,
    /// The single role this link will exercise.
    pub usage: Usage,
    /// Role argument records (consumer subscription, executor callbacks, ...).
    pub usage_args: UsageArgs,
}

impl ConnArgs {
    /// Connection arguments for `usage` against the service at `uri`.
    pub fn new(uri: IocUri, usage: Usage) -> Self {
        Self {
            uri,
            usage,
            usage_args: UsageArgs::default(),
        }
    }
}

/// Data-path state of a link, guarded by the per-link state mutex.
#[derive(Debug)]
pub(crate) struct DatState {
    pub(crate) sub_state: LinkSubState,
    pub(crate) sending: bool,
    pub(crate) receiving: bool,
    pub(crate) last_op: Instant,
}

/// One installed event subscription on a connected link.
struct LinkSub {
    callback: EvtCallback,
    evt_ids: HashSet<EvtId>,
}

/// Runtime record of one end of a connected-mode peer pair.
///
/// Owned by the registry. The protocol-private slot is set once by the
/// backend that established the link and holds whatever state that backend
/// needs (for the in-process backend: the peer reference and the receive
/// queues).
pub struct LinkObj {
    pub(crate) id: LinkId,
    pub(crate) args: ConnArgs,
    /// Service that accepted this link, if it is a server-side end.
    pub(crate) owner: Option<ServiceId>,
    pub(crate) methods: RwLock<Option<Arc<dyn ProtocolBackend>>>,
    pub(crate) conn_state: Mutex<ConnState>,
    pub(crate) dat: Mutex<DatState>,
    evt_subs: Mutex<Vec<LinkSub>>,
    proto_priv: RwLock<Option<Arc<dyn Any + Send + Sync>>>,
}

impl LinkObj {
    pub(crate) fn new(id: LinkId, args: ConnArgs, owner: Option<ServiceId>) -> Self {
        let sub_state = LinkSubState::initial_for(args.usage);
        Self {
            id,
            args,
            owner,
            methods: RwLock::new(None),
            conn_state: Mutex::new(ConnState::Disconnected),
            dat: Mutex::new(DatState {
                sub_state,
                sending: false,
                receiving: false,
                last_op: Instant::now(),
            }),
            evt_subs: Mutex::new(Vec::new()),
            proto_priv: RwLock::new(None),
        }
    }

    /// This link's id.
    pub fn id(&self) -> LinkId {
        self.id
    }

    /// The connection arguments this link was established with.
    pub fn conn_args(&self) -> &ConnArgs {
        &self.args
    }

    /// The service that accepted this link, for server-side ends.
    pub fn owner_service(&self) -> Option<ServiceId> {
        self.owner
    }

    /// Current connection state.
    pub fn conn_state(&self) -> ConnState {
        *self.conn_state.lock()
    }

    /// Set the connection state. Backends drive this around connect, accept,
    /// close, and transport failure.
    pub fn set_conn_state(&self, state: ConnState) {
        *self.conn_state.lock() = state;
    }

    /// Current role sub-state.
    pub fn sub_state(&self) -> LinkSubState {
        self.dat.lock().sub_state
    }

    /// When a role operation last entered or left this link.
    pub fn last_activity(&self) -> Instant {
        self.dat.lock().last_op
    }

    /// Install the backend's private state. Set once at establishment.
    pub fn bind_protocol_state(&self, state: Arc<dyn Any + Send + Sync>) {
        *self.proto_priv.write() = Some(state);
    }

    /// The backend's private state, if bound.
    pub fn protocol_state(&self) -> Option<Arc<dyn Any + Send + Sync>> {
        self.proto_priv.read().clone()
    }

    pub(crate) fn backend(&self) -> Result<Arc<dyn ProtocolBackend>> {
        self.methods.read().clone().ok_or(IocError::NotExistLink)
    }

    /// Move into a busy sub-state, recording the operation start.
    ///
    /// Fails with [`IocError::Busy`] when a conflicting operation of the
    /// same role is already in flight on this link.
    pub(crate) fn enter_busy(&self, busy: LinkSubState) -> Result<()> {
        let mut dat = self.dat.lock();
        match busy {
            LinkSubState::CmdInitiatorBusyExecCmd if dat.sub_state == busy => {
                return Err(IocError::Busy)
            }
            LinkSubState::DatSenderBusySendDat if dat.sending => return Err(IocError::Busy),
            LinkSubState::DatReceiverBusyRecvDat if dat.receiving => return Err(IocError::Busy),
            _ => {}
        }
        dat.sub_state = busy;
        match busy {
            LinkSubState::DatSenderBusySendDat => dat.sending = true,
            LinkSubState::DatReceiverBusyRecvDat => dat.receiving = true,
            _ => {}
        }
        dat.last_op = Instant::now();
        Ok(())
    }

    /// Leave a busy sub-state, restoring the matching ready value.
    pub(crate) fn exit_busy(&self, ready: LinkSubState) {
        let mut dat = self.dat.lock();
        dat.sub_state = ready;
        dat.sending = false;
        dat.receiving = false;
        dat.last_op = Instant::now();
    }

    /// Install an event subscription on this link.
    ///
    /// The consumer identity is the callback handle; re-subscribing the same
    /// handle is a conflict regardless of the id set. The id set is copied.
    pub(crate) fn add_subscription(&self, args: &SubEvtArgs, max_consumers: usize) -> Result<()> {
        if args.evt_ids.is_empty() {
            return Err(IocError::InvalidParam);
        }
        let mut subs = self.evt_subs.lock();
        if subs
            .iter()
            .any(|s| EvtCallback::ptr_eq(&s.callback, &args.callback))
        {
            return Err(IocError::ConflictEventConsumer);
        }
        if subs.len() >= max_consumers {
            return Err(IocError::TooManyEventConsumers);
        }
        subs.push(LinkSub {
            callback: args.callback.clone(),
            evt_ids: args.evt_ids.iter().copied().collect(),
        });
        Ok(())
    }

    /// Remove the subscription identified by the callback handle.
    pub(crate) fn remove_subscription(&self, args: &UnsubEvtArgs) -> Result<()> {
        let mut subs = self.evt_subs.lock();
        let before = subs.len();
        subs.retain(|s| !EvtCallback::ptr_eq(&s.callback, &args.callback));
        if subs.len() == before {
            return Err(IocError::NoEventConsumer);
        }
        Ok(())
    }

    /// Deliver an event to this link's subscriptions, synchronously in the
    /// calling thread.
    ///
    /// The subscription lock is released before any callback runs. Returns
    /// [`IocError::NoEventConsumer`] when no installed subscription matches
    /// the descriptor's event id.
    pub fn deliver_evt(&self, desc: &EvtDesc) -> Result<()> {
        let matching: Vec<EvtCallback> = {
            let subs = self.evt_subs.lock();
            subs.iter()
                .filter(|s| s.evt_ids.contains(&desc.evt_id))
                .map(|s| s.callback.clone())
                .collect()
        };
        if matching.is_empty() {
            return Err(IocError::NoEventConsumer);
        }
        for callback in matching {
            callback(desc);
        }
        Ok(())
    }

    /// Whether any subscription on this link matches `evt_id`.
    pub fn has_subscriber_for(&self, evt_id: EvtId) -> bool {
        self.evt_subs.lock().iter().any(|s| s.evt_ids.contains(&evt_id))
    }
}

impl fmt::Debug for LinkObj {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkObj")
            .field("id", &self.id)
            .field("usage", &self.args.usage)
            .field("uri", &self.args.uri)
            .field("conn_state", &self.conn_state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Test id classification and the slot bias.
    #[test]
    fn test_link_id_classification() {
        assert!(LinkId::AUTO.is_auto());
        assert_eq!(LinkId::AUTO.conet_slot(), None);
        let first = LinkId::from_slot(0);
        assert_eq!(first, LinkId::Conet(LinkId::AUTO_MAX as u64 + 1));
        assert_eq!(first.conet_slot(), Some(0));
        assert_eq!(LinkId::from_slot(41).conet_slot(), Some(41));
    }

    fn test_link(usage: Usage) -> LinkObj {
        LinkObj::new(LinkId::from_slot(0), ConnArgs::new(IocUri::fifo("svc"), usage), None)
    }

    /// Test that busy entry/exit walks through the busy sub-state.
    #[test]
    fn test_sub_state_transitions() {
        let link = test_link(Usage::CmdInitiator);
        assert_eq!(link.sub_state(), LinkSubState::CmdInitiatorReady);
        link.enter_busy(LinkSubState::CmdInitiatorBusyExecCmd).unwrap();
        assert_eq!(link.sub_state(), LinkSubState::CmdInitiatorBusyExecCmd);
        assert_eq!(
            link.enter_busy(LinkSubState::CmdInitiatorBusyExecCmd).unwrap_err(),
            IocError::Busy
        );
        link.exit_busy(LinkSubState::CmdInitiatorReady);
        assert_eq!(link.sub_state(), LinkSubState::CmdInitiatorReady);
    }

    /// Test concurrent-send rejection through the sending flag.
    #[test]
    fn test_sender_busy_flag() {
        let link = test_link(Usage::DatSender);
        link.enter_busy(LinkSubState::DatSenderBusySendDat).unwrap();
        assert_eq!(
            link.enter_busy(LinkSubState::DatSenderBusySendDat).unwrap_err(),
            IocError::Busy
        );
        link.exit_busy(LinkSubState::DatSenderReady);
        link.enter_busy(LinkSubState::DatSenderBusySendDat).unwrap();
    }

    /// Test subscription conflict, removal, and delivery matching.
    #[test]
    fn test_link_subscriptions() {
        let link = test_link(Usage::EvtConsumer);
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = hits.clone();
        let cb: EvtCallback = Arc::new(move |_d: &EvtDesc| {
            hits2.fetch_add(1, Ordering::SeqCst);
        });

        let sub = SubEvtArgs { evt_ids: vec![0xB1], callback: cb.clone() };
        link.add_subscription(&sub, 4).unwrap();
        assert_eq!(
            link.add_subscription(&sub, 4).unwrap_err(),
            IocError::ConflictEventConsumer
        );

        assert!(link.has_subscriber_for(0xB1));
        assert!(!link.has_subscriber_for(0xB2));
        link.deliver_evt(&EvtDesc::new(0xB1, 3)).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(
            link.deliver_evt(&EvtDesc::new(0xB2, 3)).unwrap_err(),
            IocError::NoEventConsumer
        );

        link.remove_subscription(&UnsubEvtArgs { callback: cb.clone() }).unwrap();
        assert_eq!(
            link.remove_subscription(&UnsubEvtArgs { callback: cb }).unwrap_err(),
            IocError::NoEventConsumer
        );
    }
}
