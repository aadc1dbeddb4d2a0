//! # In-Process FIFO Backend
//!
//! The built-in connected-mode transport. Services publish their URI path in
//! a process-local table; connecting links rendezvous with an accepting
//! thread through a bounded handoff channel, and a successful accept pairs
//! the two link objects directly — each side holds a weak reference to its
//! peer.
//!
//! ## Delivery Model
//!
//! Delivery is synchronous and in-process:
//!
//! - **Events** run the peer's matching subscription callbacks in the
//!   poster's thread.
//! - **Commands** either run the peer's executor callback in the caller's
//!   thread, or, for polling executors, park the descriptor in the peer's
//!   bounded command inbox and block on a reply rendezvous until `ack_cmd`
//!   completes it (or the bounded wait expires).
//! - **Data** runs the peer's receiver callback when one is bound; otherwise
//!   descriptors are framed through the descriptor codec into a bounded
//!   per-link inbox drained by `recv_dat`. A full inbox rejects the send
//!   with `BufferFull` — flow control is the sender's problem, visibly.
//!
//! There is no outbound buffering, so `flush_dat` keeps the trait's no-op
//! default.
//!
//! ## Failure Semantics
//!
//! A vanished peer (closed or freed) surfaces as `LinkBroken` on the next
//! operation, never proactively. Dropping an initiator's reply rendezvous on
//! timeout is what makes a late acknowledgement observable: `ack_cmd` then
//! fails with `AckCmdFailed`.

use crate::defaults;
use crate::error::{IocError, Result};
use crate::link::{ConnState, LinkObj, LinkSubState};
use crate::message::{CmdDesc, CmdStatus, DatDesc, DatStatus, EvtDesc, CMD_RESULT_OK};
use crate::options::{Options, Wait};
use crate::service::ServiceObj;
use crate::uri::PROTO_FIFO;
use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;
use tracing::{debug, trace, warn};

/// A connect waiting to be accepted.
struct PendingConn {
    client: Arc<LinkObj>,
    reply: Sender<Result<()>>,
}

/// A polled command waiting for its acknowledgement.
struct PendingCmd {
    desc: CmdDesc,
    reply: Sender<CmdDesc>,
}

/// Per-service accept state: the handoff channel between connectors and
/// accepting threads.
struct FifoServiceEntry {
    service: Weak<ServiceObj>,
    pending_tx: Sender<PendingConn>,
    pending_rx: Receiver<PendingConn>,
}

/// Backend-private state bound to each established link.
struct FifoLinkState {
    peer: RwLock<Weak<LinkObj>>,
    closed: AtomicBool,
    /// Framed data descriptors awaiting `recv_dat`.
    dat_inbox: Mutex<VecDeque<Vec<u8>>>,
    dat_cv: Condvar,
    /// Commands awaiting `wait_cmd` on a polling executor.
    cmd_inbox: Mutex<VecDeque<PendingCmd>>,
    cmd_cv: Condvar,
    /// Commands returned by `wait_cmd`, keyed by sequence id, until acked.
    inflight: Mutex<HashMap<u64, Sender<CmdDesc>>>,
}

impl FifoLinkState {
    fn new(peer: &Arc<LinkObj>) -> Self {
        Self {
            peer: RwLock::new(Arc::downgrade(peer)),
            closed: AtomicBool::new(false),
            dat_inbox: Mutex::new(VecDeque::new()),
            dat_cv: Condvar::new(),
            cmd_inbox: Mutex::new(VecDeque::new()),
            cmd_cv: Condvar::new(),
            inflight: Mutex::new(HashMap::new()),
        }
    }
}

/// The in-process FIFO transport.
pub struct FifoBackend {
    services: Mutex<HashMap<String, FifoServiceEntry>>,
}

impl FifoBackend {
    /// Create the backend with an empty service table.
    pub fn new() -> Self {
        Self {
            services: Mutex::new(HashMap::new()),
        }
    }

    fn state_of(link: &Arc<LinkObj>) -> Result<Arc<FifoLinkState>> {
        link.protocol_state()
            .ok_or(IocError::LinkBroken)?
            .downcast::<FifoLinkState>()
            .map_err(|_| IocError::bug("foreign protocol state on fifo link"))
    }

    /// The live peer of `link`, or `LinkBroken`.
    fn peer_of(link: &Arc<LinkObj>) -> Result<Arc<LinkObj>> {
        let state = Self::state_of(link)?;
        if state.closed.load(Ordering::Acquire) {
            return Err(IocError::LinkBroken);
        }
        let peer = state.peer.read().upgrade();
        peer.ok_or(IocError::LinkBroken)
    }

    /// Run `desc` through the peer's executor callback, in the caller's
    /// thread, with the peer's sub-state walked through its busy value.
    fn exec_by_callback(
        peer: &Arc<LinkObj>,
        callback: &crate::service::CmdCallback,
        desc: &mut CmdDesc,
    ) -> Result<()> {
        peer.enter_busy(LinkSubState::CmdExecutorBusyExecCmd)?;
        desc.status = CmdStatus::Processing;
        let outcome = callback(peer.id(), desc);
        peer.exit_busy(LinkSubState::CmdExecutorReady);

        match outcome {
            Ok(()) => {
                if !desc.status.is_terminal() {
                    desc.finish(CmdStatus::Success, CMD_RESULT_OK)?;
                }
                Ok(())
            }
            Err(err) => {
                warn!(cmd_id = desc.cmd_id, %err, "command executor reported failure");
                if !desc.status.is_terminal() {
                    desc.finish(CmdStatus::Failed, -1)?;
                }
                Err(IocError::CmdExecFailed)
            }
        }
    }

    /// Park `desc` in the polling executor's inbox and block on the reply
    /// rendezvous.
    fn exec_by_polling(
        peer: &Arc<LinkObj>,
        desc: &mut CmdDesc,
        options: &Options,
    ) -> Result<()> {
        let peer_state = Self::state_of(peer)?;
        let (reply_tx, reply_rx) = bounded(1);

        {
            let mut inbox = peer_state.cmd_inbox.lock();
            if inbox.len() >= defaults::MAX_PENDING_CMDS {
                return Err(IocError::BufferFull);
            }
            let mut submitted = desc.clone();
            submitted.status = CmdStatus::Pending;
            inbox.push_back(PendingCmd {
                desc: submitted,
                reply: reply_tx,
            });
            peer_state.cmd_cv.notify_one();
        }

        let outcome = match options.wait() {
            Wait::NonBlock => reply_rx
                .try_recv()
                .map_err(|e| match e {
                    TryRecvError::Empty => IocError::Timeout,
                    TryRecvError::Disconnected => IocError::LinkBroken,
                }),
            Wait::Bounded(dur) => reply_rx.recv_timeout(dur).map_err(|e| match e {
                RecvTimeoutError::Timeout => IocError::Timeout,
                RecvTimeoutError::Disconnected => IocError::LinkBroken,
            }),
            Wait::Forever => reply_rx.recv().map_err(|_| IocError::LinkBroken),
        };

        match outcome {
            Ok(finished) => {
                let failed = finished.status != CmdStatus::Success;
                *desc = finished;
                if failed {
                    return Err(IocError::CmdExecFailed);
                }
                Ok(())
            }
            Err(IocError::Timeout) => {
                // Dropping reply_rx untracks the command; a late ack will
                // observe the closed rendezvous and fail.
                if !desc.status.is_terminal() {
                    let _ = desc.finish(CmdStatus::Timeout, -1);
                }
                Err(IocError::Timeout)
            }
            Err(other) => Err(other),
        }
    }
}

impl Default for FifoBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl super::ProtocolBackend for FifoBackend {
    fn name(&self) -> &'static str {
        PROTO_FIFO
    }

    fn online_service(&self, service: &Arc<ServiceObj>) -> Result<()> {
        let path = service.args().uri.path.clone();
        let mut services = self.services.lock();
        if services.contains_key(&path) {
            return Err(IocError::ConflictServiceArgs);
        }
        let (pending_tx, pending_rx) = bounded(defaults::MAX_PENDING_CONNECTS);
        services.insert(
            path.clone(),
            FifoServiceEntry {
                service: Arc::downgrade(service),
                pending_tx,
                pending_rx,
            },
        );
        debug!(service = %service.id(), path, "fifo service online");
        Ok(())
    }

    fn offline_service(&self, service: &Arc<ServiceObj>) -> Result<()> {
        let path = &service.args().uri.path;
        // Dropping the entry disconnects the handoff channel; connectors
        // blocked in the rendezvous observe LinkBroken.
        if self.services.lock().remove(path).is_none() {
            return Err(IocError::NotExistService);
        }
        debug!(service = %service.id(), path, "fifo service offline");
        Ok(())
    }

    fn accept_client(
        &self,
        service: &Arc<ServiceObj>,
        link: &Arc<LinkObj>,
        options: &Options,
    ) -> Result<()> {
        let pending_rx = {
            let services = self.services.lock();
            let entry = services
                .get(&service.args().uri.path)
                .ok_or(IocError::NotExistService)?;
            entry.pending_rx.clone()
        };

        loop {
            let pending = match options.wait() {
                Wait::NonBlock => pending_rx.try_recv().map_err(|e| match e {
                    TryRecvError::Empty => IocError::Timeout,
                    TryRecvError::Disconnected => IocError::NotExistService,
                })?,
                Wait::Bounded(dur) => pending_rx.recv_timeout(dur).map_err(|e| match e {
                    RecvTimeoutError::Timeout => IocError::Timeout,
                    RecvTimeoutError::Disconnected => IocError::NotExistService,
                })?,
                Wait::Forever => pending_rx.recv().map_err(|_| IocError::NotExistService)?,
            };

            // Pair the two ends.
            link.bind_protocol_state(Arc::new(FifoLinkState::new(&pending.client)));
            pending
                .client
                .bind_protocol_state(Arc::new(FifoLinkState::new(link)));
            link.set_conn_state(ConnState::Connected);
            pending.client.set_conn_state(ConnState::Connected);

            if pending.reply.send(Ok(())).is_err() {
                // The connector gave up while queued; unwind and take the
                // next pending connect instead.
                trace!(link = %link.id(), "connector abandoned rendezvous");
                link.set_conn_state(ConnState::Disconnected);
                continue;
            }

            debug!(service = %service.id(), link = %link.id(), peer = %pending.client.id(),
                "fifo client accepted");
            return Ok(());
        }
    }

    fn connect_service(&self, link: &Arc<LinkObj>, options: &Options) -> Result<()> {
        let (entry_tx, service) = {
            let services = self.services.lock();
            let entry = services
                .get(&link.conn_args().uri.path)
                .ok_or(IocError::NotExistService)?;
            (entry.pending_tx.clone(), entry.service.clone())
        };

        let service = service.upgrade().ok_or(IocError::NotExistService)?;
        if !service
            .args()
            .capabilities
            .supports(link.conn_args().usage.complement())
        {
            return Err(IocError::IncompatibleUsage);
        }

        link.set_conn_state(ConnState::Connecting);
        let (reply_tx, reply_rx) = bounded(1);
        entry_tx
            .try_send(PendingConn {
                client: link.clone(),
                reply: reply_tx,
            })
            .map_err(|_| {
                link.set_conn_state(ConnState::Disconnected);
                IocError::TooManyClients
            })?;

        let outcome = match options.wait() {
            Wait::NonBlock => reply_rx.try_recv().map_err(|e| match e {
                TryRecvError::Empty => IocError::Timeout,
                TryRecvError::Disconnected => IocError::LinkBroken,
            }),
            Wait::Bounded(dur) => reply_rx.recv_timeout(dur).map_err(|e| match e {
                RecvTimeoutError::Timeout => IocError::Timeout,
                RecvTimeoutError::Disconnected => IocError::LinkBroken,
            }),
            Wait::Forever => reply_rx.recv().map_err(|_| IocError::LinkBroken),
        };

        match outcome {
            Ok(Ok(())) => {
                debug!(link = %link.id(), uri = %link.conn_args().uri, "fifo connect established");
                Ok(())
            }
            Ok(Err(err)) | Err(err) => {
                link.set_conn_state(ConnState::Disconnected);
                Err(err)
            }
        }
    }

    fn close_link(&self, link: &Arc<LinkObj>) -> Result<()> {
        link.set_conn_state(ConnState::Disconnecting);
        if let Ok(state) = Self::state_of(link) {
            state.closed.store(true, Ordering::Release);
            // Dropping the reply senders, polled or still queued, makes
            // blocked initiators observe the break; waking our own condvars
            // releases any local pollers.
            state.inflight.lock().clear();
            state.cmd_inbox.lock().clear();
            state.dat_cv.notify_all();
            state.cmd_cv.notify_all();
        }
        link.set_conn_state(ConnState::Disconnected);
        debug!(link = %link.id(), "fifo link closed");
        Ok(())
    }

    fn post_evt(&self, link: &Arc<LinkObj>, desc: &EvtDesc, _options: &Options) -> Result<()> {
        let peer = Self::peer_of(link)?;
        trace!(link = %link.id(), evt_id = desc.evt_id, "fifo event delivery");
        peer.deliver_evt(desc)
    }

    fn exec_cmd(&self, link: &Arc<LinkObj>, desc: &mut CmdDesc, options: &Options) -> Result<()> {
        let peer = Self::peer_of(link)?;
        let exec_args = peer
            .conn_args()
            .usage_args
            .cmd
            .clone()
            .ok_or(IocError::NoCmdExecutor)?;
        if !exec_args.cmd_ids.contains(&desc.cmd_id) {
            return Err(IocError::NotSupport);
        }

        match exec_args.callback {
            Some(callback) => Self::exec_by_callback(&peer, &callback, desc),
            None => Self::exec_by_polling(&peer, desc, options),
        }
    }

    fn wait_cmd(&self, link: &Arc<LinkObj>, options: &Options) -> Result<CmdDesc> {
        let state = Self::state_of(link)?;
        let mut deadline: Option<Instant> = None;

        let mut inbox = state.cmd_inbox.lock();
        loop {
            if state.closed.load(Ordering::Acquire) {
                return Err(IocError::LinkBroken);
            }
            if let Some(pending) = inbox.pop_front() {
                let mut desc = pending.desc;
                desc.status = CmdStatus::Processing;
                state
                    .inflight
                    .lock()
                    .insert(desc.common.seq_id, pending.reply);
                drop(inbox);
                link.enter_busy(LinkSubState::CmdExecutorBusyWaitCmd)?;
                trace!(link = %link.id(), cmd_id = desc.cmd_id, "command polled");
                return Ok(desc);
            }

            match options.wait() {
                Wait::NonBlock => return Err(IocError::NoCmdPending),
                Wait::Forever => {
                    state.cmd_cv.wait(&mut inbox);
                }
                Wait::Bounded(dur) => {
                    let deadline = *deadline.get_or_insert_with(|| Instant::now() + dur);
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(IocError::Timeout);
                    }
                    if state
                        .cmd_cv
                        .wait_for(&mut inbox, deadline - now)
                        .timed_out()
                        && inbox.is_empty()
                    {
                        return Err(IocError::Timeout);
                    }
                }
            }
        }
    }

    fn ack_cmd(&self, link: &Arc<LinkObj>, desc: &CmdDesc, _options: &Options) -> Result<()> {
        let state = Self::state_of(link)?;
        let reply = state
            .inflight
            .lock()
            .remove(&desc.common.seq_id)
            .ok_or(IocError::AckCmdFailed)?;

        let mut finished = desc.clone();
        if !finished.status.is_terminal() {
            finished.finish(CmdStatus::Success, CMD_RESULT_OK)?;
        }

        link.exit_busy(LinkSubState::CmdExecutorReady);
        reply.send(finished).map_err(|_| {
            warn!(link = %link.id(), cmd_id = desc.cmd_id, "acknowledged after initiator gave up");
            IocError::AckCmdFailed
        })?;
        trace!(link = %link.id(), cmd_id = desc.cmd_id, "command acknowledged");
        Ok(())
    }

    fn send_dat(&self, link: &Arc<LinkObj>, desc: &DatDesc, _options: &Options) -> Result<()> {
        if desc.len() > defaults::MAX_DAT_SIZE {
            return Err(IocError::DataTooLarge);
        }
        let peer = Self::peer_of(link)?;

        if let Some(receiver) = peer
            .conn_args()
            .usage_args
            .dat
            .as_ref()
            .and_then(|args| args.callback.clone())
        {
            peer.enter_busy(LinkSubState::DatReceiverBusyCbRecvDat)?;
            let mut delivered = desc.clone();
            delivered.status = DatStatus::Received;
            let outcome = receiver(peer.id(), &delivered);
            peer.exit_busy(LinkSubState::DatReceiverReady);
            return outcome;
        }

        let peer_state = Self::state_of(&peer)?;
        let bytes = desc.to_bytes()?;
        {
            let mut inbox = peer_state.dat_inbox.lock();
            if inbox.len() >= defaults::MAX_QUEUED_DATDESC {
                return Err(IocError::BufferFull);
            }
            inbox.push_back(bytes);
            peer_state.dat_cv.notify_one();
        }
        trace!(link = %link.id(), bytes = desc.len(), "data queued for peer");
        Ok(())
    }

    fn recv_dat(&self, link: &Arc<LinkObj>, options: &Options) -> Result<DatDesc> {
        let state = Self::state_of(link)?;
        let mut deadline: Option<Instant> = None;

        let mut inbox = state.dat_inbox.lock();
        loop {
            if let Some(bytes) = inbox.pop_front() {
                let mut desc = DatDesc::from_bytes(&bytes)?;
                desc.status = DatStatus::Received;
                trace!(link = %link.id(), bytes = desc.len(), "data received");
                return Ok(desc);
            }
            if state.closed.load(Ordering::Acquire) || state.peer.read().upgrade().is_none() {
                return Err(IocError::LinkBroken);
            }

            match options.wait() {
                Wait::NonBlock => return Err(IocError::NoData),
                Wait::Forever => {
                    state.dat_cv.wait(&mut inbox);
                }
                Wait::Bounded(dur) => {
                    let deadline = *deadline.get_or_insert_with(|| Instant::now() + dur);
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(IocError::Timeout);
                    }
                    if state
                        .dat_cv
                        .wait_for(&mut inbox, deadline - now)
                        .timed_out()
                        && inbox.is_empty()
                    {
                        return Err(IocError::Timeout);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::{ConnArgs, LinkId};
    use crate::protocol::ProtocolBackend;
    use crate::service::{Capabilities, ServiceArgs, ServiceId, Usage};
    use crate::uri::IocUri;

    fn service(path: &str, caps: Capabilities) -> Arc<ServiceObj> {
        Arc::new(ServiceObj::new(
            ServiceId(0),
            ServiceArgs::new(IocUri::fifo(path), caps),
        ))
    }

    fn link(slot: usize, path: &str, usage: Usage) -> Arc<LinkObj> {
        Arc::new(LinkObj::new(
            LinkId::from_slot(slot),
            ConnArgs::new(IocUri::fifo(path), usage),
            None,
        ))
    }

    /// Pair a client and server link through the real handoff path.
    fn pair(
        backend: &FifoBackend,
        path: &str,
        client_usage: Usage,
    ) -> (Arc<LinkObj>, Arc<LinkObj>) {
        let srv = service(path, Capabilities::of(&[client_usage.complement()]));
        backend.online_service(&srv).unwrap();

        let client = link(0, path, client_usage);
        let server = link(1, path, client_usage.complement());

        let backend_ref: &FifoBackend = backend;
        std::thread::scope(|scope| {
            let client_ref = &client;
            scope.spawn(move || {
                backend_ref
                    .connect_service(client_ref, &Options::new().timeout_us(2_000_000))
                    .unwrap();
            });
            backend_ref
                .accept_client(&srv, &server, &Options::new().timeout_us(2_000_000))
                .unwrap();
        });

        backend.offline_service(&srv).unwrap();
        (client, server)
    }

    /// Test connect/accept pairing sets both ends Connected.
    #[test]
    fn test_pairing() {
        let backend = FifoBackend::new();
        let (client, server) = pair(&backend, "svc", Usage::EvtProducer);
        assert_eq!(client.conn_state(), ConnState::Connected);
        assert_eq!(server.conn_state(), ConnState::Connected);
        assert_eq!(FifoBackend::peer_of(&client).unwrap().id(), server.id());
        assert_eq!(FifoBackend::peer_of(&server).unwrap().id(), client.id());
    }

    /// Test connecting to a path nobody serves.
    #[test]
    fn test_connect_unknown_path() {
        let backend = FifoBackend::new();
        let client = link(0, "nowhere", Usage::EvtProducer);
        assert_eq!(
            backend.connect_service(&client, &Options::nonblock()).unwrap_err(),
            IocError::NotExistService
        );
    }

    /// Test usage validation against the service capability mask.
    #[test]
    fn test_connect_incompatible_usage() {
        let backend = FifoBackend::new();
        let srv = service("svc", Capabilities::of(&[Usage::EvtConsumer]));
        backend.online_service(&srv).unwrap();
        // The service consumes events; a data sender has no complement here.
        let client = link(0, "svc", Usage::DatSender);
        assert_eq!(
            backend.connect_service(&client, &Options::nonblock()).unwrap_err(),
            IocError::IncompatibleUsage
        );
    }

    /// Test the data path through the bounded inbox and the codec.
    #[test]
    fn test_dat_queue_roundtrip() {
        let backend = FifoBackend::new();
        let (client, server) = pair(&backend, "svc", Usage::DatSender);

        let payload = b"flow controlled bytes".to_vec();
        backend
            .send_dat(&client, &DatDesc::new(payload.clone()), &Options::new())
            .unwrap();
        let got = backend.recv_dat(&server, &Options::nonblock()).unwrap();
        assert_eq!(got.payload, payload);
        assert_eq!(got.status, DatStatus::Received);

        assert_eq!(
            backend.recv_dat(&server, &Options::nonblock()).unwrap_err(),
            IocError::NoData
        );
    }

    /// Test BufferFull once the peer inbox is at capacity.
    #[test]
    fn test_dat_backpressure() {
        let backend = FifoBackend::new();
        let (client, _server) = pair(&backend, "svc", Usage::DatSender);
        let desc = DatDesc::new(vec![0u8; 8]);
        for _ in 0..defaults::MAX_QUEUED_DATDESC {
            backend.send_dat(&client, &desc, &Options::new()).unwrap();
        }
        assert_eq!(
            backend.send_dat(&client, &desc, &Options::new()).unwrap_err(),
            IocError::BufferFull
        );
    }

    /// Test that a closed peer surfaces as LinkBroken on the next operation.
    #[test]
    fn test_broken_link_on_next_op() {
        let backend = FifoBackend::new();
        let (client, server) = pair(&backend, "svc", Usage::EvtProducer);
        backend.close_link(&server).unwrap();
        drop(server);
        assert_eq!(
            backend
                .post_evt(&client, &EvtDesc::new(1, 1), &Options::new())
                .unwrap_err(),
            IocError::LinkBroken
        );
    }

    /// Test acknowledging a command nobody is waiting for.
    #[test]
    fn test_ack_unknown_cmd() {
        let backend = FifoBackend::new();
        let (_client, server) = pair(&backend, "svc", Usage::CmdInitiator);
        let desc = CmdDesc::new(0xD0);
        assert_eq!(
            backend.ack_cmd(&server, &desc, &Options::new()).unwrap_err(),
            IocError::AckCmdFailed
        );
    }
}
