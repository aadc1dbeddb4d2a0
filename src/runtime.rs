//! # The Runtime Facade
//!
//! [`IocRuntime`] is the context handle everything hangs off: the service
//! and link registry, the protocol backend table, and the connectionless
//! event engine. There are no ambient globals — construct a runtime, pass it
//! around, drop it to tear everything down.
//!
//! ## Call Flow
//!
//! Every public API classifies the link id first: the reserved auto-link
//! routes to the connectionless engine, anything else resolves through the
//! registry to a link object and dispatches through the protocol method
//! table the link was established with. The facade owns argument validation
//! (bogus ids, role mismatches, zero-data rejection) so backends only see
//! well-formed calls.
//!
//! ## Accept Machinery
//!
//! Manual accept, the auto-accept daemon, and the broadcast daemon all share
//! one accept path: allocate a link, inherit the service's method table,
//! usage, and per-role argument records, run the backend accept, then
//! auto-subscribe the new link if the service carries an event-consumer
//! record. Daemons are plain threads with a stop flag, polled between
//! bounded accept waits, cancelled and joined at offline.
//!
//! ## Command Fallback
//!
//! When a backend leaves `exec_cmd` unimplemented, the facade falls back to
//! a direct in-process path: scan the live link table for the opposite-role
//! link serving the same URI path, check the command id against its
//! executor's supported set, and run the executor callback synchronously.

use crate::conles::{ConlesEngine, SubEvtArgs, UnsubEvtArgs};
use crate::defaults;
use crate::error::{IocError, Result};
use crate::link::{ConnArgs, ConnState, LinkId, LinkObj, LinkState, LinkSubState};
use crate::message::{CmdDesc, CmdStatus, DatDesc, EvtDesc, CMD_RESULT_OK};
use crate::options::Options;
use crate::protocol::{FifoBackend, ProtocolBackend, ProtocolRegistry};
use crate::registry::ObjectRegistry;
use crate::service::{
    DaemonHandle, ServiceArgs, ServiceFlags, ServiceId, ServiceObj, ServiceState, Usage,
};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Static capability report: the compile-time limits of this build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CapabilityDesc {
    /// Service table size.
    pub max_services: usize,
    /// Link table size.
    pub max_links: usize,
    /// Manual-accept tracking cap per service.
    pub max_service_clients: usize,
    /// Connectionless subscriber table size.
    pub max_event_consumers: usize,
    /// Per-subscriber bounded queue depth.
    pub max_queued_events: usize,
    /// Per-link polling command inbox depth.
    pub max_pending_cmds: usize,
    /// Per-link data inbox depth.
    pub max_queued_data: usize,
    /// Largest accepted data payload, in bytes.
    pub max_data_size: usize,
    /// Upper bound of the reserved auto-link id range.
    pub auto_link_max: u16,
}

/// The in-process inter-object communication runtime.
///
/// One instance owns one complete messaging domain: its services, links,
/// subscriber table, dispatcher worker, and protocol backends. The built-in
/// FIFO backend is registered at construction; further backends may be added
/// with [`IocRuntime::register_backend`].
pub struct IocRuntime {
    registry: Arc<ObjectRegistry>,
    protocols: ProtocolRegistry,
    conles: ConlesEngine,
}

impl IocRuntime {
    /// Construct a runtime with the built-in FIFO backend registered and the
    /// event dispatcher worker running.
    pub fn new() -> Result<Self> {
        let runtime = Self {
            registry: Arc::new(ObjectRegistry::new(
                defaults::MAX_SERVICES,
                defaults::MAX_LINKS,
            )),
            protocols: ProtocolRegistry::new(),
            conles: ConlesEngine::new(
                defaults::MAX_CONLES_CONSUMERS,
                defaults::MAX_QUEUED_EVTDESC,
            )?,
        };
        runtime.protocols.register(Arc::new(FifoBackend::new()))?;
        info!("ioc runtime constructed");
        Ok(runtime)
    }

    /// Register an additional protocol backend.
    ///
    /// Registration order is selection order for `"auto"` URIs. Scheme names
    /// must be unique.
    pub fn register_backend(&self, backend: Arc<dyn ProtocolBackend>) -> Result<()> {
        self.protocols.register(backend)
    }

    /// The compile-time limits of this build.
    pub fn capability(&self) -> CapabilityDesc {
        CapabilityDesc {
            max_services: defaults::MAX_SERVICES,
            max_links: defaults::MAX_LINKS,
            max_service_clients: defaults::MAX_SERVICE_CLIENTS,
            max_event_consumers: defaults::MAX_CONLES_CONSUMERS,
            max_queued_events: defaults::MAX_QUEUED_EVTDESC,
            max_pending_cmds: defaults::MAX_PENDING_CMDS,
            max_queued_data: defaults::MAX_QUEUED_DATDESC,
            max_data_size: defaults::MAX_DAT_SIZE,
            auto_link_max: LinkId::AUTO_MAX,
        }
    }

    // ------------------------------------------------------------------
    // lifecycle
    // ------------------------------------------------------------------

    /// Bring a service online and return its id.
    ///
    /// Backend selection follows the URI scheme: an explicit scheme must
    /// name a registered backend, the reserved `"auto"` scheme tries each
    /// backend in registration order until one succeeds. Online is
    /// transactional: if a post-online step (daemon spawn) fails, the
    /// already-onlined backend is offlined and the slot released before the
    /// error returns.
    pub fn online_service(&self, args: &ServiceArgs) -> Result<ServiceId> {
        let service = self.registry.alloc_service(args)?;

        let backend = match self.select_backend_online(&service) {
            Ok(backend) => backend,
            Err(err) => {
                let _ = self.registry.free_service(service.id());
                return Err(err);
            }
        };
        *service.methods.write() = Some(backend.clone());

        let flags = args.flags;
        let rollback = |daemon: Option<DaemonHandle>| {
            if let Some(handle) = daemon {
                handle.stop.store(true, Ordering::Release);
                let _ = handle.thread.join();
            }
            let _ = backend.offline_service(&service);
            let _ = self.registry.free_service(service.id());
        };

        // One daemon accepts for both concerns when auto-accept and
        // broadcast are combined; a broadcast-only service gets its own
        // accept loop feeding the broadcast array.
        let accept_daemon = if flags.contains(ServiceFlags::AUTO_ACCEPT) {
            match self.spawn_accept_daemon(
                &service,
                &backend,
                true,
                flags.contains(ServiceFlags::BROADCAST_EVENT),
            ) {
                Ok(handle) => Some(handle),
                Err(err) => {
                    rollback(None);
                    return Err(err);
                }
            }
        } else {
            None
        };

        let broadcast_daemon = if flags.contains(ServiceFlags::BROADCAST_EVENT)
            && !flags.contains(ServiceFlags::AUTO_ACCEPT)
        {
            match self.spawn_accept_daemon(&service, &backend, false, true) {
                Ok(handle) => Some(handle),
                Err(err) => {
                    rollback(accept_daemon);
                    return Err(err);
                }
            }
        } else {
            None
        };

        *service.accept_daemon.lock() = accept_daemon;
        *service.broadcast_daemon.lock() = broadcast_daemon;
        *service.state.lock() = ServiceState::Online;
        info!(service = %service.id(), uri = %args.uri, protocol = backend.name(),
            "service online");
        Ok(service.id())
    }

    /// Take a service offline.
    ///
    /// Daemons are cancelled and joined first. Unless the service was
    /// brought online with `KEEP_ACCEPTED_LINK`, every tracked accepted link
    /// is closed; with the flag set, accepted links survive and belong to
    /// the caller.
    pub fn offline_service(&self, id: ServiceId) -> Result<()> {
        let service = self.registry.service(id)?;
        *service.state.lock() = ServiceState::Offlining;

        for daemon_slot in [&service.accept_daemon, &service.broadcast_daemon] {
            if let Some(handle) = daemon_slot.lock().take() {
                handle.stop.store(true, Ordering::Release);
                if handle.thread.join().is_err() {
                    warn!(service = %id, "accept daemon panicked");
                }
            }
        }

        if !service.args().flags.contains(ServiceFlags::KEEP_ACCEPTED_LINK) {
            for link_id in service.tracked_links() {
                if let Err(err) = self.close_link(link_id) {
                    warn!(service = %id, link = %link_id, %err, "closing tracked link failed");
                }
            }
        }

        let backend = service.backend()?;
        let offline_result = backend.offline_service(&service);
        *service.state.lock() = ServiceState::Offline;
        self.registry.free_service(id)?;
        info!(service = %id, "service offline");
        offline_result
    }

    /// Manually accept one pending client, returning the new link id.
    ///
    /// Refused with `NotSupportManualAccept` on services whose daemon owns
    /// accepting. The accepted link inherits the service's method table,
    /// usage, and per-role records, and is auto-subscribed when the service
    /// carries an event-consumer record — an auto-subscribe failure closes
    /// the link and surfaces the subscription error.
    pub fn accept_client(&self, id: ServiceId, options: &Options) -> Result<LinkId> {
        let service = self.registry.service(id)?;
        if service.args().flags.contains(ServiceFlags::AUTO_ACCEPT) {
            return Err(IocError::NotSupportManualAccept);
        }
        if service.manual_accepted.lock().len() >= defaults::MAX_SERVICE_CLIENTS {
            return Err(IocError::TooManyClients);
        }
        let backend = service.backend()?;
        let link = accept_into_service(&self.registry, &service, &backend, options)?;
        service.manual_accepted.lock().push(link.id());
        debug!(service = %id, link = %link.id(), "client accepted");
        Ok(link.id())
    }

    /// Connect to a service, returning the client-side link id.
    ///
    /// Backend selection mirrors [`IocRuntime::online_service`]. When the
    /// usage is event consumer and the arguments carry a subscription
    /// record, the new link is auto-subscribed; a failure there closes the
    /// link and propagates the error.
    pub fn connect_service(&self, args: &ConnArgs, options: &Options) -> Result<LinkId> {
        if args.uri.path.is_empty() {
            return Err(IocError::InvalidParam);
        }
        let link = self.registry.alloc_link(args.clone(), None)?;

        let backend = match self.select_backend_connect(&link, options) {
            Ok(backend) => backend,
            Err(err) => {
                let _ = self.registry.free_link(link.id());
                return Err(err);
            }
        };
        *link.methods.write() = Some(backend.clone());

        if args.usage == Usage::EvtConsumer {
            if let Some(evt_args) = &args.usage_args.evt {
                if let Err(err) = link.add_subscription(evt_args, defaults::MAX_LINK_CONSUMERS) {
                    let _ = backend.close_link(&link);
                    let _ = self.registry.free_link(link.id());
                    return Err(err);
                }
            }
        }

        debug!(link = %link.id(), uri = %args.uri, usage = ?args.usage, "service connected");
        Ok(link.id())
    }

    /// Close a connected-mode link and release its slot.
    pub fn close_link(&self, id: LinkId) -> Result<()> {
        if id.is_auto() {
            return Err(IocError::InvalidAutoLinkId);
        }
        let link = self.registry.link(id)?;
        let backend = link.backend()?;
        let close_result = backend.close_link(&link);

        if let Some(owner) = link.owner_service() {
            if let Ok(service) = self.registry.service(owner) {
                service.untrack_link(id);
            }
        }
        self.registry.free_link(id)?;
        debug!(link = %id, "link closed");
        close_result
    }

    // ------------------------------------------------------------------
    // events
    // ------------------------------------------------------------------

    /// Subscribe to events.
    ///
    /// On the auto-link this installs a slot in the connectionless
    /// subscriber table; on a connected link it installs a per-link
    /// subscription consulted by the peer's posts. Either way the consumer
    /// identity is the callback handle and duplicates are conflicts.
    pub fn sub_evt(&self, id: LinkId, args: &SubEvtArgs) -> Result<()> {
        match id {
            LinkId::AUTO => self.conles.subscribe(args),
            LinkId::Auto(_) => Err(IocError::InvalidAutoLinkId),
            LinkId::Conet(_) => {
                let link = self.registry.link(id)?;
                if link.conn_args().usage != Usage::EvtConsumer {
                    return Err(IocError::IncompatibleUsage);
                }
                link.add_subscription(args, defaults::MAX_LINK_CONSUMERS)
            }
        }
    }

    /// Remove a subscription installed by [`IocRuntime::sub_evt`].
    pub fn unsub_evt(&self, id: LinkId, args: &UnsubEvtArgs) -> Result<()> {
        match id {
            LinkId::AUTO => self.conles.unsubscribe(args),
            LinkId::Auto(_) => Err(IocError::InvalidAutoLinkId),
            LinkId::Conet(_) => {
                let link = self.registry.link(id)?;
                link.remove_subscription(args)
            }
        }
    }

    /// Post an event.
    ///
    /// The auto-link dispatches through the connectionless engine (sync or
    /// async per the options). A connected link stamps the descriptor and
    /// hands it to the backend, which delivers to the peer's subscriptions.
    pub fn post_evt(&self, id: LinkId, desc: &EvtDesc, options: &Options) -> Result<()> {
        match id {
            LinkId::AUTO => self.conles.post(desc, options.is_sync()),
            LinkId::Auto(_) => Err(IocError::InvalidAutoLinkId),
            LinkId::Conet(_) => {
                let link = self.registry.link(id)?;
                if link.conn_args().usage != Usage::EvtProducer {
                    return Err(IocError::IncompatibleUsage);
                }
                let stamped = self.conles.stamp(desc);
                link.backend()?.post_evt(&link, &stamped, options)
            }
        }
    }

    /// Fan an event out to every link the broadcast daemon has accepted.
    ///
    /// Requires the `BROADCAST_EVENT` flag. Returns `NoEventConsumer` when
    /// nothing has been accepted yet, or when no accepted peer had a
    /// matching subscription.
    pub fn broadcast_evt(&self, id: ServiceId, desc: &EvtDesc, options: &Options) -> Result<()> {
        let service = self.registry.service(id)?;
        if !service.args().flags.contains(ServiceFlags::BROADCAST_EVENT) {
            return Err(IocError::NotSupportBroadcastEvent);
        }
        let targets = service.broadcast_accepted.lock().clone();
        if targets.is_empty() {
            return Err(IocError::NoEventConsumer);
        }

        let stamped = self.conles.stamp(desc);
        let mut delivered = 0usize;
        let mut last_err = IocError::NoEventConsumer;
        for link_id in targets {
            let outcome = self
                .registry
                .link(link_id)
                .and_then(|link| link.backend()?.post_evt(&link, &stamped, options));
            match outcome {
                Ok(()) => delivered += 1,
                Err(err) => {
                    debug!(service = %id, link = %link_id, %err, "broadcast target skipped");
                    last_err = err;
                }
            }
        }
        if delivered == 0 {
            return Err(last_err);
        }
        debug!(service = %id, evt_id = stamped.evt_id, delivered, "event broadcast");
        Ok(())
    }

    /// Drain the connectionless queues in the caller's thread.
    ///
    /// A barrier: when this returns, every event posted before the call has
    /// had all its matching callbacks completed.
    pub fn force_proc_evt(&self) {
        self.conles.force_proc();
    }

    /// Nudge the dispatcher worker without blocking.
    pub fn wakeup_proc_evt(&self) {
        self.conles.wakeup();
    }

    // ------------------------------------------------------------------
    // commands
    // ------------------------------------------------------------------

    /// Execute a command on the peer and block for its outcome.
    ///
    /// The descriptor comes back with a terminal status: `Success` (the
    /// output payload is the executor's), `Failed` (surfaced as
    /// `CmdExecFailed`), or `Timeout` when the bounded wait expired — after
    /// which the command is no longer tracked and a late acknowledgement
    /// fails on the executor side.
    pub fn exec_cmd(&self, id: LinkId, desc: &mut CmdDesc, options: &Options) -> Result<()> {
        if id.is_auto() {
            return Err(IocError::NotSupport);
        }
        let link = self.registry.link(id)?;
        if link.conn_args().usage != Usage::CmdInitiator {
            return Err(IocError::IncompatibleUsage);
        }

        self.conles.stamp_common(&mut desc.common);
        link.enter_busy(LinkSubState::CmdInitiatorBusyExecCmd)?;
        let mut outcome = link.backend()?.exec_cmd(&link, desc, options);
        if outcome == Err(IocError::NotSupport) {
            outcome = self.fallback_exec_cmd(&link, desc);
        }
        link.exit_busy(LinkSubState::CmdInitiatorReady);
        outcome
    }

    /// Polling executor path: block until a command arrives.
    ///
    /// The returned descriptor stays tracked until [`IocRuntime::ack_cmd`]
    /// completes it; the link reports the waiting sub-state in between.
    pub fn wait_cmd(&self, id: LinkId, options: &Options) -> Result<CmdDesc> {
        if id.is_auto() {
            return Err(IocError::NotSupport);
        }
        let link = self.registry.link(id)?;
        if link.conn_args().usage != Usage::CmdExecutor {
            return Err(IocError::IncompatibleUsage);
        }
        link.backend()?.wait_cmd(&link, options)
    }

    /// Polling executor path: complete a command returned by
    /// [`IocRuntime::wait_cmd`], releasing the blocked initiator.
    pub fn ack_cmd(&self, id: LinkId, desc: &CmdDesc, options: &Options) -> Result<()> {
        if id.is_auto() {
            return Err(IocError::NotSupport);
        }
        let link = self.registry.link(id)?;
        if link.conn_args().usage != Usage::CmdExecutor {
            return Err(IocError::IncompatibleUsage);
        }
        link.backend()?.ack_cmd(&link, desc, options)
    }

    /// Direct in-process command path for backends without `exec_cmd`:
    /// find the opposite-role link on the same URI path and run its
    /// executor callback with a descriptor copy.
    fn fallback_exec_cmd(&self, link: &Arc<LinkObj>, desc: &mut CmdDesc) -> Result<()> {
        let path = &link.conn_args().uri.path;
        for candidate in self.registry.live_links() {
            if candidate.id() == link.id()
                || candidate.conn_args().uri.path != *path
                || candidate.conn_args().usage != link.conn_args().usage.complement()
            {
                continue;
            }
            let Some(exec_args) = candidate.conn_args().usage_args.cmd.clone() else {
                continue;
            };
            if !exec_args.cmd_ids.contains(&desc.cmd_id) {
                return Err(IocError::NotSupport);
            }
            let Some(callback) = exec_args.callback else {
                continue;
            };

            let mut working = desc.clone();
            candidate.enter_busy(LinkSubState::CmdExecutorBusyExecCmd)?;
            working.status = CmdStatus::Processing;
            let outcome = callback(candidate.id(), &mut working);
            candidate.exit_busy(LinkSubState::CmdExecutorReady);

            return match outcome {
                Ok(()) => {
                    if !working.status.is_terminal() {
                        working.finish(CmdStatus::Success, CMD_RESULT_OK)?;
                    }
                    *desc = working;
                    Ok(())
                }
                Err(err) => {
                    warn!(cmd_id = desc.cmd_id, %err, "fallback executor reported failure");
                    if !working.status.is_terminal() {
                        working.finish(CmdStatus::Failed, -1)?;
                    }
                    *desc = working;
                    Err(IocError::CmdExecFailed)
                }
            };
        }
        Err(IocError::NoCmdExecutor)
    }

    // ------------------------------------------------------------------
    // data
    // ------------------------------------------------------------------

    /// Send a data descriptor toward the peer.
    ///
    /// A descriptor with no payload at all is rejected with `ZeroData`
    /// before any backend is consulted.
    pub fn send_dat(&self, id: LinkId, desc: &DatDesc, options: &Options) -> Result<()> {
        if id.is_auto() {
            return Err(IocError::NotSupport);
        }
        let link = self.registry.link(id)?;
        if link.conn_args().usage != Usage::DatSender {
            return Err(IocError::IncompatibleUsage);
        }
        if desc.is_zero_data() {
            return Err(IocError::ZeroData);
        }

        let mut stamped = desc.clone();
        self.conles.stamp_common(&mut stamped.common);
        link.enter_busy(LinkSubState::DatSenderBusySendDat)?;
        let outcome = link.backend()?.send_dat(&link, &stamped, options);
        link.exit_busy(LinkSubState::DatSenderReady);
        outcome
    }

    /// Polling receive path: take the next pending data descriptor.
    pub fn recv_dat(&self, id: LinkId, options: &Options) -> Result<DatDesc> {
        if id.is_auto() {
            return Err(IocError::NotSupport);
        }
        let link = self.registry.link(id)?;
        if link.conn_args().usage != Usage::DatReceiver {
            return Err(IocError::IncompatibleUsage);
        }
        link.enter_busy(LinkSubState::DatReceiverBusyRecvDat)?;
        let outcome = link.backend()?.recv_dat(&link, options);
        link.exit_busy(LinkSubState::DatReceiverReady);
        outcome
    }

    /// Flush buffered outbound data. A no-op success on backends that
    /// deliver synchronously.
    pub fn flush_dat(&self, id: LinkId, options: &Options) -> Result<()> {
        if id.is_auto() {
            return Err(IocError::NotSupport);
        }
        let link = self.registry.link(id)?;
        if link.conn_args().usage != Usage::DatSender {
            return Err(IocError::IncompatibleUsage);
        }
        link.backend()?.flush_dat(&link, options)
    }

    // ------------------------------------------------------------------
    // introspection
    // ------------------------------------------------------------------

    /// Main state and role sub-state of a link.
    pub fn link_state(&self, id: LinkId) -> Result<(LinkState, LinkSubState)> {
        match id {
            LinkId::AUTO => Ok((self.conles.link_state(), LinkSubState::Default)),
            LinkId::Auto(_) => Err(IocError::InvalidAutoLinkId),
            LinkId::Conet(_) => {
                let link = self.registry.link(id)?;
                Ok((LinkState::Ready, link.sub_state()))
            }
        }
    }

    /// Connection state of a link. The auto-link is always up.
    pub fn link_conn_state(&self, id: LinkId) -> Result<ConnState> {
        match id {
            LinkId::AUTO => Ok(ConnState::Connected),
            LinkId::Auto(_) => Err(IocError::InvalidAutoLinkId),
            LinkId::Conet(_) => Ok(self.registry.link(id)?.conn_state()),
        }
    }

    /// Copy the ids of every link a service tracks into `buffer`, returning
    /// how many were written.
    ///
    /// When the buffer is shorter than the tracked set, what fits is copied
    /// and `BufferTooSmall` reports the truncation.
    pub fn get_service_link_ids(&self, id: ServiceId, buffer: &mut [LinkId]) -> Result<usize> {
        let service = self.registry.service(id)?;
        let ids = service.tracked_links();
        let n = ids.len().min(buffer.len());
        buffer[..n].copy_from_slice(&ids[..n]);
        if ids.len() > buffer.len() {
            return Err(IocError::BufferTooSmall);
        }
        Ok(n)
    }

    // ------------------------------------------------------------------
    // backend selection and accept daemons
    // ------------------------------------------------------------------

    /// Resolve the backend for a service online. An `"auto"` scheme tries
    /// every registered backend in order; the first that onlines wins.
    fn select_backend_online(&self, service: &Arc<ServiceObj>) -> Result<Arc<dyn ProtocolBackend>> {
        let uri = &service.args().uri;
        if uri.is_auto_protocol() {
            let mut last_err = IocError::NotSupport;
            for backend in self.protocols.all() {
                match backend.online_service(service) {
                    Ok(()) => return Ok(backend),
                    Err(err) => {
                        debug!(protocol = backend.name(), %err, "auto online candidate failed");
                        last_err = err;
                    }
                }
            }
            Err(last_err)
        } else {
            let backend = self.protocols.find(&uri.protocol).ok_or(IocError::NotSupport)?;
            backend.online_service(service)?;
            Ok(backend)
        }
    }

    /// Resolve the backend for an outgoing connect, mirroring
    /// [`IocRuntime::select_backend_online`].
    fn select_backend_connect(
        &self,
        link: &Arc<LinkObj>,
        options: &Options,
    ) -> Result<Arc<dyn ProtocolBackend>> {
        let uri = &link.conn_args().uri;
        if uri.is_auto_protocol() {
            let mut last_err = IocError::NotSupport;
            for backend in self.protocols.all() {
                match backend.connect_service(link, options) {
                    Ok(()) => return Ok(backend),
                    Err(err) => {
                        debug!(protocol = backend.name(), %err, "auto connect candidate failed");
                        last_err = err;
                    }
                }
            }
            Err(last_err)
        } else {
            let backend = self.protocols.find(&uri.protocol).ok_or(IocError::NotSupport)?;
            backend.connect_service(link, options)?;
            Ok(backend)
        }
    }

    /// Spawn a long-lived accept loop for `service`.
    ///
    /// The loop polls the backend with a bounded wait so the stop flag is
    /// observed promptly; accepted links are recorded in the requested
    /// tracking arrays and reported through the service's hook.
    fn spawn_accept_daemon(
        &self,
        service: &Arc<ServiceObj>,
        backend: &Arc<dyn ProtocolBackend>,
        record_auto: bool,
        record_broadcast: bool,
    ) -> Result<DaemonHandle> {
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = stop.clone();
        let registry = self.registry.clone();
        let service = service.clone();
        let backend = backend.clone();
        let name = if record_auto {
            format!("ioc-accept-{}", service.id().0)
        } else {
            format!("ioc-bcast-{}", service.id().0)
        };

        let poll = Options::new().timeout_us(defaults::ACCEPT_POLL_INTERVAL.as_micros() as u64);
        let thread = std::thread::Builder::new()
            .name(name)
            .spawn(move || {
                debug!(service = %service.id(), "accept daemon started");
                while !thread_stop.load(Ordering::Acquire) {
                    match accept_into_service(&registry, &service, &backend, &poll) {
                        Ok(link) => {
                            let link_id = link.id();
                            if record_auto {
                                service.auto_accepted.lock().push(link_id);
                            }
                            if record_broadcast {
                                service.broadcast_accepted.lock().push(link_id);
                            }
                            debug!(service = %service.id(), link = %link_id, "client auto-accepted");
                            if record_auto {
                                if let Some(hook) = &service.args().on_auto_accepted {
                                    hook(service.id(), link_id);
                                }
                            }
                        }
                        // Poll slice elapsed with nobody waiting.
                        Err(IocError::Timeout) => {}
                        // The service's backend entry is gone: offline won.
                        Err(IocError::NotExistService) => break,
                        Err(err) => {
                            warn!(service = %service.id(), %err, "accept failed, retrying");
                            std::thread::sleep(defaults::ACCEPT_RETRY_DELAY);
                        }
                    }
                }
                debug!(service = %service.id(), "accept daemon stopped");
            })
            .map_err(|_| IocError::OutOfMemory)?;

        Ok(DaemonHandle { stop, thread })
    }
}

impl Drop for IocRuntime {
    fn drop(&mut self) {
        for service in self.registry.live_services() {
            if let Err(err) = self.offline_service(service.id()) {
                warn!(service = %service.id(), %err, "offline during runtime drop failed");
            }
        }
        self.conles.shutdown();
    }
}

/// Shared accept path: allocate a link inheriting the service's identity,
/// run the backend accept, then auto-subscribe if the service carries an
/// event-consumer record. Every failure path releases the preallocated
/// link.
fn accept_into_service(
    registry: &Arc<ObjectRegistry>,
    service: &Arc<ServiceObj>,
    backend: &Arc<dyn ProtocolBackend>,
    options: &Options,
) -> Result<Arc<LinkObj>> {
    let usage = service
        .args()
        .capabilities
        .primary()
        .ok_or(IocError::InvalidParam)?;
    let mut conn_args = ConnArgs::new(service.args().uri.clone(), usage);
    conn_args.usage_args = service.args().usage_args.clone();

    let link = registry.alloc_link(conn_args, Some(service.id()))?;
    *link.methods.write() = Some(backend.clone());

    if let Err(err) = backend.accept_client(service, &link, options) {
        let _ = registry.free_link(link.id());
        return Err(err);
    }

    if let Some(evt_args) = &service.args().usage_args.evt {
        if let Err(err) = link.add_subscription(evt_args, defaults::MAX_LINK_CONSUMERS) {
            let _ = backend.close_link(&link);
            let _ = registry.free_link(link.id());
            return Err(err);
        }
    }

    Ok(link)
}
