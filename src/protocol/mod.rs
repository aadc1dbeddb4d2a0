//! # Protocol Dispatch Layer
//!
//! Every transport plugs into the runtime through one trait,
//! [`ProtocolBackend`] — the method table of capability operations the
//! facade delegates to. The required methods cover lifecycle (online,
//! offline, accept, connect, close); the message-path methods are optional:
//! a backend that does not support a message kind simply leaves the default
//! body in place, which reports `NotSupport`. There is no null slot to
//! indirect through.
//!
//! ## Backend Registry
//!
//! Backends register in order, and the order is meaningful: a URI whose
//! scheme is the reserved `"auto"` token tries each registered backend in
//! registration order and the first success wins, for both service online
//! and outgoing connect.
//!
//! ## Built-In Backend
//!
//! The crate ships one backend, the in-process FIFO transport
//! ([`fifo::FifoBackend`]), which pairs links inside the address space and
//! delivers synchronously.

use crate::error::{IocError, Result};
use crate::link::LinkObj;
use crate::message::{CmdDesc, DatDesc, EvtDesc};
use crate::options::Options;
use crate::service::ServiceObj;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::debug;

pub mod fifo;

pub use fifo::FifoBackend;

/// The method table a protocol backend publishes.
///
/// Lifecycle methods are required. Message-path methods default to
/// `NotSupport`; a backend overrides exactly the set it implements. All
/// methods take the shared service/link objects — a backend stores its own
/// per-link state through [`LinkObj::bind_protocol_state`].
pub trait ProtocolBackend: Send + Sync {
    /// The scheme this backend serves in service URIs.
    fn name(&self) -> &'static str;

    /// Bring a service online: make its path reachable for connects.
    fn online_service(&self, service: &Arc<ServiceObj>) -> Result<()>;

    /// Take a service offline: stop admitting connects to its path.
    /// Established links survive until closed individually.
    fn offline_service(&self, service: &Arc<ServiceObj>) -> Result<()>;

    /// Accept one pending client into the preallocated `link`, populating
    /// the link's protocol-private state. Blocking behavior follows
    /// `options` (non-blocking, bounded, or unbounded wait).
    fn accept_client(
        &self,
        service: &Arc<ServiceObj>,
        link: &Arc<LinkObj>,
        options: &Options,
    ) -> Result<()>;

    /// Connect `link` to the service addressed by its connection arguments.
    fn connect_service(&self, link: &Arc<LinkObj>, options: &Options) -> Result<()>;

    /// Tear down the transport state of `link`.
    fn close_link(&self, link: &Arc<LinkObj>) -> Result<()>;

    /// Post an event toward the peer.
    fn post_evt(&self, link: &Arc<LinkObj>, desc: &EvtDesc, options: &Options) -> Result<()> {
        let _ = (link, desc, options);
        Err(IocError::NotSupport)
    }

    /// Execute a command on the peer and write the outcome back into `desc`.
    fn exec_cmd(&self, link: &Arc<LinkObj>, desc: &mut CmdDesc, options: &Options) -> Result<()> {
        let _ = (link, desc, options);
        Err(IocError::NotSupport)
    }

    /// Polling executor path: wait for an inbound command.
    fn wait_cmd(&self, link: &Arc<LinkObj>, options: &Options) -> Result<CmdDesc> {
        let _ = (link, options);
        Err(IocError::NotSupport)
    }

    /// Polling executor path: complete a previously waited command.
    fn ack_cmd(&self, link: &Arc<LinkObj>, desc: &CmdDesc, options: &Options) -> Result<()> {
        let _ = (link, desc, options);
        Err(IocError::NotSupport)
    }

    /// Send a data descriptor toward the peer.
    fn send_dat(&self, link: &Arc<LinkObj>, desc: &DatDesc, options: &Options) -> Result<()> {
        let _ = (link, desc, options);
        Err(IocError::NotSupport)
    }

    /// Polling receive path: take the next pending data descriptor.
    fn recv_dat(&self, link: &Arc<LinkObj>, options: &Options) -> Result<DatDesc> {
        let _ = (link, options);
        Err(IocError::NotSupport)
    }

    /// Flush buffered outbound data. Backends that never buffer keep the
    /// default no-op.
    fn flush_dat(&self, link: &Arc<LinkObj>, options: &Options) -> Result<()> {
        let _ = (link, options);
        Ok(())
    }
}

/// Ordered collection of registered backends.
pub(crate) struct ProtocolRegistry {
    backends: RwLock<Vec<Arc<dyn ProtocolBackend>>>,
}

impl ProtocolRegistry {
    pub(crate) fn new() -> Self {
        Self {
            backends: RwLock::new(Vec::new()),
        }
    }

    /// Register a backend. Scheme names must be unique.
    pub(crate) fn register(&self, backend: Arc<dyn ProtocolBackend>) -> Result<()> {
        let mut backends = self.backends.write();
        if backends.iter().any(|b| b.name() == backend.name()) {
            return Err(IocError::ConflictServiceArgs);
        }
        debug!(protocol = backend.name(), "protocol backend registered");
        backends.push(backend);
        Ok(())
    }

    /// The backend serving `scheme`, if registered.
    pub(crate) fn find(&self, scheme: &str) -> Option<Arc<dyn ProtocolBackend>> {
        self.backends.read().iter().find(|b| b.name() == scheme).cloned()
    }

    /// Every backend, in registration order.
    pub(crate) fn all(&self) -> Vec<Arc<dyn ProtocolBackend>> {
        self.backends.read().clone()
    }
}
