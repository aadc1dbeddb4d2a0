//! # Service and Link Registry
//!
//! Two fixed-capacity allocation tables — one for services, one for
//! connected-mode links — each behind its own mutex. Ids are slot indices:
//! service ids map straight to the service table, link ids are biased above
//! the reserved auto-link range so the id itself classifies the link kind.
//! Accessors are O(1) after range validation; an out-of-range id is a lookup
//! failure, never an abort.

use crate::error::{IocError, Result};
use crate::link::{ConnArgs, LinkId, LinkObj};
use crate::service::{ServiceArgs, ServiceId, ServiceObj};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

pub(crate) struct ObjectRegistry {
    services: Mutex<Vec<Option<Arc<ServiceObj>>>>,
    links: Mutex<Vec<Option<Arc<LinkObj>>>>,
}

impl ObjectRegistry {
    pub(crate) fn new(max_services: usize, max_links: usize) -> Self {
        Self {
            services: Mutex::new((0..max_services).map(|_| None).collect()),
            links: Mutex::new((0..max_links).map(|_| None).collect()),
        }
    }

    /// Allocate a service slot for `args`.
    ///
    /// Rejects an empty capability mask or empty URI path with
    /// `InvalidParam`, a URI already online with `ConflictServiceArgs`, and
    /// a full table with `TooManyServices`. The arguments are copied into
    /// the slot; callback handles are cloned so the caller's record may die.
    pub(crate) fn alloc_service(&self, args: &ServiceArgs) -> Result<Arc<ServiceObj>> {
        if args.capabilities.is_empty() || args.uri.path.is_empty() {
            return Err(IocError::InvalidParam);
        }
        let mut services = self.services.lock();
        if services
            .iter()
            .flatten()
            .any(|s| s.args().uri == args.uri)
        {
            return Err(IocError::ConflictServiceArgs);
        }
        let slot_idx = services
            .iter()
            .position(|s| s.is_none())
            .ok_or(IocError::TooManyServices)?;
        let service = Arc::new(ServiceObj::new(ServiceId(slot_idx as u64), args.clone()));
        services[slot_idx] = Some(service.clone());
        debug!(service = %service.id(), uri = %args.uri, "service slot allocated");
        Ok(service)
    }

    /// Release a service slot.
    pub(crate) fn free_service(&self, id: ServiceId) -> Result<()> {
        let mut services = self.services.lock();
        let slot = services
            .get_mut(id.0 as usize)
            .ok_or(IocError::NotExistService)?;
        if slot.take().is_none() {
            return Err(IocError::NotExistService);
        }
        debug!(service = %id, "service slot freed");
        Ok(())
    }

    /// Look up a live service by id.
    pub(crate) fn service(&self, id: ServiceId) -> Result<Arc<ServiceObj>> {
        self.services
            .lock()
            .get(id.0 as usize)
            .and_then(Clone::clone)
            .ok_or(IocError::NotExistService)
    }

    /// Allocate a connected-mode link slot.
    pub(crate) fn alloc_link(
        &self,
        args: ConnArgs,
        owner: Option<ServiceId>,
    ) -> Result<Arc<LinkObj>> {
        let mut links = self.links.lock();
        let slot_idx = links
            .iter()
            .position(|l| l.is_none())
            .ok_or(IocError::TooManyLinks)?;
        let link = Arc::new(LinkObj::new(LinkId::from_slot(slot_idx), args, owner));
        links[slot_idx] = Some(link.clone());
        debug!(link = %link.id(), "link slot allocated");
        Ok(link)
    }

    /// Release a link slot. The per-link state dies with the object.
    pub(crate) fn free_link(&self, id: LinkId) -> Result<()> {
        let slot_idx = id.conet_slot().ok_or(IocError::InvalidAutoLinkId)?;
        let mut links = self.links.lock();
        let slot = links.get_mut(slot_idx).ok_or(IocError::NotExistLink)?;
        if slot.take().is_none() {
            return Err(IocError::NotExistLink);
        }
        debug!(link = %id, "link slot freed");
        Ok(())
    }

    /// Look up a live connected-mode link by id.
    ///
    /// Auto-link ids are rejected with `InvalidAutoLinkId`; the caller is
    /// expected to have classified the id before reaching the table.
    pub(crate) fn link(&self, id: LinkId) -> Result<Arc<LinkObj>> {
        let slot_idx = id.conet_slot().ok_or(IocError::InvalidAutoLinkId)?;
        self.links
            .lock()
            .get(slot_idx)
            .and_then(Clone::clone)
            .ok_or(IocError::NotExistLink)
    }

    /// Snapshot of every live link, in slot order.
    pub(crate) fn live_links(&self) -> Vec<Arc<LinkObj>> {
        self.links.lock().iter().flatten().cloned().collect()
    }

    /// Snapshot of every live service, in slot order.
    pub(crate) fn live_services(&self) -> Vec<Arc<ServiceObj>> {
        self.services.lock().iter().flatten().cloned().collect()
    }
}
