//! Applies workload and service events from the delta stream to the name
//! registry, the userspace caches, and the four kernel tables, keeping the
//! cross-table references intact for any add/update/delete ordering.

use std::collections::BTreeSet;
use std::sync::Arc;

use mesh_accel_api::workload::{self as api, NetworkMode, address};
use mesh_accel_common::tables::{
    BackendKey, BackendValue, EndpointKey, EndpointValue, FrontendKey, FrontendValue, ServiceKey,
    ServiceValue,
};
use tracing::{debug, warn};

use crate::bpf::BpfMap;
use crate::bpf::tables::{WorkloadTables, backend_value, service_value};
use crate::controller::cache::{ServiceCache, WorkloadCache};
use crate::controller::endpoint::EndpointIndex;
use crate::controller::model::{Service, Workload};
use crate::controller::reconcile::Recovery;
use crate::registry::NameRegistry;
use crate::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// No snapshot applied yet.
    Fresh,
    /// Restart marker was set; diffing against surviving kernel state.
    Recovering,
    Steady,
}

pub struct Processor<F, S, E, B>
where
    F: BpfMap<FrontendKey, FrontendValue>,
    S: BpfMap<ServiceKey, ServiceValue>,
    E: BpfMap<EndpointKey, EndpointValue>,
    B: BpfMap<BackendKey, BackendValue>,
{
    pub(crate) tables: WorkloadTables<F, S, E, B>,
    pub(crate) registry: NameRegistry,
    workload_cache: Arc<WorkloadCache>,
    service_cache: Arc<ServiceCache>,
    pub(crate) endpoints: EndpointIndex,
    /// Memberships whose service has not arrived yet:
    /// service resource name to waiting workload UIDs.
    pending: ahash::HashMap<String, BTreeSet<String>>,
    phase: Phase,
    pub(crate) recovery: Option<Recovery>,
}

impl<F, S, E, B> Processor<F, S, E, B>
where
    F: BpfMap<FrontendKey, FrontendValue>,
    S: BpfMap<ServiceKey, ServiceValue>,
    E: BpfMap<EndpointKey, EndpointValue>,
    B: BpfMap<BackendKey, BackendValue>,
{
    pub fn new(tables: WorkloadTables<F, S, E, B>, registry: NameRegistry) -> Self {
        Self {
            tables,
            registry,
            workload_cache: Arc::new(WorkloadCache::default()),
            service_cache: Arc::new(ServiceCache::default()),
            endpoints: EndpointIndex::default(),
            pending: ahash::HashMap::default(),
            phase: Phase::Fresh,
            recovery: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn workloads(&self) -> Arc<WorkloadCache> {
        self.workload_cache.clone()
    }

    pub fn services(&self) -> Arc<ServiceCache> {
        self.service_cache.clone()
    }

    /// Applies one delta response: upserts in arrival order, then removals.
    /// Malformed resources and invariant violations drop the single resource;
    /// map and registry I/O surface to the caller, which relies on a
    /// control-plane resync to recover.
    pub fn handle_address_response(&mut self, response: &api::DeltaResponse) -> Result<()> {
        for resource in &response.resources {
            let Some(address) = &resource.address else {
                warn!(name = %resource.name, "resource carries no address, dropping");
                continue;
            };
            match &address.r#type {
                Some(address::Type::Workload(workload)) => {
                    match self.handle_workload(workload) {
                        Ok(()) => {}
                        Err(e @ (Error::Malformed(_) | Error::InvariantViolated(_))) => {
                            warn!(%e, uid = %workload.uid, "dropping workload resource");
                        }
                        Err(e) => return Err(e),
                    }
                }
                Some(address::Type::Service(service)) => match self.handle_service(service) {
                    Ok(()) => {}
                    Err(e @ (Error::Malformed(_) | Error::InvariantViolated(_))) => {
                        warn!(%e, hostname = %service.hostname, "dropping service resource");
                    }
                    Err(e) => return Err(e),
                },
                None => {
                    warn!(name = %resource.name, "address carries no inner type, dropping");
                }
            }
        }
        self.handle_removed_addresses(&response.removed_resources)?;

        match self.phase {
            Phase::Fresh => {
                debug!("initial snapshot applied");
                self.phase = Phase::Steady;
            }
            Phase::Recovering => {
                self.finish_recovery()?;
                self.phase = Phase::Steady;
            }
            Phase::Steady => {}
        }
        Ok(())
    }

    pub(crate) fn handle_service(&mut self, resource: &api::Service) -> Result<()> {
        let service = Arc::new(Service::try_from(resource)?);
        let name = service.resource_name.clone();
        let service_id = self.registry.hash(&name)?;
        self.keep(service_id);

        let prev = self.service_cache.get(&name);
        for vip in &service.vips {
            self.tables.frontend.update(
                FrontendKey::new((*vip).into()),
                FrontendValue {
                    upstream_id: service_id,
                },
            )?;
        }
        if let Some(prev) = &prev {
            for vip in prev.vips.iter().filter(|v| !service.vips.contains(v)) {
                self.tables.frontend.delete(&FrontendKey::new((*vip).into()))?;
            }
        }

        let value = service_value(&service, self.endpoints.count(service_id));
        self.tables
            .service
            .update(ServiceKey { service_id }, value)?;

        let first_seen = prev.is_none();
        self.service_cache.insert(service.clone());

        if first_seen && let Some(waiting) = self.pending.remove(&name) {
            debug!(service = %name, waiting = waiting.len(), "binding deferred memberships");
            for uid in waiting {
                let Some(workload) = self.workload_cache.get_by_uid(&uid) else {
                    continue;
                };
                // the workload may have dropped the membership while waiting
                if !workload.services.contains_key(&name) {
                    continue;
                }
                let backend_uid = self.registry.hash(&uid)?;
                self.bind_endpoint(service_id, backend_uid)?;
                self.tables
                    .backend
                    .update(BackendKey { backend_uid }, backend_value(&workload))?;
            }
        }
        Ok(())
    }

    pub(crate) fn handle_workload(&mut self, resource: &api::Workload) -> Result<()> {
        let workload = Arc::new(Workload::try_from(resource)?);

        if workload.network_mode == NetworkMode::HostNetwork {
            // tracked in the cache only; its addresses are not steerable
            if let Some(prev) = self.workload_cache.get_by_uid(&workload.uid)
                && prev.network_mode == NetworkMode::Standard
            {
                self.teardown_workload(&prev)?;
            }
            debug!(uid = %workload.uid, "host-network workload cached by uid only");
            self.workload_cache.insert(workload);
            return Ok(());
        }

        let backend_uid = self.registry.hash(&workload.uid)?;
        self.keep(backend_uid);
        let prev = self.workload_cache.get_by_uid(&workload.uid);

        for address in &workload.addresses {
            self.tables.frontend.update(
                FrontendKey::new((*address).into()),
                FrontendValue {
                    upstream_id: backend_uid,
                },
            )?;
        }
        if let Some(prev) = &prev
            && prev.network_mode == NetworkMode::Standard
        {
            for address in prev
                .addresses
                .iter()
                .filter(|a| !workload.addresses.contains(a))
            {
                self.tables
                    .frontend
                    .delete(&FrontendKey::new((*address).into()))?;
            }
        }

        self.tables
            .backend
            .update(BackendKey { backend_uid }, backend_value(&workload))?;

        for name in workload.services.keys() {
            if self.service_cache.get(name).is_some() {
                let service_id = self.registry.hash(name)?;
                self.bind_endpoint(service_id, backend_uid)?;
            } else {
                debug!(uid = %workload.uid, service = %name, "service unknown, deferring membership");
                self.pending
                    .entry(name.clone())
                    .or_default()
                    .insert(workload.uid.clone());
            }
        }
        if let Some(prev) = &prev {
            for name in prev
                .services
                .keys()
                .filter(|n| !workload.services.contains_key(*n))
            {
                if let Some(waiting) = self.pending.get_mut(name) {
                    waiting.remove(&workload.uid);
                }
                if self.service_cache.get(name).is_some()
                    && let Some(service_id) = self.registry.id_of(name)
                {
                    self.unbind_endpoint(service_id, backend_uid)?;
                }
            }
        }

        self.workload_cache.insert(workload);
        Ok(())
    }

    /// Resolves each removed name against both caches; unknown names are
    /// ignored so replayed removals stay idempotent.
    pub(crate) fn handle_removed_addresses(&mut self, names: &[String]) -> Result<()> {
        for name in names {
            let outcome = if let Some(service) = self.service_cache.get(name) {
                self.remove_service(&service)
            } else if let Some(workload) = self.workload_cache.get_by_uid(name) {
                self.remove_workload(&workload)
            } else {
                debug!(%name, "removed resource not known, ignoring");
                Ok(())
            };
            match outcome {
                Ok(()) => {}
                Err(e @ Error::InvariantViolated(_)) => {
                    warn!(%e, %name, "skipping removal");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn remove_service(&mut self, service: &Service) -> Result<()> {
        let name = &service.resource_name;
        let Some(service_id) = self.registry.id_of(name) else {
            self.service_cache.remove(name);
            return Err(Error::InvariantViolated(format!(
                "cached service {name} has no registered id"
            )));
        };
        // members still declare the membership; re-queue them so a later
        // re-add of the service converges without workload churn
        for backend_uid in self.endpoints.backends_of(service_id).to_vec() {
            if let Some(member) = self.registry.name_of(backend_uid) {
                self.pending
                    .entry(name.clone())
                    .or_default()
                    .insert(member.to_string());
            }
        }
        self.endpoints
            .remove_service(&mut self.tables.endpoint, service_id)?;
        self.tables.service.delete(&ServiceKey { service_id })?;
        for vip in &service.vips {
            self.tables.frontend.delete(&FrontendKey::new((*vip).into()))?;
        }
        self.service_cache.remove(name);
        self.registry.delete(name)?;
        debug!(service = %name, "service removed");
        Ok(())
    }

    fn remove_workload(&mut self, workload: &Workload) -> Result<()> {
        self.teardown_workload(workload)?;
        for waiting in self.pending.values_mut() {
            waiting.remove(&workload.uid);
        }
        self.workload_cache.remove(&workload.uid);
        debug!(uid = %workload.uid, "workload removed");
        Ok(())
    }

    /// Clears a workload's table footprint and registry binding. Safe for
    /// workloads that never had one (host-network).
    fn teardown_workload(&mut self, workload: &Workload) -> Result<()> {
        let Some(backend_uid) = self.registry.id_of(&workload.uid) else {
            return Ok(());
        };
        for service_id in self.endpoints.services_of(backend_uid) {
            if self
                .endpoints
                .remove(&mut self.tables.endpoint, service_id, backend_uid)?
                .is_some()
            {
                self.refresh_endpoint_count(service_id)?;
            }
        }
        for address in &workload.addresses {
            self.tables
                .frontend
                .delete(&FrontendKey::new((*address).into()))?;
        }
        self.tables.backend.delete(&BackendKey { backend_uid })?;
        self.registry.delete(&workload.uid)?;
        Ok(())
    }

    /// Ensures the backend holds a slot for the service. Existing memberships
    /// produce no endpoint mutation, which is what keeps pre-restart slots
    /// stable through a recovery replay.
    fn bind_endpoint(&mut self, service_id: u32, backend_uid: u32) -> Result<()> {
        if self.endpoints.contains(service_id, backend_uid) {
            self.confirm(service_id, backend_uid);
            return Ok(());
        }
        self.endpoints
            .append(&mut self.tables.endpoint, service_id, backend_uid)?;
        self.refresh_endpoint_count(service_id)?;
        self.confirm(service_id, backend_uid);
        Ok(())
    }

    fn unbind_endpoint(&mut self, service_id: u32, backend_uid: u32) -> Result<()> {
        match self
            .endpoints
            .remove(&mut self.tables.endpoint, service_id, backend_uid)?
        {
            Some(_) => self.refresh_endpoint_count(service_id),
            None => {
                warn!(
                    service_id,
                    backend_uid, "backend held no slot for service, skipping removal"
                );
                Ok(())
            }
        }
    }

    pub(crate) fn refresh_endpoint_count(&mut self, service_id: u32) -> Result<()> {
        let key = ServiceKey { service_id };
        let Some(mut value) = self.tables.service.get_from_cache(&key).copied() else {
            return Err(Error::InvariantViolated(format!(
                "service {service_id} missing while updating endpoint count"
            )));
        };
        value.endpoint_count = self.endpoints.count(service_id);
        self.tables.service.update(key, value)
    }

    fn keep(&mut self, id: u32) {
        if let Some(recovery) = &mut self.recovery {
            recovery.keep(id);
        }
    }

    fn confirm(&mut self, service_id: u32, backend_uid: u32) {
        if let Some(recovery) = &mut self.recovery {
            recovery.confirm(service_id, backend_uid);
        }
    }

    pub(crate) fn set_phase(&mut self, phase: Phase) {
        self.phase = phase;
    }
}
