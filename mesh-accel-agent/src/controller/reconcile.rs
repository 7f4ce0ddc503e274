//! Crash-recovery reconciliation. The kernel tables outlive the process; on
//! resume the first full snapshot is replayed through the normal handlers
//! against primed mirrors, then everything the snapshot did not re-assert is
//! pruned with the minimal set of mutations.

use mesh_accel_common::tables::{
    BackendKey, BackendValue, EndpointKey, EndpointValue, FrontendKey, FrontendValue, ServiceKey,
    ServiceValue,
};
use tracing::{debug, info};

use crate::Result;
use crate::bpf::BpfMap;
use crate::controller::processor::{Phase, Processor};

/// What the previous process had programmed, and what the first snapshot
/// re-asserted.
pub(crate) struct Recovery {
    /// `(service, backend)` memberships found in the kernel on startup.
    shadow: Vec<(u32, u32)>,
    confirmed: ahash::HashSet<(u32, u32)>,
    /// IDs of every name present in the incoming snapshot.
    kept: ahash::HashSet<u32>,
}

impl Recovery {
    pub(crate) fn new(shadow: Vec<(u32, u32)>) -> Self {
        Self {
            shadow,
            confirmed: ahash::HashSet::default(),
            kept: ahash::HashSet::default(),
        }
    }

    pub(crate) fn keep(&mut self, id: u32) {
        self.kept.insert(id);
    }

    pub(crate) fn confirm(&mut self, service_id: u32, backend_uid: u32) {
        self.confirmed.insert((service_id, backend_uid));
    }

    fn is_kept(&self, id: u32) -> bool {
        self.kept.contains(&id)
    }

    fn unconfirmed(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.shadow
            .iter()
            .copied()
            .filter(|pair| !self.confirmed.contains(pair))
    }
}

impl<F, S, E, B> Processor<F, S, E, B>
where
    F: BpfMap<FrontendKey, FrontendValue>,
    S: BpfMap<ServiceKey, ServiceValue>,
    E: BpfMap<EndpointKey, EndpointValue>,
    B: BpfMap<BackendKey, BackendValue>,
{
    /// Arms recovery: mirrors are primed from the kernel (so replayed writes
    /// dedup to nothing) and the endpoint index is rebuilt from the surviving
    /// slots. Nothing is flushed.
    pub fn begin_recovery(&mut self) -> Result<()> {
        info!("restart marker set, reconciling against surviving tables");
        self.tables.prime()?;
        let entries = self.tables.snapshot_endpoint_entries()?;
        self.endpoints.restore(&mut self.tables.endpoint, &entries)?;
        let shadow = entries
            .iter()
            .map(|(key, value)| (key.service_id, value.backend_uid))
            .collect::<Vec<_>>();
        debug!(memberships = shadow.len(), "endpoint shadow captured");
        self.recovery = Some(Recovery::new(shadow));
        self.set_phase(Phase::Recovering);
        Ok(())
    }

    /// Runs after the snapshot has been applied: drops memberships the
    /// snapshot did not re-assert, then every table row and registry binding
    /// whose ID belongs to a name the control plane no longer knows.
    pub(crate) fn finish_recovery(&mut self) -> Result<()> {
        let Some(recovery) = self.recovery.take() else {
            return Ok(());
        };
        for (service_id, backend_uid) in recovery.unconfirmed().collect::<Vec<_>>() {
            if !recovery.is_kept(service_id) {
                // the whole service is stale; handled below
                continue;
            }
            if self
                .endpoints
                .remove(&mut self.tables.endpoint, service_id, backend_uid)?
                .is_some()
            {
                self.refresh_endpoint_count(service_id)?;
            }
        }
        for (key, _) in self.tables.service.cached_entries() {
            if recovery.is_kept(key.service_id) {
                continue;
            }
            debug!(service_id = key.service_id, "pruning stale service");
            self.endpoints
                .remove_service(&mut self.tables.endpoint, key.service_id)?;
            self.tables.service.delete(&key)?;
        }
        for (key, _) in self.tables.backend.cached_entries() {
            if recovery.is_kept(key.backend_uid) {
                continue;
            }
            debug!(backend_uid = key.backend_uid, "pruning stale backend");
            self.tables.backend.delete(&key)?;
        }
        for (key, value) in self.tables.frontend.cached_entries() {
            if !recovery.is_kept(value.upstream_id) {
                self.tables.frontend.delete(&key)?;
                continue;
            }
            // a surviving resource may have shed this address while we were
            // down; a row its owner no longer claims is just as stale
            let address = std::net::IpAddr::from(key.ip);
            let claimed = match self.registry.name_of(value.upstream_id) {
                Some(name) => {
                    if let Some(service) = self.services().get(name) {
                        service.vips.contains(&address)
                    } else if let Some(workload) = self.workloads().get_by_uid(name) {
                        workload.addresses.contains(&address)
                    } else {
                        false
                    }
                }
                None => false,
            };
            if !claimed {
                debug!(%address, upstream_id = value.upstream_id, "pruning stale frontend row");
                self.tables.frontend.delete(&key)?;
            }
        }
        let stale: Vec<String> = self
            .registry
            .entries()
            .filter(|(_, id)| !recovery.is_kept(*id))
            .map(|(name, _)| name.to_string())
            .collect();
        for name in stale {
            self.registry.delete(&name)?;
        }
        info!("restart reconciliation complete");
        Ok(())
    }
}
