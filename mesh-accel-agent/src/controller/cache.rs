//! Userspace mirrors of the control plane's view. The processor is the only
//! writer; diagnostic readers take the read lock and see either the pre- or
//! post-update state.

use std::net::IpAddr;
use std::sync::{Arc, RwLock};

use mesh_accel_api::workload::NetworkMode;

use crate::controller::model::{Service, Workload};

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct NetworkAddress {
    pub network: String,
    pub address: IpAddr,
}

#[derive(Default)]
struct WorkloadIndexes {
    by_uid: ahash::HashMap<String, Arc<Workload>>,
    /// Populated for STANDARD workloads only; host-network addresses are not
    /// unique within a network.
    by_addr: ahash::HashMap<NetworkAddress, Arc<Workload>>,
}

#[derive(Default)]
pub struct WorkloadCache {
    inner: RwLock<WorkloadIndexes>,
}

impl WorkloadCache {
    pub fn get_by_uid(&self, uid: &str) -> Option<Arc<Workload>> {
        self.inner.read().unwrap().by_uid.get(uid).cloned()
    }

    pub fn get_by_addr(&self, addr: &NetworkAddress) -> Option<Arc<Workload>> {
        self.inner.read().unwrap().by_addr.get(addr).cloned()
    }

    pub fn insert(&self, workload: Arc<Workload>) -> Option<Arc<Workload>> {
        let mut inner = self.inner.write().unwrap();
        let prev = inner
            .by_uid
            .insert(workload.uid.clone(), workload.clone());
        if let Some(prev) = &prev {
            for address in &prev.addresses {
                inner.by_addr.remove(&NetworkAddress {
                    network: prev.network.clone(),
                    address: *address,
                });
            }
        }
        if workload.network_mode == NetworkMode::Standard {
            for address in &workload.addresses {
                inner.by_addr.insert(
                    NetworkAddress {
                        network: workload.network.clone(),
                        address: *address,
                    },
                    workload.clone(),
                );
            }
        }
        prev
    }

    pub fn remove(&self, uid: &str) -> Option<Arc<Workload>> {
        let mut inner = self.inner.write().unwrap();
        let workload = inner.by_uid.remove(uid)?;
        for address in &workload.addresses {
            inner.by_addr.remove(&NetworkAddress {
                network: workload.network.clone(),
                address: *address,
            });
        }
        Some(workload)
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().by_uid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().unwrap().by_uid.is_empty()
    }
}

#[derive(Default)]
pub struct ServiceCache {
    inner: RwLock<ahash::HashMap<String, Arc<Service>>>,
}

impl ServiceCache {
    pub fn get(&self, resource_name: &str) -> Option<Arc<Service>> {
        self.inner.read().unwrap().get(resource_name).cloned()
    }

    pub fn insert(&self, service: Arc<Service>) -> Option<Arc<Service>> {
        self.inner
            .write()
            .unwrap()
            .insert(service.resource_name.clone(), service)
    }

    pub fn remove(&self, resource_name: &str) -> Option<Arc<Service>> {
        self.inner.write().unwrap().remove(resource_name)
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().len()
    }
}

#[cfg(test)]
mod test {
    use std::net::Ipv4Addr;

    use mesh_accel_api::workload::WorkloadStatus;

    use super::*;

    fn workload(uid: &str, ip: Ipv4Addr, mode: NetworkMode) -> Arc<Workload> {
        Arc::new(Workload {
            uid: uid.into(),
            name: "wl".into(),
            namespace: "default".into(),
            addresses: vec![IpAddr::V4(ip)],
            network: "testnetwork".into(),
            network_mode: mode,
            waypoint: None,
            services: Default::default(),
            canonical_name: "wl".into(),
            canonical_revision: "latest".into(),
            cluster_id: "cluster0".into(),
            status: WorkloadStatus::Healthy,
        })
    }

    #[test]
    fn host_network_workloads_are_uid_only() {
        let cache = WorkloadCache::default();
        cache.insert(workload(
            "cluster0/host",
            Ipv4Addr::new(1, 2, 3, 6),
            NetworkMode::HostNetwork,
        ));
        assert!(cache.get_by_uid("cluster0/host").is_some());
        assert!(
            cache
                .get_by_addr(&NetworkAddress {
                    network: "testnetwork".into(),
                    address: IpAddr::V4(Ipv4Addr::new(1, 2, 3, 6)),
                })
                .is_none()
        );
    }

    #[test]
    fn address_rows_follow_updates() {
        let cache = WorkloadCache::default();
        cache.insert(workload(
            "cluster0/wl",
            Ipv4Addr::new(1, 2, 3, 4),
            NetworkMode::Standard,
        ));
        cache.insert(workload(
            "cluster0/wl",
            Ipv4Addr::new(1, 2, 3, 5),
            NetworkMode::Standard,
        ));
        assert!(
            cache
                .get_by_addr(&NetworkAddress {
                    network: "testnetwork".into(),
                    address: IpAddr::V4(Ipv4Addr::new(1, 2, 3, 4)),
                })
                .is_none()
        );
        assert!(
            cache
                .get_by_addr(&NetworkAddress {
                    network: "testnetwork".into(),
                    address: IpAddr::V4(Ipv4Addr::new(1, 2, 3, 5)),
                })
                .is_some()
        );
        cache.remove("cluster0/wl");
        assert!(cache.is_empty());
        assert!(
            cache
                .get_by_addr(&NetworkAddress {
                    network: "testnetwork".into(),
                    address: IpAddr::V4(Ipv4Addr::new(1, 2, 3, 5)),
                })
                .is_none()
        );
    }
}
