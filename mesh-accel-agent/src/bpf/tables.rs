use std::hash::Hash;
use std::path::Path;

use aya::Pod;
use aya::maps::{HashMap, Map, MapData};
use mesh_accel_common::tables::{
    BackendKey, BackendValue, EndpointKey, EndpointValue, FrontendKey, FrontendValue, ServiceKey,
    ServiceValue,
};
use mesh_accel_common::{Ip, MAX_PORT_COUNT, PortPair};
use tracing::{info, warn};

use crate::Result;
use crate::bpf::{BpfMap, TableState};
use crate::controller::model::{Service, Waypoint, Workload};

pub const FRONTEND_PIN: &str = "ma_frontend";
pub const SERVICE_PIN: &str = "ma_service";
pub const ENDPOINT_PIN: &str = "ma_endpoint";
pub const BACKEND_PIN: &str = "ma_backend";

pub type FrontendMap = HashMap<MapData, FrontendKey, FrontendValue>;
pub type ServiceMap = HashMap<MapData, ServiceKey, ServiceValue>;
pub type EndpointMap = HashMap<MapData, EndpointKey, EndpointValue>;
pub type BackendMap = HashMap<MapData, BackendKey, BackendValue>;

pub type KernelTables = WorkloadTables<FrontendMap, ServiceMap, EndpointMap, BackendMap>;

/// The four steering tables the kernel resolves against: frontend
/// (IP to upstream), service, endpoint (dense slots), backend.
pub struct WorkloadTables<F, S, E, B>
where
    F: BpfMap<FrontendKey, FrontendValue>,
    S: BpfMap<ServiceKey, ServiceValue>,
    E: BpfMap<EndpointKey, EndpointValue>,
    B: BpfMap<BackendKey, BackendValue>,
{
    pub frontend: TableState<F, FrontendKey, FrontendValue>,
    pub service: TableState<S, ServiceKey, ServiceValue>,
    pub endpoint: TableState<E, EndpointKey, EndpointValue>,
    pub backend: TableState<B, BackendKey, BackendValue>,
}

impl<F, S, E, B> WorkloadTables<F, S, E, B>
where
    F: BpfMap<FrontendKey, FrontendValue>,
    S: BpfMap<ServiceKey, ServiceValue>,
    E: BpfMap<EndpointKey, EndpointValue>,
    B: BpfMap<BackendKey, BackendValue>,
{
    pub fn new(frontend: F, service: S, endpoint: E, backend: B) -> Self {
        Self {
            frontend: TableState::new(frontend),
            service: TableState::new(service),
            endpoint: TableState::new(endpoint),
            backend: TableState::new(backend),
        }
    }

    /// Fills every mirror from the kernel. Restart-only.
    pub fn prime(&mut self) -> Result<()> {
        self.frontend.prime()?;
        self.service.prime()?;
        self.endpoint.prime()?;
        self.backend.prime()?;
        Ok(())
    }

    /// Reads the `(service, slot) -> backend` entries currently programmed.
    /// Restart-only.
    pub fn snapshot_endpoint_entries(&self) -> Result<Vec<(EndpointKey, EndpointValue)>> {
        self.endpoint.map_entries()
    }

    /// Gives the maps back, dropping every mirror.
    pub fn into_maps(self) -> (F, S, E, B) {
        (
            self.frontend.into_map(),
            self.service.into_map(),
            self.endpoint.into_map(),
            self.backend.into_map(),
        )
    }
}

pub fn load_tables(bpf_fs: &Path) -> Result<KernelTables> {
    let frontend = load_map(bpf_fs, FRONTEND_PIN)?;
    let service = load_map(bpf_fs, SERVICE_PIN)?;
    let endpoint = load_map(bpf_fs, ENDPOINT_PIN)?;
    let backend = load_map(bpf_fs, BACKEND_PIN)?;
    Ok(WorkloadTables::new(frontend, service, endpoint, backend))
}

fn load_map<K: Pod + Eq + Hash, V: Pod>(bpf_fs: &Path, name: &str) -> Result<HashMap<MapData, K, V>> {
    info!(map = name, "loading pinned table");
    let data = MapData::from_pin(bpf_fs.join(name))?;
    let map = Map::HashMap(data);
    Ok(map.try_into()?)
}

/// Encodes a service record. Byte-order conversion for the waypoint port and
/// the port table happens here; callers deal in host order only.
pub fn service_value(svc: &Service, endpoint_count: u32) -> ServiceValue {
    let (waypoint_addr, waypoint_port) = waypoint_fields(svc.waypoint.as_ref());
    ServiceValue {
        endpoint_count,
        waypoint_addr,
        waypoint_port,
        service_ports: fixed_ports(&svc.ports, &svc.resource_name),
        _pad: [0; 2],
    }
}

/// Encodes a backend record. Port pairs are laid out per service in name
/// order so that re-encoding an unchanged workload yields identical bytes.
pub fn backend_value(wl: &Workload) -> BackendValue {
    let (waypoint_addr, waypoint_port) = waypoint_fields(wl.waypoint.as_ref());
    let mut names: Vec<&String> = wl.services.keys().collect();
    names.sort();
    let mut pairs = Vec::new();
    for name in names {
        pairs.extend_from_slice(&wl.services[name]);
    }
    BackendValue {
        ip: wl.addresses[0].into(),
        waypoint_addr,
        waypoint_port,
        service_ports: fixed_ports(&pairs, &wl.uid),
    }
}

fn waypoint_fields(waypoint: Option<&Waypoint>) -> (Ip, u16) {
    match waypoint {
        Some(wp) => (wp.address.into(), wp.port.to_be()),
        None => (Ip::default(), 0),
    }
}

fn fixed_ports(pairs: &[PortPair], owner: &str) -> [PortPair; MAX_PORT_COUNT] {
    let mut ports = [PortPair::default(); MAX_PORT_COUNT];
    if pairs.len() > MAX_PORT_COUNT {
        warn!(
            owner,
            dropped = pairs.len() - MAX_PORT_COUNT,
            "port table full, truncating"
        );
    }
    for (slot, pair) in pairs.iter().take(MAX_PORT_COUNT).enumerate() {
        ports[slot] = *pair;
    }
    ports
}

#[cfg(test)]
mod test {
    use std::collections::HashMap;
    use std::net::{IpAddr, Ipv4Addr};

    use mesh_accel_api::workload::{NetworkMode, WorkloadStatus};

    use super::*;

    fn test_workload() -> Workload {
        let mut services = HashMap::new();
        services.insert("default/b".to_string(), vec![PortPair::new(81, 8180)]);
        services.insert("default/a".to_string(), vec![PortPair::new(80, 8080)]);
        Workload {
            uid: "cluster0//Pod/default/wl".into(),
            name: "wl".into(),
            namespace: "default".into(),
            addresses: vec![IpAddr::V4(Ipv4Addr::new(1, 2, 3, 4))],
            network: "testnetwork".into(),
            network_mode: NetworkMode::Standard,
            waypoint: Some(Waypoint {
                address: IpAddr::V4(Ipv4Addr::new(10, 10, 10, 10)),
                port: 15008,
            }),
            services,
            canonical_name: "wl".into(),
            canonical_revision: "latest".into(),
            cluster_id: "cluster0".into(),
            status: WorkloadStatus::Healthy,
        }
    }

    #[test]
    fn backend_record_is_deterministic() {
        let wl = test_workload();
        let value = backend_value(&wl);
        assert_eq!(value, backend_value(&wl));
        assert_eq!(value.ip, IpAddr::V4(Ipv4Addr::new(1, 2, 3, 4)).into());
        assert_eq!(value.waypoint_port, 15008u16.to_be());
        // name order: default/a before default/b
        assert_eq!(value.service_ports[0], PortPair::new(80, 8080));
        assert_eq!(value.service_ports[1], PortPair::new(81, 8180));
        assert_eq!(value.service_ports[2], PortPair::default());
    }

    #[test]
    fn port_table_truncates() {
        let pairs: Vec<PortPair> = (0..(MAX_PORT_COUNT as u16 + 4))
            .map(|p| PortPair::new(p, p))
            .collect();
        let fixed = fixed_ports(&pairs, "owner");
        assert_eq!(fixed.len(), MAX_PORT_COUNT);
        assert_eq!(fixed[MAX_PORT_COUNT - 1], pairs[MAX_PORT_COUNT - 1]);
    }
}
