//! Userspace view of the control plane's workload and service resources,
//! validated on the way in so the table writers can assume well-formed data.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use mesh_accel_api::workload::{self as api, NetworkMode, WorkloadStatus};
use mesh_accel_common::PortPair;

use crate::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Waypoint {
    pub address: IpAddr,
    pub port: u16,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Workload {
    pub uid: String,
    pub name: String,
    pub namespace: String,
    pub addresses: Vec<IpAddr>,
    pub network: String,
    pub network_mode: NetworkMode,
    pub waypoint: Option<Waypoint>,
    /// Service resource name to the port pairs this workload serves for it.
    pub services: HashMap<String, Vec<PortPair>>,
    pub canonical_name: String,
    pub canonical_revision: String,
    pub cluster_id: String,
    pub status: WorkloadStatus,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Service {
    pub resource_name: String,
    pub name: String,
    pub namespace: String,
    pub hostname: String,
    pub vips: Vec<IpAddr>,
    pub ports: Vec<PortPair>,
    pub waypoint: Option<Waypoint>,
}

impl TryFrom<&api::Workload> for Workload {
    type Error = Error;

    fn try_from(resource: &api::Workload) -> Result<Self> {
        if resource.uid.is_empty() {
            return Err(Error::Malformed("workload has no uid".into()));
        }
        let mut addresses = Vec::with_capacity(resource.addresses.len());
        for raw in &resource.addresses {
            addresses.push(byte_to_ip(raw)?);
        }
        if addresses.is_empty() {
            return Err(Error::Malformed(format!(
                "workload {} has no addresses",
                resource.uid
            )));
        }
        let waypoint = resource.waypoint.as_ref().map(Waypoint::try_from).transpose()?;
        let mut services = HashMap::with_capacity(resource.services.len());
        for (name, list) in &resource.services {
            services.insert(name.clone(), port_pairs(&list.ports)?);
        }
        Ok(Workload {
            uid: resource.uid.clone(),
            name: resource.name.clone(),
            namespace: resource.namespace.clone(),
            addresses,
            network: resource.network.clone(),
            network_mode: resource.network_mode(),
            waypoint,
            services,
            canonical_name: resource.canonical_name.clone(),
            canonical_revision: resource.canonical_revision.clone(),
            cluster_id: resource.cluster_id.clone(),
            status: resource.status(),
        })
    }
}

impl TryFrom<&api::Service> for Service {
    type Error = Error;

    fn try_from(resource: &api::Service) -> Result<Self> {
        if resource.hostname.is_empty() {
            return Err(Error::Malformed("service has no hostname".into()));
        }
        let mut vips = Vec::with_capacity(resource.addresses.len());
        for addr in &resource.addresses {
            vips.push(byte_to_ip(&addr.address)?);
        }
        if vips.is_empty() {
            return Err(Error::Malformed(format!(
                "service {} has no addresses",
                resource.hostname
            )));
        }
        let waypoint = resource.waypoint.as_ref().map(Waypoint::try_from).transpose()?;
        Ok(Service {
            resource_name: resource.resource_name(),
            name: resource.name.clone(),
            namespace: resource.namespace.clone(),
            hostname: resource.hostname.clone(),
            vips,
            ports: port_pairs(&resource.ports)?,
            waypoint,
        })
    }
}

impl TryFrom<&api::GatewayAddress> for Waypoint {
    type Error = Error;

    fn try_from(resource: &api::GatewayAddress) -> Result<Self> {
        let Some(address) = &resource.address else {
            return Err(Error::Malformed("waypoint has no address".into()));
        };
        let port = u16::try_from(resource.hbone_mtls_port)
            .map_err(|_| Error::Malformed("waypoint port exceeds u16".into()))?;
        Ok(Waypoint {
            address: byte_to_ip(&address.address)?,
            port,
        })
    }
}

fn byte_to_ip(raw: &[u8]) -> Result<IpAddr> {
    match raw.len() {
        4 => {
            let octets: [u8; 4] = raw.try_into().expect("length checked");
            Ok(IpAddr::V4(Ipv4Addr::from(octets)))
        }
        16 => {
            let octets: [u8; 16] = raw.try_into().expect("length checked");
            Ok(IpAddr::V6(Ipv6Addr::from(octets)))
        }
        n => Err(Error::Malformed(format!(
            "address must be 4 or 16 bytes, got {n}"
        ))),
    }
}

fn port_pairs(ports: &[api::Port]) -> Result<Vec<PortPair>> {
    ports
        .iter()
        .map(|p| {
            let service_port = u16::try_from(p.service_port)
                .map_err(|_| Error::Malformed(format!("service port {} exceeds u16", p.service_port)))?;
            let target_port = u16::try_from(p.target_port)
                .map_err(|_| Error::Malformed(format!("target port {} exceeds u16", p.target_port)))?;
            Ok(PortPair::new(service_port, target_port))
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn workload_without_uid_is_malformed() {
        let resource = api::Workload {
            addresses: vec![vec![1, 2, 3, 4]],
            ..Default::default()
        };
        assert!(matches!(
            Workload::try_from(&resource),
            Err(Error::Malformed(_))
        ));
    }

    #[test]
    fn bad_address_length_is_malformed() {
        let resource = api::Workload {
            uid: "cluster0/wl".into(),
            addresses: vec![vec![1, 2, 3]],
            ..Default::default()
        };
        assert!(matches!(
            Workload::try_from(&resource),
            Err(Error::Malformed(_))
        ));
    }

    #[test]
    fn workload_addresses_parse() {
        let resource = api::Workload {
            uid: "cluster0/wl".into(),
            addresses: vec![vec![1, 2, 3, 4], vec![0xfd; 16]],
            ..Default::default()
        };
        let workload = Workload::try_from(&resource).unwrap();
        assert_eq!(
            workload.addresses[0],
            IpAddr::V4(Ipv4Addr::new(1, 2, 3, 4))
        );
        assert!(matches!(workload.addresses[1], IpAddr::V6(_)));
    }
}
