//! Workload discovery message set, as delivered by the control plane's delta
//! stream. The transport decodes these off the wire; the reconciliation core
//! only relies on the field accessors.

use std::collections::HashMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum NetworkMode {
    Standard = 0,
    /// Pod shares the host network namespace; its addresses are not unique
    /// and must not be programmed into the dataplane.
    HostNetwork = 1,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum WorkloadStatus {
    Healthy = 0,
    Unhealthy = 1,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct NetworkAddress {
    /// Raw address bytes, 4 (IPv4) or 16 (IPv6).
    #[prost(bytes = "vec", tag = "1")]
    pub address: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GatewayAddress {
    #[prost(message, optional, tag = "1")]
    pub address: Option<NetworkAddress>,
    #[prost(uint32, tag = "2")]
    pub hbone_mtls_port: u32,
}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct Port {
    #[prost(uint32, tag = "1")]
    pub service_port: u32,
    #[prost(uint32, tag = "2")]
    pub target_port: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PortList {
    #[prost(message, repeated, tag = "1")]
    pub ports: Vec<Port>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Workload {
    /// Globally unique identifier, stable for the lifetime of the workload.
    #[prost(string, tag = "1")]
    pub uid: String,
    #[prost(string, tag = "2")]
    pub name: String,
    #[prost(string, tag = "3")]
    pub namespace: String,
    /// Raw address bytes, 4 (IPv4) or 16 (IPv6) each.
    #[prost(bytes = "vec", repeated, tag = "4")]
    pub addresses: Vec<Vec<u8>>,
    #[prost(string, tag = "5")]
    pub network: String,
    #[prost(enumeration = "NetworkMode", tag = "6")]
    pub network_mode: i32,
    #[prost(message, optional, tag = "7")]
    pub waypoint: Option<GatewayAddress>,
    /// Membership: service resource name to the ports this workload serves
    /// for it.
    #[prost(map = "string, message", tag = "8")]
    pub services: HashMap<String, PortList>,
    #[prost(string, tag = "9")]
    pub canonical_name: String,
    #[prost(string, tag = "10")]
    pub canonical_revision: String,
    #[prost(string, tag = "11")]
    pub cluster_id: String,
    #[prost(enumeration = "WorkloadStatus", tag = "12")]
    pub status: i32,
}

impl Workload {
    pub fn resource_name(&self) -> &str {
        &self.uid
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Service {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, tag = "2")]
    pub namespace: String,
    #[prost(string, tag = "3")]
    pub hostname: String,
    #[prost(message, repeated, tag = "4")]
    pub addresses: Vec<NetworkAddress>,
    #[prost(message, repeated, tag = "5")]
    pub ports: Vec<Port>,
    #[prost(message, optional, tag = "6")]
    pub waypoint: Option<GatewayAddress>,
}

impl Service {
    pub fn resource_name(&self) -> String {
        format!("{}/{}", self.namespace, self.hostname)
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Address {
    #[prost(oneof = "address::Type", tags = "1, 2")]
    pub r#type: Option<address::Type>,
}

pub mod address {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Type {
        #[prost(message, tag = "1")]
        Workload(super::Workload),
        #[prost(message, tag = "2")]
        Service(super::Service),
    }
}

impl From<Workload> for Address {
    fn from(workload: Workload) -> Self {
        Address {
            r#type: Some(address::Type::Workload(workload)),
        }
    }
}

impl From<Service> for Address {
    fn from(service: Service) -> Self {
        Address {
            r#type: Some(address::Type::Service(service)),
        }
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Resource {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(message, optional, tag = "2")]
    pub address: Option<Address>,
}

/// One response off the delta stream: upserts plus the resource names removed
/// since the previous response.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeltaResponse {
    #[prost(message, repeated, tag = "1")]
    pub resources: Vec<Resource>,
    #[prost(string, repeated, tag = "2")]
    pub removed_resources: Vec<String>,
}

impl DeltaResponse {
    pub fn push(&mut self, address: impl Into<Address>) {
        self.resources.push(Resource {
            name: String::new(),
            address: Some(address.into()),
        });
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn service_resource_name_is_namespace_slash_hostname() {
        let svc = Service {
            namespace: "default".into(),
            hostname: "testsvc.default.svc.cluster.local".into(),
            ..Default::default()
        };
        assert_eq!(
            svc.resource_name(),
            "default/testsvc.default.svc.cluster.local"
        );
    }
}
