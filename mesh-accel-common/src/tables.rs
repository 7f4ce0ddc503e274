use crate::{Ip, MAX_PORT_COUNT, PortPair};

/// Frontend table: 16-byte IP to upstream ID. The upstream may be a service
/// or a single backend.
#[repr(C)]
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Default)]
pub struct FrontendKey {
    pub ip: Ip,
}
#[cfg(feature = "user")]
unsafe impl aya::Pod for FrontendKey {}

impl FrontendKey {
    pub const fn new(ip: Ip) -> Self {
        Self { ip }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Default)]
pub struct FrontendValue {
    pub upstream_id: u32,
}
#[cfg(feature = "user")]
unsafe impl aya::Pod for FrontendValue {}

#[repr(C)]
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Default)]
pub struct ServiceKey {
    pub service_id: u32,
}
#[cfg(feature = "user")]
unsafe impl aya::Pod for ServiceKey {}

/// Service table value. `endpoint_count` bounds the dense endpoint slots
/// `1..=endpoint_count` for this service; `waypoint_port` is in network byte
/// order.
#[repr(C)]
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Default)]
pub struct ServiceValue {
    pub endpoint_count: u32,
    pub waypoint_addr: Ip,
    pub waypoint_port: u16,
    pub service_ports: [PortPair; MAX_PORT_COUNT],
    pub _pad: [u8; 2],
}
#[cfg(feature = "user")]
unsafe impl aya::Pod for ServiceValue {}

/// Endpoint table key. `backend_index` is 1-based; slots for a service form
/// a dense prefix.
#[repr(C)]
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Default)]
pub struct EndpointKey {
    pub service_id: u32,
    pub backend_index: u32,
}
#[cfg(feature = "user")]
unsafe impl aya::Pod for EndpointKey {}

impl EndpointKey {
    pub const fn new(service_id: u32, backend_index: u32) -> Self {
        Self {
            service_id,
            backend_index,
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Default)]
pub struct EndpointValue {
    pub backend_uid: u32,
}
#[cfg(feature = "user")]
unsafe impl aya::Pod for EndpointValue {}

#[repr(C)]
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Default)]
pub struct BackendKey {
    pub backend_uid: u32,
}
#[cfg(feature = "user")]
unsafe impl aya::Pod for BackendKey {}

/// Backend table value. `waypoint_port` is in network byte order;
/// `service_ports` carries the port pairs of the services this workload
/// participates in.
#[repr(C)]
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Default)]
pub struct BackendValue {
    pub ip: Ip,
    pub waypoint_addr: Ip,
    pub waypoint_port: u16,
    pub service_ports: [PortPair; MAX_PORT_COUNT],
}
#[cfg(feature = "user")]
unsafe impl aya::Pod for BackendValue {}
