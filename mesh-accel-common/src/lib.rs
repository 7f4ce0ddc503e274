#![no_std]

pub mod tables;

use core::fmt::Display;
use core::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Number of service-port/target-port pairs carried in a service or backend
/// record. Port lists beyond this are truncated by the writer.
pub const MAX_PORT_COUNT: usize = 10;

/// Raw 16-byte address as the kernel tables store it. IPv4 addresses occupy
/// the low four bytes with the rest zeroed.
#[repr(C)]
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Default)]
pub struct Ip {
    pub octets: [u8; 16],
}
#[cfg(feature = "user")]
unsafe impl aya::Pod for Ip {}

impl From<IpAddr> for Ip {
    fn from(value: IpAddr) -> Self {
        match value {
            IpAddr::V4(ipv4_addr) => {
                let mut octets = [0u8; 16];
                octets[..4].copy_from_slice(&ipv4_addr.octets());
                Ip { octets }
            }
            IpAddr::V6(ipv6_addr) => Ip {
                octets: ipv6_addr.octets(),
            },
        }
    }
}

impl From<Ip> for IpAddr {
    fn from(value: Ip) -> Self {
        if value.octets[4..].iter().all(|b| *b == 0) {
            let mut v4 = [0u8; 4];
            v4.copy_from_slice(&value.octets[..4]);
            IpAddr::V4(Ipv4Addr::from(v4))
        } else {
            IpAddr::V6(Ipv6Addr::from(value.octets))
        }
    }
}

impl Display for Ip {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", IpAddr::from(*self))
    }
}

/// A service-port/target-port pair, both in network byte order because the
/// kernel compares them against packet context directly.
#[repr(C)]
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Default)]
pub struct PortPair {
    pub service_port: u16,
    pub target_port: u16,
}
#[cfg(feature = "user")]
unsafe impl aya::Pod for PortPair {}

impl PortPair {
    /// Builds a pair from host-order ports.
    pub const fn new(service_port: u16, target_port: u16) -> Self {
        Self {
            service_port: service_port.to_be(),
            target_port: target_port.to_be(),
        }
    }
}
