use core::fmt;
use std::net::{IpAddr, SocketAddr};

/// Network address of a remote device as resolved by the network stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DeviceAddress {
    Ip(SocketAddr),
    /// A device behind a router, reached through `router` on remote network
    /// `network` at MAC `mac`.
    Routed {
        router: SocketAddr,
        network: u16,
        mac: u8,
    },
}

impl DeviceAddress {
    pub const BACNET_IP_DEFAULT_PORT: u16 = 47808;

    pub fn bacnet_default(addr: IpAddr) -> Self {
        Self::Ip(SocketAddr::new(addr, Self::BACNET_IP_DEFAULT_PORT))
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ip(addr) => write!(f, "{addr}"),
            Self::Routed {
                router,
                network,
                mac,
            } => write!(f, "{network}:{mac}@{router}"),
        }
    }
}
