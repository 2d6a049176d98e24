//! ## bmpbridge-protocol::wire
//! The protobuf schema shared by the publisher and the consumer.
//!
//! Field numbers are part of the wire contract and must never be reused.
//! Unknown fields are skipped on decode; fields holding their default value
//! are omitted on encode.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use ipnetwork::IpNetwork;

/// Kind of a wire message. Values follow the BMP message type codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum MessageKind {
    RouteMonitoring = 0,
    PeerDown = 2,
    PeerUp = 3,
    SessionInitiation = 4,
    SessionTermination = 5,
    RouteMirroring = 6,
}

impl MessageKind {
    /// Peer events never carry a prefix or path.
    pub fn is_peer_event(self) -> bool {
        matches!(self, MessageKind::PeerUp | MessageKind::PeerDown)
    }

    /// Kinds that carry a [`UnicastPayload`].
    pub fn carries_unicast(self) -> bool {
        matches!(
            self,
            MessageKind::RouteMonitoring | MessageKind::PeerUp | MessageKind::PeerDown
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum IpVersion {
    V4 = 0,
    V6 = 1,
}

/// The unit of exchange on the bus.
#[derive(Clone, PartialEq, prost::Message)]
pub struct WireMessage {
    #[prost(enumeration = "MessageKind", tag = "1")]
    pub kind: i32,
    #[prost(message, optional, tag = "2")]
    pub unicast: Option<UnicastPayload>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct UnicastPayload {
    #[prost(message, optional, tag = "1")]
    pub router_ip: Option<Ip>,
    #[prost(message, optional, tag = "2")]
    pub local_ip: Option<Ip>,
    #[prost(message, optional, tag = "3")]
    pub neighbor_ip: Option<Ip>,
    #[prost(uint32, tag = "4")]
    pub local_as: u32,
    #[prost(uint32, tag = "5")]
    pub remote_as: u32,
    /// Route events: advertisement vs withdrawal. Peer events: up vs down.
    #[prost(bool, tag = "6")]
    pub announcement: bool,
    /// Unix seconds.
    #[prost(uint32, tag = "7")]
    pub timestamp: u32,
    #[prost(message, optional, tag = "8")]
    pub prefix: Option<Prefix>,
    #[prost(message, optional, tag = "9")]
    pub path: Option<BgpPath>,
}

/// A 128-bit address split in two halves. IPv4 lives in the low 32 bits of
/// `lower`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, prost::Message)]
pub struct Ip {
    #[prost(uint64, tag = "1")]
    pub upper: u64,
    #[prost(uint64, tag = "2")]
    pub lower: u64,
    #[prost(enumeration = "IpVersion", tag = "3")]
    pub version: i32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Prefix {
    #[prost(message, optional, tag = "1")]
    pub address: Option<Ip>,
    #[prost(uint32, tag = "2")]
    pub length: u32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct BgpPath {
    #[prost(message, optional, tag = "2")]
    pub next_hop: Option<Ip>,
    #[prost(uint32, tag = "3")]
    pub local_pref: u32,
    #[prost(message, repeated, tag = "4")]
    pub as_path: Vec<AsPathSegment>,
    #[prost(message, optional, tag = "9")]
    pub source: Option<Ip>,
    /// Packed as `(high16 << 16) | low16`.
    #[prost(uint32, repeated, tag = "10")]
    pub communities: Vec<u32>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct AsPathSegment {
    #[prost(bool, tag = "1")]
    pub as_sequence: bool,
    #[prost(uint32, repeated, tag = "2")]
    pub asns: Vec<u32>,
}

impl WireMessage {
    pub fn new(kind: MessageKind, unicast: Option<UnicastPayload>) -> Self {
        Self {
            kind: kind as i32,
            unicast,
        }
    }

    /// The kind, or `None` when the code is not one this build knows.
    pub fn known_kind(&self) -> Option<MessageKind> {
        MessageKind::try_from(self.kind).ok()
    }

    pub fn is_peer_event(&self) -> bool {
        self.known_kind().is_some_and(MessageKind::is_peer_event)
    }
}

impl UnicastPayload {
    /// Flattened AS numbers across all path segments.
    pub fn as_path_asns(&self) -> Vec<u32> {
        self.path
            .iter()
            .flat_map(|p| p.as_path.iter())
            .flat_map(|seg| seg.asns.iter().copied())
            .collect()
    }
}

impl Ip {
    /// Zero in both halves means no address was set.
    pub fn is_absent(&self) -> bool {
        self.upper == 0 && self.lower == 0
    }

    pub fn to_ip_addr(&self) -> Option<IpAddr> {
        if self.is_absent() {
            return None;
        }
        if self.version() == IpVersion::V6 || self.upper != 0 {
            let bits = (u128::from(self.upper) << 64) | u128::from(self.lower);
            Some(IpAddr::V6(Ipv6Addr::from(bits)))
        } else {
            Some(IpAddr::V4(Ipv4Addr::from(self.lower as u32)))
        }
    }
}

impl From<IpAddr> for Ip {
    fn from(addr: IpAddr) -> Self {
        match addr {
            IpAddr::V4(v4) => Ip {
                upper: 0,
                lower: u64::from(u32::from(v4)),
                version: IpVersion::V4 as i32,
            },
            IpAddr::V6(v6) => {
                let bits = u128::from(v6);
                Ip {
                    upper: (bits >> 64) as u64,
                    lower: bits as u64,
                    version: IpVersion::V6 as i32,
                }
            }
        }
    }
}

impl From<Ipv4Addr> for Ip {
    fn from(addr: Ipv4Addr) -> Self {
        Ip::from(IpAddr::V4(addr))
    }
}

impl From<IpNetwork> for Prefix {
    fn from(net: IpNetwork) -> Self {
        Prefix {
            address: Some(Ip::from(net.network())),
            length: u32::from(net.prefix()),
        }
    }
}

/// Standard community split into its 16-bit halves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Community(pub u32);

impl Community {
    pub fn new(high: u16, low: u16) -> Self {
        Community((u32::from(high) << 16) | u32::from(low))
    }

    pub fn high(self) -> u16 {
        (self.0 >> 16) as u16
    }

    pub fn low(self) -> u16 {
        (self.0 & 0xFFFF) as u16
    }
}

impl std::fmt::Display for Community {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.high(), self.low())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn ipv4_uses_lower_half_only() {
        let ip = Ip::from(Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(ip.upper, 0);
        assert_eq!(ip.lower, 0x0A00_0001);
        assert_eq!(ip.to_ip_addr(), Some(IpAddr::from_str("10.0.0.1").unwrap()));
    }

    #[test]
    fn ipv6_splits_into_halves() {
        let addr = IpAddr::from_str("2001:db8::1").unwrap();
        let ip = Ip::from(addr);
        assert_eq!(ip.upper, 0x2001_0db8_0000_0000);
        assert_eq!(ip.lower, 1);
        assert_eq!(ip.version(), IpVersion::V6);
        assert_eq!(ip.to_ip_addr(), Some(addr));
    }

    #[test]
    fn zero_address_is_absent() {
        assert!(Ip::default().is_absent());
        assert_eq!(Ip::default().to_ip_addr(), None);
    }

    #[test]
    fn prefix_from_network_is_masked() {
        let net = IpNetwork::from_str("192.0.2.77/24").unwrap();
        let prefix = Prefix::from(net);
        assert_eq!(prefix.length, 24);
        assert_eq!(
            prefix.address.and_then(|a| a.to_ip_addr()),
            Some(IpAddr::from_str("192.0.2.0").unwrap())
        );
    }

    #[test]
    fn unknown_kind_is_not_known() {
        let msg = WireMessage {
            kind: 1,
            unicast: None,
        };
        assert_eq!(msg.known_kind(), None);
        assert!(!msg.is_peer_event());
        assert_eq!(
            WireMessage::new(MessageKind::PeerDown, None).known_kind(),
            Some(MessageKind::PeerDown)
        );
    }

    #[test]
    fn community_halves() {
        let c = Community::new(65001, 100);
        assert_eq!(c.0, (65001 << 16) | 100);
        assert_eq!(c.to_string(), "65001:100");
    }

    #[test]
    fn as_path_flattens_segments() {
        let payload = UnicastPayload {
            path: Some(BgpPath {
                as_path: vec![
                    AsPathSegment {
                        as_sequence: true,
                        asns: vec![65001, 65002],
                    },
                    AsPathSegment {
                        as_sequence: false,
                        asns: vec![65010],
                    },
                ],
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(payload.as_path_asns(), vec![65001, 65002, 65010]);
    }
}
