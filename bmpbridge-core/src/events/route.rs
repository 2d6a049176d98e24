//! Routing event types handed over by the BMP session collaborator.

use std::net::IpAddr;

use ipnetwork::IpNetwork;

/// Identifies one monitored BGP session as seen by a router.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerSession {
    /// Router exporting the BMP feed
    pub router: IpAddr,
    /// Local BGP speaker address
    pub local: IpAddr,
    /// Remote neighbor address
    pub neighbor: IpAddr,
    pub local_as: u32,
    pub remote_as: u32,
}

impl PeerSession {
    pub fn new(
        router: IpAddr,
        local: IpAddr,
        neighbor: IpAddr,
        local_as: u32,
        remote_as: u32,
    ) -> Self {
        Self {
            router,
            local,
            neighbor,
            local_as,
            remote_as,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AsSegment {
    /// `true` for AS_SEQUENCE, `false` for AS_SET
    pub sequence: bool,
    pub asns: Vec<u32>,
}

/// BGP path attributes attached to an advertisement.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PathAttributes {
    pub next_hop: Option<IpAddr>,
    pub local_pref: u32,
    pub as_path: Vec<AsSegment>,
    pub source: Option<IpAddr>,
    /// Standard communities as `(high, low)` halves
    pub communities: Vec<(u16, u16)>,
}

/// A single route advertisement or withdrawal.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RouteEvent {
    pub peer: PeerSession,
    /// `true` for an advertisement, `false` for a withdrawal
    pub announcement: bool,
    pub prefix: Option<IpNetwork>,
    pub attributes: Option<PathAttributes>,
}

impl RouteEvent {
    pub fn announce(peer: PeerSession, prefix: IpNetwork, attributes: PathAttributes) -> Self {
        Self {
            peer,
            announcement: true,
            prefix: Some(prefix),
            attributes: Some(attributes),
        }
    }

    pub fn withdraw(peer: PeerSession, prefix: IpNetwork) -> Self {
        Self {
            peer,
            announcement: false,
            prefix: Some(prefix),
            attributes: None,
        }
    }
}
