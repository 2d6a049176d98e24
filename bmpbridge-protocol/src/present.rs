//! Human-readable rendering of decoded wire payloads.
//!
//! Both consumer deployments (all topics, mirroring only) render through these
//! functions. Fields left at their "not set" value are omitted.

use std::fmt::Write;

use chrono::DateTime;

use crate::wire::{Community, Ip, Prefix, UnicastPayload};

const NOT_AVAILABLE: &str = "N/A";

pub fn format_ip(ip: Option<&Ip>) -> String {
    ip.and_then(Ip::to_ip_addr)
        .map(|addr| addr.to_string())
        .unwrap_or_else(|| NOT_AVAILABLE.to_string())
}

pub fn format_prefix(prefix: Option<&Prefix>) -> String {
    match prefix.and_then(|p| p.address.as_ref().map(|a| (a, p.length))) {
        Some((address, length)) => format!("{}/{}", format_ip(Some(address)), length),
        None => NOT_AVAILABLE.to_string(),
    }
}

/// `YYYY-MM-DD HH:MM:SS` in UTC.
pub fn format_timestamp(seconds: u32) -> String {
    DateTime::from_timestamp(i64::from(seconds), 0)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| seconds.to_string())
}

fn push_address(out: &mut String, label: &str, ip: Option<&Ip>) {
    if let Some(ip) = ip {
        let _ = writeln!(out, "      {:<14}{}", label, format_ip(Some(ip)));
    }
}

fn push_as(out: &mut String, label: &str, asn: u32) {
    if asn != 0 {
        let _ = writeln!(out, "      {:<14}{}", label, asn);
    }
}

/// Renders a peer up/down payload.
pub fn render_peer_event(payload: &UnicastPayload, up: bool) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "    peer event:");
    push_address(&mut out, "router:", payload.router_ip.as_ref());
    push_address(&mut out, "local:", payload.local_ip.as_ref());
    push_address(&mut out, "peer:", payload.neighbor_ip.as_ref());
    push_as(&mut out, "local AS:", payload.local_as);
    push_as(&mut out, "peer AS:", payload.remote_as);
    let _ = writeln!(out, "      {:<14}{}", "state:", if up { "up" } else { "down" });
    if payload.timestamp != 0 {
        let _ = writeln!(
            out,
            "      {:<14}{}",
            "time:",
            format_timestamp(payload.timestamp)
        );
    }
    out
}

/// Renders a route monitoring payload including its path attributes.
pub fn render_route_monitoring(payload: &UnicastPayload) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "    route:");
    push_address(&mut out, "router:", payload.router_ip.as_ref());
    push_address(&mut out, "local BGP:", payload.local_ip.as_ref());
    push_address(&mut out, "neighbor BGP:", payload.neighbor_ip.as_ref());
    push_as(&mut out, "local AS:", payload.local_as);
    push_as(&mut out, "remote AS:", payload.remote_as);
    let _ = writeln!(
        out,
        "      {:<14}{}",
        "action:",
        if payload.announcement {
            "announce"
        } else {
            "withdraw"
        }
    );
    if payload.prefix.is_some() {
        let _ = writeln!(
            out,
            "      {:<14}{}",
            "prefix:",
            format_prefix(payload.prefix.as_ref())
        );
    }
    if payload.timestamp != 0 {
        let _ = writeln!(
            out,
            "      {:<14}{}",
            "time:",
            format_timestamp(payload.timestamp)
        );
    }

    if let Some(path) = &payload.path {
        let _ = writeln!(out, "      path:");
        if let Some(next_hop) = &path.next_hop {
            let _ = writeln!(out, "        {:<12}{}", "next hop:", format_ip(Some(next_hop)));
        }
        if path.local_pref != 0 {
            let _ = writeln!(out, "        {:<12}{}", "local pref:", path.local_pref);
        }
        let asns = payload.as_path_asns();
        if !asns.is_empty() {
            let rendered: Vec<String> = asns.iter().map(u32::to_string).collect();
            let _ = writeln!(out, "        {:<12}{}", "AS path:", rendered.join(" "));
        }
        if let Some(source) = &path.source {
            let _ = writeln!(out, "        {:<12}{}", "source:", format_ip(Some(source)));
        }
        if !path.communities.is_empty() {
            let rendered: Vec<String> = path
                .communities
                .iter()
                .map(|c| Community(*c).to_string())
                .collect();
            let _ = writeln!(out, "        {:<12}{}", "communities:", rendered.join(" "));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{AsPathSegment, BgpPath};
    use std::net::{IpAddr, Ipv4Addr};
    use std::str::FromStr;

    #[test]
    fn formats_addresses() {
        assert_eq!(format_ip(Some(&Ip::from(Ipv4Addr::new(192, 0, 2, 1)))), "192.0.2.1");
        let v6 = Ip::from(IpAddr::from_str("2001:db8::7").unwrap());
        assert_eq!(format_ip(Some(&v6)), "2001:db8::7");
        assert_eq!(format_ip(Some(&Ip::default())), "N/A");
        assert_eq!(format_ip(None), "N/A");
    }

    #[test]
    fn formats_prefixes() {
        let prefix = Prefix {
            address: Some(Ip::from(Ipv4Addr::new(203, 0, 113, 0))),
            length: 24,
        };
        assert_eq!(format_prefix(Some(&prefix)), "203.0.113.0/24");
        assert_eq!(format_prefix(Some(&Prefix::default())), "N/A");
        assert_eq!(format_prefix(None), "N/A");
    }

    #[test]
    fn formats_timestamp_in_utc() {
        assert_eq!(format_timestamp(0), "1970-01-01 00:00:00");
        assert_eq!(format_timestamp(1_700_000_000), "2023-11-14 22:13:20");
    }

    #[test]
    fn peer_event_omits_unset_as() {
        let payload = UnicastPayload {
            router_ip: Some(Ip::from(Ipv4Addr::new(10, 0, 0, 1))),
            remote_as: 65002,
            ..Default::default()
        };
        let text = render_peer_event(&payload, false);
        assert!(text.contains("10.0.0.1"));
        assert!(text.contains("65002"));
        assert!(!text.contains("local AS"));
        assert!(text.contains("down"));
        assert!(!text.contains("time:"));
    }

    #[test]
    fn route_renders_path_attributes() {
        let payload = UnicastPayload {
            announcement: true,
            prefix: Some(Prefix {
                address: Some(Ip::from(Ipv4Addr::new(198, 51, 100, 0))),
                length: 22,
            }),
            path: Some(BgpPath {
                next_hop: Some(Ip::from(Ipv4Addr::new(10, 1, 1, 1))),
                local_pref: 200,
                as_path: vec![AsPathSegment {
                    as_sequence: true,
                    asns: vec![65001, 13335],
                }],
                source: None,
                communities: vec![Community::new(65001, 666).0],
            }),
            ..Default::default()
        };
        let text = render_route_monitoring(&payload);
        assert!(text.contains("announce"));
        assert!(text.contains("198.51.100.0/22"));
        assert!(text.contains("10.1.1.1"));
        assert!(text.contains("200"));
        assert!(text.contains("65001 13335"));
        assert!(text.contains("65001:666"));
        assert!(!text.contains("source:"));
    }
}
