//! ## bmpbridge-engine::publisher
//! **Routing events to wire messages, one publish attempt each**
//!
//! Every callback builds exactly one [`WireMessage`], encodes it and hands the
//! bytes to the sink once. Nothing is queued or retried: a failed event is
//! counted and dropped. Failure log lines share one token bucket so a broker
//! outage produces bounded log volume; counters and liveness are always
//! updated.

use std::net::IpAddr;
use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info};

use bmpbridge_config::PublisherConfig;
use bmpbridge_core::broker::RecordSink;
use bmpbridge_core::events::{
    BmpEventCallback, PathAttributes, PeerSession, PublishOutcome, RouteEvent,
};
use bmpbridge_protocol::{
    encode, AsPathSegment, BgpPath, Community, Ip, MessageKind, Prefix, UnicastPayload,
    WireMessage,
};
use bmpbridge_telemetry::{Liveness, MetricsRecorder, TokenBucket};

pub struct EventPublisher<S: RecordSink> {
    sink: S,
    topic: String,
    max_message_bytes: usize,
    throttle: TokenBucket,
    liveness: Liveness,
    metrics: Arc<MetricsRecorder>,
}

impl<S: RecordSink> EventPublisher<S> {
    pub fn new(
        sink: S,
        config: &PublisherConfig,
        liveness: Liveness,
        metrics: Arc<MetricsRecorder>,
    ) -> Self {
        Self {
            sink,
            topic: config.topic.clone(),
            max_message_bytes: config.max_message_bytes,
            throttle: TokenBucket::new(config.throttle.capacity, config.throttle.refill_per_sec),
            liveness,
            metrics,
        }
    }

    pub fn liveness(&self) -> &Liveness {
        &self.liveness
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    fn publish(&self, message: &WireMessage) -> PublishOutcome {
        let payload = match encode(message, self.max_message_bytes) {
            Ok(payload) => payload,
            Err(e) => {
                self.metrics.messages_marshal_failed.inc();
                if self.throttle.acquire() {
                    error!(kind = message.kind, error = %e, "Failed to encode wire message");
                }
                return PublishOutcome::EncodeFailed;
            }
        };

        match self.sink.send(&self.topic, &payload) {
            Ok(()) => {
                self.liveness.mark_healthy();
                self.metrics.messages_processed.inc();
                PublishOutcome::Published
            }
            Err(e) => {
                self.liveness.mark_unhealthy();
                self.metrics.messages_send_failed.inc();
                if self.throttle.acquire() {
                    error!(topic = %self.topic, error = %e, "Failed to publish wire message");
                }
                PublishOutcome::SendFailed
            }
        }
    }
}

impl<S: RecordSink> BmpEventCallback for EventPublisher<S> {
    fn on_peer_up(&self, peer: &PeerSession) -> PublishOutcome {
        info!(
            router = %peer.router,
            neighbor = %peer.neighbor,
            local_as = peer.local_as,
            remote_as = peer.remote_as,
            "Peer up"
        );
        self.publish(&peer_message(peer, true, now()))
    }

    fn on_peer_down(&self, peer: &PeerSession, reason: &str) -> PublishOutcome {
        info!(
            router = %peer.router,
            neighbor = %peer.neighbor,
            local_as = peer.local_as,
            remote_as = peer.remote_as,
            reason,
            "Peer down"
        );
        self.publish(&peer_message(peer, false, now()))
    }

    fn on_route_monitoring(&self, event: &RouteEvent) -> PublishOutcome {
        info!(
            router = %event.peer.router,
            neighbor = %event.peer.neighbor,
            remote_as = event.peer.remote_as,
            prefix = ?event.prefix,
            announcement = event.announcement,
            "Route update"
        );
        self.publish(&route_message(event, now()))
    }
}

fn now() -> u32 {
    u32::try_from(Utc::now().timestamp()).unwrap_or(u32::MAX)
}

fn session_payload(peer: &PeerSession, announcement: bool, timestamp: u32) -> UnicastPayload {
    UnicastPayload {
        router_ip: Some(Ip::from(peer.router)),
        local_ip: Some(Ip::from(peer.local)),
        neighbor_ip: Some(Ip::from(peer.neighbor)),
        local_as: peer.local_as,
        remote_as: peer.remote_as,
        announcement,
        timestamp,
        prefix: None,
        path: None,
    }
}

/// Peer events carry session identity only; `announcement` is the up flag.
pub fn peer_message(peer: &PeerSession, up: bool, timestamp: u32) -> WireMessage {
    let kind = if up {
        MessageKind::PeerUp
    } else {
        MessageKind::PeerDown
    };
    WireMessage::new(kind, Some(session_payload(peer, up, timestamp)))
}

pub fn route_message(event: &RouteEvent, timestamp: u32) -> WireMessage {
    let mut payload = session_payload(&event.peer, event.announcement, timestamp);
    payload.prefix = event.prefix.map(Prefix::from);
    payload.path = event.attributes.as_ref().map(bgp_path);
    WireMessage::new(MessageKind::RouteMonitoring, Some(payload))
}

fn optional_ip(addr: Option<IpAddr>) -> Option<Ip> {
    addr.map(Ip::from)
}

fn bgp_path(attributes: &PathAttributes) -> BgpPath {
    BgpPath {
        next_hop: optional_ip(attributes.next_hop),
        local_pref: attributes.local_pref,
        as_path: attributes
            .as_path
            .iter()
            .map(|segment| AsPathSegment {
                as_sequence: segment.sequence,
                asns: segment.asns.clone(),
            })
            .collect(),
        source: optional_ip(attributes.source),
        communities: attributes
            .communities
            .iter()
            .map(|(high, low)| Community::new(*high, *low).0)
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bmpbridge_config::ThrottleConfig;
    use bmpbridge_core::broker::memory::MemoryBroker;
    use bmpbridge_core::events::AsSegment;
    use bmpbridge_protocol::decode;
    use std::net::Ipv4Addr;
    use std::str::FromStr;
    use tracing_test::traced_test;

    fn peer() -> PeerSession {
        PeerSession::new(
            Ipv4Addr::new(10, 0, 0, 1).into(),
            Ipv4Addr::new(10, 0, 0, 2).into(),
            Ipv4Addr::new(10, 0, 0, 3).into(),
            65001,
            65002,
        )
    }

    fn publisher(broker: &MemoryBroker, config: PublisherConfig) -> EventPublisher<MemoryBroker> {
        EventPublisher::new(
            broker.clone(),
            &config,
            Liveness::new(),
            Arc::new(MetricsRecorder::new().unwrap()),
        )
    }

    #[test]
    fn peer_messages_never_carry_route_attributes() {
        for up in [true, false] {
            let msg = peer_message(&peer(), up, 7);
            let unicast = msg.unicast.as_ref().unwrap();
            assert_eq!(unicast.announcement, up);
            assert!(unicast.prefix.is_none());
            assert!(unicast.path.is_none());
            assert!(msg.validate().is_ok());
        }
    }

    #[test]
    fn route_message_maps_attributes() {
        let event = RouteEvent::announce(
            peer(),
            ipnetwork::IpNetwork::from_str("203.0.113.0/24").unwrap(),
            PathAttributes {
                next_hop: Some(Ipv4Addr::new(10, 0, 0, 3).into()),
                local_pref: 100,
                as_path: vec![AsSegment {
                    sequence: true,
                    asns: vec![65002, 3356],
                }],
                source: None,
                communities: vec![(65002, 120)],
            },
        );
        let msg = route_message(&event, 1);
        let unicast = msg.unicast.unwrap();
        assert!(unicast.announcement);
        assert_eq!(unicast.prefix.as_ref().map(|p| p.length), Some(24));
        let path = unicast.path.as_ref().unwrap();
        assert_eq!(path.communities, vec![(65002 << 16) | 120]);
        assert_eq!(unicast.as_path_asns(), vec![65002, 3356]);
    }

    #[test]
    fn publishes_once_and_counts() {
        let broker = MemoryBroker::new(1);
        let publisher = publisher(&broker, PublisherConfig::default());
        assert_eq!(publisher.on_peer_up(&peer()), PublishOutcome::Published);

        let records = broker.records(publisher.topic());
        assert_eq!(records.len(), 1);
        let msg = decode(&records[0]).unwrap();
        assert_eq!(msg.known_kind(), Some(MessageKind::PeerUp));
        assert_eq!(publisher.metrics.messages_processed.get(), 1);
        assert!(publisher.liveness().is_healthy());
    }

    #[test]
    fn oversized_message_is_dropped_before_sending() {
        let broker = MemoryBroker::new(1);
        let config = PublisherConfig {
            max_message_bytes: 8,
            ..Default::default()
        };
        let publisher = publisher(&broker, config);
        assert_eq!(
            publisher.on_peer_down(&peer(), "hold timer expired"),
            PublishOutcome::EncodeFailed
        );
        assert!(broker.records(publisher.topic()).is_empty());
        assert_eq!(publisher.metrics.messages_marshal_failed.get(), 1);
        assert_eq!(publisher.metrics.messages_send_failed.get(), 0);
        assert!(publisher.liveness().is_healthy());
    }

    #[test]
    fn send_failures_flip_liveness_until_next_success() {
        let broker = MemoryBroker::new(1);
        let publisher = publisher(&broker, PublisherConfig::default());

        broker.fail_next_sends(1);
        assert_eq!(publisher.on_peer_up(&peer()), PublishOutcome::SendFailed);
        assert!(!publisher.liveness().is_healthy());

        assert_eq!(publisher.on_peer_up(&peer()), PublishOutcome::Published);
        assert!(publisher.liveness().is_healthy());

        broker.fail_next_sends(1);
        publisher.on_peer_up(&peer());
        assert!(!publisher.liveness().is_healthy());
        assert_eq!(publisher.metrics.messages_send_failed.get(), 2);
        assert_eq!(publisher.metrics.messages_processed.get(), 1);
    }

    #[traced_test]
    #[test]
    fn failure_logs_are_throttled_but_counted() {
        let broker = MemoryBroker::new(1);
        let config = PublisherConfig {
            throttle: ThrottleConfig {
                capacity: 2,
                refill_per_sec: 0.001,
            },
            ..Default::default()
        };
        let publisher = publisher(&broker, config);

        broker.fail_next_sends(5);
        for _ in 0..5 {
            assert_eq!(publisher.on_peer_up(&peer()), PublishOutcome::SendFailed);
        }
        assert_eq!(publisher.metrics.messages_send_failed.get(), 5);
        logs_assert(|lines: &[&str]| {
            match lines
                .iter()
                .filter(|line| line.contains("Failed to publish wire message"))
                .count()
            {
                2 => Ok(()),
                n => Err(format!("expected 2 failure lines, saw {n}")),
            }
        });
    }
}
