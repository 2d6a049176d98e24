//! Record decoding and per-kind dispatch.

use std::io::{self, Write};

use parking_lot::Mutex;
use tracing::{debug, error, warn};

use bmpbridge_core::broker::Record;
use bmpbridge_protocol::present::{render_peer_event, render_route_monitoring};
use bmpbridge_protocol::{decode, MessageKind, WireMessage};
use bmpbridge_telemetry::MetricsRecorder;

/// One method per known message kind. Called from the claim loop of the
/// record's partition, so implementations see concurrent calls across
/// partitions.
pub trait MessageHandler: Send + Sync {
    fn route_monitoring(&self, record: &Record, message: &WireMessage);
    fn peer_up(&self, record: &Record, message: &WireMessage);
    fn peer_down(&self, record: &Record, message: &WireMessage);
    fn route_mirroring(&self, record: &Record, message: &WireMessage);
    fn session_initiation(&self, record: &Record, message: &WireMessage);
    fn session_termination(&self, record: &Record, message: &WireMessage);
}

/// What happened to one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Handled(MessageKind),
    Unknown(i32),
    Undecodable,
}

/// Decodes `record` and routes it to `handler`. Never fails: bad records are
/// logged, counted and skipped.
pub fn process_record<H: MessageHandler + ?Sized>(
    handler: &H,
    metrics: &MetricsRecorder,
    record: &Record,
) -> Dispatch {
    metrics.records_consumed.inc();

    let message = match decode(&record.value) {
        Ok(message) => message,
        Err(e) => {
            metrics.records_decode_failed.inc();
            error!(
                topic = %record.topic,
                partition = record.partition,
                offset = record.offset,
                error = %e,
                "Failed to decode record"
            );
            debug!(payload = %hex::encode(&record.value), "Undecodable payload");
            return Dispatch::Undecodable;
        }
    };

    let Some(kind) = message.known_kind() else {
        metrics.records_unknown_kind.inc();
        warn!(
            topic = %record.topic,
            partition = record.partition,
            offset = record.offset,
            kind = message.kind,
            "Unknown message kind"
        );
        return Dispatch::Unknown(message.kind);
    };

    match kind {
        MessageKind::RouteMonitoring => handler.route_monitoring(record, &message),
        MessageKind::PeerUp => handler.peer_up(record, &message),
        MessageKind::PeerDown => handler.peer_down(record, &message),
        MessageKind::RouteMirroring => handler.route_mirroring(record, &message),
        MessageKind::SessionInitiation => handler.session_initiation(record, &message),
        MessageKind::SessionTermination => handler.session_termination(record, &message),
    }
    Dispatch::Handled(kind)
}

/// Writes a human-readable block per record.
///
/// The mutex keeps blocks from different partitions from interleaving. It
/// says nothing about the order in which partitions are processed.
pub struct LogPresenter<W: Write + Send> {
    out: Mutex<W>,
}

impl LogPresenter<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write + Send> LogPresenter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner()
    }

    fn emit(&self, record: &Record, title: &str, body: Option<String>) {
        let mut block = format!(
            "[{} p{} @{} {}B] {}\n",
            record.topic,
            record.partition,
            record.offset,
            record.value.len(),
            title
        );
        block.push_str(body.as_deref().unwrap_or("    (metadata only)\n"));

        let mut out = self.out.lock();
        if let Err(e) = out.write_all(block.as_bytes()).and_then(|_| out.flush()) {
            warn!(error = %e, "Failed to write record");
        }
    }
}

impl<W: Write + Send> MessageHandler for LogPresenter<W> {
    fn route_monitoring(&self, record: &Record, message: &WireMessage) {
        let body = message.unicast.as_ref().map(render_route_monitoring);
        self.emit(record, "Route Monitoring", body);
    }

    fn peer_up(&self, record: &Record, message: &WireMessage) {
        let body = message.unicast.as_ref().map(|u| render_peer_event(u, true));
        self.emit(record, "Peer Up", body);
    }

    fn peer_down(&self, record: &Record, message: &WireMessage) {
        let body = message.unicast.as_ref().map(|u| render_peer_event(u, false));
        self.emit(record, "Peer Down", body);
    }

    fn route_mirroring(&self, record: &Record, _message: &WireMessage) {
        self.emit(record, "Route Mirroring", None);
    }

    fn session_initiation(&self, record: &Record, _message: &WireMessage) {
        self.emit(record, "Session Initiation", None);
    }

    fn session_termination(&self, record: &Record, _message: &WireMessage) {
        self.emit(record, "Session Termination", None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bmpbridge_protocol::{encode, Ip, UnicastPayload};
    use bytes::Bytes;
    use std::net::Ipv4Addr;
    use tracing_test::traced_test;

    fn record(offset: i64, value: Bytes) -> Record {
        Record {
            topic: "bmp.post-policy".into(),
            partition: 0,
            offset,
            value,
        }
    }

    fn encoded(msg: &WireMessage) -> Bytes {
        encode(msg, usize::MAX).unwrap()
    }

    #[test]
    fn presenter_renders_peer_block() {
        let presenter = LogPresenter::new(Vec::new());
        let metrics = MetricsRecorder::new().unwrap();
        let msg = WireMessage::new(
            MessageKind::PeerUp,
            Some(UnicastPayload {
                router_ip: Some(Ip::from(Ipv4Addr::new(10, 0, 0, 1))),
                remote_as: 65002,
                announcement: true,
                ..Default::default()
            }),
        );
        assert_eq!(
            process_record(&presenter, &metrics, &record(4, encoded(&msg))),
            Dispatch::Handled(MessageKind::PeerUp)
        );

        let text = String::from_utf8(presenter.into_inner()).unwrap();
        let header = format!("[bmp.post-policy p0 @4 {}B] Peer Up\n", encoded(&msg).len());
        assert!(text.starts_with(&header), "{text}");
        assert!(text.contains("10.0.0.1"));
        assert!(text.contains("65002"));
    }

    #[test]
    fn metadata_kinds_render_header_only() {
        let presenter = LogPresenter::new(Vec::new());
        let metrics = MetricsRecorder::new().unwrap();
        let msg = WireMessage::new(MessageKind::SessionTermination, None);
        let payload = encoded(&msg);
        assert_eq!(payload.len(), 2);
        process_record(&presenter, &metrics, &record(0, payload));
        let text = String::from_utf8(presenter.into_inner()).unwrap();
        assert_eq!(
            text,
            "[bmp.post-policy p0 @0 2B] Session Termination\n    (metadata only)\n"
        );
    }

    #[traced_test]
    #[test]
    fn undecodable_record_is_counted_and_logged() {
        let presenter = LogPresenter::new(Vec::new());
        let metrics = MetricsRecorder::new().unwrap();
        let outcome = process_record(
            &presenter,
            &metrics,
            &record(9, Bytes::from_static(&[0x12, 0x20, 0x01])),
        );
        assert_eq!(outcome, Dispatch::Undecodable);
        assert_eq!(metrics.records_decode_failed.get(), 1);
        assert_eq!(metrics.records_consumed.get(), 1);
        assert!(presenter.into_inner().is_empty());
        assert!(logs_contain("Failed to decode record"));
    }

    #[test]
    fn unknown_kind_is_counted() {
        let presenter = LogPresenter::new(Vec::new());
        let metrics = MetricsRecorder::new().unwrap();
        // statistics report
        let msg = WireMessage {
            kind: 1,
            unicast: None,
        };
        assert_eq!(
            process_record(&presenter, &metrics, &record(1, encoded(&msg))),
            Dispatch::Unknown(1)
        );
        assert_eq!(metrics.records_unknown_kind.get(), 1);
        assert!(presenter.into_inner().is_empty());
    }
}
