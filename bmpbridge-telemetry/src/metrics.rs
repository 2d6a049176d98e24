//! ## bmpbridge-telemetry::metrics
//! **Prometheus counters for both halves of the bridge**
//!
//! Publisher: processed, marshal failures, send failures.
//! Consumer: records consumed, decode failures, unknown message kinds.

use prometheus::{IntCounter, Registry};

#[derive(Debug, Clone)]
pub struct MetricsRecorder {
    pub registry: Registry,
    pub messages_processed: IntCounter,
    pub messages_marshal_failed: IntCounter,
    pub messages_send_failed: IntCounter,
    pub records_consumed: IntCounter,
    pub records_decode_failed: IntCounter,
    pub records_unknown_kind: IntCounter,
}

impl MetricsRecorder {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();
        let counter = |name: &str, help: &str| -> Result<IntCounter, prometheus::Error> {
            let counter = IntCounter::new(name, help)?;
            registry.register(Box::new(counter.clone()))?;
            Ok(counter)
        };

        let messages_processed = counter(
            "bmpbridge_messages_processed_total",
            "Routing events published to the broker",
        )?;
        let messages_marshal_failed = counter(
            "bmpbridge_messages_marshal_failed_total",
            "Routing events dropped because they could not be encoded",
        )?;
        let messages_send_failed = counter(
            "bmpbridge_messages_send_failed_total",
            "Routing events dropped because the broker rejected the publish",
        )?;
        let records_consumed = counter(
            "bmpbridge_records_consumed_total",
            "Records received by the consumer dispatcher",
        )?;
        let records_decode_failed = counter(
            "bmpbridge_records_decode_failed_total",
            "Records skipped because they could not be decoded",
        )?;
        let records_unknown_kind = counter(
            "bmpbridge_records_unknown_kind_total",
            "Decoded records carrying an unrecognized message kind",
        )?;

        Ok(Self {
            registry,
            messages_processed,
            messages_marshal_failed,
            messages_send_failed,
            records_consumed,
            records_decode_failed,
            records_unknown_kind,
        })
    }

    pub fn gather_metrics(&self) -> Result<String, prometheus::Error> {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let mut buffer = Vec::<u8>::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
