//! Telemetry fan-out.

use std::net::SocketAddr;
use std::sync::Arc;

use parksense_protocol::TelemetryEvent;
use serde_json::{Map, Value};

use crate::sink::{TelemetryRecord, TelemetrySink};

/// Hands every reading to each configured sink in order.
///
/// A failing sink is logged and skipped; the remaining sinks still run and
/// the sensor is never told.
pub struct TelemetryHandler {
    sinks: Vec<Arc<dyn TelemetrySink>>,
}

impl TelemetryHandler {
    pub fn new(sinks: Vec<Arc<dyn TelemetrySink>>) -> Self {
        Self { sinks }
    }

    pub async fn handle(
        &self,
        peer_addr: SocketAddr,
        raw: String,
        fields: Map<String, Value>,
    ) -> TelemetryEvent {
        let record = TelemetryRecord::new(peer_addr, raw, &fields);

        for sink in &self.sinks {
            if let Err(e) = sink.record(&record).await {
                tracing::warn!(
                    %peer_addr,
                    sink = sink.name(),
                    "failed to record telemetry: {e}"
                );
            }
        }

        record.event
    }
}
