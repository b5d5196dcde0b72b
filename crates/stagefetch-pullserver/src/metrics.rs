//! Prometheus metrics of the shuffle service.

use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;
use std::sync::Arc;

#[derive(Clone)]
pub struct ShuffleMetrics {
    /// Bytes promised in successful response headers.
    pub output_bytes: Counter,
    pub outputs_ok: Counter,
    pub outputs_failed: Counter,
    pub connections: Gauge,
    pub registry: Arc<Registry>,
}

impl ShuffleMetrics {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let output_bytes = Counter::default();
        registry.register(
            "stagefetch_shuffle_output_bytes",
            "Bytes of intermediate output served",
            output_bytes.clone(),
        );

        let outputs_ok = Counter::default();
        registry.register(
            "stagefetch_shuffle_outputs_ok",
            "Fetch requests answered successfully",
            outputs_ok.clone(),
        );

        let outputs_failed = Counter::default();
        registry.register(
            "stagefetch_shuffle_outputs_failed",
            "Fetch requests answered with an error",
            outputs_failed.clone(),
        );

        let connections = Gauge::default();
        registry.register(
            "stagefetch_shuffle_connections",
            "Open client connections",
            connections.clone(),
        );

        Self {
            output_bytes,
            outputs_ok,
            outputs_failed,
            connections,
            registry: Arc::new(registry),
        }
    }

    /// Encode all metrics as Prometheus text format.
    pub fn encode(&self) -> Result<String, std::fmt::Error> {
        let mut buf = String::new();
        encode(&mut buf, &self.registry)?;
        Ok(buf)
    }
}

impl Default for ShuffleMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_registered_metrics() {
        let metrics = ShuffleMetrics::new();
        metrics.output_bytes.inc_by(42);
        metrics.outputs_ok.inc();
        metrics.connections.inc();

        let text = metrics.encode().unwrap();
        assert!(text.contains("stagefetch_shuffle_output_bytes_total 42"));
        assert!(text.contains("stagefetch_shuffle_outputs_ok_total 1"));
        assert!(text.contains("stagefetch_shuffle_outputs_failed_total 0"));
        assert!(text.contains("stagefetch_shuffle_connections 1"));
    }
}
