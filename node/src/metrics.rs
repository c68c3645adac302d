use prometheus::{Encoder, IntCounter, Opts, Registry, TextEncoder};

/// Counters for one boot of the node. Kept per instance so a restart starts
/// from zero, like the device itself.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub published_total: IntCounter,
    pub publish_dropped_total: IntCounter,
    pub sensor_faults_total: IntCounter,
    pub http_requests_total: IntCounter,
    pub reconnect_attempts_total: IntCounter,
}

impl Metrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let published_total = IntCounter::with_opts(Opts::new(
            "node_published_total",
            "Messages handed to the broker session",
        ))?;
        let publish_dropped_total = IntCounter::with_opts(Opts::new(
            "node_publish_dropped_total",
            "Messages dropped because the broker session was unavailable",
        ))?;
        let sensor_faults_total = IntCounter::with_opts(Opts::new(
            "node_sensor_faults_total",
            "Failed sensor reads",
        ))?;
        let http_requests_total = IntCounter::with_opts(Opts::new(
            "node_http_requests_total",
            "Connections served by the control surface",
        ))?;
        let reconnect_attempts_total = IntCounter::with_opts(Opts::new(
            "node_reconnect_attempts_total",
            "Broker connection attempts after the first",
        ))?;

        registry.register(Box::new(published_total.clone()))?;
        registry.register(Box::new(publish_dropped_total.clone()))?;
        registry.register(Box::new(sensor_faults_total.clone()))?;
        registry.register(Box::new(http_requests_total.clone()))?;
        registry.register(Box::new(reconnect_attempts_total.clone()))?;

        Ok(Self {
            registry,
            published_total,
            publish_dropped_total,
            sensor_faults_total,
            http_requests_total,
            reconnect_attempts_total,
        })
    }

    /// Text exposition of every counter.
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if encoder.encode(&self.registry.gather(), &mut buffer).is_err() {
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_contains_counters() {
        let metrics = Metrics::new().unwrap();
        metrics.publish_dropped_total.inc();

        let text = metrics.render();
        assert!(text.contains("node_publish_dropped_total 1"));
        assert!(text.contains("node_sensor_faults_total 0"));
    }

    #[test]
    fn test_instances_are_independent() {
        let a = Metrics::new().unwrap();
        let b = Metrics::new().unwrap();
        a.sensor_faults_total.inc();

        assert_eq!(a.sensor_faults_total.get(), 1);
        assert_eq!(b.sensor_faults_total.get(), 0);
    }
}
