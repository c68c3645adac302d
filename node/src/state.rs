use crate::metrics::Metrics;
use crate::model::{DeviceStatusSnapshot, LastReadings};
use crate::network::NetworkLink;
use crate::store::ConfigStore;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

pub const FIRMWARE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Everything the control surface can read or change.
pub struct Device {
    pub store: ConfigStore,
    pub readings: LastReadings,
    pub link: Box<dyn NetworkLink>,
    pub mqtt_connected: bool,
    pub booted_at: Instant,
    pub metrics: Metrics,
}

impl Device {
    pub fn new(store: ConfigStore, link: Box<dyn NetworkLink>, metrics: Metrics) -> Self {
        Self {
            store,
            readings: LastReadings::default(),
            link,
            mqtt_connected: false,
            booted_at: Instant::now(),
            metrics,
        }
    }

    pub fn snapshot(&self, now: Instant) -> DeviceStatusSnapshot<'_> {
        let config = self.store.get();
        DeviceStatusSnapshot {
            device_id: &config.device_id,
            display_name: &config.display_name,
            location: &config.location,
            wifi_connected: self.link.is_connected(),
            wifi_ssid: self.link.ssid(),
            ip_address: self.link.ip_address().map(|ip| ip.to_string()),
            mqtt_connected: self.mqtt_connected,
            mqtt_broker: &config.broker_host,
            uptime_seconds: now.saturating_duration_since(self.booted_at).as_secs(),
            sample_interval_seconds: config.sample_interval_seconds,
            last_temperature: self.readings.temperature,
            last_humidity: self.readings.humidity,
            last_reading_timestamp: self.readings.timestamp.as_deref(),
            publish_dropped: self.metrics.publish_dropped_total.get(),
            sensor_faults: self.metrics.sensor_faults_total.get(),
            restart_pending: self.store.pending_restart().is_armed(),
            firmware_version: FIRMWARE_VERSION,
        }
    }
}

/// Device state shared between the scheduler and the HTTP handlers.
///
/// The runtime is single-threaded and no guard is held across an `.await`,
/// so the lock is never contended; it exists to satisfy axum's `Send + Sync`
/// state bound.
#[derive(Clone)]
pub struct SharedDevice(Arc<Mutex<Device>>);

impl SharedDevice {
    pub fn new(device: Device) -> Self {
        Self(Arc::new(Mutex::new(device)))
    }

    pub fn lock(&self) -> crate::errors::Result<MutexGuard<'_, Device>> {
        self.0
            .lock()
            .map_err(|_| crate::errors::Error::StatePoisoned)
    }
}
