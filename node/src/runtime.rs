use crate::errors::Result;
use crate::metrics::Metrics;
use crate::model::DeviceConfig;
use crate::mqtt::{Publisher, Session, Topics};
use crate::network::NetworkLink;
use crate::rest::create_router;
use crate::sampler::Sampler;
use crate::sensor::SensorDriver;
use crate::server::ControlServer;
use crate::state::{Device, SharedDevice};
use crate::store::{ConfigStore, Secrets, Storage};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// Default wait between accepting a config change and restarting.
pub const DEFAULT_GRACE: Duration = Duration::from_secs(3);
/// Pause at the end of every tick.
pub const DEFAULT_IDLE: Duration = Duration::from_millis(20);

/// Boot-time options that are not part of the mutable device config.
#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    pub http_addr: String,
    /// Broker client identifier; generated per boot when absent.
    pub client_id: Option<String>,
    /// Channel prefix; the device id when absent.
    pub topic_prefix: Option<String>,
    pub grace: Duration,
    pub idle: Duration,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            http_addr: "0.0.0.0:80".to_string(),
            client_id: None,
            topic_prefix: None,
            grace: DEFAULT_GRACE,
            idle: DEFAULT_IDLE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Continue,
    /// A config change was accepted and its grace delay is over.
    Restart,
}

/// Hardware and link collaborators for one boot, created from the loaded
/// config.
pub trait Peripherals {
    type Sensor: SensorDriver;
    type Session: Session;

    fn storage(&mut self) -> Box<dyn Storage>;
    fn link(&mut self) -> Box<dyn NetworkLink>;
    fn sensor(&mut self, config: &DeviceConfig) -> Self::Sensor;
    fn session(
        &mut self,
        config: &DeviceConfig,
        client_id: &str,
        topics: &Topics,
    ) -> Result<Self::Session>;
}

/// The cooperative loop. Each tick gives every component one bounded turn:
/// HTTP, sampling, messaging, restart check.
pub struct Runtime<D, S> {
    device: SharedDevice,
    server: ControlServer,
    sampler: Sampler<D>,
    publisher: Publisher<S>,
    metrics: Metrics,
    grace: Duration,
    idle: Duration,
}

impl<D: SensorDriver, S: Session> Runtime<D, S> {
    pub fn device(&self) -> SharedDevice {
        self.device.clone()
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.server.local_addr()
    }

    pub fn publisher(&self) -> &Publisher<S> {
        &self.publisher
    }

    pub async fn tick(&mut self) -> TickOutcome {
        self.server.poll().await;

        let now = Instant::now();
        let sampled = match self.device.lock() {
            Ok(mut device) => {
                let Device {
                    store, readings, ..
                } = &mut *device;
                self.sampler.tick(now, store.get(), readings)
            }
            Err(e) => {
                error!("Skipping sample: {}", e);
                Vec::new()
            }
        };
        for (metric, reading) in &sampled {
            self.publisher.publish_reading(*metric, reading);
        }

        self.publisher.service(now).await;

        let restart_due = match self.device.lock() {
            Ok(mut device) => {
                device.mqtt_connected = self.publisher.is_connected();
                device
                    .store
                    .pending_restart()
                    .is_due(Instant::now(), self.grace)
            }
            Err(e) => {
                error!("Device state unavailable: {}", e);
                false
            }
        };

        if restart_due {
            TickOutcome::Restart
        } else {
            TickOutcome::Continue
        }
    }

    /// Runs ticks until a restart is due. Dropping the runtime afterwards
    /// releases the listener, the broker session and the sensor.
    pub async fn run(mut self) {
        info!("Entering main loop");
        loop {
            if self.tick().await == TickOutcome::Restart {
                info!("Restarting to apply new configuration");
                debug!("Counters at restart:\n{}", self.metrics.render());
                return;
            }
            tokio::time::sleep(self.idle).await;
        }
    }
}

/// Boot sequence: load config, attach sensor, open the broker session with
/// one connect attempt, bind the control surface. Runs again after every
/// restart.
pub async fn boot<P: Peripherals>(
    peripherals: &mut P,
    secrets: &Secrets,
    options: &RuntimeOptions,
) -> Result<Runtime<P::Sensor, P::Session>> {
    info!("[1/4] Loading configuration");
    let store = ConfigStore::load(peripherals.storage(), secrets);
    let config = store.get().clone();

    let metrics = Metrics::new()?;
    let link = peripherals.link();
    info!(
        "Network: {} ({})",
        link.ssid(),
        link.ip_address()
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| "not connected".to_string())
    );

    info!("[2/4] Initialising sensor on GP{}", config.sensor_pin);
    let sensor = peripherals.sensor(&config);

    info!("[3/4] Configuring broker session");
    let topics = Topics::new(options.topic_prefix.as_deref().unwrap_or(&config.device_id));
    let client_id = options
        .client_id
        .clone()
        .unwrap_or_else(|| format!("sensor-node-{}", uuid::Uuid::new_v4().simple()));
    let session = peripherals.session(&store.session_config(), &client_id, &topics)?;
    let mut publisher = Publisher::new(session, topics, &config.device_id, metrics.clone());
    // connect before the first sample is taken
    publisher.service(Instant::now()).await;

    let mut device = Device::new(store, link, metrics.clone());
    device.mqtt_connected = publisher.is_connected();
    let device = SharedDevice::new(device);

    info!("[4/4] Starting control surface");
    let router = create_router(device.clone(), options.grace);
    let server = ControlServer::bind(&options.http_addr, router, metrics.clone()).await?;

    info!(
        "System ready: device {}, sampling every {}s",
        config.device_id, config.sample_interval_seconds
    );

    Ok(Runtime {
        device,
        server,
        sampler: Sampler::new(sensor, metrics.clone()),
        publisher,
        metrics,
        grace: options.grace,
        idle: options.idle,
    })
}
