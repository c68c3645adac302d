use clap::Parser;
use sensor_node::errors::Result;
use sensor_node::model::DeviceConfig;
use sensor_node::mqtt::{MqttSession, Topics};
use sensor_node::network::{NetworkLink, StaticLink};
use sensor_node::runtime::{boot, Peripherals, RuntimeOptions, DEFAULT_IDLE};
use sensor_node::sensor::SimulatedDht;
use sensor_node::state::FIRMWARE_VERSION;
use sensor_node::store::{FileStorage, Secrets, Storage};
use std::net::{IpAddr, UdpSocket};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const BOOT_RETRY_DELAY: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "sensor-node", version, about = "Temperature/humidity sensor node")]
struct Args {
    /// Settings file holding the persisted device config
    #[arg(long, env = "SETTINGS_PATH", default_value = "settings.toml")]
    settings: PathBuf,

    /// Address of the HTTP control surface
    #[arg(long, env = "HTTP_ADDR", default_value = "0.0.0.0:80")]
    http_addr: String,

    /// Broker client identifier (random per boot when unset)
    #[arg(long, env = "MQTT_CLIENT_ID")]
    client_id: Option<String>,

    /// Channel prefix (defaults to the device id)
    #[arg(long, env = "TOPIC_PREFIX")]
    topic_prefix: Option<String>,

    /// Seconds between an accepted config change and the restart
    #[arg(long, env = "RESTART_GRACE_SECONDS", default_value_t = 3)]
    grace_seconds: u64,

    /// Wi-Fi network the node reports in /status
    #[arg(long, env = "WIFI_SSID", default_value = "")]
    wifi_ssid: String,

    /// Broker password, used when the settings file carries none
    #[arg(long, env = "MQTT_PASSWORD", hide_env_values = true)]
    mqtt_password: Option<String>,

    /// Share of simulated sensor reads that fail
    #[arg(long, env = "SENSOR_FAULT_RATE", default_value_t = 0.05)]
    sensor_fault_rate: f64,
}

/// Collaborators available when running on a host.
struct HostPeripherals {
    settings: PathBuf,
    wifi_ssid: String,
    sensor_fault_rate: f64,
}

impl Peripherals for HostPeripherals {
    type Sensor = SimulatedDht;
    type Session = MqttSession;

    fn storage(&mut self) -> Box<dyn Storage> {
        Box::new(FileStorage::new(&self.settings))
    }

    fn link(&mut self) -> Box<dyn NetworkLink> {
        Box::new(StaticLink::new(&self.wifi_ssid, outbound_ip()))
    }

    fn sensor(&mut self, config: &DeviceConfig) -> SimulatedDht {
        SimulatedDht::new(config.sensor_pin).with_fault_rate(self.sensor_fault_rate)
    }

    fn session(
        &mut self,
        config: &DeviceConfig,
        client_id: &str,
        topics: &Topics,
    ) -> Result<MqttSession> {
        MqttSession::new(config, client_id, topics)
    }
}

/// Address of the interface that routes outward. Connecting a UDP socket
/// sends nothing.
fn outbound_ip() -> Option<IpAddr> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("192.0.2.1:80").ok()?;
    socket.local_addr().ok().map(|addr| addr.ip())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    info!("Starting sensor node firmware {}", FIRMWARE_VERSION);
    info!("Settings file: {}", args.settings.display());

    let secrets = Secrets {
        broker_password: args.mqtt_password.clone(),
    };
    let options = RuntimeOptions {
        http_addr: args.http_addr.clone(),
        client_id: args.client_id.clone(),
        topic_prefix: args.topic_prefix.clone(),
        grace: Duration::from_secs(args.grace_seconds),
        idle: DEFAULT_IDLE,
    };
    let mut peripherals = HostPeripherals {
        settings: args.settings.clone(),
        wifi_ssid: args.wifi_ssid.clone(),
        sensor_fault_rate: args.sensor_fault_rate,
    };

    loop {
        let runtime = match boot(&mut peripherals, &secrets, &options).await {
            Ok(runtime) => runtime,
            Err(e) => {
                error!("Boot failed: {}", e);
                warn!("Retrying boot in {:?}", BOOT_RETRY_DELAY);
                tokio::time::sleep(BOOT_RETRY_DELAY).await;
                continue;
            }
        };

        tokio::select! {
            _ = runtime.run() => {
                info!("Rebooting");
            }
            // host runs only; the device itself never shuts down
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
                return Ok(());
            }
        }
    }
}
