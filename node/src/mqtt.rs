use crate::errors::{Error, Result};
use crate::metrics::Metrics;
use crate::model::{
    DeviceConfig, DeviceStatus, Metric, StatusPayload, TelemetryReading, STATUS_CHANNEL_SUFFIX,
};
use async_trait::async_trait;
use chrono::Utc;
use rumqttc::v5::mqttbytes::v5::{LastWill, Packet};
use rumqttc::v5::mqttbytes::QoS;
use rumqttc::v5::{AsyncClient, Event, EventLoop, MqttOptions};
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

const INITIAL_BACKOFF_MS: u64 = 1_000;
const MAX_BACKOFF_MS: u64 = 60_000;

/// Time spent driving an established session per tick.
pub const POLL_BUDGET: Duration = Duration::from_millis(50);
/// Time allowed for one connection attempt.
pub const CONNECT_BUDGET: Duration = Duration::from_secs(2);

const KEEP_ALIVE: Duration = Duration::from_secs(60);
const REQUEST_CAPACITY: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// The broker acknowledged a (re)connect during this poll.
    Connected,
    /// Budget spent without a state change.
    Idle,
}

/// A publish-only broker session.
#[async_trait]
pub trait Session: Send {
    /// Hands a message to the session without waiting for the network.
    fn publish(&mut self, topic: &str, payload: Vec<u8>, retain: bool) -> Result<()>;

    /// Drives the connection (connect, keep-alive, outgoing queue) for at most
    /// `budget`.
    async fn poll(&mut self, budget: Duration) -> Result<SessionEvent>;
}

/// Channel names for one device: `<prefix>/<suffix>`.
#[derive(Debug, Clone)]
pub struct Topics {
    prefix: String,
}

impl Topics {
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.trim_end_matches('/').to_string(),
        }
    }

    pub fn telemetry(&self, metric: Metric) -> String {
        self.join(metric.channel_suffix())
    }

    pub fn status(&self) -> String {
        self.join(STATUS_CHANNEL_SUFFIX)
    }

    fn join(&self, suffix: &str) -> String {
        if self.prefix.is_empty() {
            suffix.to_string()
        } else {
            format!("{}/{}", self.prefix, suffix)
        }
    }
}

/// MQTT 5 session backed by rumqttc. The broker publishes the retained
/// `offline` status as the session's will when the device drops off.
pub struct MqttSession {
    client: AsyncClient,
    eventloop: EventLoop,
}

impl MqttSession {
    pub fn new(config: &DeviceConfig, client_id: &str, topics: &Topics) -> Result<Self> {
        info!(
            "Configuring MQTT session to {}:{} as {}",
            config.broker_host, config.broker_port, client_id
        );

        let mut mqtt_options = MqttOptions::new(client_id, &config.broker_host, config.broker_port);
        mqtt_options.set_keep_alive(KEEP_ALIVE);
        if !config.broker_user.is_empty() {
            mqtt_options.set_credentials(&config.broker_user, &config.broker_password);
        }

        // The will is registered once per session, so its timestamp is the
        // session's creation time, not the time the broker publishes it.
        let will = StatusPayload::new(&config.device_id, DeviceStatus::Offline, Utc::now());
        let will_payload = serde_json::to_vec(&will)?;
        mqtt_options.set_last_will(LastWill::new(
            topics.status(),
            will_payload,
            QoS::AtLeastOnce,
            true,
            None,
        ));

        let (client, eventloop) = AsyncClient::new(mqtt_options, REQUEST_CAPACITY);
        Ok(Self { client, eventloop })
    }
}

#[async_trait]
impl Session for MqttSession {
    fn publish(&mut self, topic: &str, payload: Vec<u8>, retain: bool) -> Result<()> {
        self.client
            .try_publish(topic.to_string(), QoS::AtLeastOnce, retain, payload)
            .map_err(|e| Error::Publish(e.to_string()))
    }

    async fn poll(&mut self, budget: Duration) -> Result<SessionEvent> {
        let deadline = tokio::time::Instant::now() + budget;
        loop {
            match tokio::time::timeout_at(deadline, self.eventloop.poll()).await {
                Err(_) => return Ok(SessionEvent::Idle),
                Ok(Ok(Event::Incoming(Packet::ConnAck(_)))) => return Ok(SessionEvent::Connected),
                Ok(Ok(event)) => trace!("MQTT event: {:?}", event),
                Ok(Err(e)) => return Err(Error::LinkDisconnected(e.to_string())),
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkState {
    Connected,
    Backoff { retry_at: Instant, failures: u32 },
}

/// Owns the broker session: backoff, status announcements and the drop
/// policy for messages produced while the link is down.
pub struct Publisher<S> {
    session: S,
    topics: Topics,
    device_id: String,
    metrics: Metrics,
    state: LinkState,
    attempts: u64,
}

impl<S: Session> Publisher<S> {
    pub fn new(session: S, topics: Topics, device_id: &str, metrics: Metrics) -> Self {
        Self {
            session,
            topics,
            device_id: device_id.to_string(),
            metrics,
            state: LinkState::Backoff {
                retry_at: Instant::now(),
                failures: 0,
            },
            attempts: 0,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state == LinkState::Connected
    }

    pub fn session(&self) -> &S {
        &self.session
    }

    /// Earliest time the next connection attempt may run, while disconnected.
    pub fn retry_at(&self) -> Option<Instant> {
        match self.state {
            LinkState::Connected => None,
            LinkState::Backoff { retry_at, .. } => Some(retry_at),
        }
    }

    pub fn publish_reading(&mut self, metric: Metric, reading: &TelemetryReading) {
        let topic = self.topics.telemetry(metric);
        self.send(&topic, reading, false);
    }

    /// Keep-alive and reconnect step of the tick.
    pub async fn service(&mut self, now: Instant) {
        let budget = match self.state {
            LinkState::Connected => POLL_BUDGET,
            LinkState::Backoff { retry_at, .. } if now < retry_at => return,
            LinkState::Backoff { .. } => {
                self.attempts += 1;
                if self.attempts > 1 {
                    self.metrics.reconnect_attempts_total.inc();
                }
                CONNECT_BUDGET
            }
        };

        match self.session.poll(budget).await {
            Ok(SessionEvent::Connected) => {
                info!("MQTT connected to broker");
                self.state = LinkState::Connected;
                self.announce_online();
            }
            Ok(SessionEvent::Idle) if self.is_connected() => {}
            Ok(SessionEvent::Idle) => self.back_off(now, "no CONNACK within budget"),
            Err(e) => self.back_off(now, &e.to_string()),
        }
    }

    fn announce_online(&mut self) {
        let payload = StatusPayload::new(&self.device_id, DeviceStatus::Online, Utc::now());
        let topic = self.topics.status();
        self.send(&topic, &payload, true);
    }

    fn back_off(&mut self, now: Instant, reason: &str) {
        let failures = match self.state {
            LinkState::Connected => 1,
            LinkState::Backoff { failures, .. } => failures + 1,
        };
        let backoff_ms = (INITIAL_BACKOFF_MS * 2_u64.pow((failures - 1).min(16))).min(MAX_BACKOFF_MS);

        warn!(
            "MQTT link down (failure {}): {}. Retrying in {}ms",
            failures, reason, backoff_ms
        );
        self.state = LinkState::Backoff {
            retry_at: now + Duration::from_millis(backoff_ms),
            failures,
        };
    }

    fn send<T: Serialize>(&mut self, topic: &str, message: &T, retain: bool) {
        if !self.is_connected() {
            self.metrics.publish_dropped_total.inc();
            debug!("Dropping message for {}: link down", topic);
            return;
        }

        let payload = match serde_json::to_vec(message) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Failed to serialize message for {}: {}", topic, e);
                self.metrics.publish_dropped_total.inc();
                return;
            }
        };

        match self.session.publish(topic, payload, retain) {
            Ok(()) => {
                self.metrics.published_total.inc();
                debug!("Queued message on {}", topic);
            }
            Err(e) => {
                self.metrics.publish_dropped_total.inc();
                warn!("Failed to publish on {}: {}", topic, e);
            }
        }
    }
}
