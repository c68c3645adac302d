use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_DEVICE_ID: &str = "Sensor-TempHumid1";
pub const DEFAULT_BROKER_PORT: u16 = 1883;
pub const DEFAULT_SAMPLE_INTERVAL_SECONDS: u32 = 60;
pub const DEFAULT_SENSOR_PIN: u8 = 15;

/// Mutable device configuration, as persisted.
///
/// The broker fields keep the `mqtt_` names on the wire and in the settings
/// file. `broker_password` is serialized here because this is the persisted
/// shape; reads go through [`PublicConfig`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub device_id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub location: String,
    #[serde(rename = "mqtt_broker")]
    pub broker_host: String,
    #[serde(rename = "mqtt_port", default = "default_broker_port")]
    pub broker_port: u16,
    #[serde(rename = "mqtt_user", default)]
    pub broker_user: String,
    #[serde(rename = "mqtt_password", default)]
    pub broker_password: String,
    #[serde(default = "default_sample_interval")]
    pub sample_interval_seconds: u32,
    #[serde(default = "default_sensor_pin")]
    pub sensor_pin: u8,
}

fn default_broker_port() -> u16 {
    DEFAULT_BROKER_PORT
}

fn default_sample_interval() -> u32 {
    DEFAULT_SAMPLE_INTERVAL_SECONDS
}

fn default_sensor_pin() -> u8 {
    DEFAULT_SENSOR_PIN
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            device_id: DEFAULT_DEVICE_ID.to_string(),
            display_name: String::new(),
            location: String::new(),
            broker_host: "localhost".to_string(),
            broker_port: DEFAULT_BROKER_PORT,
            broker_user: String::new(),
            broker_password: String::new(),
            sample_interval_seconds: DEFAULT_SAMPLE_INTERVAL_SECONDS,
            sensor_pin: DEFAULT_SENSOR_PIN,
        }
    }
}

impl DeviceConfig {
    pub fn public(&self) -> PublicConfig<'_> {
        PublicConfig {
            device_id: &self.device_id,
            display_name: &self.display_name,
            location: &self.location,
            broker_host: &self.broker_host,
            broker_port: self.broker_port,
            broker_user: &self.broker_user,
            sample_interval_seconds: self.sample_interval_seconds,
            sensor_pin: self.sensor_pin,
        }
    }
}

/// Read view of [`DeviceConfig`] without the broker password.
#[derive(Debug, Serialize)]
pub struct PublicConfig<'a> {
    pub device_id: &'a str,
    pub display_name: &'a str,
    pub location: &'a str,
    #[serde(rename = "mqtt_broker")]
    pub broker_host: &'a str,
    #[serde(rename = "mqtt_port")]
    pub broker_port: u16,
    #[serde(rename = "mqtt_user")]
    pub broker_user: &'a str,
    pub sample_interval_seconds: u32,
    pub sensor_pin: u8,
}

/// Physical quantity produced by the sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    Temperature,
    Humidity,
}

impl Metric {
    pub const ALL: [Metric; 2] = [Metric::Temperature, Metric::Humidity];

    pub fn unit(self) -> &'static str {
        match self {
            Metric::Temperature => "°C",
            Metric::Humidity => "%",
        }
    }

    pub fn channel_suffix(self) -> &'static str {
        match self {
            Metric::Temperature => "sensor/temperatur",
            Metric::Humidity => "sensor/humidity",
        }
    }
}

pub const STATUS_CHANNEL_SUFFIX: &str = "sensor/status";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadingStatus {
    Ok,
    Error,
    Offline,
}

/// One published sample of one metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryReading {
    pub device_id: String,
    pub timestamp: String,
    pub value: Option<f64>,
    pub unit: String,
    pub status: ReadingStatus,
}

impl TelemetryReading {
    pub fn new(
        device_id: &str,
        metric: Metric,
        at: DateTime<Utc>,
        value: Option<f64>,
        status: ReadingStatus,
    ) -> Self {
        Self {
            device_id: device_id.to_string(),
            timestamp: iso_timestamp(at),
            value,
            unit: metric.unit().to_string(),
            status,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Online,
    Offline,
}

/// Payload of the status channel. Unlike telemetry the timestamp is Unix
/// epoch seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusPayload {
    pub device_id: String,
    pub status: DeviceStatus,
    pub timestamp: i64,
}

impl StatusPayload {
    pub fn new(device_id: &str, status: DeviceStatus, at: DateTime<Utc>) -> Self {
        Self {
            device_id: device_id.to_string(),
            status,
            timestamp: at.timestamp(),
        }
    }
}

/// Last successful sensor values, as reported by `/status`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LastReadings {
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub timestamp: Option<String>,
}

/// Response body of `GET /status`. Built per request from the live device
/// state and dropped with the response.
#[derive(Debug, Serialize)]
pub struct DeviceStatusSnapshot<'a> {
    pub device_id: &'a str,
    pub display_name: &'a str,
    pub location: &'a str,
    pub wifi_connected: bool,
    pub wifi_ssid: &'a str,
    pub ip_address: Option<String>,
    pub mqtt_connected: bool,
    pub mqtt_broker: &'a str,
    pub uptime_seconds: u64,
    pub sample_interval_seconds: u32,
    pub last_temperature: Option<f64>,
    pub last_humidity: Option<f64>,
    pub last_reading_timestamp: Option<&'a str>,
    pub publish_dropped: u64,
    pub sensor_faults: u64,
    pub restart_pending: bool,
    pub firmware_version: &'static str,
}

/// Response body of a successful `POST /config`.
#[derive(Debug, Serialize, Deserialize)]
pub struct UpdateResponse {
    pub message: String,
    pub updated_fields: Vec<String>,
    pub reboot: bool,
}

pub fn iso_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_public_config_omits_password() {
        let config = DeviceConfig {
            broker_password: "hunter2".to_string(),
            ..DeviceConfig::default()
        };

        let json = serde_json::to_value(config.public()).unwrap();
        assert!(json.get("mqtt_password").is_none());
        assert_eq!(json["mqtt_port"], 1883);
        assert_eq!(json["device_id"], DEFAULT_DEVICE_ID);
    }

    #[test]
    fn test_reading_payload_shape() {
        let at = Utc.with_ymd_and_hms(2025, 9, 2, 8, 30, 0).unwrap();
        let reading =
            TelemetryReading::new("dev-1", Metric::Humidity, at, Some(45.5), ReadingStatus::Ok);

        let json = serde_json::to_value(&reading).unwrap();
        assert_eq!(json["timestamp"], "2025-09-02T08:30:00Z");
        assert_eq!(json["unit"], "%");
        assert_eq!(json["status"], "ok");
    }

    #[test]
    fn test_status_payload_uses_epoch_seconds() {
        let at = Utc.with_ymd_and_hms(2025, 9, 2, 8, 30, 0).unwrap();
        let payload = StatusPayload::new("dev-1", DeviceStatus::Online, at);

        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["timestamp"], at.timestamp());
        assert_eq!(json["status"], "online");
    }
}
