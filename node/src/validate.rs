use crate::errors::ConfigError;
use crate::model::DeviceConfig;
use serde_json::{Map, Value};

const DEVICE_ID_MAX_LEN: usize = 64;
const HOSTNAME_MAX_LEN: usize = 253;
const TEXT_MAX_LEN: usize = 128;
const SAMPLE_INTERVAL_MIN: u64 = 1;
const SAMPLE_INTERVAL_MAX: u64 = 86_400;

/// GPIOs exposed on the Pico W header. GP23..=GP25 drive the radio module.
const USABLE_PINS: [std::ops::RangeInclusive<u8>; 2] = [0..=22, 26..=28];

/// Field names accepted by `POST /config`, in response order.
pub const FIELDS: [&str; 9] = [
    "device_id",
    "display_name",
    "location",
    "mqtt_broker",
    "mqtt_port",
    "mqtt_user",
    "mqtt_password",
    "sample_interval_seconds",
    "sensor_pin",
];

/// A validated partial update. Only fields present in the request are `Some`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigPatch {
    pub device_id: Option<String>,
    pub display_name: Option<String>,
    pub location: Option<String>,
    pub broker_host: Option<String>,
    pub broker_port: Option<u16>,
    pub broker_user: Option<String>,
    pub broker_password: Option<String>,
    pub sample_interval_seconds: Option<u32>,
    pub sensor_pin: Option<u8>,
}

impl ConfigPatch {
    /// Validates every field of a raw JSON object. Nothing is returned unless
    /// the whole object is acceptable.
    pub fn from_json(raw: &Map<String, Value>) -> Result<Self, ConfigError> {
        if raw.is_empty() {
            return Err(ConfigError::EmptyPatch);
        }

        if let Some(name) = raw.keys().find(|k| !FIELDS.contains(&k.as_str())) {
            return Err(ConfigError::UnknownField { name: name.clone() });
        }

        let mut patch = ConfigPatch::default();
        for (name, value) in raw {
            match name.as_str() {
                "device_id" => patch.device_id = Some(device_id(name, value)?),
                "display_name" => patch.display_name = Some(text(name, value)?),
                "location" => patch.location = Some(text(name, value)?),
                "mqtt_broker" => patch.broker_host = Some(hostname(name, value)?),
                "mqtt_port" => patch.broker_port = Some(port(name, value)?),
                "mqtt_user" => patch.broker_user = Some(text(name, value)?),
                "mqtt_password" => patch.broker_password = Some(text(name, value)?),
                "sample_interval_seconds" => {
                    patch.sample_interval_seconds = Some(sample_interval(name, value)?)
                }
                "sensor_pin" => patch.sensor_pin = Some(sensor_pin(name, value)?),
                other => {
                    return Err(ConfigError::UnknownField {
                        name: other.to_string(),
                    })
                }
            }
        }

        Ok(patch)
    }

    /// Names of the fields carried by this patch, in [`FIELDS`] order.
    pub fn field_names(&self) -> Vec<String> {
        let present = [
            self.device_id.is_some(),
            self.display_name.is_some(),
            self.location.is_some(),
            self.broker_host.is_some(),
            self.broker_port.is_some(),
            self.broker_user.is_some(),
            self.broker_password.is_some(),
            self.sample_interval_seconds.is_some(),
            self.sensor_pin.is_some(),
        ];

        FIELDS
            .iter()
            .zip(present)
            .filter(|(_, present)| *present)
            .map(|(name, _)| name.to_string())
            .collect()
    }

    /// Returns `base` with the patched fields replaced.
    pub fn merged_into(&self, base: &DeviceConfig) -> DeviceConfig {
        let mut merged = base.clone();
        if let Some(v) = &self.device_id {
            merged.device_id = v.clone();
        }
        if let Some(v) = &self.display_name {
            merged.display_name = v.clone();
        }
        if let Some(v) = &self.location {
            merged.location = v.clone();
        }
        if let Some(v) = &self.broker_host {
            merged.broker_host = v.clone();
        }
        if let Some(v) = self.broker_port {
            merged.broker_port = v;
        }
        if let Some(v) = &self.broker_user {
            merged.broker_user = v.clone();
        }
        if let Some(v) = &self.broker_password {
            merged.broker_password = v.clone();
        }
        if let Some(v) = self.sample_interval_seconds {
            merged.sample_interval_seconds = v;
        }
        if let Some(v) = self.sensor_pin {
            merged.sensor_pin = v;
        }
        merged
    }
}

/// Validates a complete config, e.g. one read back from storage at boot.
pub fn validate_config(config: &DeviceConfig) -> Result<(), ConfigError> {
    check_device_id("device_id", &config.device_id)?;
    check_text("display_name", &config.display_name)?;
    check_text("location", &config.location)?;
    check_hostname("mqtt_broker", &config.broker_host)?;
    if config.broker_port == 0 {
        return Err(ConfigError::invalid("mqtt_port", "must be between 1 and 65535"));
    }
    check_text("mqtt_user", &config.broker_user)?;
    check_text("mqtt_password", &config.broker_password)?;
    check_sample_interval("sample_interval_seconds", u64::from(config.sample_interval_seconds))?;
    check_sensor_pin("sensor_pin", u64::from(config.sensor_pin))?;
    Ok(())
}

fn as_str<'a>(name: &str, value: &'a Value) -> Result<&'a str, ConfigError> {
    value
        .as_str()
        .ok_or_else(|| ConfigError::invalid(name, "must be a string"))
}

fn as_integer(name: &str, value: &Value) -> Result<u64, ConfigError> {
    value
        .as_u64()
        .ok_or_else(|| ConfigError::invalid(name, "must be a non-negative integer"))
}

fn device_id(name: &str, value: &Value) -> Result<String, ConfigError> {
    let id = as_str(name, value)?;
    check_device_id(name, id)?;
    Ok(id.to_string())
}

fn text(name: &str, value: &Value) -> Result<String, ConfigError> {
    let text = as_str(name, value)?;
    check_text(name, text)?;
    Ok(text.to_string())
}

fn hostname(name: &str, value: &Value) -> Result<String, ConfigError> {
    let host = as_str(name, value)?;
    check_hostname(name, host)?;
    Ok(host.to_string())
}

fn port(name: &str, value: &Value) -> Result<u16, ConfigError> {
    let port = as_integer(name, value)?;
    match u16::try_from(port) {
        Ok(port) if port >= 1 => Ok(port),
        _ => Err(ConfigError::invalid(name, "must be between 1 and 65535")),
    }
}

fn sample_interval(name: &str, value: &Value) -> Result<u32, ConfigError> {
    let seconds = as_integer(name, value)?;
    check_sample_interval(name, seconds)?;
    Ok(seconds as u32)
}

fn sensor_pin(name: &str, value: &Value) -> Result<u8, ConfigError> {
    let pin = as_integer(name, value)?;
    check_sensor_pin(name, pin)?;
    Ok(pin as u8)
}

fn check_device_id(name: &str, id: &str) -> Result<(), ConfigError> {
    if id.trim().is_empty() {
        return Err(ConfigError::invalid(name, "cannot be empty"));
    }
    if id.chars().count() > DEVICE_ID_MAX_LEN {
        return Err(ConfigError::invalid(
            name,
            format!("longer than {} characters", DEVICE_ID_MAX_LEN),
        ));
    }
    if id.contains(['/', '+', '#']) {
        return Err(ConfigError::invalid(name, "cannot contain '/', '+' or '#'"));
    }
    Ok(())
}

fn check_text(name: &str, text: &str) -> Result<(), ConfigError> {
    if text.chars().count() > TEXT_MAX_LEN {
        return Err(ConfigError::invalid(
            name,
            format!("longer than {} characters", TEXT_MAX_LEN),
        ));
    }
    Ok(())
}

fn check_hostname(name: &str, host: &str) -> Result<(), ConfigError> {
    if host.is_empty() {
        return Err(ConfigError::invalid(name, "cannot be empty"));
    }
    if host.len() > HOSTNAME_MAX_LEN {
        return Err(ConfigError::invalid(
            name,
            format!("longer than {} characters", HOSTNAME_MAX_LEN),
        ));
    }
    let allowed = |c: char| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | ':' | '_');
    if !host.chars().all(allowed) {
        return Err(ConfigError::invalid(name, "is not a hostname or IP address"));
    }
    Ok(())
}

fn check_sample_interval(name: &str, seconds: u64) -> Result<(), ConfigError> {
    if !(SAMPLE_INTERVAL_MIN..=SAMPLE_INTERVAL_MAX).contains(&seconds) {
        return Err(ConfigError::invalid(
            name,
            format!(
                "must be between {} and {}",
                SAMPLE_INTERVAL_MIN, SAMPLE_INTERVAL_MAX
            ),
        ));
    }
    Ok(())
}

fn check_sensor_pin(name: &str, pin: u64) -> Result<(), ConfigError> {
    let usable = u8::try_from(pin)
        .map(|pin| USABLE_PINS.iter().any(|range| range.contains(&pin)))
        .unwrap_or(false);
    if !usable {
        return Err(ConfigError::invalid(
            name,
            format!("GP{} is not a usable GPIO (GP0-GP22, GP26-GP28)", pin),
        ));
    }
    Ok(())
}
