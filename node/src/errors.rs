use thiserror::Error;

/// Rejections produced by the config store. Everything except `Storage` is a
/// client mistake and maps to a 400 on the control surface.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("EmptyPatch")]
    EmptyPatch,

    #[error("UnknownField: {name}")]
    UnknownField { name: String },

    #[error("InvalidField: {name} ({reason})")]
    InvalidField { name: String, reason: String },

    #[error("Storage fault: {0}")]
    Storage(String),
}

impl ConfigError {
    pub fn invalid(name: &str, reason: impl Into<String>) -> Self {
        ConfigError::InvalidField {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Sensor read fault: {0}")]
    SensorRead(String),

    #[error("Messaging link disconnected: {0}")]
    LinkDisconnected(String),

    #[error("Publish rejected: {0}")]
    Publish(String),

    #[error("Request parse fault: {0}")]
    RequestParse(String),

    #[error("Route not found: {0}")]
    RouteNotFound(String),

    #[error("Method not allowed: {0}")]
    MethodNotAllowed(String),

    #[error("Device state unavailable")]
    StatePoisoned,

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
