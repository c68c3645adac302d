use crate::errors::ConfigError;
use crate::model::{DeviceConfig, PublicConfig};
use crate::validate::{validate_config, ConfigPatch};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Durable home of the device config. Single writer: the [`ConfigStore`].
pub trait Storage: Send {
    fn load(&self) -> Result<Option<DeviceConfig>, ConfigError>;
    fn save(&mut self, config: &DeviceConfig) -> Result<(), ConfigError>;
}

/// Settings file in TOML, replaced atomically on every save.
#[derive(Debug, Clone)]
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl Storage for FileStorage {
    fn load(&self) -> Result<Option<DeviceConfig>, ConfigError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ConfigError::Storage(e.to_string())),
        };

        toml::from_str(&raw)
            .map(Some)
            .map_err(|e| ConfigError::Storage(format!("{}: {}", self.path.display(), e)))
    }

    fn save(&mut self, config: &DeviceConfig) -> Result<(), ConfigError> {
        let body =
            toml::to_string_pretty(config).map_err(|e| ConfigError::Storage(e.to_string()))?;
        let contents = format!("# sensor-node settings, written on every config change\n\n{}", body);

        let temp = self.temp_path();
        fs::write(&temp, contents).map_err(|e| ConfigError::Storage(e.to_string()))?;
        fs::rename(&temp, &self.path).map_err(|e| ConfigError::Storage(e.to_string()))?;

        debug!("Settings written to {}", self.path.display());
        Ok(())
    }
}

#[derive(Debug, Default)]
struct MemoryInner {
    saved: Option<DeviceConfig>,
    fail_writes: bool,
    writes: usize,
}

/// In-memory storage. Clones share the same backing slot, which outlives a
/// restart of the runtime that owns one of them.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryStorage {
    pub fn with_config(config: DeviceConfig) -> Self {
        let storage = Self::default();
        storage.lock().saved = Some(config);
        storage
    }

    pub fn saved(&self) -> Option<DeviceConfig> {
        self.lock().saved.clone()
    }

    pub fn writes(&self) -> usize {
        self.lock().writes
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.lock().fail_writes = fail;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryInner> {
        // a panic while holding this lock cannot leave the slot half-written
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Storage for MemoryStorage {
    fn load(&self) -> Result<Option<DeviceConfig>, ConfigError> {
        Ok(self.lock().saved.clone())
    }

    fn save(&mut self, config: &DeviceConfig) -> Result<(), ConfigError> {
        let mut inner = self.lock();
        if inner.fail_writes {
            return Err(ConfigError::Storage("write rejected".to_string()));
        }
        inner.saved = Some(config.clone());
        inner.writes += 1;
        Ok(())
    }
}

/// Values supplied outside the versioned settings.
#[derive(Debug, Clone, Default)]
pub struct Secrets {
    pub broker_password: Option<String>,
}

/// One-shot restart request. Armed by a successful update and never cleared;
/// the restart itself discards it.
#[derive(Debug, Clone, Copy, Default)]
pub struct PendingRestart {
    armed_at: Option<Instant>,
}

impl PendingRestart {
    pub fn arm(&mut self, now: Instant) {
        if self.armed_at.is_none() {
            self.armed_at = Some(now);
        }
    }

    pub fn is_armed(&self) -> bool {
        self.armed_at.is_some()
    }

    pub fn is_due(&self, now: Instant, grace: Duration) -> bool {
        self.armed_at
            .is_some_and(|armed_at| now.saturating_duration_since(armed_at) >= grace)
    }
}

/// Owner of the device config. Every mutation goes through [`ConfigStore::update`].
pub struct ConfigStore {
    config: DeviceConfig,
    storage: Box<dyn Storage>,
    secrets: Secrets,
    restart: PendingRestart,
}

impl ConfigStore {
    /// Loads the persisted config, seeding storage with defaults on first boot.
    /// Unreadable or invalid settings fall back to the defaults without
    /// touching storage, so the device still boots and can be reconfigured.
    pub fn load(storage: Box<dyn Storage>, secrets: &Secrets) -> Self {
        let mut storage = storage;
        let config = match storage.load() {
            Ok(Some(config)) => match validate_config(&config) {
                Ok(()) => {
                    info!("Loaded configuration for {}", config.device_id);
                    config
                }
                Err(e) => {
                    error!("Stored configuration rejected ({}), using defaults", e);
                    DeviceConfig::default()
                }
            },
            Ok(None) => {
                let config = DeviceConfig::default();
                info!("No stored configuration, writing defaults");
                if let Err(e) = storage.save(&config) {
                    warn!("Could not persist default configuration: {}", e);
                }
                config
            }
            Err(e) => {
                error!("Failed to read stored configuration ({}), using defaults", e);
                DeviceConfig::default()
            }
        };

        let mut store = Self::with_config(config, storage);
        store.secrets = secrets.clone();
        store
    }

    pub fn with_config(config: DeviceConfig, storage: Box<dyn Storage>) -> Self {
        Self {
            config,
            storage,
            secrets: Secrets::default(),
            restart: PendingRestart::default(),
        }
    }

    /// The config as persisted. Out-of-band secrets are not part of it.
    pub fn get(&self) -> &DeviceConfig {
        &self.config
    }

    /// Config for opening the broker session: the persisted password wins,
    /// an empty one is filled from [`Secrets`].
    pub fn session_config(&self) -> DeviceConfig {
        let mut config = self.config.clone();
        if config.broker_password.is_empty() {
            if let Some(password) = &self.secrets.broker_password {
                config.broker_password = password.clone();
            }
        }
        config
    }

    pub fn public(&self) -> PublicConfig<'_> {
        self.config.public()
    }

    pub fn pending_restart(&self) -> PendingRestart {
        self.restart
    }

    /// Applies a patch atomically: validate, persist, then commit in memory.
    /// Returns the names of the fields carried by the patch.
    pub fn update(
        &mut self,
        raw: &Map<String, Value>,
        now: Instant,
    ) -> Result<Vec<String>, ConfigError> {
        let patch = ConfigPatch::from_json(raw)?;
        let candidate = patch.merged_into(&self.config);

        if let Err(e) = self.storage.save(&candidate) {
            warn!("Config update not applied, storage failed: {}", e);
            return Err(e);
        }

        self.config = candidate;
        self.restart.arm(now);

        let fields = patch.field_names();
        info!("Configuration updated: {}", fields.join(", "));
        Ok(fields)
    }
}
