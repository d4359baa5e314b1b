use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::{
    logging::LoggingConfig,
    peer::{Offer, DEFAULT_RESOURCE_LIMIT},
    protocol::new_id,
    router::RouterConfig,
};

/// Тип хранилища ресурсов.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Memory,
    File,
}

/// Настройки хранилища.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageSettings {
    pub kind: StorageKind,
    /// Путь к JSON-снимку для `file`.
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutSettings {
    pub default_call_ms: u64,
    pub generator_lifetime_ms: u64,
    pub resend_count: u32,
    pub peer_send_timeout_ms: u64,
}

/// Настройки маршрутизатора.
///
/// Источники по возрастанию приоритета: значения по умолчанию, TOML-файл,
/// переменные окружения `ROUTEX_*` (вложенность через `__`, например
/// `ROUTEX_STORAGE__KIND=file`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub router_id: Option<String>,
    pub storage: StorageSettings,
    pub timeouts: TimeoutSettings,
    #[serde(default)]
    pub meta_offer: Offer,
    #[serde(default)]
    pub logging: LoggingConfig,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl StorageSettings {
    pub fn memory() -> Self {
        Self {
            kind: StorageKind::Memory,
            path: PathBuf::new(),
        }
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            kind: StorageKind::File,
            path: path.into(),
        }
    }
}

impl Settings {
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .set_default("storage.kind", "memory")?
            .set_default("storage.path", "data/routex.json")?
            .set_default("timeouts.default_call_ms", 60_000)?
            .set_default("timeouts.generator_lifetime_ms", 3_600_000)?
            .set_default("timeouts.resend_count", 3)?
            .set_default("timeouts.peer_send_timeout_ms", 5_000)?
            .set_default("meta_offer.registrations_limit", DEFAULT_RESOURCE_LIMIT as u64)?
            .set_default("meta_offer.subscriptions_limit", DEFAULT_RESOURCE_LIMIT as u64)?;

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(true));
        }

        let settings: Self = builder
            .add_source(
                Environment::with_prefix("ROUTEX")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let timeouts = &self.timeouts;
        if timeouts.default_call_ms == 0
            || timeouts.generator_lifetime_ms == 0
            || timeouts.peer_send_timeout_ms == 0
        {
            return Err(ConfigError::Message("timeouts must be positive".into()));
        }
        if self.storage.kind == StorageKind::File && self.storage.path.as_os_str().is_empty() {
            return Err(ConfigError::Message("file storage requires a path".into()));
        }
        self.logging
            .validate()
            .map_err(|e| ConfigError::Message(e.to_string()))
    }

    /// Параметры времени выполнения. Без `router_id` генерируется новый ID.
    pub fn router_config(&self) -> RouterConfig {
        let id = self
            .router_id
            .clone()
            .filter(|id| !id.is_empty())
            .unwrap_or_else(new_id);
        RouterConfig {
            id,
            default_timeout: Duration::from_millis(self.timeouts.default_call_ms),
            generator_lifetime: Duration::from_millis(self.timeouts.generator_lifetime_ms),
            resend_count: self.timeouts.resend_count,
            peer_send_timeout: Duration::from_millis(self.timeouts.peer_send_timeout_ms),
            meta_offer: self.meta_offer,
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
