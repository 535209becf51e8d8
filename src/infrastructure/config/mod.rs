use crate::domain::error::{AppError, Result};
use crate::domain::template::LoadStrategy;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const CONFIG_FILE: &str = "liftforms.toml";
pub const ENV_PREFIX: &str = "LIFTFORMS_";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TemplatesConfig {
    /// Templates shipped with the installation.
    pub bundled_dir: PathBuf,
    pub cache_dir: PathBuf,
    /// Registry document; relative paths resolve against `bundled_dir`.
    pub registry_path: PathBuf,
    pub load_strategy: LoadStrategy,
    pub cache_enabled: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Http,
    Local,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub base_url: String,
    pub bucket: String,
    pub api_key: Option<String>,
    pub local_root: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatabaseConfig {
    /// Postgres URL of the template metadata table. Unset disables the remote tier.
    pub metadata_url: Option<String>,
    pub drafts_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RendererConfig {
    pub soffice_bin: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    pub filter: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub templates: TemplatesConfig,
    pub storage: StorageConfig,
    pub database: DatabaseConfig,
    pub renderer: RendererConfig,
    pub logging: LoggingConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            templates: TemplatesConfig {
                bundled_dir: PathBuf::from("templates"),
                cache_dir: PathBuf::from("data/template-cache"),
                registry_path: PathBuf::from("template-registry.json"),
                load_strategy: LoadStrategy::LocalFirst,
                cache_enabled: true,
            },
            storage: StorageConfig {
                backend: StorageBackend::Local,
                base_url: "http://localhost:54321".to_string(),
                bucket: "templates".to_string(),
                api_key: None,
                local_root: PathBuf::from("data/storage"),
            },
            database: DatabaseConfig {
                metadata_url: None,
                drafts_path: PathBuf::from("data/drafts.db"),
            },
            renderer: RendererConfig {
                soffice_bin: "soffice".to_string(),
            },
            logging: LoggingConfig {
                filter: "info".to_string(),
            },
        }
    }
}

impl AppConfig {
    /// Defaults, then `liftforms.toml`, then `LIFTFORMS_*` variables
    /// (`LIFTFORMS_SERVER__PORT=9000`).
    pub fn load() -> Result<Self> {
        let _ = dotenvy::dotenv();
        Self::figment(CONFIG_FILE)
            .extract()
            .map_err(|e| AppError::ConfigurationError(format!("Invalid configuration: {}", e)))
    }

    pub fn figment(config_file: &str) -> Figment {
        Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(config_file))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    pub fn registry_file(&self) -> PathBuf {
        if self.templates.registry_path.is_absolute() {
            self.templates.registry_path.clone()
        } else {
            self.templates.bundled_dir.join(&self.templates.registry_path)
        }
    }

    pub fn bind_address(&self) -> (String, u16) {
        (self.server.host.clone(), self.server.port)
    }
}
