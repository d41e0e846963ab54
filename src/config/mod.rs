//! Server configuration
//!
//! Layered: built-in defaults, then an optional TOML file (`oversight.toml`,
//! or the path in `OVERSIGHT_CONFIG`), then `OVERSIGHT__*` environment
//! variables with `__` separating nested keys.

pub mod loader;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::Result;
use crate::workflow::policy::{ApprovalPolicy, TierOverride};
use loader::PolicyFile;

pub const DEFAULT_CONFIG_FILE: &str = "oversight.toml";
pub const CONFIG_PATH_ENV: &str = "OVERSIGHT_CONFIG";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum StorageConfig {
    Memory,
    Sqlite { database_url: String },
    /// JSON-lines ledger file; approval requests stay in memory.
    Jsonl { ledger_path: PathBuf },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server_host: String,
    pub server_port: u16,
    pub storage: StorageConfig,
    #[serde(default)]
    pub policy_file: Option<PathBuf>,
    #[serde(default)]
    pub approval_policy: BTreeMap<String, TierOverride>,
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        Self::load_from(Path::new(&path))
    }

    /// Load with `path` as the (optional) file layer.
    pub fn load_from(path: &Path) -> Result<Self> {
        let config = Config::builder()
            .set_default("server_host", "0.0.0.0")?
            .set_default("server_port", 3000)?
            .set_default("storage.backend", "memory")?
            .add_source(File::from(path).required(false))
            .add_source(
                Environment::with_prefix("OVERSIGHT")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let app_config: AppConfig = config.try_deserialize()?;
        info!(
            "Configuration loaded ({}:{}, storage {:?})",
            app_config.server_host, app_config.server_port, app_config.storage
        );
        Ok(app_config)
    }

    /// Built-in table, then the policy file, then inline overrides.
    pub fn resolve_policy(&self) -> Result<ApprovalPolicy> {
        let mut policy = ApprovalPolicy::default();
        if let Some(path) = &self.policy_file {
            policy = PolicyFile::load(path)?.apply_to(policy)?;
        }
        policy.apply_overrides(&self.approval_policy)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }
}
