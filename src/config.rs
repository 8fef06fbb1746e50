//! Settings read from an optional `databag.{toml,json,yaml,...}` file next
//! to the working directory, overridden by `DATABAG__*` environment
//! variables, e.g. `DATABAG__PERSISTENCE__MODE=file`.
use config::{Config, Environment, File};
use serde::Deserialize;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::bag_impl::{ConflictPolicy, MergeOptions};
use crate::error::{DataBagError, Result};
use crate::persist::PersistenceMode;

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct PersistenceSettings {
    /// "memory" or "file"
    pub mode: String,
    pub path: String,
}

impl Default for PersistenceSettings {
    fn default() -> Self {
        PersistenceSettings {
            mode: "memory".into(),
            path: "databag.db".into(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct MergeSettings {
    pub data_conflict: ConflictPolicy,
    pub schema_conflict: ConflictPolicy,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub log_filter: String,
    pub persistence: PersistenceSettings,
    pub merge: MergeSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            log_filter: "info".into(),
            persistence: PersistenceSettings::default(),
            merge: MergeSettings::default(),
        }
    }
}

impl Settings {
    /// Reads `databag.*` from the working directory if present, then the
    /// environment.
    pub fn load() -> Result<Settings> {
        Self::load_from("databag")
    }

    /// Like [`Settings::load`] with another file stem or path.
    pub fn load_from(file: &str) -> Result<Settings> {
        let settings = Config::builder()
            .add_source(File::with_name(file).required(false))
            .add_source(Environment::with_prefix("DATABAG").separator("__"))
            .build()?;
        Ok(settings.try_deserialize()?)
    }

    pub fn persistence_mode(&self) -> Result<PersistenceMode> {
        match self.persistence.mode.to_ascii_lowercase().as_str() {
            "memory" | "in_memory" => Ok(PersistenceMode::InMemory),
            "file" => Ok(PersistenceMode::File(self.persistence.path.clone())),
            other => Err(DataBagError::Config(format!(
                "unknown persistence mode '{}', expected memory or file",
                other
            ))),
        }
    }

    pub fn merge_options(&self) -> MergeOptions {
        MergeOptions {
            data_conflict_policy: self.merge.data_conflict,
            schema_conflict_policy: self.merge.schema_conflict,
        }
    }
}

/// Installs a fmt subscriber filtered by `RUST_LOG`, or by the configured
/// filter when that is unset. Later calls leave the first subscriber in place.
pub fn init_tracing(settings: &Settings) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&settings.log_filter)
            .map_err(|e| DataBagError::Config(format!("bad log filter '{}': {}", settings.log_filter, e)))?,
    };
    if tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .is_err()
    {
        tracing::debug!("tracing subscriber already installed");
    }
    Ok(())
}
