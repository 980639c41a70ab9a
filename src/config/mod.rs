//! Configuration for GP Sync
//!
//! YAML file with three sections: which external process to probe and with
//! which layouts, the reconciliation tunables, and host command identifiers.
//! Every field has a default, so an empty file is a valid configuration.

pub mod watcher;

use crate::layout::LayoutTable;
use crate::sync::SyncSettings;
use crate::transport::HostCommands;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::info;

pub use watcher::ConfigWatcher;

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub external: ExternalConfig,
    #[serde(default)]
    pub sync: SyncSettings,
    #[serde(default)]
    pub host: HostCommands,
}

/// The application being mirrored
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ExternalConfig {
    /// Executable file name, matched case-insensitively
    #[serde(default = "default_process_name")]
    pub process_name: String,
    /// Force a layout version instead of detecting it from the executable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layout_version: Option<String>,
    /// Extra layout table merged over the built-in one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layouts_file: Option<String>,
}

impl Default for ExternalConfig {
    fn default() -> Self {
        Self {
            process_name: default_process_name(),
            layout_version: None,
            layouts_file: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from file with validation
    pub async fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path))?;

        Self::from_yaml_str(&contents).with_context(|| format!("Invalid config file: {}", path))
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        // serde_yaml rejects an empty document for a struct
        let config: AppConfig = if yaml.trim().is_empty() {
            AppConfig::default()
        } else {
            serde_yaml::from_str(yaml).context("Failed to parse YAML config")?
        };

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub async fn save(&self, path: &str) -> Result<()> {
        let yaml = serde_yaml::to_string(self).context("Failed to serialize config to YAML")?;

        fs::write(path, yaml)
            .await
            .with_context(|| format!("Failed to write config file: {}", path))?;

        Ok(())
    }

    /// Validate configuration for correctness and consistency
    pub fn validate(&self) -> Result<()> {
        if self.external.process_name.trim().is_empty() {
            anyhow::bail!("external.process_name cannot be empty");
        }

        if let Some(version) = &self.external.layout_version {
            if version.trim().is_empty() {
                anyhow::bail!("external.layout_version cannot be empty when set");
            }
        }

        self.sync.validate()?;
        Ok(())
    }

    /// Built-in layouts merged with `external.layouts_file`
    ///
    /// A pinned `layout_version` must exist in the merged table.
    pub async fn layout_table(&self) -> Result<LayoutTable> {
        let mut table = LayoutTable::builtin();

        if let Some(path) = &self.external.layouts_file {
            let extra = LayoutTable::load(path).await?;
            info!("📐 Loaded {} layout(s) from {}", extra.iter().count(), path);
            table.merge(extra);
        }

        if let Some(version) = &self.external.layout_version {
            if table.find(version).is_none() {
                anyhow::bail!("external.layout_version '{}' is not in the layout table", version);
            }
        }

        Ok(table)
    }
}

fn default_process_name() -> String {
    "GuitarPro.exe".to_string()
}
