//! Configurator settings.
//!
//! Settings are stored in a `.devconf.toml` file:
//!
//! ```toml
//! schema_dir = "assets/schema"
//! root_schema = "device.schema.json"
//! default_group = "attr"
//! device_list_url = "/device/devicelist"
//! device_list_title = "devicelist"
//! preference_file = ".devconf-preferences.json"
//! ```

use std::path::{Path, PathBuf};

use anyhow::Context;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{breadcrumb::Breadcrumb, form::Group};

/// Default name of the settings file.
pub const DEFAULT_CONFIG_PATH: &str = ".devconf.toml";

/// Settings shared by every editing session.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(default)]
pub struct ConfiguratorConfig {
    /// Directory holding the `*.schema.json` documents referenced by `$ref`.
    pub schema_dir: PathBuf,
    /// Schema document describing a whole device.
    pub root_schema: String,
    /// Form group opened when the caller does not pin one.
    pub default_group: Group,
    /// URL of the first breadcrumb.
    pub device_list_url: String,
    /// Title of the first breadcrumb.
    pub device_list_title: String,
    /// File persisting the last saved language configuration.
    pub preference_file: PathBuf,
}

impl Default for ConfiguratorConfig {
    fn default() -> Self {
        Self {
            schema_dir: PathBuf::from("assets/schema"),
            root_schema: "device.schema.json".to_string(),
            default_group: Group::Attribute,
            device_list_url: "/device/devicelist".to_string(),
            device_list_title: "devicelist".to_string(),
            preference_file: PathBuf::from(".devconf-preferences.json"),
        }
    }
}

impl ConfiguratorConfig {
    /// Read settings from a TOML file; a missing file yields the defaults.
    pub async fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("{} not found, using default settings", path.display());
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read {}", path.display()));
            }
        };
        toml::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))
    }

    /// JSON Schema of the settings file.
    pub fn json_schema() -> anyhow::Result<serde_json::Value> {
        let schema = schemars::schema_for!(ConfiguratorConfig);
        Ok(serde_json::to_value(&schema)?)
    }

    /// Breadcrumb preceding every document trail.
    pub fn device_list_breadcrumb(&self) -> Breadcrumb {
        Breadcrumb::fixed(self.device_list_url.clone(), self.device_list_title.clone())
    }
}
