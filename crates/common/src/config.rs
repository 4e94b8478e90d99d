use std::collections::HashMap;
use std::fs;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{FedqError, Result};

/// Normalized backend configuration.
///
/// This is the decoded form of the `WITH` clause of
/// `CREATE SOURCE <name> WITH {"type": "...", "schema": "...", "settings": {...}}`
/// and of every entry in [`EngineConfig::sources`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Schema name; filled from the statement identity when created via CREATE.
    #[serde(default)]
    pub name: String,
    /// Registered source type (`memory`, `parquet`, ...). Mandatory.
    #[serde(rename = "type")]
    pub source_type: String,
    /// Optional parent schema this schema is attached to as a child.
    #[serde(default, rename = "schema", skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    /// Optional allow-list of tables to expose; empty means all.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tables: Vec<String>,
    /// Backend-specific settings.
    #[serde(default)]
    pub settings: HashMap<String, Value>,
}

impl SourceConfig {
    /// Decode a `WITH` clause into a normalized configuration.
    ///
    /// A missing `type` or a clause that does not match the expected shape is
    /// reported verbatim as [`FedqError::InvalidConfig`].
    pub fn from_with_clause(with: &Value) -> Result<Self> {
        if !with.is_object() {
            return Err(FedqError::InvalidConfig(format!(
                "could not convert conf {with}: expected a JSON object"
            )));
        }
        let conf: SourceConfig = serde_json::from_value(with.clone())
            .map_err(|e| FedqError::InvalidConfig(format!("could not convert conf {with}: {e}")))?;
        if conf.source_type.trim().is_empty() {
            return Err(FedqError::InvalidConfig(format!(
                "could not convert conf {with}: source type must not be empty"
            )));
        }
        Ok(conf)
    }

    /// Normalized (lowercase, trimmed) parent schema, if any.
    pub fn parent_schema(&self) -> Option<String> {
        self.parent
            .as_deref()
            .map(|p| p.trim().to_ascii_lowercase())
            .filter(|p| !p.is_empty())
    }

    /// Whether `table` passes the `tables` allow-list.
    pub fn exposes(&self, table: &str) -> bool {
        self.tables.is_empty()
            || self
                .tables
                .iter()
                .any(|t| t.trim().eq_ignore_ascii_case(table))
    }

    /// Fetch a string setting.
    pub fn setting_str(&self, key: &str) -> Option<&str> {
        self.settings.get(key).and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Capacity of every task output channel (the backpressure valve).
    pub channel_capacity: usize,
    /// Target rows per message for operators that build batches.
    pub batch_size_rows: usize,
    /// Schema selected for new sessions.
    #[serde(default)]
    pub default_schema: Option<String>,
    /// Schemas registered at engine start, in order.
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 16,
            batch_size_rows: 1024,
            default_schema: None,
            sources: Vec::new(),
        }
    }
}

impl EngineConfig {
    pub fn load_from_json(path: &str) -> Result<Self> {
        let s = fs::read_to_string(path)?;
        let cfg: EngineConfig =
            serde_json::from_str(&s).map_err(|e| FedqError::InvalidConfig(e.to_string()))?;
        if cfg.channel_capacity == 0 {
            return Err(FedqError::InvalidConfig(
                "channel_capacity must be at least 1".to_string(),
            ));
        }
        Ok(cfg)
    }
}
