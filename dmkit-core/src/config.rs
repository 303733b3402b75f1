//! Conversion settings loaded from TOML.

use crate::error::{DmkitError, Result};
use crate::raw::RawRecord;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonsterConfig {
    /// `name-source` keys skipped in addition to the built-in ignore list.
    pub extra_ignore: Vec<String>,
}

/// Source filter for one entity type. Applied after copy resolution, so filtered records can
/// still serve as copy sources.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceFilter {
    /// Records whose source starts with one of these prefixes are dropped...
    pub skip_source_prefixes: Vec<String>,
    /// ...unless their source is listed here.
    pub keep_sources: Vec<String>,
}

impl SourceFilter {
    pub fn allows(&self, source: &str) -> bool {
        if self.keep_sources.iter().any(|s| s == source) {
            return true;
        }
        !self
            .skip_source_prefixes
            .iter()
            .any(|prefix| source.starts_with(prefix.as_str()))
    }

    /// Records without a source are kept.
    pub fn allows_record(&self, record: &RawRecord) -> bool {
        record
            .get("source")
            .and_then(Value::as_str)
            .is_none_or(|source| self.allows(source))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub monsters: SourceFilter,
    pub races: SourceFilter,
    /// Classes and subclasses. Class and subclass features are never source filtered.
    pub classes: SourceFilter,
    /// Base items, items, item groups and generated variants.
    pub items: SourceFilter,
    /// `edition` values kept for classes, subclasses and magic variants. Records without an
    /// edition are dropped.
    pub editions: Vec<String>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            monsters: SourceFilter::default(),
            races: SourceFilter::default(),
            classes: SourceFilter::default(),
            items: SourceFilter {
                skip_source_prefixes: vec!["X".to_string()],
                keep_sources: vec!["XGE".to_string()],
            },
            editions: vec!["classic".to_string()],
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorPolicy {
    /// Any failed record fails the batch and nothing is written.
    #[default]
    Abort,
    /// Failed records are logged and left out.
    Skip,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub on_error: ErrorPolicy,
    pub parallel: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            on_error: ErrorPolicy::Abort,
            parallel: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvertConfig {
    pub monsters: MonsterConfig,
    pub filters: FilterConfig,
    pub batch: BatchConfig,
}

impl ConvertConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            DmkitError::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to read config from {:?}: {}", path, e),
            ))
        })?;

        Self::from_str(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_str(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| DmkitError::Config(format!("Failed to parse config TOML: {}", e)))
    }
}
