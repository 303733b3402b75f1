//! Per-run conversion state, built once at batch start and shared read-only.

use crate::config::ConvertConfig;
use crate::items::ItemCatalog;
use crate::raw::RawRecord;
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;

/// Known-broken or placeholder monsters, by `name-source` key.
pub const IGNORED_MONSTERS: [&str; 7] = [
    "Elzerina Cassalanter-WDH",
    "Jenks-WDH",
    "Nat-WDH",
    "Squiddly-WDH",
    "Terenzio Cassalanter-WDH",
    "Ougalop-OotA",
    "Shuushar the Awakened-OotA",
];

/// Why a record was deliberately not normalized. Skips are not failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Ignored,
    Summoned,
    UnresolvedCopy,
    Sidekick,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            SkipReason::Ignored => "on the ignore list",
            SkipReason::Summoned => "summoned by a spell or class feature",
            SkipReason::UnresolvedCopy => "still an unresolved copy",
            SkipReason::Sidekick => "sidekick class",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Conversion<T> {
    Converted(T),
    Skipped(SkipReason),
}

impl<T> Conversion<T> {
    pub fn converted(self) -> Option<T> {
        match self {
            Conversion::Converted(value) => Some(value),
            Conversion::Skipped(_) => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConversionContext {
    pub config: ConvertConfig,
    ignored: HashSet<String>,
    pub items: ItemCatalog,
}

impl Default for ConversionContext {
    fn default() -> Self {
        Self::new(ConvertConfig::default())
    }
}

impl ConversionContext {
    pub fn new(config: ConvertConfig) -> Self {
        let ignored = IGNORED_MONSTERS
            .iter()
            .map(|key| key.to_string())
            .chain(config.monsters.extra_ignore.iter().cloned())
            .collect();
        Self {
            config,
            ignored,
            items: ItemCatalog::default(),
        }
    }

    /// A copy of this context carrying an item type/property catalog.
    pub fn with_item_catalog(&self, items: ItemCatalog) -> Self {
        Self {
            config: self.config.clone(),
            ignored: self.ignored.clone(),
            items,
        }
    }

    pub fn is_ignored(&self, key: &str) -> bool {
        self.ignored.contains(key)
    }

    /// Whether a record passes the edition filter. Records without an edition never pass.
    pub fn edition_allowed(&self, record: &RawRecord) -> bool {
        record
            .get("edition")
            .and_then(Value::as_str)
            .is_some_and(|edition| self.config.filters.editions.iter().any(|e| e == edition))
    }
}
