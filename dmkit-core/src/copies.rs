//! Resolution of `_copy` records.
//!
//! Copies form a dependency graph: each copy points at one source key. The graph is drained
//! from the plain records outward; whatever is still pending once the worklist runs dry sits
//! on a cycle.

use crate::error::DmkitError;
use crate::modifications;
use crate::raw::{RawRecord, display_key, name_source_key};
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::{debug, warn};

/// How records and copy references are turned into lookup keys.
pub trait KeyScheme {
    /// Key a record is registered under.
    fn record_key(&self, record: &RawRecord) -> Option<String>;

    /// Key of the record a `_copy` object points at.
    fn copy_source_key(&self, copy: &Value) -> Option<String>;
}

/// `name-source`, used by monsters, items and races.
#[derive(Debug, Clone, Copy, Default)]
pub struct NameSourceKey;

impl KeyScheme for NameSourceKey {
    fn record_key(&self, record: &RawRecord) -> Option<String> {
        crate::raw::record_key(record)
    }

    fn copy_source_key(&self, copy: &Value) -> Option<String> {
        let name = copy.get("name")?.as_str()?;
        let source = copy.get("source")?.as_str()?;
        Some(name_source_key(name, source))
    }
}

/// The six-field key subclass features are copied by.
#[derive(Debug, Clone, Copy, Default)]
pub struct SubclassFeatureKey;

const SUBCLASS_FEATURE_FIELDS: [&str; 6] = [
    "name",
    "className",
    "classSource",
    "subclassShortName",
    "subclassSource",
    "level",
];

fn key_part(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn subclass_feature_key(value: &Value) -> Option<String> {
    let parts = SUBCLASS_FEATURE_FIELDS
        .iter()
        .map(|field| value.get(*field).and_then(key_part))
        .collect::<Option<Vec<_>>>()?;
    Some(parts.join("|"))
}

impl KeyScheme for SubclassFeatureKey {
    fn record_key(&self, record: &RawRecord) -> Option<String> {
        SUBCLASS_FEATURE_FIELDS
            .iter()
            .map(|field| record.get(*field).and_then(key_part))
            .collect::<Option<Vec<_>>>()
            .map(|parts| parts.join("|"))
    }

    fn copy_source_key(&self, copy: &Value) -> Option<String> {
        subclass_feature_key(copy)
    }
}

/// A copy that could not be materialized.
#[derive(Debug)]
pub struct CopyFailure {
    pub key: String,
    pub raw: RawRecord,
    pub error: DmkitError,
}

#[derive(Debug, Default)]
pub struct Resolution {
    /// Plain records and materialized copies, in input order.
    pub records: Vec<RawRecord>,
    pub failures: Vec<CopyFailure>,
    pub copies_resolved: usize,
}

pub struct CopyResolver<K> {
    scheme: K,
}

enum Slot {
    Plain(RawRecord),
    Pending { key: String, source: String, raw: RawRecord },
    Done(RawRecord),
    Failed,
}

impl<K: KeyScheme> CopyResolver<K> {
    pub fn new(scheme: K) -> Self {
        Self { scheme }
    }

    pub fn resolve(&self, records: Vec<RawRecord>) -> Resolution {
        let mut resolution = Resolution::default();
        let mut slots: Vec<Slot> = Vec::with_capacity(records.len());
        let mut available: HashMap<String, usize> = HashMap::new();
        let mut copy_keys: HashSet<String> = HashSet::new();

        for record in records {
            let own_key = self
                .scheme
                .record_key(&record)
                .unwrap_or_else(|| display_key(&record));

            let Some(copy) = record.get("_copy") else {
                available.insert(own_key, slots.len());
                slots.push(Slot::Plain(record));
                continue;
            };

            match self.scheme.copy_source_key(copy) {
                Some(source) => {
                    copy_keys.insert(own_key.clone());
                    slots.push(Slot::Pending {
                        key: own_key,
                        source,
                        raw: record,
                    });
                }
                None => {
                    let error = DmkitError::Shape(format!(
                        "'{}' has a _copy without a usable source key: {}",
                        own_key, copy
                    ));
                    resolution.failures.push(CopyFailure {
                        key: own_key,
                        raw: record,
                        error,
                    });
                    slots.push(Slot::Failed);
                }
            }
        }

        // source key -> pending copy slots, in input order
        let mut dependents: HashMap<String, Vec<usize>> = HashMap::new();
        let mut seeds: Vec<String> = Vec::new();
        for (index, slot) in slots.iter_mut().enumerate() {
            let Slot::Pending { key, source, .. } = slot else {
                continue;
            };
            if !available.contains_key(source.as_str()) && !copy_keys.contains(source.as_str()) {
                let error = DmkitError::Lookup(format!(
                    "Unable to copy '{}'; no source record with key '{}'",
                    key, source
                ));
                let Slot::Pending { key, raw, .. } = std::mem::replace(slot, Slot::Failed) else {
                    continue;
                };
                resolution.failures.push(CopyFailure { key, raw, error });
                continue;
            }
            let waiting = dependents.entry(source.clone()).or_default();
            if waiting.is_empty() && available.contains_key(source.as_str()) {
                seeds.push(source.clone());
            }
            waiting.push(index);
        }

        let mut failed_keys: Vec<String> = resolution.failures.iter().map(|f| f.key.clone()).collect();
        let mut ready: VecDeque<String> = seeds.into();

        loop {
            while let Some(source_key) = ready.pop_front() {
                let Some(waiting) = dependents.remove(&source_key) else {
                    continue;
                };
                for index in waiting {
                    let base = match available.get(&source_key).map(|i| &slots[*i]) {
                        Some(Slot::Plain(base)) | Some(Slot::Done(base)) => base.clone(),
                        _ => continue,
                    };
                    let Slot::Pending { key, raw, .. } = std::mem::replace(&mut slots[index], Slot::Failed) else {
                        continue;
                    };
                    match modifications::apply(&base, &raw) {
                        Ok(materialized) => {
                            debug!("Resolved copy '{}' from '{}'", key, source_key);
                            resolution.copies_resolved += 1;
                            slots[index] = Slot::Done(materialized);
                            available.insert(key.clone(), index);
                            ready.push_back(key);
                        }
                        Err(error) => {
                            failed_keys.push(key.clone());
                            resolution.failures.push(CopyFailure { key, raw, error });
                        }
                    }
                }
            }

            // Dependents of failed copies can never resolve.
            let Some(failed) = failed_keys.pop() else {
                break;
            };
            if let Some(waiting) = dependents.remove(&failed) {
                for index in waiting {
                    if let Slot::Pending { key, raw, .. } = std::mem::replace(&mut slots[index], Slot::Failed) {
                        let error = DmkitError::Lookup(format!(
                            "Unable to copy '{}'; source record '{}' failed to resolve",
                            key, failed
                        ));
                        failed_keys.push(key.clone());
                        resolution.failures.push(CopyFailure { key, raw, error });
                    }
                }
            }
        }

        let mut cyclic: Vec<String> = slots
            .iter()
            .filter_map(|slot| match slot {
                Slot::Pending { key, .. } => Some(key.clone()),
                _ => None,
            })
            .collect();
        cyclic.sort();
        if !cyclic.is_empty() {
            warn!("Copy cycle detected among: {}", cyclic.join(", "));
        }

        for slot in slots {
            match slot {
                Slot::Plain(record) | Slot::Done(record) => resolution.records.push(record),
                Slot::Pending { key, source, raw } => {
                    let error = DmkitError::Lookup(format!(
                        "Unable to copy '{}' from '{}'; copy cycle among: {}",
                        key,
                        source,
                        cyclic.join(", ")
                    ));
                    resolution.failures.push(CopyFailure { key, raw, error });
                }
                Slot::Failed => {}
            }
        }

        resolution
    }
}
