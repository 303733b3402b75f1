//! Class and subclass feature cross-references.
//!
//! Class data refers to features by pipe-separated keys such as `Rage|Barbarian||1` or
//! `Frenzy|Barbarian|PHB|Berserker|PHB|3`. Upstream omits the source components
//! inconsistently, so every feature is registered under several key variants.

use crate::error::{DmkitError, Result};
use crate::raw::RawRecord;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubclassPart {
    pub short_name: String,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureReferenceKey {
    pub name: String,
    pub class_name: String,
    pub class_source: String,
    pub subclass: Option<SubclassPart>,
    pub level: u32,
    pub aux_source: Option<String>,
}

fn parse_level(part: &str, key: &str) -> Result<u32> {
    part.trim()
        .parse()
        .map_err(|_| DmkitError::Shape(format!("invalid level '{}' in feature key '{}'", part, key)))
}

fn non_empty(part: &str) -> Option<String> {
    (!part.is_empty()).then(|| part.to_string())
}

fn level_of(record: &RawRecord) -> Result<u32> {
    match record.get("level") {
        Some(Value::Number(n)) => n
            .as_u64()
            .and_then(|l| u32::try_from(l).ok())
            .ok_or_else(|| DmkitError::Shape(format!("invalid feature level {}", n))),
        Some(Value::String(s)) => parse_level(s, s),
        _ => Err(DmkitError::MissingField("level".to_string())),
    }
}

fn text_of(record: &RawRecord, field: &str) -> Result<String> {
    record
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| DmkitError::MissingField(field.to_string()))
}

impl FeatureReferenceKey {
    /// Parse a class feature reference: `name|class|classSource|level[|source]`.
    pub fn parse_class(key: &str) -> Result<Self> {
        let parts: Vec<&str> = key.split('|').collect();
        match parts.as_slice() {
            [name, class_name, class_source, level] | [name, class_name, class_source, level, _] => {
                Ok(Self {
                    name: name.to_string(),
                    class_name: class_name.to_string(),
                    class_source: class_source.to_string(),
                    subclass: None,
                    level: parse_level(level, key)?,
                    aux_source: parts.get(4).and_then(|s| non_empty(s)),
                })
            }
            _ => Err(DmkitError::Shape(format!(
                "class feature key '{}' must have 4 or 5 parts",
                key
            ))),
        }
    }

    /// Parse a subclass feature reference:
    /// `name|class|classSource|subclassShortName|subclassSource|level[|source]`.
    pub fn parse_subclass(key: &str) -> Result<Self> {
        let parts: Vec<&str> = key.split('|').collect();
        match parts.as_slice() {
            [name, class_name, class_source, short_name, sub_source, level]
            | [name, class_name, class_source, short_name, sub_source, level, _] => Ok(Self {
                name: name.to_string(),
                class_name: class_name.to_string(),
                class_source: class_source.to_string(),
                subclass: Some(SubclassPart {
                    short_name: short_name.to_string(),
                    source: sub_source.to_string(),
                }),
                level: parse_level(level, key)?,
                aux_source: parts.get(6).and_then(|s| non_empty(s)),
            }),
            _ => Err(DmkitError::Shape(format!(
                "subclass feature key '{}' must have 6 or 7 parts",
                key
            ))),
        }
    }

    /// Key of a `classFeature` record.
    pub fn from_class_feature(record: &RawRecord) -> Result<Self> {
        Ok(Self {
            name: text_of(record, "name")?,
            class_name: text_of(record, "className")?,
            class_source: text_of(record, "classSource")?,
            subclass: None,
            level: level_of(record)?,
            aux_source: record.get("source").and_then(Value::as_str).and_then(non_empty),
        })
    }

    /// Key of a `subclassFeature` record.
    pub fn from_subclass_feature(record: &RawRecord) -> Result<Self> {
        Ok(Self {
            name: text_of(record, "name")?,
            class_name: text_of(record, "className")?,
            class_source: text_of(record, "classSource")?,
            subclass: Some(SubclassPart {
                short_name: text_of(record, "subclassShortName")?,
                source: text_of(record, "subclassSource")?,
            }),
            level: level_of(record)?,
            aux_source: record.get("source").and_then(Value::as_str).and_then(non_empty),
        })
    }

    fn render(&self, class_source: &str, subclass_source: &str, aux: Option<&str>) -> String {
        let mut key = format!("{}|{}|{}", self.name, self.class_name, class_source);
        if let Some(sub) = &self.subclass {
            key.push('|');
            key.push_str(&sub.short_name);
            key.push('|');
            key.push_str(subclass_source);
        }
        key.push('|');
        key.push_str(&self.level.to_string());
        if let Some(aux) = aux {
            key.push('|');
            key.push_str(aux);
        }
        key
    }

    /// The key exactly as written, with and without the trailing source.
    pub fn exact_keys(&self) -> Vec<String> {
        let sub_source = self.subclass.as_ref().map(|s| s.source.as_str()).unwrap_or_default();
        let mut keys = vec![];
        if let Some(aux) = self.aux_source.as_deref() {
            keys.push(self.render(&self.class_source, sub_source, Some(aux)));
        }
        keys.push(self.render(&self.class_source, sub_source, None));
        keys
    }

    /// Every lookup variant, most specific first: the full key, then variants with the class
    /// and subclass sources blanked, each with and without the trailing source.
    pub fn variants(&self) -> Vec<String> {
        let sub_source = self.subclass.as_ref().map(|s| s.source.as_str());
        let class_sources = [self.class_source.as_str(), ""];
        let sub_sources: Vec<&str> = match sub_source {
            Some(source) => vec![source, ""],
            None => vec![""],
        };
        let auxes: Vec<Option<&str>> = match self.aux_source.as_deref() {
            Some(aux) => vec![Some(aux), None],
            None => vec![None],
        };

        let mut keys: Vec<String> = Vec::new();
        for class_source in class_sources {
            for sub in &sub_sources {
                for aux in &auxes {
                    let key = self.render(class_source, sub, *aux);
                    if !keys.contains(&key) {
                        keys.push(key);
                    }
                }
            }
        }
        keys
    }
}

impl fmt::Display for FeatureReferenceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sub_source = self.subclass.as_ref().map(|s| s.source.as_str()).unwrap_or_default();
        f.write_str(&self.render(&self.class_source, sub_source, self.aux_source.as_deref()))
    }
}

/// Features registered under every key variant.
#[derive(Debug, Clone)]
pub struct FeatureIndex<T> {
    entries: HashMap<String, T>,
}

impl<T> Default for FeatureIndex<T> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<T: Clone> FeatureIndex<T> {
    /// Build an index. Exact keys of every feature are registered before any blanked variant,
    /// so a blanked variant never shadows another feature's exact key.
    pub fn build(features: impl IntoIterator<Item = (FeatureReferenceKey, T)>) -> Self {
        let features: Vec<(FeatureReferenceKey, T)> = features.into_iter().collect();
        let mut entries = HashMap::new();
        for (key, feature) in &features {
            for exact in key.exact_keys() {
                entries.insert(exact, feature.clone());
            }
        }
        for (key, feature) in &features {
            for variant in key.variants() {
                entries.entry(variant).or_insert_with(|| feature.clone());
            }
        }
        Self { entries }
    }
}

impl<T> FeatureIndex<T> {
    pub fn get(&self, key: &str) -> Option<&T> {
        self.entries.get(key)
    }

    /// Look a reference up, trying the full key first and then each blanked variant.
    pub fn lookup(&self, key: &FeatureReferenceKey) -> Option<&T> {
        key.variants().iter().find_map(|variant| self.entries.get(variant))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Lookup tables for raw class and subclass features.
#[derive(Debug, Clone, Default)]
pub struct FeatureTables {
    pub class: FeatureIndex<RawRecord>,
    pub subclass: FeatureIndex<RawRecord>,
}

impl FeatureTables {
    pub fn new(class: FeatureIndex<RawRecord>, subclass: FeatureIndex<RawRecord>) -> Self {
        Self { class, subclass }
    }

    /// Find a referenced feature by its raw key string.
    pub fn find(&self, reference: &str, is_subclass: bool) -> Result<&RawRecord> {
        let (key, index) = if is_subclass {
            (FeatureReferenceKey::parse_subclass(reference)?, &self.subclass)
        } else {
            (FeatureReferenceKey::parse_class(reference)?, &self.class)
        };
        index
            .get(reference)
            .or_else(|| index.lookup(&key))
            .ok_or_else(|| DmkitError::Lookup(format!("no feature matches reference '{}'", reference)))
    }

    /// Replace every `refClassFeature`/`refSubclassFeature` node under `value` with the
    /// referenced feature, itself resolved.
    pub fn resolve_references(&self, value: &Value) -> Result<Value> {
        let mut stack = Vec::new();
        self.resolve(value, &mut stack)
    }

    fn resolve(&self, value: &Value, stack: &mut Vec<String>) -> Result<Value> {
        let Value::Object(obj) = value else {
            return Ok(value.clone());
        };

        let reference = match obj.get("type").and_then(Value::as_str) {
            Some("refClassFeature") => Some((obj.get("classFeature"), false)),
            Some("refSubclassFeature") => Some((obj.get("subclassFeature"), true)),
            _ => None,
        };

        if let Some((key, is_subclass)) = reference {
            let key = key.and_then(Value::as_str).ok_or_else(|| {
                DmkitError::Shape(format!("feature reference without a key: {}", value))
            })?;
            if stack.iter().any(|k| k == key) {
                return Err(DmkitError::Lookup(format!(
                    "feature reference cycle: {} -> {}",
                    stack.join(" -> "),
                    key
                )));
            }
            let feature = self.find(key, is_subclass)?;
            stack.push(key.to_string());
            let resolved = self.resolve_children(feature, stack);
            stack.pop();
            return resolved.map(Value::Object);
        }

        self.resolve_children(obj, stack).map(Value::Object)
    }

    fn resolve_children(&self, obj: &RawRecord, stack: &mut Vec<String>) -> Result<RawRecord> {
        let mut out = obj.clone();
        for field in ["entries", "items"] {
            if let Some(Value::Array(children)) = obj.get(field) {
                let resolved = children
                    .iter()
                    .map(|child| self.resolve(child, stack))
                    .collect::<Result<Vec<_>>>()?;
                out.insert(field.to_string(), Value::Array(resolved));
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> RawRecord {
        value.as_object().unwrap().clone()
    }

    fn rage() -> RawRecord {
        record(json!({
            "name": "Rage", "className": "Barbarian", "classSource": "PHB",
            "level": 1, "source": "PHB", "entries": ["You can rage."]
        }))
    }

    #[test]
    fn test_parse_keys() {
        let key = FeatureReferenceKey::parse_class("Rage|Barbarian||1").unwrap();
        assert_eq!(key.class_source, "");
        assert_eq!(key.level, 1);
        assert_eq!(key.aux_source, None);

        let key = FeatureReferenceKey::parse_subclass("Frenzy|Barbarian|PHB|Berserker|PHB|3|PHB").unwrap();
        assert_eq!(key.subclass.as_ref().unwrap().short_name, "Berserker");
        assert_eq!(key.aux_source.as_deref(), Some("PHB"));
        assert_eq!(key.to_string(), "Frenzy|Barbarian|PHB|Berserker|PHB|3|PHB");

        assert!(FeatureReferenceKey::parse_class("Rage|Barbarian").unwrap_err().is_shape());
        assert!(FeatureReferenceKey::parse_class("Rage|Barbarian||one").unwrap_err().is_shape());
        assert!(FeatureReferenceKey::parse_subclass("Rage|Barbarian||1").is_err());
    }

    #[test]
    fn test_variants_most_specific_first() {
        let key = FeatureReferenceKey::from_class_feature(&rage()).unwrap();
        assert_eq!(
            key.variants(),
            vec![
                "Rage|Barbarian|PHB|1|PHB",
                "Rage|Barbarian|PHB|1",
                "Rage|Barbarian||1|PHB",
                "Rage|Barbarian||1",
            ]
        );

        let sub = FeatureReferenceKey::parse_subclass("Frenzy|Barbarian|PHB|Berserker|PHB|3").unwrap();
        assert_eq!(sub.variants().len(), 4);
        assert_eq!(sub.variants()[0], "Frenzy|Barbarian|PHB|Berserker|PHB|3");
        assert_eq!(sub.variants()[3], "Frenzy|Barbarian||Berserker||3");
    }

    #[test]
    fn test_lookup_falls_back_to_blanked_sources() {
        let index = FeatureIndex::build(vec![(
            FeatureReferenceKey::from_class_feature(&rage()).unwrap(),
            "rage",
        )]);
        assert_eq!(index.get("Rage|Barbarian||1"), Some(&"rage"));
        assert_eq!(index.get("Rage|Barbarian|PHB|1|PHB"), Some(&"rage"));

        // Written with a class source the feature was never registered under.
        let reference = FeatureReferenceKey::parse_class("Rage|Barbarian|HB|1").unwrap();
        assert_eq!(index.lookup(&reference), Some(&"rage"));
    }

    #[test]
    fn test_exact_keys_win_over_blanked_variants() {
        let phb = FeatureReferenceKey::parse_class("Rage|Barbarian|PHB|1").unwrap();
        let xphb = FeatureReferenceKey::parse_class("Rage|Barbarian|XPHB|1").unwrap();
        let blanked_first = FeatureReferenceKey::parse_class("Rage|Barbarian||1").unwrap();

        let index = FeatureIndex::build(vec![(phb, "phb"), (blanked_first, "blank"), (xphb, "xphb")]);
        assert!(!index.is_empty());
        assert!(FeatureIndex::<&str>::build(Vec::new()).is_empty());
        assert_eq!(index.get("Rage|Barbarian|PHB|1"), Some(&"phb"));
        assert_eq!(index.get("Rage|Barbarian|XPHB|1"), Some(&"xphb"));
        assert_eq!(index.get("Rage|Barbarian||1"), Some(&"blank"));
    }

    #[test]
    fn test_resolve_nested_references() {
        let rage = rage();
        let reckless = record(json!({
            "name": "Reckless Attack", "className": "Barbarian", "classSource": "PHB",
            "level": 2, "source": "PHB",
            "entries": ["Attack recklessly.", {"type": "refClassFeature", "classFeature": "Rage|Barbarian||1"}]
        }));
        let class = FeatureIndex::build(vec![
            (FeatureReferenceKey::from_class_feature(&rage).unwrap(), rage.clone()),
            (FeatureReferenceKey::from_class_feature(&reckless).unwrap(), reckless.clone()),
        ]);
        let tables = FeatureTables::new(class, FeatureIndex::default());

        let body = json!({
            "type": "entries",
            "entries": [
                {"type": "list", "items": [{"type": "refClassFeature", "classFeature": "Reckless Attack|Barbarian||2"}]}
            ]
        });
        let resolved = tables.resolve_references(&body).unwrap();
        let feature = &resolved["entries"][0]["items"][0];
        assert_eq!(feature["name"], "Reckless Attack");
        assert_eq!(feature["entries"][1]["name"], "Rage");
        assert_eq!(feature["entries"][1]["entries"], json!(["You can rage."]));
    }

    #[test]
    fn test_missing_reference_is_lookup_error() {
        let tables = FeatureTables::default();
        let err = tables
            .resolve_references(&json!({"type": "refClassFeature", "classFeature": "Nope|Wizard||1"}))
            .unwrap_err();
        assert!(err.is_lookup());
        assert!(err.to_string().contains("Nope|Wizard||1"));
    }

    #[test]
    fn test_reference_cycle_is_detected() {
        let a = record(json!({
            "name": "A", "className": "Monk", "classSource": "PHB", "level": 1, "source": "PHB",
            "entries": [{"type": "refClassFeature", "classFeature": "B|Monk||1"}]
        }));
        let b = record(json!({
            "name": "B", "className": "Monk", "classSource": "PHB", "level": 1, "source": "PHB",
            "entries": [{"type": "refClassFeature", "classFeature": "A|Monk||1"}]
        }));
        let class = FeatureIndex::build(vec![
            (FeatureReferenceKey::from_class_feature(&a).unwrap(), a.clone()),
            (FeatureReferenceKey::from_class_feature(&b).unwrap(), b),
        ]);
        let tables = FeatureTables::new(class, FeatureIndex::default());
        let err = tables.resolve_references(&Value::Object(a)).unwrap_err();
        assert!(err.is_lookup());
        assert!(err.to_string().contains("cycle"));
    }
}
