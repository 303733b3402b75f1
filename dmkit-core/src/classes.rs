//! Class normalization.
//!
//! A class document carries four sections: `class`, `subclass`, `classFeature` and
//! `subclassFeature`. Classes and subclasses list their features by reference key; the
//! features themselves may embed further references, resolved through [`FeatureTables`].

use crate::context::{Conversion, ConversionContext, SkipReason};
use crate::copies::{CopyFailure, CopyResolver, SubclassFeatureKey};
use crate::entries::parse_entries;
use crate::error::Result;
use crate::features::{FeatureIndex, FeatureReferenceKey, FeatureTables};
use crate::models::{Class, ClassFeature, Subclass};
use crate::raw::{RawRecord, as_record, display_key, field, field_or_default, record_key, required, str_field};
use crate::values::ability_name;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

/// Feature lookup tables plus the subclasses of every class in the batch.
#[derive(Debug, Clone, Default)]
pub struct ClassCompendium {
    tables: FeatureTables,
    subclasses: Vec<RawRecord>,
}

#[derive(Debug, Default)]
pub struct CompendiumBuild {
    pub compendium: ClassCompendium,
    pub failures: Vec<CopyFailure>,
    pub copies_resolved: usize,
}

fn keyed<F>(records: Vec<RawRecord>, key_of: F, failures: &mut Vec<CopyFailure>) -> Vec<(FeatureReferenceKey, RawRecord)>
where
    F: Fn(&RawRecord) -> Result<FeatureReferenceKey>,
{
    let mut out = Vec::with_capacity(records.len());
    for record in records {
        match key_of(&record) {
            Ok(key) => out.push((key, record)),
            Err(error) => failures.push(CopyFailure {
                key: display_key(&record),
                raw: record,
                error,
            }),
        }
    }
    out
}

impl ClassCompendium {
    /// Resolve subclass feature copies and index every feature. Subclasses outside the
    /// configured editions are dropped here.
    pub fn build(
        class_features: Vec<RawRecord>,
        subclass_features: Vec<RawRecord>,
        subclasses: Vec<RawRecord>,
        ctx: &ConversionContext,
    ) -> CompendiumBuild {
        let resolution = CopyResolver::new(SubclassFeatureKey).resolve(subclass_features);
        let mut failures = resolution.failures;

        let class_index = FeatureIndex::build(keyed(
            class_features,
            FeatureReferenceKey::from_class_feature,
            &mut failures,
        ));
        let subclass_index = FeatureIndex::build(keyed(
            resolution.records,
            FeatureReferenceKey::from_subclass_feature,
            &mut failures,
        ));
        debug!(
            "Indexed {} class and {} subclass feature keys",
            class_index.len(),
            subclass_index.len()
        );

        let subclasses = subclasses
            .into_iter()
            .filter(|subclass| ctx.edition_allowed(subclass))
            .collect();

        CompendiumBuild {
            compendium: ClassCompendium {
                tables: FeatureTables::new(class_index, subclass_index),
                subclasses,
            },
            failures,
            copies_resolved: resolution.copies_resolved,
        }
    }

    pub fn tables(&self) -> &FeatureTables {
        &self.tables
    }

    fn feature(&self, reference: &str, subclass_short_name: Option<&str>) -> Result<ClassFeature> {
        let raw = self.tables.find(reference, subclass_short_name.is_some())?;
        let resolved = self.tables.resolve_references(&Value::Object(raw.clone()))?;
        let resolved = as_record(&resolved, "class feature")?;
        Ok(ClassFeature {
            name: required(resolved, "name")?,
            source: required(resolved, "source")?,
            class_name: required(resolved, "className")?,
            subclass_short_name: subclass_short_name.map(str::to_string),
            level: required(resolved, "level")?,
            entries: match resolved.get("entries") {
                Some(entries) => parse_entries(entries)?,
                None => Vec::new(),
            },
        })
    }

    fn subclasses_of(&self, class_name: &str, class_source: &str) -> Result<Vec<Subclass>> {
        self.subclasses
            .iter()
            .filter(|subclass| {
                str_field(subclass, "className") == Some(class_name)
                    && str_field(subclass, "classSource") == Some(class_source)
            })
            .map(|subclass| -> Result<Subclass> {
                let short_name: String = required(subclass, "shortName")?;
                let references: Vec<String> = field_or_default(subclass, "subclassFeatures")?;
                let features = references
                    .iter()
                    .map(|reference| self.feature(reference, Some(&short_name)))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Subclass {
                    name: required(subclass, "name")?,
                    short_name,
                    source: required(subclass, "source")?,
                    features,
                })
            })
            .collect()
    }
}

#[derive(Deserialize)]
struct HitDice {
    number: u32,
    faces: u32,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawProficiency {
    Plain(String),
    Full {
        full: String,
    },
    Optional {
        proficiency: String,
        #[serde(default)]
        optional: bool,
    },
}

impl RawProficiency {
    fn into_text(self) -> String {
        match self {
            RawProficiency::Plain(text) | RawProficiency::Full { full: text } => text,
            RawProficiency::Optional { proficiency, optional: true } => format!("{} (optional)", proficiency),
            RawProficiency::Optional { proficiency, .. } => proficiency,
        }
    }
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct StartingProficiencies {
    armor: Vec<RawProficiency>,
    weapons: Vec<RawProficiency>,
    tools: Vec<RawProficiency>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum FeatureRef {
    Key(String),
    Detailed {
        #[serde(rename = "classFeature")]
        class_feature: String,
    },
}

impl FeatureRef {
    fn key(&self) -> &str {
        match self {
            FeatureRef::Key(key) => key,
            FeatureRef::Detailed { class_feature } => class_feature,
        }
    }
}

fn texts(items: Vec<RawProficiency>) -> Vec<String> {
    items.into_iter().map(RawProficiency::into_text).collect()
}

pub fn normalize_class(
    record: &RawRecord,
    compendium: &ClassCompendium,
) -> Result<Conversion<Class>> {
    if record.get("isSidekick").and_then(Value::as_bool) == Some(true) {
        return Ok(Conversion::Skipped(SkipReason::Sidekick));
    }

    let name: String = required(record, "name")?;
    let source: String = required(record, "source")?;
    let hd: HitDice = required(record, "hd")?;
    let saving_throws: Vec<String> = field_or_default(record, "proficiency")?;
    let starting: StartingProficiencies = field_or_default(record, "startingProficiencies")?;
    let feature_refs: Vec<FeatureRef> = field_or_default(record, "classFeatures")?;

    let class_features = feature_refs
        .iter()
        .map(|reference| compendium.feature(reference.key(), None))
        .collect::<Result<Vec<_>>>()?;
    let subclasses = compendium.subclasses_of(&name, &source)?;

    let class = Class {
        key: record_key(record).unwrap_or_else(|| display_key(record)),
        page: field(record, "page")?.unwrap_or_default(),
        hit_dice: format!("{}d{}", hd.number, hd.faces),
        saving_throws: saving_throws
            .iter()
            .map(|code| ability_name(code).to_string())
            .collect(),
        spellcasting_ability: field::<String>(record, "spellcastingAbility")?
            .map(|code| ability_name(&code).to_string()),
        caster_progression: field(record, "casterProgression")?,
        subclass_title: field(record, "subclassTitle")?,
        armor_profs: texts(starting.armor),
        weapon_profs: texts(starting.weapons),
        tool_profs: texts(starting.tools),
        class_features,
        subclasses,
        name,
        source,
    };
    Ok(Conversion::Converted(class))
}

/// Classes that fail the edition filter are not normalized at all.
pub fn class_selected(record: &RawRecord, ctx: &ConversionContext) -> bool {
    ctx.edition_allowed(record)
}
