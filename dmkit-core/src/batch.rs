//! Batch pipelines: load raw documents, resolve copies, normalize, write canonical output.

use crate::classes::{ClassCompendium, class_selected, normalize_class};
use crate::config::{ErrorPolicy, SourceFilter};
use crate::context::{Conversion, ConversionContext};
use crate::copies::{CopyFailure, CopyResolver, NameSourceKey};
use crate::error::{DmkitError, Result};
use crate::file_utils::{expand_json_paths, read_json, write_json_pretty};
use crate::items::{ItemCatalog, generate_variants, normalize_item};
use crate::models::CanonicalEntity;
use crate::monsters::normalize_monster;
use crate::races::normalize_race;
use crate::raw::{RawRecord, display_key, record_key};
use rayon::prelude::*;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

/// One input file, split into its named sections.
#[derive(Debug, Clone)]
pub struct Document {
    pub path: PathBuf,
    pub sections: RawRecord,
}

impl Document {
    /// Records of one section. Non-object records are a shape error naming the file.
    pub fn section(&self, name: &str) -> Result<Vec<RawRecord>> {
        match self.sections.get(name) {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| {
                    item.as_object().cloned().ok_or_else(|| {
                        DmkitError::Shape(format!(
                            "{}: '{}' holds a non-object record: {}",
                            self.path.display(),
                            name,
                            item
                        ))
                    })
                })
                .collect(),
            Some(other) => Err(DmkitError::Shape(format!(
                "{}: section '{}' must be a list, got {}",
                self.path.display(),
                name,
                other
            ))),
        }
    }
}

/// Load every JSON file named by `paths` (directories are searched recursively). A file holding
/// a bare array is read as the `default_section` section.
pub fn load_documents(paths: &[PathBuf], default_section: &str) -> Result<Vec<Document>> {
    let files = expand_json_paths(paths)?;
    tracing::info!("Found {} input file(s)", files.len());

    files
        .into_iter()
        .map(|path| {
            let sections = match read_json(&path)? {
                Value::Object(sections) => sections,
                Value::Array(records) => {
                    let mut sections = RawRecord::new();
                    sections.insert(default_section.to_string(), Value::Array(records));
                    sections
                }
                other => {
                    return Err(DmkitError::Shape(format!(
                        "{}: expected an object or array, got {}",
                        path.display(),
                        other
                    )));
                }
            };
            Ok(Document { path, sections })
        })
        .collect()
}

fn gather(documents: &[Document], section: &str) -> Result<Vec<RawRecord>> {
    let mut records = Vec::new();
    for document in documents {
        records.extend(document.section(section)?);
    }
    Ok(records)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchStats {
    pub read: usize,
    pub filtered: usize,
    pub copies_resolved: usize,
    pub converted: usize,
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Default)]
pub struct BatchOutput {
    pub entities: Vec<CanonicalEntity>,
    pub stats: BatchStats,
}

enum Outcome {
    Converted(CanonicalEntity),
    Skipped,
    Failed,
}

/// Normalize records independently, in parallel when configured.
fn normalize_all<T, F>(records: &[RawRecord], ctx: &ConversionContext, convert: F) -> Vec<Outcome>
where
    T: Into<CanonicalEntity> + Send,
    F: Fn(&RawRecord) -> Result<Conversion<T>> + Sync + Send,
{
    let run = |record: &RawRecord| match convert(record) {
        Ok(Conversion::Converted(entity)) => Outcome::Converted(entity.into()),
        Ok(Conversion::Skipped(reason)) => {
            tracing::debug!("Skipping '{}': {}", display_key(record), reason);
            Outcome::Skipped
        }
        Err(error) => {
            let error =
                DmkitError::for_record(display_key(record), &Value::Object(record.clone()), error);
            tracing::error!("{}", error);
            Outcome::Failed
        }
    };

    if ctx.config.batch.parallel {
        records.par_iter().map(run).collect()
    } else {
        records.iter().map(run).collect()
    }
}

fn log_failures(failures: Vec<CopyFailure>) -> usize {
    let count = failures.len();
    for failure in failures {
        let error = DmkitError::for_record(failure.key, &Value::Object(failure.raw), failure.error);
        tracing::error!("{}", error);
    }
    count
}

/// Apply the error policy and sort the survivors by key.
fn finish(
    entity: &'static str,
    mut stats: BatchStats,
    outcomes: Vec<Outcome>,
    ctx: &ConversionContext,
) -> Result<BatchOutput> {
    let mut entities = Vec::with_capacity(outcomes.len());
    for outcome in outcomes {
        match outcome {
            Outcome::Converted(converted) => entities.push(converted),
            Outcome::Skipped => stats.skipped += 1,
            Outcome::Failed => stats.failed += 1,
        }
    }
    stats.converted = entities.len();

    tracing::info!(
        "{}: read {}, filtered {}, copies resolved {}, converted {}, skipped {}, failed {}",
        entity,
        stats.read,
        stats.filtered,
        stats.copies_resolved,
        stats.converted,
        stats.skipped,
        stats.failed
    );

    if stats.failed > 0 {
        let total = stats.converted + stats.skipped + stats.failed;
        match ctx.config.batch.on_error {
            ErrorPolicy::Abort => {
                return Err(DmkitError::Batch {
                    entity,
                    failed: stats.failed,
                    total,
                });
            }
            ErrorPolicy::Skip => {
                tracing::warn!("Leaving {} failed {} record(s) out of the output", stats.failed, entity);
            }
        }
    }

    entities.sort_by(|a, b| a.key().cmp(b.key()));
    Ok(BatchOutput { entities, stats })
}

fn source_filter(records: Vec<RawRecord>, filter: &SourceFilter, stats: &mut BatchStats) -> Vec<RawRecord> {
    let before = records.len();
    let kept: Vec<RawRecord> = records.into_iter().filter(|r| filter.allows_record(r)).collect();
    stats.filtered += before - kept.len();
    kept
}

/// Copy failures of records the source filter drops anyway do not count against the batch.
fn kept_failures(failures: Vec<CopyFailure>, filter: &SourceFilter, stats: &mut BatchStats) -> Vec<CopyFailure> {
    let (kept, dropped): (Vec<CopyFailure>, Vec<CopyFailure>) =
        failures.into_iter().partition(|f| filter.allows_record(&f.raw));
    for failure in &dropped {
        tracing::debug!("Ignoring filtered record '{}': {}", failure.key, failure.error);
    }
    stats.filtered += dropped.len();
    kept
}

/// Resolve copies over every gathered record, then apply the source filter to the results.
fn resolve_then_filter(records: Vec<RawRecord>, filter: &SourceFilter, stats: &mut BatchStats) -> Vec<RawRecord> {
    let resolution = CopyResolver::new(NameSourceKey).resolve(records);
    stats.copies_resolved += resolution.copies_resolved;
    let failures = kept_failures(resolution.failures, filter, stats);
    stats.failed += log_failures(failures);
    source_filter(resolution.records, filter, stats)
}

pub fn convert_monsters(documents: &[Document], ctx: &ConversionContext) -> Result<BatchOutput> {
    let records = gather(documents, "monster")?;
    let mut stats = BatchStats {
        read: records.len(),
        ..Default::default()
    };
    let records = resolve_then_filter(records, &ctx.config.filters.monsters, &mut stats);

    let outcomes = normalize_all(&records, ctx, |record| normalize_monster(record, ctx));
    finish("monster", stats, outcomes, ctx)
}

pub fn convert_races(documents: &[Document], ctx: &ConversionContext) -> Result<BatchOutput> {
    let records = gather(documents, "race")?;
    let mut stats = BatchStats {
        read: records.len(),
        ..Default::default()
    };
    let records = resolve_then_filter(records, &ctx.config.filters.races, &mut stats);

    let outcomes = normalize_all(&records, ctx, normalize_race);
    finish("race", stats, outcomes, ctx)
}

/// Items, base items, magic variants and item groups. Item types and properties found in the
/// same documents name the codes used by items.
pub fn convert_items(documents: &[Document], ctx: &ConversionContext) -> Result<BatchOutput> {
    let catalog = ItemCatalog::from_records(
        &gather(documents, "itemType")?,
        &gather(documents, "itemProperty")?,
    );
    let ctx = ctx.with_item_catalog(catalog);

    let bases = gather(documents, "baseitem")?;
    let items = gather(documents, "item")?;
    let variants = gather(documents, "magicvariant")?;
    let groups = gather(documents, "itemGroup")?;
    let mut stats = BatchStats {
        read: bases.len() + items.len() + variants.len() + groups.len(),
        ..Default::default()
    };

    let filter = &ctx.config.filters.items;
    let base_keys: HashSet<String> = bases.iter().filter_map(record_key).collect();
    let mut records = bases;
    records.extend(items);
    let mut records = resolve_then_filter(records, filter, &mut stats);
    let groups = source_filter(groups, filter, &mut stats);

    let resolved_bases: Vec<RawRecord> = records
        .iter()
        .filter(|r| record_key(r).is_some_and(|key| base_keys.contains(&key)))
        .cloned()
        .collect();
    let expansion = generate_variants(&resolved_bases, &variants, &groups, &ctx);
    stats.failed += log_failures(expansion.failures);

    let mut known: HashSet<String> = records.iter().filter_map(record_key).collect();
    for generated in expansion.items {
        if !filter.allows_record(&generated) {
            stats.filtered += 1;
            continue;
        }
        match record_key(&generated) {
            Some(key) if !known.insert(key.clone()) => {
                tracing::debug!("Generated item '{}' already exists; keeping the listed one", key);
            }
            _ => records.push(generated),
        }
    }

    let outcomes = normalize_all(&records, &ctx, |record| normalize_item(record, &ctx));
    finish("item", stats, outcomes, &ctx)
}

/// Classes from one or more class documents. Sections are merged across documents so features
/// may live in a different file than the class that references them.
pub fn convert_classes(documents: &[Document], ctx: &ConversionContext) -> Result<BatchOutput> {
    let classes = gather(documents, "class")?;
    let subclasses = gather(documents, "subclass")?;
    let class_features = gather(documents, "classFeature")?;
    let subclass_features = gather(documents, "subclassFeature")?;
    let mut stats = BatchStats {
        read: classes.len() + subclasses.len() + class_features.len() + subclass_features.len(),
        ..Default::default()
    };

    let filter = &ctx.config.filters.classes;
    let classes = source_filter(classes, filter, &mut stats);
    let before = classes.len();
    let classes: Vec<RawRecord> = classes.into_iter().filter(|c| class_selected(c, ctx)).collect();
    stats.filtered += before - classes.len();

    let built = ClassCompendium::build(
        class_features,
        subclass_features,
        source_filter(subclasses, filter, &mut stats),
        ctx,
    );
    stats.copies_resolved = built.copies_resolved;
    stats.failed += log_failures(built.failures);

    let compendium = built.compendium;
    let outcomes = normalize_all(&classes, ctx, |record| normalize_class(record, &compendium));
    finish("class", stats, outcomes, ctx)
}

/// Write canonical entities as pretty-printed JSON.
pub fn write_entities(path: &Path, entities: &[CanonicalEntity]) -> Result<()> {
    write_json_pretty(path, entities)?;
    tracing::info!("Wrote {} entities to {}", entities.len(), path.display());
    Ok(())
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifyReport {
    pub count: usize,
    /// Keys that occur more than once, sorted.
    pub duplicates: Vec<String>,
}

/// Read an output file back and check that it survives a decode/encode round trip unchanged.
pub fn verify_file(path: &Path) -> Result<VerifyReport> {
    let value = read_json(path)?;
    let entities: Vec<CanonicalEntity> = serde_json::from_value(value.clone())?;
    let reencoded = serde_json::to_value(&entities)?;

    if reencoded != value {
        let position = match (&value, &reencoded) {
            (Value::Array(before), Value::Array(after)) => {
                before.iter().zip(after).position(|(a, b)| a != b)
            }
            _ => None,
        };
        let detail = match position {
            Some(index) => format!("entity {} ('{}') changed", index, entities[index].key()),
            None => "entity count changed".to_string(),
        };
        return Err(DmkitError::Validation(format!(
            "{} does not round-trip: {}",
            path.display(),
            detail
        )));
    }

    let mut counts: HashMap<&str, usize> = HashMap::new();
    for entity in &entities {
        *counts.entry(entity.key()).or_default() += 1;
    }
    let mut duplicates: Vec<String> = counts
        .into_iter()
        .filter(|(_, count)| *count > 1)
        .map(|(key, _)| key.to_string())
        .collect();
    duplicates.sort();

    Ok(VerifyReport {
        count: entities.len(),
        duplicates,
    })
}
