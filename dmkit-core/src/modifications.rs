//! The `_copy._mod` patch language.
//!
//! A copy record names a base record and, per target field, a list of operations. [`apply`]
//! merges the copy's own fields over the base and then runs every operation in order.

use crate::error::{DmkitError, Result};
use crate::raw::{RawRecord, as_record, listify};
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{Map, Value};
use tracing::debug;

lazy_static! {
    static ref DOLLAR_BACKREF: Regex = Regex::new(r"\$(\d+)").expect("valid backreference regex");
}

/// Target name meaning "the whole record".
pub const WILDCARD_TARGET: &str = "*";

/// Which element a `replaceArr` operation replaces.
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayMatch {
    /// The first element equal to this string, or whose `name` is this string.
    Name(String),
    Index(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub enum RemoveSelector {
    Values(Vec<Value>),
    Names(Vec<String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SpellEdit {
    Add,
    Remove,
    Replace,
}

#[derive(Debug, Clone)]
pub enum ModificationOp {
    Remove,
    ReplaceTxt { pattern: Regex, replacement: String },
    AppendArr { items: Vec<Value> },
    AppendIfNotExists { items: Vec<Value> },
    InsertArr { index: usize, items: Vec<Value> },
    ReplaceArr { replace: Option<ArrayMatch>, items: Vec<Value> },
    RemoveArr(RemoveSelector),
    AddSkills(Map<String, Value>),
    AddSpells(Map<String, Value>),
    RemoveSpells(Map<String, Value>),
    ReplaceSpells(Map<String, Value>),
}

/// Rewrite `$1`-style backreferences to the `${1}` form the regex crate expects.
pub fn translate_replacement(replacement: &str) -> String {
    DOLLAR_BACKREF.replace_all(replacement, "$${${1}}").into_owned()
}

fn compile_pattern(pattern: &str, flags: Option<&str>) -> Result<Regex> {
    let mut inline = String::new();
    for flag in flags.unwrap_or_default().chars() {
        match flag {
            'i' | 'm' | 's' | 'x' => inline.push(flag),
            // JavaScript's global flag; every match is replaced regardless.
            'g' => {}
            other => {
                return Err(DmkitError::Shape(format!("unknown regex flag '{}'", other)));
            }
        }
    }
    if inline.is_empty() {
        Ok(Regex::new(pattern)?)
    } else {
        Ok(Regex::new(&format!("(?{}){}", inline, pattern))?)
    }
}

fn items_of(op: &RawRecord) -> Vec<Value> {
    op.get("items")
        .or_else(|| op.get("item"))
        .map(listify)
        .unwrap_or_default()
}

fn op_body(op: &RawRecord) -> Map<String, Value> {
    op.iter()
        .filter(|(k, _)| k.as_str() != "mode")
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

impl ModificationOp {
    /// Decode one operation. The bare string `"remove"` is accepted as well as objects.
    pub fn from_value(value: &Value) -> Result<Self> {
        if let Value::String(mode) = value {
            return match mode.as_str() {
                "remove" => Ok(ModificationOp::Remove),
                other => Err(DmkitError::Shape(format!("unknown modification '{}'", other))),
            };
        }

        let op = as_record(value, "modification")?;
        let mode = op.get("mode").and_then(Value::as_str).ok_or_else(|| {
            DmkitError::Shape(format!("modification without a mode: {}", value))
        })?;

        let parsed = match mode {
            "remove" => ModificationOp::Remove,
            "replaceTxt" => {
                let pattern = op.get("replace").and_then(Value::as_str).ok_or_else(|| {
                    DmkitError::Shape(format!("replaceTxt without 'replace': {}", value))
                })?;
                let replacement = op.get("with").and_then(Value::as_str).unwrap_or_default();
                ModificationOp::ReplaceTxt {
                    pattern: compile_pattern(pattern, op.get("flags").and_then(Value::as_str))?,
                    replacement: translate_replacement(replacement),
                }
            }
            "appendArr" => ModificationOp::AppendArr { items: items_of(op) },
            "appendIfNotExistsArr" => ModificationOp::AppendIfNotExists { items: items_of(op) },
            "insertArr" => ModificationOp::InsertArr {
                index: op
                    .get("index")
                    .and_then(Value::as_u64)
                    .and_then(|i| usize::try_from(i).ok())
                    .unwrap_or(0),
                items: items_of(op),
            },
            "prependArr" => ModificationOp::InsertArr {
                index: 0,
                items: items_of(op),
            },
            "replaceArr" => {
                let replace = match op.get("replace") {
                    None | Some(Value::Null) => None,
                    Some(Value::String(name)) => Some(ArrayMatch::Name(name.clone())),
                    Some(Value::Object(selector)) => {
                        let index = selector
                            .get("index")
                            .and_then(Value::as_u64)
                            .and_then(|i| usize::try_from(i).ok())
                            .ok_or_else(|| {
                                DmkitError::Shape(format!("invalid replaceArr selector: {}", value))
                            })?;
                        Some(ArrayMatch::Index(index))
                    }
                    Some(other) => {
                        return Err(DmkitError::Shape(format!(
                            "invalid replaceArr selector: {}",
                            other
                        )));
                    }
                };
                ModificationOp::ReplaceArr {
                    replace,
                    items: items_of(op),
                }
            }
            "removeArr" => {
                if let Some(items) = op.get("items") {
                    ModificationOp::RemoveArr(RemoveSelector::Values(listify(items)))
                } else if let Some(names) = op.get("names") {
                    let names = listify(names)
                        .into_iter()
                        .map(|n| match n {
                            Value::String(s) => Ok(s),
                            other => Err(DmkitError::Shape(format!(
                                "removeArr names must be strings, got {}",
                                other
                            ))),
                        })
                        .collect::<Result<Vec<_>>>()?;
                    ModificationOp::RemoveArr(RemoveSelector::Names(names))
                } else {
                    return Err(DmkitError::Shape(format!(
                        "removeArr needs 'items' or 'names': {}",
                        value
                    )));
                }
            }
            "addSkills" => {
                let skills = op.get("skills").map(|s| as_record(s, "addSkills.skills")).transpose()?;
                ModificationOp::AddSkills(skills.cloned().unwrap_or_default())
            }
            "addSpells" => ModificationOp::AddSpells(op_body(op)),
            "removeSpells" => ModificationOp::RemoveSpells(op_body(op)),
            "replaceSpells" => ModificationOp::ReplaceSpells(op_body(op)),
            other => {
                return Err(DmkitError::Shape(format!("unknown modification mode '{}'", other)));
            }
        };
        Ok(parsed)
    }

    /// Apply this operation to `target` within `record`.
    pub fn apply(&self, record: &mut RawRecord, target: &str) -> Result<()> {
        match self {
            ModificationOp::Remove => {
                record.remove(target);
            }
            ModificationOp::ReplaceTxt {
                pattern,
                replacement,
            } => {
                if target == WILDCARD_TARGET {
                    for value in record.values_mut() {
                        replace_text(value, pattern, replacement);
                    }
                } else if let Some(value) = record.get_mut(target) {
                    replace_text(value, pattern, replacement);
                }
            }
            ModificationOp::AppendArr { items } => {
                target_array(record, target)?.extend(items.iter().cloned());
            }
            ModificationOp::AppendIfNotExists { items } => {
                let array = target_array(record, target)?;
                for item in items {
                    if !array.contains(item) {
                        array.push(item.clone());
                    }
                }
            }
            ModificationOp::InsertArr { index, items } => {
                let array = target_array(record, target)?;
                let at = (*index).min(array.len());
                array.splice(at..at, items.iter().cloned());
            }
            ModificationOp::ReplaceArr { replace, items } => {
                let array = target_array(record, target)?;
                match replace {
                    None => *array = items.clone(),
                    Some(selector) => {
                        let at = match selector {
                            ArrayMatch::Index(i) if *i < array.len() => Some(*i),
                            ArrayMatch::Index(_) => None,
                            ArrayMatch::Name(name) => array.iter().position(|el| {
                                el.as_str() == Some(name.as_str())
                                    || el.get("name").and_then(Value::as_str) == Some(name.as_str())
                            }),
                        };
                        let at = at.ok_or_else(|| {
                            DmkitError::Lookup(format!(
                                "replaceArr on '{}': no element matches {:?}",
                                target, selector
                            ))
                        })?;
                        array.splice(at..=at, items.iter().cloned());
                    }
                }
            }
            ModificationOp::RemoveArr(selector) => {
                let Some(array) = record.get_mut(target).and_then(Value::as_array_mut) else {
                    debug!("removeArr on absent field '{}'", target);
                    return Ok(());
                };
                match selector {
                    RemoveSelector::Values(values) => array.retain(|el| !values.contains(el)),
                    RemoveSelector::Names(names) => array.retain(|el| {
                        el.get("name")
                            .and_then(Value::as_str)
                            .is_none_or(|n| !names.iter().any(|name| name == n))
                    }),
                }
            }
            ModificationOp::AddSkills(skills) => {
                let entry = record
                    .entry("skill".to_string())
                    .or_insert_with(|| Value::Object(Map::new()));
                match entry {
                    Value::Object(map) => {
                        for (k, v) in skills {
                            map.insert(k.clone(), v.clone());
                        }
                    }
                    other => {
                        return Err(DmkitError::Shape(format!(
                            "'skill' must be an object, got {}",
                            other
                        )));
                    }
                }
            }
            ModificationOp::AddSpells(body) => edit_spellcasting(record, body, SpellEdit::Add)?,
            ModificationOp::RemoveSpells(body) => {
                edit_spellcasting(record, body, SpellEdit::Remove)?
            }
            ModificationOp::ReplaceSpells(body) => {
                edit_spellcasting(record, body, SpellEdit::Replace)?
            }
        }
        Ok(())
    }
}

fn replace_text(value: &mut Value, pattern: &Regex, replacement: &str) {
    match value {
        Value::String(s) => {
            let replaced = pattern.replace_all(s, replacement).into_owned();
            *s = replaced;
        }
        Value::Array(items) => {
            for item in items {
                replace_text(item, pattern, replacement);
            }
        }
        Value::Object(map) => {
            for item in map.values_mut() {
                replace_text(item, pattern, replacement);
            }
        }
        _ => {}
    }
}

fn target_array<'a>(record: &'a mut RawRecord, target: &str) -> Result<&'a mut Vec<Value>> {
    let value = record
        .entry(target.to_string())
        .or_insert_with(|| Value::Array(Vec::new()));
    if value.is_null() {
        *value = Value::Array(Vec::new());
    }
    match value {
        Value::Array(items) => Ok(items),
        other => Err(DmkitError::Shape(format!(
            "'{}' must be an array to modify it, got {}",
            target, other
        ))),
    }
}

/// Every path from `map` to a non-object leaf.
fn leaf_paths<'a>(map: &'a Map<String, Value>, prefix: &[&'a str], out: &mut Vec<(Vec<&'a str>, &'a Value)>) {
    for (key, value) in map {
        let mut path = prefix.to_vec();
        path.push(key.as_str());
        match value {
            Value::Object(child) => leaf_paths(child, &path, out),
            leaf => out.push((path, leaf)),
        }
    }
}

fn descend<'a>(root: &'a mut Map<String, Value>, path: &[&str], create: bool) -> Option<&'a mut Value> {
    let (last, parents) = path.split_last()?;
    let mut node = root;
    for key in parents {
        if create {
            node.entry(key.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
        }
        node = node.get_mut(*key)?.as_object_mut()?;
    }
    if create {
        node.entry(last.to_string()).or_insert(Value::Null);
    }
    node.get_mut(*last)
}

/// The spell list at a node: the node itself, or the `spells` list of a `{slots, spells}` level.
fn spell_list(node: &mut Value) -> Result<&mut Vec<Value>> {
    if node.is_null() {
        *node = Value::Array(Vec::new());
    }
    let has_levels = node.get("spells").is_some_and(Value::is_array);
    let target = if has_levels { &mut node["spells"] } else { node };
    match target {
        Value::Array(items) => Ok(items),
        other => Err(DmkitError::Shape(format!("expected a spell list, got {}", other))),
    }
}

fn edit_spellcasting(record: &mut RawRecord, body: &Map<String, Value>, edit: SpellEdit) -> Result<()> {
    let mut paths = Vec::new();
    leaf_paths(body, &[], &mut paths);

    let Some(blocks) = record.get_mut("spellcasting").and_then(Value::as_array_mut) else {
        debug!("Spell modification on a record without spellcasting");
        return Ok(());
    };

    for block in blocks {
        let Some(block) = block.as_object_mut() else {
            continue;
        };
        for (path, leaf) in &paths {
            let Some(node) = descend(block, path, edit == SpellEdit::Add) else {
                continue;
            };
            let Value::Array(changes) = leaf else {
                if edit == SpellEdit::Add {
                    *node = (*leaf).clone();
                }
                continue;
            };
            let list = spell_list(node)?;
            match edit {
                SpellEdit::Add => list.extend(changes.iter().cloned()),
                SpellEdit::Remove => list.retain(|spell| !changes.contains(spell)),
                SpellEdit::Replace => {
                    for change in changes {
                        let (Some(old), Some(new)) = (change.get("replace"), change.get("with")) else {
                            return Err(DmkitError::Shape(format!(
                                "replaceSpells entry needs 'replace' and 'with': {}",
                                change
                            )));
                        };
                        for spell in list.iter_mut() {
                            if *spell == *old {
                                *spell = new.clone();
                            }
                        }
                    }
                }
            }
        }
    }
    Ok(())
}

/// Materialize a copy record: merge it over `base`, then run its `_copy._mod` operations.
///
/// The result never carries a `_copy` key. Operations on one target run in the order given.
pub fn apply(base: &RawRecord, copy: &RawRecord) -> Result<RawRecord> {
    let mut merged: RawRecord = base
        .iter()
        .filter(|(k, _)| k.as_str() != "_copy")
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    for (k, v) in copy {
        if k != "_copy" {
            merged.insert(k.clone(), v.clone());
        }
    }

    let Some(mods) = copy.get("_copy").and_then(|c| c.get("_mod")) else {
        return Ok(merged);
    };
    for (target, ops) in as_record(mods, "_copy._mod")? {
        for op in listify(ops) {
            ModificationOp::from_value(&op)?.apply(&mut merged, target)?;
        }
    }
    Ok(merged)
}
