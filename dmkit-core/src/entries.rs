//! Recursive rich-text entries.
//!
//! Upstream free text is a mix of bare strings and typed objects nested to any depth. It is
//! decoded here into [`Entry`], a closed tree that downstream code can traverse exhaustively.
//! Inline markers such as `{@item Rope|PHB}` are kept verbatim inside text.

use crate::error::{DmkitError, Result};
use crate::raw::RawRecord;
use crate::values::ability_name;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Entry {
    Text(String),
    Block(Block),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Block {
    /// A titled (or untitled) group of child entries.
    Section {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        body: Vec<Entry>,
    },
    List {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        style: Option<String>,
        #[serde(default)]
        items: Vec<Entry>,
    },
    Table {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        caption: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        col_labels: Vec<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        col_styles: Vec<String>,
        #[serde(default)]
        rows: Vec<Vec<Entry>>,
    },
    Quote {
        #[serde(default)]
        body: Vec<Entry>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        by: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<String>,
    },
    Inset {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        #[serde(default)]
        body: Vec<Entry>,
    },
    /// "Choose N of the following" groups.
    Options {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        count: Option<u32>,
        #[serde(default)]
        body: Vec<Entry>,
    },
    Rule,
}

impl Entry {
    pub fn text(s: impl Into<String>) -> Self {
        Entry::Text(s.into())
    }

    pub fn section(title: Option<String>, body: Vec<Entry>) -> Self {
        Entry::Block(Block::Section { title, body })
    }

    /// Title of a section-like entry.
    pub fn title(&self) -> Option<&str> {
        match self {
            Entry::Block(Block::Section { title, .. }) | Entry::Block(Block::Inset { title, .. }) => {
                title.as_deref()
            }
            _ => None,
        }
    }
}

fn opt_string(obj: &RawRecord, key: &str) -> Option<String> {
    obj.get(key).and_then(Value::as_str).map(str::to_string)
}

fn required_string<'a>(obj: &'a RawRecord, key: &str, kind: &str) -> Result<&'a str> {
    obj.get(key).and_then(Value::as_str).ok_or_else(|| {
        DmkitError::Shape(format!("'{}' entry is missing string field '{}'", kind, key))
    })
}

/// Child entries of an object, accepting the singular `entry` alias.
pub fn entry_body(obj: &RawRecord) -> Result<Vec<Entry>> {
    match (obj.get("entry"), obj.get("entries")) {
        (Some(_), Some(_)) => Err(DmkitError::Shape(format!(
            "entry has both 'entry' and 'entries': {}",
            Value::Object(obj.clone())
        ))),
        (Some(single), None) => Ok(vec![parse_entry(single)?]),
        (None, Some(many)) => parse_entries(many),
        (None, None) => Ok(Vec::new()),
    }
}

/// Parse a list of entries. A bare entry is treated as a one-element list.
pub fn parse_entries(value: &Value) -> Result<Vec<Entry>> {
    match value {
        Value::Array(items) => items.iter().map(parse_entry).collect(),
        Value::Null => Ok(Vec::new()),
        other => Ok(vec![parse_entry(other)?]),
    }
}

fn abilities(obj: &RawRecord) -> String {
    let codes: Vec<&str> = obj
        .get("attributes")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_str).map(ability_name).collect())
        .unwrap_or_default();
    codes.join(" or ")
}

fn parse_cell(value: &Value) -> Result<Entry> {
    let Some(obj) = value.as_object() else {
        return parse_entry(value);
    };
    if obj.get("type").and_then(Value::as_str) != Some("cell") {
        return parse_entry(value);
    }
    if let Some(roll) = obj.get("roll").and_then(Value::as_object) {
        let text = match (roll.get("exact"), roll.get("min"), roll.get("max")) {
            (Some(exact), _, _) => exact.to_string(),
            (None, Some(min), Some(max)) => format!("{}-{}", min, max),
            _ => {
                return Err(DmkitError::Shape(format!("invalid table roll cell: {}", value)));
            }
        };
        return Ok(Entry::Text(text));
    }
    match obj.get("entry") {
        Some(inner) => parse_entry(inner),
        None => Err(DmkitError::Shape(format!("invalid table cell: {}", value))),
    }
}

fn parse_row(value: &Value) -> Result<Vec<Entry>> {
    let cells = match value {
        Value::Array(cells) => cells,
        Value::Object(obj) => obj.get("row").and_then(Value::as_array).ok_or_else(|| {
            DmkitError::Shape(format!("table row object has no 'row' list: {}", value))
        })?,
        other => return Err(DmkitError::Shape(format!("invalid table row: {}", other))),
    };
    cells.iter().map(parse_cell).collect()
}

fn string_list(obj: &RawRecord, key: &str) -> Result<Vec<String>> {
    match obj.get(key) {
        None => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str().map(str::to_string).ok_or_else(|| {
                    DmkitError::Shape(format!("'{}' must hold strings, got {}", key, item))
                })
            })
            .collect(),
        Some(other) => Err(DmkitError::Shape(format!("'{}' must be a list, got {}", key, other))),
    }
}

fn parse_block(obj: &RawRecord) -> Result<Entry> {
    let kind = match obj.get("type") {
        None => "entries",
        Some(Value::String(kind)) => kind.as_str(),
        Some(other) => {
            return Err(DmkitError::Shape(format!("entry type must be a string, got {}", other)));
        }
    };

    let entry = match kind {
        "entries" | "section" | "item" | "itemSub" | "variant" | "variantSub" => {
            Entry::section(opt_string(obj, "name"), entry_body(obj)?)
        }
        "list" => Entry::Block(Block::List {
            style: opt_string(obj, "style"),
            items: obj.get("items").map(parse_entries).transpose()?.unwrap_or_default(),
        }),
        "table" => Entry::Block(Block::Table {
            caption: opt_string(obj, "caption"),
            col_labels: string_list(obj, "colLabels")?,
            col_styles: string_list(obj, "colStyles")?,
            rows: match obj.get("rows") {
                Some(Value::Array(rows)) => rows.iter().map(parse_row).collect::<Result<_>>()?,
                None => Vec::new(),
                Some(other) => {
                    return Err(DmkitError::Shape(format!("table rows must be a list: {}", other)));
                }
            },
        }),
        "quote" => Entry::Block(Block::Quote {
            body: entry_body(obj)?,
            by: opt_string(obj, "by"),
            from: opt_string(obj, "from"),
        }),
        "inset" | "insetReadaloud" => Entry::Block(Block::Inset {
            title: opt_string(obj, "name"),
            body: entry_body(obj)?,
        }),
        "options" => Entry::Block(Block::Options {
            count: obj.get("count").and_then(Value::as_u64).and_then(|c| u32::try_from(c).ok()),
            body: entry_body(obj)?,
        }),
        "abilityDc" => Entry::Text(format!(
            "{} save DC = 8 + your proficiency bonus + your {} modifier",
            required_string(obj, "name", kind)?,
            abilities(obj)
        )),
        "abilityAttackMod" => Entry::Text(format!(
            "{} attack modifier = your proficiency bonus + your {} modifier",
            required_string(obj, "name", kind)?,
            abilities(obj)
        )),
        "refFeat" => Entry::Text(format!("{{@feat {}}}", required_string(obj, "feat", kind)?)),
        "refOptionalfeature" => Entry::Text(format!(
            "{{@optfeature {}}}",
            required_string(obj, "optionalfeature", kind)?
        )),
        "inline" | "inlineBlock" => {
            let body = entry_body(obj)?;
            if body.iter().all(|e| matches!(e, Entry::Text(_))) {
                let text: String = body
                    .into_iter()
                    .filter_map(|e| match e {
                        Entry::Text(t) => Some(t),
                        Entry::Block(_) => None,
                    })
                    .collect();
                Entry::Text(text)
            } else {
                Entry::section(None, body)
            }
        }
        "link" => Entry::Text(required_string(obj, "text", kind)?.to_string()),
        "hr" => Entry::Block(Block::Rule),
        "refClassFeature" | "refSubclassFeature" => {
            return Err(DmkitError::Shape(format!(
                "unresolved feature reference: {}",
                Value::Object(obj.clone())
            )));
        }
        other => {
            return Err(DmkitError::Shape(format!("unknown entry type '{}'", other)));
        }
    };
    Ok(entry)
}

/// Parse one entry node.
pub fn parse_entry(value: &Value) -> Result<Entry> {
    match value {
        Value::String(text) => Ok(Entry::Text(text.clone())),
        Value::Object(obj) => parse_block(obj),
        Value::Number(n) => Ok(Entry::Text(n.to_string())),
        other => Err(DmkitError::Shape(format!("unexpected entry: {}", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_named_entry() {
        let entry = parse_entry(&json!({
            "name": "Keen Smell",
            "entries": ["The wolf has advantage on {@skill Perception} checks that rely on smell."]
        }))
        .unwrap();
        assert_eq!(entry.title(), Some("Keen Smell"));
        match entry {
            Entry::Block(Block::Section { body, .. }) => {
                assert_eq!(
                    body,
                    vec![Entry::text(
                        "The wolf has advantage on {@skill Perception} checks that rely on smell."
                    )]
                );
            }
            other => panic!("expected section, got {:?}", other),
        }
    }

    #[test]
    fn test_entry_alias() {
        let entry = parse_entry(&json!({"type": "item", "name": "Bite", "entry": "Ouch."})).unwrap();
        assert_eq!(entry, Entry::section(Some("Bite".into()), vec![Entry::text("Ouch.")]));

        let err = parse_entry(&json!({"name": "Bad", "entry": "a", "entries": ["b"]})).unwrap_err();
        assert!(err.is_shape());
    }

    #[test]
    fn test_nested_list_and_table() {
        let entry = parse_entry(&json!({
            "type": "entries",
            "name": "Outer",
            "entries": [
                {"type": "list", "items": ["one", {"type": "item", "name": "Two", "entries": ["deep"]}]},
                {
                    "type": "table",
                    "colLabels": ["d4", "Effect"],
                    "rows": [
                        [{"type": "cell", "roll": {"exact": 1}}, "Nothing"],
                        {"type": "row", "row": [{"type": "cell", "roll": {"min": 2, "max": 4}}, "Boom"]}
                    ]
                }
            ]
        }))
        .unwrap();
        let Entry::Block(Block::Section { body, .. }) = entry else {
            panic!("expected section");
        };
        let Entry::Block(Block::List { items, .. }) = &body[0] else {
            panic!("expected list");
        };
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].title(), Some("Two"));

        let Entry::Block(Block::Table { col_labels, rows, .. }) = &body[1] else {
            panic!("expected table");
        };
        assert_eq!(col_labels, &vec!["d4".to_string(), "Effect".to_string()]);
        assert_eq!(rows[0][0], Entry::text("1"));
        assert_eq!(rows[1][0], Entry::text("2-4"));
    }

    #[test]
    fn test_boilerplate_generators() {
        let dc = parse_entry(&json!({"type": "abilityDc", "name": "Spell", "attributes": ["wis"]})).unwrap();
        assert_eq!(
            dc,
            Entry::text("Spell save DC = 8 + your proficiency bonus + your Wisdom modifier")
        );

        let atk = parse_entry(&json!({"type": "abilityAttackMod", "name": "Spell", "attributes": ["int"]}))
            .unwrap();
        assert_eq!(
            atk,
            Entry::text("Spell attack modifier = your proficiency bonus + your Intelligence modifier")
        );

        let feat = parse_entry(&json!({"type": "refFeat", "feat": "Alert|XPHB"})).unwrap();
        assert_eq!(feat, Entry::text("{@feat Alert|XPHB}"));
    }

    #[test]
    fn test_inline_and_rule() {
        let inline = parse_entry(&json!({"type": "inline", "entries": ["a ", "b"]})).unwrap();
        assert_eq!(inline, Entry::text("a b"));
        assert_eq!(parse_entry(&json!({"type": "hr"})).unwrap(), Entry::Block(Block::Rule));
    }

    #[test]
    fn test_unknown_and_unresolved_types_fail() {
        assert!(parse_entry(&json!({"type": "hologram"})).unwrap_err().is_shape());
        assert!(
            parse_entry(&json!({"type": "refClassFeature", "classFeature": "Rage|Barbarian||1"}))
                .unwrap_err()
                .is_shape()
        );
        assert!(parse_entry(&json!(true)).is_err());
    }

    #[test]
    fn test_entry_roundtrip() {
        let entry = parse_entry(&json!({
            "name": "Multiattack",
            "entries": [
                "The dragon attacks twice.",
                {"type": "quote", "entries": ["Fear me."], "by": "Tiamat"},
                {"type": "options", "count": 1, "entries": ["x", "y"]},
                {"type": "hr"}
            ]
        }))
        .unwrap();
        let text = serde_json::to_string(&entry).unwrap();
        let back: Entry = serde_json::from_str(&text).unwrap();
        assert_eq!(back, entry);
    }
}
