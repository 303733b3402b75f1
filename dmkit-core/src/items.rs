//! Item normalization, item type/property catalog and magic variant expansion.

use crate::context::{Conversion, ConversionContext, SkipReason};
use crate::copies::CopyFailure;
use crate::entries::parse_entries;
use crate::error::{DmkitError, Result};
use crate::models::{Damage, Item};
use crate::raw::{RawRecord, display_key, field, listify, record_key, required, str_field};
use lazy_static::lazy_static;
use regex::{Captures, Regex};
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

lazy_static! {
    static ref TEMPLATE: Regex = Regex::new(r"\{=(\w+)(?:/([lu]))?\}").unwrap();
}

pub const GENERIC_VARIANT: &str = "GV";

/// Item type and property display names, keyed by `abbreviation|source` and by bare abbreviation.
#[derive(Debug, Clone, Default)]
pub struct ItemCatalog {
    types: HashMap<String, String>,
    properties: HashMap<String, String>,
}

fn register(table: &mut HashMap<String, String>, record: &RawRecord, name: String) {
    let Some(abbreviation) = str_field(record, "abbreviation") else {
        return;
    };
    if let Some(source) = str_field(record, "source") {
        table.insert(format!("{}|{}", abbreviation, source), name.clone());
    }
    table.entry(abbreviation.to_string()).or_insert(name);
}

fn lookup_code(table: &HashMap<String, String>, code: &str) -> Option<String> {
    table
        .get(code)
        .or_else(|| code.split('|').next().and_then(|abbr| table.get(abbr)))
        .cloned()
}

impl ItemCatalog {
    pub fn from_records(types: &[RawRecord], properties: &[RawRecord]) -> Self {
        let mut catalog = Self::default();
        for record in types {
            catalog.register_type(record);
        }
        for record in properties {
            catalog.register_property(record);
        }
        catalog
    }

    pub fn register_type(&mut self, record: &RawRecord) {
        let Some(name) = str_field(record, "name").or_else(|| str_field(record, "abbreviation"))
        else {
            return;
        };
        register(&mut self.types, record, name.to_string());
    }

    /// A property's name is its `name`, else the name of its first entry, else its abbreviation.
    pub fn register_property(&mut self, record: &RawRecord) {
        let first_entry_name = record
            .get("entries")
            .and_then(Value::as_array)
            .and_then(|entries| entries.first())
            .and_then(|entry| entry.get("name"))
            .and_then(Value::as_str);
        let Some(name) = str_field(record, "name")
            .or(first_entry_name)
            .or_else(|| str_field(record, "abbreviation"))
        else {
            return;
        };
        register(&mut self.properties, record, name.to_string());
    }

    pub fn type_name(&self, code: &str) -> String {
        lookup_code(&self.types, code).unwrap_or_else(|| {
            let abbr = code.split('|').next().unwrap_or(code);
            if abbr == GENERIC_VARIANT {
                "Generic Variant".to_string()
            } else {
                code.to_string()
            }
        })
    }

    pub fn property_name(&self, code: &str) -> String {
        lookup_code(&self.properties, code).unwrap_or_else(|| code.to_string())
    }
}

fn damage_type_name(code: &str) -> &str {
    match code {
        "B" => "bludgeoning",
        "P" => "piercing",
        "S" => "slashing",
        "A" => "acid",
        "C" => "cold",
        "F" => "fire",
        "O" => "force",
        "L" => "lightning",
        "N" => "necrotic",
        "I" => "poison",
        "Y" => "psychic",
        "R" => "radiant",
        "T" => "thunder",
        other => other,
    }
}

fn attunement(value: Option<&Value>) -> Result<Option<String>> {
    match value {
        None | Some(Value::Null) | Some(Value::Bool(false)) => Ok(None),
        Some(Value::Bool(true)) => Ok(Some("requires attunement".to_string())),
        Some(Value::String(s)) => Ok(Some(format!("requires attunement {}", s))),
        Some(other) => Err(DmkitError::Shape(format!("field 'reqAttune': unexpected value {}", other))),
    }
}

fn property_names(value: Option<&Value>, catalog: &ItemCatalog) -> Result<Vec<String>> {
    let Some(value) = value else {
        return Ok(Vec::new());
    };
    listify(value)
        .iter()
        .map(|property| match property {
            Value::String(code) => Ok(catalog.property_name(code)),
            Value::Object(obj) => match str_field(obj, "uid") {
                Some(code) => Ok(catalog.property_name(code)),
                None => Err(DmkitError::Shape(format!("item property without uid: {}", property))),
            },
            other => Err(DmkitError::Shape(format!("invalid item property {}", other))),
        })
        .collect()
}

pub fn normalize_item(record: &RawRecord, ctx: &ConversionContext) -> Result<Conversion<Item>> {
    if record.contains_key("_copy") {
        return Ok(Conversion::Skipped(SkipReason::UnresolvedCopy));
    }

    let name: String = required(record, "name")?;
    let source: String = required(record, "source")?;
    let key = record_key(record).unwrap_or_else(|| display_key(record));

    let damage = match field::<String>(record, "dmg1")? {
        Some(dice) => Some(Damage {
            dice,
            versatile: field(record, "dmg2")?,
            damage_type: field::<String>(record, "dmgType")?
                .map(|code| damage_type_name(&code).to_string()),
        }),
        None => None,
    };

    let item = Item {
        key,
        name,
        source,
        page: field(record, "page")?.unwrap_or_default(),
        item_type: field::<String>(record, "type")?.map(|code| ctx.items.type_name(&code)),
        rarity: field(record, "rarity")?.unwrap_or_else(|| "none".to_string()),
        weight: field(record, "weight")?,
        value: field(record, "value")?,
        attunement: attunement(record.get("reqAttune"))?,
        wondrous: field(record, "wondrous")?.unwrap_or(false),
        properties: property_names(record.get("property"), &ctx.items)?,
        damage,
        armor_class: field(record, "ac")?,
        weapon_category: field(record, "weaponCategory")?,
        base_item: field(record, "baseItem")?,
        entries: match record.get("entries") {
            Some(entries) => parse_entries(entries)?,
            None => Vec::new(),
        },
    };
    Ok(Conversion::Converted(item))
}

// ---------------------------------------------------------------------------
// Magic variants
// ---------------------------------------------------------------------------

const INHERIT_SKIP: [&str; 3] = ["entries", "namePrefix", "nameSuffix"];

/// Upstream type codes may carry a `|source` suffix on one side only.
fn field_matches(actual: &Value, expected: &Value) -> bool {
    if actual == expected {
        return true;
    }
    match (actual.as_str(), expected.as_str()) {
        (Some(a), Some(e)) => a.split('|').next() == e.split('|').next(),
        _ => false,
    }
}

fn matches_requirement(base: &RawRecord, requirement: &Value) -> bool {
    let Some(requirement) = requirement.as_object() else {
        return false;
    };
    requirement
        .iter()
        .all(|(key, expected)| base.get(key).is_some_and(|actual| field_matches(actual, expected)))
}

fn is_excluded(base: &RawRecord, excludes: Option<&Value>) -> bool {
    let Some(Value::Object(excludes)) = excludes else {
        return false;
    };
    excludes.iter().any(|(key, values)| {
        let Some(actual) = base.get(key) else {
            return false;
        };
        listify(values).iter().any(|excluded| match actual {
            Value::Array(items) => items.iter().any(|item| field_matches(item, excluded)),
            other => field_matches(other, excluded),
        })
    })
}

/// Whether a variant applies to a base item.
pub fn variant_applies(base: &RawRecord, variant: &RawRecord) -> bool {
    if str_field(base, "rarity").unwrap_or("none") != "none" {
        return false;
    }
    let requires = variant.get("requires").map(listify).unwrap_or_default();
    requires.iter().any(|requirement| matches_requirement(base, requirement))
        && !is_excluded(base, variant.get("excludes"))
}

fn template_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Fill `{=field}` templates in every string under `value`. Unknown fields are an error when
/// `strict`, otherwise they are left in place.
fn fill_templates<F>(value: &Value, lookup: &F, strict: bool) -> Result<Value>
where
    F: Fn(&str) -> Option<String>,
{
    match value {
        Value::String(text) => {
            let mut missing = None;
            let filled = TEMPLATE.replace_all(text, |caps: &Captures| {
                let name = &caps[1];
                match lookup(name) {
                    Some(found) => match caps.get(2).map(|m| m.as_str()) {
                        Some("l") => found.to_lowercase(),
                        Some("u") => found.to_uppercase(),
                        _ => found,
                    },
                    None => {
                        missing.get_or_insert_with(|| name.to_string());
                        caps[0].to_string()
                    }
                }
            });
            match missing {
                Some(name) if strict => Err(DmkitError::Lookup(format!(
                    "no value for template field '{}' in \"{}\"",
                    name, text
                ))),
                _ => Ok(Value::String(filled.into_owned())),
            }
        }
        Value::Array(items) => items
            .iter()
            .map(|item| fill_templates(item, lookup, strict))
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        Value::Object(obj) => {
            let mut out = RawRecord::new();
            for (key, child) in obj {
                out.insert(key.clone(), fill_templates(child, lookup, strict)?);
            }
            Ok(Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}

fn inherits(variant: &RawRecord) -> Result<RawRecord> {
    match variant.get("inherits") {
        None => Ok(RawRecord::new()),
        Some(Value::Object(obj)) => Ok(obj.clone()),
        Some(other) => Err(DmkitError::Shape(format!("variant 'inherits' must be an object: {}", other))),
    }
}

/// Build one concrete magic item from a base item and a variant.
pub fn apply_variant(base: &RawRecord, variant: &RawRecord) -> Result<RawRecord> {
    let inherits = inherits(variant)?;
    let base_name = str_field(base, "name")
        .ok_or_else(|| DmkitError::MissingField("name".to_string()))?
        .to_string();

    let mut item = base.clone();
    for (key, value) in &inherits {
        if INHERIT_SKIP.contains(&key.as_str()) {
            continue;
        }
        if value.is_null() {
            item.remove(key);
        } else {
            item.insert(key.clone(), value.clone());
        }
    }

    let prefix = str_field(&inherits, "namePrefix").unwrap_or("");
    let suffix = str_field(&inherits, "nameSuffix").unwrap_or("");
    item.insert("name".to_string(), Value::String(format!("{}{}{}", prefix, base_name, suffix)));

    let lookup = |name: &str| {
        if name == "baseName" {
            return Some(base_name.clone());
        }
        inherits.get(name).or_else(|| base.get(name)).and_then(template_text)
    };
    let mut entries = match inherits.get("entries") {
        Some(entries) => listify(&fill_templates(entries, &lookup, true)?),
        None => Vec::new(),
    };
    if let Some(base_entries) = base.get("entries") {
        entries.extend(listify(base_entries));
    }
    if entries.is_empty() {
        item.remove("entries");
    } else {
        item.insert("entries".to_string(), Value::Array(entries));
    }

    if let Some(key) = record_key(base) {
        item.insert("baseItem".to_string(), Value::String(key));
    }
    Ok(item)
}

/// The generic-variant entry describing a variant or item group as a whole.
pub fn generic_variant(record: &RawRecord) -> Result<RawRecord> {
    let inherits = inherits(record)?;
    let name: String = required(record, "name")?;
    let mut item = RawRecord::new();
    item.insert("name".to_string(), Value::String(name));

    for key in ["source", "page", "rarity", "reqAttune"] {
        if let Some(value) = record.get(key).or_else(|| inherits.get(key)) {
            item.insert(key.to_string(), value.clone());
        }
    }
    item.insert("type".to_string(), Value::String(GENERIC_VARIANT.to_string()));

    let lookup = |name: &str| inherits.get(name).and_then(template_text);
    if let Some(entries) = record.get("entries").or_else(|| inherits.get("entries")) {
        item.insert("entries".to_string(), fill_templates(entries, &lookup, false)?);
    }
    if !item.contains_key("source") {
        return Err(DmkitError::MissingField("source".to_string()));
    }
    Ok(item)
}

#[derive(Debug, Default)]
pub struct VariantExpansion {
    pub items: Vec<RawRecord>,
    pub failures: Vec<CopyFailure>,
}

/// Expand magic variants over base items, plus one generic-variant item per variant and per
/// item group. Generated items are never used as bases.
pub fn generate_variants(
    bases: &[RawRecord],
    variants: &[RawRecord],
    groups: &[RawRecord],
    ctx: &ConversionContext,
) -> VariantExpansion {
    let mut expansion = VariantExpansion::default();

    for variant in variants.iter().filter(|v| ctx.edition_allowed(v)) {
        let mut applied = 0;
        for base in bases.iter().filter(|b| variant_applies(b, variant)) {
            match apply_variant(base, variant) {
                Ok(item) => {
                    expansion.items.push(item);
                    applied += 1;
                }
                Err(error) => expansion.failures.push(CopyFailure {
                    key: format!("{} ({})", display_key(variant), display_key(base)),
                    raw: variant.clone(),
                    error,
                }),
            }
        }
        debug!("Variant '{}' applied to {} base item(s)", display_key(variant), applied);
    }

    for record in variants.iter().filter(|v| ctx.edition_allowed(v)).chain(groups) {
        match generic_variant(record) {
            Ok(item) => expansion.items.push(item),
            Err(error) => expansion.failures.push(CopyFailure {
                key: display_key(record),
                raw: record.clone(),
                error,
            }),
        }
    }

    expansion
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConvertConfig;
    use crate::entries::Entry;
    use serde_json::json;

    fn record(value: Value) -> RawRecord {
        value.as_object().unwrap().clone()
    }

    fn longsword() -> RawRecord {
        record(json!({
            "name": "Longsword",
            "source": "PHB",
            "page": 149,
            "type": "M",
            "rarity": "none",
            "weight": 3,
            "value": 1500,
            "weapon": true,
            "weaponCategory": "martial",
            "property": ["V"],
            "dmg1": "1d8",
            "dmg2": "1d10",
            "dmgType": "S"
        }))
    }

    fn plus_one() -> RawRecord {
        record(json!({
            "name": "+1 Weapon",
            "type": "GV",
            "edition": "classic",
            "requires": [{"weapon": true}],
            "excludes": {"net": true},
            "entries": ["You have a +1 bonus to attack and damage rolls made with this magic weapon."],
            "inherits": {
                "namePrefix": "+1 ",
                "source": "DMG",
                "page": 213,
                "rarity": "uncommon",
                "bonusWeapon": "+1",
                "entries": ["You have a {=bonusWeapon} bonus to attack rolls made with this {=baseName/l}."]
            }
        }))
    }

    fn catalog() -> ItemCatalog {
        ItemCatalog::from_records(
            &[record(json!({"abbreviation": "M", "source": "PHB", "name": "Melee Weapon"}))],
            &[record(json!({
                "abbreviation": "V",
                "source": "PHB",
                "entries": [{"type": "entries", "name": "Versatile", "entries": ["..."]}]
            }))],
        )
    }

    #[test]
    fn test_catalog_lookup() {
        let catalog = catalog();
        assert_eq!(catalog.type_name("M"), "Melee Weapon");
        assert_eq!(catalog.type_name("M|PHB"), "Melee Weapon");
        assert_eq!(catalog.type_name("M|XPHB"), "Melee Weapon");
        assert_eq!(catalog.type_name("GV|DMG"), "Generic Variant");
        assert_eq!(catalog.type_name("$C"), "$C");
        assert_eq!(catalog.property_name("V"), "Versatile");
        assert_eq!(catalog.property_name("2H"), "2H");
    }

    #[test]
    fn test_normalize_item() {
        let ctx = ConversionContext::new(ConvertConfig::default()).with_item_catalog(catalog());
        let item = normalize_item(&longsword(), &ctx).unwrap().converted().unwrap();
        assert_eq!(item.key, "Longsword-PHB");
        assert_eq!(item.item_type.as_deref(), Some("Melee Weapon"));
        assert_eq!(item.properties, vec!["Versatile"]);
        assert_eq!(item.weight, Some(3.0));
        let damage = item.damage.unwrap();
        assert_eq!(damage.dice, "1d8");
        assert_eq!(damage.versatile.as_deref(), Some("1d10"));
        assert_eq!(damage.damage_type.as_deref(), Some("slashing"));
        assert_eq!(item.rarity, "none");
    }

    #[test]
    fn test_attunement_text() {
        let ctx = ConversionContext::default();
        let rec = record(json!({"name": "Ring", "source": "DMG", "reqAttune": "by a wizard"}));
        let item = normalize_item(&rec, &ctx).unwrap().converted().unwrap();
        assert_eq!(item.attunement.as_deref(), Some("requires attunement by a wizard"));

        let rec = record(json!({"name": "Ring", "source": "DMG", "reqAttune": true}));
        let item = normalize_item(&rec, &ctx).unwrap().converted().unwrap();
        assert_eq!(item.attunement.as_deref(), Some("requires attunement"));

        let rec = record(json!({"name": "Ring", "source": "DMG", "reqAttune": 3}));
        assert!(normalize_item(&rec, &ctx).unwrap_err().is_shape());
    }

    #[test]
    fn test_unresolved_copy_is_skipped() {
        let rec = record(json!({"name": "Ring", "source": "DMG", "_copy": {"name": "X", "source": "Y"}}));
        let result = normalize_item(&rec, &ConversionContext::default()).unwrap();
        assert_eq!(result, Conversion::Skipped(SkipReason::UnresolvedCopy));
    }

    #[test]
    fn test_variant_applies_to_matching_bases() {
        let variant = plus_one();
        assert!(variant_applies(&longsword(), &variant));

        let mut net = longsword();
        net.insert("net".into(), json!(true));
        assert!(!variant_applies(&net, &variant));

        let mut magic = longsword();
        magic.insert("rarity".into(), json!("rare"));
        assert!(!variant_applies(&magic, &variant));

        let shield = record(json!({"name": "Shield", "source": "PHB", "rarity": "none", "type": "S"}));
        assert!(!variant_applies(&shield, &variant));
    }

    #[test]
    fn test_apply_variant() {
        let item = apply_variant(&longsword(), &plus_one()).unwrap();
        assert_eq!(item["name"], "+1 Longsword");
        assert_eq!(item["source"], "DMG");
        assert_eq!(item["rarity"], "uncommon");
        assert_eq!(item["baseItem"], "Longsword-PHB");
        assert_eq!(item["dmg1"], "1d8");
        assert_eq!(
            item["entries"],
            json!(["You have a +1 bonus to attack rolls made with this longsword."])
        );
        assert!(item.get("namePrefix").is_none());
    }

    #[test]
    fn test_inherited_null_removes_field() {
        let mut variant = plus_one();
        variant["inherits"]
            .as_object_mut()
            .unwrap()
            .insert("weight".into(), Value::Null);
        let item = apply_variant(&longsword(), &variant).unwrap();
        assert!(item.get("weight").is_none());
    }

    #[test]
    fn test_missing_template_field_fails() {
        let mut variant = plus_one();
        variant["inherits"]["entries"] = json!(["{=missing} bonus"]);
        let err = apply_variant(&longsword(), &variant).unwrap_err();
        assert!(err.is_lookup());
    }

    #[test]
    fn test_generate_variants() {
        let ctx = ConversionContext::default();
        let bases = vec![longsword(), record(json!({"name": "Rope", "source": "PHB", "rarity": "none"}))];
        let group = record(json!({
            "name": "Figurine of Wondrous Power",
            "source": "DMG",
            "rarity": "varies",
            "items": ["Figurine of Wondrous Power, Bronze Griffon|DMG"],
            "entries": ["A figurine..."]
        }));
        let mut one_edition = plus_one();
        one_edition.insert("edition".into(), json!("one"));
        let mut no_edition = plus_one();
        no_edition.remove("edition");

        let expansion = generate_variants(&bases, &[plus_one(), one_edition, no_edition], &[group], &ctx);
        assert!(expansion.failures.is_empty());
        let names: Vec<&str> = expansion.items.iter().map(|i| i["name"].as_str().unwrap()).collect();
        assert_eq!(names, vec!["+1 Longsword", "+1 Weapon", "Figurine of Wondrous Power"]);

        let gv = normalize_item(&expansion.items[1], &ctx).unwrap().converted().unwrap();
        assert_eq!(gv.item_type.as_deref(), Some("Generic Variant"));
        assert_eq!(gv.source, "DMG");
        assert_eq!(gv.rarity, "uncommon");
        assert!(matches!(&gv.entries[0], Entry::Text(t) if t.starts_with("You have a +1 bonus")));
    }
}
