//! Parsers for fields that upstream publishes in several shapes.
//!
//! Each field is decoded into a private untagged enum of its known shapes, then folded into
//! one canonical type. A value matching no shape is a [`DmkitError::Shape`] naming the input.

use crate::error::{DmkitError, Result};
use crate::models::{
    ArmorClass, DamageModifier, HitPoints, Noted, SelectionMode, Size, SkillEntry, SkillList,
    SkillModifier, Speed,
};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use tracing::debug;

/// The skill vocabulary; names are compared case-insensitively.
pub const SKILLS: [&str; 18] = [
    "athletics",
    "acrobatics",
    "sleight of hand",
    "stealth",
    "arcana",
    "history",
    "investigation",
    "nature",
    "religion",
    "animal handling",
    "insight",
    "medicine",
    "perception",
    "survival",
    "deception",
    "intimidation",
    "performance",
    "persuasion",
];

/// Full name of an ability score abbreviation such as `"wis"`.
pub fn ability_name(code: &str) -> &str {
    match code {
        "str" => "Strength",
        "dex" => "Dexterity",
        "con" => "Constitution",
        "int" => "Intelligence",
        "wis" => "Wisdom",
        "cha" => "Charisma",
        "spellcasting" => "spellcasting ability",
        other => other,
    }
}

fn decode<T: DeserializeOwned>(value: &Value, what: &str) -> Result<T> {
    T::deserialize(value)
        .map_err(|_| DmkitError::Shape(format!("unrecognized {}: {}", what, value)))
}

// ---------------------------------------------------------------------------
// Size
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(untagged)]
enum RawSize {
    Code(String),
    Codes(Vec<String>),
}

fn size_from_code(code: &str) -> Result<Size> {
    Size::from_code(code).ok_or_else(|| DmkitError::Shape(format!("unknown size code '{}'", code)))
}

/// Parse a size field. Only the first code of a list is significant.
pub fn parse_size(value: &Value) -> Result<Size> {
    parse_sizes(value)?
        .into_iter()
        .next()
        .ok_or_else(|| DmkitError::Shape(format!("empty size list: {}", value)))
}

/// Parse every size code of a size field, in order.
pub fn parse_sizes(value: &Value) -> Result<Vec<Size>> {
    match decode::<RawSize>(value, "size")? {
        RawSize::Code(code) => Ok(vec![size_from_code(&code)?]),
        RawSize::Codes(codes) => codes.iter().map(|c| size_from_code(c)).collect(),
    }
}

// ---------------------------------------------------------------------------
// Alignment
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawAlignment {
    Code(String),
    Special {
        special: String,
    },
    Weighted {
        alignment: Vec<RawAlignment>,
        chance: Option<u32>,
        note: Option<String>,
    },
}

fn alignment_word(code: &str) -> Option<&'static str> {
    match code {
        "A" => Some("Any"),
        "U" => Some("Unaligned"),
        "L" => Some("Lawful"),
        "N" | "NX" | "NY" => Some("Neutral"),
        "C" => Some("Chaotic"),
        "G" => Some("Good"),
        "E" => Some("Evil"),
        _ => None,
    }
}

/// Both axes without the generic neutral: this is what "any non-X" lists are cut from.
const AXIS_CODES: [&str; 6] = ["L", "NX", "C", "G", "NY", "E"];

fn codes_string(codes: &[&str]) -> Option<String> {
    let set: BTreeSet<&str> = codes.iter().copied().collect();
    let has = |code: &str| set.contains(code);

    match codes.len() {
        0 => None,
        1 | 2 => {
            if codes.iter().any(|c| *c == "NX" || *c == "NY") {
                return None;
            }
            let words: Option<Vec<&str>> = codes.iter().map(|c| alignment_word(c)).collect();
            words.map(|w| w.join(" "))
        }
        3 if set == BTreeSet::from(["NX", "NY", "N"]) => Some("Any Neutral Alignment".to_string()),
        4 if has("E") && has("G") && has("C") && !has("L") => {
            Some("Any Chaotic Alignment".to_string())
        }
        4 if has("E") && has("G") && has("L") && !has("C") => {
            Some("Any Lawful Alignment".to_string())
        }
        4 if has("L") && has("C") && has("E") && !has("G") => Some("Any Evil Alignment".to_string()),
        4 if has("L") && has("C") && has("G") && !has("E") => Some("Any Good Alignment".to_string()),
        5 => {
            if !set.iter().all(|c| AXIS_CODES.contains(c)) {
                return None;
            }
            let missing: Vec<&str> = AXIS_CODES.iter().copied().filter(|c| !has(*c)).collect();
            match missing.as_slice() {
                [code] => alignment_word(code).map(|w| format!("Any Non-{} Alignment", w)),
                _ => None,
            }
        }
        _ => None,
    }
}

fn alignment_from_items(items: &[RawAlignment]) -> Option<String> {
    if items.iter().all(|i| matches!(i, RawAlignment::Code(_))) {
        let codes: Vec<&str> = items
            .iter()
            .filter_map(|i| match i {
                RawAlignment::Code(c) => Some(c.as_str()),
                _ => None,
            })
            .collect();
        return codes_string(&codes);
    }

    if let [RawAlignment::Special { special }] = items {
        return Some(special.clone());
    }

    let mut parts = Vec::with_capacity(items.len());
    for item in items {
        let RawAlignment::Weighted {
            alignment,
            chance,
            note,
        } = item
        else {
            return None;
        };
        let mut part = alignment_from_items(alignment)?;
        if let Some(chance) = chance {
            part.push_str(&format!(" ({}%)", chance));
        }
        if let Some(note) = note {
            part.push_str(&format!(" ({})", note));
        }
        parts.push(part);
    }

    match parts.split_last() {
        None => None,
        Some((last, [])) => Some(last.clone()),
        Some((last, rest)) => Some(format!("{} or {}", rest.join(", "), last)),
    }
}

/// Render an alignment field as display text.
///
/// Accepted shapes: one or two axis codes (`["C", "E"]`), a named exclusion pattern of four or
/// five codes, a single `{special}` object, or weighted/conditional sub-alignments.
pub fn alignment_string(value: &Value) -> Result<String> {
    let items: Vec<RawAlignment> = decode(value, "alignment")?;
    alignment_from_items(&items)
        .ok_or_else(|| DmkitError::Shape(format!("unrecognized alignment: {}", value)))
}

// ---------------------------------------------------------------------------
// Armor class and hit points
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct RawAcDetail {
    ac: i32,
    #[serde(default)]
    from: Vec<String>,
    condition: Option<String>,
    #[serde(default)]
    braces: bool,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawAcItem {
    Flat(i32),
    Detailed(RawAcDetail),
    Special { special: String },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawAc {
    Flat(i32),
    List(Vec<RawAcItem>),
}

/// Parse an armor class field. The first entry of the result is the primary AC.
pub fn parse_ac(value: &Value) -> Result<Vec<ArmorClass>> {
    let items = match decode::<RawAc>(value, "armor class")? {
        RawAc::Flat(ac) => vec![RawAcItem::Flat(ac)],
        RawAc::List(items) => items,
    };

    let entries: Vec<ArmorClass> = items
        .into_iter()
        .map(|item| match item {
            RawAcItem::Flat(ac) => ArmorClass {
                value: ac,
                note: None,
                special: None,
            },
            RawAcItem::Detailed(detail) => {
                let note = match detail.condition {
                    Some(condition) if detail.braces => Some(format!("({})", condition)),
                    Some(condition) => Some(condition),
                    None if !detail.from.is_empty() => Some(detail.from.join(", ")),
                    None => None,
                };
                ArmorClass {
                    value: detail.ac,
                    note,
                    special: None,
                }
            }
            RawAcItem::Special { special } => ArmorClass {
                value: 0,
                note: None,
                special: Some(special),
            },
        })
        .collect();

    if entries.is_empty() {
        return Err(DmkitError::Shape(format!("empty armor class: {}", value)));
    }
    Ok(entries)
}

#[derive(Deserialize)]
struct RawHp {
    average: Option<i32>,
    formula: Option<String>,
    special: Option<String>,
}

pub fn parse_hp(value: &Value) -> Result<HitPoints> {
    let raw: RawHp = decode(value, "hit points")?;
    Ok(HitPoints {
        average: raw.average.unwrap_or_default(),
        formula: raw.formula.unwrap_or_default(),
        special: raw.special,
    })
}

// ---------------------------------------------------------------------------
// Speed
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(untagged)]
enum RawMovement {
    Flat(u32),
    Conditional {
        number: u32,
        condition: Option<String>,
    },
    SameAsWalk(bool),
}

#[derive(Deserialize)]
struct RawSpeedTable {
    walk: Option<RawMovement>,
    fly: Option<RawMovement>,
    burrow: Option<RawMovement>,
    swim: Option<RawMovement>,
    climb: Option<RawMovement>,
    #[serde(default, rename = "canHover")]
    can_hover: bool,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawSpeed {
    Flat(u32),
    Table(RawSpeedTable),
}

fn movement(
    kind: &str,
    raw: Option<RawMovement>,
    walk: Option<&Noted<u32>>,
) -> Result<Option<Noted<u32>>> {
    match raw {
        None | Some(RawMovement::SameAsWalk(false)) => Ok(None),
        Some(RawMovement::Flat(value)) => Ok(Some(Noted::new(value))),
        Some(RawMovement::Conditional { number, condition }) => {
            Ok(Some(Noted::with_note(number, condition)))
        }
        Some(RawMovement::SameAsWalk(true)) => match walk {
            Some(walk) => Ok(Some(Noted::new(walk.value))),
            None => Err(DmkitError::Shape(format!(
                "{} speed is 'equal to walk' but no walk speed is given",
                kind
            ))),
        },
    }
}

/// Parse a speed field. Walk is resolved first so `true` entries can refer to it.
pub fn parse_speed(value: &Value) -> Result<Speed> {
    let table = match decode::<RawSpeed>(value, "speed")? {
        RawSpeed::Flat(walk) => {
            return Ok(Speed {
                walk: Some(Noted::new(walk)),
                ..Default::default()
            });
        }
        RawSpeed::Table(table) => table,
    };

    let walk = movement("walk", table.walk, None)?;
    Ok(Speed {
        fly: movement("fly", table.fly, walk.as_ref())?,
        burrow: movement("burrow", table.burrow, walk.as_ref())?,
        swim: movement("swim", table.swim, walk.as_ref())?,
        climb: movement("climb", table.climb, walk.as_ref())?,
        walk,
        can_hover: table.can_hover,
    })
}

// ---------------------------------------------------------------------------
// Damage and condition modifiers
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct RawChoose {
    from: Vec<String>,
}

#[derive(Deserialize)]
struct RawDamageGroup {
    vulnerable: Option<Vec<RawDamageModifier>>,
    resist: Option<Vec<RawDamageModifier>>,
    immune: Option<Vec<RawDamageModifier>>,
    #[serde(rename = "conditionImmune")]
    condition_immune: Option<Vec<RawDamageModifier>>,
    #[serde(rename = "preNote")]
    pre_note: Option<String>,
    note: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawDamageModifier {
    Plain(String),
    Special { special: String },
    Choice { choose: RawChoose },
    Group(RawDamageGroup),
}

fn modifier_text(raw: RawDamageModifier) -> Result<Noted<String>> {
    match raw {
        RawDamageModifier::Plain(text) | RawDamageModifier::Special { special: text } => {
            Ok(Noted::new(text))
        }
        RawDamageModifier::Choice { choose } => {
            Ok(Noted::new(format!("one of: {}", choose.from.join(", "))))
        }
        RawDamageModifier::Group(group) => {
            let items = group
                .vulnerable
                .or(group.resist)
                .or(group.immune)
                .or(group.condition_immune)
                .ok_or_else(|| {
                    DmkitError::Shape("damage modifier object has no modifier list".to_string())
                })?;
            let parts = items
                .into_iter()
                .map(|item| modifier_text(item).map(|m| m.to_string()))
                .collect::<Result<Vec<_>>>()?;
            let mut text = parts.join(", ");
            if let Some(pre_note) = group.pre_note {
                text = format!("{} {}", pre_note, text);
            }
            Ok(Noted::with_note(text, group.note))
        }
    }
}

/// Parse a vulnerability/resistance/immunity list into (value, note) pairs.
pub fn parse_damage_modifiers(value: &Value) -> Result<Vec<DamageModifier>> {
    let items: Vec<RawDamageModifier> = decode(value, "damage modifier list")?;
    items.into_iter().map(modifier_text).collect()
}

// ---------------------------------------------------------------------------
// Skills
// ---------------------------------------------------------------------------

fn parse_modifier(skill: &str, value: &Value) -> Result<i32> {
    let parsed = match value {
        Value::String(s) => s.trim().trim_start_matches('+').parse::<i32>().ok(),
        Value::Number(n) => n.as_i64().and_then(|n| i32::try_from(n).ok()),
        _ => None,
    };
    parsed.ok_or_else(|| {
        DmkitError::Shape(format!("skill '{}' has an invalid modifier: {}", skill, value))
    })
}

fn skill_group(value: &Value, mode: SelectionMode) -> Result<SkillList> {
    let map = value
        .as_object()
        .ok_or_else(|| DmkitError::Shape(format!("skill group must be an object: {}", value)))?;
    let mut list = skill_map(map)?;
    list.mode = mode;
    Ok(list)
}

fn skill_map(map: &Map<String, Value>) -> Result<SkillList> {
    let mut skills = Vec::new();
    for (name, value) in map {
        if name == "other" {
            let groups = value.as_array().ok_or_else(|| {
                DmkitError::Shape(format!("skill 'other' must be a list: {}", value))
            })?;
            for group in groups {
                let group = group.as_object().ok_or_else(|| {
                    DmkitError::Shape(format!("skill group must be an object: {}", group))
                })?;
                for (kind, body) in group {
                    match kind.as_str() {
                        "oneOf" => skills.push(SkillEntry::Group(skill_group(body, SelectionMode::One)?)),
                        "anyOf" => skills.push(SkillEntry::Group(skill_group(body, SelectionMode::Any)?)),
                        "allOf" => skills.extend(skill_group(body, SelectionMode::All)?.skills),
                        other => {
                            return Err(DmkitError::Shape(format!(
                                "unknown skill group '{}'",
                                other
                            )));
                        }
                    }
                }
            }
            continue;
        }

        let folded = name.to_lowercase();
        if !SKILLS.contains(&folded.as_str()) {
            return Err(DmkitError::Validation(format!("invalid skill name: {}", name)));
        }
        skills.push(SkillEntry::Skill(SkillModifier {
            skill: folded,
            modifier: parse_modifier(name, value)?,
        }));
    }
    Ok(SkillList {
        mode: SelectionMode::All,
        skills,
    })
}

/// Parse a skill map such as `{"perception": "+5", "other": [{"oneOf": {...}}]}`.
pub fn parse_skills(value: &Value) -> Result<SkillList> {
    let map = value
        .as_object()
        .ok_or_else(|| DmkitError::Shape(format!("skills must be an object: {}", value)))?;
    skill_map(map)
}

// ---------------------------------------------------------------------------
// Challenge rating
// ---------------------------------------------------------------------------

/// Experience points awarded for a challenge rating.
pub fn xp_for_cr(cr: &str) -> Option<u32> {
    let xp = match cr {
        "0" => 10,
        "1/8" => 25,
        "1/4" => 50,
        "1/2" => 100,
        "1" => 200,
        "2" => 450,
        "3" => 700,
        "4" => 1100,
        "5" => 1800,
        "6" => 2300,
        "7" => 2900,
        "8" => 3900,
        "9" => 5000,
        "10" => 5900,
        "11" => 7200,
        "12" => 8400,
        "13" => 10000,
        "14" => 11500,
        "15" => 13000,
        "16" => 15000,
        "17" => 18000,
        "18" => 20000,
        "19" => 22000,
        "20" => 25000,
        "21" => 33000,
        "22" => 41000,
        "23" => 50000,
        "24" => 62000,
        "25" => 75000,
        "26" => 90000,
        "27" => 105000,
        "28" => 120000,
        "29" => 135000,
        "30" => 155000,
        _ => return None,
    };
    Some(xp)
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChallengeRating {
    pub cr: String,
    pub lair: Option<String>,
    pub coven: Option<String>,
    pub xp: u32,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawCr {
    Plain(String),
    Detailed {
        cr: String,
        xp: Option<Value>,
        lair: Option<String>,
        coven: Option<String>,
    },
}

/// Parse a challenge rating. XP always comes from the CR table; a disagreeing upstream
/// override is ignored. CRs missing from the table (`"Unknown"`, `"—"`) are kept with 0 XP.
pub fn parse_cr(value: &Value) -> Result<ChallengeRating> {
    let (cr, xp_override, lair, coven) = match decode::<RawCr>(value, "challenge rating")? {
        RawCr::Plain(cr) => (cr, None, None, None),
        RawCr::Detailed {
            cr,
            xp,
            lair,
            coven,
        } => (cr, xp, lair, coven),
    };

    let xp = xp_for_cr(&cr).unwrap_or_else(|| {
        debug!("No XP for challenge rating '{}'; using 0", cr);
        0
    });

    if let Some(supplied) = xp_override {
        let supplied = match &supplied {
            Value::String(s) => s.parse::<u32>().ok(),
            Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
            _ => None,
        };
        if supplied != Some(xp) {
            debug!("Ignoring XP override {:?} for CR {} (table value {})", supplied, cr, xp);
        }
    }

    Ok(ChallengeRating {
        cr,
        lair,
        coven,
        xp,
    })
}

// ---------------------------------------------------------------------------
// Creature type
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct CreatureType {
    pub name: String,
    pub subtype: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawTypeName {
    Plain(String),
    Choose { choose: Vec<String> },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawTag {
    Plain(String),
    Prefixed { prefix: String, tag: String },
}

#[derive(Deserialize)]
struct RawTypeObject {
    #[serde(rename = "type")]
    name: RawTypeName,
    #[serde(default)]
    tags: Vec<RawTag>,
    #[serde(rename = "swarmSize")]
    swarm_size: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawCreatureType {
    Plain(String),
    Detailed(RawTypeObject),
}

pub fn parse_creature_type(value: &Value) -> Result<CreatureType> {
    let detail = match decode::<RawCreatureType>(value, "creature type")? {
        RawCreatureType::Plain(name) => {
            return Ok(CreatureType {
                name,
                subtype: None,
            });
        }
        RawCreatureType::Detailed(detail) => detail,
    };

    let mut name = match detail.name {
        RawTypeName::Plain(name) => name,
        RawTypeName::Choose { choose } => choose.join(" or "),
    };

    let tags: Vec<String> = detail
        .tags
        .into_iter()
        .map(|tag| match tag {
            RawTag::Plain(tag) => tag,
            RawTag::Prefixed { prefix, tag } => format!("{} {}", prefix, tag),
        })
        .collect();

    if let Some(code) = detail.swarm_size {
        name = format!("swarm of {} {}s", size_from_code(&code)?, name);
    }

    Ok(CreatureType {
        name,
        subtype: (!tags.is_empty()).then(|| tags.join(", ")),
    })
}

// ---------------------------------------------------------------------------
// Spell level keys
// ---------------------------------------------------------------------------

/// Parse a spell level or per-day key such as `"3"` or `"2e"`.
///
/// Returns the number and whether the trailing annotation marks the count as per spell.
pub fn parse_level_key(key: &str) -> Result<(u32, bool)> {
    let digits = key.trim_end_matches(|c: char| !c.is_ascii_digit());
    let annotation = &key[digits.len()..];
    let number = digits
        .parse::<u32>()
        .map_err(|_| DmkitError::Shape(format!("invalid level key '{}'", key)))?;
    Ok((number, annotation.contains('e')))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size(&json!(["L"])).unwrap(), Size::Large);
        assert_eq!(parse_size(&json!(["M", "S"])).unwrap(), Size::Medium);
        assert_eq!(parse_size(&json!("T")).unwrap(), Size::Tiny);
        assert!(parse_size(&json!(["Q"])).unwrap_err().is_shape());
        assert!(parse_size(&json!([])).unwrap_err().is_shape());
        assert_eq!(parse_sizes(&json!(["S", "M"])).unwrap(), vec![Size::Small, Size::Medium]);
    }

    #[test]
    fn test_alignment_simple_codes() {
        assert_eq!(alignment_string(&json!(["C", "E"])).unwrap(), "Chaotic Evil");
        assert_eq!(alignment_string(&json!(["U"])).unwrap(), "Unaligned");
        assert_eq!(alignment_string(&json!(["A"])).unwrap(), "Any");
        assert_eq!(alignment_string(&json!(["N"])).unwrap(), "Neutral");
        assert_eq!(alignment_string(&json!(["A", "E"])).unwrap(), "Any Evil");
        assert!(alignment_string(&json!(["Z"])).is_err());
    }

    #[test]
    fn test_alignment_exclusion_patterns() {
        assert_eq!(
            alignment_string(&json!(["L", "NX", "C", "NY", "E"])).unwrap(),
            "Any Non-Good Alignment"
        );
        assert_eq!(
            alignment_string(&json!(["NX", "C", "G", "NY", "E"])).unwrap(),
            "Any Non-Lawful Alignment"
        );
        assert_eq!(
            alignment_string(&json!(["C", "G", "NY", "E"])).unwrap(),
            "Any Chaotic Alignment"
        );
        assert_eq!(
            alignment_string(&json!(["L", "G", "NY", "E"])).unwrap(),
            "Any Lawful Alignment"
        );
        assert_eq!(
            alignment_string(&json!(["L", "NX", "C", "E"])).unwrap(),
            "Any Evil Alignment"
        );
        assert_eq!(
            alignment_string(&json!(["L", "NX", "C", "G"])).unwrap(),
            "Any Good Alignment"
        );
        assert_eq!(
            alignment_string(&json!(["NX", "NY", "N"])).unwrap(),
            "Any Neutral Alignment"
        );
    }

    #[test]
    fn test_alignment_every_letter_subset() {
        const LETTERS: [&str; 5] = ["L", "N", "C", "G", "E"];

        for mask in 0u32..32 {
            let codes: Vec<&str> = LETTERS
                .iter()
                .enumerate()
                .filter(|(i, _)| mask & (1 << *i) != 0)
                .map(|(_, code)| *code)
                .collect();
            let missing: Vec<&str> = LETTERS.iter().copied().filter(|c| !codes.contains(c)).collect();

            let expected = match (codes.len(), missing.as_slice()) {
                (1 | 2, _) => Some(
                    codes
                        .iter()
                        .map(|c| alignment_word(c).unwrap())
                        .collect::<Vec<_>>()
                        .join(" "),
                ),
                (4, ["L"]) => Some("Any Chaotic Alignment".to_string()),
                (4, ["C"]) => Some("Any Lawful Alignment".to_string()),
                (4, ["G"]) => Some("Any Evil Alignment".to_string()),
                (4, ["E"]) => Some("Any Good Alignment".to_string()),
                _ => None,
            };

            let result = alignment_string(&json!(codes));
            match expected {
                Some(text) => assert_eq!(result.unwrap(), text, "codes {:?}", codes),
                None => assert!(result.unwrap_err().is_shape(), "codes {:?}", codes),
            }
        }
    }

    #[test]
    fn test_alignment_every_axis_exclusion() {
        let expected = [
            ("L", "Any Non-Lawful Alignment"),
            ("NX", "Any Non-Neutral Alignment"),
            ("C", "Any Non-Chaotic Alignment"),
            ("G", "Any Non-Good Alignment"),
            ("NY", "Any Non-Neutral Alignment"),
            ("E", "Any Non-Evil Alignment"),
        ];

        for (left_out, text) in expected {
            let mut codes: Vec<&str> = AXIS_CODES.iter().copied().filter(|c| *c != left_out).collect();
            assert_eq!(alignment_string(&json!(codes)).unwrap(), text);
            codes.reverse();
            assert_eq!(alignment_string(&json!(codes)).unwrap(), text);

            // A generic neutral in place of an axis code is not an exclusion list.
            codes[0] = "N";
            assert!(alignment_string(&json!(codes)).is_err());
        }
    }

    #[test]
    fn test_alignment_special_and_weighted() {
        assert_eq!(
            alignment_string(&json!([{"special": "as the eidolon's alignment"}])).unwrap(),
            "as the eidolon's alignment"
        );
        assert_eq!(
            alignment_string(&json!([
                {"alignment": ["C", "G"], "chance": 75},
                {"alignment": ["N", "E"], "chance": 25}
            ]))
            .unwrap(),
            "Chaotic Good (75%) or Neutral Evil (25%)"
        );
        assert_eq!(
            alignment_string(&json!([
                {"alignment": ["L", "G"], "chance": 50},
                {"alignment": ["N"], "note": "when calm"},
                {"alignment": ["C", "E"]}
            ]))
            .unwrap(),
            "Lawful Good (50%), Neutral (when calm) or Chaotic Evil"
        );
        assert_eq!(
            alignment_string(&json!([{"alignment": ["C", "G"], "note": "chaotic evil when possessed"}]))
                .unwrap(),
            "Chaotic Good (chaotic evil when possessed)"
        );
    }

    #[test]
    fn test_alignment_undocumented_shapes_fail() {
        let err = alignment_string(&json!(["L", "G", "E"])).unwrap_err();
        assert!(err.is_shape());
        assert!(err.to_string().contains("\"L\""));
        assert!(alignment_string(&json!([])).is_err());
        assert!(alignment_string(&json!(["L", {"special": "x"}])).is_err());
        assert!(alignment_string(&json!("LG")).is_err());
    }

    #[test]
    fn test_parse_ac() {
        let ac = parse_ac(&json!(15)).unwrap();
        assert_eq!(ac, vec![ArmorClass { value: 15, note: None, special: None }]);

        let ac = parse_ac(&json!([
            {"ac": 17, "from": ["natural armor", "shield"]},
            {"ac": 15, "condition": "without shield", "braces": true},
            12,
            {"special": "12 + your Intelligence modifier"}
        ]))
        .unwrap();
        assert_eq!(ac.len(), 4);
        assert_eq!(ac[0].value, 17);
        assert_eq!(ac[0].note.as_deref(), Some("natural armor, shield"));
        assert_eq!(ac[1].note.as_deref(), Some("(without shield)"));
        assert_eq!(ac[2].value, 12);
        assert_eq!(ac[3].special.as_deref(), Some("12 + your Intelligence modifier"));

        assert!(parse_ac(&json!("fifteen")).unwrap_err().is_shape());
    }

    #[test]
    fn test_parse_speed() {
        let speed = parse_speed(&json!(30)).unwrap();
        assert_eq!(speed.walk, Some(Noted::new(30)));
        assert_eq!(speed.fly, None);

        let speed = parse_speed(&json!({
            "walk": 30,
            "fly": {"number": 60, "condition": "(hover)"},
            "swim": true,
            "canHover": true
        }))
        .unwrap();
        assert_eq!(speed.fly, Some(Noted::with_note(60, Some("(hover)".into()))));
        assert_eq!(speed.swim, Some(Noted::new(30)));
        assert!(speed.can_hover);

        assert!(parse_speed(&json!({"swim": true})).unwrap_err().is_shape());
        assert_eq!(parse_speed(&json!({"walk": 25, "climb": false})).unwrap().climb, None);
    }

    #[test]
    fn test_parse_damage_modifiers() {
        let mods = parse_damage_modifiers(&json!([
            "fire",
            {"resist": ["bludgeoning", "piercing", "slashing"], "note": "from nonmagical attacks", "cond": true},
            {"special": "damage from spells"},
            {"immune": ["cold"], "preNote": "while in ice form"}
        ]))
        .unwrap();
        assert_eq!(mods[0], Noted::new("fire".to_string()));
        assert_eq!(mods[1].value, "bludgeoning, piercing, slashing");
        assert_eq!(mods[1].note.as_deref(), Some("from nonmagical attacks"));
        assert_eq!(mods[2].value, "damage from spells");
        assert_eq!(mods[3].value, "while in ice form cold");

        let mods = parse_damage_modifiers(&json!([{"choose": {"from": ["acid", "cold"]}}])).unwrap();
        assert_eq!(mods[0].value, "one of: acid, cold");

        assert!(parse_damage_modifiers(&json!([{"note": "nothing"}])).is_err());
        assert!(parse_damage_modifiers(&json!("fire")).is_err());
    }

    #[test]
    fn test_parse_skills() {
        let skills = parse_skills(&json!({
            "perception": "+5",
            "Stealth": "+7",
            "other": [
                {"oneOf": {"arcana": "+7", "nature": "+2"}},
                {"allOf": {"history": "+4"}}
            ]
        }))
        .unwrap();
        assert_eq!(skills.mode, SelectionMode::All);
        assert_eq!(skills.skills.len(), 4);
        assert_eq!(
            skills.skills[0],
            SkillEntry::Skill(SkillModifier { skill: "perception".into(), modifier: 5 })
        );
        assert_eq!(
            skills.skills[1],
            SkillEntry::Skill(SkillModifier { skill: "stealth".into(), modifier: 7 })
        );
        match &skills.skills[2] {
            SkillEntry::Group(group) => {
                assert_eq!(group.mode, SelectionMode::One);
                assert_eq!(group.skills.len(), 2);
            }
            other => panic!("expected group, got {:?}", other),
        }
        assert_eq!(
            skills.skills[3],
            SkillEntry::Skill(SkillModifier { skill: "history".into(), modifier: 4 })
        );
    }

    #[test]
    fn test_parse_skills_rejects_unknown_names() {
        let err = parse_skills(&json!({"basket weaving": "+3"})).unwrap_err();
        assert!(matches!(err, DmkitError::Validation(_)));
        assert!(err.to_string().contains("basket weaving"));
    }

    #[test]
    fn test_cr_xp_table() {
        assert_eq!(parse_cr(&json!("5")).unwrap().xp, 1800);
        let cr = parse_cr(&json!({"cr": "3", "xp": "999"})).unwrap();
        assert_eq!(cr.cr, "3");
        assert_eq!(cr.xp, 700);
        let cr = parse_cr(&json!({"cr": "10", "lair": "11"})).unwrap();
        assert_eq!(cr.lair.as_deref(), Some("11"));
        assert_eq!(parse_cr(&json!("1/8")).unwrap().xp, 25);
        assert_eq!(parse_cr(&json!("30")).unwrap().xp, 155000);
        assert!(parse_cr(&json!(31)).unwrap_err().is_shape());
    }

    #[test]
    fn test_unlisted_cr_has_no_xp() {
        let cr = parse_cr(&json!("Unknown")).unwrap();
        assert_eq!(cr.cr, "Unknown");
        assert_eq!(cr.xp, 0);
        assert_eq!(parse_cr(&json!("\u{2014}")).unwrap().xp, 0);
        assert_eq!(parse_cr(&json!({"cr": "31", "xp": 1})).unwrap().xp, 0);
    }

    #[test]
    fn test_parse_creature_type() {
        let t = parse_creature_type(&json!("dragon")).unwrap();
        assert_eq!(t.name, "dragon");
        assert_eq!(t.subtype, None);

        let t = parse_creature_type(&json!({
            "type": "humanoid",
            "tags": ["elf", {"prefix": "Shadar-kai", "tag": "elf"}]
        }))
        .unwrap();
        assert_eq!(t.subtype.as_deref(), Some("elf, Shadar-kai elf"));

        let t = parse_creature_type(&json!({"type": "beast", "swarmSize": "T"})).unwrap();
        assert_eq!(t.name, "swarm of Tiny beasts");

        let t = parse_creature_type(&json!({"type": {"choose": ["celestial", "fiend"]}})).unwrap();
        assert_eq!(t.name, "celestial or fiend");

        assert!(parse_creature_type(&json!(7)).is_err());
    }

    #[test]
    fn test_parse_level_key() {
        assert_eq!(parse_level_key("3").unwrap(), (3, false));
        assert_eq!(parse_level_key("2e").unwrap(), (2, true));
        assert_eq!(parse_level_key("10").unwrap(), (10, false));
        assert!(parse_level_key("e").is_err());
    }
}
