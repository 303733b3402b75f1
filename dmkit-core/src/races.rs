//! Race normalization.

use crate::context::{Conversion, SkipReason};
use crate::entries::parse_entries;
use crate::error::{DmkitError, Result};
use crate::models::{
    AbilityBonus, Age, DamageModifier, HeightAndWeight, Race, SkillProficiency, Speed,
};
use crate::raw::{RawRecord, as_record, display_key, field, listify, record_key, required};
use crate::values::{ability_name, parse_damage_modifiers, parse_sizes, parse_speed};
use serde::Deserialize;
use serde_json::Value;

const ABILITY_CODES: [&str; 6] = ["str", "dex", "con", "int", "wis", "cha"];

fn to_i32(value: &Value, what: &str) -> Result<i32> {
    value
        .as_i64()
        .and_then(|n| i32::try_from(n).ok())
        .ok_or_else(|| DmkitError::Shape(format!("{} must be an integer, got {}", what, value)))
}

fn to_u32(value: &Value, what: &str) -> Result<u32> {
    value
        .as_u64()
        .and_then(|n| u32::try_from(n).ok())
        .ok_or_else(|| DmkitError::Shape(format!("{} must be a count, got {}", what, value)))
}

fn string_items(value: &Value, what: &str) -> Result<Vec<String>> {
    listify(value)
        .iter()
        .map(|item| {
            item.as_str()
                .map(str::to_string)
                .ok_or_else(|| DmkitError::Shape(format!("{} must hold strings, got {}", what, item)))
        })
        .collect()
}

fn parse_ability_bonuses(value: &Value) -> Result<Vec<AbilityBonus>> {
    let mut bonuses = Vec::new();
    for option in listify(value) {
        let option = as_record(&option, "ability bonus")?;
        for (code, amount) in option {
            if ABILITY_CODES.contains(&code.as_str()) {
                bonuses.push(AbilityBonus::Fixed {
                    ability: ability_name(code).to_string(),
                    amount: to_i32(amount, "ability bonus")?,
                });
                continue;
            }
            if code != "choose" {
                return Err(DmkitError::Shape(format!("unknown ability bonus key '{}'", code)));
            }
            let choose = as_record(amount, "ability choice")?;
            let from: Vec<String> = match choose.get("from") {
                Some(from) => string_items(from, "ability choice")?
                    .iter()
                    .map(|c| ability_name(c).to_string())
                    .collect(),
                None => ABILITY_CODES.iter().map(|c| ability_name(c).to_string()).collect(),
            };
            bonuses.push(AbilityBonus::Choice {
                from,
                count: choose.get("count").map(|c| to_u32(c, "choice count")).transpose()?.unwrap_or(1),
                amount: choose.get("amount").map(|a| to_i32(a, "choice amount")).transpose()?.unwrap_or(1),
            });
        }
    }
    Ok(bonuses)
}

fn parse_skill_proficiencies(value: &Value) -> Result<Vec<SkillProficiency>> {
    let mut proficiencies = Vec::new();
    for option in listify(value) {
        let option = as_record(&option, "skill proficiency")?;
        let fixed: Vec<String> = option
            .iter()
            .filter(|(_, granted)| granted.as_bool() == Some(true))
            .map(|(skill, _)| skill.clone())
            .collect();
        if !fixed.is_empty() {
            proficiencies.push(SkillProficiency::Fixed { skills: fixed });
        }
        if let Some(choose) = option.get("choose") {
            let choose = as_record(choose, "skill choice")?;
            proficiencies.push(SkillProficiency::Choice {
                from: match choose.get("from") {
                    Some(from) => string_items(from, "skill choice")?,
                    None => Vec::new(),
                },
                count: choose.get("count").map(|c| to_u32(c, "choice count")).transpose()?.unwrap_or(1),
            });
        }
        if let Some(any) = option.get("any") {
            proficiencies.push(SkillProficiency::Any {
                count: to_u32(any, "skill count")?,
            });
        }
    }
    Ok(proficiencies)
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn parse_languages(value: &Value) -> Result<Vec<String>> {
    let mut languages = Vec::new();
    for option in listify(value) {
        let option = as_record(&option, "language proficiency")?;
        for (language, grant) in option {
            match grant {
                Value::Bool(true) => languages.push(capitalize(language)),
                Value::Bool(false) => {}
                Value::Number(_) if language == "anyStandard" => {
                    languages.push(format!("Any {} standard", to_u32(grant, "language count")?));
                }
                Value::Number(_) => {
                    languages.push(format!("{} ({})", capitalize(language), to_u32(grant, "language count")?));
                }
                // Choice objects are described in the race's entries.
                Value::Object(_) => {}
                other => {
                    return Err(DmkitError::Shape(format!(
                        "invalid language proficiency '{}': {}",
                        language, other
                    )));
                }
            }
        }
    }
    Ok(languages)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawHeightAndWeight {
    base_height: u32,
    height_mod: Option<String>,
    base_weight: Option<u32>,
    weight_mod: Option<String>,
}

fn modifiers_field(record: &RawRecord, name: &str) -> Result<Vec<DamageModifier>> {
    match record.get(name) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(value) => parse_damage_modifiers(value),
    }
}

pub fn normalize_race(record: &RawRecord) -> Result<Conversion<Race>> {
    if record.contains_key("_copy") {
        return Ok(Conversion::Skipped(SkipReason::UnresolvedCopy));
    }

    let height_and_weight = field::<RawHeightAndWeight>(record, "heightAndWeight")?.map(|hw| {
        HeightAndWeight {
            base_height: hw.base_height,
            height_mod: hw.height_mod,
            base_weight: hw.base_weight,
            weight_mod: hw.weight_mod,
        }
    });

    let race = Race {
        key: record_key(record).unwrap_or_else(|| display_key(record)),
        name: required(record, "name")?,
        source: required(record, "source")?,
        page: field(record, "page")?.unwrap_or_default(),
        sizes: match record.get("size") {
            Some(size) => parse_sizes(size)?,
            None => Vec::new(),
        },
        speed: match record.get("speed") {
            Some(speed) => parse_speed(speed)?,
            None => Speed::default(),
        },
        ability_bonuses: match record.get("ability") {
            Some(ability) => parse_ability_bonuses(ability)?,
            None => Vec::new(),
        },
        age: field::<Age>(record, "age")?,
        height_and_weight,
        darkvision: field(record, "darkvision")?,
        blindsight: field(record, "blindsight")?,
        skill_proficiencies: match record.get("skillProficiencies") {
            Some(skills) => parse_skill_proficiencies(skills)?,
            None => Vec::new(),
        },
        languages: match record.get("languageProficiencies") {
            Some(languages) => parse_languages(languages)?,
            None => Vec::new(),
        },
        traits: match record.get("entries") {
            Some(entries) => parse_entries(entries)?,
            None => Vec::new(),
        },
        dmg_resistances: modifiers_field(record, "resist")?,
        dmg_vulnerabilities: modifiers_field(record, "vulnerable")?,
        dmg_immunities: modifiers_field(record, "immune")?,
        cond_immunities: modifiers_field(record, "conditionImmune")?,
    };
    Ok(Conversion::Converted(race))
}
