//! Monster (bestiary) normalization.

use crate::context::{Conversion, ConversionContext, SkipReason};
use crate::entries::{Entry, parse_entries};
use crate::error::{DmkitError, Result};
use crate::models::{
    AbilityScores, DailySpells, DamageModifier, Monster, SourceRef, SpellSlotLevel, Spellcasting,
};
use crate::raw::{RawRecord, as_record, display_key, field, field_or_default, record_key, required};
use crate::values::{
    ability_name, alignment_string, parse_ac, parse_cr, parse_creature_type, parse_damage_modifiers,
    parse_hp, parse_level_key, parse_size, parse_skills, parse_speed,
};
use serde_json::{Value, json};
use std::collections::BTreeMap;

fn entries_field(record: &RawRecord, name: &str) -> Result<Vec<Entry>> {
    match record.get(name) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(value) => parse_entries(value),
    }
}

fn modifiers_field(record: &RawRecord, name: &str) -> Result<Vec<DamageModifier>> {
    match record.get(name) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(value) => parse_damage_modifiers(value),
    }
}

/// A list of plain strings; anything else fails validation.
fn string_list(record: &RawRecord, name: &str) -> Result<Vec<String>> {
    match record.get(name) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str().map(str::to_string).ok_or_else(|| {
                    DmkitError::Validation(format!("'{}' must hold only strings, got {}", name, item))
                })
            })
            .collect(),
        Some(other) => Err(DmkitError::Validation(format!(
            "'{}' must be a list of strings, got {}",
            name, other
        ))),
    }
}

/// Spell names may be plain or `{entry, hidden}` objects.
fn spell_name(value: &Value) -> Result<String> {
    match value {
        Value::String(name) => Ok(name.clone()),
        Value::Object(obj) => obj
            .get("entry")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| DmkitError::Shape(format!("invalid spell entry {}", value))),
        other => Err(DmkitError::Shape(format!("invalid spell entry {}", other))),
    }
}

fn spell_names(value: &Value) -> Result<Vec<String>> {
    match value {
        Value::Array(items) => items.iter().map(spell_name).collect(),
        other => Err(DmkitError::Shape(format!("spell list must be a list, got {}", other))),
    }
}

fn parse_daily(value: &Value) -> Result<Vec<DailySpells>> {
    let daily = as_record(value, "daily spells")?;
    daily
        .iter()
        .map(|(key, spells)| -> Result<DailySpells> {
            let (per_day, each) = parse_level_key(key)?;
            Ok(DailySpells {
                per_day,
                each,
                spells: spell_names(spells)?,
            })
        })
        .collect()
}

/// Spell slots keyed by level become a dense list indexed by level.
fn parse_slots(value: &Value) -> Result<Vec<SpellSlotLevel>> {
    let levels = as_record(value, "spell levels")?;
    let mut parsed = Vec::with_capacity(levels.len());
    for (key, level) in levels {
        let (number, _) = parse_level_key(key)?;
        let level = as_record(level, "spell level")?;
        parsed.push((
            number as usize,
            SpellSlotLevel {
                slots: field(level, "slots")?.unwrap_or_default(),
                spells: match level.get("spells") {
                    Some(spells) => spell_names(spells)?,
                    None => Vec::new(),
                },
            },
        ));
    }

    let Some(max) = parsed.iter().map(|(level, _)| *level).max() else {
        return Ok(Vec::new());
    };
    let mut slots = vec![SpellSlotLevel::default(); max + 1];
    for (level, slot) in parsed {
        slots[level] = slot;
    }
    Ok(slots)
}

pub fn parse_spellcasting(value: &Value) -> Result<Spellcasting> {
    let block = as_record(value, "spellcasting")?;
    Ok(Spellcasting {
        name: required(block, "name")?,
        ability: field::<String>(block, "ability")?.map(|code| ability_name(&code).to_string()),
        header: entries_field(block, "headerEntries")?,
        footer: entries_field(block, "footerEntries")?,
        at_will: match block.get("will") {
            Some(will) => spell_names(will)?,
            None => Vec::new(),
        },
        daily: match block.get("daily") {
            Some(daily) => parse_daily(daily)?,
            None => Vec::new(),
        },
        slots: match block.get("spells") {
            Some(spells) => parse_slots(spells)?,
            None => Vec::new(),
        },
    })
}

fn skip_reason(record: &RawRecord, key: &str, ctx: &ConversionContext) -> Option<SkipReason> {
    if record.contains_key("_copy") {
        Some(SkipReason::UnresolvedCopy)
    } else if record.contains_key("summonedBySpell") || record.contains_key("summonedByClass") {
        Some(SkipReason::Summoned)
    } else if ctx.is_ignored(key) {
        Some(SkipReason::Ignored)
    } else {
        None
    }
}

pub fn normalize_monster(record: &RawRecord, ctx: &ConversionContext) -> Result<Conversion<Monster>> {
    let key = record_key(record).unwrap_or_else(|| display_key(record));
    if let Some(reason) = skip_reason(record, &key, ctx) {
        return Ok(Conversion::Skipped(reason));
    }

    let passive = match record.get("passive") {
        Some(Value::Number(n)) => n
            .as_i64()
            .and_then(|p| i32::try_from(p).ok())
            .ok_or_else(|| DmkitError::Validation(format!("'passive' must be an integer, got {}", n)))?,
        Some(other) => {
            return Err(DmkitError::Validation(format!(
                "'passive' must be an integer, got {}",
                other
            )));
        }
        None => return Err(DmkitError::MissingField("passive".to_string())),
    };

    let creature_type = parse_creature_type(
        record
            .get("type")
            .ok_or_else(|| DmkitError::MissingField("type".to_string()))?,
    )?;
    let alignment = record.get("alignment").cloned().unwrap_or_else(|| json!(["U"]));
    let cr = parse_cr(record.get("cr").unwrap_or(&json!("0")))?;

    let spellcasting = match record.get("spellcasting") {
        Some(Value::Array(blocks)) => blocks.iter().map(parse_spellcasting).collect::<Result<_>>()?,
        Some(other) => {
            return Err(DmkitError::Shape(format!("'spellcasting' must be a list, got {}", other)));
        }
        None => Vec::new(),
    };

    let skills = match record.get("skill") {
        Some(value) if !value.is_null() => Some(parse_skills(value)?),
        _ => None,
    };

    let monster = Monster {
        key,
        name: required(record, "name")?,
        source: required(record, "source")?,
        page: field(record, "page")?.unwrap_or_default(),
        size: parse_size(
            record
                .get("size")
                .ok_or_else(|| DmkitError::MissingField("size".to_string()))?,
        )?,
        creature_type: creature_type.name,
        subtype: creature_type.subtype,
        alignment: alignment_string(&alignment)?,
        ac: parse_ac(record.get("ac").ok_or_else(|| DmkitError::MissingField("ac".to_string()))?)?,
        hp: parse_hp(record.get("hp").ok_or_else(|| DmkitError::MissingField("hp".to_string()))?)?,
        speed: parse_speed(
            record
                .get("speed")
                .ok_or_else(|| DmkitError::MissingField("speed".to_string()))?,
        )?,
        cr: cr.cr,
        lair_cr: cr.lair,
        coven_cr: cr.coven,
        xp: cr.xp,
        abilities: AbilityScores {
            strength: required(record, "str")?,
            dexterity: required(record, "dex")?,
            constitution: required(record, "con")?,
            intelligence: required(record, "int")?,
            wisdom: required(record, "wis")?,
            charisma: required(record, "cha")?,
        },
        passive,
        skills,
        saves: field_or_default::<BTreeMap<String, String>>(record, "save")?,
        dmg_vulnerabilities: modifiers_field(record, "vulnerable")?,
        dmg_resistances: modifiers_field(record, "resist")?,
        dmg_immunities: modifiers_field(record, "immune")?,
        cond_immunities: modifiers_field(record, "conditionImmune")?,
        senses: string_list(record, "senses")?,
        languages: string_list(record, "languages")?,
        environment: string_list(record, "environment")?,
        traits: entries_field(record, "trait")?,
        actions_note: field(record, "actionNote")?,
        actions: entries_field(record, "action")?,
        bonus_actions: entries_field(record, "bonus")?,
        reactions: entries_field(record, "reaction")?,
        legendary_header: entries_field(record, "legendaryHeader")?,
        legendary_action_count: field(record, "legendaryActions")?,
        legendary_actions: entries_field(record, "legendary")?,
        mythic_header: entries_field(record, "mythicHeader")?,
        mythic_actions: entries_field(record, "mythic")?,
        spellcasting,
        other_sources: field_or_default::<Vec<SourceRef>>(record, "otherSources")?,
    };
    Ok(Conversion::Converted(monster))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConvertConfig;
    use crate::models::{CanonicalEntity, Size};

    fn record(value: Value) -> RawRecord {
        value.as_object().unwrap().clone()
    }

    fn goblin() -> RawRecord {
        record(json!({
            "name": "Goblin",
            "source": "MM",
            "page": 166,
            "size": ["S"],
            "type": {"type": "humanoid", "tags": ["goblinoid"]},
            "alignment": ["N", "E"],
            "ac": [{"ac": 15, "from": ["{@item leather armor|phb}", "{@item shield|phb}"]}],
            "hp": {"average": 7, "formula": "2d6"},
            "speed": {"walk": 30},
            "str": 8, "dex": 14, "con": 10, "int": 10, "wis": 8, "cha": 8,
            "skill": {"stealth": "+6"},
            "senses": ["darkvision 60 ft."],
            "passive": 9,
            "languages": ["Common", "Goblin"],
            "cr": "1/4",
            "trait": [{"name": "Nimble Escape", "entries": ["The goblin can take the Disengage or Hide action as a bonus action on each of its turns."]}],
            "action": [{"name": "Scimitar", "entries": ["{@atk mw} {@hit 4} to hit, reach 5 ft., one target. {@h}5 ({@damage 1d6 + 2}) slashing damage."]}],
            "environment": ["forest", "grassland"]
        }))
    }

    fn ctx() -> ConversionContext {
        ConversionContext::new(ConvertConfig::default())
    }

    #[test]
    fn test_normalize_goblin() {
        let monster = normalize_monster(&goblin(), &ctx()).unwrap().converted().unwrap();
        assert_eq!(monster.key, "Goblin-MM");
        assert_eq!(monster.size, Size::Small);
        assert_eq!(monster.creature_type, "humanoid");
        assert_eq!(monster.subtype.as_deref(), Some("goblinoid"));
        assert_eq!(monster.alignment, "Neutral Evil");
        assert_eq!(monster.ac[0].value, 15);
        assert_eq!(monster.xp, 50);
        assert_eq!(monster.abilities.dexterity, 14);
        assert_eq!(monster.passive, 9);
        assert_eq!(monster.traits[0].title(), Some("Nimble Escape"));
        assert_eq!(monster.environment, vec!["forest", "grassland"]);
    }

    #[test]
    fn test_monster_roundtrip() {
        let monster = normalize_monster(&goblin(), &ctx()).unwrap().converted().unwrap();
        let entity = CanonicalEntity::from(monster);
        let text = serde_json::to_string_pretty(&entity).unwrap();
        let back: CanonicalEntity = serde_json::from_str(&text).unwrap();
        assert_eq!(back, entity);
        assert!(!text.contains("null"));
        assert!(!text.contains("bonus_actions"));
    }

    #[test]
    fn test_ignored_monster_is_skipped() {
        let mut rec = goblin();
        rec.insert("name".into(), json!("Jenks"));
        rec.insert("source".into(), json!("WDH"));
        let result = normalize_monster(&rec, &ctx()).unwrap();
        assert_eq!(result, Conversion::Skipped(SkipReason::Ignored));
    }

    #[test]
    fn test_summoned_and_copy_are_skipped() {
        let mut rec = goblin();
        rec.insert("summonedBySpell".into(), json!("Summon Beast|TCE"));
        assert_eq!(
            normalize_monster(&rec, &ctx()).unwrap(),
            Conversion::Skipped(SkipReason::Summoned)
        );

        let mut rec = goblin();
        rec.insert("_copy".into(), json!({"name": "Goblin", "source": "MM"}));
        assert_eq!(
            normalize_monster(&rec, &ctx()).unwrap(),
            Conversion::Skipped(SkipReason::UnresolvedCopy)
        );
    }

    #[test]
    fn test_invalid_fields_fail_validation() {
        let mut rec = goblin();
        rec.insert("passive".into(), json!("9"));
        assert!(normalize_monster(&rec, &ctx()).unwrap_err().is_shape());

        let mut rec = goblin();
        rec.insert("senses".into(), json!("darkvision 60 ft."));
        assert!(normalize_monster(&rec, &ctx()).unwrap_err().is_shape());

        let mut rec = goblin();
        rec.insert("languages".into(), json!(["Common", 3]));
        assert!(normalize_monster(&rec, &ctx()).unwrap_err().is_shape());

        let mut rec = goblin();
        rec.remove("str");
        assert!(matches!(
            normalize_monster(&rec, &ctx()),
            Err(DmkitError::MissingField(name)) if name == "str"
        ));
    }

    #[test]
    fn test_defaults_for_alignment_and_cr() {
        let mut rec = goblin();
        rec.remove("alignment");
        rec.remove("cr");
        let monster = normalize_monster(&rec, &ctx()).unwrap().converted().unwrap();
        assert_eq!(monster.alignment, "Unaligned");
        assert_eq!(monster.cr, "0");
        assert_eq!(monster.xp, 10);
    }

    #[test]
    fn test_xp_override_is_ignored() {
        let mut rec = goblin();
        rec.insert("cr".into(), json!({"cr": "3", "xp": "999"}));
        let monster = normalize_monster(&rec, &ctx()).unwrap().converted().unwrap();
        assert_eq!(monster.xp, 700);
    }

    #[test]
    fn test_spellcasting() {
        let block = json!({
            "name": "Spellcasting",
            "type": "spellcasting",
            "headerEntries": ["The mage is a 9th-level spellcaster."],
            "ability": "int",
            "will": ["{@spell mage hand}", {"entry": "{@spell detect magic}", "hidden": true}],
            "daily": {"1e": ["{@spell fly}"], "3": ["{@spell shield}"]},
            "spells": {
                "0": {"spells": ["{@spell fire bolt}"]},
                "3": {"slots": 3, "spells": ["{@spell counterspell}"]}
            }
        });
        let casting = parse_spellcasting(&block).unwrap();
        assert_eq!(casting.ability.as_deref(), Some("Intelligence"));
        assert_eq!(casting.at_will, vec!["{@spell mage hand}", "{@spell detect magic}"]);
        assert_eq!(casting.daily[0].per_day, 1);
        assert!(casting.daily[0].each);
        assert!(!casting.daily[1].each);
        assert_eq!(casting.slots.len(), 4);
        assert_eq!(casting.slots[0].spells, vec!["{@spell fire bolt}"]);
        assert_eq!(casting.slots[1], SpellSlotLevel::default());
        assert_eq!(casting.slots[3].slots, 3);
    }
}
