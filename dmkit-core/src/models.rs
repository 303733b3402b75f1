//! Canonical entity models produced by the converters.
//!
//! Optional fields are omitted from serialized output when empty; downstream readers rely on
//! it, so every optional field carries a `skip_serializing_if` and a matching `default`.

use crate::entries::Entry;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

fn is_false(value: &bool) -> bool {
    !*value
}

fn is_zero(value: &u32) -> bool {
    *value == 0
}

/// Creature or item size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Size {
    Tiny,
    Small,
    Medium,
    Large,
    Huge,
    Gargantuan,
}

impl Size {
    /// Map an upstream single-letter size code.
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "T" => Some(Size::Tiny),
            "S" => Some(Size::Small),
            "M" => Some(Size::Medium),
            "L" => Some(Size::Large),
            "H" => Some(Size::Huge),
            "G" => Some(Size::Gargantuan),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Size::Tiny => "Tiny",
            Size::Small => "Small",
            Size::Medium => "Medium",
            Size::Large => "Large",
            Size::Huge => "Huge",
            Size::Gargantuan => "Gargantuan",
        }
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A value with an optional note, e.g. `40 (hover)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Noted<T> {
    pub value: T,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl<T> Noted<T> {
    pub fn new(value: T) -> Self {
        Self { value, note: None }
    }

    pub fn with_note(value: T, note: Option<String>) -> Self {
        Self { value, note }
    }
}

impl<T: fmt::Display> fmt::Display for Noted<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.note {
            Some(note) => write!(f, "{} ({})", self.value, note),
            None => write!(f, "{}", self.value),
        }
    }
}

/// Damage or condition vulnerability/resistance/immunity.
pub type DamageModifier = Noted<String>;

/// One armor class entry. The first entry of a list is the primary AC.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArmorClass {
    pub value: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub special: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HitPoints {
    #[serde(default)]
    pub average: i32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub formula: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub special: Option<String>,
}

/// Movement speeds in feet.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Speed {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub walk: Option<Noted<u32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fly: Option<Noted<u32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub burrow: Option<Noted<u32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub swim: Option<Noted<u32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub climb: Option<Noted<u32>>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub can_hover: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectionMode {
    #[default]
    All,
    Any,
    One,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillModifier {
    pub skill: String,
    pub modifier: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SkillEntry {
    Skill(SkillModifier),
    Group(SkillList),
}

/// Skill bonuses, possibly with nested "one of"/"any of" groups.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SkillList {
    #[serde(default)]
    pub mode: SelectionMode,
    #[serde(default)]
    pub skills: Vec<SkillEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpellSlotLevel {
    #[serde(default, skip_serializing_if = "is_zero")]
    pub slots: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub spells: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailySpells {
    pub per_day: u32,
    /// `2e`-style keys: the count applies to each spell individually.
    #[serde(default, skip_serializing_if = "is_false")]
    pub each: bool,
    pub spells: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Spellcasting {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ability: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub header: Vec<Entry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub footer: Vec<Entry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub at_will: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub daily: Vec<DailySpells>,
    /// Indexed by spell level; index 0 holds cantrips.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub slots: Vec<SpellSlotLevel>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRef {
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbilityScores {
    pub strength: i32,
    pub dexterity: i32,
    pub constitution: i32,
    pub intelligence: i32,
    pub wisdom: i32,
    pub charisma: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Monster {
    pub key: String,
    pub name: String,
    pub source: String,
    #[serde(default)]
    pub page: u32,
    pub size: Size,
    pub creature_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,
    pub alignment: String,
    pub ac: Vec<ArmorClass>,
    pub hp: HitPoints,
    pub speed: Speed,
    pub cr: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lair_cr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coven_cr: Option<String>,
    pub xp: u32,
    pub abilities: AbilityScores,
    pub passive: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skills: Option<SkillList>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub saves: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dmg_vulnerabilities: Vec<DamageModifier>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dmg_resistances: Vec<DamageModifier>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dmg_immunities: Vec<DamageModifier>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cond_immunities: Vec<DamageModifier>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub senses: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub languages: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub environment: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub traits: Vec<Entry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actions_note: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<Entry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bonus_actions: Vec<Entry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reactions: Vec<Entry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub legendary_header: Vec<Entry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub legendary_action_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub legendary_actions: Vec<Entry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mythic_header: Vec<Entry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mythic_actions: Vec<Entry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub spellcasting: Vec<Spellcasting>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub other_sources: Vec<SourceRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Damage {
    pub dice: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub versatile: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub damage_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub key: String,
    pub name: String,
    pub source: String,
    #[serde(default)]
    pub page: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_type: Option<String>,
    pub rarity: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    /// Price in copper pieces.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attunement: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub wondrous: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub properties: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub damage: Option<Damage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub armor_class: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weapon_category: Option<String>,
    /// Key of the base item a magic variant was generated from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_item: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entries: Vec<Entry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassFeature {
    pub name: String,
    pub source: String,
    pub class_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subclass_short_name: Option<String>,
    pub level: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entries: Vec<Entry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subclass {
    pub name: String,
    pub short_name: String,
    pub source: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub features: Vec<ClassFeature>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Class {
    pub key: String,
    pub name: String,
    pub source: String,
    #[serde(default)]
    pub page: u32,
    pub hit_dice: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub saving_throws: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spellcasting_ability: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caster_progression: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subclass_title: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub armor_profs: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub weapon_profs: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_profs: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub class_features: Vec<ClassFeature>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subclasses: Vec<Subclass>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AbilityBonus {
    Fixed {
        ability: String,
        amount: i32,
    },
    Choice {
        from: Vec<String>,
        count: u32,
        amount: i32,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SkillProficiency {
    Fixed { skills: Vec<String> },
    Choice { from: Vec<String>, count: u32 },
    Any { count: u32 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Age {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mature: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeightAndWeight {
    pub base_height: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height_mod: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_weight: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight_mod: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Race {
    pub key: String,
    pub name: String,
    pub source: String,
    #[serde(default)]
    pub page: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sizes: Vec<Size>,
    pub speed: Speed,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ability_bonuses: Vec<AbilityBonus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age: Option<Age>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height_and_weight: Option<HeightAndWeight>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub darkvision: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blindsight: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skill_proficiencies: Vec<SkillProficiency>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub languages: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub traits: Vec<Entry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dmg_resistances: Vec<DamageModifier>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dmg_vulnerabilities: Vec<DamageModifier>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dmg_immunities: Vec<DamageModifier>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cond_immunities: Vec<DamageModifier>,
}

/// Any normalized entity, tagged with its type for polymorphic readers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum CanonicalEntity {
    Monster(Monster),
    Item(Item),
    Class(Class),
    Race(Race),
}

impl CanonicalEntity {
    pub fn key(&self) -> &str {
        match self {
            CanonicalEntity::Monster(m) => &m.key,
            CanonicalEntity::Item(i) => &i.key,
            CanonicalEntity::Class(c) => &c.key,
            CanonicalEntity::Race(r) => &r.key,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            CanonicalEntity::Monster(m) => &m.name,
            CanonicalEntity::Item(i) => &i.name,
            CanonicalEntity::Class(c) => &c.name,
            CanonicalEntity::Race(r) => &r.name,
        }
    }
}

impl From<Monster> for CanonicalEntity {
    fn from(value: Monster) -> Self {
        CanonicalEntity::Monster(value)
    }
}

impl From<Item> for CanonicalEntity {
    fn from(value: Item) -> Self {
        CanonicalEntity::Item(value)
    }
}

impl From<Class> for CanonicalEntity {
    fn from(value: Class) -> Self {
        CanonicalEntity::Class(value)
    }
}

impl From<Race> for CanonicalEntity {
    fn from(value: Race) -> Self {
        CanonicalEntity::Race(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_size_codes() {
        assert_eq!(Size::from_code("G"), Some(Size::Gargantuan));
        assert_eq!(Size::from_code("T"), Some(Size::Tiny));
        assert_eq!(Size::from_code("Q"), None);
        assert_eq!(Size::Huge.to_string(), "Huge");
    }

    #[test]
    fn test_empty_optionals_are_omitted() {
        let speed = Speed {
            walk: Some(Noted::new(30)),
            ..Default::default()
        };
        assert_eq!(serde_json::to_value(&speed).unwrap(), json!({"walk": {"value": 30}}));
    }

    #[test]
    fn test_entity_carries_discriminator() {
        let item = Item {
            key: "Rope-PHB".into(),
            name: "Rope".into(),
            source: "PHB".into(),
            page: 153,
            item_type: Some("Adventuring Gear".into()),
            rarity: "none".into(),
            weight: Some(10.0),
            value: Some(100.0),
            attunement: None,
            wondrous: false,
            properties: vec![],
            damage: None,
            armor_class: None,
            weapon_category: None,
            base_item: None,
            entries: vec![],
        };
        let entity = CanonicalEntity::from(item);
        let value = serde_json::to_value(&entity).unwrap();
        assert_eq!(value["kind"], "Item");
        assert!(value.get("entries").is_none());
        assert!(value.get("attunement").is_none());

        let back: CanonicalEntity = serde_json::from_value(value).unwrap();
        assert_eq!(back, entity);
        assert_eq!(back.key(), "Rope-PHB");
    }

    #[test]
    fn test_skill_list_roundtrip() {
        let list = SkillList {
            mode: SelectionMode::All,
            skills: vec![
                SkillEntry::Skill(SkillModifier { skill: "perception".into(), modifier: 5 }),
                SkillEntry::Group(SkillList {
                    mode: SelectionMode::One,
                    skills: vec![SkillEntry::Skill(SkillModifier {
                        skill: "arcana".into(),
                        modifier: 7,
                    })],
                }),
            ],
        };
        let text = serde_json::to_string(&list).unwrap();
        let back: SkillList = serde_json::from_str(&text).unwrap();
        assert_eq!(back, list);
    }
}
