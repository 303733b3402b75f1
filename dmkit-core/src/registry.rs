//! Item lookup by normalized name, optionally disambiguated by source.

use crate::models::Item;
use std::collections::HashMap;

/// Lowercase alphanumerics, keep separators, drop everything else.
pub fn normalize_name(name: &str) -> String {
    name.chars()
        .filter_map(|c| {
            if c.is_alphanumeric() {
                Some(c.to_lowercase().collect::<String>())
            } else if matches!(c, ' ' | '\t' | '\n' | '-' | '_' | '.' | '|') {
                Some(c.to_string())
            } else {
                None
            }
        })
        .collect()
}

#[derive(Debug, Clone, Default)]
pub struct ItemRegistry {
    items: Vec<Item>,
    by_name: HashMap<String, usize>,
    by_name_source: HashMap<String, usize>,
}

impl ItemRegistry {
    /// Index items. When two items share a name, the first one wins the bare-name slot.
    pub fn new(items: Vec<Item>) -> Self {
        let mut by_name = HashMap::new();
        let mut by_name_source = HashMap::new();
        for (index, item) in items.iter().enumerate() {
            let name = normalize_name(&item.name);
            by_name_source.insert(format!("{}|{}", name, normalize_name(&item.source)), index);
            by_name.entry(name).or_insert(index);
        }
        Self {
            items,
            by_name,
            by_name_source,
        }
    }

    /// Look an item up by `name` or `name|source`.
    pub fn lookup(&self, query: &str) -> Option<&Item> {
        let query = normalize_name(query);
        let index = if query.contains('|') {
            self.by_name_source.get(&query)
        } else {
            self.by_name.get(&query)
        }?;
        self.items.get(*index)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
