//! Decides which category and party names in a batch are new.

use std::collections::{HashMap, HashSet};

use crate::error::Result;
use crate::models::{EntityCandidate, ImportRow};
use crate::store::LedgerStore;

/// Case-insensitive identity of a category or party name.
pub fn name_key(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Snapshot of the names already in the store.
#[derive(Debug, Clone, Default)]
pub struct KnownEntities {
    categories: HashSet<String>,
    parties: HashMap<String, String>,
    party_order: Vec<String>,
}

impl KnownEntities {
    pub fn new(categories: &[String], parties: &[String]) -> Self {
        let mut known = Self {
            categories: categories.iter().map(|c| name_key(c)).collect(),
            ..Default::default()
        };
        for party in parties {
            let key = name_key(party);
            if !known.parties.contains_key(&key) {
                known.parties.insert(key, party.trim().to_string());
                known.party_order.push(party.trim().to_string());
            }
        }
        known
    }

    /// Expense categories and all parties, whatever their type.
    pub fn load<S: LedgerStore + ?Sized>(store: &S) -> Result<Self> {
        Ok(Self::new(&store.expense_category_names()?, &store.party_names()?))
    }

    pub fn has_category(&self, name: &str) -> bool {
        self.categories.contains(&name_key(name))
    }

    pub fn has_party(&self, name: &str) -> bool {
        self.parties.contains_key(&name_key(name))
    }

    /// The stored spelling of an existing party.
    pub fn canonical_party(&self, name: &str) -> Option<&str> {
        self.parties.get(&name_key(name)).map(String::as_str)
    }

    /// Existing party names in store order.
    pub fn party_names(&self) -> &[String] {
        &self.party_order
    }
}

#[derive(Debug, Clone)]
pub struct Resolution {
    pub rows: Vec<ImportRow>,
    pub categories: Vec<EntityCandidate>,
    pub parties: Vec<EntityCandidate>,
}

fn push_candidate(
    list: &mut Vec<EntityCandidate>,
    seen: &mut HashSet<String>,
    name: &str,
    exists: bool,
) {
    if name.trim().is_empty() {
        return;
    }
    if seen.insert(name_key(name)) {
        list.push(EntityCandidate {
            name: name.trim().to_string(),
            exists,
        });
    }
}

/// Flag each row's category and party as new or existing, and collect the
/// distinct names of the batch. The first spelling seen wins.
pub fn resolve(mut rows: Vec<ImportRow>, known: &KnownEntities) -> Resolution {
    let mut categories = Vec::new();
    let mut parties = Vec::new();
    let mut seen_categories = HashSet::new();
    let mut seen_parties = HashSet::new();

    for row in &mut rows {
        let category_exists = known.has_category(&row.expense_type);
        row.is_new_category = !row.expense_type.trim().is_empty() && !category_exists;
        push_candidate(&mut categories, &mut seen_categories, &row.expense_type, category_exists);

        let party_exists = known.has_party(&row.location);
        row.is_new_party = row.has_party() && !party_exists;
        push_candidate(&mut parties, &mut seen_parties, &row.location, party_exists);
    }

    Resolution {
        rows,
        categories,
        parties,
    }
}
