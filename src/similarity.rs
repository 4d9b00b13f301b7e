//! Near-duplicate party names. A candidate is similar when one normalized
//! name contains the other. Suggestions are only ever acted on by an
//! operator, through merge and undo.

use std::collections::HashSet;

/// Letters kept by `normalize` besides ASCII letters and digits.
const LOCALE_LETTERS: &str = "çğıöşüâîû";

/// Shorter normalized names never match.
pub const MIN_LEN: usize = 3;

/// Lowercase and drop everything but letters and digits.
pub fn normalize(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || LOCALE_LETTERS.contains(*c))
        .collect()
}

fn is_similar(a: &str, b: &str) -> bool {
    a.chars().count() >= MIN_LEN
        && b.chars().count() >= MIN_LEN
        && a != b
        && (a.contains(b) || b.contains(a))
}

/// Names in `pool` similar to `name`, in pool order. Pool entries that
/// normalize to the same string are reported once, first one wins.
pub fn find_similar(name: &str, pool: &[String]) -> Vec<String> {
    let target = normalize(name);
    let mut seen = HashSet::new();
    pool.iter()
        .filter(|candidate| {
            let norm = normalize(candidate);
            is_similar(&target, &norm) && seen.insert(norm)
        })
        .cloned()
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct MergeSuggestion {
    pub name: String,
    pub existing: Vec<String>,
    pub new: Vec<String>,
}

impl MergeSuggestion {
    /// Existing parties are preferred as merge targets.
    pub fn best_target(&self) -> Option<&str> {
        self.existing.first().or(self.new.first()).map(String::as_str)
    }
}

/// Run the matcher for every new party against the existing parties and,
/// separately, against the other new parties of the batch.
pub fn suggest_merges(new_parties: &[String], existing: &[String]) -> Vec<MergeSuggestion> {
    new_parties
        .iter()
        .filter_map(|name| {
            let others: Vec<String> = new_parties.iter().filter(|n| *n != name).cloned().collect();
            let suggestion = MergeSuggestion {
                name: name.clone(),
                existing: find_similar(name, existing),
                new: find_similar(name, &others),
            };
            if suggestion.existing.is_empty() && suggestion.new.is_empty() {
                None
            } else {
                Some(suggestion)
            }
        })
        .collect()
}
