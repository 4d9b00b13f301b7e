//! Operator review of a parsed batch: row selection, approval of new
//! parties, and merging near-duplicate parties with exact undo.
//!
//! Every operation takes the current snapshot by reference and returns a
//! new one; rows are addressed by their stable row number.

use std::collections::HashMap;

use crate::error::{Result, TallyError};
use crate::models::{ImportPreview, ImportRow};
use crate::resolver::{name_key, KnownEntities};
use crate::similarity::{suggest_merges, MergeSuggestion};

#[derive(Debug, Clone, PartialEq)]
pub struct PartyApproval {
    pub name: String,
    pub approved: bool,
}

/// Row fields as they were before a merge touched them.
#[derive(Debug, Clone, PartialEq)]
struct PriorRow {
    row_number: u32,
    location: String,
    original_location: Option<String>,
    is_new_party: bool,
    selected: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MergeEntry {
    pub source: String,
    pub target: String,
    target_exists: bool,
    /// The source's approval before the merge, if it had an entry.
    prior_approval: Option<bool>,
    /// The merge created an approval entry for a brand-new target.
    target_added: bool,
    rows: Vec<PriorRow>,
}

impl MergeEntry {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

/// Ordered record of merges; enough to invert each one exactly.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeLedger {
    entries: Vec<MergeEntry>,
}

impl MergeLedger {
    pub fn entries(&self) -> &[MergeEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Where `source` was merged to, if it was.
    pub fn target_of(&self, source: &str) -> Option<&str> {
        let key = name_key(source);
        self.entries
            .iter()
            .find(|e| name_key(&e.source) == key)
            .map(|e| e.target.as_str())
    }

    fn has_target(&self, target: &str) -> bool {
        let key = name_key(target);
        self.entries.iter().any(|e| name_key(&e.target) == key)
    }
}

#[derive(Debug, Clone)]
pub struct ReviewState {
    rows: Vec<ImportRow>,
    index: HashMap<u32, usize>,
    known: KnownEntities,
    approvals: Vec<PartyApproval>,
    ledger: MergeLedger,
}

impl ReviewState {
    /// Every new party starts approved; existing parties never get an entry.
    pub fn new(preview: &ImportPreview, known: KnownEntities) -> Self {
        let approvals = preview
            .parties
            .iter()
            .filter(|p| !p.exists && !known.has_party(&p.name))
            .map(|p| PartyApproval {
                name: p.name.clone(),
                approved: true,
            })
            .collect();
        let rows = preview.rows.clone();
        let index = rows
            .iter()
            .enumerate()
            .map(|(i, r)| (r.row_number, i))
            .collect();
        let state = Self {
            rows,
            index,
            known,
            approvals,
            ledger: MergeLedger::default(),
        };
        state.select_all()
    }

    pub fn rows(&self) -> &[ImportRow] {
        &self.rows
    }

    pub fn row(&self, row_number: u32) -> Option<&ImportRow> {
        self.index.get(&row_number).map(|i| &self.rows[*i])
    }

    pub fn approvals(&self) -> &[PartyApproval] {
        &self.approvals
    }

    pub fn ledger(&self) -> &MergeLedger {
        &self.ledger
    }

    pub fn known(&self) -> &KnownEntities {
        &self.known
    }

    pub fn approval(&self, name: &str) -> Option<bool> {
        let key = name_key(name);
        self.approvals
            .iter()
            .find(|a| name_key(&a.name) == key)
            .map(|a| a.approved)
    }

    /// Selected rows in source order; the input to commit.
    pub fn selected_rows(&self) -> Vec<ImportRow> {
        self.rows.iter().filter(|r| r.selected).cloned().collect()
    }

    pub fn selected_count(&self) -> usize {
        self.rows.iter().filter(|r| r.selected).count()
    }

    /// A row may be selected only when valid and its party, if new, is approved.
    pub fn is_eligible(&self, row: &ImportRow) -> bool {
        row.is_valid && (!row.is_new_party || self.approval(&row.location).unwrap_or(true))
    }

    /// New party names still referenced by at least one row.
    pub fn active_new_parties(&self) -> Vec<String> {
        self.approvals
            .iter()
            .filter(|a| self.rows_referencing(&a.name).next().is_some())
            .map(|a| a.name.clone())
            .collect()
    }

    pub fn suggestions(&self) -> Vec<MergeSuggestion> {
        suggest_merges(&self.active_new_parties(), self.known.party_names())
    }

    fn rows_referencing<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a ImportRow> + 'a {
        let key = name_key(name);
        self.rows
            .iter()
            .filter(move |r| r.is_new_party && name_key(&r.location) == key)
    }

    fn approval_index(&self, name: &str) -> Option<usize> {
        let key = name_key(name);
        self.approvals.iter().position(|a| name_key(&a.name) == key)
    }

    fn rederive_party_rows(&mut self, name: &str) {
        let key = name_key(name);
        let approved = self.approval(name).unwrap_or(true);
        for row in &mut self.rows {
            if row.is_new_party && name_key(&row.location) == key {
                row.selected = row.is_valid && approved;
            }
        }
    }

    pub fn toggle_row(&self, row_number: u32) -> Result<Self> {
        let idx = *self
            .index
            .get(&row_number)
            .ok_or(TallyError::UnknownRow(row_number))?;
        let mut next = self.clone();
        let eligible = next.is_eligible(&next.rows[idx]);
        let row = &mut next.rows[idx];
        row.selected = !row.selected && eligible;
        Ok(next)
    }

    #[must_use]
    pub fn select_all(&self) -> Self {
        let mut next = self.clone();
        let eligible: Vec<bool> = next.rows.iter().map(|r| next.is_eligible(r)).collect();
        for (row, ok) in next.rows.iter_mut().zip(eligible) {
            row.selected = ok;
        }
        next
    }

    /// Clears every selection; approvals are left alone.
    #[must_use]
    pub fn deselect_all(&self) -> Self {
        let mut next = self.clone();
        for row in &mut next.rows {
            row.selected = false;
        }
        next
    }

    pub fn toggle_party(&self, name: &str) -> Result<Self> {
        let idx = self
            .approval_index(name)
            .ok_or_else(|| TallyError::Other(format!("'{name}' is not a new party in this batch")))?;
        let mut next = self.clone();
        next.approvals[idx].approved = !next.approvals[idx].approved;
        let name = next.approvals[idx].name.clone();
        next.rederive_party_rows(&name);
        Ok(next)
    }

    #[must_use]
    pub fn approve_all(&self) -> Self {
        self.set_all_approvals(true)
    }

    #[must_use]
    pub fn reject_all(&self) -> Self {
        self.set_all_approvals(false)
    }

    fn set_all_approvals(&self, approved: bool) -> Self {
        let mut next = self.clone();
        for approval in &mut next.approvals {
            approval.approved = approved;
        }
        for row in &mut next.rows {
            if row.is_new_party {
                row.selected = row.is_valid && approved;
            }
        }
        next
    }

    /// Point every row of new party `source` at `target`.
    pub fn merge(&self, source: &str, target: &str) -> Result<Self> {
        let source = source.trim();
        let target = target.trim();
        if target.is_empty() {
            return Err(TallyError::Merge("merge target is empty".into()));
        }
        if name_key(source) == name_key(target) {
            return Err(TallyError::Merge(format!("'{source}' cannot be merged into itself")));
        }
        if self.rows_referencing(source).next().is_none() {
            return Err(TallyError::Merge(format!("'{source}' is not a new party in this batch")));
        }
        if self.ledger.has_target(source) {
            return Err(TallyError::Merge(format!("undo the merges into '{source}' first")));
        }
        if self.ledger.target_of(target).is_some() {
            return Err(TallyError::Merge(format!("'{target}' has been merged away")));
        }

        let mut next = self.clone();
        let target_exists = next.known.has_party(target);
        let target_name = match next.known.canonical_party(target) {
            Some(existing) => existing.to_string(),
            None => next
                .approvals
                .iter()
                .find(|a| name_key(&a.name) == name_key(target))
                .map(|a| a.name.clone())
                .unwrap_or_else(|| target.to_string()),
        };

        let source_key = name_key(source);
        let mut prior_rows = Vec::new();
        for row in &mut next.rows {
            if row.is_new_party && name_key(&row.location) == source_key {
                prior_rows.push(PriorRow {
                    row_number: row.row_number,
                    location: row.location.clone(),
                    original_location: row.original_location.clone(),
                    is_new_party: row.is_new_party,
                    selected: row.selected,
                });
                row.original_location = Some(row.location.clone());
                row.location = target_name.clone();
                row.is_new_party = !target_exists;
            }
        }

        let prior_index = next.approval_index(source);
        let prior_approval = prior_index.map(|i| next.approvals[i].approved);
        if target_exists {
            if let Some(i) = prior_index {
                next.approvals.remove(i);
            }
        }
        let target_added = !target_exists && next.approval_index(&target_name).is_none();
        if target_added {
            next.approvals.push(PartyApproval {
                name: target_name.clone(),
                approved: true,
            });
        }

        for prior in &prior_rows {
            let idx = next.index[&prior.row_number];
            let eligible = next.is_eligible(&next.rows[idx]);
            next.rows[idx].selected = eligible;
        }

        next.ledger.entries.push(MergeEntry {
            source: source.to_string(),
            target: target_name,
            target_exists,
            prior_approval,
            target_added,
            rows: prior_rows,
        });
        Ok(next)
    }

    /// Reverse every merge into `target`, newest first.
    pub fn undo_merge(&self, target: &str) -> Result<Self> {
        let key = name_key(target);
        if !self.ledger.has_target(target) {
            return Err(TallyError::Merge(format!("nothing was merged into '{}'", target.trim())));
        }
        let mut next = self.clone();
        let (undone, kept): (Vec<MergeEntry>, Vec<MergeEntry>) = next
            .ledger
            .entries
            .drain(..)
            .partition(|e| name_key(&e.target) == key);
        next.ledger.entries = kept;

        let mut restored = Vec::new();
        for entry in undone.iter().rev() {
            let source_key = name_key(&entry.source);
            for prior in &entry.rows {
                let Some(&idx) = next.index.get(&prior.row_number) else {
                    continue;
                };
                let row = &mut next.rows[idx];
                let still_merged = row
                    .original_location
                    .as_deref()
                    .is_some_and(|o| name_key(o) == source_key);
                if !still_merged {
                    continue;
                }
                row.location = prior.location.clone();
                row.original_location = prior.original_location.clone();
                row.is_new_party = prior.is_new_party;
                restored.push((idx, prior.selected));
            }

            match entry.prior_approval {
                Some(approved) => match next.approval_index(&entry.source) {
                    Some(i) => next.approvals[i].approved = approved,
                    None => next.approvals.push(PartyApproval {
                        name: entry.source.clone(),
                        approved,
                    }),
                },
                None => {
                    if next.approval_index(&entry.source).is_none() {
                        next.approvals.push(PartyApproval {
                            name: entry.source.clone(),
                            approved: true,
                        });
                    }
                }
            }

            if entry.target_added && !entry.target_exists && next.rows_referencing(&entry.target).next().is_none() {
                if let Some(i) = next.approval_index(&entry.target) {
                    next.approvals.remove(i);
                }
            }
        }

        for (idx, was_selected) in restored {
            let eligible = next.is_eligible(&next.rows[idx]);
            next.rows[idx].selected = was_selected && eligible;
        }
        next.sort_approvals();
        Ok(next)
    }

    /// Approvals in order of first appearance in the batch, counting names
    /// rows were merged away from. Unreferenced names keep their place at
    /// the end.
    fn sort_approvals(&mut self) {
        let mut first_seen: HashMap<String, usize> = HashMap::new();
        for (i, row) in self.rows.iter().enumerate() {
            let names = std::iter::once(row.location.as_str()).chain(row.original_location.as_deref());
            for name in names {
                first_seen.entry(name_key(name)).or_insert(i);
            }
        }
        self.approvals
            .sort_by_key(|a| first_seen.get(&name_key(&a.name)).copied().unwrap_or(usize::MAX));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EntityCandidate;
    use crate::normalize::normalize_row;
    use crate::parser::RawRow;
    use crate::resolver::resolve;

    fn raw(n: u32, location: &str, total: Option<f64>, date: &str) -> RawRow {
        RawRow {
            row_number: n,
            expense_type: "Fuel".into(),
            date: date.into(),
            location: location.into(),
            item_type: "Diesel".into(),
            quantity: None,
            unit_price: None,
            total_raw: total.map(|t| t.to_string()).unwrap_or_default(),
            total,
        }
    }

    fn state(rows: Vec<RawRow>) -> ReviewState {
        let known = KnownEntities::new(&["Fuel".to_string()], &["Shell".to_string(), "Opet".to_string()]);
        let rows = rows.into_iter().map(normalize_row).collect();
        let res = resolve(rows, &known);
        let preview = ImportPreview {
            file_name: "test".into(),
            total_rows: res.rows.len(),
            valid_rows: res.rows.iter().filter(|r| r.is_valid).count(),
            invalid_rows: res.rows.iter().filter(|r| !r.is_valid).count(),
            skipped_rows: 0,
            rows: res.rows,
            categories: res.categories,
            parties: res.parties,
        };
        ReviewState::new(&preview, known)
    }

    fn invariants_hold(s: &ReviewState) -> bool {
        s.rows().iter().all(|r| {
            (!r.selected || r.is_valid)
                && (!r.selected || !r.is_new_party || s.approval(&r.location) == Some(true))
        }) && s.approvals().iter().all(|a| !s.known().has_party(&a.name))
    }

    fn sample() -> ReviewState {
        state(vec![
            raw(1, "Shell", Some(50.0), "2024-03-01"),
            raw(2, "Shell Express", Some(20.0), "2024-03-02"),
            raw(3, "Shell Express", Some(30.0), "bad"),
            raw(4, "Cafe Roma", Some(15.0), "2024-03-04"),
            raw(5, "Cafe Roma", None, "2024-03-05"),
        ])
    }

    #[test]
    fn test_initial_selection_is_valid_rows() {
        let s = sample();
        let selected: Vec<u32> = s.selected_rows().iter().map(|r| r.row_number).collect();
        assert_eq!(selected, vec![1, 2, 4]);
        assert_eq!(s.approval("Shell Express"), Some(true));
        assert_eq!(s.approval("Shell"), None);
        assert!(invariants_hold(&s));
    }

    #[test]
    fn test_invalid_row_cannot_be_selected() {
        let s = sample().toggle_row(3).unwrap();
        assert!(!s.row(3).unwrap().selected);
        assert!(matches!(sample().toggle_row(99), Err(TallyError::UnknownRow(99))));
    }

    #[test]
    fn test_toggle_row_flips_eligible_rows() {
        let s = sample().toggle_row(1).unwrap();
        assert!(!s.row(1).unwrap().selected);
        let s = s.toggle_row(1).unwrap();
        assert!(s.row(1).unwrap().selected);
    }

    #[test]
    fn test_operations_leave_previous_snapshot_untouched() {
        let before = sample();
        let after = before.deselect_all();
        assert_eq!(before.selected_count(), 3);
        assert_eq!(after.selected_count(), 0);
    }

    #[test]
    fn test_rejecting_party_cascades_deselect() {
        let s = sample().toggle_party("shell express").unwrap();
        assert_eq!(s.approval("Shell Express"), Some(false));
        assert!(!s.row(2).unwrap().selected);
        assert!(invariants_hold(&s));

        let s = s.toggle_row(2).unwrap();
        assert!(!s.row(2).unwrap().selected, "rejected party row must stay unselected");

        let s = s.toggle_party("Shell Express").unwrap();
        assert!(s.row(2).unwrap().selected);
        assert!(!s.row(3).unwrap().selected);
    }

    #[test]
    fn test_select_all_respects_rejections() {
        let s = sample().reject_all();
        assert_eq!(s.selected_count(), 1);
        let s = s.deselect_all().select_all();
        let selected: Vec<u32> = s.selected_rows().iter().map(|r| r.row_number).collect();
        assert_eq!(selected, vec![1]);
        let s = s.approve_all();
        assert_eq!(s.selected_count(), 3);
        assert!(invariants_hold(&s));
    }

    #[test]
    fn test_deselect_all_keeps_approvals() {
        let s = sample().toggle_party("Cafe Roma").unwrap().deselect_all();
        assert_eq!(s.approval("Cafe Roma"), Some(false));
        assert_eq!(s.approval("Shell Express"), Some(true));
    }

    #[test]
    fn test_merge_into_existing_party() {
        let s = sample().merge("Shell Express", "shell").unwrap();
        let row = s.row(2).unwrap();
        assert_eq!(row.location, "Shell");
        assert_eq!(row.original_location.as_deref(), Some("Shell Express"));
        assert!(!row.is_new_party);
        assert!(row.selected);
        assert_eq!(s.approval("Shell Express"), None);
        assert_eq!(s.ledger().target_of("Shell Express"), Some("Shell"));
        assert!(invariants_hold(&s));
    }

    #[test]
    fn test_merge_into_other_new_party() {
        let s = state(vec![
            raw(1, "Cafe Roma", Some(10.0), "2024-03-01"),
            raw(2, "Cafe Roma Bistro", Some(12.0), "2024-03-02"),
        ]);
        let s = s.toggle_party("Cafe Roma").unwrap();
        let s = s.merge("Cafe Roma Bistro", "Cafe Roma").unwrap();
        let row = s.row(2).unwrap();
        assert_eq!(row.location, "Cafe Roma");
        assert!(row.is_new_party);
        assert!(!row.selected, "target party is rejected");
        assert_eq!(s.approval("Cafe Roma Bistro"), Some(true));
        assert!(invariants_hold(&s));
    }

    #[test]
    fn test_merge_rejects_self_and_unknown_source() {
        let s = sample();
        assert!(matches!(s.merge("Cafe Roma", "cafe roma"), Err(TallyError::Merge(_))));
        assert!(matches!(s.merge("Shell", "Opet"), Err(TallyError::Merge(_))));
        assert!(matches!(s.merge("Nobody", "Opet"), Err(TallyError::Merge(_))));
    }

    #[test]
    fn test_merge_undo_round_trip() {
        let before = sample();
        let merged = before.merge("Shell Express", "Shell").unwrap();
        let undone = merged.undo_merge("Shell").unwrap();
        for n in [2, 3] {
            let row = undone.row(n).unwrap();
            assert_eq!(row.location, "Shell Express");
            assert!(row.is_new_party);
            assert_eq!(row.original_location, None);
        }
        assert_eq!(undone.approval("Shell Express"), Some(true));
        assert_eq!(undone.rows(), before.rows());
        assert_eq!(undone.approvals(), before.approvals());
        assert!(undone.ledger().is_empty());
    }

    #[test]
    fn test_undo_restores_rejected_approval() {
        let before = sample().toggle_party("Cafe Roma").unwrap();
        let undone = before.merge("Cafe Roma", "Opet").unwrap().undo_merge("opet").unwrap();
        assert_eq!(undone.approval("Cafe Roma"), Some(false));
        assert!(!undone.row(4).unwrap().selected);
        assert_eq!(undone.approvals(), before.approvals());
    }

    #[test]
    fn test_undo_in_any_order_restores_batch_order() {
        let s = state(vec![
            raw(1, "Cafe Roma", Some(10.0), "2024-03-01"),
            raw(2, "Shell Express", Some(12.0), "2024-03-02"),
        ]);
        let before: Vec<String> = s.approvals().iter().map(|a| a.name.clone()).collect();
        assert_eq!(before, vec!["Cafe Roma", "Shell Express"]);

        let merged = s
            .merge("Cafe Roma", "Shell")
            .unwrap()
            .merge("Shell Express", "Opet")
            .unwrap();
        assert!(merged.approvals().is_empty());

        for (first, second) in [("Shell", "Opet"), ("Opet", "Shell")] {
            let undone = merged.undo_merge(first).unwrap().undo_merge(second).unwrap();
            assert_eq!(undone.approvals(), s.approvals());
            assert!(invariants_hold(&undone));
        }
    }

    #[test]
    fn test_undo_without_merge_is_an_error() {
        assert!(matches!(sample().undo_merge("Shell"), Err(TallyError::Merge(_))));
    }

    #[test]
    fn test_merge_into_fresh_name_and_undo() {
        let before = sample();
        let merged = before.merge("Cafe Roma", "Roma Cafe Ltd").unwrap();
        assert_eq!(merged.approval("Roma Cafe Ltd"), Some(true));
        assert!(merged.row(4).unwrap().is_new_party);
        let undone = merged.undo_merge("Roma Cafe Ltd").unwrap();
        assert_eq!(undone.approval("Roma Cafe Ltd"), None);
        assert_eq!(undone.rows(), before.rows());
    }

    #[test]
    fn test_chained_merge_needs_undo_first() {
        let s = state(vec![
            raw(1, "Cafe Roma", Some(10.0), "2024-03-01"),
            raw(2, "Cafe Roma Bistro", Some(12.0), "2024-03-02"),
        ]);
        let s = s.merge("Cafe Roma Bistro", "Cafe Roma").unwrap();
        assert!(matches!(s.merge("Cafe Roma", "Opet"), Err(TallyError::Merge(_))));
        assert!(matches!(s.merge("Opet", "Cafe Roma Bistro"), Err(TallyError::Merge(_))));
    }

    #[test]
    fn test_suggestions_follow_merges() {
        let s = sample();
        let names: Vec<String> = s.suggestions().into_iter().map(|m| m.name).collect();
        assert_eq!(names, vec!["Shell Express"]);
        let s = s.merge("Shell Express", "Shell").unwrap();
        assert!(s.suggestions().is_empty());
    }

    #[test]
    fn test_existing_party_never_gets_approval_entry() {
        let known = KnownEntities::new(&[], &["Shell".to_string()]);
        let preview = ImportPreview {
            file_name: "x".into(),
            total_rows: 0,
            valid_rows: 0,
            invalid_rows: 0,
            skipped_rows: 0,
            rows: vec![],
            categories: vec![],
            parties: vec![EntityCandidate {
                name: "SHELL".into(),
                exists: false,
            }],
        };
        let s = ReviewState::new(&preview, known);
        assert!(s.approvals().is_empty());
    }
}
