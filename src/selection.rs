//! Selection reconciliation: which entries go into the next batch.
//!
//! The controller owns a plain `id → bool` map; presentation layers only read
//! it and call the operations below.

use crate::destination::is_valid_destination;
use crate::model::{Entry, Mode};
use crate::tracking::ProcessedLookup;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone)]
pub struct SelectionController {
    mode: Mode,
    flags: HashMap<String, bool>,
}

impl SelectionController {
    pub fn new(mode: Mode) -> Self {
        Self {
            mode,
            flags: HashMap::new(),
        }
    }

    /// Build a controller with default flags for `entries`.
    pub fn with_defaults(mode: Mode, entries: &[Entry], store: &impl ProcessedLookup) -> Self {
        let mut sel = Self::new(mode);
        sel.reconcile(entries, store);
        sel
    }

    /// Add default flags for ids seen for the first time; existing flags are kept.
    pub fn reconcile(&mut self, entries: &[Entry], store: &impl ProcessedLookup) {
        for e in entries {
            self.flags
                .entry(e.id.clone())
                .or_insert_with(|| !store.was_processed(&e.id));
        }
    }

    /// Forget every flag and recompute defaults, e.g. after a new source is loaded.
    pub fn reset(&mut self, entries: &[Entry], store: &impl ProcessedLookup) {
        self.flags.clear();
        self.reconcile(entries, store);
    }

    pub fn select_all(&mut self, entries: &[Entry]) {
        for e in entries {
            let flag = self.eligible(e);
            self.flags.insert(e.id.clone(), flag);
        }
    }

    pub fn select_none(&mut self) {
        for flag in self.flags.values_mut() {
            *flag = false;
        }
    }

    pub fn select_unprocessed(&mut self, entries: &[Entry], store: &impl ProcessedLookup) {
        for e in entries {
            let flag = self.eligible(e) && !store.was_processed(&e.id);
            self.flags.insert(e.id.clone(), flag);
        }
    }

    pub fn toggle(&mut self, id: &str) {
        let flag = self.flags.entry(id.to_string()).or_insert(false);
        *flag = !*flag;
    }

    pub fn set(&mut self, id: &str, selected: bool) {
        self.flags.insert(id.to_string(), selected);
    }

    pub fn is_selected(&self, id: &str) -> bool {
        self.flags.get(id).copied().unwrap_or(false)
    }

    pub fn selected_count(&self) -> usize {
        self.flags.values().filter(|f| **f).count()
    }

    /// Selected entries in input order, first occurrence per id.
    pub fn selected<'a>(&self, entries: &'a [Entry]) -> Vec<&'a Entry> {
        let mut seen = HashSet::new();
        entries
            .iter()
            .filter(|e| self.is_selected(&e.id) && seen.insert(e.id.as_str()))
            .collect()
    }

    pub fn selected_ids(&self, entries: &[Entry]) -> Vec<String> {
        self.selected(entries).into_iter().map(|e| e.id.clone()).collect()
    }

    fn eligible(&self, e: &Entry) -> bool {
        match self.mode {
            Mode::Generate => true,
            Mode::Send => e
                .destination
                .as_deref()
                .map(is_valid_destination)
                .unwrap_or(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::derive_key;
    use crate::model::Recipient;

    fn entry(name: &str, email: Option<&str>) -> Entry {
        let r = Recipient::new(2, vec![("Name".into(), name.into())]);
        let key = derive_key(&r, "Name");
        let id = match email {
            Some(addr) => format!("{key} <{addr}>"),
            None => key.to_string(),
        };
        Entry {
            recipient: r,
            key,
            id,
            destination: email.map(str::to_string),
        }
    }

    #[test]
    fn toggles_survive_reconcile_but_not_reset() {
        let entries = vec![entry("Anna", None), entry("Ben", None)];
        let store: HashSet<String> = HashSet::new();
        let mut sel = SelectionController::with_defaults(Mode::Generate, &entries, &store);
        sel.toggle("Anna");
        assert!(!sel.is_selected("Anna"));

        sel.reconcile(&entries, &store);
        assert!(!sel.is_selected("Anna"));

        sel.reset(&entries, &store);
        assert!(sel.is_selected("Anna"));
    }

    #[test]
    fn selected_keeps_input_order_and_dedups() {
        let entries = vec![
            entry("Cara", None),
            entry("Anna B. Lee", None),
            entry("Anna B Lee", None),
        ];
        let store: HashSet<String> = HashSet::new();
        let sel = SelectionController::with_defaults(Mode::Generate, &entries, &store);
        assert_eq!(sel.selected_ids(&entries), vec!["Cara", "Anna B Lee"]);
    }

    #[test]
    fn unknown_ids_are_unselected() {
        let sel = SelectionController::new(Mode::Send);
        assert!(!sel.is_selected("nobody"));
        assert_eq!(sel.selected_count(), 0);
    }
}
