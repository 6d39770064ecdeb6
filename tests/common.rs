#![allow(dead_code)]

use invite_merge::model::{Entry, Mode, Recipient};
use invite_merge::source::{build_entries, RecipientTable};

/// Generation entries for the given names, one row each.
pub fn named_entries(names: &[&str]) -> Vec<Entry> {
    let table = RecipientTable {
        columns: vec!["Name".into()],
        rows: names
            .iter()
            .enumerate()
            .map(|(i, n)| Recipient::new(i as u64 + 2, vec![("Name".into(), n.to_string())]))
            .collect(),
    };
    build_entries(&table, Mode::Generate, "Name", None)
}

/// Sending entries for `(name, address)` pairs.
pub fn mail_entries(rows: &[(&str, &str)]) -> Vec<Entry> {
    let table = RecipientTable {
        columns: vec!["Name".into(), "Email".into()],
        rows: rows
            .iter()
            .enumerate()
            .map(|(i, (n, e))| {
                Recipient::new(
                    i as u64 + 2,
                    vec![("Name".into(), n.to_string()), ("Email".into(), e.to_string())],
                )
            })
            .collect(),
    };
    build_entries(&table, Mode::Send, "Name", Some("Email"))
}
