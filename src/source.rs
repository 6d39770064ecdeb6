//! Recipient source loading (CSV with a header row) and entry preparation.

use crate::error::ConfigError;
use crate::key::derive_key;
use crate::model::{Entry, Mode, Recipient};
use anyhow::{Context, Result};
use std::path::Path;

#[derive(Debug, Clone, Default)]
pub struct RecipientTable {
    pub columns: Vec<String>,
    pub rows: Vec<Recipient>,
}

impl RecipientTable {
    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c.eq_ignore_ascii_case(column))
    }

    /// Error unless `column` exists (case-insensitive).
    pub fn require_column(&self, column: &str) -> Result<(), ConfigError> {
        if self.has_column(column) {
            Ok(())
        } else {
            Err(ConfigError::MissingColumn {
                column: column.to_string(),
                available: self.columns.join(", "),
            })
        }
    }
}

/// Load a CSV recipient file. Fully blank rows are skipped.
pub fn load_csv(path: &Path, delimiter: u8) -> Result<RecipientTable> {
    if !path.exists() {
        return Err(ConfigError::SourceNotFound(path.to_path_buf()).into());
    }
    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .trim(csv::Trim::All)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("open recipient source {}", path.display()))?;

    let columns: Vec<String> = rdr
        .headers()
        .with_context(|| format!("read header row of {}", path.display()))?
        .iter()
        .map(str::to_string)
        .collect();

    let mut rows = Vec::new();
    for (idx, record) in rdr.records().enumerate() {
        let record = record.with_context(|| format!("read row {} of {}", idx + 2, path.display()))?;
        let line = record.position().map(|p| p.line()).unwrap_or(idx as u64 + 2);
        let fields: Vec<(String, String)> = columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.clone(), record.get(i).unwrap_or("").to_string()))
            .collect();
        let recipient = Recipient::new(line, fields);
        if !recipient.is_blank() {
            rows.push(recipient);
        }
    }

    Ok(RecipientTable { columns, rows })
}

/// Guess a column whose header contains `needle` (case-insensitive), else the first column.
pub fn guess_column<'a>(columns: &'a [String], needle: &str) -> Option<&'a str> {
    let needle = needle.to_lowercase();
    columns
        .iter()
        .find(|c| c.to_lowercase().contains(&needle))
        .or_else(|| columns.first())
        .map(String::as_str)
}

/// Composite tracking id for the sending tool.
pub fn send_id(key: &str, address: &str) -> String {
    format!("{key} <{}>", address.trim().to_lowercase())
}

/// Prepare entries for one tool.
pub fn build_entries(
    table: &RecipientTable,
    mode: Mode,
    name_column: &str,
    email_column: Option<&str>,
) -> Vec<Entry> {
    table
        .rows
        .iter()
        .map(|r| {
            let key = derive_key(r, name_column);
            let destination = email_column.map(|c| r.get(c).unwrap_or("").trim().to_string());
            let id = match (mode, destination.as_deref()) {
                (Mode::Send, Some(addr)) => send_id(key.as_str(), addr),
                _ => key.to_string(),
            };
            Entry {
                recipient: r.clone(),
                key,
                id,
                destination,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_csv(dir: &Path, body: &str) -> std::path::PathBuf {
        let path = dir.join("guests.csv");
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn loads_rows_and_skips_blank_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(
            dir.path(),
            "Name,Email Address,Seat\nAnna B. Lee, anna@example.org ,12\n,,\nBen Ode,ben@example.org\n",
        );
        let table = load_csv(&path, b',').unwrap();
        assert_eq!(table.columns, vec!["Name", "Email Address", "Seat"]);
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[0].get("Email Address"), Some("anna@example.org"));
        assert_eq!(table.rows[1].get("Seat"), Some(""));
    }

    #[test]
    fn missing_source_is_a_config_error() {
        let err = load_csv(Path::new("/definitely/not/here.csv"), b',').unwrap_err();
        assert!(err.downcast_ref::<ConfigError>().is_some());
    }

    #[test]
    fn guesses_columns_by_header() {
        let cols: Vec<String> = vec!["Guest Name".into(), "E-mail".into(), "EMAIL".into()];
        assert_eq!(guess_column(&cols, "name"), Some("Guest Name"));
        assert_eq!(guess_column(&cols, "email"), Some("EMAIL"));
        assert_eq!(guess_column(&cols, "phone"), Some("Guest Name"));
        assert_eq!(guess_column(&[], "name"), None);
    }

    #[test]
    fn send_entries_use_composite_ids() {
        let table = RecipientTable {
            columns: vec!["Name".into(), "Email".into()],
            rows: vec![Recipient::new(
                2,
                vec![
                    ("Name".into(), "Anna B. Lee".into()),
                    ("Email".into(), " Anna@Example.org ".into()),
                ],
            )],
        };
        let entries = build_entries(&table, Mode::Send, "Name", Some("Email"));
        assert_eq!(entries[0].id, "Anna B Lee <anna@example.org>");
        assert_eq!(entries[0].destination.as_deref(), Some("Anna@Example.org"));

        let entries = build_entries(&table, Mode::Generate, "Name", None);
        assert_eq!(entries[0].id, "Anna B Lee");
    }
}
