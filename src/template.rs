//! `{{ placeholder }}` handling: extraction, column mapping and text rendering.

use crate::error::ConfigError;
use crate::model::Recipient;
use anyhow::{Context, Result};
use regex::Regex;
use std::collections::BTreeMap;
use std::io::{Cursor, Read};
use std::path::Path;
use std::sync::OnceLock;

/// Placeholder name → rendered value.
pub type RenderContext = BTreeMap<String, String>;

/// Placeholder name → source column.
pub type Mapping = Vec<(String, String)>;

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{\s*(\w+)\s*\}\}").expect("static regex"))
}

/// Unique placeholder names in order of first appearance.
pub fn extract_placeholders(text: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for cap in placeholder_re().captures_iter(text) {
        let name = cap[1].to_string();
        if !out.contains(&name) {
            out.push(name);
        }
    }
    out
}

fn markup_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<[^>]*>").expect("static regex"))
}

/// Placeholders of a template file. Office archives (`.docx`, `.odt`) are
/// scanned part by part with markup removed, so a placeholder split across
/// text runs is still found.
pub fn placeholders_in_file(path: &Path) -> Result<Vec<String>> {
    let bytes =
        std::fs::read(path).with_context(|| format!("read template {}", path.display()))?;
    if bytes.starts_with(b"PK\x03\x04") {
        return placeholders_in_archive(&bytes)
            .with_context(|| format!("scan template archive {}", path.display()));
    }
    let text = String::from_utf8(bytes)
        .with_context(|| format!("template {} is neither text nor an archive", path.display()))?;
    Ok(extract_placeholders(&text))
}

fn placeholders_in_archive(bytes: &[u8]) -> Result<Vec<String>> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;
    let mut out: Vec<String> = Vec::new();
    for i in 0..archive.len() {
        let mut part = archive.by_index(i)?;
        if !part.name().ends_with(".xml") {
            continue;
        }
        let mut xml = String::new();
        if part.read_to_string(&mut xml).is_err() {
            continue;
        }
        for name in extract_placeholders(&markup_re().replace_all(&xml, "")) {
            if !out.contains(&name) {
                out.push(name);
            }
        }
    }
    Ok(out)
}

/// Parse a `placeholder=Column` flag value.
pub fn parse_mapping(s: &str) -> Result<(String, String), ConfigError> {
    match s.split_once('=') {
        Some((ph, col)) if !ph.trim().is_empty() && !col.trim().is_empty() => {
            Ok((ph.trim().to_string(), col.trim().to_string()))
        }
        _ => Err(ConfigError::InvalidMapping(s.to_string())),
    }
}

fn loose(s: &str) -> String {
    s.chars()
        .filter(|c| !c.is_whitespace() && *c != '_' && *c != '-')
        .flat_map(char::to_lowercase)
        .collect()
}

/// Map every placeholder to a column: explicit pairs first, then a column whose
/// name matches ignoring case, spaces, `_` and `-`.
pub fn resolve_mapping(
    placeholders: &[String],
    columns: &[String],
    explicit: &[(String, String)],
) -> Result<Mapping, ConfigError> {
    for (_, col) in explicit {
        if !columns.iter().any(|c| c.eq_ignore_ascii_case(col)) {
            return Err(ConfigError::MissingColumn {
                column: col.clone(),
                available: columns.join(", "),
            });
        }
    }

    let mut mapping: Mapping = explicit.to_vec();
    for ph in placeholders {
        if mapping.iter().any(|(p, _)| p == ph) {
            continue;
        }
        let col = columns
            .iter()
            .find(|c| loose(c) == loose(ph))
            .ok_or_else(|| ConfigError::UnmappedPlaceholder(ph.clone()))?;
        mapping.push((ph.clone(), col.clone()));
    }
    Ok(mapping)
}

/// Values for each mapped placeholder; missing or blank cells become "".
pub fn build_context(recipient: &Recipient, mapping: &[(String, String)]) -> RenderContext {
    mapping
        .iter()
        .map(|(ph, col)| {
            let value = recipient.get(col).unwrap_or("").trim().to_string();
            (ph.clone(), value)
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Escape {
    None,
    Xml,
}

impl Escape {
    /// XML-based formats need their values escaped.
    pub fn for_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        match ext.as_str() {
            "fodt" | "fods" | "fodg" | "fodp" | "xml" | "html" | "htm" | "xhtml" | "svg" => {
                Escape::Xml
            }
            _ => Escape::None,
        }
    }
}

fn escape_xml(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

/// Substitute placeholders; unknown ones render as empty strings.
pub fn render_text(template: &str, ctx: &RenderContext, escape: Escape) -> String {
    placeholder_re()
        .replace_all(template, |cap: &regex::Captures| {
            let value = ctx.get(&cap[1]).map(String::as_str).unwrap_or("");
            match escape {
                Escape::None => value.to_string(),
                Escape::Xml => escape_xml(value),
            }
        })
        .into_owned()
}
