//! Key derivation: recipient name → stable tracking key and filename stem.

use crate::model::{Key, Recipient};

pub const DEFAULT_NAME_COLUMN: &str = "Name";

/// Characters that are not allowed in file names on common platforms.
const FORBIDDEN: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

/// Clean raw name text into a key.
///
/// Newlines become spaces, forbidden filename characters and periods are
/// removed, whitespace runs collapse to one space, and the result is trimmed.
pub fn normalize(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
        .filter(|c| *c != '.' && !FORBIDDEN.contains(c))
        .collect();
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// The raw text a key is derived from: the name column when it yields a
/// non-empty key, otherwise the first field that does.
pub fn name_source<'a>(recipient: &'a Recipient, name_column: &str) -> &'a str {
    recipient
        .get(name_column)
        .into_iter()
        .chain(recipient.values())
        .find(|v| !normalize(v).is_empty())
        .unwrap_or("")
}

/// Derive the key for a recipient. Empty only when every field is empty.
pub fn derive_key(recipient: &Recipient, name_column: &str) -> Key {
    Key::new(normalize(name_source(recipient, name_column)))
}

/// A pure function producing one historical filename stem from raw name text.
pub type StemVariant = fn(&str) -> String;

/// Stem rules used by earlier versions, in lookup order.
pub const LEGACY_VARIANTS: &[StemVariant] =
    &[normalize, first_generator_stem, first_sender_stem, raw_stem];

fn first_generator_stem(raw: &str) -> String {
    raw.replace('\n', " ").replace('.', "").replace('"', "'")
}

fn first_sender_stem(raw: &str) -> String {
    raw.split_whitespace()
        .map(|part| part.replace('.', ""))
        .collect::<Vec<_>>()
        .join(" ")
}

fn raw_stem(raw: &str) -> String {
    raw.trim().to_string()
}

/// Candidate stems for `raw`, deduplicated, skipping ones unusable as a file name.
pub fn candidate_stems(raw: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for variant in LEGACY_VARIANTS {
        let stem = variant(raw);
        if stem.trim().is_empty() || stem.contains(&['/', '\\'][..]) || out.contains(&stem) {
            continue;
        }
        out.push(stem);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn named(name: &str) -> Recipient {
        Recipient::new(2, vec![("Name".into(), name.into())])
    }

    #[test]
    fn periods_and_spacing_are_normalized() {
        assert_eq!(derive_key(&named("Anna B. Lee"), "Name").as_str(), "Anna B Lee");
        assert_eq!(derive_key(&named("Anna B Lee"), "Name").as_str(), "Anna B Lee");
        assert_eq!(
            derive_key(&named("  Dr.  Kim\nJi-ho  "), "Name").as_str(),
            "Dr Kim Ji-ho"
        );
    }

    #[test]
    fn forbidden_characters_are_removed() {
        assert_eq!(normalize(r#"A/B\C:D*E?F"G<H>I|J"#), "ABCDEFGHIJ");
    }

    #[test]
    fn derivation_is_deterministic() {
        let r = named("Mr. José  Álvarez");
        assert_eq!(derive_key(&r, "Name"), derive_key(&r, "Name"));
    }

    #[test]
    fn falls_back_to_first_non_empty_field() {
        let r = Recipient::new(
            3,
            vec![
                ("Name".into(), "  ".into()),
                ("Org".into(), "...".into()),
                ("Email".into(), "x@y.org".into()),
            ],
        );
        assert_eq!(derive_key(&r, "Name").as_str(), "x@yorg");

        let r = Recipient::new(3, vec![("Title".into(), "Guest".into())]);
        assert_eq!(derive_key(&r, "Name").as_str(), "Guest");
    }

    #[test]
    fn empty_record_yields_empty_key() {
        let r = Recipient::new(4, vec![("Name".into(), "".into())]);
        assert!(derive_key(&r, "Name").is_empty());
        assert!(derive_key(&Recipient::default(), "Name").is_empty());
    }

    #[test]
    fn candidate_stems_are_ordered_and_unique() {
        let stems = candidate_stems("Anna  B. \"Annie\" Lee");
        assert_eq!(stems[0], "Anna B Annie Lee");
        assert_eq!(stems[1], "Anna  B 'Annie' Lee");
        assert_eq!(stems[2], "Anna B \"Annie\" Lee");
        assert_eq!(stems[3], "Anna  B. \"Annie\" Lee");

        assert_eq!(candidate_stems("Anna Lee"), vec!["Anna Lee".to_string()]);
    }

    #[test]
    fn candidate_stems_skip_path_separators() {
        let stems = candidate_stems("A/B Co.");
        assert!(stems.iter().all(|s| !s.contains('/')));
        assert_eq!(stems, vec!["AB Co".to_string()]);
    }
}
