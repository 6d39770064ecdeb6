//! Output artifact naming and lookup under historical naming variants.

use crate::key::candidate_stems;
use crate::model::Key;
use std::path::{Path, PathBuf};

pub const ARTIFACT_PREFIX: &str = "Invitation - ";

/// `<dir>/Invitation - <key>.<ext>`
pub fn artifact_path(dir: &Path, key: &Key, ext: &str) -> PathBuf {
    dir.join(format!("{ARTIFACT_PREFIX}{key}.{ext}"))
}

/// Find an existing artifact for raw name text, trying the current naming
/// first and then each legacy variant in order.
pub fn find_existing(dir: &Path, raw_name: &str, ext: &str) -> Option<PathBuf> {
    candidate_stems(raw_name)
        .into_iter()
        .map(|stem| dir.join(format!("{ARTIFACT_PREFIX}{stem}.{ext}")))
        .find(|p| p.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::normalize;

    #[test]
    fn current_name_wins_over_legacy() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Invitation - Anna B Lee.png"), b"new").unwrap();
        std::fs::write(dir.path().join("Invitation - Anna B. Lee.png"), b"old").unwrap();

        let found = find_existing(dir.path(), "Anna B. Lee", "png").unwrap();
        assert_eq!(found, dir.path().join("Invitation - Anna B Lee.png"));
    }

    #[test]
    fn falls_back_to_raw_name() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Invitation - Anna B. Lee.png"), b"old").unwrap();

        let found = find_existing(dir.path(), "Anna B. Lee", "png").unwrap();
        assert_eq!(found, dir.path().join("Invitation - Anna B. Lee.png"));
        assert!(find_existing(dir.path(), "Ben", "png").is_none());
    }

    #[test]
    fn artifact_path_uses_key() {
        let key = Key::new(normalize("Anna B. Lee"));
        assert_eq!(
            artifact_path(Path::new("out"), &key, "pdf"),
            PathBuf::from("out/Invitation - Anna B Lee.pdf")
        );
    }
}
