//! Conflict naming for keep-both resolution
//!
//! Generates unique file names for conflict copies, following the pattern:
//! `filename (conflicted copy YYYY-MM-DD HHMMSS XXXXXXXX).ext`

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Generates unique conflict file names
pub struct ConflictNamer;

impl ConflictNamer {
    /// Generates a conflict copy filename stamped with `at`
    ///
    /// Given "report.docx", produces something like:
    /// "report (conflicted copy 2026-10-19 143005 a1b2c3d4).docx"
    pub fn generate(original_name: &str, at: DateTime<Utc>) -> String {
        let timestamp = at.format("%Y-%m-%d %H%M%S");
        let short_uuid = &Uuid::new_v4().simple().to_string()[..8];

        match split_extension(original_name) {
            Some((stem, ext)) => {
                format!("{stem} (conflicted copy {timestamp} {short_uuid}){ext}")
            }
            None => format!("{original_name} (conflicted copy {timestamp} {short_uuid})"),
        }
    }

    /// Generates a name that `exists` reports as free
    ///
    /// Returns `None` if every candidate is taken.
    pub fn generate_unique<F>(original_name: &str, at: DateTime<Utc>, mut exists: F) -> Option<String>
    where
        F: FnMut(&str) -> bool,
    {
        let candidate = Self::generate(original_name, at);
        if !exists(&candidate) {
            return Some(candidate);
        }

        // Extremely unlikely with UUID, but handle it
        for i in 2..=99 {
            let numbered = match split_extension(&candidate) {
                Some((stem, ext)) => format!("{stem} {i}{ext}"),
                None => format!("{candidate} {i}"),
            };
            if !exists(&numbered) {
                return Some(numbered);
            }
        }

        None
    }
}

/// Splits `name.ext` into `("name", ".ext")`; dotfiles have no extension
fn split_extension(name: &str) -> Option<(&str, &str)> {
    match name.rfind('.') {
        Some(pos) if pos > 0 => Some((&name[..pos], &name[pos..])),
        _ => None,
    }
}
