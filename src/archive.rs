//! In-memory ZIP archive verification

use crate::types::VerifyOutcome;
use std::io::Cursor;
use tracing::debug;
use zip::ZipArchive;

/// Verifies downloaded bytes as ZIP archives without touching disk
///
/// The check is structural: the container must open and, when a member name
/// is expected, that member must be present. Entry contents are never read
/// or extracted.
pub struct ArchiveVerifier;

impl ArchiveVerifier {
    /// Inspect `bytes` as a ZIP archive
    ///
    /// Returns [`VerifyOutcome::Corrupt`] when the container cannot be
    /// opened, [`VerifyOutcome::MissingExpectedEntry`] when it opens but
    /// lacks `expected_entry`, and [`VerifyOutcome::Valid`] otherwise. When
    /// the expected entry is present its uncompressed size is reported.
    pub fn verify(bytes: &[u8], expected_entry: Option<&str>) -> VerifyOutcome {
        let mut archive = match ZipArchive::new(Cursor::new(bytes)) {
            Ok(archive) => archive,
            Err(e) => {
                return VerifyOutcome::Corrupt {
                    reason: e.to_string(),
                };
            }
        };

        let entries: Vec<String> = archive.file_names().map(str::to_string).collect();
        debug!(entry_count = entries.len(), "archive opened");

        match expected_entry {
            Some(expected) => {
                if !entries.iter().any(|name| name == expected) {
                    return VerifyOutcome::MissingExpectedEntry { entries };
                }
                let entry_size = archive.by_name(expected).ok().map(|entry| entry.size());
                VerifyOutcome::Valid {
                    entries,
                    entry_size,
                }
            }
            None => VerifyOutcome::Valid {
                entries,
                entry_size: None,
            },
        }
    }
}
