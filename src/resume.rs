//! Resume support for interrupted batch runs

use std::path::Path;
use tracing::debug;

/// Decides whether a destination still needs fetching
///
/// A re-run walks the same spec list as the first run; archives that already
/// made it to disk are left alone so only the gaps cost network time. The
/// two Japan Post tables bypass this guard and are always re-fetched.
pub struct ResumeGuard;

impl ResumeGuard {
    /// True when no regular file exists at `path` yet
    ///
    /// Only a regular file suppresses the fetch. A directory or other
    /// filesystem object at the destination does not count as a completed
    /// download.
    pub fn should_fetch(path: &Path) -> bool {
        let present = path.is_file();
        if present {
            debug!(path = %path.display(), "destination already present");
        }
        !present
    }
}
