use std::path::PathBuf;

use crate::prelude::*;

/// Snapshot file on the add-on data volume.
///
/// All IO is best-effort: a missing or unreadable file means "no snapshot", and a
/// failed write is logged and retried on the next save interval. Neither may ever
/// take the tracker down.
pub struct SnapshotFile {
    path: PathBuf,
}

impl SnapshotFile {
    pub const fn new(path: PathBuf) -> Self {
        Self { path }
    }

    #[instrument(skip_all, fields(path = %self.path.display()))]
    pub fn read(&self) -> Option<String> {
        if !self.path.is_file() {
            info!("no snapshot file yet");
            return None;
        }
        match std::fs::read_to_string(&self.path) {
            Ok(document) => Some(document),
            Err(error) => {
                error!("failed to read the snapshot: {error:#}");
                None
            }
        }
    }

    #[instrument(skip_all, fields(path = %self.path.display()))]
    pub fn write(&self, document: &str) {
        if let Err(error) = std::fs::write(&self.path, document) {
            error!("failed to save the snapshot: {error:#}");
        }
    }
}
