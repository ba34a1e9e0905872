//! Reporting and statistics output

pub mod progress;
pub mod report;

use std::fs::File;
use std::path::{Path, PathBuf};

use tracing::error;

use crate::error::TransmuxResult;

/// Per-frame video statistics file.
///
/// Created up front when `--vstats-file` is configured so an unwritable
/// path fails the setup instead of the finalization.
pub struct VstatsFile {
    path: PathBuf,
    file: File,
}

impl VstatsFile {
    pub fn create(path: &Path) -> TransmuxResult<Self> {
        let file = File::create(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    /// Writer for encoder-side statistics lines.
    pub fn writer(&mut self) -> &mut File {
        &mut self.file
    }

    /// Close, logging any failure instead of dropping it silently.
    pub fn close(self) {
        if let Err(e) = self.file.sync_all() {
            error!(
                "Error closing vstats file {}, loss of information possible: {}",
                self.path.display(),
                e
            );
        }
    }
}
