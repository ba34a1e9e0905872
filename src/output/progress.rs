//! Machine-readable progress sink
//!
//! Receives one key=value block per report, terminated by
//! `progress=continue` (or `progress=end` exactly once). The destination
//! is a file path or `-` for standard output.

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use tracing::{error, warn};

use crate::error::TransmuxResult;

pub struct ProgressWriter {
    dest: Box<dyn Write + Send>,
    label: String,
}

impl ProgressWriter {
    /// Open the sink at `path`; `-` means standard output.
    pub fn create(path: &Path) -> TransmuxResult<Self> {
        if path.as_os_str() == "-" {
            return Ok(Self {
                dest: Box::new(io::stdout()),
                label: "-".to_string(),
            });
        }
        let file = File::create(path)?;
        Ok(Self {
            dest: Box::new(file),
            label: path.display().to_string(),
        })
    }

    /// Wrap an arbitrary writer; used by tests to capture blocks.
    pub fn from_writer(dest: Box<dyn Write + Send>) -> Self {
        Self {
            dest,
            label: "<writer>".to_string(),
        }
    }

    /// Emit one complete block. Failures are logged, not fatal: progress
    /// reporting must never take the transcode down.
    pub fn write_block(&mut self, block: &str) {
        if let Err(e) = self.dest.write_all(block.as_bytes()).and_then(|_| self.dest.flush()) {
            warn!("Error writing progress block to {}: {}", self.label, e);
        }
    }

    /// Close the sink after the final block.
    pub fn close(mut self) {
        if let Err(e) = self.dest.flush() {
            error!(
                "Error closing progress log {}, loss of information possible: {}",
                self.label, e
            );
        }
    }
}
