//! Error handling module for transmux

use thiserror::Error;

/// Main error type for transmux operations
#[derive(Error, Debug)]
pub enum TransmuxError {
    /// No work was configured at all
    #[error("No input or output files were specified")]
    Usage,

    /// Demuxer failed to produce a packet
    #[error("Error retrieving a packet from demuxer: {message}")]
    Demux { message: String },

    /// Decoder rejected a packet or its flush
    #[error("Decoder error on stream {file_index}:{stream_index}: {message}")]
    Decode {
        file_index: usize,
        stream_index: usize,
        message: String,
    },

    /// Filter graph failure
    #[error("Filter graph error: {message}")]
    Filter { message: String },

    /// Encoder or muxer failure
    #[error("Output error: {message}")]
    Mux { message: String },

    /// Subtitle processing failure
    #[error("Subtitle processing error: {message}")]
    Subtitle { message: String },

    /// Session description could not be used
    #[error("Invalid session: {message}")]
    Session { message: String },

    /// Internal pipeline wiring is inconsistent
    #[error("Pipeline graph error: {message}")]
    Graph { message: String },

    /// Shutdown requested (quit key or signal)
    #[error("Exit requested")]
    Exit,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for transmux operations
pub type TransmuxResult<T> = std::result::Result<T, TransmuxError>;

/// Process exit codes.
pub mod exit_code {
    /// Everything completed.
    pub const SUCCESS: i32 = 0;
    /// Setup or usage error.
    pub const SETUP: i32 = 1;
    /// Decode error rate exceeded the configured ceiling.
    pub const ERROR_RATE_EXCEEDED: i32 = 69;
    /// A pipeline stage failed while the transcode was running.
    pub const TRANSCODE_FAILED: i32 = 70;
    /// Four or more signals arrived; hard exit without cleanup.
    pub const SIGNAL_STORM: i32 = 123;
    /// A termination signal interrupted the transcode.
    pub const INTERRUPTED: i32 = 255;
}

impl TransmuxError {
    /// The exit code this error propagates when it is what the transcode
    /// returned. Configuration problems are setup errors; everything else
    /// is a mid-run pipeline failure, distinguishable by callers.
    pub fn exit_code(&self) -> i32 {
        match self {
            TransmuxError::Usage | TransmuxError::Session { .. } => exit_code::SETUP,
            _ => exit_code::TRANSCODE_FAILED,
        }
    }
}

/// Map a finished transcode onto the process exit code.
///
/// A signal outranks the error-rate gate, which outranks the transcode
/// result; a failed transcode propagates its own error's code.
pub fn resolve_exit_code(
    signal_received: bool,
    err_rate_exceeded: bool,
    result: &TransmuxResult<()>,
) -> i32 {
    if signal_received {
        exit_code::INTERRUPTED
    } else if err_rate_exceeded {
        exit_code::ERROR_RATE_EXCEEDED
    } else {
        match result {
            Ok(()) => exit_code::SUCCESS,
            Err(e) => e.exit_code(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_code_precedence() {
        assert_eq!(resolve_exit_code(true, true, &Ok(())), 255);
        assert_eq!(resolve_exit_code(false, true, &Ok(())), 69);
        assert_eq!(resolve_exit_code(false, false, &Ok(())), 0);
        assert_eq!(
            resolve_exit_code(false, false, &Err(TransmuxError::Usage)),
            1
        );
    }

    #[test]
    fn transcode_failures_propagate_their_own_code() {
        let mid_run = TransmuxError::Mux {
            message: "container rejected packet".to_string(),
        };
        assert_eq!(resolve_exit_code(false, false, &Err(mid_run)), 70);
        let config = TransmuxError::Session {
            message: "bad mapping".to_string(),
        };
        assert_eq!(resolve_exit_code(false, false, &Err(config)), 1);
        // a signal still outranks the propagated code
        let mid_run = TransmuxError::Demux {
            message: "truncated".to_string(),
        };
        assert_eq!(resolve_exit_code(true, false, &Err(mid_run)), 255);
    }
}
