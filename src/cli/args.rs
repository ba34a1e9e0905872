//! Command-line argument definitions

use std::path::PathBuf;

use clap::Parser;

use crate::engine::{Options, PrintStats};
use crate::term;

/// Transcode scheduling driver
///
/// Drives synthetic packet timelines described by a session file through
/// the full scheduling pipeline: output selection, recording-time caps,
/// subtitle heartbeats, progress reporting and graceful shutdown.
#[derive(Parser, Debug)]
#[command(name = "transmux")]
#[command(about = "Transcoding orchestrator dry-run driver")]
#[command(version)]
pub struct Cli {
    /// Session description file (JSON)
    #[arg(short, long)]
    pub session: Option<PathBuf>,

    /// Disable interactive keyboard handling on standard input
    #[arg(long = "nostdin")]
    pub no_stdin: bool,

    /// Log overall resource usage at exit
    #[arg(long)]
    pub benchmark: bool,

    /// Log resource usage around every scheduling step
    #[arg(long = "benchmark-all")]
    pub benchmark_all: bool,

    /// Status line destination: 0 quiet, 1 stderr, 2 log
    #[arg(long, default_value_t = 1)]
    pub print_stats: u8,

    /// Seconds between periodic reports
    #[arg(long, default_value_t = 0.5)]
    pub stats_period: f64,

    /// Preserve input timestamps instead of zero-basing them
    #[arg(long = "copy-ts")]
    pub copy_ts: bool,

    /// With --copy-ts, shift timestamps so they start at zero
    #[arg(long = "start-at-zero")]
    pub start_at_zero: bool,

    /// Abort on the first demuxer error instead of treating it as EOF
    #[arg(long)]
    pub xerror: bool,

    /// Decode error rate ceiling in [0, 1]
    #[arg(long, default_value_t = 2.0 / 3.0)]
    pub max_error_rate: f32,

    /// Per-frame video statistics file
    #[arg(long)]
    pub vstats_file: Option<PathBuf>,

    /// Machine-readable progress sink ('-' = stdout)
    #[arg(long)]
    pub progress: Option<PathBuf>,
}

impl Cli {
    /// Collapse the flags into the orchestrator configuration.
    pub fn options(&self) -> Options {
        Options {
            stdin_interaction: !self.no_stdin && term::stdin_isatty(),
            do_benchmark: self.benchmark || self.benchmark_all,
            do_benchmark_all: self.benchmark_all,
            print_stats: match self.print_stats {
                0 => PrintStats::Quiet,
                2 => PrintStats::Log,
                _ => PrintStats::Stderr,
            },
            stats_period: (self.stats_period * 1e6) as i64,
            copy_ts: self.copy_ts,
            start_at_zero: self.start_at_zero,
            exit_on_error: self.xerror,
            max_error_rate: self.max_error_rate,
            vstats_filename: self.vstats_file.clone(),
            progress_path: self.progress.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cli = Cli::parse_from(["transmux"]);
        let opts = cli.options();
        assert_eq!(opts.stats_period, 500_000);
        assert_eq!(opts.print_stats, PrintStats::Stderr);
        assert!(!opts.copy_ts);
        assert!((opts.max_error_rate - 2.0 / 3.0).abs() < f32::EPSILON);
    }

    #[test]
    fn print_stats_modes_parse() {
        let cli = Cli::parse_from(["transmux", "--print-stats", "0"]);
        assert_eq!(cli.options().print_stats, PrintStats::Quiet);
        let cli = Cli::parse_from(["transmux", "--print-stats", "2"]);
        assert_eq!(cli.options().print_stats, PrintStats::Log);
    }
}
