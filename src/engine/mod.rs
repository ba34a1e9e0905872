//! Transcode scheduling engine
//!
//! The [`Scheduler`] owns the pipeline graph and the port handles to the
//! external stages, and advances the whole pipeline one output stream at a
//! time: pick the output furthest behind in presentation time, pull
//! exactly enough upstream work to advance it, harvest filtered frames,
//! report, repeat.

pub mod chooser;
pub mod heartbeat;
pub mod input;
pub mod packet;
pub mod supervisor;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::console::Console;
use crate::error::TransmuxResult;
use crate::model::{OutputStreamKey, PipelineGraph, ENCODER_FINISHED};
use crate::output::progress::ProgressWriter;
use crate::output::report::Reporter;
use crate::output::VstatsFile;
use crate::ports::{Decoder, Demuxer, FilterBackend, OutputBackend};
use crate::utils::bench::Bench;
use crate::utils::logging::LogHandle;

/// Where the periodic human status line goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrintStats {
    /// Suppressed (the final report still prints).
    Quiet,
    /// Straight to standard error.
    Stderr,
    /// Through the logging layer.
    Log,
}

/// Pre-parsed orchestrator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Options {
    /// Poll the keyboard and allow interactive commands.
    pub stdin_interaction: bool,
    pub do_benchmark: bool,
    pub do_benchmark_all: bool,
    pub print_stats: PrintStats,
    /// Minimum microseconds between periodic reports.
    pub stats_period: i64,
    /// Preserve input timestamps instead of zero-basing them.
    pub copy_ts: bool,
    pub start_at_zero: bool,
    /// Abort on the first demuxer error instead of treating it as EOF.
    pub exit_on_error: bool,
    /// Ceiling on the per-stream decode error rate, in `[0, 1]`.
    pub max_error_rate: f32,
    pub vstats_filename: Option<PathBuf>,
    /// Machine-readable progress sink (`-` = stdout).
    pub progress_path: Option<PathBuf>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            stdin_interaction: false,
            do_benchmark: false,
            do_benchmark_all: false,
            print_stats: PrintStats::Stderr,
            stats_period: 500_000,
            copy_ts: false,
            start_at_zero: false,
            exit_on_error: false,
            max_error_rate: 2.0 / 3.0,
            vstats_filename: None,
            progress_path: None,
        }
    }
}

/// What a finished transcode looked like.
pub struct RunOutcome {
    pub result: TransmuxResult<()>,
    /// Some input stream's decode error rate exceeded the ceiling; the
    /// process exits 69.
    pub err_rate_exceeded: bool,
}

/// The transcode supervisor.
pub struct Scheduler {
    pub(crate) graph: PipelineGraph,
    pub(crate) demuxer: Box<dyn Demuxer>,
    pub(crate) decoder: Box<dyn Decoder>,
    pub(crate) filters: Box<dyn FilterBackend>,
    pub(crate) output: Box<dyn OutputBackend>,
    pub(crate) opts: Options,
    pub(crate) reporter: Reporter,
    pub(crate) bench: Bench,
    pub(crate) console: Console,
    pub(crate) nb_frames_dup: u64,
    pub(crate) nb_frames_drop: u64,
    pub(crate) vstats: Option<VstatsFile>,
}

impl Scheduler {
    pub fn new(
        graph: PipelineGraph,
        demuxer: Box<dyn Demuxer>,
        decoder: Box<dyn Decoder>,
        filters: Box<dyn FilterBackend>,
        output: Box<dyn OutputBackend>,
        opts: Options,
        log: Option<LogHandle>,
    ) -> TransmuxResult<Self> {
        let progress = match &opts.progress_path {
            Some(path) => Some(ProgressWriter::create(path)?),
            None => None,
        };
        let vstats = match &opts.vstats_filename {
            Some(path) => Some(VstatsFile::create(path)?),
            None => None,
        };
        let reporter = Reporter::new(opts.print_stats, opts.stats_period, opts.copy_ts, progress);
        let bench = Bench::new(opts.do_benchmark_all);

        Ok(Self {
            graph,
            demuxer,
            decoder,
            filters,
            output,
            opts,
            reporter,
            bench,
            console: Console::new(log),
            nb_frames_dup: 0,
            nb_frames_drop: 0,
            vstats,
        })
    }

    pub fn graph(&self) -> &PipelineGraph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut PipelineGraph {
        &mut self.graph
    }

    /// Stop feeding an output stream: the encoder side is done, and a
    /// linked sync queue (if any) learns about it so siblings can close in
    /// step.
    pub(crate) fn close_output_stream(&mut self, key: OutputStreamKey) {
        let of = &mut self.graph.outputs[key.file];
        let ost = &mut of.streams[key.stream];
        ost.finished |= ENCODER_FINISHED;
        if let Some(idx) = ost.sq_idx_encode {
            if let Some(sq) = of.sq_encode.as_mut() {
                sq.send_eof(idx);
            }
        }
    }

    /// Any demuxer progress unblocks the whole pipeline: clear every
    /// no-data flag so each output gets another chance.
    pub(crate) fn reset_eagain(&mut self) {
        for file in &mut self.graph.inputs {
            file.eagain = false;
        }
        for file in &mut self.graph.outputs {
            for ost in &mut file.streams {
                ost.unavailable = false;
            }
        }
    }

    /// The first periodic report waits until every output stream has been
    /// brought up, so it never shows a half-configured pipeline.
    pub(crate) fn all_outputs_dumped(&self) -> bool {
        self.graph
            .output_streams()
            .all(|key| self.graph.ost(key).initialized)
    }

    /// Log how every stream reaches its destination.
    pub(crate) fn print_stream_maps(&self) {
        info!("Stream mapping:");

        for key in self.graph.input_streams() {
            let ist = self.graph.ist(key);
            for sink in &ist.filters {
                if !self.graph.filtergraphs[sink.graph].simple {
                    info!(
                        "  Stream #{}:{} ({}) -> graph {}",
                        key.file,
                        key.stream,
                        ist.codec.as_deref().unwrap_or("?"),
                        sink.graph
                    );
                }
            }
        }

        for key in self.graph.output_streams() {
            let ost = self.graph.ost(key);

            if let Some(filter) = &ost.filter {
                if !self.graph.filtergraphs[filter.graph].simple {
                    info!(
                        "  graph {} -> Stream #{}:{} ({})",
                        filter.graph,
                        key.file,
                        key.stream,
                        ost.encoder.as_deref().unwrap_or("?")
                    );
                    continue;
                }
                // simple graph: report the binding end to end
                if let Some(src) = self.simple_graph_source(filter.graph) {
                    let ist = self.graph.ist(src);
                    info!(
                        "  Stream #{}:{} -> #{}:{} ({} -> {})",
                        src.file,
                        src.stream,
                        key.file,
                        key.stream,
                        ist.codec.as_deref().unwrap_or("?"),
                        ost.encoder.as_deref().unwrap_or("?")
                    );
                }
                continue;
            }

            if let Some(src) = ost.source {
                let ist = self.graph.ist(src);
                if ost.encoding {
                    info!(
                        "  Stream #{}:{} -> #{}:{} ({} -> {})",
                        src.file,
                        src.stream,
                        key.file,
                        key.stream,
                        ist.codec.as_deref().unwrap_or("?"),
                        ost.encoder.as_deref().unwrap_or("?")
                    );
                } else {
                    info!(
                        "  Stream #{}:{} -> #{}:{} (copy)",
                        src.file, src.stream, key.file, key.stream
                    );
                }
            }
        }
    }

    /// The input stream feeding a one-in-one-out graph.
    fn simple_graph_source(&self, graph: usize) -> Option<crate::model::InputStreamKey> {
        self.graph
            .input_streams()
            .find(|&key| self.graph.ist(key).filters.iter().any(|s| s.graph == graph))
    }
}
