//! The main transcode loop

use std::thread;
use std::time::Duration;

use tracing::{debug, error, info};

use crate::console::ConsoleAction;
use crate::error::{TransmuxError, TransmuxResult};
use crate::model::OutputStreamKey;
use crate::term;
use crate::utils::bench;

use super::chooser::Choice;
use super::input::InputStatus;
use super::{RunOutcome, Scheduler};

impl Scheduler {
    /// Run the transcode to completion (or interruption) and finalize
    /// every pipeline stage in order: decoders, encoders, muxers.
    pub fn run(&mut self) -> RunOutcome {
        self.print_stream_maps();
        term::mark_init_done();

        if self.opts.stdin_interaction {
            info!("Press [q] to stop, [?] for help");
        }

        let timer_start = bench::monotonic_micros();
        let mut result: TransmuxResult<()> = Ok(());

        while term::received_signal().is_none() {
            let cur_time = bench::monotonic_micros();

            if self.opts.stdin_interaction {
                let action = self
                    .console
                    .poll(cur_time, self.filters.as_mut(), &self.graph);
                if action == ConsoleAction::Exit {
                    break;
                }
            }

            match self.choose_output() {
                Choice::Busy => {
                    // every candidate is starved; give the demuxers a
                    // moment and rescan
                    self.reset_eagain();
                    thread::sleep(Duration::from_millis(10));
                    continue;
                }
                Choice::Done => {
                    debug!("No more output streams to write to, finishing.");
                    break;
                }
                Choice::Ready(key) => {
                    if let Err(e) = self.transcode_step(key) {
                        error!("Error while filtering: {}", e);
                        result = Err(e);
                        break;
                    }
                    self.bench
                        .update(&format!("step {}:{}", key.file, key.stream));
                }
            }

            self.report(false, timer_start, cur_time);
        }

        // streams whose file never hit EOF still hold decoder state
        let mut cursor = self.graph.next_input(None);
        while let Some(key) = cursor {
            if !self.graph.inputs[key.file].eof_reached {
                if let Err(e) = self.process_input_packet(key, None, false) {
                    result = merge(result, e);
                }
            }
            cursor = self.graph.next_input(Some(key));
        }

        let mut err_rate_exceeded = false;
        let mut cursor = self.graph.next_input(None);
        while let Some(key) = cursor {
            let ist = self.graph.ist(key);
            let rate = ist.decode_error_rate();
            if rate > 0.0 && rate >= self.opts.max_error_rate {
                error!(
                    "Decode error rate {} exceeds maximum {}",
                    rate, self.opts.max_error_rate
                );
                err_rate_exceeded = true;
            } else if rate > 0.0 {
                debug!("Decode error rate {} on stream {}:{}", rate, key.file, key.stream);
            }
            cursor = self.graph.next_input(Some(key));
        }

        if let Err(e) = self.output.flush_encoders(&mut self.graph) {
            result = merge(result, e);
        }

        term::exit();

        for file_index in 0..self.graph.outputs.len() {
            if let Err(e) = self.output.write_trailer(file_index) {
                error!("Error writing trailer of output file {}: {}", file_index, e);
                result = merge(result, e);
            }
        }

        if let Some(vstats) = self.vstats.take() {
            vstats.close();
        }

        self.report(true, timer_start, bench::monotonic_micros());

        RunOutcome {
            result,
            err_rate_exceeded,
        }
    }

    /// Advance one output stream by one unit of upstream work.
    fn transcode_step(&mut self, key: OutputStreamKey) -> TransmuxResult<()> {
        let ist_key = match &self.graph.ost(key).filter {
            Some(filter) => match self.filters.request_input(filter.graph)? {
                Some(k) => k,
                // the graph is working off frames it already buffered
                None => return Ok(()),
            },
            None => self.graph.ost(key).source.ok_or_else(|| TransmuxError::Graph {
                message: format!(
                    "output {}:{} has neither a filter nor a source stream",
                    key.file, key.stream
                ),
            })?,
        };

        match self.process_input(ist_key.file)? {
            InputStatus::Again => {
                if self.graph.inputs[ist_key.file].eagain {
                    self.graph.ost_mut(key).unavailable = true;
                }
                return Ok(());
            }
            InputStatus::Progress => {}
        }

        self.filters.reap(&mut self.graph, false)
    }

    fn report(&mut self, is_last: bool, timer_start: i64, cur_time: i64) {
        let outputs_dumped = self.all_outputs_dumped();
        let total_size = if self.graph.outputs.is_empty() {
            None
        } else {
            self.output.filesize(0)
        };
        let frames_dup = self.nb_frames_dup;
        self.reporter.print_report(
            is_last,
            timer_start,
            cur_time,
            &self.graph,
            total_size,
            frames_dup,
            &mut self.nb_frames_drop,
            outputs_dumped,
        );
    }
}

/// Keep the first error, log nothing here; later failures were already
/// logged where they happened.
fn merge(result: TransmuxResult<()>, err: TransmuxError) -> TransmuxResult<()> {
    match result {
        Ok(()) => Err(err),
        Err(first) => Err(first),
    }
}
