//! Input driver
//!
//! Pulls one packet at a time from a demuxer and routes it into the
//! pipeline, handling no-data backoff, input looping, and end-of-file
//! propagation to every dependent output.

use tracing::{debug, error};

use crate::error::TransmuxResult;
use crate::model::{InputStreamKey, LastFrameDuration, MediaKind};
use crate::ports::DemuxPoll;
use crate::utils::time::{rescale, Rational};

use super::Scheduler;

/// Result of one [`Scheduler::process_input`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputStatus {
    /// One packet was read and processed.
    Progress,
    /// Nothing to do for this file right now; try another one.
    Again,
}

impl Scheduler {
    /// Pull and process one packet from the given input file.
    pub(crate) fn process_input(&mut self, file_index: usize) -> TransmuxResult<InputStatus> {
        match self.demuxer.poll(file_index) {
            Ok(DemuxPoll::Packet(pkt)) => {
                // any progress unblocks every stalled stream
                self.reset_eagain();

                self.sub2video_heartbeat(file_index, pkt.pts, pkt.time_base);

                let key = InputStreamKey {
                    file: file_index,
                    stream: pkt.stream_index,
                };
                self.process_input_packet(key, Some(&pkt), false)?;
                Ok(InputStatus::Progress)
            }
            Ok(DemuxPoll::Again) => {
                self.graph.inputs[file_index].eagain = true;
                Ok(InputStatus::Again)
            }
            Ok(DemuxPoll::Restart) => {
                // the input file looped: flush the decoders
                self.decode_flush(file_index)?;
                Ok(InputStatus::Again)
            }
            Ok(DemuxPoll::Eof) => self.input_eof(file_index),
            Err(e) => {
                error!("Error retrieving a packet from demuxer {}: {}", file_index, e);
                if self.opts.exit_on_error {
                    return Err(e);
                }
                self.input_eof(file_index)
            }
        }
    }

    /// The demuxer is done: drain decoders, finish every dependent output,
    /// and mark the file so the post-loop flush skips it.
    fn input_eof(&mut self, file_index: usize) -> TransmuxResult<InputStatus> {
        let nb_streams = self.graph.inputs[file_index].streams.len();
        for stream in 0..nb_streams {
            let key = InputStreamKey {
                file: file_index,
                stream,
            };
            if !self.graph.ist(key).discard {
                // a decoder may still hold frames; drain it one step per
                // call so downstream keeps its pull pacing
                if self.process_input_packet(key, None, false)? {
                    return Ok(InputStatus::Progress);
                }
            }

            let outputs = self.graph.ist(key).outputs.clone();
            for okey in outputs {
                self.close_output_stream(okey);
                self.output.finish_stream(self.graph.ost_mut(okey))?;
            }
        }

        self.graph.inputs[file_index].eof_reached = true;
        Ok(InputStatus::Again)
    }

    /// Flush every decoder of a file after an input loop restart, and tell
    /// the demuxer side how long each audio stream's final frame was.
    pub(crate) fn decode_flush(&mut self, file_index: usize) -> TransmuxResult<()> {
        let nb_streams = self.graph.inputs[file_index].streams.len();
        for stream in 0..nb_streams {
            let key = InputStreamKey {
                file: file_index,
                stream,
            };
            if self.graph.ist(key).discard {
                continue;
            }

            while self.process_input_packet(key, None, true)? {}

            if self.graph.ist(key).decoding_needed {
                let (kind, nb_samples, sample_rate, time_base) = {
                    let ist = self.graph.ist(key);
                    (ist.kind, ist.nb_samples, ist.sample_rate, ist.time_base)
                };
                if kind == MediaKind::Audio && sample_rate > 0 {
                    let duration = rescale(
                        nb_samples as i64,
                        Rational::new(1, sample_rate),
                        time_base,
                    );
                    if let Some(tx) = &self.graph.inputs[file_index].audio_duration_tx {
                        if tx
                            .send(LastFrameDuration {
                                stream_index: stream,
                                duration,
                            })
                            .is_err()
                        {
                            debug!(
                                "audio duration receiver for input {} is gone",
                                file_index
                            );
                        }
                    }
                }
                self.decoder.flush_buffers(self.graph.ist_mut(key));
            }
        }
        Ok(())
    }
}
