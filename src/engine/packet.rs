//! Per-packet processing
//!
//! Feeds one input packet (or an end-of-file marker) into its stream's
//! decoder, enforces the per-file recording-time cap, and fans the packet
//! out to every stream-copy output.

use crate::error::TransmuxResult;
use crate::model::{InputStreamKey, Packet};
use crate::ports::DecodeStatus;

use super::Scheduler;

impl Scheduler {
    /// Process one packet for an input stream; `None` flushes.
    ///
    /// Returns `true` while more data is likely (the decoder has not hit
    /// end of stream), `false` once the stream is exhausted. `no_eof`
    /// suppresses end-of-file propagation to stream-copy outputs during
    /// mid-file flushes such as an input loop restart.
    pub(crate) fn process_input_packet(
        &mut self,
        key: InputStreamKey,
        pkt: Option<&Packet>,
        no_eof: bool,
    ) -> TransmuxResult<bool> {
        let decoding_needed = self.graph.ist(key).decoding_needed;
        let mut eof_reached = false;

        if decoding_needed {
            let status = self.decoder.decode(self.graph.ist_mut(key), pkt, no_eof)?;
            if status == DecodeStatus::Eof {
                eof_reached = true;
            }
        }
        if pkt.is_none() && !decoding_needed {
            eof_reached = true;
        }

        let dts_est = pkt.and_then(|p| p.dts_est);

        let duration_exceeded = {
            let file = &self.graph.inputs[key.file];
            match file.recording_time {
                Some(recording_time) => {
                    let mut start_time = 0i64;
                    if self.opts.copy_ts {
                        start_time += file.start_time.unwrap_or(0);
                        if !self.opts.start_at_zero {
                            start_time += file.start_time_effective;
                        }
                    }
                    dts_est.is_some_and(|dts| dts >= recording_time + start_time)
                }
                None => false,
            }
        };

        let outputs = self.graph.ist(key).outputs.clone();
        for okey in outputs {
            if self.graph.ost(okey).encoding || (pkt.is_none() && no_eof) {
                continue;
            }

            if duration_exceeded {
                self.close_output_stream(okey);
                continue;
            }

            if let Some(p) = pkt {
                if p.key {
                    self.trigger_fix_sub_duration_heartbeat(okey, p)?;
                }
            }

            self.output
                .streamcopy(self.graph.ost_mut(okey), pkt, dts_est)?;
        }

        Ok(!eof_reached)
    }
}
