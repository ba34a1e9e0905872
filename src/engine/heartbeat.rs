//! Subtitle heartbeats
//!
//! Two refresh mechanisms keep sparse subtitle tracks from stalling the
//! pipeline: the sub2video heartbeat re-announces the current time to
//! every subtitle filter input whenever any packet arrives in the same
//! file, and the fix-sub-duration heartbeat retroactively extends the
//! previous decoded subtitle when a later key packet proves it is still on
//! screen.

use crate::error::TransmuxResult;
use crate::model::{FilterSink, InputStreamKey, MediaKind, OutputStreamKey, Packet};
use crate::streams::subtitle::copy_subtitle;
use crate::utils::time::{to_micros, Rational};

use super::Scheduler;

impl Scheduler {
    /// Re-announce `pts` to every subtitle filter input of the file, so a
    /// graph waiting on a sparse track keeps flowing.
    pub(crate) fn sub2video_heartbeat(
        &mut self,
        file_index: usize,
        pts: Option<i64>,
        time_base: Rational,
    ) {
        let sinks: Vec<FilterSink> = self.graph.inputs[file_index]
            .streams
            .iter()
            .filter(|ist| ist.kind == MediaKind::Subtitle)
            .flat_map(|ist| ist.filters.iter().copied())
            .collect();
        for sink in sinks {
            self.filters.sub2video_heartbeat(sink, pts, time_base);
        }
    }

    /// A key packet is leaving `key`'s output file: give every sibling
    /// stream that carries decoded subtitles a chance to extend its
    /// previous event up to the packet's time.
    pub(crate) fn trigger_fix_sub_duration_heartbeat(
        &mut self,
        key: OutputStreamKey,
        pkt: &Packet,
    ) -> TransmuxResult<()> {
        let ost = self.graph.ost(key);
        if !ost.fix_sub_duration_heartbeat || !pkt.key {
            // only configured streams, and only at random access points
            return Ok(());
        }
        let Some(pts) = pkt.pts else {
            return Ok(());
        };
        let signal_pts = to_micros(pts, pkt.time_base);

        let siblings: Vec<InputStreamKey> = self.graph.outputs[key.file]
            .streams
            .iter()
            .filter(|other| other.index != key.stream)
            .filter_map(|other| other.source)
            .filter(|&src| {
                let ist = self.graph.ist(src);
                ist.decoding_needed && ist.kind == MediaKind::Subtitle
            })
            .collect();

        for src in siblings {
            self.fix_sub_duration_heartbeat(src, signal_pts)?;
        }
        Ok(())
    }

    /// Re-submit the stream's previous subtitle with its presentation time
    /// moved up to `signal_pts`, extending its displayed duration.
    fn fix_sub_duration_heartbeat(
        &mut self,
        key: InputStreamKey,
        signal_pts: i64,
    ) -> TransmuxResult<()> {
        let ist = self.graph.ist(key);
        let Some(prev) = &ist.prev_sub else {
            return Ok(());
        };
        if !ist.fix_sub_duration
            || prev.rects.is_empty()
            || prev.pts.is_some_and(|p| signal_pts <= p)
        {
            return Ok(());
        }

        let mut sub = copy_subtitle(prev)?;
        sub.pts = Some(signal_pts);
        self.decoder.process_subtitle(self.graph.ist_mut(key), sub)
    }
}
