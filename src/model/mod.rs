//! Pipeline data model
//!
//! The transcode pipeline is a bipartite graph of input streams and output
//! streams, with filter graphs in between. All of it is held in one
//! [`PipelineGraph`] value owned by the scheduler; streams are addressed by
//! `(file, stream)` keys instead of pointers.

pub mod packet;

pub use packet::Packet;

use std::sync::atomic::AtomicU64;

use crossbeam_channel::Sender;
use serde::{Deserialize, Serialize};

use crate::ports::SyncQueue;
use crate::streams::subtitle::Subtitle;
use crate::utils::time::Rational;

/// Address of one input stream: `(input file index, stream index)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InputStreamKey {
    pub file: usize,
    pub stream: usize,
}

/// Address of one output stream: `(output file index, stream index)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutputStreamKey {
    pub file: usize,
    pub stream: usize,
}

/// Elementary stream type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Audio,
    Subtitle,
    Data,
}

/// A filter-graph input fed by an input stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FilterSink {
    pub graph: usize,
    pub input: usize,
}

/// The filter-graph output feeding an output stream.
#[derive(Debug, Clone)]
pub struct OutputFilter {
    pub graph: usize,
    /// Presentation time of the last frame the graph delivered, in
    /// microseconds. Drives output selection.
    pub last_pts: Option<i64>,
}

/// Duration of the final audio frame, reported back to the demuxer side so
/// it knows when it is safe to stop.
#[derive(Debug, Clone, Copy)]
pub struct LastFrameDuration {
    pub stream_index: usize,
    /// In the stream's own time base.
    pub duration: i64,
}

/// One elementary track inside an [`InputFile`].
pub struct InputStream {
    pub file_index: usize,
    pub index: usize,
    pub kind: MediaKind,
    /// Codec name, for the stream-map dump.
    pub codec: Option<String>,
    pub time_base: Rational,
    /// Audio sample rate; meaningful only for audio streams.
    pub sample_rate: i32,
    /// Packets of this stream go through a decoder.
    pub decoding_needed: bool,
    /// Stream is mapped nowhere and its packets are dropped.
    pub discard: bool,
    /// Decoded subtitles get their duration fixed retroactively.
    pub fix_sub_duration: bool,
    /// Filter-graph inputs fed by this stream.
    pub filters: Vec<FilterSink>,
    /// Output streams bound directly to this stream (stream copy, plus
    /// encoder-backed streams with no filter graph in between).
    pub outputs: Vec<OutputStreamKey>,
    pub frames_decoded: u64,
    pub decode_errors: u64,
    /// Total decoded audio samples, for the last-frame duration report.
    pub nb_samples: u64,
    /// Most recent decoded subtitle; its `pts` never decreases.
    pub prev_sub: Option<Subtitle>,
}

impl InputStream {
    pub fn key(&self) -> InputStreamKey {
        InputStreamKey { file: self.file_index, stream: self.index }
    }

    /// Share of packets that failed to decode, in `[0, 1]`.
    pub fn decode_error_rate(&self) -> f32 {
        let total = self.frames_decoded + self.decode_errors;
        if total == 0 {
            0.0
        } else {
            self.decode_errors as f32 / total as f32
        }
    }
}

/// A demuxed source file and its streams.
pub struct InputFile {
    pub index: usize,
    pub streams: Vec<InputStream>,
    /// Maximum presentation time to read, in microseconds. `None` reads to
    /// the end.
    pub recording_time: Option<i64>,
    pub start_time: Option<i64>,
    pub start_time_effective: i64,
    /// The demuxer had no data on the last poll.
    pub eagain: bool,
    pub eof_reached: bool,
    /// Channel to the demuxer side for final audio frame durations.
    pub audio_duration_tx: Option<Sender<LastFrameDuration>>,
}

/// `finished` bit: the encoder side of the stream accepts no more data.
/// Once set it is never cleared.
pub const ENCODER_FINISHED: u8 = 1 << 0;
/// `finished` bit: the muxer side of the stream has been closed.
pub const MUXER_FINISHED: u8 = 1 << 1;

/// One elementary track inside an [`OutputFile`].
pub struct OutputStream {
    pub file_index: usize,
    pub index: usize,
    pub kind: MediaKind,
    /// Frames are re-encoded (as opposed to stream copy).
    pub encoding: bool,
    /// Encoder name, for the stream-map dump.
    pub encoder: Option<String>,
    /// Latest encoder quality in lambda units; reports divide by
    /// [`QP2LAMBDA`].
    pub quality: f32,
    /// Upstream filter graph, if frames arrive through one.
    pub filter: Option<OutputFilter>,
    /// Source input stream for direct stream copy.
    pub source: Option<InputStreamKey>,
    pub packets_written: AtomicU64,
    /// Decode timestamp of the last muxed packet, microseconds.
    /// Non-decreasing once set.
    pub last_mux_dts: Option<i64>,
    pub last_dropped: u64,
    /// Slot in the owning file's encode sync queue.
    pub sq_idx_encode: Option<usize>,
    /// Key packets on this stream retroactively extend sibling subtitles.
    pub fix_sub_duration_heartbeat: bool,
    pub initialized: bool,
    pub inputs_done: bool,
    pub unavailable: bool,
    pub finished: u8,
    /// Latch so the missing-DTS situation is only logged once.
    pub dts_logged: bool,
}

/// Scale between encoder lambda units and quantizer scale.
pub const QP2LAMBDA: f32 = 118.0;

impl OutputStream {
    pub fn key(&self) -> OutputStreamKey {
        OutputStreamKey { file: self.file_index, stream: self.index }
    }

    pub fn is_finished(&self) -> bool {
        self.finished != 0
    }

    pub fn encoder_finished(&self) -> bool {
        self.finished & ENCODER_FINISHED != 0
    }

    /// Record the DTS of a muxed packet, keeping `last_mux_dts`
    /// non-decreasing.
    pub fn note_mux_dts(&mut self, dts: i64) {
        self.last_mux_dts = Some(match self.last_mux_dts {
            Some(prev) => prev.max(dts),
            None => dts,
        });
    }
}

/// Groups output streams written into one container.
pub struct OutputFile {
    pub index: usize,
    pub streams: Vec<OutputStream>,
    /// Encode-side sync queue for aligned closure of linked streams.
    pub sq_encode: Option<Box<dyn SyncQueue>>,
}

/// A user-constructed graph of frame transformations.
pub struct FilterGraph {
    pub index: usize,
    /// One input, one output, straight line.
    pub simple: bool,
    /// A runtime graph handle exists; commands can be sent.
    pub ready: bool,
}

/// The whole pipeline: every input file, output file and filter graph.
///
/// All three arrays are append-only while a transcode runs, which is what
/// makes the `(file, stream)` cursor traversal stable.
///
/// Teardown happens in declaration order: filter graphs first, then
/// output files, then input files.
#[derive(Default)]
pub struct PipelineGraph {
    pub filtergraphs: Vec<FilterGraph>,
    pub outputs: Vec<OutputFile>,
    pub inputs: Vec<InputFile>,
}

impl std::fmt::Debug for PipelineGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineGraph")
            .field("filtergraphs", &self.filtergraphs.len())
            .field("outputs", &self.outputs.len())
            .field("inputs", &self.inputs.len())
            .finish()
    }
}

impl PipelineGraph {
    pub fn ist(&self, key: InputStreamKey) -> &InputStream {
        &self.inputs[key.file].streams[key.stream]
    }

    pub fn ist_mut(&mut self, key: InputStreamKey) -> &mut InputStream {
        &mut self.inputs[key.file].streams[key.stream]
    }

    pub fn ost(&self, key: OutputStreamKey) -> &OutputStream {
        &self.outputs[key.file].streams[key.stream]
    }

    pub fn ost_mut(&mut self, key: OutputStreamKey) -> &mut OutputStream {
        &mut self.outputs[key.file].streams[key.stream]
    }

    /// Next output stream after `prev` in `(file, stream)` order, or the
    /// first one when `prev` is `None`. Returns `None` when exhausted.
    pub fn next_output(&self, prev: Option<OutputStreamKey>) -> Option<OutputStreamKey> {
        let (mut file, mut stream) = match prev {
            Some(k) => (k.file, k.stream + 1),
            None => (0, 0),
        };
        while file < self.outputs.len() {
            if stream < self.outputs[file].streams.len() {
                return Some(OutputStreamKey { file, stream });
            }
            file += 1;
            stream = 0;
        }
        None
    }

    /// Next input stream after `prev` in `(file, stream)` order.
    pub fn next_input(&self, prev: Option<InputStreamKey>) -> Option<InputStreamKey> {
        let (mut file, mut stream) = match prev {
            Some(k) => (k.file, k.stream + 1),
            None => (0, 0),
        };
        while file < self.inputs.len() {
            if stream < self.inputs[file].streams.len() {
                return Some(InputStreamKey { file, stream });
            }
            file += 1;
            stream = 0;
        }
        None
    }

    /// Every output stream key, each exactly once, in traversal order.
    pub fn output_streams(&self) -> impl Iterator<Item = OutputStreamKey> + '_ {
        std::iter::successors(self.next_output(None), move |prev| {
            self.next_output(Some(*prev))
        })
    }

    /// Every input stream key, each exactly once, in traversal order.
    pub fn input_streams(&self) -> impl Iterator<Item = InputStreamKey> + '_ {
        std::iter::successors(self.next_input(None), move |prev| {
            self.next_input(Some(*prev))
        })
    }
}

/// Bare-bones constructors for model values, shared by the unit tests of
/// several modules.
#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub(crate) fn input_stream(file_index: usize, index: usize) -> InputStream {
        InputStream {
            file_index,
            index,
            kind: MediaKind::Video,
            codec: None,
            time_base: Rational::MICROSECONDS,
            sample_rate: 0,
            decoding_needed: false,
            discard: false,
            fix_sub_duration: false,
            filters: Vec::new(),
            outputs: Vec::new(),
            frames_decoded: 0,
            decode_errors: 0,
            nb_samples: 0,
            prev_sub: None,
        }
    }

    pub(crate) fn output_stream(file_index: usize, index: usize) -> OutputStream {
        OutputStream {
            file_index,
            index,
            kind: MediaKind::Video,
            encoding: false,
            encoder: None,
            quality: 0.0,
            filter: None,
            source: None,
            packets_written: AtomicU64::new(0),
            last_mux_dts: None,
            last_dropped: 0,
            sq_idx_encode: None,
            fix_sub_duration_heartbeat: false,
            initialized: false,
            inputs_done: false,
            unavailable: false,
            finished: 0,
            dts_logged: false,
        }
    }

    pub(crate) fn input_file(index: usize, nb_streams: usize) -> InputFile {
        InputFile {
            index,
            streams: (0..nb_streams).map(|s| input_stream(index, s)).collect(),
            recording_time: None,
            start_time: None,
            start_time_effective: 0,
            eagain: false,
            eof_reached: false,
            audio_duration_tx: None,
        }
    }

    pub(crate) fn output_file(index: usize, nb_streams: usize) -> OutputFile {
        OutputFile {
            index,
            streams: (0..nb_streams).map(|s| output_stream(index, s)).collect(),
            sq_encode: None,
        }
    }

    pub(crate) fn graph_with_shape(inputs: &[usize], outputs: &[usize]) -> PipelineGraph {
        let mut graph = PipelineGraph::default();
        for (i, &n) in inputs.iter().enumerate() {
            graph.inputs.push(input_file(i, n));
        }
        for (i, &n) in outputs.iter().enumerate() {
            graph.outputs.push(output_file(i, n));
        }
        graph
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn output_traversal_visits_each_stream_once_in_order() {
        let graph = graph_with_shape(&[], &[2, 0, 3]);
        let keys: Vec<_> = graph.output_streams().collect();
        assert_eq!(
            keys,
            vec![
                OutputStreamKey { file: 0, stream: 0 },
                OutputStreamKey { file: 0, stream: 1 },
                OutputStreamKey { file: 2, stream: 0 },
                OutputStreamKey { file: 2, stream: 1 },
                OutputStreamKey { file: 2, stream: 2 },
            ]
        );
    }

    #[test]
    fn input_traversal_skips_empty_files() {
        let graph = graph_with_shape(&[0, 1, 0, 2], &[]);
        let keys: Vec<_> = graph.input_streams().collect();
        assert_eq!(
            keys,
            vec![
                InputStreamKey { file: 1, stream: 0 },
                InputStreamKey { file: 3, stream: 0 },
                InputStreamKey { file: 3, stream: 1 },
            ]
        );
    }

    #[test]
    fn empty_graph_traversals_are_empty() {
        let graph = PipelineGraph::default();
        assert_eq!(graph.next_output(None), None);
        assert_eq!(graph.next_input(None), None);
    }

    #[test]
    fn mux_dts_never_decreases() {
        let mut ost = output_stream(0, 0);
        ost.note_mux_dts(100);
        ost.note_mux_dts(50);
        assert_eq!(ost.last_mux_dts, Some(100));
        ost.note_mux_dts(150);
        assert_eq!(ost.last_mux_dts, Some(150));
    }

    #[test]
    fn decode_error_rate_handles_zero_totals() {
        let mut ist = input_stream(0, 0);
        assert_eq!(ist.decode_error_rate(), 0.0);
        ist.frames_decoded = 40;
        ist.decode_errors = 10;
        assert!((ist.decode_error_rate() - 0.2).abs() < f32::EPSILON);
    }
}
