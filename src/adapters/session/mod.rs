//! Session descriptions
//!
//! A session is the JSON counterpart of a parsed command line: which input
//! files exist, what their streams look like, how output streams map onto
//! them, and (for dry runs) the scripted packet timeline of each input.
//! Building a session validates the wiring and yields a
//! [`PipelineGraph`] plus a loopback backend primed with the timelines.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::adapters::loopback::LoopbackBackend;
use crate::error::{TransmuxError, TransmuxResult};
use crate::model::{
    FilterGraph, FilterSink, InputFile, InputStream, InputStreamKey, MediaKind, OutputFile,
    OutputStream, Packet, PipelineGraph,
};
use crate::utils::time::Rational;

use std::sync::atomic::AtomicU64;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSpec {
    #[serde(default)]
    pub inputs: Vec<InputFileSpec>,
    #[serde(default)]
    pub outputs: Vec<OutputFileSpec>,
    #[serde(default)]
    pub filtergraphs: Vec<FilterGraphSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputFileSpec {
    /// Display name only; nothing is opened.
    #[serde(default)]
    pub name: Option<String>,
    /// Microseconds of presentation time to read; absent = unbounded.
    #[serde(default)]
    pub recording_time_us: Option<i64>,
    #[serde(default)]
    pub start_time_us: Option<i64>,
    #[serde(default)]
    pub start_time_effective_us: i64,
    #[serde(default)]
    pub streams: Vec<InputStreamSpec>,
    /// Scripted packet timeline, in demux order.
    #[serde(default)]
    pub packets: Vec<PacketSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputStreamSpec {
    pub kind: MediaKind,
    #[serde(default)]
    pub codec: Option<String>,
    #[serde(default = "microsecond_time_base")]
    pub time_base: Rational,
    #[serde(default)]
    pub sample_rate: i32,
    #[serde(default)]
    pub decoding_needed: bool,
    #[serde(default)]
    pub discard: bool,
    #[serde(default)]
    pub fix_sub_duration: bool,
    /// Filter-graph inputs this stream feeds.
    #[serde(default)]
    pub filters: Vec<FilterSink>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacketSpec {
    pub stream: usize,
    #[serde(default)]
    pub pts_us: Option<i64>,
    #[serde(default)]
    pub dts_us: Option<i64>,
    #[serde(default)]
    pub duration_us: i64,
    #[serde(default)]
    pub key: bool,
    #[serde(default)]
    pub size: usize,
    /// Demux-side DTS estimate; defaults to `dts_us`.
    #[serde(default)]
    pub dts_est_us: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputFileSpec {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub streams: Vec<OutputStreamSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputStreamSpec {
    pub kind: MediaKind,
    /// Source input stream for stream copy. Exactly one of `source` and
    /// `filter` must be set.
    #[serde(default)]
    pub source: Option<InputStreamKey>,
    /// Upstream filter graph index.
    #[serde(default)]
    pub filter: Option<usize>,
    /// Encoder name; absent means stream copy.
    #[serde(default)]
    pub encoder: Option<String>,
    #[serde(default)]
    pub fix_sub_duration_heartbeat: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterGraphSpec {
    #[serde(default)]
    pub simple: bool,
}

fn microsecond_time_base() -> Rational {
    Rational::MICROSECONDS
}

impl SessionSpec {
    pub fn load(path: &Path) -> TransmuxResult<Self> {
        let text = fs::read_to_string(path)?;
        serde_json::from_str(&text).map_err(|e| TransmuxError::Session {
            message: format!("{}: {}", path.display(), e),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty() && self.outputs.is_empty()
    }

    /// Build the pipeline graph and a loopback backend primed with the
    /// scripted timelines.
    pub fn build(&self) -> TransmuxResult<(PipelineGraph, LoopbackBackend)> {
        let backend = LoopbackBackend::new();
        let mut graph = PipelineGraph::default();

        for (g, fg) in self.filtergraphs.iter().enumerate() {
            graph.filtergraphs.push(FilterGraph {
                index: g,
                simple: fg.simple,
                ready: true,
            });
        }

        for (f, file) in self.inputs.iter().enumerate() {
            let mut streams = Vec::with_capacity(file.streams.len());
            for (s, spec) in file.streams.iter().enumerate() {
                for sink in &spec.filters {
                    if sink.graph >= graph.filtergraphs.len() {
                        return Err(TransmuxError::Session {
                            message: format!(
                                "input stream {}:{} feeds unknown filter graph {}",
                                f, s, sink.graph
                            ),
                        });
                    }
                }
                streams.push(InputStream {
                    file_index: f,
                    index: s,
                    kind: spec.kind,
                    codec: spec.codec.clone(),
                    time_base: spec.time_base,
                    sample_rate: spec.sample_rate,
                    decoding_needed: spec.decoding_needed,
                    discard: spec.discard,
                    fix_sub_duration: spec.fix_sub_duration,
                    filters: spec.filters.clone(),
                    outputs: Vec::new(),
                    frames_decoded: 0,
                    decode_errors: 0,
                    nb_samples: 0,
                    prev_sub: None,
                });
            }
            graph.inputs.push(InputFile {
                index: f,
                streams,
                recording_time: file.recording_time_us,
                start_time: file.start_time_us,
                start_time_effective: file.start_time_effective_us,
                eagain: false,
                eof_reached: false,
                audio_duration_tx: None,
            });

            for pkt in &file.packets {
                if pkt.stream >= file.streams.len() {
                    return Err(TransmuxError::Session {
                        message: format!(
                            "packet on unknown stream {}:{}",
                            f, pkt.stream
                        ),
                    });
                }
                backend.push_packet(
                    f,
                    Packet {
                        stream_index: pkt.stream,
                        pts: pkt.pts_us,
                        dts: pkt.dts_us,
                        time_base: Rational::MICROSECONDS,
                        duration: pkt.duration_us,
                        data: vec![0u8; pkt.size],
                        key: pkt.key,
                        dts_est: pkt.dts_est_us.or(pkt.dts_us),
                    },
                );
            }
        }

        for (f, file) in self.outputs.iter().enumerate() {
            let mut streams = Vec::with_capacity(file.streams.len());
            for (s, spec) in file.streams.iter().enumerate() {
                match (spec.source, spec.filter) {
                    (Some(_), Some(_)) | (None, None) => {
                        return Err(TransmuxError::Session {
                            message: format!(
                                "output stream {}:{} must have exactly one of source/filter",
                                f, s
                            ),
                        });
                    }
                    (Some(src), None) => {
                        if src.file >= graph.inputs.len()
                            || src.stream >= graph.inputs[src.file].streams.len()
                        {
                            return Err(TransmuxError::Session {
                                message: format!(
                                    "output stream {}:{} sources unknown input {}:{}",
                                    f, s, src.file, src.stream
                                ),
                            });
                        }
                    }
                    (None, Some(g)) => {
                        if g >= graph.filtergraphs.len() {
                            return Err(TransmuxError::Session {
                                message: format!(
                                    "output stream {}:{} uses unknown filter graph {}",
                                    f, s, g
                                ),
                            });
                        }
                    }
                }

                streams.push(OutputStream {
                    file_index: f,
                    index: s,
                    kind: spec.kind,
                    encoding: spec.encoder.is_some(),
                    encoder: spec.encoder.clone(),
                    quality: 0.0,
                    filter: spec.filter.map(|g| crate::model::OutputFilter {
                        graph: g,
                        last_pts: None,
                    }),
                    source: spec.source,
                    packets_written: AtomicU64::new(0),
                    last_mux_dts: None,
                    last_dropped: 0,
                    sq_idx_encode: None,
                    fix_sub_duration_heartbeat: spec.fix_sub_duration_heartbeat,
                    initialized: false,
                    inputs_done: false,
                    unavailable: false,
                    finished: 0,
                    dts_logged: false,
                });
            }
            graph.outputs.push(OutputFile {
                index: f,
                streams,
                sq_encode: None,
            });
        }

        // wire source-bound consumers onto their input streams; the
        // packet fan-out skips encoder-backed ones, but end-of-file
        // closure reaches every directly bound output
        for key in graph.output_streams().collect::<Vec<_>>() {
            if let Some(src) = graph.ost(key).source {
                graph.ist_mut(src).outputs.push(key);
            }
        }

        // simple graphs pull from the stream that feeds them
        for g in 0..graph.filtergraphs.len() {
            let feed = graph
                .input_streams()
                .find(|&key| graph.ist(key).filters.iter().any(|sink| sink.graph == g));
            backend.set_graph_feed(g, feed);
        }

        Ok((graph, backend))
    }
}
