//! In-memory pipeline backend
//!
//! Implements every port against shared in-memory state: scripted packet
//! timelines on the demux side, a recording sink on the mux side. The
//! binary's dry-run mode uses it to exercise scheduling against synthetic
//! timelines, and the test suite uses it to observe exactly what the
//! scheduler did and in which order.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

use crate::error::{TransmuxError, TransmuxResult};
use crate::model::{
    FilterSink, InputStream, InputStreamKey, OutputStream, OutputStreamKey, Packet,
    PipelineGraph, MUXER_FINISHED,
};
use crate::ports::{
    DecodeStatus, Decoder, DemuxPoll, Demuxer, FilterBackend, OutputBackend, SyncQueue,
};
use crate::streams::subtitle::Subtitle;
use crate::utils::time::{to_micros, Rational};

/// One scripted demuxer response.
#[derive(Debug, Clone)]
pub enum ScriptedPoll {
    Packet(Packet),
    Again,
    Restart,
    Error(String),
}

/// Everything the backend observed, in call order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MuxEvent {
    /// A stream-copy packet reached the muxer.
    Packet {
        output: OutputStreamKey,
        dts: Option<i64>,
    },
    /// End of stream was propagated through the copy path.
    Eof { output: OutputStreamKey },
    /// The terminal packet for a finished stream.
    Terminal { output: OutputStreamKey },
    /// A subtitle was (re-)submitted through the subtitle path.
    Subtitle { pts: Option<i64> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommandRecord {
    pub graph: usize,
    pub target: String,
    pub command: String,
    pub arg: String,
    /// Negative for immediate commands.
    pub when: f64,
    pub queued: bool,
}

#[derive(Debug, Default)]
struct State {
    queues: Vec<VecDeque<ScriptedPoll>>,
    events: Vec<MuxEvent>,
    trailers: Vec<usize>,
    bytes: Vec<i64>,
    heartbeats: Vec<(FilterSink, Option<i64>)>,
    commands: Vec<CommandRecord>,
    graph_feed: Vec<Option<InputStreamKey>>,
    flushed_encoders: bool,
    sync_eofs: Vec<usize>,
    /// Streams whose decoder has been flushed once and holds no more
    /// frames; the first flush drains, the second reports EOF.
    drained_streams: HashSet<InputStreamKey>,
    /// Filter inputs that have seen decoder EOF.
    eof_sinks: HashSet<FilterSink>,
}

/// Factory and observation handle; the port objects it hands out all share
/// one state.
#[derive(Clone, Debug, Default)]
pub struct LoopbackBackend {
    state: Arc<Mutex<State>>,
}

impl LoopbackBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append a scripted packet to an input file's timeline.
    pub fn push_packet(&self, file_index: usize, pkt: Packet) {
        self.push(file_index, ScriptedPoll::Packet(pkt));
    }

    pub fn push(&self, file_index: usize, poll: ScriptedPoll) {
        let mut state = self.lock();
        if state.queues.len() <= file_index {
            state.queues.resize_with(file_index + 1, VecDeque::new);
        }
        state.queues[file_index].push_back(poll);
    }

    /// Answer for `request_input` on one graph.
    pub fn set_graph_feed(&self, graph: usize, feed: Option<InputStreamKey>) {
        let mut state = self.lock();
        if state.graph_feed.len() <= graph {
            state.graph_feed.resize(graph + 1, None);
        }
        state.graph_feed[graph] = feed;
    }

    pub fn events(&self) -> Vec<MuxEvent> {
        self.lock().events.clone()
    }

    pub fn trailers(&self) -> Vec<usize> {
        self.lock().trailers.clone()
    }

    pub fn heartbeats(&self) -> Vec<(FilterSink, Option<i64>)> {
        self.lock().heartbeats.clone()
    }

    pub fn commands(&self) -> Vec<CommandRecord> {
        self.lock().commands.clone()
    }

    pub fn encoders_flushed(&self) -> bool {
        self.lock().flushed_encoders
    }

    pub fn sync_eofs(&self) -> Vec<usize> {
        self.lock().sync_eofs.clone()
    }

    pub fn demuxer(&self) -> LoopbackDemuxer {
        LoopbackDemuxer {
            backend: self.clone(),
        }
    }

    pub fn decoder(&self) -> LoopbackDecoder {
        LoopbackDecoder {
            backend: self.clone(),
        }
    }

    pub fn filters(&self) -> LoopbackFilters {
        LoopbackFilters {
            backend: self.clone(),
        }
    }

    pub fn output(&self) -> LoopbackSink {
        LoopbackSink {
            backend: self.clone(),
        }
    }

    pub fn sync_queue(&self) -> LoopbackSyncQueue {
        LoopbackSyncQueue {
            backend: self.clone(),
        }
    }
}

pub struct LoopbackDemuxer {
    backend: LoopbackBackend,
}

impl Demuxer for LoopbackDemuxer {
    fn poll(&mut self, file_index: usize) -> TransmuxResult<DemuxPoll> {
        let mut state = self.backend.lock();
        let Some(queue) = state.queues.get_mut(file_index) else {
            return Ok(DemuxPoll::Eof);
        };
        match queue.pop_front() {
            Some(ScriptedPoll::Packet(pkt)) => Ok(DemuxPoll::Packet(pkt)),
            Some(ScriptedPoll::Again) => Ok(DemuxPoll::Again),
            Some(ScriptedPoll::Restart) => Ok(DemuxPoll::Restart),
            Some(ScriptedPoll::Error(message)) => Err(TransmuxError::Demux { message }),
            None => Ok(DemuxPoll::Eof),
        }
    }
}

pub struct LoopbackDecoder {
    backend: LoopbackBackend,
}

impl Decoder for LoopbackDecoder {
    fn decode(
        &mut self,
        ist: &mut InputStream,
        pkt: Option<&Packet>,
        _no_eof: bool,
    ) -> TransmuxResult<DecodeStatus> {
        match pkt {
            Some(_) => {
                ist.frames_decoded += 1;
                Ok(DecodeStatus::Ok)
            }
            None => {
                // Like a real decoder, the first flush hands out whatever
                // was buffered and signals EOF to the filter inputs; only
                // the next flush reports EOF upward.
                let mut state = self.backend.lock();
                if state.drained_streams.insert(ist.key()) {
                    for sink in &ist.filters {
                        state.eof_sinks.insert(*sink);
                    }
                    Ok(DecodeStatus::Ok)
                } else {
                    Ok(DecodeStatus::Eof)
                }
            }
        }
    }

    fn flush_buffers(&mut self, ist: &mut InputStream) {
        self.backend.lock().drained_streams.remove(&ist.key());
    }

    fn process_subtitle(&mut self, ist: &mut InputStream, sub: Subtitle) -> TransmuxResult<()> {
        self.backend
            .lock()
            .events
            .push(MuxEvent::Subtitle { pts: sub.pts });
        ist.prev_sub = Some(sub);
        Ok(())
    }
}

pub struct LoopbackFilters {
    backend: LoopbackBackend,
}

impl FilterBackend for LoopbackFilters {
    fn request_input(&mut self, graph: usize) -> TransmuxResult<Option<InputStreamKey>> {
        Ok(self
            .backend
            .lock()
            .graph_feed
            .get(graph)
            .copied()
            .flatten())
    }

    fn reap(&mut self, graph_state: &mut PipelineGraph, _flush: bool) -> TransmuxResult<()> {
        // No frames flow through the loopback graphs; a graph counts as
        // drained once every filter input feeding it has seen decoder
        // EOF, at which point its outputs are closed so the supervisor
        // can finish.
        let state = self.backend.lock();
        let mut drained: Vec<bool> = graph_state.filtergraphs.iter().map(|_| true).collect();
        for file in &graph_state.inputs {
            for ist in &file.streams {
                for sink in &ist.filters {
                    if sink.graph < drained.len() && !state.eof_sinks.contains(sink) {
                        drained[sink.graph] = false;
                    }
                }
            }
        }
        drop(state);
        for file in &mut graph_state.outputs {
            for ost in &mut file.streams {
                if let Some(filter) = &ost.filter {
                    if drained.get(filter.graph).copied().unwrap_or(false) {
                        ost.initialized = true;
                        ost.finished |= crate::model::ENCODER_FINISHED;
                    }
                }
            }
        }
        Ok(())
    }

    fn sub2video_heartbeat(&mut self, sink: FilterSink, pts: Option<i64>, _time_base: Rational) {
        self.backend.lock().heartbeats.push((sink, pts));
    }

    fn send_command(
        &mut self,
        graph: usize,
        target: &str,
        command: &str,
        arg: &str,
        _one_shot: bool,
    ) -> TransmuxResult<String> {
        self.backend.lock().commands.push(CommandRecord {
            graph,
            target: target.to_string(),
            command: command.to_string(),
            arg: arg.to_string(),
            when: -1.0,
            queued: false,
        });
        Ok(String::new())
    }

    fn queue_command(
        &mut self,
        graph: usize,
        target: &str,
        command: &str,
        arg: &str,
        when: f64,
    ) -> TransmuxResult<()> {
        self.backend.lock().commands.push(CommandRecord {
            graph,
            target: target.to_string(),
            command: command.to_string(),
            arg: arg.to_string(),
            when,
            queued: true,
        });
        Ok(())
    }
}

pub struct LoopbackSink {
    backend: LoopbackBackend,
}

impl OutputBackend for LoopbackSink {
    fn streamcopy(
        &mut self,
        ost: &mut OutputStream,
        pkt: Option<&Packet>,
        dts_est: Option<i64>,
    ) -> TransmuxResult<()> {
        let key = ost.key();
        let mut state = self.backend.lock();
        match pkt {
            Some(p) => {
                let dts =
                    dts_est.or_else(|| p.dts.map(|d| to_micros(d, p.time_base)));
                ost.initialized = true;
                ost.packets_written.fetch_add(1, Ordering::Relaxed);
                if let Some(dts) = dts {
                    ost.note_mux_dts(dts);
                }
                if state.bytes.len() <= key.file {
                    state.bytes.resize(key.file + 1, 0);
                }
                state.bytes[key.file] += p.data.len() as i64;
                state.events.push(MuxEvent::Packet { output: key, dts });
            }
            None => {
                state.events.push(MuxEvent::Eof { output: key });
            }
        }
        Ok(())
    }

    fn finish_stream(&mut self, ost: &mut OutputStream) -> TransmuxResult<()> {
        ost.finished |= MUXER_FINISHED;
        self.backend
            .lock()
            .events
            .push(MuxEvent::Terminal { output: ost.key() });
        Ok(())
    }

    fn flush_encoders(&mut self, _graph_state: &mut PipelineGraph) -> TransmuxResult<()> {
        self.backend.lock().flushed_encoders = true;
        Ok(())
    }

    fn write_trailer(&mut self, file_index: usize) -> TransmuxResult<()> {
        self.backend.lock().trailers.push(file_index);
        Ok(())
    }

    fn filesize(&self, file_index: usize) -> Option<i64> {
        self.backend.lock().bytes.get(file_index).copied()
    }
}

pub struct LoopbackSyncQueue {
    backend: LoopbackBackend,
}

impl SyncQueue for LoopbackSyncQueue {
    fn send_eof(&mut self, idx: usize) {
        self.backend.lock().sync_eofs.push(idx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripted_timeline_drains_to_eof() {
        let backend = LoopbackBackend::new();
        backend.push_packet(0, Packet::empty(0));
        backend.push(0, ScriptedPoll::Again);

        let mut demuxer = backend.demuxer();
        assert!(matches!(demuxer.poll(0), Ok(DemuxPoll::Packet(_))));
        assert!(matches!(demuxer.poll(0), Ok(DemuxPoll::Again)));
        assert!(matches!(demuxer.poll(0), Ok(DemuxPoll::Eof)));
        // a file that was never scripted is immediately at EOF
        assert!(matches!(demuxer.poll(7), Ok(DemuxPoll::Eof)));
    }

    #[test]
    fn sink_records_packets_and_sizes() {
        let backend = LoopbackBackend::new();
        let mut sink = backend.output();
        let mut ost = crate::model::test_support::output_stream(0, 0);

        let mut pkt = Packet::empty(0);
        pkt.data = vec![0u8; 100];
        pkt.dts_est = Some(33_000);
        sink.streamcopy(&mut ost, Some(&pkt), pkt.dts_est).unwrap();

        assert!(ost.initialized);
        assert_eq!(ost.last_mux_dts, Some(33_000));
        assert_eq!(sink.filesize(0), Some(100));
        assert_eq!(
            backend.events(),
            vec![MuxEvent::Packet {
                output: OutputStreamKey { file: 0, stream: 0 },
                dts: Some(33_000),
            }]
        );
    }
}
