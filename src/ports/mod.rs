//! Ports - interface contracts for the external pipeline stages
//!
//! The scheduler drives demuxers, decoders, filter graphs and muxers but
//! implements none of them; each is reached through one of these traits.
//! Calls are synchronous and may block briefly on I/O or bounded queues.

use crate::error::TransmuxResult;
use crate::model::{FilterSink, InputStream, InputStreamKey, OutputStream, Packet, PipelineGraph};
use crate::streams::subtitle::Subtitle;
use crate::utils::time::Rational;

/// Outcome of asking a demuxer for its next packet.
#[derive(Debug)]
pub enum DemuxPoll {
    /// One packet, in demux order for its stream.
    Packet(Packet),
    /// Nothing available right now; ask again later.
    Again,
    /// The input looped back to its start; decoders must be flushed.
    Restart,
    /// No more packets will ever come.
    Eof,
}

/// Port for packet sources (one demuxer per input file).
pub trait Demuxer: Send {
    /// Pull the next packet for the given input file.
    fn poll(&mut self, file_index: usize) -> TransmuxResult<DemuxPoll>;
}

/// Whether a decoder can accept more input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStatus {
    Ok,
    Eof,
}

/// Port for decoders.
pub trait Decoder: Send {
    /// Feed one packet into the stream's decoder; `None` flushes it.
    /// Decoded frames flow into the stream's filter sinks on the far side
    /// of this call. Counters on the stream are kept up to date.
    fn decode(
        &mut self,
        ist: &mut InputStream,
        pkt: Option<&Packet>,
        no_eof: bool,
    ) -> TransmuxResult<DecodeStatus>;

    /// Drop buffered codec state after an input loop restart.
    fn flush_buffers(&mut self, ist: &mut InputStream);

    /// Re-submit a subtitle through the subtitle processing path, as if it
    /// had just been decoded.
    fn process_subtitle(&mut self, ist: &mut InputStream, sub: Subtitle) -> TransmuxResult<()>;
}

/// Port for the filter-graph runtime.
pub trait FilterBackend: Send {
    /// Which input stream the graph needs next to make progress. `None`
    /// means the graph is working off what it already buffered.
    fn request_input(&mut self, graph: usize) -> TransmuxResult<Option<InputStreamKey>>;

    /// Harvest every frame the graphs have ready and hand them to
    /// encoders, updating each output's filter `last_pts`. With `flush`
    /// the graphs are drained to end of stream.
    fn reap(&mut self, graph_state: &mut PipelineGraph, flush: bool) -> TransmuxResult<()>;

    /// Refresh a sparse subtitle input so the graph never stalls waiting
    /// for the next event.
    fn sub2video_heartbeat(&mut self, sink: FilterSink, pts: Option<i64>, time_base: Rational);

    /// Send a command to matching filters right now. Returns the filter's
    /// reply text.
    fn send_command(
        &mut self,
        graph: usize,
        target: &str,
        command: &str,
        arg: &str,
        one_shot: bool,
    ) -> TransmuxResult<String>;

    /// Queue a command on matching filters for a future graph time.
    fn queue_command(
        &mut self,
        graph: usize,
        target: &str,
        command: &str,
        arg: &str,
        when: f64,
    ) -> TransmuxResult<()>;
}

/// Port for the encoder/muxer side.
pub trait OutputBackend: Send {
    /// Pass one packet straight through to the muxer (`None` propagates
    /// end of stream). `dts_est` is the demux-side estimate in
    /// microseconds.
    fn streamcopy(
        &mut self,
        ost: &mut OutputStream,
        pkt: Option<&Packet>,
        dts_est: Option<i64>,
    ) -> TransmuxResult<()>;

    /// Emit the terminal packet for a stream whose input is gone.
    fn finish_stream(&mut self, ost: &mut OutputStream) -> TransmuxResult<()>;

    /// Flush every open encoder at end of stream.
    fn flush_encoders(&mut self, graph_state: &mut PipelineGraph) -> TransmuxResult<()>;

    /// Finalize one output container.
    fn write_trailer(&mut self, file_index: usize) -> TransmuxResult<()>;

    /// Bytes written so far to one output container, if known.
    fn filesize(&self, file_index: usize) -> Option<i64>;
}

/// Port for the cross-stream sync queue coordinating aligned closure.
pub trait SyncQueue: Send {
    /// Signal end of stream for one encoder slot.
    fn send_eof(&mut self, idx: usize);
}
