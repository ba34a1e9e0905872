//! Demuxed packet type

use crate::utils::time::Rational;

/// One coded packet as handed out by a demuxer.
///
/// Timestamps are in the packet's own `time_base`; `dts_est` is the
/// demux-side estimate already rescaled to microseconds, used for the
/// recording-time cap and stream copy.
#[derive(Debug, Clone)]
pub struct Packet {
    pub stream_index: usize,
    pub pts: Option<i64>,
    pub dts: Option<i64>,
    pub time_base: Rational,
    pub duration: i64,
    pub data: Vec<u8>,
    /// Random access point.
    pub key: bool,
    /// Demux-side DTS estimate in microseconds.
    pub dts_est: Option<i64>,
}

impl Packet {
    /// An empty packet on a stream, microsecond time base, no timestamps.
    pub fn empty(stream_index: usize) -> Self {
        Self {
            stream_index,
            pts: None,
            dts: None,
            time_base: Rational::MICROSECONDS,
            duration: 0,
            data: Vec::new(),
            key: false,
            dts_est: None,
        }
    }
}
