//! Periodic transcode report
//!
//! One human-readable status line (stderr or log, rewritten in place with
//! `\r` until the final report) and one machine-readable key=value block
//! per emission. Emission is rate-limited to the configured period, and
//! the very first report waits until every output has been brought up so
//! early lines do not show half-configured pipelines.

use std::sync::atomic::Ordering;

use tracing::info;

use crate::engine::PrintStats;
use crate::model::{MediaKind, PipelineGraph, QP2LAMBDA};
use crate::output::progress::ProgressWriter;
use crate::utils::time::{format_clock_centi, format_clock_micro, TIME_BASE};

pub struct Reporter {
    print_stats: PrintStats,
    /// Minimum microseconds between two reports.
    stats_period: i64,
    copy_ts: bool,
    progress: Option<ProgressWriter>,
    last_time: Option<i64>,
    first_report: bool,
    /// First observed presentation time; under copy-ts, displayed time is
    /// re-based to it so the clock starts at zero.
    copy_ts_first_pts: Option<i64>,
}

impl Reporter {
    pub fn new(
        print_stats: PrintStats,
        stats_period: i64,
        copy_ts: bool,
        progress: Option<ProgressWriter>,
    ) -> Self {
        Self {
            print_stats,
            stats_period,
            copy_ts,
            progress,
            last_time: None,
            first_report: true,
            copy_ts_first_pts: None,
        }
    }

    /// Emit one report if due.
    ///
    /// `frames_drop` is owned by the scheduler; the final report folds each
    /// stream's trailing dropped-frame count into it.
    #[allow(clippy::too_many_arguments)]
    pub fn print_report(
        &mut self,
        is_last: bool,
        timer_start_us: i64,
        cur_time_us: i64,
        graph: &PipelineGraph,
        total_size: Option<i64>,
        frames_dup: u64,
        frames_drop: &mut u64,
        outputs_dumped: bool,
    ) {
        if self.print_stats == PrintStats::Quiet && !is_last && self.progress.is_none() {
            return;
        }

        if !is_last {
            let last = *self.last_time.get_or_insert(cur_time_us);
            let too_soon = cur_time_us - last < self.stats_period && !self.first_report;
            if too_soon || (self.first_report && !outputs_dumped) {
                return;
            }
            self.last_time = Some(cur_time_us);
        }

        let t = (cur_time_us - timer_start_us) as f64 / 1e6;

        let mut buf = String::new();
        let mut script = String::new();
        let mut pts: Option<i64> = None;
        let mut vid = false;

        for key in graph.output_streams() {
            let ost = graph.ost(key);
            let q = if ost.encoding {
                ost.quality / QP2LAMBDA
            } else {
                -1.0
            };

            if vid && ost.kind == MediaKind::Video {
                buf.push_str(&format!("q={:2.1} ", q));
                script.push_str(&format!(
                    "stream_{}_{}_q={:.1}\n",
                    ost.file_index, ost.index, q
                ));
            }
            if !vid && ost.kind == MediaKind::Video {
                let frame_number = ost.packets_written.load(Ordering::Relaxed);
                let fps = if t > 1.0 { frame_number as f64 / t } else { 0.0 };
                let prec: usize = if fps < 9.95 { 1 } else { 0 };
                buf.push_str(&format!(
                    "frame={:5} fps={:3.*} q={:3.1} ",
                    frame_number, prec, fps, q
                ));
                script.push_str(&format!("frame={}\n", frame_number));
                script.push_str(&format!("fps={:.2}\n", fps));
                script.push_str(&format!(
                    "stream_{}_{}_q={:.1}\n",
                    ost.file_index, ost.index, q
                ));
                if is_last {
                    buf.push('L');
                }
                vid = true;
            }

            if let Some(dts) = ost.last_mux_dts {
                pts = Some(pts.map_or(dts, |p: i64| p.max(dts)));
            }

            if is_last {
                *frames_drop += ost.last_dropped;
            }
        }

        if self.copy_ts {
            if let Some(p) = pts {
                let base = *self.copy_ts_first_pts.get_or_insert(p);
                pts = Some(p - base);
            }
        }

        let bitrate = match (pts, total_size) {
            (Some(p), Some(size)) if p != 0 && size >= 0 => {
                Some(size as f64 * 8.0 / (p as f64 / 1000.0))
            }
            _ => None,
        };
        let speed = match pts {
            Some(p) if t != 0.0 => Some(p as f64 / TIME_BASE as f64 / t),
            _ => None,
        };

        match total_size {
            Some(size) if size >= 0 => {
                buf.push_str(&format!("size={:8.0}kB time=", size as f64 / 1024.0))
            }
            _ => buf.push_str("size=N/A time="),
        }
        match pts {
            Some(p) => buf.push_str(&format!("{} ", format_clock_centi(p))),
            None => buf.push_str("N/A "),
        }

        match bitrate {
            Some(rate) => {
                buf.push_str(&format!("bitrate={:6.1}kbits/s", rate));
                script.push_str(&format!("bitrate={:6.1}kbits/s\n", rate));
            }
            None => {
                buf.push_str("bitrate=N/A");
                script.push_str("bitrate=N/A\n");
            }
        }

        match total_size {
            Some(size) if size >= 0 => script.push_str(&format!("total_size={}\n", size)),
            _ => script.push_str("total_size=N/A\n"),
        }
        match pts {
            Some(p) => {
                script.push_str(&format!("out_time_us={}\n", p));
                script.push_str(&format!("out_time_ms={}\n", p));
                script.push_str(&format!("out_time={}\n", format_clock_micro(p)));
            }
            None => {
                script.push_str("out_time_us=N/A\n");
                script.push_str("out_time_ms=N/A\n");
                script.push_str("out_time=N/A\n");
            }
        }

        if frames_dup != 0 || *frames_drop != 0 {
            buf.push_str(&format!(" dup={} drop={}", frames_dup, frames_drop));
        }
        script.push_str(&format!("dup_frames={}\n", frames_dup));
        script.push_str(&format!("drop_frames={}\n", frames_drop));

        match speed {
            Some(s) => {
                let s = format_sig3(s);
                buf.push_str(&format!(" speed={:>4}x", s));
                script.push_str(&format!("speed={:>4}x\n", s));
            }
            None => {
                buf.push_str(" speed=N/A");
                script.push_str("speed=N/A\n");
            }
        }

        if self.print_stats != PrintStats::Quiet || is_last {
            match self.print_stats {
                PrintStats::Log => info!("{}", buf),
                _ => {
                    let end = if is_last { '\n' } else { '\r' };
                    eprint!("{}    {}", buf, end);
                    use std::io::Write;
                    let _ = std::io::stderr().flush();
                }
            }
        }

        if let Some(progress) = self.progress.as_mut() {
            script.push_str(if is_last {
                "progress=end\n"
            } else {
                "progress=continue\n"
            });
            progress.write_block(&script);
            if is_last {
                if let Some(progress) = self.progress.take() {
                    progress.close();
                }
            }
        }

        self.first_report = false;
    }
}

/// Three significant digits, trailing zeros trimmed.
fn format_sig3(v: f64) -> String {
    if v == 0.0 {
        return "0".to_string();
    }
    let exp = v.abs().log10().floor() as i32;
    let decimals = (2 - exp).max(0) as usize;
    let s = format!("{:.*}", decimals, v);
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        s
    }
}
