//! Output stream selection
//!
//! Virtual-clock scheduling: each step picks the live output stream
//! furthest behind in presentation time, so the laziest output drives the
//! next pull of upstream work. This is not round-robin; the minimum-clock
//! rule is what keeps outputs advancing in lockstep.

use tracing::debug;

use crate::model::OutputStreamKey;

use super::Scheduler;

/// Result of one selection scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Choice {
    /// Advance this output stream next.
    Ready(OutputStreamKey),
    /// The winner is waiting on input that is not there yet; back off.
    Busy,
    /// No output stream needs data anymore.
    Done,
}

impl Scheduler {
    /// Select the output stream to process.
    ///
    /// An output that has not finished initializing (and whose inputs are
    /// still live) wins immediately regardless of its clock, so pipelines
    /// come up before steady-state scheduling takes over. Ties on the
    /// clock go to the first stream in traversal order.
    pub(crate) fn choose_output(&mut self) -> Choice {
        let mut min: Option<(i64, OutputStreamKey)> = None;
        let mut immediate: Option<OutputStreamKey> = None;

        let mut cursor = self.graph.next_output(None);
        while let Some(key) = cursor {
            let ost = self.graph.ost_mut(key);

            let clock = match (&ost.filter, ost.last_mux_dts) {
                (Some(filter), _) if filter.last_pts.is_some() => filter.last_pts.unwrap_or(0),
                (_, Some(dts)) => dts,
                _ => {
                    if !ost.dts_logged {
                        debug!(
                            "output {}:{} has no mux DTS yet [init:{} inputs_done:{} finished:{}] \
                             (harmless once at startup per stream)",
                            key.file, key.stream, ost.initialized, ost.inputs_done, ost.finished
                        );
                        ost.dts_logged = true;
                    }
                    i64::MIN
                }
            };

            if !ost.initialized && !ost.inputs_done && !ost.is_finished() {
                immediate = Some(key);
                break;
            }
            if !ost.is_finished() && min.map_or(true, |(m, _)| clock < m) {
                min = Some((clock, key));
            }

            cursor = self.graph.next_output(Some(key));
        }

        let winner = immediate.or(min.map(|(_, key)| key));
        match winner {
            None => Choice::Done,
            Some(key) if self.graph.ost(key).unavailable => Choice::Busy,
            Some(key) => Choice::Ready(key),
        }
    }
}
