//! Summary counters from a completed simulation.

use serde::{Deserialize, Serialize};

use crate::activity::{ActivityId, ActivityKind, ActivityState};
use crate::engine::Kernel;

/// Aggregate outcome of a run.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RunStats {
    /// Virtual time of the last simulation event.
    pub makespan: f64,
    /// Completed executions and the flops they burned.
    pub execs_completed: usize,
    pub total_flops: f64,
    /// Completed communications and the bytes they moved.
    pub comms_completed: usize,
    pub total_bytes: f64,
    /// Completed I/O operations and the bytes they moved.
    pub ios_completed: usize,
    pub total_io_bytes: f64,
    /// Activities that ended in a failure state (including timeouts and cancels).
    pub activities_failed: usize,
    /// Actors whose code ran to completion.
    pub actors_finished: usize,
}

impl Kernel {
    pub(crate) fn record_completion(&mut self, id: ActivityId) {
        let activity = self.activities.get(id);
        if activity.state != ActivityState::Done {
            self.stats.activities_failed += 1;
            return;
        }
        match &activity.kind {
            ActivityKind::Exec(exec) => {
                self.stats.execs_completed += 1;
                self.stats.total_flops += exec.flops.iter().sum::<f64>();
            }
            ActivityKind::Comm(comm) => {
                self.stats.comms_completed += 1;
                self.stats.total_bytes += comm.size;
            }
            ActivityKind::Io(io) => {
                self.stats.ios_completed += 1;
                self.stats.total_io_bytes += io.size;
            }
            ActivityKind::Raw(_) | ActivityKind::Sleep(_) => {}
        }
    }
}
