//! Activity lifecycle: the kernel-side state machines behind every in-flight operation.

use std::any::Any;
use std::fmt;

use crate::actor::ActorId;
use crate::engine::Kernel;
use crate::error::ActivityError;
use crate::log_debug;
use crate::platform::{DiskId, HostId, OpType};
use crate::resource::ActionOutcome;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ActivityId(pub usize);

impl fmt::Display for ActivityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "activity#{}", self.0)
    }
}

/// The user-visible state machine. Exactly one terminal state is ever reached and it is
/// never left.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ActivityState {
    Waiting,
    Ready,
    Running,
    Done,
    Failed,
    Canceled,
    SrcTimeout,
    DstTimeout,
    LinkFailure,
}

impl ActivityState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ActivityState::Waiting | ActivityState::Ready | ActivityState::Running)
    }
}

pub(crate) struct ExecData {
    pub hosts: Vec<HostId>,
    pub flops: Vec<f64>,
    pub bytes: Vec<f64>,
    pub bound: f64,
    pub priority: f64,
}

pub(crate) struct CommData {
    pub mailbox: Option<String>,
    pub src_actor: Option<ActorId>,
    pub dst_actor: Option<ActorId>,
    pub src_host: Option<HostId>,
    pub dst_host: Option<HostId>,
    pub size: f64,
    pub rate: f64,
    pub payload: Option<Box<dyn Any>>,
    pub detached: bool,
}

pub(crate) struct IoData {
    pub disk: DiskId,
    pub size: f64,
    pub op: OpType,
}

/// Timed-wait primitive: a plain clock on the owner's host. Finishing means the timeout
/// fired; if it guards another activity, that activity is timed out and canceled.
pub(crate) struct RawData {
    pub host: HostId,
    pub timeout: f64,
    pub owner: ActorId,
    pub guards: Option<ActivityId>,
}

pub(crate) struct SleepData {
    pub host: HostId,
    pub duration: f64,
}

pub(crate) enum ActivityKind {
    Exec(ExecData),
    Comm(CommData),
    Io(IoData),
    Raw(RawData),
    Sleep(SleepData),
}

impl ActivityKind {
    pub fn tag(&self) -> &'static str {
        match self {
            ActivityKind::Exec(_) => "exec",
            ActivityKind::Comm(_) => "comm",
            ActivityKind::Io(_) => "io",
            ActivityKind::Raw(_) => "raw",
            ActivityKind::Sleep(_) => "sleep",
        }
    }
}

pub(crate) struct Activity {
    pub state: ActivityState,
    pub kind: ActivityKind,
    pub action: Option<crate::resource::ActionId>,
    /// Raw activity racing against this one; the loser is canceled.
    pub detector: Option<ActivityId>,
    pub waiters: Vec<ActorId>,
    /// Error delivered to waiters when the state is terminal and not Done.
    pub failure: Option<ActivityError>,
}

/// Activity arena. Entries are kept for the lifetime of the run; what gets reclaimed
/// eagerly is the solver-side action, the moment the activity turns terminal.
#[derive(Default)]
pub(crate) struct Activities {
    pub entries: Vec<Activity>,
}

impl Activities {
    pub fn insert(&mut self, kind: ActivityKind) -> ActivityId {
        self.entries.push(Activity {
            state: ActivityState::Waiting,
            kind,
            action: None,
            detector: None,
            waiters: Vec::new(),
            failure: None,
        });
        ActivityId(self.entries.len() - 1)
    }

    pub fn get(&self, id: ActivityId) -> &Activity {
        &self.entries[id.0]
    }

    pub fn get_mut(&mut self, id: ActivityId) -> &mut Activity {
        &mut self.entries[id.0]
    }
}

/// Payload of the per-activity signal buses.
#[derive(Clone, Copy, Debug)]
pub struct ActivityEvent {
    pub id: ActivityId,
    pub state: ActivityState,
    pub time: f64,
}

impl Kernel {
    pub(crate) fn activity_state(&self, id: ActivityId) -> ActivityState {
        self.activities.get(id).state
    }

    /// `Some(result)` once the activity is terminal.
    pub(crate) fn activity_outcome(&self, id: ActivityId) -> Option<Result<(), ActivityError>> {
        let activity = self.activities.get(id);
        if !activity.state.is_terminal() {
            return None;
        }
        Some(match activity.state {
            ActivityState::Done => Ok(()),
            _ => Err(activity.failure.unwrap_or(ActivityError::Canceled)),
        })
    }

    /// Moves a Waiting activity into the resource layer. Failures to even start (dead
    /// host, dead link) settle the activity immediately.
    pub(crate) fn start_activity(&mut self, id: ActivityId) {
        if !matches!(
            self.activities.get(id).state,
            ActivityState::Waiting | ActivityState::Ready
        ) {
            return;
        }
        let now = self.clock;
        enum StartPlan {
            Exec(Vec<HostId>, Vec<f64>, Vec<f64>, f64, f64),
            Io(DiskId, f64, OpType),
            Clock(HostId, f64),
            Comm,
            NotYet,
        }
        let plan = match &self.activities.get(id).kind {
            ActivityKind::Exec(exec) => StartPlan::Exec(
                exec.hosts.clone(),
                exec.flops.clone(),
                exec.bytes.clone(),
                exec.bound,
                exec.priority,
            ),
            ActivityKind::Io(io) => StartPlan::Io(io.disk, io.size, io.op),
            ActivityKind::Sleep(sleep) => StartPlan::Clock(sleep.host, sleep.duration),
            ActivityKind::Raw(raw) => StartPlan::Clock(raw.host, raw.timeout),
            // A mailbox comm stays put until the rendezvous logic binds both sides.
            ActivityKind::Comm(comm) => {
                if comm.src_host.is_some() && comm.dst_host.is_some() {
                    StartPlan::Comm
                } else {
                    StartPlan::NotYet
                }
            }
        };
        let started = match plan {
            StartPlan::Exec(hosts, flops, bytes, bound, priority) => {
                self.cpu
                    .exec_start(&mut self.res, id, &hosts, &flops, &bytes, bound, priority, now)
            }
            StartPlan::Io(disk, size, op) => self.disk.io_start(&mut self.res, id, disk, size, op, now),
            StartPlan::Clock(host, duration) => self.cpu.sleep_start(&mut self.res, id, host, duration, now),
            StartPlan::Comm => self.start_comm_action(id),
            StartPlan::NotYet => return,
        };
        match started {
            Ok(action) => {
                let activity = self.activities.get_mut(id);
                activity.action = Some(action);
                activity.state = ActivityState::Running;
                let event = ActivityEvent {
                    id,
                    state: ActivityState::Running,
                    time: self.clock,
                };
                self.signals.activity_start.emit(&event);
            }
            Err(error) => self.fail_activity(id, error),
        }
    }

    /// Settles an activity as Done and releases everything that waited for it.
    pub(crate) fn finish_activity(&mut self, id: ActivityId) {
        self.settle_activity(id, ActivityState::Done, None);
    }

    /// Settles an activity in the terminal state matching `error`.
    pub(crate) fn fail_activity(&mut self, id: ActivityId, error: ActivityError) {
        let state = match error {
            ActivityError::NetworkFailure => ActivityState::LinkFailure,
            ActivityError::Canceled => ActivityState::Canceled,
            ActivityError::Timeout => ActivityState::SrcTimeout,
            _ => ActivityState::Failed,
        };
        self.settle_activity(id, state, Some(error));
    }

    fn settle_activity(&mut self, id: ActivityId, state: ActivityState, failure: Option<ActivityError>) {
        let activity = self.activities.get_mut(id);
        if activity.state.is_terminal() {
            return;
        }
        activity.state = state;
        activity.failure = failure;
        log_debug!(self, "{} {} settled as {:?}", self.activities.get(id).kind.tag(), id, state);
        if let Some(action) = self.activities.get_mut(id).action.take() {
            // The action may already be gone when settlement was triggered by it.
            let outcome = match failure {
                None => ActionOutcome::Finished,
                Some(error) => ActionOutcome::Failed(error),
            };
            self.res.settle_action(action, outcome);
            self.res.actions.remove(action);
        }
        self.disarm_detector(id);
        self.record_completion(id);
        let event = ActivityEvent {
            id,
            state,
            time: self.clock,
        };
        self.signals.activity_completion.emit(&event);
        self.wake_waiters(id);
        self.on_comm_settled(id);
    }

    pub(crate) fn wake_waiters(&mut self, id: ActivityId) {
        let waiters = std::mem::take(&mut self.activities.get_mut(id).waiters);
        for actor in waiters {
            self.wake_actor(actor);
        }
    }

    pub(crate) fn register_waiter(&mut self, id: ActivityId, actor: ActorId) {
        let activity = self.activities.get_mut(id);
        if !activity.waiters.contains(&actor) {
            activity.waiters.push(actor);
        }
    }

    /// Cancels an activity: idempotent, non-blocking, withdraws the action and resumes
    /// waiting actors with a cancellation error.
    pub(crate) fn cancel_activity(&mut self, id: ActivityId) {
        if self.activities.get(id).state.is_terminal() {
            return;
        }
        self.withdraw_from_mailbox(id);
        self.fail_activity(id, ActivityError::Canceled);
    }

    pub(crate) fn suspend_activity(&mut self, id: ActivityId) {
        if let Some(action) = self.activities.get(id).action {
            self.res.set_action_suspended(action, true);
        }
    }

    pub(crate) fn resume_activity(&mut self, id: ActivityId) {
        if let Some(action) = self.activities.get(id).action {
            self.res.set_action_suspended(action, false);
        }
    }

    /// remaining / cost of the primary action; 0 once terminal, 1 before start.
    pub(crate) fn activity_remaining_ratio(&self, id: ActivityId) -> f64 {
        let activity = self.activities.get(id);
        match activity.action {
            Some(action) => {
                let action = self.res.actions.get(action);
                if action.cost > 0.0 {
                    action.remaining / action.cost
                } else {
                    0.0
                }
            }
            None => {
                if activity.state.is_terminal() {
                    0.0
                } else {
                    1.0
                }
            }
        }
    }

    /// Arms a Raw timeout detector racing against `guarded`, owned by `owner`.
    pub(crate) fn arm_timeout_detector(&mut self, guarded: ActivityId, owner: ActorId, timeout: f64) {
        if self.activities.get(guarded).detector.is_some() {
            return;
        }
        let host = self.actors.get(owner).host;
        let raw = self.activities.insert(ActivityKind::Raw(RawData {
            host,
            timeout,
            owner,
            guards: Some(guarded),
        }));
        self.activities.get_mut(guarded).detector = Some(raw);
        self.start_activity(raw);
    }

    /// Arms a stand-alone timer (used by `wait_any_for` and the timed sync waits).
    pub(crate) fn arm_timer(&mut self, owner: ActorId, timeout: f64) -> ActivityId {
        let host = self.actors.get(owner).host;
        let raw = self.activities.insert(ActivityKind::Raw(RawData {
            host,
            timeout,
            owner,
            guards: None,
        }));
        self.start_activity(raw);
        raw
    }

    /// Quietly drops the timeout detector of an activity that settled first.
    pub(crate) fn disarm_detector(&mut self, id: ActivityId) {
        if let Some(raw) = self.activities.get_mut(id).detector.take() {
            let detector = self.activities.get_mut(raw);
            if !detector.state.is_terminal() {
                detector.state = ActivityState::Canceled;
                detector.failure = Some(ActivityError::Canceled);
                if let Some(action) = detector.action.take() {
                    self.res.settle_action(action, ActionOutcome::Failed(ActivityError::Canceled));
                    self.res.actions.remove(action);
                }
            }
        }
    }

    /// Routes a completed action back to its activity.
    pub(crate) fn on_action_complete(&mut self, activity_id: ActivityId, outcome: ActionOutcome) {
        // The action was settled by the model; forget it before settling the activity.
        if let Some(action) = self.activities.get_mut(activity_id).action.take() {
            self.res.actions.remove(action);
        }
        let timed_out_guard = match &self.activities.get(activity_id).kind {
            ActivityKind::Raw(raw) => Some((raw.guards, raw.owner)),
            _ => None,
        };
        match timed_out_guard {
            Some((guards, owner)) => {
                // A finished Raw means its timeout fired.
                let failure = match outcome {
                    ActionOutcome::Finished => ActivityError::Timeout,
                    ActionOutcome::Failed(error) => error,
                };
                self.settle_activity(activity_id, ActivityState::SrcTimeout, Some(failure));
                if let Some(guarded) = guards {
                    self.time_out_activity(guarded, owner);
                }
            }
            None => match outcome {
                ActionOutcome::Finished => self.finish_activity(activity_id),
                ActionOutcome::Failed(error) => self.fail_activity(activity_id, error),
            },
        }
    }

    /// One-line description of an activity for the deadlock diagnostic.
    pub(crate) fn describe_activity(&self, id: ActivityId) -> String {
        let activity = self.activities.get(id);
        match &activity.kind {
            ActivityKind::Comm(comm) => match &comm.mailbox {
                Some(mailbox) => format!("comm {} on mailbox '{}'", id, mailbox),
                None => format!("comm {}", id),
            },
            kind => format!("{} {}", kind.tag(), id),
        }
    }

    /// Times out a guarded activity: cancels its action and settles it on the side of
    /// the actor whose detector fired.
    fn time_out_activity(&mut self, id: ActivityId, owner: ActorId) {
        if self.activities.get(id).state.is_terminal() {
            return;
        }
        self.withdraw_from_mailbox(id);
        let dst_side = match &self.activities.get(id).kind {
            ActivityKind::Comm(comm) => comm.dst_actor == Some(owner) && comm.src_actor != Some(owner),
            _ => false,
        };
        let state = if dst_side {
            ActivityState::DstTimeout
        } else {
            ActivityState::SrcTimeout
        };
        self.settle_activity(id, state, Some(ActivityError::Timeout));
    }
}
