//! Resource models: scalar-progress actions bound to the shared constraint system.

pub(crate) mod cpu;
pub(crate) mod disk;
pub(crate) mod network;

use platsim_maxmin::{Precision, System, VariableId};

use crate::activity::ActivityId;
use crate::error::ActivityError;
use crate::platform::{DiskId, HostId, LinkId, Platform};

/// Max-duration value meaning "unbounded".
pub(crate) const NO_MAX_DURATION: f64 = -1.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ActionId(pub usize);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ActionState {
    Inited,
    Started,
    Finished,
    Failed,
    Ignored,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ModelKind {
    Cpu,
    Disk,
    Network,
}

/// A scalar amount of remaining work (flops or bytes) progressing at the rate the
/// solver allocates to its variable.
pub(crate) struct Action {
    pub kind: ModelKind,
    pub state: ActionState,
    pub remaining: f64,
    pub cost: f64,
    /// Remaining wall-clock budget; [NO_MAX_DURATION] when unbounded.
    pub max_duration: f64,
    /// Solver weight while active; zeroed while suspended or paying latency.
    pub sharing_penalty: f64,
    pub suspended: bool,
    pub variable: Option<VariableId>,
    pub activity: ActivityId,
    /// Remaining propagation delay before a network action starts transferring.
    pub latency: f64,
    pub last_update: f64,
    pub last_value: f64,
    pub hosts: Vec<HostId>,
    pub disk: Option<DiskId>,
    pub links: Vec<LinkId>,
}

impl Action {
    pub fn is_running(&self) -> bool {
        self.state == ActionState::Started
    }
}

/// Why an action left the started set.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ActionOutcome {
    Finished,
    Failed(ActivityError),
}

pub(crate) type Completions = Vec<(ActionId, ActionOutcome)>;

/// Resource state toggles produced by state profiles, applied by the engine after all
/// models updated so that cross-model failures are handled in one place.
#[derive(Clone, Copy, Debug)]
pub(crate) enum StateToggle {
    Host(HostId, bool),
    Disk(DiskId, bool),
    Link(LinkId, bool),
}

/// Slot arena of actions with stable ids.
#[derive(Default)]
pub(crate) struct Actions {
    entries: Vec<Option<Action>>,
    free: Vec<usize>,
}

impl Actions {
    pub fn insert(&mut self, action: Action) -> ActionId {
        match self.free.pop() {
            Some(idx) => {
                self.entries[idx] = Some(action);
                ActionId(idx)
            }
            None => {
                self.entries.push(Some(action));
                ActionId(self.entries.len() - 1)
            }
        }
    }

    pub fn get(&self, id: ActionId) -> &Action {
        self.entries[id.0].as_ref().expect("action was removed")
    }

    pub fn try_get(&self, id: ActionId) -> Option<&Action> {
        self.entries[id.0].as_ref()
    }

    pub fn get_mut(&mut self, id: ActionId) -> &mut Action {
        self.entries[id.0].as_mut().expect("action was removed")
    }

    pub fn remove(&mut self, id: ActionId) -> Action {
        let action = self.entries[id.0].take().expect("action was removed twice");
        self.free.push(id.0);
        action
    }

    /// Ids of all live actions in slot order (deterministic).
    pub fn ids(&self) -> Vec<ActionId> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.is_some())
            .map(|(idx, _)| ActionId(idx))
            .collect()
    }
}

/// Everything the models read and mutate: the solver system, the action arena and the
/// platform tables. Owned by the kernel, passed down by disjoint borrow.
pub(crate) struct Resources {
    pub system: System,
    pub actions: Actions,
    pub platform: Platform,
    pub precision: Precision,
}

impl Resources {
    /// Marks an action terminal and withdraws its variable from the solver.
    pub fn settle_action(&mut self, id: ActionId, outcome: ActionOutcome) {
        let action = self.actions.get_mut(id);
        action.state = match outcome {
            ActionOutcome::Finished => ActionState::Finished,
            ActionOutcome::Failed(_) => ActionState::Failed,
        };
        if let Some(variable) = action.variable.take() {
            self.system.remove_variable(variable);
        }
    }

    /// Fails every started action involving the given host.
    pub fn fail_actions_on_host(&mut self, host: HostId, completions: &mut Completions) {
        for id in self.actions.ids() {
            let action = self.actions.get(id);
            if action.is_running() && action.hosts.contains(&host) {
                self.settle_action(id, ActionOutcome::Failed(ActivityError::HostFailure));
                completions.push((id, ActionOutcome::Failed(ActivityError::HostFailure)));
            }
        }
    }

    /// Fails every started I/O action on the given disk.
    pub fn fail_actions_on_disk(&mut self, disk: DiskId, completions: &mut Completions) {
        for id in self.actions.ids() {
            let action = self.actions.get(id);
            if action.is_running() && action.disk == Some(disk) {
                self.settle_action(id, ActionOutcome::Failed(ActivityError::StorageFailure));
                completions.push((id, ActionOutcome::Failed(ActivityError::StorageFailure)));
            }
        }
    }

    /// Fails every started communication crossing the given link.
    pub fn fail_actions_on_link(&mut self, link: LinkId, completions: &mut Completions) {
        for id in self.actions.ids() {
            let action = self.actions.get(id);
            if action.is_running() && action.links.contains(&link) {
                self.settle_action(id, ActionOutcome::Failed(ActivityError::NetworkFailure));
                completions.push((id, ActionOutcome::Failed(ActivityError::NetworkFailure)));
            }
        }
    }

    /// Suspends or resumes an action by zeroing or restoring its solver weight. An
    /// action still paying latency keeps weight zero until the latency is over.
    pub fn set_action_suspended(&mut self, id: ActionId, suspended: bool) {
        let action = self.actions.get_mut(id);
        if action.suspended == suspended || !action.is_running() {
            return;
        }
        action.suspended = suspended;
        if let Some(variable) = action.variable {
            let weight = if suspended || action.latency > 0.0 {
                0.0
            } else {
                action.sharing_penalty
            };
            self.system.update_variable_weight(variable, weight);
        }
    }

    /// Time to completion of a started action assuming current rates, if predictable.
    pub(crate) fn action_horizon(&self, id: ActionId) -> Option<f64> {
        let action = self.actions.get(id);
        if !action.is_running() {
            return None;
        }
        let mut horizon: Option<f64> = None;
        let mut consider = |candidate: f64| {
            let candidate = f64::max(candidate, 0.0);
            horizon = Some(horizon.map_or(candidate, |h| f64::min(h, candidate)));
        };
        if action.latency > 0.0 {
            consider(action.latency);
        } else if let Some(variable) = action.variable {
            let value = self.system.variable_value(variable);
            if !self.precision.positive(action.remaining) {
                // Out of work already; finishes as soon as the model looks at it.
                consider(0.0);
            } else if self.precision.positive(value) {
                consider(action.remaining / value);
            }
        }
        if action.max_duration != NO_MAX_DURATION {
            consider(action.max_duration);
        }
        horizon
    }

    /// Advances a started action by `delta`, returning its outcome when it completes.
    pub(crate) fn advance_action(&mut self, id: ActionId, now: f64, delta: f64) -> Option<ActionOutcome> {
        let eps = self.precision;
        let action = self.actions.get_mut(id);
        if !action.is_running() {
            return None;
        }
        if action.latency > 0.0 {
            let paid = f64::min(action.latency, delta);
            action.latency = eps.snap_to_zero(action.latency - paid);
            if action.latency == 0.0 {
                if let Some(variable) = action.variable {
                    if !action.suspended {
                        let weight = action.sharing_penalty;
                        self.system.update_variable_weight(variable, weight);
                    }
                }
            }
        } else if let Some(variable) = action.variable {
            let value = self.system.variable_value(variable);
            action.remaining = eps.snap_to_zero(action.remaining - value * delta);
            action.last_update = now;
            action.last_value = value;
        }
        let action = self.actions.get_mut(id);
        if action.max_duration != NO_MAX_DURATION {
            action.max_duration = eps.snap_to_zero(f64::max(action.max_duration - delta, 0.0));
        }

        // An action ends once the propagation delay is paid and either its work is done
        // or its wall-clock budget ran out. Sleeps never progress (no variable) and end
        // on the budget alone.
        let work_done = action.variable.is_some() && !eps.positive(action.remaining);
        let out_of_duration = action.max_duration == 0.0;
        if action.latency == 0.0 && (work_done || out_of_duration) {
            self.settle_action(id, ActionOutcome::Finished);
            return Some(ActionOutcome::Finished);
        }
        None
    }
}
