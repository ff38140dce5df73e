//! Kernel-side actor bookkeeping.
//!
//! The execution contexts themselves (one future per actor) live outside the kernel in
//! the engine's future table; the kernel only tracks identity, placement, liveness and
//! the run queue.

use std::fmt;

use crate::engine::Kernel;
use crate::log_debug;
use crate::platform::HostId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ActorId(pub usize);

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "actor#{}", self.0)
    }
}

pub(crate) struct ActorEntry {
    pub name: String,
    pub host: HostId,
    pub daemon: bool,
    pub alive: bool,
    pub in_run_queue: bool,
    /// Human-readable description of the simcall the actor is blocked on, kept for the
    /// deadlock diagnostic.
    pub blocked_on: Option<String>,
}

/// Actor table. Slots are never reused so ids stay valid for the whole run.
#[derive(Default)]
pub(crate) struct Actors {
    pub entries: Vec<ActorEntry>,
}

impl Actors {
    pub fn get(&self, id: ActorId) -> &ActorEntry {
        &self.entries[id.0]
    }

    pub fn get_mut(&mut self, id: ActorId) -> &mut ActorEntry {
        &mut self.entries[id.0]
    }

    pub fn alive_count(&self) -> usize {
        self.entries.iter().filter(|actor| actor.alive).count()
    }

    pub fn alive_ids(&self) -> Vec<ActorId> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, actor)| actor.alive)
            .map(|(idx, _)| ActorId(idx))
            .collect()
    }

    pub fn only_daemons_left(&self) -> bool {
        let mut any = false;
        for actor in self.entries.iter() {
            if actor.alive {
                if !actor.daemon {
                    return false;
                }
                any = true;
            }
        }
        any
    }
}

impl Kernel {
    pub(crate) fn add_actor(&mut self, name: &str, host: HostId, daemon: bool) -> ActorId {
        assert!(
            self.res.platform.host(host).is_on,
            "cannot start actor {} on turned-off host {}",
            name,
            self.res.platform.host(host).name
        );
        let id = ActorId(self.actors.entries.len());
        self.actors.entries.push(ActorEntry {
            name: name.to_string(),
            host,
            daemon,
            alive: true,
            in_run_queue: false,
            blocked_on: None,
        });
        self.res.platform.host_mut(host).actors.push(id);
        self.signals.actor_creation.emit(&id);
        self.wake_actor(id);
        id
    }

    /// Puts an alive actor at the back of the run queue unless it is already scheduled.
    pub(crate) fn wake_actor(&mut self, id: ActorId) {
        let actor = self.actors.get_mut(id);
        if actor.alive && !actor.in_run_queue {
            actor.in_run_queue = true;
            self.run_queue.push_back(id);
        }
    }

    /// Next runnable actor in FIFO order, skipping actors that died while queued.
    pub(crate) fn pop_runnable(&mut self) -> Option<ActorId> {
        while let Some(id) = self.run_queue.pop_front() {
            let actor = self.actors.get_mut(id);
            actor.in_run_queue = false;
            if actor.alive {
                return Some(id);
            }
        }
        None
    }

    /// Forcefully terminates an actor. Its future is reaped by the engine at the next
    /// trash collection point; any simcall it was blocked on stays unanswered.
    pub(crate) fn kill_actor(&mut self, id: ActorId) {
        let actor = self.actors.get_mut(id);
        if !actor.alive {
            return;
        }
        actor.alive = false;
        actor.blocked_on = None;
        let host = actor.host;
        log_debug!(self, "killing actor {}", self.actors.get(id).name);
        self.res.platform.host_mut(host).actors.retain(|&a| a != id);

        // Withdraw the actor from every wait list; activities nobody else waits on are
        // canceled so they stop holding resources.
        let mut orphaned = Vec::new();
        for idx in 0..self.activities.entries.len() {
            let activity = &mut self.activities.entries[idx];
            if activity.state.is_terminal() {
                continue;
            }
            if let Some(pos) = activity.waiters.iter().position(|&a| a == id) {
                activity.waiters.remove(pos);
                if activity.waiters.is_empty() {
                    orphaned.push(crate::activity::ActivityId(idx));
                }
            }
        }
        for activity in orphaned {
            self.cancel_activity(activity);
        }

        // Drop the actor from sync wait queues so nothing is ever handed to a corpse.
        let mut regrant = Vec::new();
        for mutex in self.sync.mutexes.iter_mut() {
            mutex.queue.retain(|&a| a != id);
        }
        for (idx, semaphore) in self.sync.semaphores.iter_mut().enumerate() {
            semaphore.queue.retain(|&a| a != id);
            if semaphore.granted.remove(&id) {
                regrant.push(crate::sync::SemaphoreId(idx));
            }
        }
        for condvar in self.sync.condvars.iter_mut() {
            condvar.queue.retain(|&(a, _)| a != id);
        }
        for semaphore in regrant {
            self.semaphore_release(semaphore);
        }

        self.trash.push(id);
        self.signals.actor_destruction.emit(&id);
    }

    /// Normal termination: the actor's future ran to completion.
    pub(crate) fn on_actor_completed(&mut self, id: ActorId) {
        let actor = self.actors.get_mut(id);
        if !actor.alive {
            return;
        }
        actor.alive = false;
        let host = actor.host;
        self.res.platform.host_mut(host).actors.retain(|&a| a != id);
        self.stats.actors_finished += 1;
        self.signals.actor_destruction.emit(&id);
    }
}
