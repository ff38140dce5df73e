//! Kernel-side synchronization objects: mutexes, semaphores, condition variables.
//!
//! All hand-offs are FIFO. Timed waits race against a Raw clock on the caller's host;
//! whichever fires first wins and the loser is canceled.

use std::collections::{BTreeSet, VecDeque};

use crate::actor::ActorId;
use crate::engine::Kernel;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MutexId(pub usize);

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SemaphoreId(pub usize);

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CondvarId(pub usize);

#[derive(Default)]
pub(crate) struct MutexImpl {
    pub owner: Option<ActorId>,
    pub queue: VecDeque<ActorId>,
}

pub(crate) struct SemaphoreImpl {
    pub value: u32,
    pub queue: VecDeque<ActorId>,
    /// Acquisitions handed over by `release` but not yet observed by the waiter.
    pub granted: BTreeSet<ActorId>,
}

#[derive(Default)]
pub(crate) struct CondvarImpl {
    /// Sleeping actors together with the mutex each must re-acquire once notified.
    pub queue: VecDeque<(ActorId, MutexId)>,
}

#[derive(Default)]
pub(crate) struct SyncTable {
    pub mutexes: Vec<MutexImpl>,
    pub semaphores: Vec<SemaphoreImpl>,
    pub condvars: Vec<CondvarImpl>,
}

impl Kernel {
    pub(crate) fn mutex_create(&mut self) -> MutexId {
        self.sync.mutexes.push(MutexImpl::default());
        MutexId(self.sync.mutexes.len() - 1)
    }

    /// Non-blocking acquisition attempt.
    pub(crate) fn mutex_try_lock(&mut self, id: MutexId, actor: ActorId) -> bool {
        let mutex = &mut self.sync.mutexes[id.0];
        if mutex.owner.is_none() {
            mutex.owner = Some(actor);
            true
        } else {
            false
        }
    }

    /// Acquires the mutex or joins the FIFO wait queue. Returns whether the caller now
    /// owns the mutex.
    pub(crate) fn mutex_enqueue(&mut self, id: MutexId, actor: ActorId) -> bool {
        let mutex = &mut self.sync.mutexes[id.0];
        if mutex.owner.is_none() {
            mutex.owner = Some(actor);
            true
        } else if mutex.owner == Some(actor) {
            true
        } else {
            if !mutex.queue.contains(&actor) {
                mutex.queue.push_back(actor);
            }
            false
        }
    }

    pub(crate) fn mutex_owner(&self, id: MutexId) -> Option<ActorId> {
        self.sync.mutexes[id.0].owner
    }

    /// Releases the mutex, handing it directly to the next queued actor.
    pub(crate) fn mutex_unlock(&mut self, id: MutexId, actor: ActorId) {
        assert_eq!(
            self.sync.mutexes[id.0].owner,
            Some(actor),
            "{} unlocks a mutex it does not own",
            actor
        );
        let next = {
            let mutex = &mut self.sync.mutexes[id.0];
            mutex.owner = mutex.queue.pop_front();
            mutex.owner
        };
        if let Some(next) = next {
            self.wake_actor(next);
        }
    }

    pub(crate) fn semaphore_create(&mut self, value: u32) -> SemaphoreId {
        self.sync.semaphores.push(SemaphoreImpl {
            value,
            queue: VecDeque::new(),
            granted: BTreeSet::new(),
        });
        SemaphoreId(self.sync.semaphores.len() - 1)
    }

    pub(crate) fn semaphore_try_acquire(&mut self, id: SemaphoreId, _actor: ActorId) -> bool {
        let semaphore = &mut self.sync.semaphores[id.0];
        if semaphore.value > 0 {
            semaphore.value -= 1;
            true
        } else {
            false
        }
    }

    /// Acquires a unit or joins the FIFO wait queue. Returns whether a unit was taken.
    pub(crate) fn semaphore_enqueue(&mut self, id: SemaphoreId, actor: ActorId) -> bool {
        let semaphore = &mut self.sync.semaphores[id.0];
        if semaphore.value > 0 {
            semaphore.value -= 1;
            true
        } else {
            if !semaphore.queue.contains(&actor) {
                semaphore.queue.push_back(actor);
            }
            false
        }
    }

    /// Consumes a pending direct hand-off for this actor, if any.
    pub(crate) fn semaphore_take_grant(&mut self, id: SemaphoreId, actor: ActorId) -> bool {
        self.sync.semaphores[id.0].granted.remove(&actor)
    }

    /// Releases a unit, handing it directly to the oldest waiter.
    pub(crate) fn semaphore_release(&mut self, id: SemaphoreId) {
        let next = {
            let semaphore = &mut self.sync.semaphores[id.0];
            match semaphore.queue.pop_front() {
                Some(next) => {
                    semaphore.granted.insert(next);
                    Some(next)
                }
                None => {
                    semaphore.value += 1;
                    None
                }
            }
        };
        if let Some(next) = next {
            self.wake_actor(next);
        }
    }

    pub(crate) fn semaphore_cancel_wait(&mut self, id: SemaphoreId, actor: ActorId) {
        self.sync.semaphores[id.0].queue.retain(|&a| a != actor);
    }

    pub(crate) fn semaphore_capacity(&self, id: SemaphoreId) -> u32 {
        self.sync.semaphores[id.0].value
    }

    pub(crate) fn condvar_create(&mut self) -> CondvarId {
        self.sync.condvars.push(CondvarImpl::default());
        CondvarId(self.sync.condvars.len() - 1)
    }

    /// Puts an actor to sleep on the condition, remembering the mutex it released.
    pub(crate) fn condvar_enqueue(&mut self, id: CondvarId, actor: ActorId, mutex: MutexId) {
        let condvar = &mut self.sync.condvars[id.0];
        if !condvar.queue.iter().any(|&(a, _)| a == actor) {
            condvar.queue.push_back((actor, mutex));
        }
    }

    pub(crate) fn condvar_is_sleeping(&self, id: CondvarId, actor: ActorId) -> bool {
        self.sync.condvars[id.0].queue.iter().any(|&(a, _)| a == actor)
    }

    /// Wakes the oldest sleeper: it leaves the condition queue and starts re-acquiring
    /// the mutex it held when it went to sleep.
    pub(crate) fn condvar_notify_one(&mut self, id: CondvarId) {
        if let Some((actor, mutex)) = self.sync.condvars[id.0].queue.pop_front() {
            self.mutex_enqueue(mutex, actor);
            self.wake_actor(actor);
        }
    }

    pub(crate) fn condvar_notify_all(&mut self, id: CondvarId) {
        while !self.sync.condvars[id.0].queue.is_empty() {
            self.condvar_notify_one(id);
        }
    }

    /// Drops a timed-out sleeper; true if it was still sleeping on the condition.
    pub(crate) fn condvar_cancel_wait(&mut self, id: CondvarId, actor: ActorId) -> bool {
        let condvar = &mut self.sync.condvars[id.0];
        let was_sleeping = condvar.queue.iter().any(|&(a, _)| a == actor);
        condvar.queue.retain(|&(a, _)| a != actor);
        was_sleeping
    }
}
