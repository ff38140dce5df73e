//! The actor-facing API: contexts, activity handles and awaitable simcalls.
//!
//! Every suspension point is a small future that registers the actor with the kernel
//! during poll and parks it until the maestro wakes it. All kernel borrows are scoped
//! to a single poll, so user code between awaits can never observe a locked kernel.

use std::any::Any;
use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use futures::future::FutureExt;
use rand::Rng;

use crate::activity::{ActivityId, ActivityKind, ActivityState, ExecData, IoData, SleepData};
use crate::actor::ActorId;
use crate::engine::{FuturesTable, Kernel};
use crate::error::ActivityError;
use crate::platform::{DiskId, HostId, LinkId, OpType};
use crate::sync::{CondvarId, MutexId, SemaphoreId};

/// Handle an actor uses to talk to the kernel. Cheap to clone; every spawned actor gets
/// its own.
pub struct ActorContext {
    pub(crate) kernel: Rc<RefCell<Kernel>>,
    pub(crate) futures: Rc<RefCell<FuturesTable>>,
    pub(crate) actor: ActorId,
}

impl Clone for ActorContext {
    fn clone(&self) -> Self {
        ActorContext {
            kernel: Rc::clone(&self.kernel),
            futures: Rc::clone(&self.futures),
            actor: self.actor,
        }
    }
}

impl ActorContext {
    pub fn id(&self) -> ActorId {
        self.actor
    }

    /// Current virtual time.
    pub fn time(&self) -> f64 {
        self.kernel.borrow().clock
    }

    /// Actor name, used by the logging macros.
    pub fn label(&self) -> String {
        self.kernel.borrow().actors.get(self.actor).name.clone()
    }

    pub fn host(&self) -> HostId {
        self.kernel.borrow().actors.get(self.actor).host
    }

    pub fn host_by_name(&self, name: &str) -> Option<HostId> {
        self.kernel.borrow().res.platform.host_by_name(name)
    }

    pub fn disk_by_name(&self, name: &str) -> Option<DiskId> {
        self.kernel.borrow().res.platform.disk_by_name(name)
    }

    pub fn link_by_name(&self, name: &str) -> Option<LinkId> {
        self.kernel.borrow().res.platform.link_by_name(name)
    }

    /// Disks attached to this actor's host.
    pub fn host_disks(&self) -> Vec<DiskId> {
        let kernel = self.kernel.borrow();
        let host = kernel.actors.get(self.actor).host;
        kernel.res.platform.host(host).disks.clone()
    }

    /// Deterministic random number from the engine-seeded generator.
    pub fn random(&self) -> f64 {
        self.kernel.borrow_mut().rng.gen()
    }

    pub fn gen_range(&self, range: std::ops::Range<usize>) -> usize {
        self.kernel.borrow_mut().rng.gen_range(range)
    }

    /// Spawns a child actor on `host`, scheduled after the currently runnable ones.
    pub fn spawn<F, Fut>(&self, name: &str, host: HostId, f: F) -> ActorId
    where
        F: FnOnce(ActorContext) -> Fut,
        Fut: Future<Output = ()> + 'static,
    {
        self.spawn_inner(name, host, false, f)
    }

    /// Spawns a daemon: it is killed once only daemons remain alive.
    pub fn spawn_daemon<F, Fut>(&self, name: &str, host: HostId, f: F) -> ActorId
    where
        F: FnOnce(ActorContext) -> Fut,
        Fut: Future<Output = ()> + 'static,
    {
        self.spawn_inner(name, host, true, f)
    }

    fn spawn_inner<F, Fut>(&self, name: &str, host: HostId, daemon: bool, f: F) -> ActorId
    where
        F: FnOnce(ActorContext) -> Fut,
        Fut: Future<Output = ()> + 'static,
    {
        let id = self.kernel.borrow_mut().add_actor(name, host, daemon);
        let child = ActorContext {
            kernel: Rc::clone(&self.kernel),
            futures: Rc::clone(&self.futures),
            actor: id,
        };
        self.futures.borrow_mut().insert(id, f(child).boxed_local());
        id
    }

    /// Defers a callback to the maestro; it runs between actor polls, before the next
    /// resource round. The callback must not issue simcalls.
    pub fn defer(&self, f: impl FnOnce() + 'static) {
        self.kernel
            .borrow_mut()
            .tasks
            .push_back(Box::new(move |_kernel: &mut Kernel| f()));
    }

    fn activity_ref(&self, id: ActivityId) -> ActivityRef {
        ActivityRef {
            kernel: Rc::clone(&self.kernel),
            id,
            actor: self.actor,
        }
    }

    /// Starts describing an execution; finish with [ExecBuilder::start].
    pub fn exec_init(&self, flops: f64) -> ExecBuilder<'_> {
        ExecBuilder {
            ctx: self,
            host: None,
            flops,
            bound: 0.0,
            priority: 1.0,
        }
    }

    /// Fire-and-forget execution handle on this actor's host.
    pub fn exec_async(&self, flops: f64) -> ActivityRef {
        self.exec_init(flops).start()
    }

    /// Runs `flops` on this actor's host and waits for completion.
    pub async fn execute(&self, flops: f64) -> Result<(), ActivityError> {
        self.exec_async(flops).wait().await
    }

    /// Parallel execution handle spanning several hosts; `bytes` is the row-major
    /// hosts x hosts matrix of exchanged data.
    pub fn parallel_exec_async(&self, hosts: Vec<HostId>, flops: Vec<f64>, bytes: Vec<f64>) -> ActivityRef {
        let id = self.kernel.borrow_mut().activities.insert(ActivityKind::Exec(ExecData {
            hosts,
            flops,
            bytes,
            bound: 0.0,
            priority: 1.0,
        }));
        let activity = self.activity_ref(id);
        activity.start();
        activity
    }

    pub async fn parallel_execute(
        &self,
        hosts: Vec<HostId>,
        flops: Vec<f64>,
        bytes: Vec<f64>,
    ) -> Result<(), ActivityError> {
        self.parallel_exec_async(hosts, flops, bytes).wait().await
    }

    /// Sleeps for `duration` seconds of virtual time.
    pub async fn sleep(&self, duration: f64) -> Result<(), ActivityError> {
        let id = {
            let mut kernel = self.kernel.borrow_mut();
            let host = kernel.actors.get(self.actor).host;
            kernel
                .activities
                .insert(ActivityKind::Sleep(SleepData { host, duration }))
        };
        self.activity_ref(id).wait().await
    }

    /// Posts `payload` on the mailbox; the transfer models `size` bytes.
    pub fn put_async<T: Any>(&self, mailbox: &str, payload: T, size: f64) -> CommRef {
        self.put_async_rated(mailbox, payload, size, 0.0)
    }

    /// Like [ActorContext::put_async] with an explicit rate cap (`<= 0` = uncapped).
    pub fn put_async_rated<T: Any>(&self, mailbox: &str, payload: T, size: f64, rate: f64) -> CommRef {
        let id = self
            .kernel
            .borrow_mut()
            .comm_put(mailbox, self.actor, Box::new(payload), size, rate);
        CommRef {
            inner: self.activity_ref(id),
        }
    }

    pub async fn put<T: Any>(&self, mailbox: &str, payload: T, size: f64) -> Result<(), ActivityError> {
        self.put_async(mailbox, payload, size).wait().await
    }

    /// Posts a receive on the mailbox.
    pub fn get_async(&self, mailbox: &str) -> CommRef {
        let id = self.kernel.borrow_mut().comm_get(mailbox, self.actor);
        CommRef {
            inner: self.activity_ref(id),
        }
    }

    /// Receives the next payload from the mailbox.
    pub async fn get<T: Any>(&self, mailbox: &str) -> Result<T, ActivityError> {
        let comm = self.get_async(mailbox);
        comm.wait().await?;
        Ok(comm
            .take_payload::<T>()
            .expect("mailbox payload has a different type than requested"))
    }

    /// Binds a permanent receiver to the mailbox: sends posted there complete eagerly
    /// into the mailbox buffer.
    pub fn set_receiver(&self, mailbox: &str, actor: ActorId) {
        self.kernel.borrow_mut().set_mailbox_receiver(mailbox, actor);
    }

    /// Raw host-to-host transfer, no rendezvous and no payload.
    pub fn sendto_async(&self, from: HostId, to: HostId, size: f64) -> CommRef {
        let id = self.kernel.borrow_mut().comm_sendto(from, to, size);
        CommRef {
            inner: self.activity_ref(id),
        }
    }

    pub async fn sendto(&self, from: HostId, to: HostId, size: f64) -> Result<(), ActivityError> {
        self.sendto_async(from, to, size).wait().await
    }

    /// Asynchronous I/O operation handle.
    pub fn io_async(&self, disk: DiskId, size: f64, op: OpType) -> ActivityRef {
        let id = self
            .kernel
            .borrow_mut()
            .activities
            .insert(ActivityKind::Io(IoData { disk, size, op }));
        let activity = self.activity_ref(id);
        activity.start();
        activity
    }

    pub async fn disk_read(&self, disk: DiskId, size: f64) -> Result<(), ActivityError> {
        self.io_async(disk, size, OpType::Read).wait().await
    }

    pub async fn disk_write(&self, disk: DiskId, size: f64) -> Result<(), ActivityError> {
        self.io_async(disk, size, OpType::Write).wait().await
    }

    pub fn create_mutex(&self) -> Mutex {
        Mutex {
            kernel: Rc::clone(&self.kernel),
            id: self.kernel.borrow_mut().mutex_create(),
        }
    }

    pub fn create_semaphore(&self, capacity: u32) -> Semaphore {
        Semaphore {
            kernel: Rc::clone(&self.kernel),
            id: self.kernel.borrow_mut().semaphore_create(capacity),
        }
    }

    pub fn create_condvar(&self) -> ConditionVariable {
        ConditionVariable {
            kernel: Rc::clone(&self.kernel),
            id: self.kernel.borrow_mut().condvar_create(),
        }
    }

    /// Lets every other runnable actor run before continuing.
    pub fn yield_now(&self) -> YieldFuture {
        YieldFuture {
            kernel: Rc::clone(&self.kernel),
            actor: self.actor,
            yielded: false,
        }
    }

    /// Waits until the first of the given activities turns terminal and returns its
    /// index; ties resolve to the lowest index.
    pub fn wait_any(&self, activities: &[ActivityRef]) -> WaitAnyFuture {
        WaitAnyFuture {
            kernel: Rc::clone(&self.kernel),
            activities: activities.iter().map(|a| a.id).collect(),
            actor: self.actor,
            timeout: None,
            timer: None,
        }
    }

    /// Like [ActorContext::wait_any] but gives up after `timeout`, returning `None`.
    pub fn wait_any_for(&self, activities: &[ActivityRef], timeout: f64) -> WaitAnyFuture {
        WaitAnyFuture {
            kernel: Rc::clone(&self.kernel),
            activities: activities.iter().map(|a| a.id).collect(),
            actor: self.actor,
            timeout: Some(timeout),
            timer: None,
        }
    }

    /// Index of the first already-terminal activity, without blocking.
    pub fn test_any(&self, activities: &[ActivityRef]) -> Option<usize> {
        let kernel = self.kernel.borrow();
        activities
            .iter()
            .position(|a| kernel.activity_state(a.id).is_terminal())
    }

    pub fn turn_host_on(&self, host: HostId) {
        self.kernel.borrow_mut().set_host_state(host, true);
    }

    pub fn turn_host_off(&self, host: HostId) {
        self.kernel.borrow_mut().set_host_state(host, false);
    }

    pub fn turn_disk_on(&self, disk: DiskId) {
        self.kernel.borrow_mut().set_disk_state(disk, true);
    }

    pub fn turn_disk_off(&self, disk: DiskId) {
        self.kernel.borrow_mut().set_disk_state(disk, false);
    }

    pub fn turn_link_on(&self, link: LinkId) {
        self.kernel.borrow_mut().set_link_state(link, true);
    }

    pub fn turn_link_off(&self, link: LinkId) {
        self.kernel.borrow_mut().set_link_state(link, false);
    }

    pub fn set_pstate(&self, host: HostId, pstate: usize) {
        self.kernel.borrow_mut().set_pstate(host, pstate);
    }
}

/// Builder for an execution, in the manner of `exec_init`.
pub struct ExecBuilder<'a> {
    ctx: &'a ActorContext,
    host: Option<HostId>,
    flops: f64,
    bound: f64,
    priority: f64,
}

impl<'a> ExecBuilder<'a> {
    /// Runs on the given host instead of the issuer's.
    pub fn with_host(mut self, host: HostId) -> Self {
        self.host = Some(host);
        self
    }

    /// Caps the computation rate in flops per second.
    pub fn with_bound(mut self, bound: f64) -> Self {
        self.bound = bound;
        self
    }

    /// Sharing priority; higher values get a larger share of the CPU.
    pub fn with_priority(mut self, priority: f64) -> Self {
        self.priority = priority;
        self
    }

    /// Creates and starts the execution.
    pub fn start(self) -> ActivityRef {
        let id = {
            let mut kernel = self.ctx.kernel.borrow_mut();
            let host = self.host.unwrap_or_else(|| kernel.actors.get(self.ctx.actor).host);
            kernel.activities.insert(ActivityKind::Exec(ExecData {
                hosts: vec![host],
                flops: vec![self.flops],
                bytes: Vec::new(),
                bound: self.bound,
                priority: self.priority,
            }))
        };
        let activity = self.ctx.activity_ref(id);
        activity.start();
        activity
    }
}

/// User-facing handle of a kernel activity. Keeping a clone alive never blocks the
/// kernel from settling the activity.
#[derive(Clone)]
pub struct ActivityRef {
    pub(crate) kernel: Rc<RefCell<Kernel>>,
    pub(crate) id: ActivityId,
    pub(crate) actor: ActorId,
}

impl ActivityRef {
    pub fn id(&self) -> ActivityId {
        self.id
    }

    pub fn state(&self) -> ActivityState {
        self.kernel.borrow().activity_state(self.id)
    }

    /// Hands the activity to its resource model; no-op unless it is still Waiting.
    pub fn start(&self) -> &Self {
        self.kernel.borrow_mut().start_activity(self.id);
        self
    }

    /// Whether the activity reached a terminal state.
    pub fn test(&self) -> bool {
        self.state().is_terminal()
    }

    pub fn cancel(&self) {
        self.kernel.borrow_mut().cancel_activity(self.id);
    }

    pub fn suspend(&self) {
        self.kernel.borrow_mut().suspend_activity(self.id);
    }

    pub fn resume(&self) {
        self.kernel.borrow_mut().resume_activity(self.id);
    }

    /// Fraction of the work still to do (1 before start, 0 once terminal).
    pub fn remaining_ratio(&self) -> f64 {
        self.kernel.borrow().activity_remaining_ratio(self.id)
    }

    /// Blocks the issuer until the activity is terminal.
    pub fn wait(&self) -> WaitFuture {
        WaitFuture {
            kernel: Rc::clone(&self.kernel),
            activity: self.id,
            actor: self.actor,
            timeout: None,
            armed: false,
        }
    }

    /// Blocks at most `timeout` seconds; the activity is canceled if the timeout wins.
    pub fn wait_for(&self, timeout: f64) -> WaitFuture {
        WaitFuture {
            kernel: Rc::clone(&self.kernel),
            activity: self.id,
            actor: self.actor,
            timeout: Some(timeout),
            armed: false,
        }
    }
}

/// Handle of a communication; adds payload access and detaching on top of
/// [ActivityRef].
#[derive(Clone)]
pub struct CommRef {
    inner: ActivityRef,
}

impl CommRef {
    pub fn id(&self) -> ActivityId {
        self.inner.id
    }

    pub fn state(&self) -> ActivityState {
        self.inner.state()
    }

    pub fn test(&self) -> bool {
        self.inner.test()
    }

    pub fn cancel(&self) {
        self.inner.cancel()
    }

    pub fn suspend(&self) {
        self.inner.suspend()
    }

    pub fn resume(&self) {
        self.inner.resume()
    }

    pub fn remaining_ratio(&self) -> f64 {
        self.inner.remaining_ratio()
    }

    pub fn wait(&self) -> WaitFuture {
        self.inner.wait()
    }

    pub fn wait_for(&self, timeout: f64) -> WaitFuture {
        self.inner.wait_for(timeout)
    }

    /// Plain [ActivityRef] view, for `wait_any`.
    pub fn as_activity(&self) -> ActivityRef {
        self.inner.clone()
    }

    /// Marks the send as detached: the issuer is never signaled and the payload is
    /// dropped by the kernel if no receiver ever claims it.
    pub fn detach(&self) {
        self.kernel().borrow_mut().comm_detach(self.inner.id);
    }

    /// Takes the delivered payload out of a completed receive.
    pub fn take_payload<T: Any>(&self) -> Option<T> {
        let payload = self.kernel().borrow_mut().take_comm_payload(self.inner.id)?;
        payload.downcast::<T>().ok().map(|boxed| *boxed)
    }

    fn kernel(&self) -> &Rc<RefCell<Kernel>> {
        &self.inner.kernel
    }
}

/// Awaits a single activity, optionally racing a timeout detector against it.
pub struct WaitFuture {
    kernel: Rc<RefCell<Kernel>>,
    activity: ActivityId,
    actor: ActorId,
    timeout: Option<f64>,
    armed: bool,
}

impl Future for WaitFuture {
    type Output = Result<(), ActivityError>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let mut kernel = this.kernel.borrow_mut();
        if kernel.activity_state(this.activity) == ActivityState::Waiting {
            kernel.start_activity(this.activity);
        }
        if let Some(outcome) = kernel.activity_outcome(this.activity) {
            kernel.actors.get_mut(this.actor).blocked_on = None;
            return Poll::Ready(outcome);
        }
        if let Some(timeout) = this.timeout {
            if !this.armed {
                this.armed = true;
                kernel.arm_timeout_detector(this.activity, this.actor, timeout);
            }
        }
        kernel.register_waiter(this.activity, this.actor);
        let description = kernel.describe_activity(this.activity);
        kernel.actors.get_mut(this.actor).blocked_on = Some(format!("waiting on {}", description));
        Poll::Pending
    }
}

/// Awaits the first terminal activity of a set; `None` means the timeout fired first.
pub struct WaitAnyFuture {
    kernel: Rc<RefCell<Kernel>>,
    activities: Vec<ActivityId>,
    actor: ActorId,
    timeout: Option<f64>,
    timer: Option<ActivityId>,
}

impl Future for WaitAnyFuture {
    type Output = Option<usize>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let mut kernel = this.kernel.borrow_mut();
        for &id in this.activities.iter() {
            if kernel.activity_state(id) == ActivityState::Waiting {
                kernel.start_activity(id);
            }
        }
        let first = this
            .activities
            .iter()
            .position(|&id| kernel.activity_state(id).is_terminal());
        if let Some(index) = first {
            if let Some(timer) = this.timer.take() {
                kernel.cancel_activity(timer);
            }
            kernel.actors.get_mut(this.actor).blocked_on = None;
            return Poll::Ready(Some(index));
        }
        if let Some(timeout) = this.timeout {
            if this.timer.is_none() {
                this.timer = Some(kernel.arm_timer(this.actor, timeout));
            }
        }
        if let Some(timer) = this.timer {
            if kernel.activity_state(timer).is_terminal() {
                kernel.actors.get_mut(this.actor).blocked_on = None;
                return Poll::Ready(None);
            }
            kernel.register_waiter(timer, this.actor);
        }
        for &id in this.activities.iter() {
            kernel.register_waiter(id, this.actor);
        }
        kernel.actors.get_mut(this.actor).blocked_on = Some(format!("waiting on any of {} activities", this.activities.len()));
        Poll::Pending
    }
}

/// Suspends once, letting the rest of the run queue go first.
pub struct YieldFuture {
    kernel: Rc<RefCell<Kernel>>,
    actor: ActorId,
    yielded: bool,
}

impl Future for YieldFuture {
    type Output = ();

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if this.yielded {
            Poll::Ready(())
        } else {
            this.yielded = true;
            this.kernel.borrow_mut().wake_actor(this.actor);
            Poll::Pending
        }
    }
}

/// Mutual exclusion with FIFO hand-off. Clone the handle to share it between actors.
#[derive(Clone)]
pub struct Mutex {
    kernel: Rc<RefCell<Kernel>>,
    id: MutexId,
}

impl Mutex {
    pub fn id(&self) -> MutexId {
        self.id
    }

    pub fn try_lock(&self, ctx: &ActorContext) -> bool {
        self.kernel.borrow_mut().mutex_try_lock(self.id, ctx.actor)
    }

    pub fn lock(&self, ctx: &ActorContext) -> MutexLockFuture {
        MutexLockFuture {
            kernel: Rc::clone(&self.kernel),
            id: self.id,
            actor: ctx.actor,
            enqueued: false,
        }
    }

    pub fn unlock(&self, ctx: &ActorContext) {
        self.kernel.borrow_mut().mutex_unlock(self.id, ctx.actor);
    }
}

pub struct MutexLockFuture {
    kernel: Rc<RefCell<Kernel>>,
    id: MutexId,
    actor: ActorId,
    enqueued: bool,
}

impl Future for MutexLockFuture {
    type Output = ();

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let mut kernel = this.kernel.borrow_mut();
        let acquired = if this.enqueued {
            kernel.mutex_owner(this.id) == Some(this.actor)
        } else {
            this.enqueued = true;
            kernel.mutex_enqueue(this.id, this.actor)
        };
        if acquired {
            kernel.actors.get_mut(this.actor).blocked_on = None;
            Poll::Ready(())
        } else {
            kernel.actors.get_mut(this.actor).blocked_on = Some(format!("locking mutex#{}", this.id.0));
            Poll::Pending
        }
    }
}

/// Counting semaphore with FIFO hand-off and optional timed acquisition.
#[derive(Clone)]
pub struct Semaphore {
    kernel: Rc<RefCell<Kernel>>,
    id: SemaphoreId,
}

impl Semaphore {
    pub fn id(&self) -> SemaphoreId {
        self.id
    }

    pub fn try_acquire(&self, ctx: &ActorContext) -> bool {
        self.kernel.borrow_mut().semaphore_try_acquire(self.id, ctx.actor)
    }

    pub fn acquire(&self, ctx: &ActorContext) -> SemaphoreAcquireFuture {
        SemaphoreAcquireFuture {
            kernel: Rc::clone(&self.kernel),
            id: self.id,
            actor: ctx.actor,
            timeout: None,
            timer: None,
            enqueued: false,
        }
    }

    pub fn acquire_timeout(&self, ctx: &ActorContext, timeout: f64) -> SemaphoreAcquireFuture {
        SemaphoreAcquireFuture {
            kernel: Rc::clone(&self.kernel),
            id: self.id,
            actor: ctx.actor,
            timeout: Some(timeout),
            timer: None,
            enqueued: false,
        }
    }

    pub fn release(&self) {
        self.kernel.borrow_mut().semaphore_release(self.id);
    }

    pub fn capacity(&self) -> u32 {
        self.kernel.borrow().semaphore_capacity(self.id)
    }
}

pub struct SemaphoreAcquireFuture {
    kernel: Rc<RefCell<Kernel>>,
    id: SemaphoreId,
    actor: ActorId,
    timeout: Option<f64>,
    timer: Option<ActivityId>,
    enqueued: bool,
}

impl Future for SemaphoreAcquireFuture {
    type Output = Result<(), ActivityError>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let mut kernel = this.kernel.borrow_mut();
        if !this.enqueued {
            this.enqueued = true;
            if kernel.semaphore_enqueue(this.id, this.actor) {
                return Poll::Ready(Ok(()));
            }
            if let Some(timeout) = this.timeout {
                this.timer = Some(kernel.arm_timer(this.actor, timeout));
            }
        } else if kernel.semaphore_take_grant(this.id, this.actor) {
            if let Some(timer) = this.timer.take() {
                kernel.cancel_activity(timer);
            }
            kernel.actors.get_mut(this.actor).blocked_on = None;
            return Poll::Ready(Ok(()));
        } else if let Some(timer) = this.timer {
            if kernel.activity_state(timer).is_terminal() {
                kernel.semaphore_cancel_wait(this.id, this.actor);
                kernel.actors.get_mut(this.actor).blocked_on = None;
                return Poll::Ready(Err(ActivityError::Timeout));
            }
            kernel.register_waiter(timer, this.actor);
        }
        kernel.actors.get_mut(this.actor).blocked_on = Some(format!("acquiring semaphore#{}", this.id.0));
        Poll::Pending
    }
}

/// Condition variable; waiting releases the mutex and re-acquires it before returning,
/// also on timeout.
#[derive(Clone)]
pub struct ConditionVariable {
    kernel: Rc<RefCell<Kernel>>,
    id: CondvarId,
}

impl ConditionVariable {
    pub fn id(&self) -> CondvarId {
        self.id
    }

    pub fn wait(&self, ctx: &ActorContext, mutex: &Mutex) -> CondvarWaitFuture {
        CondvarWaitFuture {
            kernel: Rc::clone(&self.kernel),
            id: self.id,
            mutex: mutex.id,
            actor: ctx.actor,
            timeout: None,
            timer: None,
            phase: CondvarPhase::Init,
        }
    }

    pub fn wait_timeout(&self, ctx: &ActorContext, mutex: &Mutex, timeout: f64) -> CondvarWaitFuture {
        CondvarWaitFuture {
            kernel: Rc::clone(&self.kernel),
            id: self.id,
            mutex: mutex.id,
            actor: ctx.actor,
            timeout: Some(timeout),
            timer: None,
            phase: CondvarPhase::Init,
        }
    }

    pub fn notify_one(&self) {
        self.kernel.borrow_mut().condvar_notify_one(self.id);
    }

    pub fn notify_all(&self) {
        self.kernel.borrow_mut().condvar_notify_all(self.id);
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum CondvarPhase {
    Init,
    Sleeping,
    Reacquiring { timed_out: bool },
}

pub struct CondvarWaitFuture {
    kernel: Rc<RefCell<Kernel>>,
    id: CondvarId,
    mutex: MutexId,
    actor: ActorId,
    timeout: Option<f64>,
    timer: Option<ActivityId>,
    phase: CondvarPhase,
}

impl Future for CondvarWaitFuture {
    type Output = Result<(), ActivityError>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let mut kernel = this.kernel.borrow_mut();
        if this.phase == CondvarPhase::Init {
            kernel.mutex_unlock(this.mutex, this.actor);
            kernel.condvar_enqueue(this.id, this.actor, this.mutex);
            if let Some(timeout) = this.timeout {
                this.timer = Some(kernel.arm_timer(this.actor, timeout));
            }
            this.phase = CondvarPhase::Sleeping;
        }
        if this.phase == CondvarPhase::Sleeping {
            if !kernel.condvar_is_sleeping(this.id, this.actor) {
                // Notified; the kernel already queued us on the mutex.
                if let Some(timer) = this.timer.take() {
                    kernel.cancel_activity(timer);
                }
                this.phase = CondvarPhase::Reacquiring { timed_out: false };
            } else if let Some(timer) = this.timer {
                if kernel.activity_state(timer).is_terminal() {
                    kernel.condvar_cancel_wait(this.id, this.actor);
                    kernel.mutex_enqueue(this.mutex, this.actor);
                    this.phase = CondvarPhase::Reacquiring { timed_out: true };
                } else {
                    kernel.register_waiter(timer, this.actor);
                }
            }
        }
        if let CondvarPhase::Reacquiring { timed_out } = this.phase {
            if kernel.mutex_owner(this.mutex) == Some(this.actor) {
                kernel.actors.get_mut(this.actor).blocked_on = None;
                return Poll::Ready(if timed_out {
                    Err(ActivityError::Timeout)
                } else {
                    Ok(())
                });
            }
        }
        kernel.actors.get_mut(this.actor).blocked_on = Some(format!("waiting on condvar#{}", this.id.0));
        Poll::Pending
    }
}
