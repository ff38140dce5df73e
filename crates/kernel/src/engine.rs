//! The maestro: owns every kernel table and drives the simulation rounds.

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::future::Future;
use std::path::Path;
use std::rc::Rc;
use std::task::{Context, Poll};

use futures::future::{FutureExt, LocalBoxFuture};
use rand::SeedableRng;
use rand_pcg::Pcg64;

use platsim_maxmin::{Precision, System};

use crate::activity::{Activities, ActivityEvent};
use crate::actor::{ActorId, Actors};
use crate::config::{NetworkModelKind, SimulationConfig};
use crate::context::ActorContext;
use crate::error::{DeadlockEntry, EngineError};
use crate::log_error;
use crate::mailbox::Mailboxes;
use crate::platform::{DiskId, HostId, LinkId, Platform, PlatformConfig};
use crate::resource::cpu::CpuModel;
use crate::resource::disk::DiskModel;
use crate::resource::network::{ConstantNetworkModel, NetworkModel, SharedNetworkModel};
use crate::resource::{Completions, Resources, StateToggle};
use crate::signal::Signal;
use crate::stats::RunStats;
use crate::sync::SyncTable;
use crate::timer::{ScheduledEvent, TimerHeap};

/// Callback buses fired synchronously from the maestro.
#[derive(Default)]
pub(crate) struct Signals {
    pub host_creation: Signal<HostId>,
    pub host_state_change: Signal<(HostId, bool)>,
    pub disk_state_change: Signal<(DiskId, bool)>,
    pub link_state_change: Signal<(LinkId, bool)>,
    pub actor_creation: Signal<ActorId>,
    pub actor_destruction: Signal<ActorId>,
    pub activity_start: Signal<ActivityEvent>,
    pub activity_completion: Signal<ActivityEvent>,
    pub deadlock: Signal<Vec<DeadlockEntry>>,
    pub simulation_end: Signal<f64>,
}

/// All simulation state mutated between simcall boundaries.
pub(crate) struct Kernel {
    pub clock: f64,
    pub config: SimulationConfig,
    pub res: Resources,
    pub cpu: CpuModel,
    pub disk: DiskModel,
    pub network: Box<dyn NetworkModel>,
    pub activities: Activities,
    pub actors: Actors,
    pub run_queue: VecDeque<ActorId>,
    pub tasks: VecDeque<Box<dyn FnOnce(&mut Kernel)>>,
    pub mailboxes: Mailboxes,
    pub sync: SyncTable,
    pub timers: TimerHeap,
    pub signals: Signals,
    pub rng: Pcg64,
    pub stats: RunStats,
    /// Killed actors whose futures the engine still has to drop.
    pub trash: Vec<ActorId>,
}

fn make_network_model(config: &SimulationConfig) -> Box<dyn NetworkModel> {
    match config.network_model {
        NetworkModelKind::Shared => Box::new(SharedNetworkModel {
            latency_factor: config.latency_factor,
            bandwidth_factor: config.bandwidth_factor,
            crosstraffic: config.crosstraffic,
        }),
        NetworkModelKind::Constant => Box::new(ConstantNetworkModel {
            duration: config.latency_factor,
        }),
    }
}

impl Kernel {
    fn new(seed: u64, config: SimulationConfig) -> Self {
        let precision = Precision::new(config.precision_work);
        let mut system = System::new(config.selective_update);
        system.set_precision(precision);
        Kernel {
            clock: 0.0,
            network: make_network_model(&config),
            config,
            res: Resources {
                system,
                actions: Default::default(),
                platform: Platform::empty(),
                precision,
            },
            cpu: CpuModel,
            disk: DiskModel,
            activities: Activities::default(),
            actors: Actors::default(),
            run_queue: VecDeque::new(),
            tasks: VecDeque::new(),
            mailboxes: Mailboxes::default(),
            sync: SyncTable::default(),
            timers: TimerHeap::default(),
            signals: Signals::default(),
            rng: Pcg64::seed_from_u64(seed),
            stats: RunStats::default(),
            trash: Vec::new(),
        }
    }

    pub fn time(&self) -> f64 {
        self.clock
    }

    pub fn label(&self) -> &'static str {
        "maestro"
    }

    /// Settles every activity whose action moved to the done/failed set, in the
    /// deterministic order the models produced them.
    pub(crate) fn process_completions(&mut self, completions: Completions) {
        for (action, outcome) in completions {
            // The action may be gone already if its activity was settled earlier in the
            // same batch (an activity and its timeout detector racing to the same
            // instant).
            let Some(activity) = self.res.actions.try_get(action).map(|a| a.activity) else {
                continue;
            };
            self.on_action_complete(activity, outcome);
        }
    }

    fn apply_toggles(&mut self, toggles: Vec<StateToggle>) {
        for toggle in toggles {
            match toggle {
                StateToggle::Host(host, on) => self.set_host_state(host, on),
                StateToggle::Disk(disk, on) => self.set_disk_state(disk, on),
                StateToggle::Link(link, on) => self.set_link_state(link, on),
            }
        }
    }

    pub(crate) fn apply_scheduled(&mut self, event: ScheduledEvent) {
        match event {
            ScheduledEvent::HostOn(host) => self.set_host_state(host, true),
            ScheduledEvent::HostOff(host) => self.set_host_state(host, false),
            ScheduledEvent::DiskOn(disk) => self.set_disk_state(disk, true),
            ScheduledEvent::DiskOff(disk) => self.set_disk_state(disk, false),
            ScheduledEvent::LinkOn(link) => self.set_link_state(link, true),
            ScheduledEvent::LinkOff(link) => self.set_link_state(link, false),
            ScheduledEvent::SetPstate(host, pstate) => self.set_pstate(host, pstate),
        }
    }

    /// Turns a host on or off. Turning off fails every action it carries and kills the
    /// actors living on it.
    pub(crate) fn set_host_state(&mut self, host: HostId, on: bool) {
        if self.res.platform.host(host).is_on == on {
            return;
        }
        self.res.platform.host_mut(host).is_on = on;
        let capacity = self.res.platform.host(host).capacity();
        let constraint = self.res.platform.host(host).constraint;
        self.res.system.update_constraint_capacity(constraint, capacity);
        if !on {
            let mut completions = Vec::new();
            self.res.fail_actions_on_host(host, &mut completions);
            self.process_completions(completions);
            let victims = self.res.platform.host(host).actors.clone();
            for actor in victims {
                self.kill_actor(actor);
            }
        }
        self.signals.host_state_change.emit(&(host, on));
    }

    pub(crate) fn set_disk_state(&mut self, disk: DiskId, on: bool) {
        if self.res.platform.disk(disk).is_on == on {
            return;
        }
        self.res.platform.disk_mut(disk).is_on = on;
        if !on {
            let mut completions = Vec::new();
            self.res.fail_actions_on_disk(disk, &mut completions);
            self.process_completions(completions);
        }
        self.signals.disk_state_change.emit(&(disk, on));
    }

    pub(crate) fn set_link_state(&mut self, link: LinkId, on: bool) {
        if self.res.platform.link(link).is_on == on {
            return;
        }
        self.res.platform.link_mut(link).is_on = on;
        if !on {
            let mut completions = Vec::new();
            self.res.fail_actions_on_link(link, &mut completions);
            self.process_completions(completions);
        }
        self.signals.link_state_change.emit(&(link, on));
    }

    pub(crate) fn set_pstate(&mut self, host: HostId, pstate: usize) {
        {
            let host = self.res.platform.host_mut(host);
            assert!(pstate < host.speeds.len(), "host {} has no p-state {}", host.name, pstate);
            host.pstate = pstate;
        }
        let capacity = self.res.platform.host(host).capacity();
        let constraint = self.res.platform.host(host).constraint;
        self.res.system.update_constraint_capacity(constraint, capacity);
    }
}

/// Owns the actor futures, keyed by actor id.
#[derive(Default)]
pub(crate) struct FuturesTable {
    map: BTreeMap<usize, LocalBoxFuture<'static, ()>>,
}

impl FuturesTable {
    pub fn insert(&mut self, id: ActorId, future: LocalBoxFuture<'static, ()>) {
        self.map.insert(id.0, future);
    }

    pub fn remove(&mut self, id: ActorId) -> Option<LocalBoxFuture<'static, ()>> {
        self.map.remove(&id.0)
    }
}

type ActorFactory = Rc<dyn Fn(ActorContext) -> LocalBoxFuture<'static, ()>>;

enum RoundStep {
    Continue,
    Finished,
    Deadlock(Vec<DeadlockEntry>),
    Breakpoint(f64),
}

/// The simulation engine: platform setup, actor deployment and the main time-advance
/// loop coupling the scheduler with the resource models.
pub struct Engine {
    kernel: Rc<RefCell<Kernel>>,
    futures: Rc<RefCell<FuturesTable>>,
    registry: BTreeMap<String, ActorFactory>,
}

impl Engine {
    pub fn new(seed: u64) -> Self {
        Engine {
            kernel: Rc::new(RefCell::new(Kernel::new(seed, SimulationConfig::default()))),
            futures: Rc::new(RefCell::new(FuturesTable::default())),
            registry: BTreeMap::new(),
        }
    }

    pub fn with_config(seed: u64, config: SimulationConfig) -> Self {
        Engine {
            kernel: Rc::new(RefCell::new(Kernel::new(seed, config))),
            futures: Rc::new(RefCell::new(FuturesTable::default())),
            registry: BTreeMap::new(),
        }
    }

    /// Replaces the configuration. Call before building the platform.
    pub fn set_config(&mut self, config: SimulationConfig) {
        let mut kernel = self.kernel.borrow_mut();
        let precision = Precision::new(config.precision_work);
        kernel.res.precision = precision;
        kernel.res.system.set_precision(precision);
        kernel.network = make_network_model(&config);
        kernel.config = config;
    }

    /// Builds the platform from its description, firing the creation signals.
    pub fn build_platform(&mut self, config: &PlatformConfig) -> Result<(), EngineError> {
        let mut kernel = self.kernel.borrow_mut();
        let now = kernel.clock;
        let platform = Platform::build(config, &mut kernel.res.system, now)?;
        let host_count = platform.hosts.len();
        kernel.res.platform = platform;
        for idx in 0..host_count {
            kernel.signals.host_creation.emit(&HostId(idx));
        }
        Ok(())
    }

    /// Loads and builds a platform from a YAML description file.
    pub fn load_platform<P: AsRef<Path>>(&mut self, path: P) -> Result<(), EngineError> {
        self.build_platform(&PlatformConfig::from_yaml(path))
    }

    /// Registers an actor implementation under a name for config-driven deployment.
    pub fn register_actor_code<F, Fut>(&mut self, name: &str, factory: F)
    where
        F: Fn(ActorContext) -> Fut + 'static,
        Fut: Future<Output = ()> + 'static,
    {
        self.registry
            .insert(name.to_string(), Rc::new(move |ctx| factory(ctx).boxed_local()));
    }

    /// Spawns an actor from the registered code under its own name.
    pub fn spawn_registered(&mut self, code: &str, name: &str, host: HostId) -> Result<ActorId, EngineError> {
        let factory = self
            .registry
            .get(code)
            .cloned()
            .ok_or_else(|| EngineError::Config(format!("no actor code registered under '{}'", code)))?;
        let id = self.kernel.borrow_mut().add_actor(name, host, false);
        let ctx = self.context_for(id);
        self.futures.borrow_mut().insert(id, factory(ctx));
        Ok(id)
    }

    /// Spawns an actor running the given async function.
    pub fn spawn<F, Fut>(&mut self, name: &str, host: HostId, f: F) -> ActorId
    where
        F: FnOnce(ActorContext) -> Fut,
        Fut: Future<Output = ()> + 'static,
    {
        let id = self.kernel.borrow_mut().add_actor(name, host, false);
        let ctx = self.context_for(id);
        self.futures.borrow_mut().insert(id, f(ctx).boxed_local());
        id
    }

    /// Spawns a daemon actor: killed automatically once only daemons remain.
    pub fn spawn_daemon<F, Fut>(&mut self, name: &str, host: HostId, f: F) -> ActorId
    where
        F: FnOnce(ActorContext) -> Fut,
        Fut: Future<Output = ()> + 'static,
    {
        let id = self.kernel.borrow_mut().add_actor(name, host, true);
        let ctx = self.context_for(id);
        self.futures.borrow_mut().insert(id, f(ctx).boxed_local());
        id
    }

    fn context_for(&self, id: ActorId) -> ActorContext {
        ActorContext {
            kernel: Rc::clone(&self.kernel),
            futures: Rc::clone(&self.futures),
            actor: id,
        }
    }

    pub fn clock(&self) -> f64 {
        self.kernel.borrow().clock
    }

    pub fn stats(&self) -> RunStats {
        self.kernel.borrow().stats.clone()
    }

    pub fn host_by_name(&self, name: &str) -> Option<HostId> {
        self.kernel.borrow().res.platform.host_by_name(name)
    }

    /// All platform hosts in declaration order.
    pub fn hosts(&self) -> Vec<HostId> {
        (0..self.kernel.borrow().res.platform.hosts.len()).map(HostId).collect()
    }

    pub fn host_name(&self, host: HostId) -> String {
        self.kernel.borrow().res.platform.host(host).name.clone()
    }

    pub fn disk_by_name(&self, name: &str) -> Option<DiskId> {
        self.kernel.borrow().res.platform.disk_by_name(name)
    }

    pub fn link_by_name(&self, name: &str) -> Option<LinkId> {
        self.kernel.borrow().res.platform.link_by_name(name)
    }

    /// Schedules a platform state change at an absolute virtual time.
    pub fn schedule(&mut self, time: f64, event: ScheduledEvent) {
        self.kernel.borrow_mut().timers.schedule(time, event);
    }

    pub fn on_deadlock(&mut self, handler: impl Fn(&Vec<DeadlockEntry>) + 'static) {
        self.kernel.borrow_mut().signals.deadlock.connect(handler);
    }

    pub fn on_simulation_end(&mut self, handler: impl Fn(&f64) + 'static) {
        self.kernel.borrow_mut().signals.simulation_end.connect(handler);
    }

    pub fn on_host_state_change(&mut self, handler: impl Fn(&(HostId, bool)) + 'static) {
        self.kernel.borrow_mut().signals.host_state_change.connect(handler);
    }

    pub fn on_link_state_change(&mut self, handler: impl Fn(&(LinkId, bool)) + 'static) {
        self.kernel.borrow_mut().signals.link_state_change.connect(handler);
    }

    pub fn on_disk_state_change(&mut self, handler: impl Fn(&(DiskId, bool)) + 'static) {
        self.kernel.borrow_mut().signals.disk_state_change.connect(handler);
    }

    pub fn on_actor_creation(&mut self, handler: impl Fn(&ActorId) + 'static) {
        self.kernel.borrow_mut().signals.actor_creation.connect(handler);
    }

    pub fn on_actor_destruction(&mut self, handler: impl Fn(&ActorId) + 'static) {
        self.kernel.borrow_mut().signals.actor_destruction.connect(handler);
    }

    pub fn on_activity_start(&mut self, handler: impl Fn(&ActivityEvent) + 'static) {
        self.kernel.borrow_mut().signals.activity_start.connect(handler);
    }

    pub fn on_activity_completion(&mut self, handler: impl Fn(&ActivityEvent) + 'static) {
        self.kernel.borrow_mut().signals.activity_completion.connect(handler);
    }

    /// Runs the simulation to completion and returns the final clock.
    pub fn run(&mut self) -> Result<f64, EngineError> {
        loop {
            self.drain_actors_and_tasks();
            self.collect_trash();

            {
                let mut kernel = self.kernel.borrow_mut();
                if kernel.actors.only_daemons_left() && kernel.run_queue.is_empty() && kernel.tasks.is_empty() {
                    for id in kernel.actors.alive_ids() {
                        kernel.kill_actor(id);
                    }
                }
            }
            self.collect_trash();
            {
                let kernel = self.kernel.borrow();
                if !kernel.run_queue.is_empty() || !kernel.tasks.is_empty() {
                    continue;
                }
            }

            let step = self.resource_round();
            self.collect_trash();
            match step {
                RoundStep::Continue => {}
                RoundStep::Finished => break,
                RoundStep::Breakpoint(time) => return Err(EngineError::Breakpoint(time)),
                RoundStep::Deadlock(entries) => {
                    let kernel = self.kernel.borrow();
                    for entry in entries.iter() {
                        log_error!(
                            kernel,
                            "deadlock: actor '{}' is {}",
                            entry.actor,
                            entry.waiting_on
                        );
                    }
                    kernel.signals.deadlock.emit(&entries);
                    drop(kernel);
                    return Err(EngineError::Deadlock(entries));
                }
            }
        }
        let mut kernel = self.kernel.borrow_mut();
        let clock = kernel.clock;
        kernel.stats.makespan = clock;
        kernel.signals.simulation_end.emit(&clock);
        Ok(clock)
    }

    /// The actor sub-round: drain deferred tasks, then poll runnable actors in FIFO
    /// order, repeating until both queues are stable.
    fn drain_actors_and_tasks(&self) {
        loop {
            loop {
                let task = self.kernel.borrow_mut().tasks.pop_front();
                match task {
                    Some(task) => {
                        let mut kernel = self.kernel.borrow_mut();
                        task(&mut kernel);
                        drop(kernel);
                    }
                    None => break,
                }
            }
            let next = self.kernel.borrow_mut().pop_runnable();
            match next {
                Some(actor) => self.poll_actor(actor),
                None => {
                    if self.kernel.borrow().tasks.is_empty() {
                        break;
                    }
                }
            }
        }
    }

    fn poll_actor(&self, id: ActorId) {
        let future = self.futures.borrow_mut().remove(id);
        let Some(mut future) = future else {
            // Nothing to run (already finished); make sure the books agree.
            self.kernel.borrow_mut().on_actor_completed(id);
            return;
        };
        let waker = futures::task::noop_waker();
        let mut cx = Context::from_waker(&waker);
        match future.as_mut().poll(&mut cx) {
            Poll::Ready(()) => {
                drop(future);
                self.kernel.borrow_mut().on_actor_completed(id);
            }
            Poll::Pending => {
                if self.kernel.borrow().actors.get(id).alive {
                    self.futures.borrow_mut().insert(id, future);
                } else {
                    drop(future);
                }
            }
        }
    }

    /// Drops the futures of killed actors, outside any kernel borrow.
    fn collect_trash(&self) {
        let dead: Vec<ActorId> = std::mem::take(&mut self.kernel.borrow_mut().trash);
        for id in dead {
            let future = self.futures.borrow_mut().remove(id);
            drop(future);
        }
    }

    /// The resource sub-round: pick the earliest event horizon over all models and the
    /// timer heap, advance the clock there, update every model and fire due timers.
    fn resource_round(&self) -> RoundStep {
        let mut kernel = self.kernel.borrow_mut();
        let kernel = &mut *kernel;
        kernel.res.system.solve();
        let now = kernel.clock;
        let eps = kernel.res.precision.work;

        // With nobody alive and nothing in flight there is no point draining the
        // remaining profile events; the simulation is over.
        let any_running_action = kernel
            .res
            .actions
            .ids()
            .into_iter()
            .any(|id| kernel.res.actions.get(id).is_running());
        if kernel.actors.alive_count() == 0 && !any_running_action && kernel.timers.is_empty() {
            return RoundStep::Finished;
        }

        let mut t_next: Option<f64> = None;
        let mut consider_abs = |time: f64| {
            t_next = Some(t_next.map_or(time, |t| f64::min(t, time)));
        };
        for delta in [
            kernel.cpu.next_event(&kernel.res, now),
            kernel.disk.next_event(&kernel.res, now),
            kernel.network.next_event(&kernel.res, now),
        ]
        .into_iter()
        .flatten()
        {
            consider_abs(now + delta);
        }
        if let Some(time) = kernel.timers.peek_time() {
            consider_abs(f64::max(time, now));
        }

        let target = match t_next {
            Some(t) => t,
            None => {
                if kernel.actors.alive_count() > 0 {
                    let entries = kernel
                        .actors
                        .alive_ids()
                        .into_iter()
                        .map(|id| {
                            let actor = kernel.actors.get(id);
                            DeadlockEntry {
                                actor: actor.name.clone(),
                                waiting_on: actor
                                    .blocked_on
                                    .clone()
                                    .unwrap_or_else(|| "blocked outside any simcall".to_string()),
                            }
                        })
                        .collect();
                    return RoundStep::Deadlock(entries);
                }
                return RoundStep::Finished;
            }
        };

        if let Some(breakpoint) = kernel.config.breakpoint {
            if breakpoint > now && breakpoint <= target {
                kernel.clock = breakpoint;
                return RoundStep::Breakpoint(breakpoint);
            }
        }

        let delta = f64::max(target - now, 0.0);
        kernel.clock = target;
        let mut completions = Vec::new();
        let mut toggles = Vec::new();
        {
            let Kernel {
                cpu,
                disk,
                network,
                res,
                ..
            } = kernel;
            cpu.update(res, target, delta, &mut completions, &mut toggles);
            disk.update(res, target, delta, &mut completions, &mut toggles);
            network.update(res, target, delta, &mut completions, &mut toggles);
        }
        kernel.process_completions(completions);
        kernel.apply_toggles(toggles);
        while let Some(event) = kernel.timers.pop_due(kernel.clock, eps) {
            kernel.apply_scheduled(event);
        }
        RoundStep::Continue
    }
}
