//! Discrete-event simulation kernel for distributed applications.
//!
//! User-level actors run cooperatively on a modeled platform of hosts, disks and
//! network links. The engine alternates between running actors until they block on a
//! simulated activity (compute, I/O, communication, synchronization) and solving a
//! global max-min fair sharing problem to decide which activities complete next.
//! Simulations are bit-reproducible: actor dispatch is FIFO in creation order and every
//! solver tie-break follows insertion order.

pub mod activity;
pub mod actor;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod experiment;
mod log;
pub mod mailbox;
pub mod platform;
pub mod profile;
pub mod resource;
pub mod routing;
pub mod signal;
pub mod stats;
pub mod sync;
pub mod timer;

pub use activity::{ActivityEvent, ActivityId, ActivityState};
pub use actor::ActorId;
pub use config::{CpuModelKind, DiskModelKind, NetworkModelKind, SimulationConfig};
pub use context::{
    ActivityRef, ActorContext, CommRef, ConditionVariable, ExecBuilder, Mutex, Semaphore, WaitAnyFuture, WaitFuture,
};
pub use engine::Engine;
pub use error::{ActivityError, DeadlockEntry, EngineError};
pub use experiment::{Experiment, RunResult, ScenarioResolver};
pub use platform::{
    DiskConfig, DiskId, HostConfig, HostId, LinkConfig, LinkId, OpType, PlatformConfig, RouteConfig, SharingPolicy,
};
pub use profile::Profile;
pub use resource::ActionId;
pub use routing::{FullRouting, RouteEntry, Routing};
pub use stats::RunStats;
pub use sync::{CondvarId, MutexId, SemaphoreId};
pub use timer::ScheduledEvent;
