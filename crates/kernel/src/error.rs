//! Failures surfaced to actors and to the engine caller.

use thiserror::Error;

/// Why an activity ended without doing its work. Returned to the actor that waits on
/// the activity; resource failures and timeouts are recoverable, the actor decides what
/// to do next.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum ActivityError {
    /// A host involved in the activity was turned off while it was running.
    #[error("host failure")]
    HostFailure,
    /// A link on the communication path was turned off.
    #[error("network failure")]
    NetworkFailure,
    /// The disk backing an I/O operation was turned off.
    #[error("storage failure")]
    StorageFailure,
    /// A `wait_for`/timed acquire expired before the activity completed.
    #[error("timeout")]
    Timeout,
    /// The activity was canceled.
    #[error("canceled")]
    Canceled,
}

/// One line of the deadlock diagnostic: an actor and what it was blocked on.
#[derive(Clone, Debug)]
pub struct DeadlockEntry {
    pub actor: String,
    pub waiting_on: String,
}

/// Errors terminating the whole simulation.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Actors remain but nothing can ever wake them up.
    #[error("deadlock: {} actor(s) blocked forever", .0.len())]
    Deadlock(Vec<DeadlockEntry>),
    /// The configured breakpoint time was reached.
    #[error("breakpoint reached at t={0}")]
    Breakpoint(f64),
    /// Bad configuration or platform description.
    #[error("configuration error: {0}")]
    Config(String),
}
