//! Simulation-wide configuration knobs.

use serde::{Deserialize, Serialize};

use platsim_maxmin::DEFAULT_PRECISION;

/// Which network model backs communications.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkModelKind {
    /// Max-min fair bandwidth sharing over the routed links (default).
    Shared,
    /// Fixed transfer time, no contention: latency plus size over peak bandwidth.
    Constant,
}

/// Which CPU model backs executions. Only fair sharing is implemented.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CpuModelKind {
    Shared,
}

/// Which disk model backs I/O operations. Only fair sharing is implemented.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiskModelKind {
    Shared,
}

/// Recognized options and their effects, deserializable from YAML alongside the
/// platform description.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Solver tolerance for all time and rate comparisons (`precision/work`).
    pub precision_work: f64,
    /// Scalar correction applied to the latency of every communication.
    pub latency_factor: f64,
    /// Scalar correction applied to the bandwidth bound of every communication.
    pub bandwidth_factor: f64,
    /// When on, every send also installs a reverse phantom flow with 5% weight.
    pub crosstraffic: bool,
    /// Network model selection (`network/model`).
    pub network_model: NetworkModelKind,
    /// CPU model selection (`cpu/model`).
    pub cpu_model: CpuModelKind,
    /// Disk model selection (`disk/model`).
    pub disk_model: DiskModelKind,
    /// Virtual time at which to stop with [EngineError::Breakpoint](crate::EngineError::Breakpoint).
    pub breakpoint: Option<f64>,
    /// Recompute only the touched solver components instead of the whole system.
    pub selective_update: bool,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig {
            precision_work: DEFAULT_PRECISION,
            latency_factor: 1.0,
            bandwidth_factor: 1.0,
            crosstraffic: false,
            network_model: NetworkModelKind::Shared,
            cpu_model: CpuModelKind::Shared,
            disk_model: DiskModelKind::Shared,
            breakpoint: None,
            selective_update: true,
        }
    }
}
