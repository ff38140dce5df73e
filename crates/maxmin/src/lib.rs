//! Max-min fair sharing of linear resource constraints.
//!
//! A [System] holds a bipartite graph of [constraints](ConstraintId) (resources with a
//! capacity) and [variables](VariableId) (consumers with a weight and an optional rate
//! bound). [System::solve] assigns to every variable the rate it obtains under
//! progressive filling: the bottleneck resource is saturated first, its users are frozen
//! at their fair share, and the procedure repeats on the remaining capacity.
//!
//! All comparisons go through a configurable [precision](Precision) so that results are
//! stable under floating-point noise, and all tie-breaks follow insertion order so that
//! repeated runs produce bit-identical allocations.

pub mod precision;
pub mod system;

pub use precision::{Precision, DEFAULT_PRECISION};
pub use system::{ConstraintId, System, VariableId, UNBOUNDED};
