//! Error taxonomy for assembly and solving.
//!
//! Errors split into four categories with different recovery semantics:
//! configuration errors and topology errors fail fast before any numeric
//! work, a [`VoltageCollapse`] is a recoverable sentinel carrying the best
//! iterate so orchestration code can escalate to a stronger calculator, and
//! external-solver faults are fatal.

use nalgebra::DVector;
use num_complex::Complex64;
use thiserror::Error;

/// Invalid parameters or references, rejected at construction/assembly time.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("node index {index} out of range for {count} nodes")]
    IndexOutOfRange { index: i64, count: usize },

    #[error("{expected} known indices but {got} known voltages")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("duplicate node id {0}")]
    DuplicateNodeId(i64),

    #[error("element references unknown node id {0}")]
    UnknownNodeId(i64),

    #[error("target precision {0} outside (0, 1)")]
    InvalidPrecision(f64),

    #[error("maximum iterations must be at least 1, got {0}")]
    InvalidIterationCount(usize),

    #[error("coefficient count must be at least 3, got {0}")]
    InvalidCoefficientCount(usize),

    #[error("bit precision must be at least 64, got {0}")]
    InvalidBitPrecision(usize),

    #[error("solver selection {0} requires the `helm` feature")]
    SolverUnavailable(&'static str),

    #[error("{0}")]
    InvalidParameter(String),
}

/// Structural defects detected by the validation passes before any solve.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TopologyError {
    #[error("floating nodes not reachable from any source: {0:?}")]
    FloatingNodes(Vec<i64>),

    #[error("node {node} is overdetermined: {detail}")]
    OverdeterminedBus { node: i64, detail: String },

    #[error("more than one slack source in the network (nodes {0:?})")]
    MultipleSlacks(Vec<i64>),

    #[error(
        "contradictory phase shift at node {node}: {existing} deg along one path, {conflicting} deg along another"
    )]
    PhaseShiftContradiction {
        node: i64,
        existing: f64,
        conflicting: f64,
    },

    #[error("line between nodes {from} and {to} spans nominal voltages {v_from} V and {v_to} V")]
    NominalVoltageMismatch {
        from: i64,
        to: i64,
        v_from: f64,
        v_to: f64,
    },

    #[error("network has no slack source")]
    NoSlack,
}

/// Numeric non-convergence. Recoverable: carries the last iterate so a
/// fallback calculator can warm-start from it.
#[derive(Error, Debug, Clone)]
#[error("voltage collapse after {iterations} iterations (relative power error {relative_power_error:.3e})")]
pub struct VoltageCollapse {
    pub best_iterate: DVector<Complex64>,
    pub iterations: usize,
    pub relative_power_error: f64,
}

/// What a calculator solve can fail with: the recoverable collapse
/// sentinel, or a fatal external-solver fault that no fallback stage may
/// retry past.
#[derive(Error, Debug)]
pub enum SolveError {
    #[error(transparent)]
    Collapse(#[from] VoltageCollapse),

    #[error("external solver fault: {0}")]
    External(String),
}

impl SolveError {
    /// The collapse sentinel, when the failure is recoverable.
    pub fn collapse(self) -> Option<VoltageCollapse> {
        match self {
            SolveError::Collapse(collapse) => Some(collapse),
            SolveError::External(_) => None,
        }
    }
}

#[cfg(feature = "helm")]
impl From<gridflow_sol_helm::HelmError> for SolveError {
    fn from(fault: gridflow_sol_helm::HelmError) -> Self {
        SolveError::External(fault.to_string())
    }
}

/// Umbrella error for the crate surface.
#[derive(Error, Debug)]
pub enum GridError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Topology(#[from] TopologyError),

    #[error(transparent)]
    Collapse(#[from] VoltageCollapse),

    #[error("external solver fault: {0}")]
    ExternalSolver(String),

    #[error("linear solver failed: {0}")]
    LinearSolve(&'static str),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("network file parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

impl From<SolveError> for GridError {
    fn from(error: SolveError) -> Self {
        match error {
            SolveError::Collapse(collapse) => GridError::Collapse(collapse),
            SolveError::External(fault) => GridError::ExternalSolver(fault),
        }
    }
}

pub type GridResult<T> = Result<T, GridError>;
