//! The node-voltage calculator family.
//!
//! Every calculator consumes the same per-unit problem: an admittance
//! matrix over the remaining unknowns (slack voltages are eliminated
//! upstream through the engine reduction), constant current injections and
//! PQ/PV bus data, and produces converged complex node voltages. Progress
//! and the relative power mismatch are published through a shared monitor
//! that a foreground thread may poll while the solve runs elsewhere.

use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use nalgebra::DVector;
use nalgebra_sparse::CscMatrix;
use num_complex::Complex64;
use num_derive::{FromPrimitive, ToPrimitive};
use serde::{Deserialize, Serialize};

use super::error::{ConfigError, GridResult, SolveError};

pub mod composite;
pub mod current_iteration;
pub mod fast_decoupled;
#[cfg(feature = "helm")]
pub mod helm;
pub mod newton;
pub mod node_potential;

pub use composite::{CombinedFallback, TwoStepMethod};
pub use current_iteration::CurrentIteration;
pub use fast_decoupled::FastDecoupled;
#[cfg(feature = "helm")]
pub use helm::HolomorphicEmbedding;
pub use newton::NewtonRaphson;
pub use node_potential::NodePotentialMethod;

/// Accuracy gate on the residual power mismatch applied on top of the
/// voltage-change criterion in the fixed-point iteration.
pub const MAXIMUM_RELATIVE_POWER_ERROR: f64 = 0.1;

/// A bus with specified complex power and unknown voltage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PqBus {
    pub index: usize,
    pub power: Complex64,
}

/// A bus with specified real power and voltage magnitude; reactive power
/// and angle are solved for.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PvBus {
    pub index: usize,
    pub real_power: f64,
    pub magnitude: f64,
}

/// Scaled single-level problem handed to a calculator.
#[derive(Debug, Clone)]
pub struct PowerFlowProblem {
    pub admittances: CscMatrix<Complex64>,
    /// Per-node sums of incident branch admittances, for the embedding
    /// method's diagonal stabilization.
    pub row_sums: DVector<Complex64>,
    /// Scale reference for stopping criteria; 1.0 in per-unit problems.
    pub nominal_voltage: f64,
    pub initial_voltages: DVector<Complex64>,
    pub constant_currents: DVector<Complex64>,
    pub pq_buses: Vec<PqBus>,
    pub pv_buses: Vec<PvBus>,
}

impl PowerFlowProblem {
    pub fn node_count(&self) -> usize {
        self.admittances.nrows()
    }

    /// Residual relative power mismatch of a voltage estimate.
    pub fn relative_power_error(&self, v: &DVector<Complex64>) -> f64 {
        let i_net = &self.admittances * v - &self.constant_currents;
        let s_calc = v.component_mul(&i_net.conjugate());
        let mut error = 0.0;
        let mut base = 0.0;
        for pq in &self.pq_buses {
            error += (s_calc[pq.index] - pq.power).norm();
            base += pq.power.norm();
        }
        for pv in &self.pv_buses {
            error += (s_calc[pv.index].re - pv.real_power).abs();
            base += pv.real_power.abs();
        }
        error / base.max(1.0)
    }
}

/// One advisory snapshot of a running solve.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ProgressSnapshot {
    /// In `[0, 1]`.
    pub progress: f64,
    pub relative_power_error: f64,
    pub iterations: usize,
}

/// Single-writer, multi-reader progress surface.
///
/// Cloning shares the underlying snapshot; [`ProgressMonitor::section`]
/// derives a view that maps its `[0, 1]` reports into a sub-range, which is
/// how composite calculators split progress among their stages.
#[derive(Debug, Clone)]
pub struct ProgressMonitor {
    shared: Arc<Mutex<ProgressSnapshot>>,
    offset: f64,
    scale: f64,
}

impl Default for ProgressMonitor {
    fn default() -> Self {
        Self {
            shared: Arc::new(Mutex::new(ProgressSnapshot::default())),
            offset: 0.0,
            scale: 1.0,
        }
    }
}

impl ProgressMonitor {
    // The snapshot is plain data with no invariant spanning its fields, so
    // a poisoned lock still holds a usable value.
    fn lock(&self) -> std::sync::MutexGuard<'_, ProgressSnapshot> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn report(&self, progress: f64, relative_power_error: f64) {
        let mut snap = self.lock();
        snap.progress = self.offset + self.scale * progress.clamp(0.0, 1.0);
        snap.relative_power_error = relative_power_error;
    }

    pub fn set_iterations(&self, iterations: usize) {
        self.lock().iterations = iterations;
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        *self.lock()
    }

    pub fn reset(&self) {
        *self.lock() = ProgressSnapshot::default();
    }

    /// A view reporting into `[offset, offset + scale]` of this monitor's
    /// own range.
    pub fn section(&self, offset: f64, scale: f64) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            offset: self.offset + self.scale * offset,
            scale: self.scale * scale,
        }
    }
}

/// Common contract of the solver family.
///
/// A calculator instance is single-solve: progress is reset at the start of
/// each call and the instance must not be shared between overlapping
/// solves.
pub trait NodeVoltageCalculator: Send {
    /// Runs the solve. On non-convergence returns the recoverable collapse
    /// sentinel carrying the best iterate; a fault in an external solver
    /// backend is fatal and must not be retried by orchestration code.
    fn calculate_unknown_voltages(
        &mut self,
        problem: &PowerFlowProblem,
    ) -> Result<DVector<Complex64>, SolveError>;

    fn progress_handle(&self) -> &ProgressMonitor;

    /// Replaces the progress surface, used by composites to hand each stage
    /// a section of the parent range.
    fn attach_progress(&mut self, monitor: ProgressMonitor);

    fn progress(&self) -> f64 {
        self.progress_handle().snapshot().progress
    }

    fn relative_power_error(&self) -> f64 {
        self.progress_handle().snapshot().relative_power_error
    }

    fn reset_progress(&self) {
        self.progress_handle().reset();
    }
}

/// Construction parameters shared by the whole family.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalculatorConfig {
    /// Convergence threshold, strictly inside (0, 1).
    pub target_precision: f64,
    pub maximum_iterations: usize,
    /// Series length for the holomorphic embedding.
    pub coefficient_count: usize,
    /// Mantissa width for the arbitrary-precision stages.
    pub bit_precision: usize,
    /// Route linear solves through BiCGSTAB instead of the LU backend.
    pub use_iterative_solver: bool,
}

impl Default for CalculatorConfig {
    fn default() -> Self {
        Self {
            target_precision: 1e-5,
            maximum_iterations: 100,
            coefficient_count: 50,
            bit_precision: 64,
            use_iterative_solver: false,
        }
    }
}

impl CalculatorConfig {
    pub fn validate(&self) -> GridResult<()> {
        if !(self.target_precision > 0.0 && self.target_precision < 1.0) {
            return Err(ConfigError::InvalidPrecision(self.target_precision).into());
        }
        if self.maximum_iterations < 1 {
            return Err(ConfigError::InvalidIterationCount(self.maximum_iterations).into());
        }
        if self.coefficient_count < 3 {
            return Err(ConfigError::InvalidCoefficientCount(self.coefficient_count).into());
        }
        if self.bit_precision < 64 {
            return Err(ConfigError::InvalidBitPrecision(self.bit_precision).into());
        }
        Ok(())
    }
}

/// Selector surface over the calculator family.
///
/// The discriminants are the solver-kind codes of the native embedding
/// library, so a selection converts losslessly across the FFI boundary.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, FromPrimitive, ToPrimitive,
)]
pub enum SolverSelection {
    NodePotential = 0,
    CurrentIteration = 1,
    NewtonRaphson = 2,
    FastDecoupledLoadFlow = 3,
    HolomorphicEmbeddedLoadFlow = 4,
    HolomorphicEmbeddedLoadFlowWithCurrentIteration = 5,
    HolomorphicEmbeddedLoadFlowWithNewtonRaphson = 6,
}

impl SolverSelection {
    /// Builds the selected calculator after validating the configuration.
    pub fn build(&self, config: &CalculatorConfig) -> GridResult<Box<dyn NodeVoltageCalculator>> {
        config.validate()?;
        match self {
            SolverSelection::NodePotential => Ok(Box::new(NodePotentialMethod::new(config))),
            SolverSelection::CurrentIteration => Ok(Box::new(CurrentIteration::new(config))),
            SolverSelection::NewtonRaphson => Ok(Box::new(NewtonRaphson::new(config))),
            SolverSelection::FastDecoupledLoadFlow => Ok(Box::new(FastDecoupled::new(config))),
            SolverSelection::HolomorphicEmbeddedLoadFlow => build_helm(config),
            SolverSelection::HolomorphicEmbeddedLoadFlowWithCurrentIteration => {
                let first = build_helm(config)?;
                Ok(Box::new(TwoStepMethod::new(
                    first,
                    Box::new(CurrentIteration::new(config)),
                )))
            }
            SolverSelection::HolomorphicEmbeddedLoadFlowWithNewtonRaphson => {
                let first = build_helm(config)?;
                Ok(Box::new(TwoStepMethod::new(
                    first,
                    Box::new(NewtonRaphson::new(config)),
                )))
            }
        }
    }
}

#[cfg(feature = "helm")]
fn build_helm(config: &CalculatorConfig) -> GridResult<Box<dyn NodeVoltageCalculator>> {
    Ok(Box::new(HolomorphicEmbedding::new(config)))
}

#[cfg(not(feature = "helm"))]
fn build_helm(_config: &CalculatorConfig) -> GridResult<Box<dyn NodeVoltageCalculator>> {
    Err(ConfigError::SolverUnavailable("holomorphic embedding").into())
}

/// The default escalation cascade: cheap fixed-point iteration first,
/// Newton-Raphson on collapse, the embedding stages when available.
pub fn default_fallback(config: &CalculatorConfig) -> GridResult<CombinedFallback> {
    let mut stages: Vec<Box<dyn NodeVoltageCalculator>> = vec![
        SolverSelection::CurrentIteration.build(config)?,
        SolverSelection::NewtonRaphson.build(config)?,
    ];
    #[cfg(feature = "helm")]
    {
        stages.push(SolverSelection::HolomorphicEmbeddedLoadFlowWithNewtonRaphson.build(config)?);
        stages.push(SolverSelection::HolomorphicEmbeddedLoadFlow.build(config)?);
    }
    Ok(CombinedFallback::new(stages))
}

/// Handle to a solve running on a worker thread.
///
/// The foreground may poll [`BackgroundSolve::progress`] or simply drop the
/// handle; the computation itself always runs to completion or to the
/// iteration cap.
pub struct BackgroundSolve {
    monitor: ProgressMonitor,
    handle: JoinHandle<Result<DVector<Complex64>, SolveError>>,
}

impl BackgroundSolve {
    pub fn progress(&self) -> ProgressSnapshot {
        self.monitor.snapshot()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn join(self) -> Result<DVector<Complex64>, SolveError> {
        self.handle.join().expect("solver thread panicked")
    }
}

/// Offloads one solve to a worker thread.
pub fn solve_in_background(
    mut calculator: Box<dyn NodeVoltageCalculator>,
    problem: PowerFlowProblem,
) -> BackgroundSolve {
    let monitor = calculator.progress_handle().clone();
    let handle = thread::spawn(move || calculator.calculate_unknown_voltages(&problem));
    BackgroundSolve { monitor, handle }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn config_bounds_are_enforced() {
        let ok = CalculatorConfig::default();
        assert!(ok.validate().is_ok());
        assert!(
            CalculatorConfig {
                target_precision: 0.0,
                ..ok.clone()
            }
            .validate()
            .is_err()
        );
        assert!(
            CalculatorConfig {
                maximum_iterations: 0,
                ..ok.clone()
            }
            .validate()
            .is_err()
        );
        assert!(
            CalculatorConfig {
                coefficient_count: 2,
                ..ok.clone()
            }
            .validate()
            .is_err()
        );
        assert!(
            CalculatorConfig {
                bit_precision: 32,
                ..ok
            }
            .validate()
            .is_err()
        );
    }

    #[test]
    fn selection_maps_to_native_codes() {
        use num_traits::{FromPrimitive, ToPrimitive};
        assert_eq!(SolverSelection::NewtonRaphson.to_i64(), Some(2));
        assert_eq!(
            SolverSelection::from_i64(4),
            Some(SolverSelection::HolomorphicEmbeddedLoadFlow)
        );
        assert_eq!(SolverSelection::from_i64(7), None);
    }

    #[test]
    fn progress_sections_nest() {
        let root = ProgressMonitor::default();
        let second_half = root.section(0.5, 0.5);
        second_half.report(0.5, 0.2);
        let snap = root.snapshot();
        assert_relative_eq!(snap.progress, 0.75);
        assert_relative_eq!(snap.relative_power_error, 0.2);

        let nested = second_half.section(0.0, 0.5);
        nested.report(1.0, 0.1);
        assert_relative_eq!(root.snapshot().progress, 0.75);

        root.reset();
        assert_eq!(root.snapshot(), ProgressSnapshot::default());
    }

    #[test]
    fn monitor_survives_a_panicked_writer() {
        let monitor = ProgressMonitor::default();
        let shared = monitor.clone();
        let _ = thread::spawn(move || {
            let _guard = shared.shared.lock().unwrap();
            panic!("writer died mid-report");
        })
        .join();

        monitor.report(0.5, 0.1);
        let snap = monitor.snapshot();
        assert_relative_eq!(snap.progress, 0.5);
        assert_relative_eq!(snap.relative_power_error, 0.1);
    }
}
