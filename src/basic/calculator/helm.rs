//! Calculator backed by the native holomorphic embedding solver.
//!
//! The problem is marshalled element-by-element across the FFI boundary,
//! the native side expands the voltage power series, and the result is read
//! back as ordinary complex voltages. The native solver is allocated per
//! solve; its handle lifetime is managed by [`HelmSolver`].

use gridflow_sol_helm::{HelmConfig, HelmError, HelmSolver};
use nalgebra::DVector;
use num_complex::Complex64;
use num_traits::ToPrimitive;
use tracing::{debug, error};

use crate::basic::error::{SolveError, VoltageCollapse};

use super::{
    CalculatorConfig, MAXIMUM_RELATIVE_POWER_ERROR, NodeVoltageCalculator, PowerFlowProblem,
    ProgressMonitor, SolverSelection,
};

/// Minimum usable series length; below this the expansion carries no
/// correction terms and the result is meaningless.
const MINIMUM_COEFFICIENT_COUNT: i64 = 3;

pub struct HolomorphicEmbedding {
    target_precision: f64,
    coefficient_count: i64,
    bit_precision: i64,
    solver_kind: i64,
    monitor: ProgressMonitor,
}

impl HolomorphicEmbedding {
    pub fn new(config: &CalculatorConfig) -> Self {
        let kind = SolverSelection::HolomorphicEmbeddedLoadFlow
            .to_i64()
            .unwrap_or(4);
        Self {
            target_precision: config.target_precision,
            coefficient_count: config.coefficient_count as i64,
            bit_precision: config.bit_precision as i64,
            solver_kind: kind,
            monitor: ProgressMonitor::default(),
        }
    }

    fn marshal(&self, problem: &PowerFlowProblem) -> Result<HelmSolver, HelmError> {
        let n = problem.node_count() as i64;
        let mut solver = HelmSolver::create(&HelmConfig {
            target_precision: self.target_precision,
            coefficient_count: self.coefficient_count,
            node_count: n,
            pq_bus_count: problem.pq_buses.len() as i64,
            pv_bus_count: problem.pv_buses.len() as i64,
            nominal_voltage: problem.nominal_voltage,
            precision_bits: self.bit_precision,
            solver_kind: self.solver_kind,
        })?;

        for (row, col, val) in problem.admittances.triplet_iter() {
            solver.set_admittance(row as i64, col as i64, val.re, val.im)?;
        }
        for (row, sum) in problem.row_sums.iter().enumerate() {
            solver.set_row_sum(row as i64, sum.re, sum.im)?;
        }
        for (node, current) in problem.constant_currents.iter().enumerate() {
            solver.set_constant_current(node as i64, current.re, current.im)?;
        }
        for (slot, pq) in problem.pq_buses.iter().enumerate() {
            solver.set_pq_bus(slot as i64, pq.index as i64, pq.power.re, pq.power.im)?;
        }
        for (slot, pv) in problem.pv_buses.iter().enumerate() {
            solver.set_pv_bus(slot as i64, pv.index as i64, pv.real_power, pv.magnitude)?;
        }
        Ok(solver)
    }
}

impl NodeVoltageCalculator for HolomorphicEmbedding {
    fn calculate_unknown_voltages(
        &mut self,
        problem: &PowerFlowProblem,
    ) -> Result<DVector<Complex64>, SolveError> {
        self.monitor.reset();
        let n = problem.node_count();
        let collapse = |error: f64| VoltageCollapse {
            best_iterate: DVector::zeros(n),
            iterations: 0,
            relative_power_error: error,
        };

        // Marshalling indices are consistent with the declared counts by
        // construction; a failure here is a native allocation fault, which
        // is fatal rather than a collapse a fallback stage could retry.
        let mut solver = match self.marshal(problem) {
            Ok(solver) => solver,
            Err(fault) => {
                error!(%fault, "native embedding solver unavailable");
                return Err(fault.into());
            }
        };

        solver.calculate();
        let relative_error = solver.relative_power_error();
        self.monitor.report(solver.progress(), relative_error);

        let usable = solver
            .maximum_possible_coefficient_count()
            .unwrap_or(0);
        if usable < MINIMUM_COEFFICIENT_COUNT {
            debug!(usable, "series broke down before a usable length");
            return Err(collapse(relative_error).into());
        }

        let mut v = DVector::zeros(n);
        for node in 0..n {
            let (re, im) = solver.voltage(node as i64).map_err(|fault| {
                error!(%fault, "native solver refused a result read");
                SolveError::from(fault)
            })?;
            v[node] = Complex64::new(re, im);
        }

        if relative_error >= MAXIMUM_RELATIVE_POWER_ERROR {
            return Err(VoltageCollapse {
                best_iterate: v,
                iterations: 0,
                relative_power_error: relative_error,
            }
            .into());
        }
        self.monitor.report(1.0, relative_error);
        Ok(v)
    }

    fn progress_handle(&self) -> &ProgressMonitor {
        &self.monitor
    }

    fn attach_progress(&mut self, monitor: ProgressMonitor) {
        self.monitor = monitor;
    }
}
