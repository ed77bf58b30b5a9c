//! Direct node-potential solve.
//!
//! Loads enter as constant currents evaluated at the initial voltages, PV
//! and slack voltages are eliminated through the admittance reduction, and
//! the remaining linear system is solved exactly once. No iteration loop:
//! the method either produces a voltage vector or reports an indeterminate
//! result when the linear solve fails.

use nalgebra::DVector;
use num_complex::Complex64;
use simba::simd::SimdComplexField;
use tracing::debug;

use crate::basic::admittance::reduce_admittance;
use crate::basic::error::{SolveError, VoltageCollapse};
use crate::basic::solver::{DefaultSolver, iterative, solve_complex};

use super::{CalculatorConfig, NodeVoltageCalculator, PowerFlowProblem, ProgressMonitor};

pub struct NodePotentialMethod {
    target_precision: f64,
    use_iterative_solver: bool,
    monitor: ProgressMonitor,
}

impl NodePotentialMethod {
    pub fn new(config: &CalculatorConfig) -> Self {
        Self {
            target_precision: config.target_precision,
            use_iterative_solver: config.use_iterative_solver,
            monitor: ProgressMonitor::default(),
        }
    }

    fn solve_linear(
        &self,
        y: &nalgebra_sparse::CscMatrix<Complex64>,
        rhs: &DVector<Complex64>,
        guess: &DVector<Complex64>,
    ) -> Option<DVector<Complex64>> {
        if self.use_iterative_solver {
            let criteria = iterative::ConvergenceCriteria {
                relative_tolerance: self.target_precision,
                ..Default::default()
            };
            iterative::bicgstab(y, rhs, guess, &criteria)
        } else {
            let mut solver = DefaultSolver::default();
            solve_complex(&mut solver, y, rhs).ok()
        }
    }
}

impl NodeVoltageCalculator for NodePotentialMethod {
    fn calculate_unknown_voltages(
        &mut self,
        problem: &PowerFlowProblem,
    ) -> Result<DVector<Complex64>, SolveError> {
        self.monitor.reset();
        let n = problem.node_count();

        // Power-specified buses become constant current sources evaluated
        // at the initial voltage estimate.
        let mut currents = problem.constant_currents.clone();
        for pq in &problem.pq_buses {
            let v0 = problem.initial_voltages[pq.index];
            currents[pq.index] += (pq.power / v0).conj();
        }

        let collapse = |iterations| VoltageCollapse {
            best_iterate: DVector::zeros(n),
            iterations,
            relative_power_error: f64::INFINITY,
        };

        let v = if problem.pv_buses.is_empty() {
            self.solve_linear(&problem.admittances, &currents, &problem.initial_voltages)
                .ok_or_else(|| collapse(1))?
        } else {
            // Fix PV voltages at their specified magnitude along the
            // initial direction and eliminate them.
            let known: Vec<usize> = problem.pv_buses.iter().map(|pv| pv.index).collect();
            let unknown: Vec<usize> = (0..n).filter(|i| !known.contains(i)).collect();
            let v_known = DVector::from_iterator(
                known.len(),
                problem.pv_buses.iter().map(|pv| {
                    problem.initial_voltages[pv.index].simd_signum() * pv.magnitude
                }),
            );
            let (reduced, extra) =
                reduce_admittance(&problem.admittances, &unknown, &known, &v_known);
            let rhs = DVector::from_iterator(
                unknown.len(),
                unknown.iter().map(|&i| currents[i]),
            ) + extra;
            let guess = DVector::from_iterator(
                unknown.len(),
                unknown.iter().map(|&i| problem.initial_voltages[i]),
            );
            let solved = self
                .solve_linear(&reduced, &rhs, &guess)
                .ok_or_else(|| collapse(1))?;

            let mut full = DVector::zeros(n);
            for (slot, &i) in unknown.iter().enumerate() {
                full[i] = solved[slot];
            }
            for (slot, &i) in known.iter().enumerate() {
                full[i] = v_known[slot];
            }
            full
        };

        let error = problem.relative_power_error(&v);
        debug!(relative_power_error = error, "node potential solve done");
        self.monitor.report(1.0, error);
        Ok(v)
    }

    fn progress_handle(&self) -> &ProgressMonitor {
        &self.monitor
    }

    fn attach_progress(&mut self, monitor: ProgressMonitor) {
        self.monitor = monitor;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basic::admittance::AdmittanceMatrix;
    use crate::basic::calculator::PqBus;
    use approx::assert_relative_eq;
    use nalgebra::dvector;

    /// Two nodes, source eliminated upstream: node 0 carries the slack
    /// injection as a constant current, node 1 is a small load.
    fn line_problem(use_iterative: bool) -> (PowerFlowProblem, NodePotentialMethod) {
        // Per-unit: line of 0.1 pu impedance, slack at 1 pu eliminated into
        // constant currents.
        let y_line = Complex64::new(10.0, 0.0);
        let mut engine = AdmittanceMatrix::new(3);
        engine.add_connection(0, 1, y_line).unwrap();
        // Slack node 2 tied to node 0 with a stiff link.
        let y_src = Complex64::new(1e4, 0.0);
        engine.add_connection(0, 2, y_src).unwrap();
        let (reduced, extra) = engine
            .create_reduced_admittance_matrix(&[0, 1], &[2], &dvector![Complex64::new(1.0, 0.0)])
            .unwrap();

        let problem = PowerFlowProblem {
            admittances: reduced,
            row_sums: engine.row_sums().rows(0, 2).into_owned(),
            nominal_voltage: 1.0,
            initial_voltages: DVector::from_element(2, Complex64::new(1.0, 0.0)),
            constant_currents: extra,
            pq_buses: vec![PqBus {
                index: 1,
                power: Complex64::new(-0.1, 0.0),
            }],
            pv_buses: vec![],
        };
        let config = CalculatorConfig {
            use_iterative_solver: use_iterative,
            ..Default::default()
        };
        let method = NodePotentialMethod::new(&config);
        (problem, method)
    }

    #[test]
    fn solves_single_source_network() {
        let (problem, mut method) = line_problem(false);
        let v = method.calculate_unknown_voltages(&problem).unwrap();
        // Load draws 0.1 pu through a 0.1 pu line: roughly 1% drop.
        assert!(v[1].re < v[0].re);
        assert_relative_eq!(v[1].re, 0.99, epsilon = 1e-2);
        assert_relative_eq!(method.progress(), 1.0);
    }

    #[test]
    fn iterative_path_matches_direct() {
        let (problem, mut direct) = line_problem(false);
        let (_, mut iterative) = line_problem(true);
        let vd = direct.calculate_unknown_voltages(&problem).unwrap();
        let vi = iterative.calculate_unknown_voltages(&problem).unwrap();
        for (a, b) in vd.iter().zip(vi.iter()) {
            assert_relative_eq!((a - b).norm(), 0.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn pv_bus_is_pinned_to_magnitude() {
        let (mut problem, mut method) = line_problem(false);
        problem.pq_buses.clear();
        problem.pv_buses = vec![crate::basic::calculator::PvBus {
            index: 1,
            real_power: 0.0,
            magnitude: 1.02,
        }];
        let v = method.calculate_unknown_voltages(&problem).unwrap();
        assert_relative_eq!(v[1].norm(), 1.02, epsilon = 1e-12);
    }
}
