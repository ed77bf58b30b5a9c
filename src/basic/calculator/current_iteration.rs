//! Fixed-point current iteration.
//!
//! Each pass evaluates the right-hand-side currents `I = I_const +
//! conj(S / V)` at the previous voltage estimate, solves the linear system
//! `Y V = I`, then corrects PV buses back to their specified magnitude
//! while keeping the newly computed angle and re-estimating their reactive
//! power. The matrix never changes, so the direct path factorizes once and
//! reuses the symbolic analysis on every pass.

use nalgebra::DVector;
use num_complex::Complex64;
use simba::simd::SimdComplexField;
use tracing::{debug, trace};

use crate::basic::error::{SolveError, VoltageCollapse};
use crate::basic::solver::{DefaultSolver, Solve, iterative, solve_complex};

use super::{
    CalculatorConfig, MAXIMUM_RELATIVE_POWER_ERROR, NodeVoltageCalculator, PowerFlowProblem,
    ProgressMonitor,
};

pub struct CurrentIteration {
    target_precision: f64,
    maximum_iterations: usize,
    use_iterative_solver: bool,
    solver: DefaultSolver,
    monitor: ProgressMonitor,
}

impl CurrentIteration {
    pub fn new(config: &CalculatorConfig) -> Self {
        Self {
            target_precision: config.target_precision,
            maximum_iterations: config.maximum_iterations,
            use_iterative_solver: config.use_iterative_solver,
            solver: DefaultSolver::default(),
            monitor: ProgressMonitor::default(),
        }
    }

    fn solve_linear(
        &mut self,
        problem: &PowerFlowProblem,
        rhs: &DVector<Complex64>,
        guess: &DVector<Complex64>,
    ) -> Option<DVector<Complex64>> {
        if self.use_iterative_solver {
            let criteria = iterative::ConvergenceCriteria {
                relative_tolerance: self.target_precision * 1e-2,
                ..Default::default()
            };
            iterative::bicgstab(&problem.admittances, rhs, guess, &criteria)
        } else {
            solve_complex(&mut self.solver, &problem.admittances, rhs).ok()
        }
    }
}

impl NodeVoltageCalculator for CurrentIteration {
    fn calculate_unknown_voltages(
        &mut self,
        problem: &PowerFlowProblem,
    ) -> Result<DVector<Complex64>, SolveError> {
        self.monitor.reset();
        self.solver.reset();
        let mut v = problem.initial_voltages.clone();
        // Reactive estimates for PV buses, refined every pass.
        let mut q_estimates = vec![0.0; problem.pv_buses.len()];
        let change_scale = 10.0 / problem.nominal_voltage;
        let mut relative_error = f64::INFINITY;

        for iteration in 0..self.maximum_iterations {
            let mut currents = problem.constant_currents.clone();
            for pq in &problem.pq_buses {
                currents[pq.index] += (pq.power / v[pq.index]).conj();
            }
            for (pv, &q) in problem.pv_buses.iter().zip(&q_estimates) {
                let s = Complex64::new(pv.real_power, q);
                currents[pv.index] += (s / v[pv.index]).conj();
            }

            let mut v_next = match self.solve_linear(problem, &currents, &v) {
                Some(v_next) => v_next,
                None => {
                    return Err(VoltageCollapse {
                        best_iterate: v,
                        iterations: iteration,
                        relative_power_error: relative_error,
                    }
                    .into());
                }
            };

            // PV correction: keep the solved angle, restore the specified
            // magnitude, then re-estimate reactive power from the corrected
            // voltage and flag excessive real-power deviation.
            let mut power_error_too_big = false;
            if !problem.pv_buses.is_empty() {
                for pv in &problem.pv_buses {
                    v_next[pv.index] = v_next[pv.index].simd_signum() * pv.magnitude;
                }
                let i_net = &problem.admittances * &v_next - &problem.constant_currents;
                for (slot, pv) in problem.pv_buses.iter().enumerate() {
                    let s = v_next[pv.index] * i_net[pv.index].conj();
                    q_estimates[slot] = s.im;
                    // A zero real-power setpoint switches the check from
                    // relative to absolute.
                    let denominator = if pv.real_power.abs() > 0.0 {
                        pv.real_power.abs()
                    } else {
                        1.0
                    };
                    if (s.re - pv.real_power).abs() / denominator > self.target_precision {
                        power_error_too_big = true;
                    }
                }
            }

            let voltage_change = (&v_next - &v).map(|c| c.norm()).max() * change_scale;
            relative_error = problem.relative_power_error(&v_next);
            v = v_next;

            self.monitor.report(
                (iteration + 1) as f64 / self.maximum_iterations as f64,
                relative_error,
            );
            self.monitor.set_iterations(iteration + 1);
            trace!(
                iteration,
                voltage_change,
                relative_error,
                "current iteration pass"
            );

            if voltage_change < self.target_precision
                && !power_error_too_big
                && relative_error < MAXIMUM_RELATIVE_POWER_ERROR
            {
                debug!(iterations = iteration + 1, "current iteration converged");
                self.monitor.report(1.0, relative_error);
                return Ok(v);
            }
        }

        Err(VoltageCollapse {
            best_iterate: v,
            iterations: self.maximum_iterations,
            relative_power_error: relative_error,
        }
        .into())
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
    use crate::basic::calculator::{PqBus, PvBus};
    use approx::assert_relative_eq;
    use nalgebra::dvector;

    /// The two-node scenario: 100 V nominal, stiff 100 V feed at node 0,
    /// 10 W draw at node 1, 10 ohm line. In per-unit (100 V, 10 W bases)
    /// the line is 0.1 pu and the load 1 pu, giving V1 ~ 0.9899 pu.
    fn feed_and_load_problem() -> PowerFlowProblem {
        let mut engine = AdmittanceMatrix::new(3);
        // 10 ohm line on a 1000 ohm impedance base: 0.01 pu -> y = 100.
        let y_line = Complex64::new(100.0, 0.0);
        engine.add_connection(0, 1, y_line).unwrap();
        engine.add_connection(0, 2, Complex64::new(1e6, 0.0)).unwrap();
        let (reduced, extra) = engine
            .create_reduced_admittance_matrix(&[0, 1], &[2], &dvector![Complex64::new(1.0, 0.0)])
            .unwrap();
        PowerFlowProblem {
            admittances: reduced,
            row_sums: engine.row_sums().rows(0, 2).into_owned(),
            nominal_voltage: 1.0,
            initial_voltages: DVector::from_element(2, Complex64::new(1.0, 0.0)),
            constant_currents: extra,
            pq_buses: vec![PqBus {
                index: 1,
                power: Complex64::new(-1.0, 0.0),
            }],
            pv_buses: vec![],
        }
    }

    #[test]
    fn converges_on_feed_and_load() {
        let config = CalculatorConfig {
            target_precision: 1e-5,
            ..Default::default()
        };
        let mut calc = CurrentIteration::new(&config);
        let problem = feed_and_load_problem();
        let v = calc.calculate_unknown_voltages(&problem).unwrap();
        assert_relative_eq!(v[0].re, 1.0, epsilon = 1e-3);
        assert_relative_eq!(v[0].im, 0.0, epsilon = 1e-6);
        // 1 pu load over 0.01 pu line: V1 = (1 + sqrt(1 - 0.04)) / 2.
        assert_relative_eq!(v[1].re, 0.98990, epsilon = 1e-4);
        assert_relative_eq!(v[1].im, 0.0, epsilon = 1e-6);
        assert!(calc.relative_power_error() < MAXIMUM_RELATIVE_POWER_ERROR);
    }

    #[test]
    fn pv_magnitude_is_held() {
        let mut problem = feed_and_load_problem();
        problem.pv_buses = vec![PvBus {
            index: 1,
            real_power: 0.0,
            magnitude: 1.01,
        }];
        problem.pq_buses.clear();
        let config = CalculatorConfig::default();
        let mut calc = CurrentIteration::new(&config);
        let v = calc.calculate_unknown_voltages(&problem).unwrap();
        assert_relative_eq!(v[1].norm(), 1.01, epsilon = 1e-9);
    }

    #[test]
    fn iteration_cap_reports_collapse_with_last_iterate() {
        let mut problem = feed_and_load_problem();
        // A load far beyond the line's transfer capability cannot converge.
        problem.pq_buses[0].power = Complex64::new(-1e4, 0.0);
        let config = CalculatorConfig {
            maximum_iterations: 10,
            ..Default::default()
        };
        let mut calc = CurrentIteration::new(&config);
        let err = calc
            .calculate_unknown_voltages(&problem)
            .unwrap_err()
            .collapse()
            .unwrap();
        assert_eq!(err.iterations, 10);
        assert_eq!(err.best_iterate.len(), 2);
    }
}
