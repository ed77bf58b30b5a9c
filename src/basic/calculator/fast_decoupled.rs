//! Fast-decoupled load flow (Stott-Alsac).
//!
//! Exploits the weak P-V and Q-theta coupling of transmission-style
//! networks: two constant real matrices B' (angle sweep, series resistance
//! and shunts dropped) and B'' (magnitude sweep over PQ buses) replace the
//! full Jacobian, so both factorizations happen once and every
//! half-iteration is a pair of cheap triangular solves.

use nalgebra::DVector;
use nalgebra_sparse::{CooMatrix, CscMatrix};
use num_complex::Complex64;
use simba::simd::SimdComplexField;
use tracing::{debug, trace};

use crate::basic::error::{SolveError, VoltageCollapse};
use crate::basic::solver::{DefaultSolver, Solve, iterative, solve_real};
use crate::basic::sparse::cast::Cast;

use super::newton::OrderedProblem;
use super::{CalculatorConfig, NodeVoltageCalculator, PowerFlowProblem, ProgressMonitor};

pub struct FastDecoupled {
    target_precision: f64,
    maximum_iterations: usize,
    use_iterative_solver: bool,
    angle_solver: DefaultSolver,
    magnitude_solver: DefaultSolver,
    monitor: ProgressMonitor,
}

impl FastDecoupled {
    pub fn new(config: &CalculatorConfig) -> Self {
        Self {
            target_precision: config.target_precision,
            maximum_iterations: config.maximum_iterations,
            use_iterative_solver: config.use_iterative_solver,
            angle_solver: DefaultSolver::default(),
            magnitude_solver: DefaultSolver::default(),
            monitor: ProgressMonitor::default(),
        }
    }

    fn solve_sweep(
        solver: &mut DefaultSolver,
        use_iterative: bool,
        matrix: &CscMatrix<f64>,
        rhs: &DVector<f64>,
    ) -> Option<DVector<f64>> {
        if use_iterative {
            let criteria =
                iterative::ConvergenceCriteria::for_correction(rhs.norm(), 0.1, matrix.nrows());
            let solution = iterative::bicgstab(
                &matrix.cast(),
                &rhs.map(|x| Complex64::new(x, 0.0)),
                &DVector::zeros(rhs.len()),
                &criteria,
            )?;
            Some(solution.map(|c| c.re))
        } else {
            solve_real(solver, matrix, rhs).ok()
        }
    }
}

/// B': branch susceptances recomputed from the series reactance alone,
/// over all non-slack buses. An off-diagonal entry holds `-y_series`; the
/// angle sweep wants the susceptance of the lossless branch `1/(jx)`, so
/// the resistance is dropped before stamping. The diagonal is rebuilt from
/// the incident branches only, which keeps shunts out of it.
fn build_b_prime(y: &CscMatrix<Complex64>) -> CscMatrix<f64> {
    let n = y.nrows();
    let mut coo = CooMatrix::new(n, n);
    for (row, col, val) in y.triplet_iter() {
        if row == col || val.im == 0.0 {
            continue;
        }
        // val = -y = -1/(r + jx), so -|val|^2 / val.im = -1/x.
        let b = -val.norm_sqr() / val.im;
        coo.push(row, col, b);
        coo.push(row, row, -b);
    }
    CscMatrix::from(&coo)
}

/// B'': negated imaginary part of the full admittance matrix restricted to
/// the PQ block, shunts included.
fn build_b_double_prime(y: &CscMatrix<Complex64>, npv: usize) -> CscMatrix<f64> {
    let npq = y.nrows() - npv;
    let mut coo = CooMatrix::new(npq, npq);
    for (row, col, val) in y.triplet_iter() {
        if row >= npv && col >= npv {
            coo.push(row - npv, col - npv, -val.im);
        }
    }
    CscMatrix::from(&coo)
}

impl NodeVoltageCalculator for FastDecoupled {
    fn calculate_unknown_voltages(
        &mut self,
        problem: &PowerFlowProblem,
    ) -> Result<DVector<Complex64>, SolveError> {
        self.monitor.reset();
        self.angle_solver.reset();
        self.magnitude_solver.reset();

        let ordered = OrderedProblem::build(problem);
        let n_bus = ordered.npv + ordered.npq;
        let tolerance = problem.nominal_voltage * self.target_precision;

        let b_prime = build_b_prime(&ordered.y);
        let b_double_prime = build_b_double_prime(&ordered.y, ordered.npv);

        let mut v = ordered.v_init.clone();
        let mut v_m = v.map(|e| e.simd_modulus());
        let mut v_a = v.map(|e| e.simd_argument());
        let mut relative_error = f64::INFINITY;

        for iteration in 0..self.maximum_iterations {
            let i_bus = &ordered.y * &v - &ordered.i_const;
            let mis = v.component_mul(&i_bus.conjugate()) - &ordered.s_bus;

            let mismatch = mis
                .iter()
                .enumerate()
                .map(|(i, m)| if i < ordered.npv { m.re.abs() } else { m.norm() })
                .fold(0.0f64, f64::max);
            relative_error = problem.relative_power_error(&ordered.restore(&v));
            if mismatch < tolerance {
                debug!(iterations = iteration, "fast decoupled converged");
                self.monitor.report(1.0, relative_error);
                return Ok(ordered.restore(&v));
            }

            // P sweep over every bus.
            let f_p = DVector::from_iterator(n_bus, mis.iter().zip(v_m.iter()).map(|(m, vm)| m.re / vm));
            let d_theta = match Self::solve_sweep(
                &mut self.angle_solver,
                self.use_iterative_solver,
                &b_prime,
                &f_p,
            ) {
                Some(d) => d,
                None => {
                    return Err(VoltageCollapse {
                        best_iterate: ordered.restore(&v),
                        iterations: iteration,
                        relative_power_error: relative_error,
                    }
                    .into());
                }
            };
            v_a -= &d_theta;

            // Q sweep over the PQ block at the updated angles.
            if ordered.npq > 0 {
                v.zip_zip_apply(&v_a, &v_m, |a, va, vm| *a = Complex64::from_polar(vm, va));
                let i_bus = &ordered.y * &v - &ordered.i_const;
                let mis = v.component_mul(&i_bus.conjugate()) - &ordered.s_bus;
                let f_q = DVector::from_iterator(
                    ordered.npq,
                    (ordered.npv..n_bus).map(|i| mis[i].im / v_m[i]),
                );
                let d_vm = match Self::solve_sweep(
                    &mut self.magnitude_solver,
                    self.use_iterative_solver,
                    &b_double_prime,
                    &f_q,
                ) {
                    Some(d) => d,
                    None => {
                        return Err(VoltageCollapse {
                            best_iterate: ordered.restore(&v),
                            iterations: iteration,
                            relative_power_error: relative_error,
                        }
                        .into());
                    }
                };
                v_m.rows_range_mut(ordered.npv..n_bus)
                    .zip_apply(&d_vm, |a, b| *a -= b);
            }

            v.zip_zip_apply(&v_a, &v_m, |a, va, vm| *a = Complex64::from_polar(vm, va));
            self.monitor.report(
                (iteration + 1) as f64 / self.maximum_iterations as f64,
                relative_error,
            );
            self.monitor.set_iterations(iteration + 1);
            trace!(iteration, mismatch, "fast decoupled sweep");
        }

        Err(VoltageCollapse {
            best_iterate: ordered.restore(&v),
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
    use crate::basic::calculator::{NewtonRaphson, PqBus, PvBus};
    use approx::assert_relative_eq;
    use nalgebra::dvector;

    /// Transmission-flavored network: dominantly reactive branches so the
    /// decoupling assumption holds.
    fn reactive_network() -> PowerFlowProblem {
        let mut engine = AdmittanceMatrix::new(4);
        let y = Complex64::new(0.5, -8.0);
        engine.add_connection(0, 1, y).unwrap();
        engine.add_connection(1, 2, y).unwrap();
        engine.add_connection(0, 2, y * 0.7).unwrap();
        engine.add_connection(0, 3, Complex64::new(10.0, -200.0)).unwrap();
        let (reduced, extra) = engine
            .create_reduced_admittance_matrix(
                &[0, 1, 2],
                &[3],
                &dvector![Complex64::new(1.0, 0.0)],
            )
            .unwrap();
        PowerFlowProblem {
            admittances: reduced,
            row_sums: engine.row_sums().rows(0, 3).into_owned(),
            nominal_voltage: 1.0,
            initial_voltages: DVector::from_element(3, Complex64::new(1.0, 0.0)),
            constant_currents: extra,
            pq_buses: vec![
                PqBus {
                    index: 1,
                    power: Complex64::new(-0.4, -0.15),
                },
                PqBus {
                    index: 2,
                    power: Complex64::new(-0.25, -0.1),
                },
            ],
            pv_buses: vec![],
        }
    }

    #[test]
    fn agrees_with_newton() {
        let config = CalculatorConfig {
            target_precision: 1e-8,
            maximum_iterations: 200,
            ..Default::default()
        };
        let problem = reactive_network();
        let vf = FastDecoupled::new(&config)
            .calculate_unknown_voltages(&problem)
            .unwrap();
        let vn = NewtonRaphson::new(&config)
            .calculate_unknown_voltages(&problem)
            .unwrap();
        for (a, b) in vf.iter().zip(vn.iter()) {
            assert_relative_eq!((a - b).norm(), 0.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn holds_pv_magnitude() {
        let mut problem = reactive_network();
        problem.pq_buses.truncate(1);
        problem.pv_buses = vec![PvBus {
            index: 2,
            real_power: 0.2,
            magnitude: 1.03,
        }];
        let config = CalculatorConfig {
            target_precision: 1e-8,
            maximum_iterations: 200,
            ..Default::default()
        };
        let v = FastDecoupled::new(&config)
            .calculate_unknown_voltages(&problem)
            .unwrap();
        assert_relative_eq!(v[2].norm(), 1.03, epsilon = 1e-9);
    }

    #[test]
    fn iteration_cap_yields_collapse() {
        let mut problem = reactive_network();
        problem.pq_buses[0].power = Complex64::new(-500.0, -200.0);
        let config = CalculatorConfig {
            maximum_iterations: 15,
            ..Default::default()
        };
        let err = FastDecoupled::new(&config)
            .calculate_unknown_voltages(&problem)
            .unwrap_err()
            .collapse()
            .unwrap();
        assert_eq!(err.iterations, 15);
    }

    #[test]
    fn b_prime_drops_series_resistance() {
        // z = 3 + 4j: the lossless susceptance is 1/x = 0.25, not the
        // imaginary part of 1/z.
        let z = Complex64::new(3.0, 4.0);
        let mut engine = AdmittanceMatrix::new(2);
        engine
            .add_connection(0, 1, Complex64::new(1.0, 0.0) / z)
            .unwrap();
        let b = build_b_prime(&engine.to_csc());

        let mut off_diagonal = 0.0;
        let mut diagonal = 0.0;
        for (row, col, val) in b.triplet_iter() {
            match (row, col) {
                (0, 1) => off_diagonal += val,
                (0, 0) => diagonal += val,
                _ => {}
            }
        }
        assert_relative_eq!(off_diagonal, -0.25, epsilon = 1e-12);
        assert_relative_eq!(diagonal, 0.25, epsilon = 1e-12);
    }

    /// Distribution-flavored branches with r/x around one; the angle sweep
    /// must still land on the Newton solution.
    #[test]
    fn resistive_branches_agree_with_newton() {
        let mut engine = AdmittanceMatrix::new(4);
        let y = Complex64::new(1.0, 0.0) / Complex64::new(0.05, 0.06);
        engine.add_connection(0, 1, y).unwrap();
        engine.add_connection(1, 2, y * 0.8).unwrap();
        engine.add_connection(0, 2, y).unwrap();
        engine
            .add_connection(0, 3, Complex64::new(1e4, -1e4))
            .unwrap();
        let (reduced, extra) = engine
            .create_reduced_admittance_matrix(
                &[0, 1, 2],
                &[3],
                &dvector![Complex64::new(1.0, 0.0)],
            )
            .unwrap();
        let problem = PowerFlowProblem {
            admittances: reduced,
            row_sums: engine.row_sums().rows(0, 3).into_owned(),
            nominal_voltage: 1.0,
            initial_voltages: DVector::from_element(3, Complex64::new(1.0, 0.0)),
            constant_currents: extra,
            pq_buses: vec![
                PqBus {
                    index: 1,
                    power: Complex64::new(-0.15, -0.05),
                },
                PqBus {
                    index: 2,
                    power: Complex64::new(-0.1, -0.03),
                },
            ],
            pv_buses: vec![],
        };

        let config = CalculatorConfig {
            target_precision: 1e-8,
            maximum_iterations: 300,
            ..Default::default()
        };
        let vf = FastDecoupled::new(&config)
            .calculate_unknown_voltages(&problem)
            .unwrap();
        let vn = NewtonRaphson::new(&config)
            .calculate_unknown_voltages(&problem)
            .unwrap();
        for (a, b) in vf.iter().zip(vn.iter()) {
            assert_relative_eq!((a - b).norm(), 0.0, epsilon = 1e-6);
        }
    }
}
