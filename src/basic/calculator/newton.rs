//! Newton-Raphson load flow over the full complex Jacobian.
//!
//! The shared Jacobian-framework skeleton lives here: the problem is
//! permuted into `[pv; pq]` order, power mismatches are computed at the
//! current estimate, the correction system is solved (direct LU, or
//! BiCGSTAB with a residual target scaled to the mismatch), and the
//! voltage is updated as angle-plus-magnitude. Fast-decoupled reuses the
//! same ordering with its own sub-Jacobians.

use std::f64::consts::PI;

use nalgebra::DVector;
use nalgebra_sparse::{CooMatrix, CscMatrix};
use num_complex::Complex64;
use simba::simd::SimdComplexField;
use tracing::{debug, trace};

use crate::basic::dsbus_dv::dSbus_dV;
use crate::basic::error::{SolveError, VoltageCollapse};
use crate::basic::solver::{DefaultSolver, Solve, iterative, solve_real};
use crate::basic::sparse::{
    cast::Cast,
    conj::RealImage,
    slice::{slice_csc_matrix, slice_csc_matrix_block},
    stack::{csc_hstack, csc_vstack},
};

use super::{CalculatorConfig, NodeVoltageCalculator, PowerFlowProblem, ProgressMonitor};

/// Problem permuted into `[pv; pq]` unknown order.
pub(crate) struct OrderedProblem {
    pub y: CscMatrix<Complex64>,
    pub s_bus: DVector<Complex64>,
    pub i_const: DVector<Complex64>,
    pub v_init: DVector<Complex64>,
    pub npv: usize,
    pub npq: usize,
    /// new position -> original index
    pub perm: Vec<usize>,
}

impl OrderedProblem {
    /// Indices the problem does not classify (auxiliary current unknowns
    /// from ideal elements) join the PQ block with zero power.
    pub(crate) fn build(problem: &PowerFlowProblem) -> Self {
        let n = problem.node_count();
        let mut pv: Vec<usize> = problem.pv_buses.iter().map(|b| b.index).collect();
        pv.sort_unstable();
        let mut pq: Vec<usize> = problem.pq_buses.iter().map(|b| b.index).collect();
        let classified: Vec<bool> = {
            let mut seen = vec![false; n];
            for &i in pv.iter().chain(pq.iter()) {
                seen[i] = true;
            }
            seen
        };
        pq.extend((0..n).filter(|&i| !classified[i]));
        pq.sort_unstable();

        let perm: Vec<usize> = pv.iter().chain(pq.iter()).copied().collect();
        let mut inverse = vec![0usize; n];
        for (new, &old) in perm.iter().enumerate() {
            inverse[old] = new;
        }

        let mut coo = CooMatrix::new(n, n);
        for (row, col, &val) in problem.admittances.triplet_iter() {
            coo.push(inverse[row], inverse[col], val);
        }

        let mut s_bus = DVector::zeros(n);
        for bus in &problem.pq_buses {
            s_bus[inverse[bus.index]] += bus.power;
        }
        let mut v_init = DVector::from_iterator(
            n,
            perm.iter().map(|&old| problem.initial_voltages[old]),
        );
        for bus in &problem.pv_buses {
            let slot = inverse[bus.index];
            s_bus[slot] += Complex64::new(bus.real_power, 0.0);
            v_init[slot] = v_init[slot].simd_signum() * bus.magnitude;
        }
        let i_const = DVector::from_iterator(
            n,
            perm.iter().map(|&old| problem.constant_currents[old]),
        );

        Self {
            y: CscMatrix::from(&coo),
            s_bus,
            i_const,
            v_init,
            npv: pv.len(),
            npq: pq.len(),
            perm,
        }
    }

    /// Maps a solution back into the original index order.
    pub(crate) fn restore(&self, v: &DVector<Complex64>) -> DVector<Complex64> {
        let mut out = DVector::zeros(v.len());
        for (new, &old) in self.perm.iter().enumerate() {
            out[old] = v[new];
        }
        out
    }
}

pub struct NewtonRaphson {
    target_precision: f64,
    maximum_iterations: usize,
    use_iterative_solver: bool,
    solver: DefaultSolver,
    monitor: ProgressMonitor,
}

impl NewtonRaphson {
    pub fn new(config: &CalculatorConfig) -> Self {
        Self {
            target_precision: config.target_precision,
            maximum_iterations: config.maximum_iterations,
            use_iterative_solver: config.use_iterative_solver,
            solver: DefaultSolver::default(),
            monitor: ProgressMonitor::default(),
        }
    }

    fn solve_correction(
        &mut self,
        jacobian: &CscMatrix<f64>,
        f: &DVector<f64>,
    ) -> Option<DVector<f64>> {
        if self.use_iterative_solver {
            let criteria = iterative::ConvergenceCriteria::for_correction(
                f.norm(),
                0.1,
                jacobian.nrows(),
            );
            let complex_rhs = f.map(|x| Complex64::new(x, 0.0));
            let solution = iterative::bicgstab(
                &jacobian.cast(),
                &complex_rhs,
                &DVector::zeros(f.len()),
                &criteria,
            )?;
            Some(solution.map(|c| c.re))
        } else {
            solve_real(&mut self.solver, jacobian, f).ok()
        }
    }
}

fn assemble_mismatch(
    f: &mut DVector<f64>,
    mis: &DVector<Complex64>,
    n_bus: usize,
    npv: usize,
) {
    let num_state = f.len();
    f.rows_range_mut(0..n_bus)
        .zip_apply(&mis.rows_range(0..n_bus), |a, b| *a = b.re);
    f.rows_range_mut(n_bus..num_state)
        .zip_apply(&mis.rows_range(npv..n_bus), |a, b| *a = b.im);
}

#[allow(non_snake_case)]
fn build_jacobian(
    ds_dvm: &CscMatrix<Complex64>,
    ds_dva: &CscMatrix<Complex64>,
    npv: usize,
) -> CscMatrix<f64> {
    let (va_re, va_im) = ds_dva.real_imag();
    let (vm_re, vm_im) = ds_dvm.real_imag();
    let n = ds_dva.nrows();

    let J11 = va_re;
    let J12 = slice_csc_matrix(&vm_re, npv, n);
    let J21 = slice_csc_matrix_block(&va_im, (npv, 0), (n - npv, n));
    let J22 = slice_csc_matrix_block(&vm_im, (npv, npv), (n - npv, n - npv));

    csc_vstack(&[&csc_hstack(&[&J11, &J12]), &csc_hstack(&[&J21, &J22])])
}

impl NodeVoltageCalculator for NewtonRaphson {
    fn calculate_unknown_voltages(
        &mut self,
        problem: &PowerFlowProblem,
    ) -> Result<DVector<Complex64>, SolveError> {
        self.monitor.reset();
        self.solver.reset();
        let ordered = OrderedProblem::build(problem);
        let n_bus = ordered.npv + ordered.npq;
        let num_state = ordered.npv + 2 * ordered.npq;
        let tolerance = problem.nominal_voltage * self.target_precision;

        let mut v = ordered.v_init.clone();
        let mut v_norm = v.map(|e| e.simd_signum());
        let mut v_m = v.map(|e| e.simd_modulus());
        let mut v_a = v.map(|e| e.simd_argument());

        let mut f = DVector::zeros(num_state);
        let mut i_bus = &ordered.y * &v - &ordered.i_const;
        let mut mis = v.component_mul(&i_bus.conjugate()) - &ordered.s_bus;
        assemble_mismatch(&mut f, &mis, n_bus, ordered.npv);

        let mut relative_error = problem.relative_power_error(&ordered.restore(&v));
        if f.amax() < tolerance {
            self.monitor.report(1.0, relative_error);
            return Ok(ordered.restore(&v));
        }

        for iteration in 0..self.maximum_iterations {
            let (ds_dvm, ds_dva) = dSbus_dV(&ordered.y, &v, &v_norm, &i_bus);
            let jacobian = build_jacobian(&ds_dvm, &ds_dva, ordered.npv);

            let dx = match self.solve_correction(&jacobian, &f) {
                Some(dx) => dx,
                None => {
                    return Err(VoltageCollapse {
                        best_iterate: ordered.restore(&v),
                        iterations: iteration,
                        relative_power_error: relative_error,
                    }
                    .into());
                }
            };

            // Angle update on every bus, magnitude update on PQ rows only.
            v_a.rows_range_mut(0..n_bus)
                .zip_apply(&dx.rows_range(0..n_bus), |a, b| {
                    *a -= b;
                    *a = a.rem_euclid(2.0 * PI);
                });
            v_m.rows_range_mut(ordered.npv..n_bus)
                .zip_apply(&dx.rows_range(n_bus..num_state), |a, b| *a -= b);
            v_norm.zip_apply(&v_a, |a, va| *a = Complex64::from_polar(1.0, va));
            v.zip_zip_apply(&v_norm, &v_m, |a, e, vm| *a = vm * e);

            i_bus = &ordered.y * &v - &ordered.i_const;
            mis = v.component_mul(&i_bus.conjugate()) - &ordered.s_bus;
            assemble_mismatch(&mut f, &mis, n_bus, ordered.npv);

            relative_error = problem.relative_power_error(&ordered.restore(&v));
            self.monitor.report(
                (iteration + 1) as f64 / self.maximum_iterations as f64,
                relative_error,
            );
            self.monitor.set_iterations(iteration + 1);
            trace!(iteration, mismatch = f.amax(), "newton iteration");

            if f.amax() < tolerance {
                debug!(iterations = iteration + 1, "newton converged");
                self.monitor.report(1.0, relative_error);
                return Ok(ordered.restore(&v));
            }
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
    use crate::basic::calculator::{CurrentIteration, PqBus, PvBus};
    use approx::assert_relative_eq;
    use nalgebra::dvector;

    fn three_bus_problem() -> PowerFlowProblem {
        // Slack at node 3 (eliminated), lines 0-1, 1-2, 0-2, PV at 2.
        let mut engine = AdmittanceMatrix::new(4);
        let y = Complex64::new(5.0, -15.0);
        engine.add_connection(0, 1, y).unwrap();
        engine.add_connection(1, 2, y * 0.8).unwrap();
        engine.add_connection(0, 2, y * 1.2).unwrap();
        engine.add_connection(0, 3, Complex64::new(1e5, -1e5)).unwrap();
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
            pq_buses: vec![PqBus {
                index: 1,
                power: Complex64::new(-0.6, -0.2),
            }],
            pv_buses: vec![PvBus {
                index: 2,
                real_power: 0.3,
                magnitude: 1.02,
            }],
        }
    }

    #[test]
    fn converges_and_honors_pv_magnitude() {
        let config = CalculatorConfig {
            target_precision: 1e-8,
            ..Default::default()
        };
        let mut newton = NewtonRaphson::new(&config);
        let problem = three_bus_problem();
        let v = newton.calculate_unknown_voltages(&problem).unwrap();
        assert_relative_eq!(v[2].norm(), 1.02, epsilon = 1e-9);
        assert!(problem.relative_power_error(&v) < 1e-6);
    }

    #[test]
    fn agrees_with_current_iteration_without_pv() {
        let mut problem = three_bus_problem();
        problem.pv_buses.clear();
        let config = CalculatorConfig {
            target_precision: 1e-9,
            maximum_iterations: 200,
            ..Default::default()
        };
        let mut newton = NewtonRaphson::new(&config);
        let mut fixed_point = CurrentIteration::new(&config);
        let vn = newton.calculate_unknown_voltages(&problem).unwrap();
        let vc = fixed_point.calculate_unknown_voltages(&problem).unwrap();
        for (a, b) in vn.iter().zip(vc.iter()) {
            assert_relative_eq!((a - b).norm(), 0.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn iterative_correction_matches_direct() {
        let problem = three_bus_problem();
        let direct_cfg = CalculatorConfig {
            target_precision: 1e-8,
            ..Default::default()
        };
        let iterative_cfg = CalculatorConfig {
            use_iterative_solver: true,
            ..direct_cfg.clone()
        };
        let vd = NewtonRaphson::new(&direct_cfg)
            .calculate_unknown_voltages(&problem)
            .unwrap();
        let vi = NewtonRaphson::new(&iterative_cfg)
            .calculate_unknown_voltages(&problem)
            .unwrap();
        for (a, b) in vd.iter().zip(vi.iter()) {
            assert_relative_eq!((a - b).norm(), 0.0, epsilon = 1e-6);
        }
    }
}
