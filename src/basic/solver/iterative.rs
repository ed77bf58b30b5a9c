//! BiCGSTAB for the `use_iterative_solver` configuration.
//!
//! Used in two places: as the linear-solve step of the node-potential and
//! current-iteration calculators when an iterative path is requested, and as
//! the residual-targeted correction solve inside the Jacobian framework,
//! where the tolerance is scaled to the current power mismatch.

use nalgebra::DVector;
use nalgebra_sparse::CscMatrix;
use num_complex::Complex64;

/// Stopping rules for [`bicgstab`].
#[derive(Debug, Clone, Copy)]
pub struct ConvergenceCriteria {
    /// Iteration cap.
    pub max_iterations: usize,
    /// Relative tolerance: ||r|| < rel_tol * ||b||.
    pub relative_tolerance: f64,
    /// Absolute tolerance: ||r|| < abs_tol.
    pub absolute_tolerance: f64,
}

impl Default for ConvergenceCriteria {
    fn default() -> Self {
        Self {
            max_iterations: 1000,
            relative_tolerance: 1e-10,
            absolute_tolerance: 1e-13,
        }
    }
}

impl ConvergenceCriteria {
    /// Correction-solve criteria for the Jacobian framework: residual target
    /// scaled to the current mismatch magnitude, iteration cap grown with
    /// the problem size.
    pub fn for_correction(mismatch: f64, improvement: f64, size: usize) -> Self {
        Self {
            max_iterations: 20.max(size),
            relative_tolerance: improvement,
            absolute_tolerance: mismatch * improvement,
        }
    }

    fn is_converged(&self, residual_norm: f64, rhs_norm: f64) -> bool {
        residual_norm < self.absolute_tolerance
            || residual_norm < self.relative_tolerance * rhs_norm
    }
}

fn matvec(a: &CscMatrix<Complex64>, x: &DVector<Complex64>) -> DVector<Complex64> {
    let mut y = DVector::zeros(a.nrows());
    for (row, col, &val) in a.triplet_iter() {
        y[row] += val * x[col];
    }
    y
}

/// Complex inner product with the left argument conjugated.
fn dot(x: &DVector<Complex64>, y: &DVector<Complex64>) -> Complex64 {
    x.iter().zip(y.iter()).map(|(xi, yi)| xi.conj() * yi).sum()
}

/// Unpreconditioned BiCGSTAB on a complex sparse system.
///
/// Returns `None` on breakdown or when the iteration cap is reached without
/// meeting the criteria.
pub fn bicgstab(
    a: &CscMatrix<Complex64>,
    b: &DVector<Complex64>,
    x0: &DVector<Complex64>,
    criteria: &ConvergenceCriteria,
) -> Option<DVector<Complex64>> {
    let rhs_norm = b.norm();
    if rhs_norm == 0.0 {
        return Some(DVector::zeros(b.len()));
    }

    let mut x = x0.clone();
    let mut r = b - matvec(a, &x);
    if criteria.is_converged(r.norm(), rhs_norm) {
        return Some(x);
    }
    let r_hat = r.clone();
    let mut rho = Complex64::new(1.0, 0.0);
    let mut alpha = Complex64::new(1.0, 0.0);
    let mut omega = Complex64::new(1.0, 0.0);
    let mut v: DVector<Complex64> = DVector::zeros(b.len());
    let mut p: DVector<Complex64> = DVector::zeros(b.len());

    for _ in 0..criteria.max_iterations {
        let rho_next = dot(&r_hat, &r);
        if rho_next.norm() < f64::MIN_POSITIVE {
            return None; // breakdown
        }
        let beta = (rho_next / rho) * (alpha / omega);
        rho = rho_next;
        p = &r + (&p - &v * omega) * beta;
        v = matvec(a, &p);
        let denom = dot(&r_hat, &v);
        if denom.norm() < f64::MIN_POSITIVE {
            return None;
        }
        alpha = rho / denom;
        let s = &r - &v * alpha;
        if criteria.is_converged(s.norm(), rhs_norm) {
            x += &p * alpha;
            return Some(x);
        }
        let t = matvec(a, &s);
        let t_norm2 = dot(&t, &t);
        if t_norm2.norm() < f64::MIN_POSITIVE {
            return None;
        }
        omega = dot(&t, &s) / t_norm2;
        x += &p * alpha + &s * omega;
        r = &s - &t * omega;
        if criteria.is_converged(r.norm(), rhs_norm) {
            return Some(x);
        }
    }
    None
}
