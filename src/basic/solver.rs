use nalgebra::DVector;
use nalgebra_sparse::CscMatrix;
use num_complex::Complex64;

use super::sparse::{conj::RealImage, stack::{csc_hstack, csc_vstack}};

pub mod iterative;

#[cfg(feature = "faer")]
mod faer;
#[cfg(feature = "faer")]
pub use faer::*;

#[cfg(feature = "rsparse")]
mod rsparse;
#[cfg(feature = "rsparse")]
pub use rsparse::*;

#[cfg(feature = "faer")]
pub type DefaultSolver = FaerSolver;

#[cfg(all(not(feature = "faer"), feature = "rsparse"))]
pub type DefaultSolver = RSparseSolver;

/// LU-backed solve of a sparse linear system over raw CSC arrays.
///
/// Backends keep their symbolic analysis between calls, so repeated solves
/// against a matrix with an unchanged sparsity pattern skip the ordering
/// step. Call [`Solve::reset`] when the pattern changes.
#[allow(non_snake_case)]
pub trait Solve {
    /// Solves `A x = b` in place: `b` holds the solution on return.
    ///
    /// `Ap`, `Ai`, `Ax` are the column offsets, row indices and values of
    /// the n-by-n matrix in CSC layout.
    fn solve(
        &mut self,
        Ap: &mut [usize],
        Ai: &mut [usize],
        Ax: &mut [f64],
        b: &mut [f64],
        n: usize,
    ) -> Result<(), &'static str>;

    /// Drops the cached symbolic factorization.
    fn reset(&mut self) {}
}

/// Solves a real sparse system through the selected backend.
pub(crate) fn solve_real<S: Solve>(
    solver: &mut S,
    a: &CscMatrix<f64>,
    rhs: &DVector<f64>,
) -> Result<DVector<f64>, &'static str> {
    let n = a.nrows();
    let (mut ap, mut ai, mut ax) = a.clone().disassemble();
    let mut b: Vec<f64> = rhs.iter().copied().collect();
    solver.solve(&mut ap, &mut ai, &mut ax, &mut b, n)?;
    Ok(DVector::from_vec(b))
}

/// Solves a complex sparse system `Y v = i` by expanding it into the real
/// 2n-by-2n block form `[[G, -B], [B, G]] [x; y] = [Re(i); Im(i)]` where
/// `Y = G + jB`, so the real LU backends cover complex solves too.
pub(crate) fn solve_complex<S: Solve>(
    solver: &mut S,
    y: &CscMatrix<Complex64>,
    rhs: &DVector<Complex64>,
) -> Result<DVector<Complex64>, &'static str> {
    let n = y.nrows();
    let (g, b) = y.real_imag();
    let neg_b = CscMatrix::try_from_pattern_and_values(
        b.pattern().clone(),
        b.values().iter().map(|v| -v).collect(),
    )
    .expect("pattern unchanged");

    let top = csc_hstack(&[&g, &neg_b]);
    let bottom = csc_hstack(&[&b, &g]);
    let block = csc_vstack(&[&top, &bottom]);

    let mut stacked = DVector::zeros(2 * n);
    for k in 0..n {
        stacked[k] = rhs[k].re;
        stacked[n + k] = rhs[k].im;
    }
    let x = solve_real(solver, &block, &stacked)?;
    Ok(DVector::from_fn(n, |k, _| Complex64::new(x[k], x[n + k])))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::dvector;
    use nalgebra_sparse::CooMatrix;

    #[test]
    fn complex_solve_matches_hand_solution() {
        // (2 + j) v0 = 1, diagonal system with a coupling term on v1.
        let mut coo = CooMatrix::new(2, 2);
        coo.push(0, 0, Complex64::new(2.0, 1.0));
        coo.push(1, 1, Complex64::new(1.0, -1.0));
        coo.push(1, 0, Complex64::new(0.5, 0.0));
        let y = CscMatrix::from(&coo);
        let rhs = dvector![Complex64::new(1.0, 0.0), Complex64::new(0.0, 1.0)];

        let mut solver = DefaultSolver::default();
        let v = solve_complex(&mut solver, &y, &rhs).unwrap();

        let residual = &y * &v - rhs;
        for r in residual.iter() {
            assert_relative_eq!(r.norm(), 0.0, epsilon = 1e-10);
        }
    }

    #[test]
    fn real_solve_roundtrip() {
        let mut coo = CooMatrix::new(2, 2);
        coo.push(0, 0, 4.0);
        coo.push(0, 1, 1.0);
        coo.push(1, 0, 1.0);
        coo.push(1, 1, 3.0);
        let a = CscMatrix::from(&coo);
        let rhs = dvector![1.0, 2.0];
        let mut solver = DefaultSolver::default();
        let x = solve_real(&mut solver, &a, &rhs).unwrap();
        assert_relative_eq!(4.0 * x[0] + x[1], 1.0, epsilon = 1e-12);
        assert_relative_eq!(x[0] + 3.0 * x[1], 2.0, epsilon = 1e-12);
    }
}
