use crate::basic::sparse::conj::Conjugate;
use nalgebra::{Complex, DVector};
use nalgebra_sparse::CscMatrix;

/// Closed-form partial derivatives of the power injections with respect to
/// voltage magnitude and angle.
///
/// `i_bus` is the net current `Y*v - i_const`, so constant current
/// injections flow through the same formulas. The matrix notation follows
/// MATPOWER Technical Note 2 (Zimmerman, "AC Power Flows, Generalized OPF
/// Costs and their Derivatives using Complex Matrix Notation", 2010).
#[allow(non_snake_case)]
pub fn dSbus_dV(
    Ybus: &CscMatrix<Complex<f64>>,
    v: &DVector<Complex<f64>>,
    v_norm: &DVector<Complex<f64>>,
    i_bus: &DVector<Complex<f64>>,
) -> (CscMatrix<Complex<f64>>, CscMatrix<Complex<f64>>) {
    let diag_pattern = CscMatrix::identity(v.len());
    let mut diagVnorm = diag_pattern.clone();
    let mut diagV = diag_pattern.clone();
    let mut diagIbus = diag_pattern;
    diagVnorm.values_mut().copy_from_slice(v_norm.as_slice());
    diagV.values_mut().copy_from_slice(v.as_slice());
    diagIbus.values_mut().copy_from_slice(i_bus.as_slice());

    // dS/dVm = diag(V) * conj(Y * diag(Vnorm)) + conj(diag(Ibus)) * diag(Vnorm)
    let dS_dVm = &diagV * (Ybus * &diagVnorm).conjugate() + diagIbus.conjugate() * &diagVnorm;
    // dS/dVa = j * diag(V) * conj(diag(Ibus) - Y * diag(V))
    let dS_dVa = &diagV * (diagIbus - Ybus * &diagV).conjugate() * Complex::<f64>::i();
    (dS_dVm, dS_dVa)
}
