use nalgebra::Complex;
use nalgebra_sparse::CscMatrix;
use simba::simd::SimdRealField;

/// Entry-wise complex conjugate for sparse matrices.
pub(crate) trait Conjugate {
    type Mat;

    fn conjugate(&self) -> Self::Mat;
}

impl<T: SimdRealField + Copy> Conjugate for CscMatrix<Complex<T>> {
    type Mat = CscMatrix<Complex<T>>;

    fn conjugate(&self) -> Self::Mat {
        let values = self.values().iter().map(|v| v.conj()).collect();
        CscMatrix::try_from_pattern_and_values(self.pattern().clone(), values)
            .expect("pattern unchanged")
    }
}

/// Splits a complex sparse matrix into its real and imaginary parts,
/// both sharing the original sparsity pattern.
pub(crate) trait RealImage {
    type Mat;

    fn real_imag(&self) -> (Self::Mat, Self::Mat);

    fn imag(&self) -> Self::Mat;
}

impl<T: SimdRealField + Copy> RealImage for CscMatrix<Complex<T>> {
    type Mat = CscMatrix<T>;

    fn real_imag(&self) -> (Self::Mat, Self::Mat) {
        let re = self.values().iter().map(|v| v.re).collect();
        let im = self.values().iter().map(|v| v.im).collect();
        let real_mat = CscMatrix::try_from_pattern_and_values(self.pattern().clone(), re)
            .expect("pattern unchanged");
        let imag_mat = CscMatrix::try_from_pattern_and_values(self.pattern().clone(), im)
            .expect("pattern unchanged");
        (real_mat, imag_mat)
    }

    fn imag(&self) -> Self::Mat {
        let im = self.values().iter().map(|v| v.im).collect();
        CscMatrix::try_from_pattern_and_values(self.pattern().clone(), im)
            .expect("pattern unchanged")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra_sparse::CooMatrix;
    use num_complex::Complex64;

    fn sample() -> CscMatrix<Complex64> {
        let mut a = CooMatrix::new(3, 3);
        a.push(0, 0, Complex64::new(1.0, -1.0));
        a.push(2, 1, Complex64::new(3.0, 1.0));
        a.push(1, 2, Complex64::new(0.0, -2.5));
        CscMatrix::from(&a)
    }

    #[test]
    fn conjugate_flips_imaginary() {
        let a = sample();
        let c = a.conjugate();
        assert_eq!(c.get_entry(0, 0).unwrap().into_value(), Complex64::new(1.0, 1.0));
        assert_eq!(c.get_entry(2, 1).unwrap().into_value(), Complex64::new(3.0, -1.0));
    }

    #[test]
    fn real_imag_split() {
        let a = sample();
        let (re, im) = a.real_imag();
        assert_eq!(re.get_entry(0, 0).unwrap().into_value(), 1.0);
        assert_eq!(im.get_entry(0, 0).unwrap().into_value(), -1.0);
        assert_eq!(im.get_entry(1, 2).unwrap().into_value(), -2.5);
        assert_eq!(re.nnz(), a.nnz());
    }
}
