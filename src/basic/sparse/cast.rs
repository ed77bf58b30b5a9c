use nalgebra::Complex;
use nalgebra_sparse::CscMatrix;

/// Widens the scalar type of a sparse matrix without touching its pattern.
pub(crate) trait Cast<T> {
    type Mat;

    fn cast(&self) -> Self::Mat;
}

impl Cast<Complex<f64>> for CscMatrix<f64> {
    type Mat = CscMatrix<Complex<f64>>;

    fn cast(&self) -> Self::Mat {
        let values = self.values().iter().map(|x| Complex::new(*x, 0.0)).collect();
        CscMatrix::try_from_pattern_and_values(self.pattern().clone(), values)
            .expect("pattern and value length agree by construction")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra_sparse::CooMatrix;

    #[test]
    fn cast_preserves_pattern() {
        let mut a = CooMatrix::new(3, 3);
        a.push(0, 0, 2.0);
        a.push(2, 1, -1.5);
        let a = CscMatrix::from(&a);
        let c = a.cast();
        assert_eq!(c.nnz(), a.nnz());
        assert_eq!(c.get_entry(2, 1).unwrap().into_value(), Complex::new(-1.5, 0.0));
    }
}
