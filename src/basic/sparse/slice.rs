use nalgebra::Scalar;
use nalgebra_sparse::CscMatrix;

/// Extracts the rectangular block starting at `start_pos` with `shape`
/// (rows, cols) from a CSC matrix.
pub(crate) fn slice_csc_matrix_block<T: Scalar + Clone>(
    mat: &CscMatrix<T>,
    start_pos: (usize, usize),
    shape: (usize, usize),
) -> CscMatrix<T> {
    let (row0, col0) = start_pos;
    let (nrows, ncols) = shape;
    let mut values = Vec::new();
    let mut row_indices = Vec::new();
    let mut col_offsets = Vec::with_capacity(ncols + 1);
    col_offsets.push(0);

    for col in col0..col0 + ncols {
        let begin = mat.col_offsets()[col];
        let end = mat.col_offsets()[col + 1];
        for idx in begin..end {
            let row = mat.row_indices()[idx];
            if row >= row0 && row < row0 + nrows {
                row_indices.push(row - row0);
                values.push(mat.values()[idx].clone());
            }
        }
        col_offsets.push(values.len());
    }

    CscMatrix::try_from_csc_data(nrows, ncols, col_offsets, row_indices, values)
        .expect("block slice preserves CSC invariants")
}

/// Extracts columns `[start_col, end_col)` keeping all rows.
pub(crate) fn slice_csc_matrix<T: Scalar + Clone>(
    mat: &CscMatrix<T>,
    start_col: usize,
    end_col: usize,
) -> CscMatrix<T> {
    slice_csc_matrix_block(mat, (0, start_col), (mat.nrows(), end_col - start_col))
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra_sparse::CooMatrix;

    #[test]
    fn block_slice() {
        let mut a = CooMatrix::new(4, 4);
        for i in 0..4 {
            for j in 0..4 {
                a.push(i, j, (i * 4 + j) as f64);
            }
        }
        let a = CscMatrix::from(&a);
        let b = slice_csc_matrix_block(&a, (1, 2), (2, 2));
        assert_eq!(b.nrows(), 2);
        assert_eq!(b.ncols(), 2);
        assert_eq!(b.get_entry(0, 0).unwrap().into_value(), 6.0);
        assert_eq!(b.get_entry(1, 1).unwrap().into_value(), 11.0);
    }

    #[test]
    fn column_slice() {
        let mut a = CooMatrix::new(2, 3);
        a.push(0, 0, 1.0);
        a.push(1, 1, 2.0);
        a.push(0, 2, 3.0);
        let a = CscMatrix::from(&a);
        let b = slice_csc_matrix(&a, 1, 3);
        assert_eq!(b.ncols(), 2);
        assert_eq!(b.get_entry(1, 0).unwrap().into_value(), 2.0);
        assert_eq!(b.get_entry(0, 1).unwrap().into_value(), 3.0);
    }
}
