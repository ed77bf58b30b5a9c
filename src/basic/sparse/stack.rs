use nalgebra::Scalar;
use nalgebra_sparse::CscMatrix;

/// Horizontal concatenation of CSC matrices. All inputs must share a row
/// count; columns are appended left to right.
pub(crate) fn csc_hstack<T: Scalar + Clone>(blocks: &[&CscMatrix<T>]) -> CscMatrix<T> {
    assert!(!blocks.is_empty(), "hstack of zero blocks");
    let nrows = blocks[0].nrows();
    assert!(
        blocks.iter().all(|b| b.nrows() == nrows),
        "hstack blocks disagree on row count"
    );
    let ncols = blocks.iter().map(|b| b.ncols()).sum();
    let nnz = blocks.iter().map(|b| b.nnz()).sum();

    let mut col_offsets = Vec::with_capacity(ncols + 1);
    let mut row_indices = Vec::with_capacity(nnz);
    let mut values = Vec::with_capacity(nnz);
    col_offsets.push(0);

    for block in blocks {
        let base = values.len();
        for &offset in &block.col_offsets()[1..] {
            col_offsets.push(base + offset);
        }
        row_indices.extend_from_slice(block.row_indices());
        values.extend_from_slice(block.values());
    }

    CscMatrix::try_from_csc_data(nrows, ncols, col_offsets, row_indices, values)
        .expect("concatenation preserves CSC invariants")
}

/// Vertical concatenation of CSC matrices. All inputs must share a column
/// count; rows are appended top to bottom.
pub(crate) fn csc_vstack<T: Scalar + Clone>(blocks: &[&CscMatrix<T>]) -> CscMatrix<T> {
    assert!(!blocks.is_empty(), "vstack of zero blocks");
    let ncols = blocks[0].ncols();
    assert!(
        blocks.iter().all(|b| b.ncols() == ncols),
        "vstack blocks disagree on column count"
    );
    let nrows = blocks.iter().map(|b| b.nrows()).sum();
    let nnz = blocks.iter().map(|b| b.nnz()).sum();

    let mut col_offsets = Vec::with_capacity(ncols + 1);
    let mut row_indices = Vec::with_capacity(nnz);
    let mut values = Vec::with_capacity(nnz);
    col_offsets.push(0);

    for col in 0..ncols {
        let mut row_base = 0;
        for block in blocks {
            let begin = block.col_offsets()[col];
            let end = block.col_offsets()[col + 1];
            for idx in begin..end {
                row_indices.push(row_base + block.row_indices()[idx]);
                values.push(block.values()[idx].clone());
            }
            row_base += block.nrows();
        }
        col_offsets.push(values.len());
    }

    CscMatrix::try_from_csc_data(nrows, ncols, col_offsets, row_indices, values)
        .expect("concatenation preserves CSC invariants")
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra_sparse::CooMatrix;

    fn mat(nrows: usize, ncols: usize, entries: &[(usize, usize, f64)]) -> CscMatrix<f64> {
        let mut coo = CooMatrix::new(nrows, ncols);
        for &(i, j, v) in entries {
            coo.push(i, j, v);
        }
        CscMatrix::from(&coo)
    }

    #[test]
    fn hstack_two_blocks() {
        let a = mat(2, 2, &[(0, 0, 1.0), (1, 1, 2.0)]);
        let b = mat(2, 1, &[(0, 0, 3.0)]);
        let h = csc_hstack(&[&a, &b]);
        assert_eq!(h.nrows(), 2);
        assert_eq!(h.ncols(), 3);
        assert_eq!(h.get_entry(0, 2).unwrap().into_value(), 3.0);
        assert_eq!(h.get_entry(1, 1).unwrap().into_value(), 2.0);
    }

    #[test]
    fn vstack_two_blocks() {
        let a = mat(1, 2, &[(0, 0, 1.0)]);
        let b = mat(2, 2, &[(0, 1, 4.0), (1, 0, 5.0)]);
        let v = csc_vstack(&[&a, &b]);
        assert_eq!(v.nrows(), 3);
        assert_eq!(v.ncols(), 2);
        assert_eq!(v.get_entry(0, 0).unwrap().into_value(), 1.0);
        assert_eq!(v.get_entry(1, 1).unwrap().into_value(), 4.0);
        assert_eq!(v.get_entry(2, 0).unwrap().into_value(), 5.0);
    }

    #[test]
    fn stacks_compose_into_block_matrix() {
        let a = mat(2, 2, &[(0, 0, 1.0), (1, 1, 1.0)]);
        let b = mat(2, 2, &[(0, 1, 2.0)]);
        let top = csc_hstack(&[&a, &b]);
        let bottom = csc_hstack(&[&b, &a]);
        let full = csc_vstack(&[&top, &bottom]);
        assert_eq!(full.nrows(), 4);
        assert_eq!(full.ncols(), 4);
        assert_eq!(full.get_entry(2, 3).unwrap().into_value(), 2.0);
        assert_eq!(full.get_entry(3, 3).unwrap().into_value(), 1.0);
    }
}
