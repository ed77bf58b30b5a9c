//! Stamp-accumulating admittance matrix with modified-nodal-analysis
//! extensions.
//!
//! The matrix is built by accumulating Kirchhoff current-law stamps per
//! element. Stamps land in triplet form and duplicates are summed on
//! conversion, so accumulation order never changes the result. Ideal
//! elements (gyrators, controlled sources, ideal transformers) are stamped
//! as linear constraint rows over auxiliary current unknowns instead of
//! nonlinear bus constraints, so one direct solve of `Y v = i` already
//! yields the correct terminal relationships.

use nalgebra::DVector;
use nalgebra_sparse::{CooMatrix, CscMatrix};
use num_complex::Complex64;

use super::error::{ConfigError, GridResult};

/// Node reference for the network ground. Stamps against ground drop the
/// grounded side and leave a self-loop on the other.
pub const GND: i64 = -1;

/// Square complex admittance matrix over node positions, plus auxiliary
/// rows/columns for internal branch-current unknowns.
#[derive(Debug, Clone, Default)]
pub struct AdmittanceMatrix {
    order: usize,
    triplets: Vec<(usize, usize, Complex64)>,
    /// Sum of physical branch admittances incident to each node. Constraint
    /// stamps from ideal elements do not contribute.
    row_sums: Vec<Complex64>,
    internal_currents: Vec<usize>,
}

impl AdmittanceMatrix {
    pub fn new(nodes: usize) -> Self {
        Self {
            order: nodes,
            triplets: Vec::new(),
            row_sums: vec![Complex64::default(); nodes],
            internal_currents: Vec::new(),
        }
    }

    /// Total number of unknowns: physical nodes plus internal currents.
    pub fn order(&self) -> usize {
        self.order
    }

    /// Positions holding internal branch-current unknowns.
    pub fn internal_currents(&self) -> &[usize] {
        &self.internal_currents
    }

    /// Appends one auxiliary unknown for an internal branch current and
    /// returns its position.
    pub fn push_internal_current(&mut self) -> usize {
        let pos = self.order;
        self.order += 1;
        self.row_sums.push(Complex64::default());
        self.internal_currents.push(pos);
        pos
    }

    fn check(&self, node: i64) -> GridResult<Option<usize>> {
        if node == GND {
            return Ok(None);
        }
        if node < 0 || node as usize >= self.order {
            return Err(ConfigError::IndexOutOfRange {
                index: node,
                count: self.order,
            }
            .into());
        }
        Ok(Some(node as usize))
    }

    fn stamp(&mut self, row: Option<usize>, col: Option<usize>, value: Complex64) {
        if let (Some(r), Some(c)) = (row, col) {
            self.triplets.push((r, c, value));
        }
    }

    /// Stamps a branch admittance between `a` and `b`, or a self-loop to
    /// ground when one side is [`GND`].
    pub fn add_connection(&mut self, a: i64, b: i64, admittance: Complex64) -> GridResult<()> {
        let a = self.check(a)?;
        let b = self.check(b)?;
        self.stamp(a, a, admittance);
        self.stamp(b, b, admittance);
        self.stamp(a, b, -admittance);
        self.stamp(b, a, -admittance);
        if let Some(a) = a {
            self.row_sums[a] += admittance;
        }
        if let Some(b) = b {
            self.row_sums[b] += admittance;
        }
        Ok(())
    }

    /// Voltage-controlled current source: a current
    /// `g * (V(control_p) - V(control_n))` flows from `output_p` to
    /// `output_n` inside the element.
    pub fn add_voltage_controlled_current_source(
        &mut self,
        control_p: i64,
        control_n: i64,
        output_p: i64,
        output_n: i64,
        g: Complex64,
    ) -> GridResult<()> {
        let cp = self.check(control_p)?;
        let cn = self.check(control_n)?;
        let op = self.check(output_p)?;
        let on = self.check(output_n)?;
        self.stamp(op, cp, g);
        self.stamp(op, cn, -g);
        self.stamp(on, cp, -g);
        self.stamp(on, cn, g);
        Ok(())
    }

    /// Ideal gyrator, expressed as two antisymmetric controlled sources.
    pub fn add_gyrator(
        &mut self,
        input_p: i64,
        input_n: i64,
        output_p: i64,
        output_n: i64,
        g: Complex64,
    ) -> GridResult<()> {
        self.add_voltage_controlled_current_source(output_p, output_n, input_p, input_n, g)?;
        self.add_voltage_controlled_current_source(input_p, input_n, output_p, output_n, -g)
    }

    /// Ideal transformer `V_in = ratio * V_out` with zero net complex power.
    ///
    /// `internal_current` is the auxiliary unknown carrying the (scaled)
    /// branch current. `weight` conditions the constraint row; it cancels
    /// out of the solved voltages.
    pub fn add_ideal_transformer(
        &mut self,
        input_p: i64,
        input_n: i64,
        output_p: i64,
        output_n: i64,
        internal_current: i64,
        ratio: Complex64,
        weight: f64,
    ) -> GridResult<()> {
        let ip = self.check(input_p)?;
        let i_n = self.check(input_n)?;
        let op = self.check(output_p)?;
        let on = self.check(output_n)?;
        let k = self
            .check(internal_current)?
            .ok_or(ConfigError::IndexOutOfRange {
                index: internal_current,
                count: self.order,
            })?;
        if !self.internal_currents.contains(&k) {
            self.internal_currents.push(k);
        }
        let w = Complex64::new(weight, 0.0);
        let rw = ratio * w;
        let crw = ratio.conj() * w;

        // Current column: +w into the input pair, -conj(ratio)*w into the
        // output pair, which makes the element lossless for any ratio.
        self.stamp(ip, Some(k), w);
        self.stamp(i_n, Some(k), -w);
        self.stamp(op, Some(k), -crw);
        self.stamp(on, Some(k), crw);
        // Constraint row: w * (V_in - ratio * V_out) = 0.
        self.stamp(Some(k), ip, w);
        self.stamp(Some(k), i_n, -w);
        self.stamp(Some(k), op, -rw);
        self.stamp(Some(k), on, rw);
        Ok(())
    }

    /// Per-node sums of incident branch admittances.
    pub fn row_sums(&self) -> DVector<Complex64> {
        DVector::from_column_slice(&self.row_sums)
    }

    /// Assembles the accumulated stamps. Duplicate stamps are summed.
    pub fn to_csc(&self) -> CscMatrix<Complex64> {
        let mut coo = CooMatrix::new(self.order, self.order);
        for &(r, c, v) in &self.triplets {
            coo.push(r, c, v);
        }
        CscMatrix::from(&coo)
    }

    /// Eliminates positions with already-known voltages (PV and slack).
    ///
    /// Returns the matrix restricted to the unknown positions together with
    /// the constant-current vector `-Y_uk * v_known` that carries the known
    /// voltages over to the right-hand side, so the remaining system is
    /// `Y_uu * v_unknown = i + i_known`.
    pub fn create_reduced_admittance_matrix(
        &self,
        unknown: &[usize],
        known: &[usize],
        known_voltages: &DVector<Complex64>,
    ) -> GridResult<(CscMatrix<Complex64>, DVector<Complex64>)> {
        if known.len() != known_voltages.len() {
            return Err(ConfigError::DimensionMismatch {
                expected: known.len(),
                got: known_voltages.len(),
            }
            .into());
        }
        for &idx in unknown.iter().chain(known.iter()) {
            if idx >= self.order {
                return Err(ConfigError::IndexOutOfRange {
                    index: idx as i64,
                    count: self.order,
                }
                .into());
            }
        }
        Ok(reduce_admittance(
            &self.to_csc(),
            unknown,
            known,
            known_voltages,
        ))
    }
}

/// Restriction of `y` to the unknown rows/columns, plus the equivalent
/// current injections produced by the known voltages.
pub(crate) fn reduce_admittance(
    y: &CscMatrix<Complex64>,
    unknown: &[usize],
    known: &[usize],
    known_voltages: &DVector<Complex64>,
) -> (CscMatrix<Complex64>, DVector<Complex64>) {
    let mut unknown_pos = vec![usize::MAX; y.nrows()];
    for (slot, &idx) in unknown.iter().enumerate() {
        unknown_pos[idx] = slot;
    }
    let mut known_pos = vec![usize::MAX; y.nrows()];
    for (slot, &idx) in known.iter().enumerate() {
        known_pos[idx] = slot;
    }

    let mut coo = CooMatrix::new(unknown.len(), unknown.len());
    let mut currents = DVector::zeros(unknown.len());
    for (row, col, &value) in y.triplet_iter() {
        let r = unknown_pos[row];
        if r == usize::MAX {
            continue;
        }
        let c = unknown_pos[col];
        if c != usize::MAX {
            coo.push(r, c, value);
        } else if known_pos[col] != usize::MAX {
            currents[r] -= value * known_voltages[known_pos[col]];
        }
    }
    (CscMatrix::from(&coo), currents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basic::solver::{DefaultSolver, solve_complex};
    use approx::assert_relative_eq;
    use nalgebra::dvector;

    fn entry(m: &CscMatrix<Complex64>, r: usize, c: usize) -> Complex64 {
        m.get_entry(r, c)
            .map(|e| e.into_value())
            .unwrap_or_default()
    }

    #[test]
    fn connection_stamps_diagonal_pair() {
        let mut y = AdmittanceMatrix::new(2);
        let g = Complex64::new(0.1, -0.5);
        y.add_connection(0, 1, g).unwrap();
        let m = y.to_csc();
        assert_eq!(entry(&m, 0, 0), g);
        assert_eq!(entry(&m, 1, 1), g);
        assert_eq!(entry(&m, 0, 1), -g);
        assert_eq!(entry(&m, 1, 0), -g);
    }

    #[test]
    fn ground_connection_is_self_loop() {
        let mut y = AdmittanceMatrix::new(1);
        let g = Complex64::new(2.0, 0.0);
        y.add_connection(0, GND, g).unwrap();
        let m = y.to_csc();
        assert_eq!(entry(&m, 0, 0), g);
        assert_eq!(m.nnz(), 1);
    }

    #[test]
    fn stamping_order_is_commutative() {
        let stamps = [
            (0i64, 1i64, Complex64::new(1.0, -2.0)),
            (1, 2, Complex64::new(0.5, 0.0)),
            (0, GND, Complex64::new(0.0, 1.5)),
            (0, 1, Complex64::new(0.25, 0.25)),
            (2, GND, Complex64::new(3.0, -1.0)),
        ];
        let mut forward = AdmittanceMatrix::new(3);
        for &(a, b, g) in &stamps {
            forward.add_connection(a, b, g).unwrap();
        }
        let mut reversed = AdmittanceMatrix::new(3);
        for &(a, b, g) in stamps.iter().rev() {
            reversed.add_connection(a, b, g).unwrap();
        }
        let mf = forward.to_csc();
        let mr = reversed.to_csc();
        for r in 0..3 {
            for c in 0..3 {
                assert_eq!(entry(&mf, r, c), entry(&mr, r, c));
            }
        }
        assert_eq!(forward.row_sums(), reversed.row_sums());
    }

    #[test]
    fn row_sums_accumulate_incident_branches() {
        let mut y = AdmittanceMatrix::new(3);
        y.add_connection(0, 1, Complex64::new(1.0, 0.0)).unwrap();
        y.add_connection(1, 2, Complex64::new(0.0, -2.0)).unwrap();
        y.add_connection(1, GND, Complex64::new(0.5, 0.0)).unwrap();
        let sums = y.row_sums();
        assert_eq!(sums[0], Complex64::new(1.0, 0.0));
        assert_eq!(sums[1], Complex64::new(1.5, -2.0));
        assert_eq!(sums[2], Complex64::new(0.0, -2.0));
    }

    #[test]
    fn out_of_range_node_is_config_error() {
        let mut y = AdmittanceMatrix::new(2);
        assert!(y.add_connection(0, 2, Complex64::new(1.0, 0.0)).is_err());
        assert!(y.add_connection(-2, 0, Complex64::new(1.0, 0.0)).is_err());
    }

    #[test]
    fn reduction_dimension_mismatch_is_config_error() {
        let y = AdmittanceMatrix::new(3);
        let err = y
            .create_reduced_admittance_matrix(&[0], &[1, 2], &dvector![Complex64::new(1.0, 0.0)])
            .unwrap_err();
        assert!(err.to_string().contains("known"));
    }

    #[test]
    fn reduction_moves_known_voltages_to_rhs() {
        // Chain 0 -1- 1 -1- 2 with unit admittances, V2 fixed at 1+0j.
        let mut y = AdmittanceMatrix::new(3);
        let one = Complex64::new(1.0, 0.0);
        y.add_connection(0, 1, one).unwrap();
        y.add_connection(1, 2, one).unwrap();
        let (reduced, extra) = y
            .create_reduced_admittance_matrix(&[0, 1], &[2], &dvector![one])
            .unwrap();
        assert_eq!(entry(&reduced, 0, 0), one);
        assert_eq!(entry(&reduced, 1, 1), 2.0 * one);
        assert_eq!(entry(&reduced, 0, 1), -one);
        // -Y_uk * V_k: node 1 sees +1 injected from the fixed node.
        assert_eq!(extra[0], Complex64::default());
        assert_eq!(extra[1], one);
    }

    #[test]
    fn gyrator_couples_ports_antisymmetrically() {
        let mut y = AdmittanceMatrix::new(2);
        let g = Complex64::new(0.2, 0.0);
        y.add_gyrator(0, GND, 1, GND, g).unwrap();
        let m = y.to_csc();
        assert_eq!(entry(&m, 0, 1), g);
        assert_eq!(entry(&m, 1, 0), -g);
        assert_eq!(entry(&m, 0, 0), Complex64::default());
    }

    #[test]
    fn ideal_transformer_fixes_ratio_and_conserves_power() {
        for &(re, im) in &[(2.0, 0.0), (0.5, 0.0), (1.0, 0.4)] {
            let ratio = Complex64::new(re, im);
            let weight = 3.0;
            // Node 0: fixed source side. Node 1: output with a load to
            // ground. Position 2 carries the transformer current.
            let mut y = AdmittanceMatrix::new(2);
            let aux = y.push_internal_current() as i64;
            let load = Complex64::new(0.8, -0.3);
            y.add_connection(1, GND, load).unwrap();
            y.add_ideal_transformer(0, GND, 1, GND, aux, ratio, weight)
                .unwrap();

            let v_in = Complex64::new(1.0, 0.0);
            let (reduced, extra) = y
                .create_reduced_admittance_matrix(&[1, 2], &[0], &dvector![v_in])
                .unwrap();
            let mut solver = DefaultSolver::default();
            let v = solve_complex(&mut solver, &reduced, &extra).unwrap();
            let v_out = v[0];
            let x_aux = v[1];

            assert_relative_eq!((v_in - ratio * v_out).norm(), 0.0, epsilon = 1e-12);

            let w = Complex64::new(weight, 0.0);
            let s_in = v_in * (w * x_aux).conj();
            let s_out = v_out * (-ratio.conj() * w * x_aux).conj();
            assert_relative_eq!((s_in + s_out).norm(), 0.0, epsilon = 1e-12);
        }
    }
}
