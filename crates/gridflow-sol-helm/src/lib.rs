//! Thin ownership layer over the native arbitrary-precision holomorphic
//! embedding solver.
//!
//! The native component is a black box reached through an integer handle:
//! `helm_create` allocates one solver instance, typed setters fill in the
//! admittance matrix, row sums, constant currents and bus data,
//! `helm_calculate` runs the series expansion and the getters read the
//! result back. [`HelmSolver`] owns exactly one handle and releases it on
//! drop, so early returns cannot leak native memory.
//!
//! Calling a getter before `calculate` is undefined on the native side;
//! the wrapper tracks that state and returns an error instead.

#![allow(non_snake_case)]

use std::fmt;

mod ffi {
    #[link(name = "helmsolver")]
    extern "C" {
        pub fn helm_create(
            target_precision: f64,
            coefficient_count: i64,
            node_count: i64,
            pq_bus_count: i64,
            pv_bus_count: i64,
            nominal_voltage: f64,
            precision_bits: i64,
            solver_kind: i64,
        ) -> i64;
        pub fn helm_delete(handle: i64);
        pub fn helm_set_admittance(handle: i64, row: i64, col: i64, re: f64, im: f64);
        pub fn helm_set_admittance_row_sum(handle: i64, row: i64, re: f64, im: f64);
        pub fn helm_set_constant_current(handle: i64, node: i64, re: f64, im: f64);
        pub fn helm_set_pq_bus(handle: i64, slot: i64, node: i64, p: f64, q: f64);
        pub fn helm_set_pv_bus(handle: i64, slot: i64, node: i64, p: f64, magnitude: f64);
        pub fn helm_calculate(handle: i64);
        pub fn helm_voltage_real(handle: i64, node: i64) -> f64;
        pub fn helm_voltage_imag(handle: i64, node: i64) -> f64;
        pub fn helm_coefficient_real(handle: i64, step: i64, node: i64) -> f64;
        pub fn helm_coefficient_imag(handle: i64, step: i64, node: i64) -> f64;
        pub fn helm_progress(handle: i64) -> f64;
        pub fn helm_relative_power_error(handle: i64) -> f64;
        pub fn helm_maximum_possible_coefficient_count(handle: i64) -> i64;
    }
}

/// Construction parameters forwarded verbatim to `helm_create`.
#[derive(Debug, Clone, Copy)]
pub struct HelmConfig {
    pub target_precision: f64,
    pub coefficient_count: i64,
    pub node_count: i64,
    pub pq_bus_count: i64,
    pub pv_bus_count: i64,
    pub nominal_voltage: f64,
    pub precision_bits: i64,
    pub solver_kind: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum HelmError {
    /// The native side returned a negative handle; no solver was allocated.
    Allocation(i64),
    /// A node, slot or step index does not fit the declared counts.
    IndexOutOfRange { what: &'static str, index: i64, count: i64 },
    /// A getter was used before `calculate`.
    NotCalculated,
}

impl fmt::Display for HelmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HelmError::Allocation(code) => {
                write!(f, "native solver allocation failed with handle {}", code)
            }
            HelmError::IndexOutOfRange { what, index, count } => {
                write!(f, "{} index {} out of range (count {})", what, index, count)
            }
            HelmError::NotCalculated => {
                write!(f, "solver results requested before calculate()")
            }
        }
    }
}

impl std::error::Error for HelmError {}

fn check_index(what: &'static str, index: i64, count: i64) -> Result<(), HelmError> {
    if index < 0 || index >= count {
        return Err(HelmError::IndexOutOfRange { what, index, count });
    }
    Ok(())
}

/// Owner of one native solver handle.
pub struct HelmSolver {
    handle: i64,
    node_count: i64,
    pq_bus_count: i64,
    pv_bus_count: i64,
    coefficient_count: i64,
    calculated: bool,
}

impl HelmSolver {
    pub fn create(cfg: &HelmConfig) -> Result<Self, HelmError> {
        let handle = unsafe {
            ffi::helm_create(
                cfg.target_precision,
                cfg.coefficient_count,
                cfg.node_count,
                cfg.pq_bus_count,
                cfg.pv_bus_count,
                cfg.nominal_voltage,
                cfg.precision_bits,
                cfg.solver_kind,
            )
        };
        if handle < 0 {
            return Err(HelmError::Allocation(handle));
        }
        Ok(HelmSolver {
            handle,
            node_count: cfg.node_count,
            pq_bus_count: cfg.pq_bus_count,
            pv_bus_count: cfg.pv_bus_count,
            coefficient_count: cfg.coefficient_count,
            calculated: false,
        })
    }

    pub fn set_admittance(&mut self, row: i64, col: i64, re: f64, im: f64) -> Result<(), HelmError> {
        check_index("admittance row", row, self.node_count)?;
        check_index("admittance column", col, self.node_count)?;
        unsafe { ffi::helm_set_admittance(self.handle, row, col, re, im) };
        Ok(())
    }

    pub fn set_row_sum(&mut self, row: i64, re: f64, im: f64) -> Result<(), HelmError> {
        check_index("row sum", row, self.node_count)?;
        unsafe { ffi::helm_set_admittance_row_sum(self.handle, row, re, im) };
        Ok(())
    }

    pub fn set_constant_current(&mut self, node: i64, re: f64, im: f64) -> Result<(), HelmError> {
        check_index("current", node, self.node_count)?;
        unsafe { ffi::helm_set_constant_current(self.handle, node, re, im) };
        Ok(())
    }

    pub fn set_pq_bus(&mut self, slot: i64, node: i64, p: f64, q: f64) -> Result<(), HelmError> {
        check_index("pq slot", slot, self.pq_bus_count)?;
        check_index("pq node", node, self.node_count)?;
        unsafe { ffi::helm_set_pq_bus(self.handle, slot, node, p, q) };
        Ok(())
    }

    pub fn set_pv_bus(
        &mut self,
        slot: i64,
        node: i64,
        p: f64,
        magnitude: f64,
    ) -> Result<(), HelmError> {
        check_index("pv slot", slot, self.pv_bus_count)?;
        check_index("pv node", node, self.node_count)?;
        unsafe { ffi::helm_set_pv_bus(self.handle, slot, node, p, magnitude) };
        Ok(())
    }

    /// Runs the embedding; all setters must have been called before this.
    pub fn calculate(&mut self) {
        unsafe { ffi::helm_calculate(self.handle) };
        self.calculated = true;
    }

    pub fn voltage(&self, node: i64) -> Result<(f64, f64), HelmError> {
        if !self.calculated {
            return Err(HelmError::NotCalculated);
        }
        check_index("voltage node", node, self.node_count)?;
        let re = unsafe { ffi::helm_voltage_real(self.handle, node) };
        let im = unsafe { ffi::helm_voltage_imag(self.handle, node) };
        Ok((re, im))
    }

    pub fn coefficient(&self, step: i64, node: i64) -> Result<(f64, f64), HelmError> {
        if !self.calculated {
            return Err(HelmError::NotCalculated);
        }
        check_index("coefficient step", step, self.coefficient_count)?;
        check_index("coefficient node", node, self.node_count)?;
        let re = unsafe { ffi::helm_coefficient_real(self.handle, step, node) };
        let im = unsafe { ffi::helm_coefficient_imag(self.handle, step, node) };
        Ok((re, im))
    }

    pub fn progress(&self) -> f64 {
        unsafe { ffi::helm_progress(self.handle) }
    }

    pub fn relative_power_error(&self) -> f64 {
        unsafe { ffi::helm_relative_power_error(self.handle) }
    }

    /// How many series coefficients the native side could produce before
    /// numerical breakdown.
    pub fn maximum_possible_coefficient_count(&self) -> Result<i64, HelmError> {
        if !self.calculated {
            return Err(HelmError::NotCalculated);
        }
        Ok(unsafe { ffi::helm_maximum_possible_coefficient_count(self.handle) })
    }
}

impl Drop for HelmSolver {
    fn drop(&mut self) {
        unsafe { ffi::helm_delete(self.handle) };
    }
}

unsafe impl Send for HelmSolver {}

#[test]
fn index_check() {
    assert!(check_index("node", 3, 4).is_ok());
    assert!(check_index("node", 4, 4).is_err());
    assert!(check_index("node", -1, 4).is_err());
}

#[test]
fn error_display() {
    let e = HelmError::Allocation(-2);
    assert_eq!(
        format!("{}", e),
        "native solver allocation failed with handle -2"
    );
}
