//! Per-unit base quantities and scaling.
//!
//! One scaler exists per voltage level; all levels share a single power
//! base so the per-unit network is one consistent system across
//! transformers.

use std::collections::BTreeMap;

use bevy_ecs::prelude::*;
use nalgebra::Complex;
use ordered_float::OrderedFloat;
use tracing::debug;

use super::elements::{ActivePower, ReactivePower, VNominal};

/// Derived base quantities for one voltage level.
///
/// `current_base = power / voltage`, `impedance_base = voltage^2 / power`;
/// admittances scale inversely to impedances.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DimensionScaler {
    pub voltage_base: f64,
    pub power_base: f64,
    pub current_base: f64,
    pub impedance_base: f64,
}

impl DimensionScaler {
    pub fn new(voltage_base: f64, power_base: f64) -> Self {
        Self {
            voltage_base,
            power_base,
            current_base: power_base / voltage_base,
            impedance_base: voltage_base * voltage_base / power_base,
        }
    }

    pub fn scale_voltage(&self, volts: Complex<f64>) -> Complex<f64> {
        volts / self.voltage_base
    }

    pub fn unscale_voltage(&self, pu: Complex<f64>) -> Complex<f64> {
        pu * self.voltage_base
    }

    pub fn scale_power(&self, watts: Complex<f64>) -> Complex<f64> {
        watts / self.power_base
    }

    pub fn unscale_power(&self, pu: Complex<f64>) -> Complex<f64> {
        pu * self.power_base
    }

    pub fn scale_current(&self, amps: Complex<f64>) -> Complex<f64> {
        amps / self.current_base
    }

    pub fn unscale_current(&self, pu: Complex<f64>) -> Complex<f64> {
        pu * self.current_base
    }

    pub fn scale_impedance(&self, ohms: Complex<f64>) -> Complex<f64> {
        ohms / self.impedance_base
    }

    pub fn unscale_impedance(&self, pu: Complex<f64>) -> Complex<f64> {
        pu * self.impedance_base
    }

    pub fn scale_admittance(&self, siemens: Complex<f64>) -> Complex<f64> {
        siemens * self.impedance_base
    }

    pub fn unscale_admittance(&self, pu: Complex<f64>) -> Complex<f64> {
        pu / self.impedance_base
    }
}

/// Resource holding the shared power base and one scaler per voltage
/// level, keyed by nominal voltage.
#[derive(Debug, Resource, Default)]
pub struct Scalers {
    pub power_base: f64,
    levels: BTreeMap<OrderedFloat<f64>, DimensionScaler>,
}

impl Scalers {
    pub fn get(&self, voltage_base: f64) -> Option<&DimensionScaler> {
        self.levels.get(&OrderedFloat(voltage_base))
    }

    pub fn insert_level(&mut self, voltage_base: f64) {
        self.levels.insert(
            OrderedFloat(voltage_base),
            DimensionScaler::new(voltage_base, self.power_base),
        );
    }
}

pub mod systems {
    use super::*;

    /// Chooses the global power base (the largest element power magnitude,
    /// 1 W when no powered element exists) and builds one scaler per
    /// distinct nominal voltage.
    pub fn init_scalers(
        mut cmd: Commands,
        powers: Query<(&ActivePower, Option<&ReactivePower>)>,
        nominals: Query<&VNominal>,
    ) {
        let power_base = powers
            .iter()
            .map(|(p, q)| Complex::new(*p.0, q.map_or(0.0, |q| *q.0)).norm())
            .fold(0.0f64, f64::max)
            .max(1.0);

        let mut scalers = Scalers {
            power_base,
            ..Default::default()
        };
        for vn in nominals.iter() {
            scalers.insert_level(*vn.0);
        }
        debug!(power_base, levels = scalers.levels.len(), "scalers ready");
        cmd.insert_resource(scalers);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn round_trips_all_quantities() {
        for &(v, p) in &[(100.0, 10.0), (20e3, 2.5e6), (0.4e3, 50e3)] {
            let scaler = DimensionScaler::new(v, p);
            let sample = Complex::new(3.7, -1.2);
            assert_relative_eq!(
                scaler.unscale_voltage(scaler.scale_voltage(sample)).re,
                sample.re,
                max_relative = 1e-12
            );
            assert_relative_eq!(
                scaler.unscale_power(scaler.scale_power(sample)).im,
                sample.im,
                max_relative = 1e-12
            );
            assert_relative_eq!(
                scaler.unscale_current(scaler.scale_current(sample)).re,
                sample.re,
                max_relative = 1e-12
            );
            assert_relative_eq!(
                scaler.unscale_impedance(scaler.scale_impedance(sample)).im,
                sample.im,
                max_relative = 1e-12
            );
            assert_relative_eq!(
                scaler
                    .unscale_admittance(scaler.scale_admittance(sample))
                    .re,
                sample.re,
                max_relative = 1e-12
            );
        }
    }

    #[test]
    fn derived_bases() {
        let scaler = DimensionScaler::new(100.0, 10.0);
        assert_relative_eq!(scaler.current_base, 0.1);
        assert_relative_eq!(scaler.impedance_base, 1000.0);
    }
}
