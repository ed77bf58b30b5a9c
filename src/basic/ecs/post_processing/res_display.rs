//! Table rows for the markdown result printers, derived from the result
//! components themselves.

use nalgebra::ComplexField;
use num_complex::ComplexFloat;
use tabled::Tabled;

use crate::basic::ecs::elements::{BusID, FromNode, TargetNode, ToNode};

use super::{BranchResult, LoadResult, SBusResult, VBusResult};

fn watts(value: &f64) -> String {
    format!("{value:.3}")
}

fn volts(value: &f64) -> String {
    format!("{value:.3}")
}

fn degrees(value: &f64) -> String {
    format!("{value:.5}")
}

#[derive(Debug, Tabled)]
pub(crate) struct BusRow {
    #[tabled(rename = "bus")]
    pub(crate) node: i64,
    #[tabled(rename = "vm_v", display_with = "volts")]
    pub(crate) magnitude: f64,
    #[tabled(rename = "va_deg", display_with = "degrees")]
    pub(crate) angle: f64,
    #[tabled(rename = "p_w", display_with = "watts")]
    pub(crate) active: f64,
    #[tabled(rename = "q_var", display_with = "watts")]
    pub(crate) reactive: f64,
}

impl From<(&BusID, &VBusResult, &SBusResult)> for BusRow {
    fn from((node, v, s): (&BusID, &VBusResult, &SBusResult)) -> Self {
        Self {
            node: node.0,
            magnitude: v.0.modulus(),
            angle: v.0.argument().to_degrees(),
            active: s.0.re(),
            reactive: s.0.im(),
        }
    }
}

#[derive(Debug, Tabled)]
pub(crate) struct LoadRow {
    #[tabled(rename = "node")]
    pub(crate) node: i64,
    #[tabled(rename = "p_w", display_with = "watts")]
    pub(crate) active: f64,
    #[tabled(rename = "q_var", display_with = "watts")]
    pub(crate) reactive: f64,
}

impl From<(&TargetNode, &LoadResult)> for LoadRow {
    fn from((target, s): (&TargetNode, &LoadResult)) -> Self {
        Self {
            node: target.0,
            active: s.0.re(),
            reactive: s.0.im(),
        }
    }
}

#[derive(Debug, Tabled)]
pub(crate) struct BranchRow {
    #[tabled(rename = "from")]
    pub(crate) from: i64,
    #[tabled(rename = "to")]
    pub(crate) to: i64,
    #[tabled(rename = "p_from_w", display_with = "watts")]
    pub(crate) p_from: f64,
    #[tabled(rename = "q_from_var", display_with = "watts")]
    pub(crate) q_from: f64,
    #[tabled(rename = "p_to_w", display_with = "watts")]
    pub(crate) p_to: f64,
    #[tabled(rename = "q_to_var", display_with = "watts")]
    pub(crate) q_to: f64,
    #[tabled(rename = "p_loss_w", display_with = "watts")]
    pub(crate) p_loss: f64,
}

impl From<(&FromNode, &ToNode, &BranchResult)> for BranchRow {
    fn from((from, to, flow): (&FromNode, &ToNode, &BranchResult)) -> Self {
        Self {
            from: from.0,
            to: to.0,
            p_from: flow.s_from.re(),
            q_from: flow.s_from.im(),
            p_to: flow.s_to.re(),
            q_to: flow.s_to.im(),
            p_loss: flow.loss().re(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_complex::Complex64;

    #[test]
    fn bus_row_carries_si_quantities() {
        let row = BusRow::from((
            &BusID(3),
            &VBusResult(Complex64::from_polar(230.0, std::f64::consts::FRAC_PI_2)),
            &SBusResult(Complex64::new(10.0, 2.5)),
        ));
        assert_eq!(row.node, 3);
        assert_eq!(volts(&row.magnitude), "230.000");
        assert_eq!(degrees(&row.angle), "90.00000");
        assert_eq!(watts(&row.active), "10.000");
        assert_eq!(watts(&row.reactive), "2.500");
    }

    #[test]
    fn branch_row_reports_the_loss() {
        let row = BranchRow::from((
            &FromNode(0),
            &ToNode(1),
            &BranchResult {
                s_from: Complex64::new(10.1, 1.0),
                s_to: Complex64::new(-10.0, -0.9),
            },
        ));
        assert_eq!(watts(&row.p_loss), "0.100");
    }
}
