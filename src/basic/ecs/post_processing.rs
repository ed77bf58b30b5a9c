//! Result translation back to SI units and display tables.
//!
//! The solver works in a shift-free per-unit system; translation multiplies
//! each bus voltage by its nominal magnitude and reapplies the nominal
//! transformer phase shift accumulated during topology validation. Bus
//! powers come from the full admittance matrix, demand counted positive.

use bevy_app::App;
use bevy_ecs::{prelude::*, system::RunSystemOnce};
use nalgebra::Complex;
use num_complex::Complex64;
use tabled::{Table, settings::Style};

mod res_display;
use res_display::{BranchRow, BusRow, LoadRow};

use crate::basic::admittance::GND;

use super::elements::{
    ActivePower, Admittance, BusID, ConstantImpedanceLoad, ConstantPowerLoad, FromNode,
    InternalNode, Line, NodeLookup, Port2, ReactivePower, TargetNode, ToNode, Transformer,
    VBase, VNominal,
};
use super::merge::NodeMapping;
use super::network::{DataOps, PowerGrid};
use super::powerflow::systems::{MatrixIndexMap, PowerFlowMat, PowerFlowResult};
use super::scaling::Scalers;
use super::topology::PhaseShiftMap;

/// Net bus power demand in watts (consumption positive).
#[derive(Debug, Component, Clone, serde::Serialize, serde::Deserialize)]
pub struct SBusResult(pub Complex64);

/// Bus voltage in volts, nominal phase shift reapplied.
#[derive(Debug, Component, Clone, serde::Serialize, serde::Deserialize)]
pub struct VBusResult(pub Complex64);

/// Power actually consumed by a load in watts. For a constant-impedance
/// load this follows the solved voltage rather than the specified power.
#[derive(Debug, Component, Clone, serde::Serialize, serde::Deserialize)]
pub struct LoadResult(pub Complex64);

/// Attaches [`SBusResult`] and [`VBusResult`] to every bus entity.
fn extract_res_bus(
    mut cmd: Commands,
    nodes: Res<NodeLookup>,
    mapping: Res<NodeMapping>,
    index: Res<MatrixIndexMap>,
    shifts: Option<Res<PhaseShiftMap>>,
    scalers: Res<Scalers>,
    nominals: Query<&VNominal>,
    mat: Res<PowerFlowMat>,
    res: Res<PowerFlowResult>,
) {
    let cv = &res.v;
    let injection = cv.component_mul(&(&mat.y_bus * cv).conjugate());
    let demand = injection.scale(-scalers.power_base);

    for (bus_id, entity) in nodes.iter() {
        let representative = mapping.map(bus_id);
        let Some(pos) = index.position_of(representative) else {
            continue;
        };
        let Ok(vn) = nominals.get(entity) else {
            continue;
        };
        let shift_deg = shifts
            .as_deref()
            .and_then(|s| s.get(&representative).copied())
            .unwrap_or(0.0);
        let v = res.v[pos] * *vn.0 * Complex::from_polar(1.0, shift_deg.to_radians());
        cmd.entity(entity)
            .insert((SBusResult(demand[pos]), VBusResult(v)));
    }
}

/// Power flow at the two ends of a branch element, in watts. Both values
/// are counted into the branch, so their sum is the branch loss.
#[derive(Debug, Component, Clone, serde::Serialize, serde::Deserialize)]
pub struct BranchResult {
    pub s_from: Complex64,
    pub s_to: Complex64,
}

impl BranchResult {
    pub fn loss(&self) -> Complex64 {
        self.s_from + self.s_to
    }
}

/// Attaches [`BranchResult`] to every line and transformer by summing the
/// currents its stamped child branches carry at each terminal. A merged
/// (zero-impedance) line has no stamps and gets no result.
fn extract_res_branch(
    mut cmd: Commands,
    mapping: Res<NodeMapping>,
    index: Res<MatrixIndexMap>,
    scalers: Res<Scalers>,
    res: Res<PowerFlowResult>,
    elements: Query<
        (Entity, &FromNode, &ToNode, &Children),
        Or<(With<Line>, With<Transformer>)>,
    >,
    branches: Query<(&Admittance, &Port2, &VBase)>,
) {
    for (entity, from, to, children) in elements.iter() {
        let f = mapping.map(from.0);
        let t = mapping.map(to.0);
        let (Some(pf), Some(pt)) = (index.position_of(f), index.position_of(t)) else {
            continue;
        };
        let (v_f, v_t) = (res.v[pf], res.v[pt]);

        let mut i_from = Complex64::default();
        let mut i_to = Complex64::default();
        for child in children {
            let Ok((y, port, v_base)) = branches.get(*child) else {
                continue;
            };
            let y_pu = y.0 * (v_base.0 * v_base.0) / scalers.power_base;
            let (a, b) = (port.0[0], port.0[1]);
            if (a == f && b == t) || (a == t && b == f) {
                i_from += y_pu * (v_f - v_t);
                i_to += y_pu * (v_t - v_f);
            } else if a == f && b == GND {
                i_from += y_pu * v_f;
            } else if a == t && b == GND {
                i_to += y_pu * v_t;
            }
        }

        cmd.entity(entity).insert(BranchResult {
            s_from: v_f * i_from.conj() * scalers.power_base,
            s_to: v_t * i_to.conj() * scalers.power_base,
        });
    }
}

/// Attaches [`LoadResult`] to every load. Constant-power loads consume
/// their specified power by definition; constant-impedance loads consume
/// `|V|^2 * conj(y)` at the solved voltage.
fn extract_res_load(
    mut cmd: Commands,
    nodes: Res<NodeLookup>,
    mapping: Res<NodeMapping>,
    index: Res<MatrixIndexMap>,
    res: Res<PowerFlowResult>,
    nominals: Query<&VNominal>,
    power_loads: Query<(Entity, &ActivePower, &ReactivePower), With<ConstantPowerLoad>>,
    impedance_loads: Query<(Entity, &TargetNode, &Children), With<ConstantImpedanceLoad>>,
    shunts: Query<&Admittance, With<ChildOf>>,
) {
    for (entity, p, q) in power_loads.iter() {
        cmd.entity(entity)
            .insert(LoadResult(-Complex64::new(*p.0, *q.0)));
    }

    for (entity, target, children) in impedance_loads.iter() {
        let Some(pos) = index.position_of(mapping.map(target.0)) else {
            continue;
        };
        let Some(bus_entity) = nodes.get_entity(target.0) else {
            continue;
        };
        let Ok(vn) = nominals.get(bus_entity) else {
            continue;
        };
        let v_abs2 = (res.v[pos] * *vn.0).norm_sqr();
        let mut consumed = Complex64::default();
        for child in children {
            if let Ok(y) = shunts.get(*child) {
                consumed += v_abs2 * y.0.conj();
            }
        }
        cmd.entity(entity).insert(LoadResult(consumed));
    }
}

/// Prints the per-bus results, internal nodes excluded.
fn print_res_bus(q: Query<(&BusID, &VBusResult, &SBusResult), Without<InternalNode>>) {
    let rows = q.iter().sort_by::<&BusID>(|a, b| a.cmp(b)).map(BusRow::from);
    let table = Table::new(rows).with(Style::markdown()).to_string();
    println!("{table}");
}

/// Prints the per-load results.
fn print_res_load(q: Query<(&TargetNode, &LoadResult)>) {
    let table = Table::new(q.iter().map(LoadRow::from))
        .with(Style::markdown())
        .to_string();
    println!("{table}");
}

/// Prints the per-branch power flows, delivered-side powers negative.
fn print_res_branch(q: Query<(&FromNode, &ToNode, &BranchResult)>) {
    let table = Table::new(q.iter().map(BranchRow::from))
        .with(Style::markdown())
        .to_string();
    println!("{table}");
}

/// Trait for post-processing after a power flow solve.
pub trait PostProcessing {
    /// Runs all result translation steps.
    fn post_process(&mut self);

    /// Prints the bus results.
    fn print_res_bus(&mut self);

    /// Prints the load results.
    fn print_res_load(&mut self);

    /// Prints the branch power flows.
    fn print_res_branch(&mut self);
}

impl PostProcessing for App {
    fn post_process(&mut self) {
        self.world_mut()
            .run_system_once(extract_res_bus)
            .expect("bus result extraction failed to run");
        self.world_mut()
            .run_system_once(extract_res_branch)
            .expect("branch result extraction failed to run");
        self.world_mut()
            .run_system_once(extract_res_load)
            .expect("load result extraction failed to run");
    }

    fn print_res_bus(&mut self) {
        self.world_mut()
            .run_system_once(print_res_bus)
            .expect("bus result display failed to run");
    }

    fn print_res_load(&mut self) {
        self.world_mut()
            .run_system_once(print_res_load)
            .expect("load result display failed to run");
    }

    fn print_res_branch(&mut self) {
        self.world_mut()
            .run_system_once(print_res_branch)
            .expect("branch result display failed to run");
    }
}

impl PostProcessing for PowerGrid {
    fn post_process(&mut self) {
        self.app_mut().post_process();
    }

    fn print_res_bus(&mut self) {
        self.app_mut().print_res_bus();
    }

    fn print_res_load(&mut self) {
        self.app_mut().print_res_load();
    }

    fn print_res_branch(&mut self) {
        self.app_mut().print_res_branch();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basic::ecs::elements::VBusPu;
    use crate::basic::ecs::network::PowerFlow;
    use crate::basic::ecs::powerflow::systems::PowerFlowResult;
    use crate::testcases;
    use approx::assert_relative_eq;
    use nalgebra::ComplexField;

    #[test]
    fn two_level_network_translates_back_to_si() {
        let mut grid = crate::basic::ecs::network::PowerGrid::from_network(
            &testcases::five_bus_two_level(),
        )
        .unwrap();
        grid.init_pf_net().unwrap();
        grid.run_pf();
        assert!(grid.world().resource::<PowerFlowResult>().converged);

        let lookup = grid.world().resource::<NodeLookup>();
        let e2 = lookup.get_entity(2).unwrap();
        let e4 = lookup.get_entity(4).unwrap();

        // The generator holds its regulated magnitude.
        let v4_pu = grid.get::<VBusPu>(e4).unwrap().0;
        assert_relative_eq!(v4_pu.modulus(), 20.2e3 / 20e3, epsilon = 1e-6);

        grid.post_process();

        // SI voltage on the low-voltage side carries the transformer's
        // nominal phase shift.
        let v2 = grid.get::<VBusResult>(e2).unwrap().0;
        let angle = v2.argument().to_degrees();
        assert!((140.0..160.0).contains(&angle), "angle was {angle}");
        assert!(v2.modulus() > 0.9 * 20e3 && v2.modulus() < 1.1 * 20e3);

        // The constant-impedance load consumes |V|^2-scaled power.
        let world = grid.world_mut();
        let mut q = world.query_filtered::<&LoadResult, With<ConstantImpedanceLoad>>();
        let consumed = q.single(world).unwrap().0;
        let scale = v4_pu.modulus_squared();
        assert_relative_eq!(consumed.re, scale * 4e5, max_relative = 1e-9);
        assert_relative_eq!(consumed.im, scale * 1e5, max_relative = 1e-9);

        grid.print_res_bus();
        grid.print_res_load();
        grid.print_res_branch();
    }

    #[test]
    fn bus_demand_matches_the_load() {
        let mut grid = crate::basic::ecs::network::PowerGrid::from_network(
            &testcases::two_bus_feed_and_load(),
        )
        .unwrap();
        grid.init_pf_net().unwrap();
        grid.run_pf();
        grid.post_process();

        let lookup = grid.world().resource::<NodeLookup>();
        let e1 = lookup.get_entity(1).unwrap();
        let demand = grid.get::<SBusResult>(e1).unwrap().0;
        assert_relative_eq!(demand.re, 10.0, epsilon = 1e-3);
        let v1 = grid.get::<VBusResult>(e1).unwrap().0;
        assert_relative_eq!(v1.re, 100.0 * (1.0 + 0.96f64.sqrt()) / 2.0, epsilon = 1e-2);

        // The line delivers the 10 W demand at its receiving end and
        // dissipates the I^2 R difference.
        let world = grid.world_mut();
        let mut q = world.query_filtered::<&BranchResult, With<Line>>();
        let flow = q.single(world).unwrap();
        assert_relative_eq!(flow.s_to.re, -10.0, epsilon = 1e-3);
        assert!(flow.loss().re > 0.0);
        assert_relative_eq!(flow.s_from.re, 10.0 + flow.loss().re, epsilon = 1e-9);
    }
}
