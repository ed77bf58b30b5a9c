//! Per-unit problem assembly and the solve system.
//!
//! Assembly runs once at startup: the branch stamps are converted to
//! per-unit, accumulated into the engine admittance matrix over compact
//! matrix positions, and the slack voltages are eliminated so the solver
//! family only ever sees unknowns. The solve system runs every update.

use std::collections::HashMap;

use bevy_ecs::{prelude::*, system::RunSystemOnce};
use nalgebra::DVector;
use num_complex::Complex64;
use num_traits::One;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::basic::admittance::{AdmittanceMatrix, GND};
use crate::basic::calculator::{
    CalculatorConfig, NodeVoltageCalculator, PowerFlowProblem, PqBus, PvBus, SolverSelection,
    default_fallback,
};
use crate::basic::ecs::elements::{
    Admittance, BusID, NodeLookup, Port2, SBusInjPu, VBase, VBusPu,
};
use crate::basic::ecs::merge::NodeMapping;
use crate::basic::ecs::network::AssemblyErrors;
use crate::basic::ecs::scaling::Scalers;
use crate::basic::error::{ConfigError, SolveError};

use super::init::{PQBus, PVBus, SlackBus};

/// Resource selecting the calculator and its parameters.
#[derive(Debug, Resource, Clone, Serialize, Deserialize)]
pub struct PowerFlowConfig {
    pub solver: SolverSelection,
    pub calculator: CalculatorConfig,
    /// Run the escalation cascade instead of the single selected solver.
    pub use_fallback: bool,
}

impl Default for PowerFlowConfig {
    fn default() -> Self {
        Self {
            solver: SolverSelection::NewtonRaphson,
            calculator: CalculatorConfig::default(),
            use_fallback: true,
        }
    }
}

/// Resource with the solved per-unit voltages over matrix positions,
/// slack values re-inserted.
#[derive(Debug, Default, Resource, Clone, Serialize, Deserialize)]
pub struct PowerFlowResult {
    pub v: DVector<Complex64>,
    pub iterations: usize,
    pub converged: bool,
}

/// Compact mapping between merged bus ids and admittance-matrix positions.
///
/// Only group representatives get a position; merged buses read their
/// representative's result.
#[derive(Debug, Default, Resource, Clone)]
pub struct MatrixIndexMap {
    ids: Vec<i64>,
    positions: HashMap<i64, usize>,
}

impl MatrixIndexMap {
    pub fn new(mut ids: Vec<i64>) -> Self {
        ids.sort_unstable();
        let positions = ids.iter().enumerate().map(|(pos, &id)| (id, pos)).collect();
        Self { ids, positions }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn position_of(&self, bus_id: i64) -> Option<usize> {
        self.positions.get(&bus_id).copied()
    }

    pub fn id_at(&self, position: usize) -> i64 {
        self.ids[position]
    }
}

/// Resource holding the assembled per-unit problem plus the bookkeeping
/// needed to expand a solution back over all matrix positions.
#[derive(Debug, Resource, Clone)]
pub struct PowerFlowMat {
    pub problem: PowerFlowProblem,
    /// Full per-unit bus admittance matrix over all positions, before the
    /// slack elimination. Post-processing derives bus powers from it.
    pub y_bus: nalgebra_sparse::CscMatrix<Complex64>,
    pub unknown_positions: Vec<usize>,
    pub slack_positions: Vec<usize>,
    pub slack_voltages: DVector<Complex64>,
}

/// Stamps every branch into the engine admittance matrix, converted to
/// per-unit with `y_pu = y * v_base^2 / s_base`.
pub(crate) fn create_admittance(
    scalers: Res<Scalers>,
    index: Res<MatrixIndexMap>,
    mut errors: ResMut<AssemblyErrors>,
    branches: Query<(&Admittance, &Port2, &VBase)>,
) -> AdmittanceMatrix {
    let s_base = scalers.power_base;
    let mut y = AdmittanceMatrix::new(index.len());

    let position = |node: i64| -> Result<i64, ConfigError> {
        if node == GND {
            return Ok(GND);
        }
        index
            .position_of(node)
            .map(|p| p as i64)
            .ok_or(ConfigError::UnknownNodeId(node))
    };

    for (admittance, port, v_base) in branches.iter() {
        let y_pu = admittance.0 * (v_base.0 * v_base.0) / s_base;
        let stamped = position(port.0[0])
            .map_err(Into::into)
            .and_then(|a| Ok((a, position(port.0[1])?)))
            .and_then(|(a, b)| y.add_connection(a, b, y_pu));
        if let Err(err) = stamped {
            errors.push(err);
        }
    }
    y
}

pub(crate) struct SystemBusStatus {
    s_bus: DVector<Complex64>,
    v_init: DVector<Complex64>,
    pq_positions: Vec<usize>,
    /// Position, real power, regulated magnitude.
    pv: Vec<(usize, f64, f64)>,
    slack: Vec<(usize, Complex64)>,
}

/// Collects injections, voltage seeds and bus categories over the matrix
/// positions. Buses without a position (merged away) are skipped; their
/// injections already landed on the representative during setup.
pub(crate) fn build_bus_status(
    index: Res<MatrixIndexMap>,
    pq: Query<&BusID, With<PQBus>>,
    pv: Query<(&BusID, &SBusInjPu, &VBusPu), (With<PVBus>, Without<SlackBus>)>,
    slack: Query<(&BusID, &VBusPu), With<SlackBus>>,
    sbus: Query<(&BusID, &SBusInjPu)>,
    vbus: Query<(&BusID, &VBusPu)>,
) -> SystemBusStatus {
    let nodes = index.len();
    let mut s_bus = DVector::zeros(nodes);
    let mut v_init = DVector::from_element(nodes, Complex64::one());

    for (bus_id, s) in sbus.iter() {
        if let Some(pos) = index.position_of(bus_id.0) {
            s_bus[pos] = s.0;
        }
    }
    for (bus_id, v) in vbus.iter() {
        if let Some(pos) = index.position_of(bus_id.0) {
            v_init[pos] = v.0;
        }
    }

    let mut pq_positions: Vec<usize> = pq
        .iter()
        .filter_map(|bus_id| index.position_of(bus_id.0))
        .collect();
    pq_positions.sort_unstable();

    let mut pv_list: Vec<(usize, f64, f64)> = pv
        .iter()
        .filter_map(|(bus_id, s, v)| {
            index
                .position_of(bus_id.0)
                .map(|pos| (pos, s.0.re, v.0.norm()))
        })
        .collect();
    pv_list.sort_unstable_by_key(|&(pos, ..)| pos);

    let mut slack_list: Vec<(usize, Complex64)> = slack
        .iter()
        .filter_map(|(bus_id, v)| index.position_of(bus_id.0).map(|pos| (pos, v.0)))
        .collect();
    slack_list.sort_unstable_by_key(|&(pos, _)| pos);

    SystemBusStatus {
        s_bus,
        v_init,
        pq_positions,
        pv: pv_list,
        slack: slack_list,
    }
}

/// Assembles the solver-facing problem: builds the index map, stamps the
/// per-unit admittance matrix, eliminates the slack positions and stores
/// everything as the [`PowerFlowMat`] resource.
///
/// Skipped entirely when earlier assembly stages reported errors.
pub fn init_states(world: &mut World) {
    if !world.resource::<AssemblyErrors>().is_empty() {
        return;
    }

    let mapping = world
        .get_resource::<NodeMapping>()
        .cloned()
        .unwrap_or_default();
    let ids: Vec<i64> = world
        .resource::<NodeLookup>()
        .iter()
        .map(|(id, _)| id)
        .filter(|&id| mapping.map(id) == id)
        .collect();
    world.insert_resource(MatrixIndexMap::new(ids));

    let y = world
        .run_system_once(create_admittance)
        .expect("admittance assembly system failed to run");
    let status = world
        .run_system_once(build_bus_status)
        .expect("bus status system failed to run");
    if !world.resource::<AssemblyErrors>().is_empty() {
        return;
    }

    let nodes = y.order();
    let slack_positions: Vec<usize> = status.slack.iter().map(|&(pos, _)| pos).collect();
    let slack_voltages = DVector::from_iterator(
        slack_positions.len(),
        status.slack.iter().map(|&(_, v)| v),
    );
    let unknown_positions: Vec<usize> =
        (0..nodes).filter(|p| !slack_positions.contains(p)).collect();

    let (reduced, extra_currents) = match y.create_reduced_admittance_matrix(
        &unknown_positions,
        &slack_positions,
        &slack_voltages,
    ) {
        Ok(reduction) => reduction,
        Err(err) => {
            world.resource_mut::<AssemblyErrors>().push(err);
            return;
        }
    };

    let mut to_reduced = vec![usize::MAX; nodes];
    for (slot, &pos) in unknown_positions.iter().enumerate() {
        to_reduced[pos] = slot;
    }

    let full_row_sums = y.row_sums();
    let row_sums = DVector::from_iterator(
        unknown_positions.len(),
        unknown_positions.iter().map(|&p| full_row_sums[p]),
    );
    let initial_voltages = DVector::from_iterator(
        unknown_positions.len(),
        unknown_positions.iter().map(|&p| status.v_init[p]),
    );

    let pq_buses: Vec<PqBus> = status
        .pq_positions
        .iter()
        .map(|&pos| PqBus {
            index: to_reduced[pos],
            power: status.s_bus[pos],
        })
        .collect();
    let pv_buses: Vec<PvBus> = status
        .pv
        .iter()
        .map(|&(pos, real_power, magnitude)| PvBus {
            index: to_reduced[pos],
            real_power,
            magnitude,
        })
        .collect();

    debug!(
        nodes,
        pq = pq_buses.len(),
        pv = pv_buses.len(),
        slack = slack_positions.len(),
        "per-unit problem assembled"
    );

    world.insert_resource(PowerFlowMat {
        y_bus: y.to_csc(),
        problem: PowerFlowProblem {
            admittances: reduced,
            row_sums,
            nominal_voltage: 1.0,
            initial_voltages,
            constant_currents: extra_currents,
            pq_buses,
            pv_buses,
        },
        unknown_positions,
        slack_positions,
        slack_voltages,
    });
}

/// ECS system that runs one solve per update with the configured
/// calculator (or the escalation cascade) and stores the result.
pub fn ecs_run_pf(mut cmd: Commands, mat: Res<PowerFlowMat>, cfg: Res<PowerFlowConfig>) {
    let built: Result<Box<dyn NodeVoltageCalculator>, _> = if cfg.use_fallback {
        default_fallback(&cfg.calculator).map(|c| Box::new(c) as Box<dyn NodeVoltageCalculator>)
    } else {
        cfg.solver.build(&cfg.calculator)
    };
    let mut calculator = match built {
        Ok(calculator) => calculator,
        Err(err) => {
            error!(%err, "calculator construction failed");
            return;
        }
    };

    let expand = |v: &DVector<Complex64>| {
        let nodes = mat.unknown_positions.len() + mat.slack_positions.len();
        let mut full = DVector::from_element(nodes, Complex64::one());
        for (slot, &pos) in mat.unknown_positions.iter().enumerate() {
            full[pos] = v[slot];
        }
        for (slot, &pos) in mat.slack_positions.iter().enumerate() {
            full[pos] = mat.slack_voltages[slot];
        }
        full
    };

    match calculator.calculate_unknown_voltages(&mat.problem) {
        Ok(v) => {
            cmd.insert_resource(PowerFlowResult {
                v: expand(&v),
                iterations: calculator.progress_handle().snapshot().iterations,
                converged: true,
            });
        }
        Err(SolveError::Collapse(collapse)) => {
            warn!(
                iterations = collapse.iterations,
                relative_power_error = collapse.relative_power_error,
                "power flow did not converge"
            );
            cmd.insert_resource(PowerFlowResult {
                v: expand(&collapse.best_iterate),
                iterations: collapse.iterations,
                converged: false,
            });
        }
        Err(fatal) => {
            // A dead external backend produces no iterate worth storing.
            error!(%fatal, "power flow aborted, no result produced");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_map_is_sorted_and_invertible() {
        let map = MatrixIndexMap::new(vec![4, 0, 2]);
        assert_eq!(map.len(), 3);
        assert_eq!(map.position_of(0), Some(0));
        assert_eq!(map.position_of(2), Some(1));
        assert_eq!(map.position_of(4), Some(2));
        assert_eq!(map.position_of(1), None);
        assert_eq!(map.id_at(2), 4);
    }
}
