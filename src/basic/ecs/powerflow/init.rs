//! Bus labeling and per-unit injection.
//!
//! Runs after node merging, so every node reference already points at its
//! group representative. Labels each bus PQ, PV or slack, seeds the known
//! voltage components and accumulates element powers into the per-unit bus
//! injections.

use std::collections::HashMap;

use bevy_ecs::prelude::*;
use nalgebra::{Complex, SimdComplexField};
use tracing::debug;

use crate::basic::ecs::elements::{
    ActivePower, BusID, ConstantPowerLoad, FeedIn, Generator, NodeLookup, ReactivePower,
    SBusInjPu, SlackAt, SourceVoltage, TargetNode, VBusPu, VNominal, VoltageSetpoint,
};
use crate::basic::ecs::network::AssemblyErrors;
use crate::basic::ecs::scaling::Scalers;
use crate::basic::error::TopologyError;

#[derive(Component)]
#[component(storage = "SparseSet")]
pub struct PQBus;

#[derive(Component)]
#[component(storage = "SparseSet")]
pub struct PVBus;

#[derive(Component)]
#[component(storage = "SparseSet")]
pub struct SlackBus;

/// Marks the slack bus of every feed-in and pins its per-unit voltage.
///
/// Exactly one slack node must remain after merging; zero or several is a
/// structural defect.
pub fn label_slack_nodes(
    mut cmd: Commands,
    mut errors: ResMut<AssemblyErrors>,
    lookup: Res<NodeLookup>,
    nominals: Query<&VNominal>,
    mut voltages: Query<&mut VBusPu>,
    feed_ins: Query<(&SlackAt, &SourceVoltage), With<FeedIn>>,
) {
    let mut pinned: HashMap<i64, Complex<f64>> = HashMap::new();
    for (slack, source) in feed_ins.iter() {
        let Some(entity) = lookup.get_entity(slack.0) else {
            continue;
        };
        let Ok(vn) = nominals.get(entity) else {
            continue;
        };
        let v_pu = source.0 / *vn.0;
        if let Some(&existing) = pinned.get(&slack.0) {
            if (existing - v_pu).norm() > 1e-9 {
                errors.push(
                    TopologyError::OverdeterminedBus {
                        node: slack.0,
                        detail: "pinned to different voltages by two sources".to_string(),
                    }
                    .into(),
                );
            }
            continue;
        }
        pinned.insert(slack.0, v_pu);
        cmd.entity(entity).insert(SlackBus);
        if let Ok(mut v) = voltages.get_mut(entity) {
            v.0 = v_pu;
        }
    }

    match pinned.len() {
        0 => errors.push(TopologyError::NoSlack.into()),
        1 => {}
        _ => {
            let mut nodes: Vec<i64> = pinned.keys().copied().collect();
            nodes.sort_unstable();
            errors.push(TopologyError::MultipleSlacks(nodes).into());
        }
    }
}

/// Marks generator buses PV and applies the regulated magnitude to the
/// voltage seed, keeping whatever angle is already there.
pub fn label_pv_nodes(
    mut cmd: Commands,
    mut errors: ResMut<AssemblyErrors>,
    lookup: Res<NodeLookup>,
    nominals: Query<&VNominal>,
    mut voltages: Query<&mut VBusPu>,
    generators: Query<(&TargetNode, &VoltageSetpoint), With<Generator>>,
) {
    let mut setpoints: HashMap<i64, f64> = HashMap::new();
    for (target, setpoint) in generators.iter() {
        let Some(entity) = lookup.get_entity(target.0) else {
            continue;
        };
        let Ok(vn) = nominals.get(entity) else {
            continue;
        };
        let magnitude = *setpoint.0 / *vn.0;
        if let Some(&existing) = setpoints.get(&target.0) {
            if (existing - magnitude).abs() > 1e-9 {
                errors.push(
                    TopologyError::OverdeterminedBus {
                        node: target.0,
                        detail: format!(
                            "conflicting voltage setpoints {existing} pu and {magnitude} pu"
                        ),
                    }
                    .into(),
                );
            }
            continue;
        }
        setpoints.insert(target.0, magnitude);
        cmd.entity(entity).insert(PVBus);
        if let Ok(mut v) = voltages.get_mut(entity) {
            v.0 = v.0.simd_signum() * Complex::new(magnitude, 0.0);
        }
    }
}

/// Everything not already labeled becomes a PQ bus.
pub fn label_pq_nodes(
    mut cmd: Commands,
    query: Query<Entity, (With<BusID>, Without<PVBus>, Without<PQBus>, Without<SlackBus>)>,
) {
    for entity in &query {
        cmd.entity(entity).insert(PQBus);
    }
}

/// A bus both pinned by a feed-in and regulated by a generator has more
/// specified quantities than unknowns.
pub fn check_overdetermined(
    mut errors: ResMut<AssemblyErrors>,
    both: Query<&BusID, (With<PVBus>, With<SlackBus>)>,
) {
    for bus_id in both.iter() {
        errors.push(
            TopologyError::OverdeterminedBus {
                node: bus_id.0,
                detail: "regulated by both a feed-in and a generator".to_string(),
            }
            .into(),
        );
    }
}

/// Accumulates element powers into the per-unit bus injections:
/// constant-power loads contribute their full complex power, generators
/// their real power. Constant-impedance loads already became shunt
/// branches during element setup.
pub fn inject_powers(
    lookup: Res<NodeLookup>,
    scalers: Res<Scalers>,
    loads: Query<(&TargetNode, &ActivePower, &ReactivePower), With<ConstantPowerLoad>>,
    generators: Query<(&TargetNode, &ActivePower), With<Generator>>,
    mut buses: Query<&mut SBusInjPu>,
) {
    let s_base_frac = 1.0 / scalers.power_base;
    let mut injected = 0usize;
    for (target, p, q) in loads.iter() {
        let Some(entity) = lookup.get_entity(target.0) else {
            continue;
        };
        if let Ok(mut s) = buses.get_mut(entity) {
            s.0 += Complex::new(*p.0, *q.0) * s_base_frac;
            injected += 1;
        }
    }
    for (target, p) in generators.iter() {
        let Some(entity) = lookup.get_entity(target.0) else {
            continue;
        };
        if let Ok(mut s) = buses.get_mut(entity) {
            s.0.re += *p.0 * s_base_frac;
            injected += 1;
        }
    }
    debug!(elements = injected, "bus injections accumulated");
}
