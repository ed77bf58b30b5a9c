use bevy_ecs::prelude::*;

use super::line::{FromNode, ToNode};
use super::units::*;

/// Marker for a two-winding transformer element.
#[derive(Component, Debug, Default, Clone, Copy)]
pub struct Transformer;

/// Tap changer state; the effective ratio correction is
/// `1 + (position - neutral) * step_percent / 100`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TapChanger {
    pub neutral: f64,
    pub position: f64,
    pub step_percent: f64,
}

/// Two-winding transformer parameters in SI units, impedances referred to
/// the low-voltage side.
///
/// The phase shift is not stamped into the admittance matrix: the
/// per-unit problem is solved shift-free and the nominal shift map
/// reapplies it during result translation.
#[derive(Component, Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TransformerParams {
    pub phase_shift: Pair<f64, Degree>,
    pub short_circuit_resistance: Pair<f64, Ohm>,
    pub short_circuit_reactance: Pair<f64, Ohm>,
    pub magnetizing_conductance: Pair<f64, Siemens>,
    pub magnetizing_susceptance: Pair<f64, Siemens>,
    pub tap: Option<TapChanger>,
}

impl TransformerParams {
    pub fn tap_ratio(&self) -> f64 {
        self.tap.as_ref().map_or(1.0, |tap| {
            1.0 + (tap.position - tap.neutral) * 0.01 * tap.step_percent
        })
    }
}

#[derive(Bundle)]
pub struct TransformerBundle {
    pub marker: Transformer,
    /// High-voltage side.
    pub from: FromNode,
    /// Low-voltage side.
    pub to: ToNode,
    pub params: TransformerParams,
}

/// Marker for a three-winding transformer element.
#[derive(Component, Debug, Default, Clone, Copy)]
pub struct ThreeWindingTransformer;

#[derive(Component, Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct HvNode(pub i64);

#[derive(Component, Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct MvNode(pub i64);

#[derive(Component, Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct LvNode(pub i64);

/// Pairwise short-circuit impedances of a three-winding transformer,
/// referred to the high-voltage side. The star equivalent derives one
/// impedance per winding:
/// `z_h = (z_hm + z_hl - z_ml) / 2` and cyclic.
#[derive(Component, Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ThreeWindingParams {
    pub hv_mv_resistance: Pair<f64, Ohm>,
    pub hv_mv_reactance: Pair<f64, Ohm>,
    pub hv_lv_resistance: Pair<f64, Ohm>,
    pub hv_lv_reactance: Pair<f64, Ohm>,
    pub mv_lv_resistance: Pair<f64, Ohm>,
    pub mv_lv_reactance: Pair<f64, Ohm>,
}

#[derive(Bundle)]
pub struct ThreeWindingBundle {
    pub marker: ThreeWindingTransformer,
    pub hv: HvNode,
    pub mv: MvNode,
    pub lv: LvNode,
    pub params: ThreeWindingParams,
}

pub mod systems {
    use bevy_ecs::relationship::RelatedSpawnerCommands;
    use nalgebra::Complex;
    use tracing::debug;

    use crate::basic::admittance::GND;
    use crate::basic::ecs::elements::{
        Admittance, AdmittanceBranch, BusID, InternalNode, NodeLookup, Port2, SBusInjPu, VBase,
        VBusPu, VNominal,
    };
    use crate::basic::ecs::network::AssemblyErrors;
    use crate::basic::error::ConfigError;

    use super::*;

    fn spawn_branch(
        child: &mut RelatedSpawnerCommands<'_, ChildOf>,
        y: Complex<f64>,
        port: Port2,
        v_base: f64,
    ) {
        child.spawn(AdmittanceBranch {
            y: Admittance(y),
            port,
            v_base: VBase(v_base),
        });
    }

    /// Spawns the pi-equivalent branches for every two-winding
    /// transformer: a series branch scaled by the tap ratio and the two
    /// ratio-correction shunts, plus the magnetizing shunt split between
    /// the terminals.
    pub fn setup_transformers(
        mut commands: Commands,
        mut errors: ResMut<AssemblyErrors>,
        lookup: Res<NodeLookup>,
        nominals: Query<&VNominal>,
        q: Query<(Entity, &TransformerParams, &FromNode, &ToNode), With<Transformer>>,
    ) {
        for (entity, params, from, to) in q.iter() {
            let Some(lv_entity) = lookup.get_entity(to.0) else {
                errors.push(ConfigError::UnknownNodeId(to.0).into());
                continue;
            };
            if !lookup.contains_id(from.0) {
                errors.push(ConfigError::UnknownNodeId(from.0).into());
                continue;
            }
            let Ok(vn_lv) = nominals.get(lv_entity) else {
                continue;
            };
            let v_base = *vn_lv.0;

            let tap_m = params.tap_ratio();
            let z = Complex::new(
                *params.short_circuit_resistance,
                *params.short_circuit_reactance,
            );
            let y = z.inv();

            commands.entity(entity).with_children(|child| {
                spawn_branch(child, y / tap_m, Port2::new(from.0, to.0), v_base);
                spawn_branch(
                    child,
                    (1.0 - tap_m) * y / tap_m.powi(2),
                    Port2::new(from.0, GND),
                    v_base,
                );
                spawn_branch(
                    child,
                    (1.0 - 1.0 / tap_m) * y,
                    Port2::new(to.0, GND),
                    v_base,
                );
            });

            let y_mag = Complex::new(
                *params.magnetizing_conductance,
                -*params.magnetizing_susceptance,
            );
            if y_mag.norm() > 0.0 {
                commands.entity(entity).with_children(|child| {
                    spawn_branch(
                        child,
                        0.5 * y_mag / tap_m.powi(2),
                        Port2::new(from.0, GND),
                        v_base,
                    );
                    spawn_branch(child, 0.5 * y_mag, Port2::new(to.0, GND), v_base);
                });
            }
        }
    }

    /// Replaces each three-winding transformer with its star equivalent:
    /// one freshly allocated internal node and three winding branches.
    pub fn setup_three_winding_transformers(
        mut commands: Commands,
        mut errors: ResMut<AssemblyErrors>,
        mut lookup: ResMut<NodeLookup>,
        nominals: Query<&VNominal>,
        q: Query<
            (Entity, &ThreeWindingParams, &HvNode, &MvNode, &LvNode),
            With<ThreeWindingTransformer>,
        >,
    ) {
        for (entity, params, hv, mv, lv) in q.iter() {
            let Some(hv_entity) = lookup.get_entity(hv.0) else {
                errors.push(ConfigError::UnknownNodeId(hv.0).into());
                continue;
            };
            for &winding in &[mv.0, lv.0] {
                if !lookup.contains_id(winding) {
                    errors.push(ConfigError::UnknownNodeId(winding).into());
                }
            }
            if !(lookup.contains_id(mv.0) && lookup.contains_id(lv.0)) {
                continue;
            }
            let Ok(vn_hv) = nominals.get(hv_entity) else {
                continue;
            };
            let v_base = *vn_hv.0;

            let z_hm = Complex::new(*params.hv_mv_resistance, *params.hv_mv_reactance);
            let z_hl = Complex::new(*params.hv_lv_resistance, *params.hv_lv_reactance);
            let z_ml = Complex::new(*params.mv_lv_resistance, *params.mv_lv_reactance);
            let z_h = (z_hm + z_hl - z_ml) * 0.5;
            let z_m = (z_hm + z_ml - z_hl) * 0.5;
            let z_l = (z_hl + z_ml - z_hm) * 0.5;

            let star_id = lookup.allocate_id();
            let star = commands
                .spawn((
                    BusID(star_id),
                    VNominal(Pair::new(v_base)),
                    InternalNode,
                    SBusInjPu::default(),
                    VBusPu::default(),
                ))
                .id();
            lookup.insert(star_id, star);
            debug!(star_id, "allocated star node for three-winding transformer");

            commands.entity(entity).with_children(|child| {
                spawn_branch(child, z_h.inv(), Port2::new(hv.0, star_id), v_base);
                spawn_branch(child, z_m.inv(), Port2::new(mv.0, star_id), v_base);
                spawn_branch(child, z_l.inv(), Port2::new(lv.0, star_id), v_base);
            });
        }
    }
}
