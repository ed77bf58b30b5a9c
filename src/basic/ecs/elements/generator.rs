use bevy_ecs::prelude::*;

use super::units::*;

/// Marker for a PV generator: holds its bus at a voltage magnitude while
/// injecting a fixed real power.
#[derive(Component, Debug, Default, Clone, Copy)]
pub struct Generator;

/// Regulated terminal voltage magnitude, in volts.
#[derive(Component, Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct VoltageSetpoint(pub Pair<f64, Volt>);

#[derive(Bundle)]
pub struct GeneratorBundle {
    pub marker: Generator,
    pub target: super::load::TargetNode,
    pub p: super::load::ActivePower,
    pub setpoint: VoltageSetpoint,
}
