//! JSON network description and loading.
//!
//! All quantities are SI (volts, watts, ohms, siemens, degrees) and powers
//! follow the injection convention: consumption is negative. Loading
//! validates the id space up front; structural defects that need the whole
//! graph (floating nodes, phase-shift contradictions) are left to the
//! assembly passes.

use std::collections::HashSet;
use std::path::Path;

use bevy_ecs::prelude::*;
use nalgebra::Complex;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::basic::ecs::elements::{
    ActivePower, BusBundle, BusID, ConstantImpedanceLoad, ConstantPowerLoad, FeedIn, FeedInBundle,
    FromNode, Generator, GeneratorBundle, HvNode, ImpedanceLoadBundle, InternalImpedance, Line,
    LineBundle, LineParams, LoadBundle, LvNode, MvNode, Pair, ReactivePower, SourceVoltage,
    TapChanger, TargetNode, ThreeWindingBundle, ThreeWindingParams, ThreeWindingTransformer,
    ToNode, Transformer, TransformerBundle, TransformerParams, VNominal, VoltageSetpoint,
};
use crate::basic::ecs::network::{DataOps, PowerGrid};
use crate::basic::error::{ConfigError, GridResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeEntry {
    pub id: i64,
    /// Nominal voltage magnitude in volts.
    pub nominal_voltage: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineEntry {
    pub from: i64,
    pub to: i64,
    pub resistance: f64,
    pub reactance: f64,
    #[serde(default)]
    pub shunt_conductance: f64,
    #[serde(default)]
    pub shunt_susceptance: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TapEntry {
    pub neutral: f64,
    pub position: f64,
    pub step_percent: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformerEntry {
    pub hv_node: i64,
    pub lv_node: i64,
    #[serde(default)]
    pub phase_shift: f64,
    /// Short-circuit impedance referred to the low-voltage side.
    pub resistance: f64,
    pub reactance: f64,
    #[serde(default)]
    pub magnetizing_conductance: f64,
    #[serde(default)]
    pub magnetizing_susceptance: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tap: Option<TapEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreeWindingEntry {
    pub hv_node: i64,
    pub mv_node: i64,
    pub lv_node: i64,
    /// Pairwise short-circuit impedances referred to the high-voltage side.
    pub hv_mv_resistance: f64,
    pub hv_mv_reactance: f64,
    pub hv_lv_resistance: f64,
    pub hv_lv_reactance: f64,
    pub mv_lv_resistance: f64,
    pub mv_lv_reactance: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadEntry {
    pub node: i64,
    /// Watts; negative for consumption.
    pub active_power: f64,
    #[serde(default)]
    pub reactive_power: f64,
    /// Model the load as a fixed shunt impedance sized at nominal voltage
    /// instead of a constant complex power.
    #[serde(default)]
    pub constant_impedance: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorEntry {
    pub node: i64,
    /// Watts injected.
    pub active_power: f64,
    /// Regulated terminal voltage magnitude in volts.
    pub voltage_setpoint: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedInEntry {
    pub node: i64,
    /// Source voltage magnitude in volts.
    pub voltage: f64,
    #[serde(default)]
    pub angle: f64,
    #[serde(default)]
    pub resistance: f64,
    #[serde(default)]
    pub reactance: f64,
}

/// A whole network in one serializable document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkFile {
    pub nodes: Vec<NodeEntry>,
    #[serde(default)]
    pub lines: Vec<LineEntry>,
    #[serde(default)]
    pub transformers: Vec<TransformerEntry>,
    #[serde(default)]
    pub three_winding_transformers: Vec<ThreeWindingEntry>,
    #[serde(default)]
    pub loads: Vec<LoadEntry>,
    #[serde(default)]
    pub generators: Vec<GeneratorEntry>,
    #[serde(default)]
    pub feed_ins: Vec<FeedInEntry>,
}

impl NetworkFile {
    pub fn from_json_str(content: &str) -> GridResult<Self> {
        let net: NetworkFile = serde_json::from_str(content)?;
        net.validate()?;
        Ok(net)
    }

    pub fn from_file(path: impl AsRef<Path>) -> GridResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    /// Rejects duplicate node ids and references to undeclared nodes.
    pub fn validate(&self) -> GridResult<()> {
        let mut known = HashSet::new();
        for node in &self.nodes {
            if node.id < 0 {
                return Err(ConfigError::InvalidParameter(format!(
                    "node id {} must be non-negative",
                    node.id
                ))
                .into());
            }
            if !known.insert(node.id) {
                return Err(ConfigError::DuplicateNodeId(node.id).into());
            }
        }
        let check = |id: i64| -> GridResult<()> {
            if known.contains(&id) {
                Ok(())
            } else {
                Err(ConfigError::UnknownNodeId(id).into())
            }
        };
        for line in &self.lines {
            check(line.from)?;
            check(line.to)?;
        }
        for t in &self.transformers {
            check(t.hv_node)?;
            check(t.lv_node)?;
        }
        for t in &self.three_winding_transformers {
            check(t.hv_node)?;
            check(t.mv_node)?;
            check(t.lv_node)?;
        }
        for load in &self.loads {
            check(load.node)?;
        }
        for generator in &self.generators {
            check(generator.node)?;
        }
        for feed_in in &self.feed_ins {
            check(feed_in.node)?;
        }
        Ok(())
    }
}

pub trait LoadNetwork {
    /// Spawns the entities a network file describes.
    fn load_network(&mut self, net: &NetworkFile) -> GridResult<()>;
}

impl LoadNetwork for World {
    fn load_network(&mut self, net: &NetworkFile) -> GridResult<()> {
        net.validate()?;

        let buses: Vec<BusBundle> = net
            .nodes
            .iter()
            .map(|node| BusBundle {
                bus_id: BusID(node.id),
                vn: VNominal(Pair::new(node.nominal_voltage)),
            })
            .collect();
        self.spawn_batch(buses);

        for line in &net.lines {
            self.spawn(LineBundle {
                marker: Line,
                from: FromNode(line.from),
                to: ToNode(line.to),
                params: LineParams {
                    resistance: Pair::new(line.resistance),
                    reactance: Pair::new(line.reactance),
                    shunt_conductance: Pair::new(line.shunt_conductance),
                    shunt_susceptance: Pair::new(line.shunt_susceptance),
                },
            });
        }
        for t in &net.transformers {
            self.spawn(TransformerBundle {
                marker: Transformer,
                from: FromNode(t.hv_node),
                to: ToNode(t.lv_node),
                params: TransformerParams {
                    phase_shift: Pair::new(t.phase_shift),
                    short_circuit_resistance: Pair::new(t.resistance),
                    short_circuit_reactance: Pair::new(t.reactance),
                    magnetizing_conductance: Pair::new(t.magnetizing_conductance),
                    magnetizing_susceptance: Pair::new(t.magnetizing_susceptance),
                    tap: t.tap.as_ref().map(|tap| TapChanger {
                        neutral: tap.neutral,
                        position: tap.position,
                        step_percent: tap.step_percent,
                    }),
                },
            });
        }
        for t in &net.three_winding_transformers {
            self.spawn(ThreeWindingBundle {
                marker: ThreeWindingTransformer,
                hv: HvNode(t.hv_node),
                mv: MvNode(t.mv_node),
                lv: LvNode(t.lv_node),
                params: ThreeWindingParams {
                    hv_mv_resistance: Pair::new(t.hv_mv_resistance),
                    hv_mv_reactance: Pair::new(t.hv_mv_reactance),
                    hv_lv_resistance: Pair::new(t.hv_lv_resistance),
                    hv_lv_reactance: Pair::new(t.hv_lv_reactance),
                    mv_lv_resistance: Pair::new(t.mv_lv_resistance),
                    mv_lv_reactance: Pair::new(t.mv_lv_reactance),
                },
            });
        }
        for load in &net.loads {
            if load.constant_impedance {
                self.spawn(ImpedanceLoadBundle {
                    marker: ConstantImpedanceLoad,
                    target: TargetNode(load.node),
                    p: ActivePower(Pair::new(load.active_power)),
                    q: ReactivePower(Pair::new(load.reactive_power)),
                });
            } else {
                self.spawn(LoadBundle {
                    marker: ConstantPowerLoad,
                    target: TargetNode(load.node),
                    p: ActivePower(Pair::new(load.active_power)),
                    q: ReactivePower(Pair::new(load.reactive_power)),
                });
            }
        }
        for generator in &net.generators {
            self.spawn(GeneratorBundle {
                marker: Generator,
                target: TargetNode(generator.node),
                p: ActivePower(Pair::new(generator.active_power)),
                setpoint: VoltageSetpoint(Pair::new(generator.voltage_setpoint)),
            });
        }
        for feed_in in &net.feed_ins {
            self.spawn(FeedInBundle {
                marker: FeedIn,
                target: TargetNode(feed_in.node),
                voltage: SourceVoltage(Complex::from_polar(
                    feed_in.voltage,
                    feed_in.angle.to_radians(),
                )),
                impedance: InternalImpedance {
                    resistance: Pair::new(feed_in.resistance),
                    reactance: Pair::new(feed_in.reactance),
                },
            });
        }

        info!(
            nodes = net.nodes.len(),
            lines = net.lines.len(),
            transformers = net.transformers.len() + net.three_winding_transformers.len(),
            "network loaded"
        );
        Ok(())
    }
}

impl LoadNetwork for PowerGrid {
    fn load_network(&mut self, net: &NetworkFile) -> GridResult<()> {
        self.world_mut().load_network(net)
    }
}

impl PowerGrid {
    /// Builds a grid holding the entities of a network file. The startup
    /// assembly still has to run via
    /// [`PowerFlow::init_pf_net`](crate::basic::ecs::network::PowerFlow).
    pub fn from_network(net: &NetworkFile) -> GridResult<PowerGrid> {
        let mut grid = PowerGrid::default();
        grid.load_network(net)?;
        Ok(grid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testcases;

    #[test]
    fn round_trips_through_json() {
        let net = testcases::five_bus_two_level();
        let text = serde_json::to_string_pretty(&net).unwrap();
        let parsed = NetworkFile::from_json_str(&text).unwrap();
        assert_eq!(parsed.nodes.len(), net.nodes.len());
        assert_eq!(parsed.transformers.len(), net.transformers.len());
        assert_eq!(parsed.loads.len(), net.loads.len());
        assert_eq!(parsed.feed_ins[0].voltage, net.feed_ins[0].voltage);
    }

    #[test]
    fn duplicate_node_id_is_rejected() {
        let mut net = testcases::two_bus_feed_and_load();
        net.nodes.push(NodeEntry {
            id: 0,
            nominal_voltage: 100.0,
        });
        let err = net.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate node id 0"));
    }

    #[test]
    fn unknown_reference_is_rejected() {
        let mut net = testcases::two_bus_feed_and_load();
        net.loads[0].node = 77;
        let err = PowerGrid::from_network(&net).unwrap_err();
        assert!(err.to_string().contains("unknown node id 77"));
    }

    #[test]
    fn defaults_fill_optional_sections() {
        let net = NetworkFile::from_json_str(
            r#"{"nodes": [{"id": 0, "nominal_voltage": 230.0}]}"#,
        )
        .unwrap();
        assert_eq!(net.nodes.len(), 1);
        assert!(net.lines.is_empty());
        assert!(net.feed_ins.is_empty());
    }
}
