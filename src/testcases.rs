//! Small hand-checkable networks used across the test suite and handy as
//! starting points for experiments.

use crate::io::network::{
    FeedInEntry, GeneratorEntry, LineEntry, LoadEntry, NetworkFile, NodeEntry, TransformerEntry,
};

/// Two buses at 100 V joined by a 10 ohm line, an ideal feed-in on one
/// side and a 10 W load on the other.
///
/// With those bases the line is 0.01 pu, so the load-side voltage solves
/// `v^2 - v + 0.01 = 0`, giving `v = (1 + sqrt(0.96)) / 2 ~ 0.98990` pu.
pub fn two_bus_feed_and_load() -> NetworkFile {
    NetworkFile {
        nodes: vec![
            NodeEntry {
                id: 0,
                nominal_voltage: 100.0,
            },
            NodeEntry {
                id: 1,
                nominal_voltage: 100.0,
            },
        ],
        lines: vec![LineEntry {
            from: 0,
            to: 1,
            resistance: 10.0,
            reactance: 0.0,
            shunt_conductance: 0.0,
            shunt_susceptance: 0.0,
        }],
        loads: vec![LoadEntry {
            node: 1,
            active_power: -10.0,
            reactive_power: 0.0,
            constant_impedance: false,
        }],
        feed_ins: vec![FeedInEntry {
            node: 0,
            voltage: 100.0,
            angle: 0.0,
            resistance: 0.0,
            reactance: 0.0,
        }],
        ..Default::default()
    }
}

/// A ring of three phase-shifting transformers at one voltage level.
///
/// The consistent variant closes the ring with shifts 0.3, -1.5 and 1.2
/// degrees that cancel along the cycle; the inconsistent variant replaces
/// the closing shift so the accumulated values contradict.
pub fn phase_shift_ring(consistent: bool) -> NetworkFile {
    let closing_shift = if consistent { 1.2 } else { 2.0 };
    let transformer = |hv: i64, lv: i64, shift: f64| TransformerEntry {
        hv_node: hv,
        lv_node: lv,
        phase_shift: shift,
        resistance: 0.4,
        reactance: 4.0,
        magnetizing_conductance: 0.0,
        magnetizing_susceptance: 0.0,
        tap: None,
    };
    NetworkFile {
        nodes: (0..3)
            .map(|id| NodeEntry {
                id,
                nominal_voltage: 20e3,
            })
            .collect(),
        transformers: vec![
            transformer(0, 1, 0.3),
            transformer(1, 2, -1.5),
            transformer(2, 0, closing_shift),
        ],
        loads: vec![
            LoadEntry {
                node: 1,
                active_power: -1e6,
                reactive_power: -2e5,
                constant_impedance: false,
            },
            LoadEntry {
                node: 2,
                active_power: -5e5,
                reactive_power: 0.0,
                constant_impedance: false,
            },
        ],
        feed_ins: vec![FeedInEntry {
            node: 0,
            voltage: 20e3,
            angle: 0.0,
            resistance: 0.0,
            reactance: 0.0,
        }],
        ..Default::default()
    }
}

/// Five buses over two voltage levels: a 110 kV feed, one step-down
/// transformer and a regulated generator at the far end of the 20 kV
/// section.
pub fn five_bus_two_level() -> NetworkFile {
    NetworkFile {
        nodes: vec![
            NodeEntry {
                id: 0,
                nominal_voltage: 110e3,
            },
            NodeEntry {
                id: 1,
                nominal_voltage: 110e3,
            },
            NodeEntry {
                id: 2,
                nominal_voltage: 20e3,
            },
            NodeEntry {
                id: 3,
                nominal_voltage: 20e3,
            },
            NodeEntry {
                id: 4,
                nominal_voltage: 20e3,
            },
        ],
        lines: vec![
            LineEntry {
                from: 0,
                to: 1,
                resistance: 2.0,
                reactance: 8.0,
                shunt_conductance: 0.0,
                shunt_susceptance: 1e-6,
            },
            LineEntry {
                from: 2,
                to: 3,
                resistance: 0.6,
                reactance: 1.8,
                shunt_conductance: 0.0,
                shunt_susceptance: 0.0,
            },
            LineEntry {
                from: 3,
                to: 4,
                resistance: 0.4,
                reactance: 1.2,
                shunt_conductance: 0.0,
                shunt_susceptance: 0.0,
            },
        ],
        transformers: vec![TransformerEntry {
            hv_node: 1,
            lv_node: 2,
            phase_shift: 150.0,
            resistance: 0.4,
            reactance: 6.0,
            magnetizing_conductance: 2e-8,
            magnetizing_susceptance: 1e-7,
            tap: Some(crate::io::network::TapEntry {
                neutral: 0.0,
                position: 1.0,
                step_percent: 1.5,
            }),
        }],
        loads: vec![
            LoadEntry {
                node: 3,
                active_power: -2e6,
                reactive_power: -5e5,
                constant_impedance: false,
            },
            LoadEntry {
                node: 4,
                active_power: -4e5,
                reactive_power: -1e5,
                constant_impedance: true,
            },
        ],
        generators: vec![GeneratorEntry {
            node: 4,
            active_power: 8e5,
            voltage_setpoint: 20.2e3,
        }],
        feed_ins: vec![FeedInEntry {
            node: 0,
            voltage: 110e3,
            angle: 0.0,
            resistance: 0.0,
            reactance: 0.0,
        }],
        ..Default::default()
    }
}
