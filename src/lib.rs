mod basic;
pub mod io;
pub mod testcases;
pub mod prelude {
    use crate::basic;
    pub use crate::io::network;
    pub use basic::*;

    pub use calculator::{CalculatorConfig, NodeVoltageCalculator, SolverSelection};
    pub use ecs::{
        network::{PowerFlow, PowerGrid},
        plugin::default_app,
        post_processing::PostProcessing,
        powerflow::systems::PowerFlowResult,
    };
    pub use error::{GridError, GridResult, SolveError};
}
