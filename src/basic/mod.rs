//! Numerical core: admittance assembly, sparse utilities, linear solvers
//! and the node-voltage calculator family. Everything here works on plain
//! per-unit vectors and matrices; the ECS layer owns scaling and network
//! semantics.

pub mod admittance;
pub mod calculator;
pub mod ecs;
pub mod error;
pub mod solver;

pub(crate) mod dsbus_dv;
pub(crate) mod sparse;
