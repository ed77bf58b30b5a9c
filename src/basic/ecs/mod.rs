pub mod elements;
pub mod merge;
pub mod network;
pub mod plugin;
pub mod post_processing;
pub mod powerflow;
pub mod scaling;
pub mod topology;
