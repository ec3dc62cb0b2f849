pub mod adapter;
pub mod context;
pub mod elements;
pub mod feedback;
pub mod graph;
pub mod param;
pub mod results;
pub mod schedule;
pub mod settings;
pub mod signal;
pub mod simulation;
pub mod sweep;
pub mod transform;
pub mod validation;
pub mod worker;

mod topology;

pub use simulation::{prepare, run_simulation, SimulationError};
