//! Command execution engine: process supervision and the single-flight
//! job queue in front of it.

pub mod runner;
pub mod supervisor;

pub use runner::CommandRunner;
pub use supervisor::Supervisor;
