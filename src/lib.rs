pub mod config;
pub mod domain;
pub mod simulation;
pub mod sink;
pub mod telemetry;
