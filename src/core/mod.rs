pub mod assembler;
pub mod broadcaster;
pub mod engine;
pub mod events;
pub mod library;
pub mod model;
pub mod planner;
pub mod runner;
pub mod store;
pub mod telemetry;
