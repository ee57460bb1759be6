//! Stockpilot backend library
//!
//! Exposes the cycle engine, stores and HTTP surface for the binary and
//! the integration tests.

pub mod agent;
pub mod api;
pub mod auth;
pub mod models;
pub mod simulation;
pub mod store;

pub use agent::pipeline::PipelineDriver;
pub use agent::scheduler::AgentScheduler;
pub use models::Config;
