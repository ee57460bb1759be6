//! HTTP surface: read models, mutations, agent job control, persistence

pub mod agent_api;
pub mod persistence_api;
pub mod routes;

use crate::agent::scheduler::AgentScheduler;
use crate::store::{InventoryStore, JobStore, MemoryStore};
use std::sync::Arc;

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<InventoryStore>,
    pub memory: Arc<MemoryStore>,
    pub jobs: Arc<JobStore>,
    pub scheduler: Arc<AgentScheduler>,
    pub simulation_mode: bool,
}
