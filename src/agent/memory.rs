//! Memory stage: archive the cycle to long-term storage
//!
//! One checkpoint (stable on success) and one episode per cycle. A
//! failure here is logged and recorded on the state but never fails the
//! cycle; the decisions were already executed.

use crate::agent::events::{EventKind, EventSink};
use crate::agent::state::CycleState;
use crate::models::{Checkpoint, Episode};
use crate::store::memory_db::new_event_id;
use crate::store::MemoryStore;
use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info};

const STAGE: &str = "MEMORY";
const CYCLE_GOAL: &str = "autonomous-replenishment";

pub struct MemoryStage {
    store: Arc<MemoryStore>,
}

impl MemoryStage {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self { store }
    }

    pub fn run(&self, state: &mut CycleState, sink: &EventSink) {
        sink.emit(
            EventKind::Progress,
            STAGE,
            "💾 Archiving cycle to long-term memory...",
        );

        let reorders: Vec<serde_json::Value> = state
            .decisions
            .iter()
            .filter(|d| d.reorder_required)
            .map(|d| {
                serde_json::json!({
                    "sku": d.sku,
                    "product_name": d.product_name,
                    "order_quantity": d.order_quantity,
                    "urgency": d.urgency.as_str(),
                    "negotiated": d.negotiated,
                })
            })
            .collect();

        let executed = state.actions.iter().filter(|a| a.executed).count();
        let outcome = if state.errors.is_empty() && state.failed_skus.is_empty() {
            "success"
        } else {
            "partial"
        };

        let checkpoint = Checkpoint {
            checkpoint_id: new_event_id("cp"),
            timestamp: Utc::now(),
            cycle_number: state.cycle_number,
            goal: CYCLE_GOAL.to_string(),
            state: serde_json::json!({
                "cycle_id": state.cycle_id,
                "skus_processed": state.inventory_data.len(),
                "decisions": reorders,
                "actions_executed": executed,
                "rejections": state.finance_rejections.len(),
                "negotiation_rounds": state.negotiation_rounds,
                "budget": state.budget,
                "budget_remaining": state.budget_remaining,
                "errors": state.errors.len(),
            }),
            is_stable: true,
        };

        if let Err(e) = self.store.store_checkpoint(&checkpoint) {
            error!("Checkpoint write failed: {e:#}");
            state.add_error("MEMORY", format!("checkpoint: {e:#}"));
        }

        let episode = Episode {
            event_id: new_event_id("cycle"),
            timestamp: Utc::now(),
            event_type: "cycle_complete".to_string(),
            sku: None,
            description: format!(
                "Cycle {} processed {} SKUs: {} reorders, {} executed, {} rejected",
                state.cycle_number,
                state.inventory_data.len(),
                reorders.len(),
                executed,
                state.finance_rejections.len(),
            ),
            context: serde_json::json!({
                "cycle_id": state.cycle_id,
                "finance_feedback": state.finance_feedback,
                "negotiation_rounds": state.negotiation_rounds,
                "failed_skus": state.failed_skus,
            }),
            outcome: Some(outcome.to_string()),
            learning: Some(if state.finance_rejections.is_empty() {
                "Budget covered all proposals".to_string()
            } else {
                format!(
                    "{} proposals did not fit the budget; consider raising reinvestment",
                    state.finance_rejections.len()
                )
            }),
        };

        if let Err(e) = self.store.store_episode(&episode) {
            error!("Episode write failed: {e:#}");
            state.add_error("MEMORY", format!("episode: {e:#}"));
        }

        info!("[{}] Cycle archived", state.cycle_id);
        sink.emit(EventKind::Progress, STAGE, "✅ Cycle archived successfully.");
    }
}
