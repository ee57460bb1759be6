//! Pipeline driver: advance one cycle through the seven stages
//!
//! fetch -> forecast -> analyze -> constraints -> optimize -> finance
//! finance --(rejections, first pass only)--> negotiation -> finance
//! finance --otherwise--> action -> memory -> END
//!
//! The conditional edge is evaluated exactly once, after the first
//! Finance pass; the re-optimization pass always proceeds to Action.
//! A stage that panics is caught at the stage boundary and fails the
//! cycle; per-SKU errors are recorded and skipped.

use crate::agent::action::ActionStage;
use crate::agent::decision::DecisionEngine;
use crate::agent::dialogue::DialogueGenerator;
use crate::agent::events::{self, EventKind, EventSink};
use crate::agent::finance::FinanceStage;
use crate::agent::forecast::ForecastStage;
use crate::agent::llm::{DemandEstimator, DialoguePort};
use crate::agent::memory::MemoryStage;
use crate::agent::negotiation::NegotiationStage;
use crate::agent::state::{CycleResult, CycleState, CycleStatus};
use crate::models::{Config, OrderStatus, OverdueOrder};
use crate::store::{InventoryStore, MemoryStore};
use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{error, info, warn};

pub struct PipelineDriver {
    store: Arc<InventoryStore>,
    memory: Arc<MemoryStore>,
    forecast: ForecastStage,
    engine: DecisionEngine,
    finance: FinanceStage,
    negotiation: NegotiationStage,
    action: ActionStage,
    memory_stage: MemoryStage,
    max_negotiation_rounds: u32,
}

impl PipelineDriver {
    pub fn new(
        store: Arc<InventoryStore>,
        memory: Arc<MemoryStore>,
        estimator: Option<Arc<dyn DemandEstimator>>,
        dialogue_port: Option<Arc<dyn DialoguePort>>,
        config: &Config,
        simulation_mode: bool,
    ) -> Self {
        let dialogue_timeout = std::time::Duration::from_secs(config.dialogue_timeout_secs);
        let finance_dialogue = DialogueGenerator::new(dialogue_port.clone(), dialogue_timeout);
        let negotiation_dialogue = DialogueGenerator::new(
            dialogue_port,
            std::time::Duration::from_secs(config.negotiation_timeout_secs),
        );

        Self {
            store: store.clone(),
            memory: memory.clone(),
            forecast: ForecastStage::new(
                estimator,
                config.max_forecast_llm_calls,
                std::time::Duration::from_secs(config.forecast_timeout_secs),
            ),
            engine: DecisionEngine::new(config.service_level, config.min_confidence_to_order),
            finance: FinanceStage::new(
                config.default_budget,
                config.revenue_reinvestment_rate,
                config.stockout_risk_high_multiplier,
                config.stockout_risk_medium_multiplier,
                config.critical_stock_roi_multiplier,
                config.negotiation_roi_threshold,
                finance_dialogue,
            ),
            negotiation: NegotiationStage::new(negotiation_dialogue),
            action: ActionStage::new(store, config.auto_approval_threshold, simulation_mode),
            memory_stage: MemoryStage::new(memory),
            max_negotiation_rounds: config.max_negotiation_rounds,
        }
    }

    /// Run one complete cycle. `recent_revenue` seeds the budget until
    /// the fetch stage computes the real 7-day figure.
    pub fn run_cycle(&self, cycle_id: &str, recent_revenue: f64) -> CycleResult {
        let sink = events::create_stream(cycle_id);
        let cycle_number = self.memory.next_cycle_number();
        let mut state = CycleState::new(
            cycle_id,
            cycle_number,
            recent_revenue,
            self.max_negotiation_rounds,
        );

        info!("[{cycle_id}] 🚀 Cycle {cycle_number} starting");

        // -- fetch (fatal on store failure) --
        sink.emit(EventKind::Progress, "FETCH", "🔄 Syncing with inventory store...");
        if let Err(e) = self.fetch(&mut state) {
            error!("[{cycle_id}] Fetch failed: {e:#}");
            state.add_error("FETCH", format!("{e:#}"));
            sink.emit(EventKind::Error, "FETCH", format!("Data fetch failed: {e:#}"));
            return self.finish(state, CycleStatus::Failed, &sink);
        }
        sink.emit(
            EventKind::Progress,
            "FETCH",
            format!("✅ Data synced. {} SKUs loaded.", state.inventory_data.len()),
        );

        // -- forecast --
        sink.emit(EventKind::Progress, "FORECAST", "🧠 Analyzing market trends...");
        if !self.run_stage("FORECAST", &mut state, &sink, |s| {
            self.forecast.run(s, &sink);
        }) {
            return self.finish(state, CycleStatus::Failed, &sink);
        }
        sink.emit(
            EventKind::Progress,
            "FORECAST",
            format!("✅ Forecasts updated for {} items.", state.forecasts.len()),
        );

        // -- decision kernel --
        sink.emit(EventKind::Progress, "DECISION", "📊 Analyzing trends...");
        if !self.run_stage("DECISION", &mut state, &sink, |s| {
            self.engine.analyze_trends(s);
        }) {
            return self.finish(state, CycleStatus::Failed, &sink);
        }

        sink.emit(EventKind::Progress, "DECISION", "🚧 Checking constraints...");
        if !self.run_stage("DECISION", &mut state, &sink, |s| {
            self.engine.check_constraints(s);
        }) {
            return self.finish(state, CycleStatus::Failed, &sink);
        }

        sink.emit(EventKind::Progress, "DECISION", "💎 Optimizing cost...");
        if !self.run_stage("DECISION", &mut state, &sink, |s| {
            self.engine.optimize_cost(s, &sink);
        }) {
            return self.finish(state, CycleStatus::Failed, &sink);
        }

        // -- finance round 0 --
        sink.emit(EventKind::Progress, "FINANCE", "💰 Finance reviewing budget...");
        if !self.run_stage("FINANCE", &mut state, &sink, |s| {
            self.finance.run(s);
        }) {
            return self.finish(state, CycleStatus::Failed, &sink);
        }
        self.stream_dialogues(&mut state, &sink);
        self.emit_finance_feedback(&state, &sink);

        // -- conditional edge, evaluated exactly once --
        let should_negotiate = !state.finance_rejections.is_empty()
            && state.negotiation_rounds == 0
            && state.negotiation_rounds < state.max_negotiation_rounds;

        if should_negotiate {
            sink.emit(
                EventKind::Progress,
                "NEGOTIATION",
                "💬 Negotiating rejected orders...",
            );
            if !self.run_stage("NEGOTIATION", &mut state, &sink, |s| {
                self.negotiation.run(s, &sink);
            }) {
                return self.finish(state, CycleStatus::Failed, &sink);
            }

            // Finance re-optimization; control always proceeds to Action.
            sink.emit(
                EventKind::Progress,
                "FINANCE",
                "💰 Finance re-optimizing with proposals...",
            );
            if !self.run_stage("FINANCE", &mut state, &sink, |s| {
                self.finance.run(s);
            }) {
                return self.finish(state, CycleStatus::Failed, &sink);
            }
            self.stream_dialogues(&mut state, &sink);
            self.emit_finance_feedback(&state, &sink);
        }

        // -- action --
        if !self.run_stage("ACTION", &mut state, &sink, |s| {
            self.action.run(s, &sink);
        }) {
            return self.finish(state, CycleStatus::Failed, &sink);
        }

        // -- memory (never fatal) --
        if !self.run_stage("MEMORY", &mut state, &sink, |s| {
            self.memory_stage.run(s, &sink);
        }) {
            return self.finish(state, CycleStatus::Failed, &sink);
        }

        self.finish(state, CycleStatus::Completed, &sink)
    }

    // The terminal status frame is emitted by the job runner, which also
    // owns the job row; the driver only reports the result.
    fn finish(&self, state: CycleState, status: CycleStatus, _sink: &EventSink) -> CycleResult {
        let result = state.into_result(status);
        info!(
            "[{}] Cycle finished: {:?} ({} decisions, {} actions, {} errors)",
            result.cycle_id,
            result.status,
            result.decisions.len(),
            result.actions.len(),
            result.errors.len()
        );
        result
    }

    /// Run one stage behind a panic boundary. Returns false when the
    /// stage blew up and the cycle must end in failed state.
    fn run_stage<F>(&self, name: &str, state: &mut CycleState, sink: &EventSink, f: F) -> bool
    where
        F: FnOnce(&mut CycleState),
    {
        let outcome = catch_unwind(AssertUnwindSafe(|| f(state)));
        match outcome {
            Ok(()) => true,
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "stage panicked".to_string());
                error!("[{}] {name} stage failed: {message}", state.cycle_id);
                state.add_error(name, message.clone());
                sink.emit(EventKind::Error, name, format!("{name} failed: {message}"));
                false
            }
        }
    }

    /// Emit only the dialogues appended since the last stream, keeping
    /// SSE consumers duplicate-free across Finance rounds.
    fn stream_dialogues(&self, state: &mut CycleState, sink: &EventSink) {
        let new = &state.agent_dialogues[state.streamed_dialogues..];
        for dialogue in new {
            sink.emit_with(
                EventKind::AgentDialogue,
                "FINANCE",
                dialogue.message.clone(),
                Some(serde_json::json!({
                    "agent": dialogue.agent,
                    "target": dialogue.target,
                    "type": dialogue.dialogue_type,
                    "sku": dialogue.sku,
                })),
            );
        }
        state.streamed_dialogues = state.agent_dialogues.len();
    }

    fn emit_finance_feedback(&self, state: &CycleState, sink: &EventSink) {
        sink.emit_with(
            EventKind::FinanceFeedback,
            "FINANCE",
            format!("💰 {}", state.finance_feedback),
            Some(serde_json::json!({ "budget_remaining": state.budget_remaining })),
        );
    }

    // ---- fetch stage ----

    fn fetch(&self, state: &mut CycleState) -> Result<()> {
        info!("[{}] Fetching inventory and sales data...", state.cycle_id);

        let inventory = self.store.list_inventory().context("inventory snapshot")?;
        for mut item in inventory {
            // Attach learned facts for the external forecaster's context.
            // They never override deterministic metrics.
            match self.memory.facts_for_sku(&item.sku) {
                Ok(facts) if !facts.is_empty() => {
                    info!("[{}] Loaded {} facts for {}", state.cycle_id, facts.len(), item.sku);
                    item.semantic_facts = facts;
                }
                Ok(_) => {}
                Err(e) => warn!("Fact lookup failed for {}: {e}", item.sku),
            }
            state.inventory_data.insert(item.sku.clone(), item);
        }
        info!("[{}] Fetched {} SKUs", state.cycle_id, state.inventory_data.len());

        // Last-7-day sales, newest first
        let cutoff = Utc::now() - Duration::days(7);
        let sales = self.store.sales_since(cutoff).context("sales snapshot")?;

        let mut total_revenue = 0.0;
        for sale in &sales {
            match state.inventory_data.get(&sale.sku) {
                Some(item) => total_revenue += sale.sold_quantity as f64 * item.unit_price,
                None => warn!(
                    "[{}] Orphaned sale for unknown SKU {} (no revenue attributed)",
                    state.cycle_id, sale.sku
                ),
            }
            state
                .sales_by_sku
                .entry(sale.sku.clone())
                .or_default()
                .push(sale.clone());
        }
        state.recent_sales_revenue = total_revenue;
        state.sales_data = sales;
        info!(
            "[{}] Fetched {} sales records. Revenue (7d): ${:.2}",
            state.cycle_id,
            state.sales_data.len(),
            total_revenue
        );

        // Orders: pending quantities per SKU and overdue detection
        let orders = self.store.list_orders(500).context("orders snapshot")?;
        let now = Utc::now();
        for order in &orders {
            if order.status != OrderStatus::Pending {
                continue;
            }
            *state
                .pending_orders_by_sku
                .entry(order.sku.clone())
                .or_insert(0) += order.quantity;

            let lead_time = state
                .inventory_data
                .get(&order.sku)
                .map(|i| i.lead_time_days)
                .unwrap_or(7);
            let expected_delivery = order.order_date + Duration::days(lead_time);
            if expected_delivery < now {
                let days_overdue = (now - expected_delivery).num_days();
                warn!(
                    "⚠️ Order #{} for {} is overdue by {} days",
                    order.id.unwrap_or(0),
                    order.sku,
                    days_overdue
                );
                state.overdue_orders.push(OverdueOrder {
                    order_id: order.id.unwrap_or(0),
                    sku: order.sku.clone(),
                    days_overdue,
                    supplier: state
                        .inventory_data
                        .get(&order.sku)
                        .and_then(|i| i.supplier.clone())
                        .unwrap_or_else(|| "Unknown".to_string()),
                });
            }
        }
        state.orders_data = orders;

        state.alerts_data = self.store.list_alerts(200).context("alerts snapshot")?;
        Ok(())
    }
}
