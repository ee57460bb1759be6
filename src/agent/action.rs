//! Action executor: turn approved decisions into orders and alerts
//!
//! Each approved reorder writes one order (NeedsApproval above the
//! configured cost threshold) and one alert with priority mapped from
//! urgency. In simulation mode the order is received instantly so demo
//! dashboards move without a supplier in the loop.

use crate::agent::events::{EventKind, EventSink};
use crate::agent::state::{ActionResult, CycleState, Proposal};
use crate::models::{Alert, OrderRecord, OrderStatus};
use crate::store::InventoryStore;
use anyhow::{Context, Result};
use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info};

const STAGE: &str = "ACTION";

pub struct ActionStage {
    store: Arc<InventoryStore>,
    approval_threshold: f64,
    simulation_mode: bool,
}

impl ActionStage {
    pub fn new(store: Arc<InventoryStore>, approval_threshold: f64, simulation_mode: bool) -> Self {
        Self {
            store,
            approval_threshold,
            simulation_mode: simulation_mode || cfg!(feature = "simulation"),
        }
    }

    pub fn run(&self, state: &mut CycleState, sink: &EventSink) {
        sink.emit(EventKind::Progress, STAGE, "🛒 Procurement executing orders...");

        let decisions: Vec<Proposal> = state
            .decisions
            .iter()
            .filter(|d| d.reorder_required)
            .cloned()
            .collect();

        let mut actions = Vec::new();
        for decision in &decisions {
            match self.execute(decision) {
                Ok((result, requires_approval)) => {
                    if result.executed {
                        sink.emit_with(
                            EventKind::ActionItem,
                            STAGE,
                            format!(
                                "✅ Order placed for {}: {} units at ${:.2}",
                                result.sku, result.quantity, result.total_cost
                            ),
                            serde_json::to_value(&result).ok(),
                        );
                        if requires_approval {
                            sink.emit_with(
                                EventKind::ReviewRequired,
                                STAGE,
                                format!(
                                    "⚠️ Order for {} (${:.2}) needs operator approval",
                                    result.sku, result.total_cost
                                ),
                                Some(serde_json::json!({
                                    "sku": result.sku,
                                    "order_id": result.order_id,
                                    "total_cost": result.total_cost,
                                })),
                            );
                        }
                    }
                    actions.push(result);
                }
                Err(e) => {
                    error!("Action execution error for {}: {e:#}", decision.sku);
                    state.add_error(&decision.sku, format!("action: {e:#}"));
                    actions.push(ActionResult {
                        executed: false,
                        order_id: None,
                        sku: decision.sku.clone(),
                        quantity: decision.order_quantity,
                        urgency: decision.urgency,
                        supplier: None,
                        cost_per_unit: 0.0,
                        total_cost: 0.0,
                        error: Some(format!("{e:#}")),
                    });
                }
            }
        }

        let executed = actions.iter().filter(|a| a.executed).count();
        sink.emit(
            EventKind::Progress,
            STAGE,
            format!("✅ Procurement complete. {executed} orders executed."),
        );
        state.actions = actions;
    }

    fn execute(&self, decision: &Proposal) -> Result<(ActionResult, bool)> {
        let sku = &decision.sku;
        let qty = decision.order_quantity;

        let product = self.store.get_inventory(sku)?;
        let supplier = product
            .as_ref()
            .and_then(|p| p.supplier.clone())
            .unwrap_or_else(|| "Default".to_string());
        let unit_price = product.as_ref().map(|p| p.unit_price).unwrap_or(0.0);
        let total_cost = qty as f64 * unit_price;

        let requires_approval = total_cost > self.approval_threshold;
        let approval_reason = requires_approval.then(|| {
            format!(
                "Order cost ${total_cost:.2} exceeds approval threshold ${:.2}",
                self.approval_threshold
            )
        });

        let status = if requires_approval {
            OrderStatus::NeedsApproval
        } else {
            OrderStatus::Pending
        };

        let notes = serde_json::json!({
            "urgency": decision.urgency.as_str(),
            "reason": decision.reason,
            "requires_approval": requires_approval,
            "approval_reason": approval_reason,
            "negotiated": decision.negotiated,
            "original_quantity": decision.original_quantity,
            "details": decision.details,
            "cost_analysis": decision.cost_analysis,
        });

        let order_id = self
            .store
            .insert_order(&OrderRecord {
                id: None,
                sku: sku.clone(),
                quantity: qty,
                order_date: Utc::now(),
                status,
                notes: Some(notes.to_string()),
            })
            .context("order write")?;

        let mut alert_parts = vec![
            format!("🚀 AutoPO: {} ({})", decision.product_name, sku),
            format!("Qty: {qty} units"),
            format!("Supplier: {supplier}"),
            format!("Urgency: {}", decision.urgency.as_str().to_uppercase()),
            format!("Reason: {}", truncate(&decision.reason, 100)),
        ];
        if let Some(reason) = &approval_reason {
            alert_parts.insert(0, format!("⚠️ APPROVAL NEEDED: {reason}"));
        }
        if decision.details.reorder_point > 0 {
            alert_parts.push(format!(
                "ROP: {} | Stock: {}",
                decision.details.reorder_point, decision.details.current_stock
            ));
        }

        self.store
            .insert_alert(&Alert {
                id: None,
                message: alert_parts.join("\n"),
                alert_type: "AutoOrder".to_string(),
                sku: Some(sku.clone()),
                priority: decision.urgency.alert_priority(),
                created_at: Utc::now(),
            })
            .context("alert write")?;

        // Simulated receipt: stock lands the moment the order is cut.
        // Double-counts inventory once real receipts are tracked, so this
        // path stays behind the flag.
        if self.simulation_mode && product.is_some() {
            self.store.adjust_quantity(sku, qty)?;
            info!("📦 Simulated receipt: {sku} stock increased by {qty}");
        }

        info!(
            "Order created: {} for {}, qty {}, urgency {}",
            order_id,
            sku,
            qty,
            decision.urgency.as_str()
        );

        Ok((
            ActionResult {
                executed: true,
                order_id: Some(order_id),
                sku: sku.clone(),
                quantity: qty,
                urgency: decision.urgency,
                supplier: Some(supplier),
                cost_per_unit: unit_price,
                total_cost,
                error: None,
            },
            requires_approval,
        ))
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::events::create_stream;
    use crate::agent::state::{CostAnalysis, DecisionDetails};
    use crate::models::{InventoryRecord, Urgency};

    fn decision(sku: &str, qty: i64, urgency: Urgency) -> Proposal {
        Proposal {
            sku: sku.to_string(),
            product_name: format!("{sku} product"),
            reorder_required: true,
            order_quantity: qty,
            urgency,
            reason: "Stock below ROP".to_string(),
            details: DecisionDetails::default(),
            cost_analysis: CostAnalysis::default(),
            finance_metrics: None,
            negotiated: false,
            original_quantity: None,
            requires_approval: false,
            approval_reason: None,
            utility_score: 0.0,
        }
    }

    fn setup(unit_price: f64) -> (Arc<InventoryStore>, CycleState) {
        let store = Arc::new(InventoryStore::new(":memory:").unwrap());
        let mut item = InventoryRecord::new("SKU-A", "Widget", 5, 20).with_price(unit_price);
        item.supplier = Some("Acme".to_string());
        store.upsert_inventory(&item).unwrap();

        let state = CycleState::new("c-act", 1, 0.0, 3);
        (store, state)
    }

    #[test]
    fn executes_order_and_alert() {
        let (store, mut state) = setup(10.0);
        state.decisions = vec![decision("SKU-A", 30, Urgency::High)];

        let stage = ActionStage::new(store.clone(), 1000.0, false);
        let sink = create_stream("c-act-basic");
        stage.run(&mut state, &sink);

        assert_eq!(state.actions.len(), 1);
        let action = &state.actions[0];
        assert!(action.executed);
        assert_eq!(action.total_cost, 300.0);
        assert_eq!(action.supplier.as_deref(), Some("Acme"));

        let orders = store.list_orders(10).unwrap();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].status, OrderStatus::Pending);

        let alerts = store.list_alerts(10).unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].priority, 2); // high
    }

    #[test]
    fn expensive_orders_need_approval() {
        let (store, mut state) = setup(100.0);
        state.decisions = vec![decision("SKU-A", 30, Urgency::Critical)];

        let stage = ActionStage::new(store.clone(), 1000.0, false);
        let sink = create_stream("c-act-approval");
        stage.run(&mut state, &sink);

        let orders = store.list_orders(10).unwrap();
        assert_eq!(orders[0].status, OrderStatus::NeedsApproval);

        let notes: serde_json::Value =
            serde_json::from_str(orders[0].notes.as_deref().unwrap()).unwrap();
        assert_eq!(notes["requires_approval"], true);

        let alerts = store.list_alerts(10).unwrap();
        assert!(alerts[0].message.contains("APPROVAL NEEDED"));
        assert_eq!(alerts[0].priority, 1); // critical
    }

    #[test]
    fn simulation_mode_receives_stock_instantly() {
        let (store, mut state) = setup(10.0);
        state.decisions = vec![decision("SKU-A", 30, Urgency::High)];

        let stage = ActionStage::new(store.clone(), 1000.0, true);
        let sink = create_stream("c-act-sim");
        stage.run(&mut state, &sink);

        let item = store.get_inventory("SKU-A").unwrap().unwrap();
        assert_eq!(item.quantity, 35); // 5 + 30
    }

    #[test]
    fn missing_sku_still_writes_order_with_defaults() {
        let (store, mut state) = setup(10.0);
        state.decisions = vec![decision("SKU-UNKNOWN", 10, Urgency::Medium)];

        let stage = ActionStage::new(store.clone(), 1000.0, false);
        let sink = create_stream("c-act-missing");
        stage.run(&mut state, &sink);

        let action = &state.actions[0];
        assert!(action.executed);
        assert_eq!(action.cost_per_unit, 0.0);
        assert_eq!(action.supplier.as_deref(), Some("Default"));
    }

    #[test]
    fn non_reorder_decisions_are_ignored() {
        let (store, mut state) = setup(10.0);
        let mut no_op = decision("SKU-A", 0, Urgency::Low);
        no_op.reorder_required = false;
        state.decisions = vec![no_op];

        let stage = ActionStage::new(store.clone(), 1000.0, false);
        let sink = create_stream("c-act-noop");
        stage.run(&mut state, &sink);

        assert!(state.actions.is_empty());
        assert!(store.list_orders(10).unwrap().is_empty());
    }
}
