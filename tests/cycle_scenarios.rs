//! End-to-end cycle scenarios against a real SQLite file
//!
//! Each test seeds a fresh database, runs a full pipeline cycle and
//! checks decisions, orders and the event stream against the expected
//! inventory-theoretic outcomes.

use chrono::{Duration, Utc};
use std::sync::Arc;
use tempfile::TempDir;

use stockpilot_backend::agent::events;
use stockpilot_backend::agent::state::CycleStatus;
use stockpilot_backend::models::{Config, InventoryRecord, OrderStatus, SalesEvent};
use stockpilot_backend::store::{InventoryStore, MemoryStore};
use stockpilot_backend::PipelineDriver;

struct Harness {
    _dir: TempDir,
    store: Arc<InventoryStore>,
    memory: Arc<MemoryStore>,
    driver: PipelineDriver,
}

fn harness(budget: f64) -> Harness {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("cycle.db");
    let db_path = db_path.to_str().unwrap();

    let store = Arc::new(InventoryStore::new(db_path).unwrap());
    let memory = Arc::new(MemoryStore::new(db_path).unwrap());
    let config = Config {
        default_budget: budget,
        ..Config::default()
    };
    let driver = PipelineDriver::new(store.clone(), memory.clone(), None, None, &config, false);

    Harness {
        _dir: dir,
        store,
        memory,
        driver,
    }
}

fn seed_steady_sales(store: &InventoryStore, sku: &str, per_day: i64) {
    let now = Utc::now();
    for day in 0..7 {
        store
            .insert_sale(&SalesEvent {
                id: None,
                sku: sku.to_string(),
                sold_quantity: per_day,
                date: now - Duration::days(day),
            })
            .unwrap();
    }
}

#[test]
fn s1_pure_threshold_override() {
    // No sales at all: the statistical forecast is null and, with no
    // external estimator, the SKU falls back to a 98-unit threshold
    // order (max(10, 2*50 - 2)). Because zero demand also means zero
    // projected value, Finance rejects it in round 0, negotiation
    // shrinks it (20+ days of coverage -> 30% band) and the critical-
    // stock heuristic carries the reduced order through round 1.
    let h = harness(5000.0);
    h.store
        .upsert_inventory(
            &InventoryRecord::new("SKU-A", "Widget", 2, 50)
                .with_price(15.99)
                .with_lead_time(3)
                .with_min_order_qty(10),
        )
        .unwrap();

    let result = h.driver.run_cycle("s1", 0.0);

    assert_eq!(result.status, CycleStatus::Completed);
    assert_eq!(result.decisions.len(), 1);
    let decision = &result.decisions[0];
    assert!(decision.reorder_required);
    assert_eq!(decision.urgency.as_str(), "high");
    assert_eq!(decision.original_quantity, Some(98)); // the kernel's ask
    assert!(decision.negotiated);
    assert_eq!(decision.order_quantity, 29); // floor(98 * 0.3)

    // The negotiated order landed in the store
    let orders = h.store.list_orders(10).unwrap();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].quantity, 29);

    // The critical-stock win is visible in the dialogue log
    assert!(result
        .agent_dialogues
        .iter()
        .any(|d| d.dialogue_type == "override_approval" && d.sku == "SKU-A"));
}

#[test]
fn s2_eoq_path_without_budget_pressure() {
    let h = harness(5000.0);
    let mut item = InventoryRecord::new("SKU-B", "Widget", 40, 30).with_price(10.0);
    item.reorder_cost = 25.0;
    item.holding_cost_percent = 0.15;
    item.safety_stock = 5;
    item.min_order_qty = 1;
    h.store.upsert_inventory(&item).unwrap();
    seed_steady_sales(&h.store, "SKU-B", 10);

    let result = h.driver.run_cycle("s2", 0.0);

    assert_eq!(result.status, CycleStatus::Completed);
    let decision = &result.decisions[0];
    assert_eq!(decision.details.eoq, 349);
    assert_eq!(decision.details.reorder_point, 78);
    assert_eq!(decision.order_quantity, 387);
    assert!(!decision.negotiated);

    // Budget 5000 + reinvested revenue easily covers 3870: approved
    // without negotiation, so no REFUSE dialogue appears.
    assert!(result
        .agent_dialogues
        .iter()
        .all(|d| d.dialogue_type != "rejection"));
    assert_eq!(result.actions.len(), 1);
    assert!(result.actions[0].executed);
    assert_eq!(result.actions[0].total_cost, 3870.0);
}

#[test]
fn s3_budget_collapse_ends_with_zero_actions() {
    // Budget 600 against two overridden reorders costing thousands.
    // Negotiation shrinks both, re-optimization still cannot fit either.
    let h = harness(600.0);
    h.store
        .upsert_inventory(&InventoryRecord::new("SKU-HIGH", "Server", 5, 20).with_price(100.0))
        .unwrap();
    h.store
        .upsert_inventory(&InventoryRecord::new("SKU-LOW", "Cable", 10, 60).with_price(30.0))
        .unwrap();
    seed_steady_sales(&h.store, "SKU-HIGH", 2);
    seed_steady_sales(&h.store, "SKU-LOW", 1);

    let result = h.driver.run_cycle("s3", 0.0);

    assert_eq!(result.status, CycleStatus::Completed);
    assert!(result.actions.is_empty());
    assert!(result.decisions.is_empty());
    assert!(result.finance_feedback.contains("infeasible"));
    assert!(h.store.list_orders(10).unwrap().is_empty());

    // Round-0 refusals come strictly before round-1 verdicts
    let types: Vec<&str> = result
        .agent_dialogues
        .iter()
        .map(|d| d.dialogue_type.as_str())
        .collect();
    let last_rejection = types.iter().rposition(|t| *t == "rejection").unwrap();
    let first_verdict = types
        .iter()
        .position(|t| *t == "reject_proposal" || *t == "accept_proposal")
        .unwrap();
    assert!(last_rejection < first_verdict);
}

#[test]
fn s4_negotiated_item_displaces_round0_approval() {
    // Budget 2500. Round 0: SKU-LOW (2100) fits, SKU-HIGH (3500) is
    // rejected. Negotiation reduces SKU-HIGH to 21 units (2100), whose
    // risk-inflated projected value dwarfs SKU-LOW's; round 1 swaps them.
    let h = harness(2500.0);
    h.store
        .upsert_inventory(&InventoryRecord::new("SKU-HIGH", "Server", 5, 20).with_price(100.0))
        .unwrap();
    h.store
        .upsert_inventory(&InventoryRecord::new("SKU-LOW", "Cable", 10, 40).with_price(30.0))
        .unwrap();
    seed_steady_sales(&h.store, "SKU-HIGH", 2);
    seed_steady_sales(&h.store, "SKU-LOW", 1);

    let result = h.driver.run_cycle("s4", 0.0);

    assert_eq!(result.status, CycleStatus::Completed);
    assert_eq!(result.decisions.len(), 1);
    let winner = &result.decisions[0];
    assert_eq!(winner.sku, "SKU-HIGH");
    assert!(winner.negotiated);
    assert_eq!(winner.order_quantity, 21); // floor(35 * 0.6)
    assert_eq!(winner.original_quantity, Some(35));

    // Budget feasibility at cycle end
    let spend: f64 = result
        .decisions
        .iter()
        .filter_map(|d| d.finance_metrics.as_ref())
        .map(|m| m.total_cost)
        .sum();
    assert!(spend <= 2500.0 + f64::EPSILON);

    // Exactly one executed order, for the reduced quantity
    assert_eq!(result.actions.len(), 1);
    assert_eq!(result.actions[0].quantity, 21);
    let orders = h.store.list_orders(10).unwrap();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].quantity, 21);
    // 21 * 100 = 2100 > 1000 default approval threshold
    assert_eq!(orders[0].status, OrderStatus::NeedsApproval);
}

#[test]
fn event_stream_preserves_emission_order() {
    let h = harness(5000.0);
    h.store
        .upsert_inventory(&InventoryRecord::new("SKU-E", "Widget", 2, 50).with_price(1.0))
        .unwrap();

    let result = h.driver.run_cycle("s-events", 0.0);
    assert_eq!(result.status, CycleStatus::Completed);

    let (events, _) = events::events_since("s-events", 0);
    assert!(!events.is_empty());
    for window in events.windows(2) {
        assert!(window[0].seq < window[1].seq);
        assert!(window[0].timestamp <= window[1].timestamp);
    }
    // The pipeline walked the stages in order
    let stages: Vec<&str> = events.iter().map(|e| e.stage.as_str()).collect();
    let fetch = stages.iter().position(|s| *s == "FETCH").unwrap();
    let action = stages.iter().rposition(|s| *s == "ACTION").unwrap();
    assert!(fetch < action);
}

#[test]
fn cycle_archives_checkpoint_and_episode() {
    let h = harness(5000.0);
    h.store
        .upsert_inventory(&InventoryRecord::new("SKU-M", "Widget", 2, 50).with_price(4.0))
        .unwrap();

    let result = h.driver.run_cycle("s-memory", 0.0);
    assert_eq!(result.status, CycleStatus::Completed);

    let checkpoint = h.memory.latest_stable_checkpoint().unwrap().unwrap();
    assert!(checkpoint.is_stable);
    assert_eq!(checkpoint.state["cycle_id"], "s-memory");

    let episodes = h.memory.list_episodes(None, 10).unwrap();
    assert_eq!(episodes.len(), 1);
    assert_eq!(episodes[0].event_type, "cycle_complete");
    assert_eq!(episodes[0].outcome.as_deref(), Some("success"));

    // Next cycle number advances
    assert_eq!(h.memory.next_cycle_number(), checkpoint.cycle_number + 1);
}

#[test]
fn semantic_facts_reach_the_inventory_snapshot() {
    let h = harness(5000.0);
    h.store
        .upsert_inventory(&InventoryRecord::new("SKU-FACT", "Widget", 100, 10).with_price(2.0))
        .unwrap();
    h.memory
        .store_fact(&stockpilot_backend::models::SemanticFact {
            fact_id: "fact_demo1".to_string(),
            timestamp: Utc::now(),
            category: "demand_pattern".to_string(),
            key: "SKU-FACT".to_string(),
            value: serde_json::json!("seasonal spike in winter"),
            confidence: 0.8,
            source: Some("analyst".to_string()),
        })
        .unwrap();

    // Facts are attached at fetch time; the cycle completes either way.
    let result = h.driver.run_cycle("s-facts", 0.0);
    assert_eq!(result.status, CycleStatus::Completed);
    assert_eq!(result.skus_processed, 1);
}
