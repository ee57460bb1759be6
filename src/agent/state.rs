//! Shared cycle state and the typed records passed between stages
//!
//! One `CycleState` value is owned by the pipeline driver for the length
//! of a cycle. Fan-out workers return typed partial results which the
//! driver merges back; nothing else mutates the state.

use crate::models::{
    Alert, Forecast, InventoryRecord, OrderRecord, OverdueOrder, SalesEvent, Urgency,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Derived per-SKU metrics. Not persisted; recomputed every cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkuMetrics {
    pub current_stock: i64,
    pub pending_orders: i64,
    pub forecast_7day: f64,
    pub daily_avg_demand: f64,
    pub demand_volatility: f64,
    pub lead_time_days: i64,
    pub unit_cost: f64,
    pub holding_cost_percent: f64,
    pub reorder_cost: f64,
    pub safety_stock: i64,
    pub min_order_qty: i64,
    pub max_order_qty: Option<i64>,
    pub forecast_confidence: f64,
}

impl SkuMetrics {
    pub fn effective_stock(&self) -> i64 {
        self.current_stock + self.pending_orders
    }

    pub fn annual_holding_cost(&self, qty: f64) -> f64 {
        qty * self.unit_cost * self.holding_cost_percent
    }
}

/// Output of the trend-analysis stage for one SKU.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzedSku {
    pub sku: String,
    pub product_name: String,
    pub metrics: SkuMetrics,
    pub forecast: Forecast,
    pub inventory: InventoryRecord,
    /// Stockout penalty of NOT ordering; higher = more urgent.
    pub utility_score: f64,
}

/// Where the constraint check routed an analyzed SKU.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintRoute {
    Proceed,
    Fallback { order_qty: i64 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConstrainedSku {
    pub analyzed: AnalyzedSku,
    pub route: ConstraintRoute,
}

/// A SKU the constraint check dropped, with its reason.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeldSku {
    pub sku: String,
    pub reason: String,
}

/// Cost metrics for a proposed order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CostAnalysis {
    pub annual_demand: f64,
    pub orders_per_year: f64,
    pub annual_ordering_cost: f64,
    pub avg_inventory: f64,
    pub annual_holding_cost: f64,
    pub total_annual_cost: f64,
    pub cost_per_unit: f64,
    pub purchasing_cost_per_unit: f64,
}

/// Explanation payload carried on each proposal.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DecisionDetails {
    pub decision_type: String,
    pub current_stock: i64,
    pub pending_orders: i64,
    pub effective_stock: i64,
    pub reorder_point: i64,
    pub eoq: i64,
    pub threshold: i64,
    pub target_stock: i64,
    pub lead_time_days: i64,
    pub daily_avg_demand: f64,
    pub forecast_7day: f64,
    pub demand_volatility: f64,
    pub forecast_confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub days_until_stockout: Option<f64>,
    pub safety_stock: i64,
    pub unit_price: f64,
}

/// Finance scoring attached during budget review.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinanceMetrics {
    pub total_cost: f64,
    pub roi: f64,
    pub stockout_risk_factor: f64,
    pub days_until_stockout: f64,
    pub projected_value: f64,
}

/// A reorder proposal emitted by the decision kernel; Finance decorates
/// it, negotiation may shrink it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proposal {
    pub sku: String,
    pub product_name: String,
    pub reorder_required: bool,
    pub order_quantity: i64,
    pub urgency: Urgency,
    pub reason: String,
    pub details: DecisionDetails,
    pub cost_analysis: CostAnalysis,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finance_metrics: Option<FinanceMetrics>,
    #[serde(default)]
    pub negotiated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_quantity: Option<i64>,
    #[serde(default)]
    pub requires_approval: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approval_reason: Option<String>,
    pub utility_score: f64,
}

/// FIPA ACL envelope for an agent-to-agent message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FipaMessage {
    pub performative: String,
    pub sender: String,
    pub receiver: String,
    pub content: serde_json::Value,
    pub language: String,
    pub ontology: String,
    pub protocol: String,
}

impl FipaMessage {
    pub fn new(performative: &str, sender: &str, receiver: &str, content: serde_json::Value) -> Self {
        Self {
            performative: performative.to_string(),
            sender: sender.to_string(),
            receiver: receiver.to_string(),
            content,
            language: "JSON".to_string(),
            ontology: "SupplyChain-Ontology".to_string(),
            protocol: "ANEX-Negotiation".to_string(),
        }
    }
}

/// One entry in the cycle's dialogue log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialogueEntry {
    pub agent: String,
    pub target: String,
    pub message: String,
    #[serde(rename = "type")]
    pub dialogue_type: String,
    pub sku: String,
    pub fipa: FipaMessage,
}

/// Quantity-reduction counter-proposal from the negotiation stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NegotiationProposal {
    pub sku: String,
    pub product_name: String,
    pub original_quantity: i64,
    pub new_quantity: i64,
    pub new_cost: f64,
    pub reduction_factor: f64,
    pub days_until_stockout: f64,
    pub justification: String,
    pub fipa: FipaMessage,
}

/// Result of executing one approved decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResult {
    pub executed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<i64>,
    pub sku: String,
    pub quantity: i64,
    pub urgency: Urgency,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub supplier: Option<String>,
    pub cost_per_unit: f64,
    pub total_cost: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleError {
    pub scope: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleStatus {
    Completed,
    Failed,
}

/// Terminal summary returned by the pipeline driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleResult {
    pub cycle_id: String,
    pub decisions: Vec<Proposal>,
    pub actions: Vec<ActionResult>,
    pub agent_dialogues: Vec<DialogueEntry>,
    pub forecasts: Vec<Forecast>,
    pub skus_processed: usize,
    pub errors: Vec<CycleError>,
    pub finance_feedback: String,
    pub status: CycleStatus,
}

/// State threaded through all seven stages of one cycle.
///
/// Inventory is a BTreeMap so every per-SKU walk is deterministic.
#[derive(Debug, Clone)]
pub struct CycleState {
    pub cycle_id: String,
    pub cycle_number: i64,
    pub started_at: DateTime<Utc>,

    // Fetch snapshots (immutable once populated)
    pub inventory_data: BTreeMap<String, InventoryRecord>,
    pub sales_data: Vec<SalesEvent>,
    pub sales_by_sku: HashMap<String, Vec<SalesEvent>>,
    pub orders_data: Vec<OrderRecord>,
    pub pending_orders_by_sku: HashMap<String, i64>,
    pub overdue_orders: Vec<OverdueOrder>,
    pub alerts_data: Vec<Alert>,
    pub recent_sales_revenue: f64,

    // Stage outputs
    pub forecasts: Vec<Forecast>,
    pub analyzed: Vec<AnalyzedSku>,
    pub constrained: Vec<ConstrainedSku>,
    pub held: Vec<HeldSku>,
    pub decisions: Vec<Proposal>,
    pub finance_rejections: Vec<Proposal>,
    pub negotiation_proposals: Vec<NegotiationProposal>,
    pub actions: Vec<ActionResult>,

    // Dialogue log (append-only) and streaming watermark
    pub agent_dialogues: Vec<DialogueEntry>,
    pub streamed_dialogues: usize,

    // Negotiation loop control
    pub negotiation_rounds: u32,
    pub max_negotiation_rounds: u32,

    // Finance
    pub budget: f64,
    pub budget_remaining: f64,
    pub finance_feedback: String,

    // Failure bookkeeping
    pub errors: Vec<CycleError>,
    pub failed_skus: Vec<String>,
}

impl CycleState {
    pub fn new(cycle_id: &str, cycle_number: i64, recent_revenue: f64, max_rounds: u32) -> Self {
        Self {
            cycle_id: cycle_id.to_string(),
            cycle_number,
            started_at: Utc::now(),
            inventory_data: BTreeMap::new(),
            sales_data: Vec::new(),
            sales_by_sku: HashMap::new(),
            orders_data: Vec::new(),
            pending_orders_by_sku: HashMap::new(),
            overdue_orders: Vec::new(),
            alerts_data: Vec::new(),
            recent_sales_revenue: recent_revenue,
            forecasts: Vec::new(),
            analyzed: Vec::new(),
            constrained: Vec::new(),
            held: Vec::new(),
            decisions: Vec::new(),
            finance_rejections: Vec::new(),
            negotiation_proposals: Vec::new(),
            actions: Vec::new(),
            agent_dialogues: Vec::new(),
            streamed_dialogues: 0,
            negotiation_rounds: 0,
            max_negotiation_rounds: max_rounds,
            budget: 0.0,
            budget_remaining: 0.0,
            finance_feedback: String::new(),
            errors: Vec::new(),
            failed_skus: Vec::new(),
        }
    }

    pub fn add_error(&mut self, scope: &str, message: impl Into<String>) {
        self.errors.push(CycleError {
            scope: scope.to_string(),
            message: message.into(),
        });
    }

    pub fn add_failed_sku(&mut self, sku: &str, message: impl Into<String>) {
        self.failed_skus.push(sku.to_string());
        self.add_error(sku, message);
    }

    pub fn into_result(self, status: CycleStatus) -> CycleResult {
        CycleResult {
            cycle_id: self.cycle_id,
            skus_processed: self.inventory_data.len(),
            decisions: self.decisions,
            actions: self.actions,
            agent_dialogues: self.agent_dialogues,
            forecasts: self.forecasts,
            errors: self.errors,
            finance_feedback: self.finance_feedback,
            status,
        }
    }
}
