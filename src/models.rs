use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reorder urgency classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    Critical,
    High,
    Medium,
    Low,
    Deferred,
    Obsolete,
}

impl Urgency {
    pub fn as_str(&self) -> &str {
        match self {
            Urgency::Critical => "critical",
            Urgency::High => "high",
            Urgency::Medium => "medium",
            Urgency::Low => "low",
            Urgency::Deferred => "deferred",
            Urgency::Obsolete => "obsolete",
        }
    }

    /// Alert priority: 1 = highest, 5 = lowest.
    pub fn alert_priority(&self) -> i64 {
        match self {
            Urgency::Critical => 1,
            Urgency::High => 2,
            Urgency::Medium => 3,
            Urgency::Low => 4,
            Urgency::Deferred | Urgency::Obsolete => 5,
        }
    }
}

/// Order lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
    NeedsApproval,
    Completed,
    Failed,
}

impl OrderStatus {
    pub fn as_str(&self) -> &str {
        match self {
            OrderStatus::Pending => "Pending",
            OrderStatus::NeedsApproval => "Needs Approval",
            OrderStatus::Completed => "Completed",
            OrderStatus::Failed => "Failed",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "Needs Approval" => OrderStatus::NeedsApproval,
            "Completed" => OrderStatus::Completed,
            "Failed" => OrderStatus::Failed,
            _ => OrderStatus::Pending,
        }
    }
}

/// An inventory record with supply chain parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryRecord {
    pub sku: String,
    pub product_name: String,
    pub quantity: i64,
    pub threshold: i64,
    pub unit_price: f64,
    pub holding_cost_percent: f64,
    pub reorder_cost: f64,
    pub lead_time_days: i64,
    pub supplier: Option<String>,
    pub min_order_qty: i64,
    pub max_order_qty: Option<i64>,
    pub safety_stock: i64,
    pub reorder_point: Option<i64>,
    pub category: Option<String>,
    pub is_active: bool,
    /// Semantic facts keyed by this SKU, attached at fetch time.
    /// Only consumed by the external forecaster's context.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub semantic_facts: Vec<SemanticFact>,
}

impl InventoryRecord {
    pub fn new(sku: &str, product_name: &str, quantity: i64, threshold: i64) -> Self {
        Self {
            sku: sku.to_string(),
            product_name: product_name.to_string(),
            quantity,
            threshold,
            unit_price: 0.0,
            holding_cost_percent: 0.15,
            reorder_cost: 50.0,
            lead_time_days: 7,
            supplier: None,
            min_order_qty: 1,
            max_order_qty: None,
            safety_stock: 5,
            reorder_point: None,
            category: None,
            is_active: true,
            semantic_facts: Vec::new(),
        }
    }

    pub fn with_price(mut self, unit_price: f64) -> Self {
        self.unit_price = unit_price;
        self
    }

    pub fn with_lead_time(mut self, days: i64) -> Self {
        self.lead_time_days = days;
        self
    }

    pub fn with_min_order_qty(mut self, qty: i64) -> Self {
        self.min_order_qty = qty;
        self
    }
}

/// A single sale of one SKU
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SalesEvent {
    pub id: Option<i64>,
    pub sku: String,
    pub sold_quantity: i64,
    pub date: DateTime<Utc>,
}

/// A purchase order against a supplier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRecord {
    pub id: Option<i64>,
    pub sku: String,
    pub quantity: i64,
    pub order_date: DateTime<Utc>,
    pub status: OrderStatus,
    /// Audit blob (JSON string) with urgency, reason and cost analysis.
    pub notes: Option<String>,
}

/// An operator-facing alert
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: Option<i64>,
    pub message: String,
    pub alert_type: String,
    pub sku: Option<String>,
    pub priority: i64,
    pub created_at: DateTime<Utc>,
}

/// A pending order past its expected delivery date
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverdueOrder {
    pub order_id: i64,
    pub sku: String,
    pub days_overdue: i64,
    pub supplier: String,
}

/// 7-day demand forecast for one SKU
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Forecast {
    pub sku: String,
    pub product_name: String,
    /// Seven non-negative daily quantities; the sum is the 7-day demand.
    pub daily: Vec<f64>,
    pub confidence: f64,
    pub explanation: String,
}

impl Forecast {
    pub fn total_7day(&self) -> f64 {
        self.daily.iter().take(7).sum()
    }
}

/// A learned fact: (category, key) -> value with confidence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticFact {
    pub fact_id: String,
    pub timestamp: DateTime<Utc>,
    pub category: String,
    pub key: String,
    pub value: serde_json::Value,
    pub confidence: f64,
    pub source: Option<String>,
}

/// A long-term memory record describing one event in a cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Episode {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub sku: Option<String>,
    pub description: String,
    pub context: serde_json::Value,
    pub outcome: Option<String>,
    pub learning: Option<String>,
}

/// A resumable snapshot of cycle progress
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub checkpoint_id: String,
    pub timestamp: DateTime<Utc>,
    pub cycle_number: i64,
    pub goal: String,
    pub state: serde_json::Value,
    pub is_stable: bool,
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub auth_db_path: String,
    pub port: u16,
    pub jwt_secret: String,
    pub admin_username: String,
    pub admin_password: String,

    // Finance & budgeting
    pub default_budget: f64,
    pub revenue_reinvestment_rate: f64,
    pub auto_approval_threshold: f64,

    // Negotiation rules
    pub max_negotiation_rounds: u32,
    pub negotiation_roi_threshold: f64,
    pub critical_stock_roi_multiplier: f64,

    // Risk analysis
    pub stockout_risk_high_multiplier: f64,
    pub stockout_risk_medium_multiplier: f64,

    // Decision kernel
    pub min_confidence_to_order: f64,
    pub service_level: f64,

    // External estimator budget & timeouts
    pub max_forecast_llm_calls: u32,
    pub forecast_timeout_secs: u64,
    pub dialogue_timeout_secs: u64,
    pub negotiation_timeout_secs: u64,
    pub llm_api_url: Option<String>,
    pub llm_api_key: Option<String>,
    pub llm_forecast_model: String,
    pub llm_dialogue_model: String,

    // Scheduler
    pub scheduler_interval_minutes: u64,
    pub manual_cycle_workers: usize,
}

fn env_or<T: std::str::FromStr>(var: &str, default: T) -> T {
    std::env::var(var)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();

        Self {
            database_path: std::env::var("DATABASE_PATH")
                .unwrap_or_else(|_| "./stockpilot.db".to_string()),
            auth_db_path: std::env::var("AUTH_DB_PATH")
                .unwrap_or_else(|_| "./stockpilot_auth.db".to_string()),
            port: env_or("PORT", 8080),
            jwt_secret: std::env::var("JWT_SECRET").unwrap_or_else(|_| {
                "dev-secret-change-in-production-minimum-32-characters".to_string()
            }),
            admin_username: std::env::var("ADMIN_USERNAME")
                .unwrap_or_else(|_| "admin".to_string()),
            admin_password: std::env::var("ADMIN_PASSWORD")
                .unwrap_or_else(|_| "admin123".to_string()),

            default_budget: env_or("DEFAULT_BUDGET", 600.0),
            revenue_reinvestment_rate: env_or("REVENUE_REINVESTMENT_RATE", 0.3),
            auto_approval_threshold: env_or("AUTO_APPROVAL_THRESHOLD", 1000.0),

            max_negotiation_rounds: env_or("MAX_NEGOTIATION_ROUNDS", 3),
            negotiation_roi_threshold: env_or("NEGOTIATION_ROI_THRESHOLD", 1.1),
            critical_stock_roi_multiplier: env_or("CRITICAL_STOCK_ROI_MULTIPLIER", 1.5),

            stockout_risk_high_multiplier: env_or("STOCKOUT_RISK_HIGH_MULTIPLIER", 10.0),
            stockout_risk_medium_multiplier: env_or("STOCKOUT_RISK_MEDIUM_MULTIPLIER", 2.0),

            min_confidence_to_order: env_or("MIN_CONFIDENCE_TO_ORDER", 0.3),
            service_level: env_or("SERVICE_LEVEL", 0.95),

            max_forecast_llm_calls: env_or("MAX_FORECAST_LLM_CALLS", 10),
            forecast_timeout_secs: env_or("FORECAST_TIMEOUT_SECS", 30),
            dialogue_timeout_secs: env_or("DIALOGUE_TIMEOUT_SECS", 15),
            negotiation_timeout_secs: env_or("NEGOTIATION_TIMEOUT_SECS", 25),
            llm_api_url: std::env::var("LLM_API_URL").ok().filter(|s| !s.trim().is_empty()),
            llm_api_key: std::env::var("LLM_API_KEY").ok().filter(|s| !s.trim().is_empty()),
            llm_forecast_model: std::env::var("LLM_FORECAST_MODEL")
                .unwrap_or_else(|_| "llama-3.3-70b-versatile".to_string()),
            llm_dialogue_model: std::env::var("LLM_DIALOGUE_MODEL")
                .unwrap_or_else(|_| "llama-3.1-8b-instant".to_string()),

            scheduler_interval_minutes: env_or("SCHEDULER_INTERVAL_MINUTES", 60),
            manual_cycle_workers: env_or("MANUAL_CYCLE_WORKERS", 4),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: ":memory:".to_string(),
            auth_db_path: ":memory:".to_string(),
            port: 8080,
            jwt_secret: "test-secret".to_string(),
            admin_username: "admin".to_string(),
            admin_password: "admin123".to_string(),
            default_budget: 600.0,
            revenue_reinvestment_rate: 0.3,
            auto_approval_threshold: 1000.0,
            max_negotiation_rounds: 3,
            negotiation_roi_threshold: 1.1,
            critical_stock_roi_multiplier: 1.5,
            stockout_risk_high_multiplier: 10.0,
            stockout_risk_medium_multiplier: 2.0,
            min_confidence_to_order: 0.3,
            service_level: 0.95,
            max_forecast_llm_calls: 10,
            forecast_timeout_secs: 30,
            dialogue_timeout_secs: 15,
            negotiation_timeout_secs: 25,
            llm_api_url: None,
            llm_api_key: None,
            llm_forecast_model: "llama-3.3-70b-versatile".to_string(),
            llm_dialogue_model: "llama-3.1-8b-instant".to_string(),
            scheduler_interval_minutes: 60,
            manual_cycle_workers: 4,
        }
    }
}
