//! Read models and mutations for inventory, sales, orders and alerts

use crate::api::AppState;
use crate::models::{Alert, InventoryRecord, OrderRecord, OrderStatus, SalesEvent};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<usize>,
}

pub async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "stockpilot",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// ---- inventory ----

pub async fn get_inventory(
    State(state): State<AppState>,
) -> Result<Json<Vec<InventoryRecord>>, StatusCode> {
    state
        .store
        .list_inventory()
        .map(Json)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

#[derive(Debug, Deserialize)]
pub struct InventoryUpsert {
    pub sku: String,
    pub product_name: String,
    pub quantity: i64,
    pub threshold: i64,
    #[serde(default)]
    pub unit_price: f64,
    pub holding_cost_percent: Option<f64>,
    pub reorder_cost: Option<f64>,
    pub lead_time_days: Option<i64>,
    pub supplier: Option<String>,
    pub min_order_qty: Option<i64>,
    pub max_order_qty: Option<i64>,
    pub safety_stock: Option<i64>,
    pub category: Option<String>,
    pub is_active: Option<bool>,
}

pub async fn post_inventory(
    State(state): State<AppState>,
    Json(body): Json<InventoryUpsert>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let mut item = InventoryRecord::new(&body.sku, &body.product_name, body.quantity, body.threshold)
        .with_price(body.unit_price);
    if let Some(v) = body.holding_cost_percent {
        item.holding_cost_percent = v;
    }
    if let Some(v) = body.reorder_cost {
        item.reorder_cost = v;
    }
    if let Some(v) = body.lead_time_days {
        item.lead_time_days = v;
    }
    if let Some(v) = body.min_order_qty {
        item.min_order_qty = v;
    }
    if let Some(v) = body.safety_stock {
        item.safety_stock = v;
    }
    item.max_order_qty = body.max_order_qty;
    item.supplier = body.supplier;
    item.category = body.category;
    item.is_active = body.is_active.unwrap_or(true);

    state
        .store
        .upsert_inventory(&item)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(json!({ "message": "Inventory updated", "data": item })))
}

// ---- sales ----

pub async fn get_sales(
    Query(params): Query<ListQuery>,
    State(state): State<AppState>,
) -> Result<Json<Vec<SalesEvent>>, StatusCode> {
    state
        .store
        .list_sales(params.limit.unwrap_or(200))
        .map(Json)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

#[derive(Debug, Deserialize)]
pub struct SaleCreate {
    pub sku: String,
    pub sold_quantity: i64,
    pub date: Option<DateTime<Utc>>,
}

pub async fn post_sales(
    State(state): State<AppState>,
    Json(body): Json<SaleCreate>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    if body.sold_quantity < 1 {
        return Err(StatusCode::BAD_REQUEST);
    }
    let sale = SalesEvent {
        id: None,
        sku: body.sku,
        sold_quantity: body.sold_quantity,
        date: body.date.unwrap_or_else(Utc::now),
    };
    let id = state
        .store
        .insert_sale(&sale)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(json!({ "message": "Sale recorded", "data": { "id": id } })))
}

// ---- orders ----

pub async fn get_orders(
    Query(params): Query<ListQuery>,
    State(state): State<AppState>,
) -> Result<Json<Vec<OrderRecord>>, StatusCode> {
    state
        .store
        .list_orders(params.limit.unwrap_or(200))
        .map(Json)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

#[derive(Debug, Deserialize)]
pub struct OrderCreate {
    pub sku: String,
    pub quantity: i64,
    pub status: Option<String>,
    pub notes: Option<String>,
}

pub async fn post_orders(
    State(state): State<AppState>,
    Json(body): Json<OrderCreate>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    if body.quantity < 1 {
        return Err(StatusCode::BAD_REQUEST);
    }
    let order = OrderRecord {
        id: None,
        sku: body.sku,
        quantity: body.quantity,
        order_date: Utc::now(),
        status: body
            .status
            .as_deref()
            .map(OrderStatus::from_str)
            .unwrap_or(OrderStatus::Pending),
        notes: body.notes,
    };
    let id = state
        .store
        .insert_order(&order)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(json!({ "message": "Order created", "data": { "id": id } })))
}

// ---- alerts ----

pub async fn get_alerts(
    Query(params): Query<ListQuery>,
    State(state): State<AppState>,
) -> Result<Json<Vec<Alert>>, StatusCode> {
    state
        .store
        .list_alerts(params.limit.unwrap_or(100))
        .map(Json)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

#[derive(Debug, Deserialize)]
pub struct AlertCreate {
    pub message: String,
    #[serde(rename = "type")]
    pub alert_type: String,
    pub sku: Option<String>,
    pub priority: Option<i64>,
}

pub async fn post_alerts(
    State(state): State<AppState>,
    Json(body): Json<AlertCreate>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let alert = Alert {
        id: None,
        message: body.message,
        alert_type: body.alert_type,
        sku: body.sku,
        priority: body.priority.unwrap_or(3),
        created_at: Utc::now(),
    };
    let id = state
        .store
        .insert_alert(&alert)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(json!({ "message": "Alert created", "data": { "id": id } })))
}
