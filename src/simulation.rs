//! Demo sales generator
//!
//! Seeds random sales across the active catalog so a freshly started
//! instance has enough history for the statistical forecaster. Only
//! reachable when simulation mode is enabled.

use crate::api::AppState;
use crate::models::SalesEvent;
use crate::store::InventoryStore;
use anyhow::Result;
use axum::{extract::State, http::StatusCode, response::Json};
use chrono::{Duration, Utc};
use rand::Rng;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

pub fn generate_sales(store: &InventoryStore, count: usize) -> Result<usize> {
    let inventory = store.list_inventory()?;
    let active: Vec<_> = inventory.iter().filter(|i| i.is_active).collect();
    if active.is_empty() {
        return Ok(0);
    }

    let mut rng = rand::thread_rng();
    let mut generated = 0;
    for _ in 0..count {
        let item = active[rng.gen_range(0..active.len())];
        let sale = SalesEvent {
            id: None,
            sku: item.sku.clone(),
            sold_quantity: rng.gen_range(1..=10),
            date: Utc::now()
                - Duration::days(rng.gen_range(0..7))
                - Duration::minutes(rng.gen_range(0..1440)),
        };
        store.insert_sale(&sale)?;
        generated += 1;
    }

    info!("🧪 Simulated {generated} sales across {} SKUs", active.len());
    Ok(generated)
}

#[derive(Debug, Deserialize)]
pub struct SimulateRequest {
    pub count: Option<usize>,
}

pub async fn post_simulate_sales(
    State(state): State<AppState>,
    Json(body): Json<SimulateRequest>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    if !state.simulation_mode {
        return Err(StatusCode::FORBIDDEN);
    }
    let count = body.count.unwrap_or(50).min(10_000);
    let generated =
        generate_sales(&state.store, count).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(Json(json!({ "message": "Sales simulated", "generated": generated })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::InventoryRecord;

    #[test]
    fn generates_sales_for_active_skus_only() {
        let store = InventoryStore::new(":memory:").unwrap();
        store
            .upsert_inventory(&InventoryRecord::new("SKU-A", "Widget", 10, 5))
            .unwrap();
        let mut dead = InventoryRecord::new("SKU-DEAD", "Retired", 0, 5);
        dead.is_active = false;
        store.upsert_inventory(&dead).unwrap();

        let generated = generate_sales(&store, 25).unwrap();
        assert_eq!(generated, 25);

        let sales = store.list_sales(100).unwrap();
        assert_eq!(sales.len(), 25);
        assert!(sales.iter().all(|s| s.sku == "SKU-A"));
        assert!(sales.iter().all(|s| (1..=10).contains(&s.sold_quantity)));
    }

    #[test]
    fn empty_catalog_generates_nothing() {
        let store = InventoryStore::new(":memory:").unwrap();
        assert_eq!(generate_sales(&store, 10).unwrap(), 0);
    }
}
