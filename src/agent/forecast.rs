//! Hybrid demand forecasting
//!
//! A statistical SMA + dampened-trend baseline covers stable items; the
//! external estimator is reserved for SKUs with no usable history or very
//! low statistical confidence, budgeted by a per-cycle call cap. The
//! statistical pass fans out across SKUs; external calls stay serialized
//! to respect provider rate limits.

use crate::agent::events::{EventKind, EventSink};
use crate::agent::llm::DemandEstimator;
use crate::agent::state::CycleState;
use crate::models::{Forecast, InventoryRecord, SalesEvent};
use rayon::prelude::*;
use statrs::statistics::Statistics;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const STAGE: &str = "FORECAST";
/// 7-day totals above this raise a demand-spike stream event.
const HIGH_DEMAND_THRESHOLD: f64 = 100.0;

pub struct ForecastStage {
    estimator: Option<Arc<dyn DemandEstimator>>,
    max_external_calls: u32,
    timeout: Duration,
}

struct Candidate {
    sku: String,
    statistical: Option<Forecast>,
    needs_external: bool,
    priority: i32,
}

impl ForecastStage {
    pub fn new(
        estimator: Option<Arc<dyn DemandEstimator>>,
        max_external_calls: u32,
        timeout: Duration,
    ) -> Self {
        Self {
            estimator,
            max_external_calls,
            timeout,
        }
    }

    pub fn run(&self, state: &mut CycleState, sink: &EventSink) {
        info!(
            "[{}] Generating forecasts for {} SKUs...",
            state.cycle_id,
            state.inventory_data.len()
        );

        // Statistical baselines in parallel; BTreeMap keeps SKU order stable.
        let mut candidates: Vec<Candidate> = state
            .inventory_data
            .par_iter()
            .map(|(sku, item)| {
                let recent = state.sales_by_sku.get(sku).map(Vec::as_slice).unwrap_or(&[]);
                let statistical = statistical_forecast(item, recent);
                let needs_external = match &statistical {
                    None => true,
                    Some(f) => f.confidence < 0.3,
                };
                let mut priority = match &statistical {
                    None => 3,
                    Some(f) if f.confidence < 0.3 => 2,
                    Some(_) => 0,
                };
                if item.unit_price > 100.0 {
                    priority += 1;
                }
                Candidate {
                    sku: sku.clone(),
                    statistical,
                    needs_external,
                    priority,
                }
            })
            .collect();

        // High priority first; SKU order breaks ties so the external
        // budget is spent the same way every run.
        candidates.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.sku.cmp(&b.sku)));

        let mut external_calls = 0u32;
        let mut forecasts = Vec::with_capacity(candidates.len());

        for candidate in candidates {
            let item = match state.inventory_data.get(&candidate.sku) {
                Some(item) => item.clone(),
                None => continue,
            };
            let recent = state
                .sales_by_sku
                .get(&candidate.sku)
                .map(Vec::as_slice)
                .unwrap_or(&[]);

            let forecast = if candidate.needs_external {
                if external_calls >= self.max_external_calls {
                    info!(
                        "External call limit reached ({}). Statistical fallback for {}",
                        self.max_external_calls, candidate.sku
                    );
                    candidate
                        .statistical
                        .unwrap_or_else(|| zero_forecast(&item, "No data, external budget exhausted"))
                } else {
                    match self.external_forecast(&item, recent) {
                        Some(forecast) => {
                            external_calls += 1;
                            forecast
                        }
                        None => candidate
                            .statistical
                            .unwrap_or_else(|| zero_forecast(&item, "No data")),
                    }
                }
            } else {
                // needs_external is false only when a statistical forecast exists
                candidate.statistical.unwrap()
            };

            let total = forecast.total_7day();
            if total > HIGH_DEMAND_THRESHOLD {
                sink.emit_with(
                    EventKind::Forecast,
                    STAGE,
                    format!(
                        "@InventoryManager, I'm seeing a spike in {}. Predicted sales: {} units (Confidence: {}%).",
                        forecast.product_name,
                        total as i64,
                        (forecast.confidence * 100.0) as i64
                    ),
                    Some(serde_json::json!({
                        "sku": forecast.sku,
                        "confidence": forecast.confidence,
                    })),
                );
            }

            forecasts.push(forecast);
        }

        info!(
            "[{}] Generated {} forecasts ({} used external estimator)",
            state.cycle_id,
            forecasts.len(),
            external_calls
        );
        state.forecasts = forecasts;
    }

    fn external_forecast(&self, item: &InventoryRecord, recent: &[SalesEvent]) -> Option<Forecast> {
        let estimator = self.estimator.as_ref()?;
        match estimator.estimate(item, recent, self.timeout) {
            Ok(estimate) => {
                // Floor very low external confidence so a usable estimate
                // is not routed straight to a hold.
                let confidence = if estimate.confidence < 0.4 {
                    0.45
                } else {
                    estimate.confidence
                };
                Some(Forecast {
                    sku: item.sku.clone(),
                    product_name: item.product_name.clone(),
                    daily: estimate.daily,
                    confidence,
                    explanation: estimate.explanation,
                })
            }
            Err(e) => {
                warn!("External forecast failed for {}: {e}. Using fallback.", item.sku);
                None
            }
        }
    }
}

/// SMA + dampened trend. Needs at least 3 observations; `sales` must be
/// newest first (the fetch stage guarantees it).
pub fn statistical_forecast(item: &InventoryRecord, sales: &[SalesEvent]) -> Option<Forecast> {
    if sales.len() < 3 {
        return None;
    }

    let quantities: Vec<f64> = sales.iter().map(|s| s.sold_quantity as f64).collect();
    let avg = quantities.iter().mean();

    let trend = if quantities.len() >= 6 {
        let recent = quantities[..3].iter().mean();
        let prev = quantities[3..6].iter().mean();
        // Small bases produce explosive ratios; ignore them.
        if prev < 5.0 {
            0.0
        } else {
            ((recent - prev) / prev).clamp(-0.5, 0.5)
        }
    } else {
        0.0
    };

    let daily_value = (avg * (1.0 + trend * 0.5)).round().max(0.0);

    let volatility = if quantities.len() > 1 {
        quantities.iter().std_dev() / avg.max(1.0)
    } else {
        0.0
    };

    Some(Forecast {
        sku: item.sku.clone(),
        product_name: item.product_name.clone(),
        daily: vec![daily_value; 7],
        confidence: (1.0 - volatility).max(0.1),
        explanation: format!(
            "Statistical forecast (SMA: {:.1}, trend: {:+.1}%)",
            avg,
            trend * 100.0
        ),
    })
}

fn zero_forecast(item: &InventoryRecord, explanation: &str) -> Forecast {
    Forecast {
        sku: item.sku.clone(),
        product_name: item.product_name.clone(),
        daily: vec![0.0; 7],
        confidence: 0.0,
        explanation: explanation.to_string(),
    }
}
