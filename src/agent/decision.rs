//! Decision kernel: trend analysis, constraint routing, cost optimization
//!
//! Classic inventory theory drives the reorder proposals: Wilson EOQ for
//! order sizing, a dynamic reorder point scaled by demand volatility and
//! target service level, and an urgency ladder keyed to days-until-
//! stockout. One hard rule sits above all of it: stock below the static
//! threshold always reorders, whatever the forecast says.

use crate::agent::events::{EventKind, EventSink};
use crate::agent::state::{
    AnalyzedSku, ConstrainedSku, ConstraintRoute, CostAnalysis, CycleState, DecisionDetails,
    HeldSku, Proposal, SkuMetrics,
};
use crate::models::{Forecast, InventoryRecord, SalesEvent, Urgency};
use rayon::prelude::*;
use statrs::statistics::Statistics;
use tracing::{info, warn};

const STAGE: &str = "DECISION";

#[derive(Debug, Clone)]
pub struct DecisionEngine {
    pub service_level: f64,
    pub min_confidence_to_order: f64,
}

impl Default for DecisionEngine {
    fn default() -> Self {
        Self {
            service_level: 0.95,
            min_confidence_to_order: 0.3,
        }
    }
}

impl DecisionEngine {
    pub fn new(service_level: f64, min_confidence_to_order: f64) -> Self {
        Self {
            service_level,
            min_confidence_to_order,
        }
    }

    // ---- metric derivation ----

    pub fn extract_metrics(
        &self,
        item: &InventoryRecord,
        forecast: &Forecast,
        recent_sales: &[SalesEvent],
        pending_orders: i64,
    ) -> SkuMetrics {
        let forecast_7day = forecast.total_7day();

        let demands: Vec<f64> = recent_sales.iter().map(|s| s.sold_quantity as f64).collect();
        let daily_avg = if demands.is_empty() {
            forecast_7day / 7.0
        } else {
            demands.iter().mean()
        };

        let volatility = if demands.len() > 1 {
            demands.iter().std_dev() / daily_avg.max(0.1)
        } else {
            0.3
        };

        SkuMetrics {
            current_stock: item.quantity,
            pending_orders,
            forecast_7day,
            daily_avg_demand: daily_avg,
            demand_volatility: volatility,
            lead_time_days: item.lead_time_days,
            unit_cost: item.unit_price,
            holding_cost_percent: item.holding_cost_percent,
            reorder_cost: item.reorder_cost,
            safety_stock: item.safety_stock,
            min_order_qty: item.min_order_qty,
            max_order_qty: item.max_order_qty,
            forecast_confidence: forecast.confidence,
        }
    }

    /// Stockout penalty of NOT ordering: lost revenue over the projected
    /// out-of-stock window, inflated when the stockout is imminent.
    pub fn utility_score(&self, metrics: &SkuMetrics) -> f64 {
        let daily_revenue = metrics.daily_avg_demand * metrics.unit_cost;
        let days_coverage =
            metrics.effective_stock() as f64 / metrics.daily_avg_demand.max(0.1);
        let days_out_of_stock =
            (7.0 + metrics.lead_time_days as f64 - days_coverage).max(0.0);

        let penalty_factor = if days_coverage <= 0.0 {
            5.0
        } else if days_coverage < metrics.lead_time_days as f64 {
            2.0
        } else {
            1.0
        };

        days_out_of_stock * daily_revenue * penalty_factor
    }

    /// Wilson EOQ = sqrt(2DS/H), clamped to the order quantity bounds.
    pub fn calculate_eoq(&self, metrics: &SkuMetrics) -> i64 {
        let annual_demand = metrics.daily_avg_demand * 365.0;
        if annual_demand < 1.0 || metrics.reorder_cost < 0.01 {
            return metrics.min_order_qty;
        }

        let holding_cost_per_unit = metrics.unit_cost * metrics.holding_cost_percent;
        if holding_cost_per_unit < 0.01 {
            return metrics.min_order_qty;
        }

        let eoq = (2.0 * annual_demand * metrics.reorder_cost / holding_cost_per_unit)
            .sqrt()
            .round() as i64;

        let eoq = eoq.max(metrics.min_order_qty);
        match metrics.max_order_qty {
            Some(max) => eoq.min(max),
            None => eoq,
        }
    }

    fn z_score(&self) -> f64 {
        const TABLE: [(f64, f64); 4] =
            [(0.90, 1.28), (0.95, 1.65), (0.99, 2.33), (0.999, 3.09)];
        for (level, z) in TABLE {
            if (self.service_level - level).abs() < 1e-9 {
                return z;
            }
        }
        1.65 + (self.service_level - 0.95) * 10.0
    }

    /// ROP = lead-time demand + z * daily demand * clamped volatility.
    pub fn dynamic_reorder_point(&self, metrics: &SkuMetrics) -> i64 {
        let lead_time_demand = metrics.daily_avg_demand * metrics.lead_time_days as f64;
        let volatility_factor = metrics.demand_volatility.clamp(0.5, 2.0);
        let dynamic_safety = self.z_score() * metrics.daily_avg_demand * volatility_factor;
        (lead_time_demand + dynamic_safety) as i64
    }

    pub fn calculate_urgency(
        &self,
        metrics: &SkuMetrics,
        reorder_point: i64,
        days_until_stockout: Option<f64>,
    ) -> Urgency {
        let lead = metrics.lead_time_days as f64;
        if let Some(days) = days_until_stockout {
            if days < 0.0 || days < lead * 0.5 {
                return Urgency::Critical;
            } else if days < lead {
                return Urgency::High;
            } else if days < lead * 2.0 {
                return Urgency::Medium;
            }
        }

        let effective = metrics.effective_stock() as f64;
        let rop = reorder_point as f64;
        if effective < rop * 0.5 {
            return Urgency::Critical;
        } else if effective < rop {
            return Urgency::High;
        } else if effective < rop * 1.5 {
            return Urgency::Medium;
        }

        // Uncertain demand defers as Low either way
        Urgency::Low
    }

    pub fn cost_analysis(&self, metrics: &SkuMetrics, order_qty: i64) -> CostAnalysis {
        let annual_demand = metrics.daily_avg_demand * 365.0;
        let orders_per_year = if order_qty > 0 {
            annual_demand / order_qty as f64
        } else {
            0.0
        };
        let annual_ordering_cost = orders_per_year * metrics.reorder_cost;
        let avg_inventory = order_qty as f64 / 2.0 + metrics.safety_stock as f64;
        let annual_holding_cost = metrics.annual_holding_cost(avg_inventory);
        let total_annual_cost = annual_ordering_cost + annual_holding_cost;

        CostAnalysis {
            annual_demand,
            orders_per_year,
            annual_ordering_cost,
            avg_inventory,
            annual_holding_cost,
            total_annual_cost,
            cost_per_unit: total_annual_cost / annual_demand.max(1.0),
            purchasing_cost_per_unit: metrics.unit_cost,
        }
    }

    // ---- stage 1: analyze trends ----

    pub fn analyze_trends(&self, state: &mut CycleState) {
        info!(
            "[{}] Analyzing trends for {} SKUs...",
            state.cycle_id,
            state.forecasts.len()
        );

        let results: Vec<Result<AnalyzedSku, (String, String)>> = state
            .forecasts
            .par_iter()
            .map(|forecast| {
                let item = state
                    .inventory_data
                    .get(&forecast.sku)
                    .ok_or_else(|| {
                        (forecast.sku.clone(), "no inventory record for forecast".to_string())
                    })?
                    .clone();
                let recent = state
                    .sales_by_sku
                    .get(&forecast.sku)
                    .map(Vec::as_slice)
                    .unwrap_or(&[]);
                let pending = state
                    .pending_orders_by_sku
                    .get(&forecast.sku)
                    .copied()
                    .unwrap_or(0);

                let metrics = self.extract_metrics(&item, forecast, recent, pending);
                let utility_score = self.utility_score(&metrics);

                Ok(AnalyzedSku {
                    sku: forecast.sku.clone(),
                    product_name: forecast.product_name.clone(),
                    metrics,
                    forecast: forecast.clone(),
                    inventory: item,
                    utility_score,
                })
            })
            .collect();

        let mut analyzed = Vec::with_capacity(results.len());
        for result in results {
            match result {
                Ok(item) => analyzed.push(item),
                Err((sku, message)) => {
                    warn!("Metric extraction failed for {sku}: {message}");
                    state.add_failed_sku(&sku, format!("analyze: {message}"));
                }
            }
        }
        state.analyzed = analyzed;
    }

    // ---- stage 2: check constraints ----

    pub fn check_constraints(&self, state: &mut CycleState) {
        info!(
            "[{}] Checking constraints for {} SKUs...",
            state.cycle_id,
            state.analyzed.len()
        );

        let mut constrained = Vec::new();
        let mut held = Vec::new();

        for item in &state.analyzed {
            if !item.inventory.is_active {
                held.push(HeldSku {
                    sku: item.sku.clone(),
                    reason: format!("{} is marked inactive (obsolete)", item.sku),
                });
                continue;
            }

            if item.metrics.forecast_confidence < self.min_confidence_to_order {
                let threshold = item.inventory.threshold;
                let current_stock = item.metrics.current_stock;

                if current_stock < threshold {
                    let order_qty =
                        (threshold * 2 - current_stock).max(item.metrics.min_order_qty);
                    constrained.push(ConstrainedSku {
                        analyzed: item.clone(),
                        route: ConstraintRoute::Fallback { order_qty },
                    });
                } else {
                    held.push(HeldSku {
                        sku: item.sku.clone(),
                        reason: format!(
                            "low forecast confidence ({:.2}) and stock {} >= threshold {}",
                            item.metrics.forecast_confidence, current_stock, threshold
                        ),
                    });
                }
            } else {
                constrained.push(ConstrainedSku {
                    analyzed: item.clone(),
                    route: ConstraintRoute::Proceed,
                });
            }
        }

        info!(
            "[{}] Constraint check complete. {}/{} passed, {} held.",
            state.cycle_id,
            constrained.len(),
            state.analyzed.len(),
            held.len()
        );
        state.constrained = constrained;
        state.held = held;
    }

    // ---- stage 3: optimize cost ----

    pub fn optimize_cost(&self, state: &mut CycleState, sink: &EventSink) {
        info!(
            "[{}] Optimizing cost for {} SKUs...",
            state.cycle_id,
            state.constrained.len()
        );

        let decisions: Vec<Proposal> = state
            .constrained
            .par_iter()
            .map(|item| self.decide(item))
            .collect();

        let reorders = decisions.iter().filter(|d| d.reorder_required).count();
        sink.emit(
            EventKind::Progress,
            STAGE,
            format!("Decisions complete. {reorders} reorders identified."),
        );

        for decision in decisions.iter().filter(|d| d.reorder_required) {
            sink.emit_with(
                EventKind::DecisionItem,
                STAGE,
                format!(
                    "@FinanceController, requesting budget for {}. Stock is critical. Need {} units.",
                    decision.product_name, decision.order_quantity
                ),
                Some(serde_json::json!({
                    "sku": decision.sku,
                    "qty": decision.order_quantity,
                    "reason": decision.reason,
                })),
            );
        }

        state.decisions = decisions;
    }

    fn decide(&self, item: &ConstrainedSku) -> Proposal {
        let analyzed = &item.analyzed;
        let metrics = &analyzed.metrics;
        let threshold = analyzed.inventory.threshold;
        let current_stock = metrics.current_stock;

        if let ConstraintRoute::Fallback { order_qty } = item.route {
            return self.threshold_proposal(
                analyzed,
                order_qty,
                threshold * 2,
                "threshold_fallback",
                format!(
                    "Low confidence fallback: Stock {current_stock} < Threshold {threshold}"
                ),
            );
        }

        // Hard override: below the static threshold, order regardless of
        // what the forecast machinery concluded.
        if current_stock < threshold {
            let target_stock = threshold * 2;
            let order_qty = (target_stock - current_stock).max(metrics.min_order_qty);
            return self.threshold_proposal(
                analyzed,
                order_qty,
                target_stock,
                "threshold_override",
                format!(
                    "Stock {current_stock} < Threshold {threshold}. Ordering to {target_stock}."
                ),
            );
        }

        let eoq = self.calculate_eoq(metrics);
        let reorder_point = self.dynamic_reorder_point(metrics);
        let effective_stock = metrics.effective_stock();

        let days_until_stockout = if metrics.daily_avg_demand > 0.0 {
            Some(effective_stock as f64 / metrics.daily_avg_demand)
        } else {
            None
        };

        let reorder_required = effective_stock < reorder_point || effective_stock == 0;
        let order_quantity = if reorder_required {
            ((reorder_point + eoq) - effective_stock).max(0)
        } else {
            0
        };

        let urgency = self.calculate_urgency(metrics, reorder_point, days_until_stockout);
        let cost_analysis = self.cost_analysis(metrics, eoq);

        let reason = if reorder_required {
            format!(
                "{}: Effective stock {} (cur {} + pend {}) < ROP {}. Order {} units (EOQ {}, lead {}d, demand {:.1}/day).",
                analyzed.sku,
                effective_stock,
                current_stock,
                metrics.pending_orders,
                reorder_point,
                order_quantity,
                eoq,
                metrics.lead_time_days,
                metrics.daily_avg_demand,
            )
        } else {
            format!(
                "{}: Effective stock {} >= ROP {}. No reorder needed (EOQ {}).",
                analyzed.sku, effective_stock, reorder_point, eoq
            )
        };

        Proposal {
            sku: analyzed.sku.clone(),
            product_name: analyzed.product_name.clone(),
            reorder_required,
            order_quantity,
            urgency,
            reason,
            details: DecisionDetails {
                decision_type: "optimized".to_string(),
                current_stock,
                pending_orders: metrics.pending_orders,
                effective_stock,
                reorder_point,
                eoq,
                threshold,
                target_stock: reorder_point + eoq,
                lead_time_days: metrics.lead_time_days,
                daily_avg_demand: metrics.daily_avg_demand,
                forecast_7day: metrics.forecast_7day,
                demand_volatility: metrics.demand_volatility,
                forecast_confidence: metrics.forecast_confidence,
                days_until_stockout,
                safety_stock: metrics.safety_stock,
                unit_price: metrics.unit_cost,
            },
            cost_analysis,
            finance_metrics: None,
            negotiated: false,
            original_quantity: None,
            requires_approval: false,
            approval_reason: None,
            utility_score: analyzed.utility_score,
        }
    }

    fn threshold_proposal(
        &self,
        analyzed: &AnalyzedSku,
        order_qty: i64,
        target_stock: i64,
        decision_type: &str,
        reason: String,
    ) -> Proposal {
        let metrics = &analyzed.metrics;
        Proposal {
            sku: analyzed.sku.clone(),
            product_name: analyzed.product_name.clone(),
            reorder_required: true,
            order_quantity: order_qty,
            urgency: Urgency::High,
            reason,
            details: DecisionDetails {
                decision_type: decision_type.to_string(),
                current_stock: metrics.current_stock,
                pending_orders: metrics.pending_orders,
                effective_stock: metrics.effective_stock(),
                reorder_point: 0,
                eoq: 0,
                threshold: analyzed.inventory.threshold,
                target_stock,
                lead_time_days: metrics.lead_time_days,
                daily_avg_demand: metrics.daily_avg_demand,
                forecast_7day: metrics.forecast_7day,
                demand_volatility: metrics.demand_volatility,
                forecast_confidence: metrics.forecast_confidence,
                days_until_stockout: None,
                safety_stock: metrics.safety_stock,
                unit_price: metrics.unit_cost,
            },
            cost_analysis: CostAnalysis {
                purchasing_cost_per_unit: metrics.unit_cost,
                ..Default::default()
            },
            finance_metrics: None,
            negotiated: false,
            original_quantity: None,
            requires_approval: false,
            approval_reason: None,
            utility_score: analyzed.utility_score,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::events::create_stream;
    use chrono::{Duration, Utc};

    fn engine() -> DecisionEngine {
        DecisionEngine::default()
    }

    fn metrics_template() -> SkuMetrics {
        SkuMetrics {
            current_stock: 40,
            pending_orders: 0,
            forecast_7day: 70.0,
            daily_avg_demand: 10.0,
            demand_volatility: 0.1,
            lead_time_days: 7,
            unit_cost: 10.0,
            holding_cost_percent: 0.15,
            reorder_cost: 25.0,
            safety_stock: 5,
            min_order_qty: 1,
            max_order_qty: None,
            forecast_confidence: 0.9,
        }
    }

    #[test]
    fn eoq_matches_wilson_formula() {
        // sqrt(2 * 3650 * 25 / 1.5) = sqrt(121_666.7) ~= 348.8 -> 349
        let metrics = metrics_template();
        assert_eq!(engine().calculate_eoq(&metrics), 349);
    }

    #[test]
    fn eoq_respects_order_bounds() {
        let mut metrics = metrics_template();
        metrics.min_order_qty = 400;
        assert_eq!(engine().calculate_eoq(&metrics), 400);

        metrics.min_order_qty = 1;
        metrics.max_order_qty = Some(200);
        assert_eq!(engine().calculate_eoq(&metrics), 200);
    }

    #[test]
    fn eoq_degenerates_to_min_order_qty() {
        let mut metrics = metrics_template();
        metrics.daily_avg_demand = 0.0;
        metrics.min_order_qty = 10;
        assert_eq!(engine().calculate_eoq(&metrics), 10);

        let mut metrics = metrics_template();
        metrics.unit_cost = 0.0; // negligible holding cost
        metrics.min_order_qty = 3;
        assert_eq!(engine().calculate_eoq(&metrics), 3);
    }

    #[test]
    fn rop_uses_volatility_floor() {
        // 10*7 + 1.65*10*0.5 = 78.25 -> 78
        let metrics = metrics_template();
        assert_eq!(engine().dynamic_reorder_point(&metrics), 78);
    }

    #[test]
    fn rop_never_below_lead_time_demand() {
        for volatility in [0.0, 0.5, 1.3, 5.0] {
            let mut metrics = metrics_template();
            metrics.demand_volatility = volatility;
            let rop = engine().dynamic_reorder_point(&metrics);
            assert!(rop as f64 >= metrics.daily_avg_demand * metrics.lead_time_days as f64);
        }
    }

    #[test]
    fn z_score_table_and_interpolation() {
        assert_eq!(DecisionEngine::new(0.90, 0.3).z_score(), 1.28);
        assert_eq!(DecisionEngine::new(0.95, 0.3).z_score(), 1.65);
        assert_eq!(DecisionEngine::new(0.99, 0.3).z_score(), 2.33);
        assert_eq!(DecisionEngine::new(0.999, 0.3).z_score(), 3.09);
        // Off-table: linear from 0.95
        let z = DecisionEngine::new(0.97, 0.3).z_score();
        assert!((z - 1.85).abs() < 1e-9);
    }

    #[test]
    fn urgency_ladder() {
        let engine = engine();
        let metrics = metrics_template(); // lead 7

        // Stockout sooner than half the lead time
        assert_eq!(
            engine.calculate_urgency(&metrics, 78, Some(2.0)),
            Urgency::Critical
        );
        assert_eq!(
            engine.calculate_urgency(&metrics, 78, Some(5.0)),
            Urgency::High
        );
        assert_eq!(
            engine.calculate_urgency(&metrics, 78, Some(10.0)),
            Urgency::Medium
        );

        // No stockout pressure: ROP distance decides (effective 40)
        assert_eq!(
            engine.calculate_urgency(&metrics, 100, Some(100.0)),
            Urgency::Critical
        );
        assert_eq!(
            engine.calculate_urgency(&metrics, 50, Some(100.0)),
            Urgency::High
        );
        assert_eq!(
            engine.calculate_urgency(&metrics, 30, Some(100.0)),
            Urgency::Medium
        );
        assert_eq!(
            engine.calculate_urgency(&metrics, 10, Some(100.0)),
            Urgency::Low
        );
    }

    #[test]
    fn volatility_defaults_on_single_observation() {
        let engine = engine();
        let item = InventoryRecord::new("SKU-V", "Widget", 10, 5);
        let forecast = Forecast {
            sku: "SKU-V".to_string(),
            product_name: "Widget".to_string(),
            daily: vec![2.0; 7],
            confidence: 0.8,
            explanation: String::new(),
        };
        let sales = vec![SalesEvent {
            id: None,
            sku: "SKU-V".to_string(),
            sold_quantity: 4,
            date: Utc::now(),
        }];
        let metrics = engine.extract_metrics(&item, &forecast, &sales, 0);
        assert_eq!(metrics.demand_volatility, 0.3);
        assert_eq!(metrics.daily_avg_demand, 4.0);
    }

    #[test]
    fn utility_score_scales_with_criticality() {
        let engine = engine();
        let mut metrics = metrics_template();

        // Comfortable coverage: 40/10 = 4 days < lead 7 -> factor 2
        let at_risk = engine.utility_score(&metrics);
        // days_out = 7 + 7 - 4 = 10; revenue 100/day; * 2
        assert!((at_risk - 2000.0).abs() < 1e-6);

        // Already stocked out -> factor 5
        metrics.current_stock = 0;
        let stocked_out = engine.utility_score(&metrics);
        assert!(stocked_out > at_risk);
    }

    // ---- stage-level scenarios ----

    fn state_for(item: InventoryRecord, forecast: Forecast, sales: Vec<SalesEvent>) -> CycleState {
        let mut state = CycleState::new("c-dec", 1, 0.0, 3);
        let sku = item.sku.clone();
        state.inventory_data.insert(sku.clone(), item);
        if !sales.is_empty() {
            state.sales_by_sku.insert(sku, sales);
        }
        state.forecasts = vec![forecast];
        state
    }

    #[test]
    fn pure_threshold_override_orders_to_double_threshold() {
        // qty=2, threshold=50, min_order=10, zero-confidence forecast
        let item = InventoryRecord::new("SKU-A", "Widget", 2, 50)
            .with_price(15.99)
            .with_lead_time(3)
            .with_min_order_qty(10);
        let forecast = Forecast {
            sku: "SKU-A".to_string(),
            product_name: "Widget".to_string(),
            daily: vec![0.0; 7],
            confidence: 0.0,
            explanation: "No data".to_string(),
        };
        let mut state = state_for(item, forecast, Vec::new());

        let engine = engine();
        engine.analyze_trends(&mut state);
        engine.check_constraints(&mut state);
        let sink = create_stream("c-dec-s1");
        engine.optimize_cost(&mut state, &sink);

        assert_eq!(state.decisions.len(), 1);
        let decision = &state.decisions[0];
        assert!(decision.reorder_required);
        assert_eq!(decision.order_quantity, 98); // max(10, 100 - 2)
        assert_eq!(decision.urgency, Urgency::High);
        assert!(decision.details.decision_type.starts_with("threshold_"));
    }

    #[test]
    fn eoq_path_with_steady_demand() {
        // S2: qty=40, threshold=30, 10/day sales, lead 7
        let item = InventoryRecord::new("SKU-B", "Widget", 40, 30).with_price(10.0);
        let now = Utc::now();
        let sales: Vec<SalesEvent> = (0..7)
            .map(|i| SalesEvent {
                id: None,
                sku: "SKU-B".to_string(),
                sold_quantity: 10,
                date: now - Duration::days(i),
            })
            .collect();
        let forecast = Forecast {
            sku: "SKU-B".to_string(),
            product_name: "Widget".to_string(),
            daily: vec![10.0; 7],
            confidence: 0.95,
            explanation: String::new(),
        };
        let mut state = state_for(item, forecast, sales);

        let engine = engine();
        engine.analyze_trends(&mut state);
        engine.check_constraints(&mut state);
        let sink = create_stream("c-dec-s2");
        engine.optimize_cost(&mut state, &sink);

        let decision = &state.decisions[0];
        assert!(decision.reorder_required);
        assert_eq!(decision.details.eoq, 349);
        assert_eq!(decision.details.reorder_point, 78);
        assert_eq!(decision.order_quantity, 387); // (78 + 349) - 40
    }

    #[test]
    fn low_confidence_below_threshold_falls_back() {
        // S6: confidence 0.2, stock 4, threshold 10
        let item = InventoryRecord::new("SKU-F", "Widget", 4, 10);
        let forecast = Forecast {
            sku: "SKU-F".to_string(),
            product_name: "Widget".to_string(),
            daily: vec![1.0; 7],
            confidence: 0.2,
            explanation: String::new(),
        };
        let mut state = state_for(item, forecast, Vec::new());

        let engine = engine();
        engine.analyze_trends(&mut state);
        engine.check_constraints(&mut state);
        let sink = create_stream("c-dec-s6");
        engine.optimize_cost(&mut state, &sink);

        let decision = &state.decisions[0];
        assert!(decision.reorder_required);
        assert_eq!(decision.order_quantity, 16); // max(1, 20 - 4)
        assert_eq!(decision.urgency, Urgency::High);
        assert_eq!(decision.details.decision_type, "threshold_fallback");
    }

    #[test]
    fn low_confidence_above_threshold_is_held() {
        let item = InventoryRecord::new("SKU-H", "Widget", 50, 10);
        let forecast = Forecast {
            sku: "SKU-H".to_string(),
            product_name: "Widget".to_string(),
            daily: vec![1.0; 7],
            confidence: 0.2,
            explanation: String::new(),
        };
        let mut state = state_for(item, forecast, Vec::new());

        let engine = engine();
        engine.analyze_trends(&mut state);
        engine.check_constraints(&mut state);

        assert!(state.constrained.is_empty());
        assert_eq!(state.held.len(), 1);
        assert!(state.held[0].reason.contains("low forecast confidence"));
    }

    #[test]
    fn inactive_sku_is_dropped() {
        let mut item = InventoryRecord::new("SKU-X", "Old Widget", 2, 50);
        item.is_active = false;
        let forecast = Forecast {
            sku: "SKU-X".to_string(),
            product_name: "Old Widget".to_string(),
            daily: vec![5.0; 7],
            confidence: 0.9,
            explanation: String::new(),
        };
        let mut state = state_for(item, forecast, Vec::new());

        let engine = engine();
        engine.analyze_trends(&mut state);
        engine.check_constraints(&mut state);

        assert!(state.constrained.is_empty());
        assert!(state.held[0].reason.contains("inactive"));
    }
}
