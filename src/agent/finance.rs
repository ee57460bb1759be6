//! Finance stage: dynamic budgeting and the 0/1 knapsack budget solver
//!
//! Round 0 scores every reorder proposal (cost, stockout-risk-weighted
//! projected value, ROI) and solves a 0/1 knapsack: maximize total
//! projected value subject to total cost <= budget. Rejected items go to
//! negotiation. Round 1 re-runs the solver over the quantity-reduced
//! counter-proposals plus the surviving round-0 approvals.
//!
//! The solver must be deterministic: equal-value selections break ties on
//! the lexicographically smallest SKU tuple so replays and tests agree.

use crate::agent::dialogue::DialogueGenerator;
use crate::agent::state::{CycleState, FinanceMetrics, Proposal};
use tracing::{info, warn};

/// One candidate order for the budget solver.
#[derive(Debug, Clone)]
pub struct KnapsackItem {
    pub sku: String,
    pub cost: f64,
    pub value: f64,
}

#[derive(Debug, Clone)]
pub struct KnapsackSolution {
    /// Indices of selected items, in input order.
    pub selected: Vec<usize>,
    pub total_cost: f64,
    pub total_value: f64,
    pub status: &'static str,
}

const VALUE_EPS: f64 = 1e-9;

/// Exact 0/1 knapsack via depth-first branch and bound.
///
/// Items are explored in SKU order with "include" branched first, so the
/// first optimum found is already biased toward lexicographically small
/// selections; an explicit tuple comparison settles exact value ties.
pub fn solve_knapsack(items: &[KnapsackItem], budget: f64) -> KnapsackSolution {
    // SKU-sorted view; selection tuples compare in this order.
    let mut order: Vec<usize> = (0..items.len()).collect();
    order.sort_by(|&a, &b| items[a].sku.cmp(&items[b].sku));

    // Suffix value sums for the upper bound.
    let mut suffix_value = vec![0.0; items.len() + 1];
    for pos in (0..items.len()).rev() {
        suffix_value[pos] = suffix_value[pos + 1] + items[order[pos]].value.max(0.0);
    }

    struct Search<'a> {
        items: &'a [KnapsackItem],
        order: &'a [usize],
        suffix_value: &'a [f64],
        budget: f64,
        best_value: f64,
        best_tuple: Vec<usize>, // positions in `order`
        current: Vec<usize>,
    }

    impl Search<'_> {
        fn tuple_skus(&self, positions: &[usize]) -> Vec<&str> {
            positions
                .iter()
                .map(|&p| self.items[self.order[p]].sku.as_str())
                .collect()
        }

        fn consider_current(&mut self, value: f64) {
            if value > self.best_value + VALUE_EPS {
                self.best_value = value;
                self.best_tuple = self.current.clone();
            } else if (value - self.best_value).abs() <= VALUE_EPS
                && self.tuple_skus(&self.current) < self.tuple_skus(&self.best_tuple)
            {
                self.best_tuple = self.current.clone();
            }
        }

        fn dfs(&mut self, pos: usize, cost: f64, value: f64) {
            self.consider_current(value);
            if pos == self.order.len() {
                return;
            }
            // Even taking everything left cannot beat the incumbent.
            if value + self.suffix_value[pos] < self.best_value - VALUE_EPS {
                return;
            }

            let idx = self.order[pos];
            let (item_cost, item_value) = (self.items[idx].cost, self.items[idx].value);
            if cost + item_cost <= self.budget + VALUE_EPS {
                self.current.push(pos);
                self.dfs(pos + 1, cost + item_cost, value + item_value);
                self.current.pop();
            }
            self.dfs(pos + 1, cost, value);
        }
    }

    let mut search = Search {
        items,
        order: &order,
        suffix_value: &suffix_value,
        budget,
        best_value: 0.0,
        best_tuple: Vec::new(),
        current: Vec::new(),
    };
    search.dfs(0, 0.0, 0.0);

    let mut selected: Vec<usize> = search
        .best_tuple
        .iter()
        .map(|&p| order[p])
        .collect();
    selected.sort_unstable();

    let total_cost = selected.iter().map(|&i| items[i].cost).sum();
    let total_value = selected.iter().map(|&i| items[i].value).sum();

    KnapsackSolution {
        selected,
        total_cost,
        total_value,
        status: "Optimal",
    }
}

pub struct FinanceStage {
    pub default_budget: f64,
    pub reinvestment_rate: f64,
    pub risk_high_multiplier: f64,
    pub risk_medium_multiplier: f64,
    pub critical_stock_roi_multiplier: f64,
    pub negotiation_roi_threshold: f64,
    dialogue: DialogueGenerator,
}

impl FinanceStage {
    pub fn new(
        default_budget: f64,
        reinvestment_rate: f64,
        risk_high_multiplier: f64,
        risk_medium_multiplier: f64,
        critical_stock_roi_multiplier: f64,
        negotiation_roi_threshold: f64,
        dialogue: DialogueGenerator,
    ) -> Self {
        Self {
            default_budget,
            reinvestment_rate,
            risk_high_multiplier,
            risk_medium_multiplier,
            critical_stock_roi_multiplier,
            negotiation_roi_threshold,
            dialogue,
        }
    }

    pub fn dynamic_budget(&self, recent_revenue: f64) -> f64 {
        self.default_budget + recent_revenue * self.reinvestment_rate
    }

    /// Dispatch on the negotiation round counter: the first pass reviews
    /// fresh proposals, any later pass consumes counter-proposals.
    pub fn run(&self, state: &mut CycleState) {
        if state.negotiation_rounds == 0 {
            self.review_orders(state);
        } else {
            self.re_optimize_with_proposals(state);
        }
    }

    // ---- round 0 ----

    fn review_orders(&self, state: &mut CycleState) {
        let budget = self.dynamic_budget(state.recent_sales_revenue);
        info!("💰 Finance: budget set to ${budget:.2}");

        // Stale artifacts from a previous cycle must not leak in.
        state.negotiation_proposals.clear();
        state.finance_rejections.clear();

        let (mut reorders, passthrough): (Vec<Proposal>, Vec<Proposal>) = state
            .decisions
            .drain(..)
            .partition(|d| d.reorder_required);

        if reorders.is_empty() {
            state.finance_feedback = format!("Budget: ${budget:.2}. No orders proposed.");
            state.budget = budget;
            state.budget_remaining = budget;
            state.decisions = passthrough;
            info!("💰 Finance: no reorders to review.");
            return;
        }

        for proposal in &mut reorders {
            let metrics = self.score(proposal);
            proposal.finance_metrics = Some(metrics);
        }

        let items: Vec<KnapsackItem> = reorders
            .iter()
            .map(|p| {
                let fm = p.finance_metrics.as_ref().unwrap();
                KnapsackItem {
                    sku: p.sku.clone(),
                    cost: fm.total_cost,
                    value: fm.projected_value,
                }
            })
            .collect();

        info!("🧮 Finance: solving knapsack for budget ${budget:.2} over {} orders", items.len());
        let solution = solve_knapsack(&items, budget);
        info!(
            "🧮 Solver status: {} (spend ${:.2}, value ${:.2})",
            solution.status, solution.total_cost, solution.total_value
        );

        let mut approved = Vec::new();
        let mut rejected = Vec::new();
        for (i, proposal) in reorders.into_iter().enumerate() {
            if solution.selected.contains(&i) {
                approved.push(proposal);
            } else {
                rejected.push(proposal);
            }
        }

        let spend = solution.total_cost;
        let budget_remaining = budget - spend;

        for proposal in &rejected {
            let cost = proposal
                .finance_metrics
                .as_ref()
                .map(|m| m.total_cost)
                .unwrap_or(0.0);
            let over = cost - budget_remaining;
            let entry = self.dialogue.rejection(
                &proposal.sku,
                &proposal.product_name,
                cost,
                budget_remaining,
                &format!("Budget exceeded by approx ${over:.2} (optimizer dropped this)"),
            );
            warn!("❌ Finance: {}", entry.message);
            state.agent_dialogues.push(entry);
        }

        info!(
            "💰 Finance: {} approved, {} rejected for negotiation",
            approved.len(),
            rejected.len()
        );

        state.finance_feedback = format!(
            "Budget: ${budget:.2} | Spent: ${spend:.2} | Approved: {} | Rejected: {}",
            approved.len(),
            rejected.len()
        );
        state.finance_rejections = rejected;
        state.budget = budget;
        state.budget_remaining = budget_remaining;

        let mut decisions = approved;
        decisions.extend(passthrough);
        state.decisions = decisions;
    }

    /// Score one proposal: total cost, stockout-risk-weighted 30-day
    /// projected value, ROI.
    fn score(&self, proposal: &Proposal) -> FinanceMetrics {
        let qty = proposal.order_quantity;
        let unit_cost = self.unit_cost_of(proposal);
        let total_cost = qty as f64 * unit_cost;

        let daily_demand = proposal.details.daily_avg_demand;
        let lead_time = proposal.details.lead_time_days as f64;
        let current_stock = proposal.details.current_stock as f64;

        let days_until_stockout = if daily_demand > 0.0 {
            current_stock / daily_demand
        } else {
            999.0
        };

        let stockout_risk_factor = if days_until_stockout < lead_time {
            self.risk_high_multiplier
        } else if days_until_stockout < lead_time * 2.0 {
            self.risk_medium_multiplier
        } else {
            1.0
        };

        let margin = unit_cost * 0.5;
        let projected_value = margin * daily_demand * 30.0 * stockout_risk_factor;
        let roi = projected_value / total_cost.max(1.0);

        FinanceMetrics {
            total_cost,
            roi,
            stockout_risk_factor,
            days_until_stockout,
            projected_value,
        }
    }

    /// Unit cost lookup chain: cost analysis, then decision details,
    /// then a conservative default.
    fn unit_cost_of(&self, proposal: &Proposal) -> f64 {
        if proposal.cost_analysis.purchasing_cost_per_unit > 0.0 {
            proposal.cost_analysis.purchasing_cost_per_unit
        } else if proposal.details.unit_price > 0.0 {
            proposal.details.unit_price
        } else {
            10.0
        }
    }

    // ---- round >= 1 ----

    fn re_optimize_with_proposals(&self, state: &mut CycleState) {
        let budget = self.dynamic_budget(state.recent_sales_revenue);
        info!(
            "🔄 Finance: re-optimizing with {} proposals",
            state.negotiation_proposals.len()
        );

        // Candidates: quantity-reduced versions of the rejected items,
        // plus whatever round 0 already approved (they re-compete for
        // the same budget).
        let mut candidates: Vec<Proposal> = Vec::new();
        let mut heuristic_boosted: Vec<String> = Vec::new();

        let proposals = std::mem::take(&mut state.negotiation_proposals);
        for proposal in &proposals {
            let Some(original) = state
                .finance_rejections
                .iter()
                .find(|r| r.sku == proposal.sku)
            else {
                warn!("⚠️ Proposal for {} has no matching rejection. Skipping.", proposal.sku);
                continue;
            };

            let mut reduced = original.clone();
            reduced.order_quantity = proposal.new_quantity;
            reduced.negotiated = true;
            reduced.original_quantity = Some(proposal.original_quantity);

            let fm = reduced.finance_metrics.get_or_insert(FinanceMetrics {
                total_cost: 0.0,
                roi: 0.0,
                stockout_risk_factor: 1.0,
                days_until_stockout: proposal.days_until_stockout,
                projected_value: 0.0,
            });
            fm.total_cost = proposal.new_cost;

            // Projected value is demand-derived, not quantity-derived, so
            // it survives the reduction. A near-zero value means no
            // demand data; price it as critical safety stock instead.
            if fm.projected_value <= 1.0 {
                fm.projected_value = proposal.new_cost * self.critical_stock_roi_multiplier;
                heuristic_boosted.push(reduced.sku.clone());
                info!(
                    "Applied heuristic value for {}: ${:.2}",
                    reduced.sku, fm.projected_value
                );
            }
            fm.roi = fm.projected_value / proposal.new_cost.max(1.0);

            candidates.push(reduced);
        }

        let (round0_approved, passthrough): (Vec<Proposal>, Vec<Proposal>) = state
            .decisions
            .drain(..)
            .partition(|d| d.reorder_required);
        candidates.extend(round0_approved);

        if candidates.is_empty() {
            state.finance_feedback = "No proposals could be processed.".to_string();
            state.budget = budget;
            state.budget_remaining = budget;
            state.decisions = passthrough;
            return;
        }

        let items: Vec<KnapsackItem> = candidates
            .iter()
            .map(|p| {
                let fm = p.finance_metrics.as_ref().unwrap();
                KnapsackItem {
                    sku: p.sku.clone(),
                    cost: fm.total_cost,
                    value: fm.projected_value,
                }
            })
            .collect();

        info!(
            "🧮 Finance: re-running solver with {} candidates, budget ${budget:.2}",
            items.len()
        );
        let solution = solve_knapsack(&items, budget);

        let mut approved = Vec::new();
        let mut rejected = Vec::new();
        for (i, candidate) in candidates.into_iter().enumerate() {
            if solution.selected.contains(&i) {
                approved.push(candidate);
            } else {
                rejected.push(candidate);
            }
        }

        let spend = solution.total_cost;

        for proposal in &approved {
            if !proposal.negotiated {
                continue; // round-0 approval carried through; already acknowledged
            }
            let cost = proposal.finance_metrics.as_ref().unwrap().total_cost;
            let original_qty = proposal.original_quantity.unwrap_or(proposal.order_quantity);
            let entry = if heuristic_boosted.contains(&proposal.sku) {
                // Approved purely on the critical-stock argument
                let roi = proposal.finance_metrics.as_ref().unwrap().roi;
                self.dialogue
                    .override_approval(&proposal.sku, &proposal.product_name, roi, cost)
            } else {
                self.dialogue.accept_proposal(
                    &proposal.sku,
                    &proposal.product_name,
                    proposal.order_quantity,
                    original_qty,
                    cost,
                )
            };
            info!("✅ {}", entry.message);
            state.agent_dialogues.push(entry);
        }

        for proposal in &rejected {
            let cost = proposal
                .finance_metrics
                .as_ref()
                .map(|m| m.total_cost)
                .unwrap_or(0.0);
            let entry =
                self.dialogue
                    .reject_proposal(&proposal.sku, &proposal.product_name, cost);
            state.agent_dialogues.push(entry);
        }

        if approved.is_empty() {
            let shortfall: f64 = rejected
                .iter()
                .filter_map(|p| p.finance_metrics.as_ref())
                .map(|m| m.total_cost)
                .fold(f64::INFINITY, f64::min);
            state.finance_feedback = format!(
                "Re-optimized: Budget ${budget:.2} infeasible. Cheapest candidate ${shortfall:.2} still exceeds it; no orders placed."
            );
        } else {
            state.finance_feedback = format!(
                "Re-Optimized: Budget ${budget:.2} | Spent ${spend:.2} | Approved {} | Rejected {}",
                approved.len(),
                rejected.len()
            );
        }

        // Final rejections overwrite the round-0 list.
        state.finance_rejections = rejected;
        state.budget = budget;
        state.budget_remaining = budget - spend;

        let mut decisions = approved;
        decisions.extend(passthrough);
        state.decisions = decisions;
    }

    /// ANEX acceptance rule for a single counter-proposal: accept when
    /// the (possibly heuristically priced) stockout value clears the
    /// negotiated ROI threshold.
    pub fn evaluate_proposal(&self, proposal: &Proposal) -> (bool, f64) {
        let fm = match &proposal.finance_metrics {
            Some(fm) => fm,
            None => return (false, 0.0),
        };
        let mut stockout_value = fm.projected_value;
        if stockout_value <= 1.0 {
            stockout_value = fm.total_cost * self.critical_stock_roi_multiplier;
        }
        let roi = stockout_value / fm.total_cost.max(1.0);
        (
            stockout_value > fm.total_cost * self.negotiation_roi_threshold,
            roi,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::state::{CostAnalysis, DecisionDetails, NegotiationProposal, FipaMessage};
    use crate::models::Urgency;

    fn item(sku: &str, cost: f64, value: f64) -> KnapsackItem {
        KnapsackItem {
            sku: sku.to_string(),
            cost,
            value,
        }
    }

    #[test]
    fn knapsack_respects_budget() {
        let items = vec![
            item("A", 300.0, 500.0),
            item("B", 400.0, 700.0),
            item("C", 500.0, 600.0),
        ];
        let solution = solve_knapsack(&items, 700.0);
        assert!(solution.total_cost <= 700.0);
        // A + B = 700 cost, 1200 value is the optimum
        assert_eq!(solution.selected, vec![0, 1]);
        assert_eq!(solution.total_value, 1200.0);
    }

    #[test]
    fn knapsack_picks_max_value_not_max_count() {
        let items = vec![
            item("A", 100.0, 50.0),
            item("B", 100.0, 60.0),
            item("C", 200.0, 500.0),
        ];
        let solution = solve_knapsack(&items, 200.0);
        assert_eq!(solution.selected, vec![2]);
    }

    #[test]
    fn knapsack_breaks_ties_lexicographically() {
        // Two selections with identical value and cost: {ALPHA} and {BETA}
        let items = vec![item("BETA", 100.0, 400.0), item("ALPHA", 100.0, 400.0)];
        let solution = solve_knapsack(&items, 100.0);
        assert_eq!(solution.selected.len(), 1);
        assert_eq!(items[solution.selected[0]].sku, "ALPHA");

        // {A, C} ties {B}; ("A","C") < ("B",)
        let items = vec![
            item("B", 200.0, 800.0),
            item("A", 100.0, 500.0),
            item("C", 100.0, 300.0),
        ];
        let solution = solve_knapsack(&items, 200.0);
        let mut skus: Vec<&str> = solution.selected.iter().map(|&i| items[i].sku.as_str()).collect();
        skus.sort();
        assert_eq!(skus, vec!["A", "C"]);
    }

    #[test]
    fn knapsack_infeasible_selects_nothing() {
        let items = vec![item("A", 5000.0, 8000.0), item("B", 3000.0, 1500.0)];
        let solution = solve_knapsack(&items, 600.0);
        assert!(solution.selected.is_empty());
        assert_eq!(solution.total_cost, 0.0);
    }

    // ---- stage tests ----

    fn stage() -> FinanceStage {
        FinanceStage::new(600.0, 0.3, 10.0, 2.0, 1.5, 1.1, DialogueGenerator::templated())
    }

    fn proposal(sku: &str, qty: i64, unit_cost: f64, daily_demand: f64, stock: i64) -> Proposal {
        Proposal {
            sku: sku.to_string(),
            product_name: format!("{sku} product"),
            reorder_required: true,
            order_quantity: qty,
            urgency: Urgency::High,
            reason: String::new(),
            details: DecisionDetails {
                decision_type: "optimized".to_string(),
                current_stock: stock,
                daily_avg_demand: daily_demand,
                lead_time_days: 7,
                unit_price: unit_cost,
                ..Default::default()
            },
            cost_analysis: CostAnalysis {
                purchasing_cost_per_unit: unit_cost,
                ..Default::default()
            },
            finance_metrics: None,
            negotiated: false,
            original_quantity: None,
            requires_approval: false,
            approval_reason: None,
            utility_score: 0.0,
        }
    }

    #[test]
    fn round0_rejects_everything_over_budget() {
        // S3: budget 600, both proposals cost thousands
        let mut state = CycleState::new("c-fin", 1, 0.0, 3);
        state.decisions = vec![
            proposal("SKU-HIGH", 50, 100.0, 2.0, 5),
            proposal("SKU-LOW", 100, 30.0, 1.0, 10),
        ];

        stage().run(&mut state);

        assert!(state.decisions.is_empty());
        assert_eq!(state.finance_rejections.len(), 2);
        assert_eq!(state.budget, 600.0);
        assert_eq!(state.budget_remaining, 600.0);
        // One rejection dialogue per dropped item
        assert_eq!(state.agent_dialogues.len(), 2);
        assert!(state
            .agent_dialogues
            .iter()
            .all(|d| d.dialogue_type == "rejection" && d.fipa.performative == "REFUSE"));
    }

    #[test]
    fn round0_partial_approval() {
        // S4: budget 3500 -> SKU-LOW (3000) fits, SKU-HIGH (5000) does not
        let mut state = CycleState::new("c-fin", 1, 0.0, 3);
        state.recent_sales_revenue = (3500.0 - 600.0) / 0.3; // dynamic budget 3500
        state.decisions = vec![
            proposal("SKU-HIGH", 50, 100.0, 2.0, 5),
            proposal("SKU-LOW", 100, 30.0, 1.0, 10),
        ];

        stage().run(&mut state);

        assert_eq!(state.decisions.len(), 1);
        assert_eq!(state.decisions[0].sku, "SKU-LOW");
        assert_eq!(state.finance_rejections.len(), 1);
        assert_eq!(state.finance_rejections[0].sku, "SKU-HIGH");

        // Budget feasibility invariant
        let spend: f64 = state
            .decisions
            .iter()
            .filter_map(|d| d.finance_metrics.as_ref())
            .map(|m| m.total_cost)
            .sum();
        assert!(spend <= state.budget);
    }

    #[test]
    fn scoring_applies_stockout_risk_multiplier() {
        let stage = stage();
        // days_until_stockout = 5/2 = 2.5 < lead 7 -> 10x multiplier
        let p = proposal("SKU-HIGH", 50, 100.0, 2.0, 5);
        let metrics = stage.score(&p);
        assert_eq!(metrics.total_cost, 5000.0);
        assert_eq!(metrics.stockout_risk_factor, 10.0);
        // 0.5 * 100 * 2 * 30 * 10 = 30_000
        assert_eq!(metrics.projected_value, 30_000.0);

        // days = 10/1 = 10, between lead and 2*lead -> 2x
        let p = proposal("SKU-LOW", 100, 30.0, 1.0, 10);
        let metrics = stage.score(&p);
        assert_eq!(metrics.stockout_risk_factor, 2.0);
    }

    #[test]
    fn unit_cost_lookup_chain_falls_back() {
        let stage = stage();
        let mut p = proposal("SKU-X", 10, 0.0, 1.0, 5);
        p.cost_analysis.purchasing_cost_per_unit = 0.0;
        p.details.unit_price = 7.5;
        let metrics = stage.score(&p);
        assert_eq!(metrics.total_cost, 75.0);

        p.details.unit_price = 0.0;
        let metrics = stage.score(&p);
        assert_eq!(metrics.total_cost, 100.0); // default 10.0/unit
    }

    fn negotiation(sku: &str, original_qty: i64, new_qty: i64, new_cost: f64) -> NegotiationProposal {
        NegotiationProposal {
            sku: sku.to_string(),
            product_name: format!("{sku} product"),
            original_quantity: original_qty,
            new_quantity: new_qty,
            new_cost,
            reduction_factor: 0.6,
            days_until_stockout: 2.5,
            justification: String::new(),
            fipa: FipaMessage::new("PROPOSE", "Decision", "Finance", serde_json::json!({})),
        }
    }

    #[test]
    fn reoptimize_still_infeasible_ends_with_no_approvals() {
        // S3 round 1: reduced costs 3000 and 1200 vs budget 600
        let mut state = CycleState::new("c-fin", 1, 0.0, 3);
        let mut high = proposal("SKU-HIGH", 50, 100.0, 2.0, 5);
        let mut low = proposal("SKU-LOW", 100, 30.0, 1.0, 10);
        let s = stage();
        high.finance_metrics = Some(s.score(&high));
        low.finance_metrics = Some(s.score(&low));
        state.finance_rejections = vec![high, low];
        state.negotiation_proposals = vec![
            negotiation("SKU-HIGH", 50, 30, 3000.0),
            negotiation("SKU-LOW", 100, 40, 1200.0),
        ];
        state.negotiation_rounds = 1;

        s.run(&mut state);

        assert!(state.decisions.is_empty());
        assert_eq!(state.finance_rejections.len(), 2);
        assert!(state.finance_feedback.contains("infeasible"));
        // reject_proposal dialogue for each candidate
        assert_eq!(
            state
                .agent_dialogues
                .iter()
                .filter(|d| d.dialogue_type == "reject_proposal")
                .count(),
            2
        );
    }

    #[test]
    fn reoptimize_competes_reduced_item_with_round0_approval() {
        // S4 round 1: SKU-HIGH reduced to 3000 (value 30_000) competes
        // with approved SKU-LOW (3000, value 900) for budget 3500.
        let mut state = CycleState::new("c-fin", 1, 0.0, 3);
        state.recent_sales_revenue = (3500.0 - 600.0) / 0.3;
        let s = stage();

        let mut high = proposal("SKU-HIGH", 50, 100.0, 2.0, 5);
        high.finance_metrics = Some(s.score(&high));
        state.finance_rejections = vec![high];

        let mut low = proposal("SKU-LOW", 100, 30.0, 1.0, 10);
        low.finance_metrics = Some(s.score(&low));
        state.decisions = vec![low];

        state.negotiation_proposals = vec![negotiation("SKU-HIGH", 50, 30, 3000.0)];
        state.negotiation_rounds = 1;

        s.run(&mut state);

        // Max-value subset under 3500: the reduced SKU-HIGH
        assert_eq!(state.decisions.len(), 1);
        assert_eq!(state.decisions[0].sku, "SKU-HIGH");
        assert!(state.decisions[0].negotiated);
        assert_eq!(state.decisions[0].order_quantity, 30);
        assert_eq!(state.decisions[0].original_quantity, Some(50));
        assert_eq!(state.finance_rejections.len(), 1);
        assert_eq!(state.finance_rejections[0].sku, "SKU-LOW");

        // An accept dialogue for the negotiated win
        assert!(state
            .agent_dialogues
            .iter()
            .any(|d| d.dialogue_type == "accept_proposal" && d.sku == "SKU-HIGH"));
    }

    #[test]
    fn reoptimize_boosts_zero_value_candidates() {
        let mut state = CycleState::new("c-fin", 1, 0.0, 3);
        state.recent_sales_revenue = (3500.0 - 600.0) / 0.3;
        let s = stage();

        // No demand data: projected value scores to zero
        let mut dead = proposal("SKU-DEAD", 50, 20.0, 0.0, 2);
        dead.finance_metrics = Some(s.score(&dead));
        assert!(dead.finance_metrics.as_ref().unwrap().projected_value <= 1.0);
        state.finance_rejections = vec![dead];
        state.negotiation_proposals = vec![negotiation("SKU-DEAD", 50, 15, 300.0)];
        state.negotiation_rounds = 1;

        s.run(&mut state);

        assert_eq!(state.decisions.len(), 1);
        let fm = state.decisions[0].finance_metrics.as_ref().unwrap();
        assert_eq!(fm.projected_value, 450.0); // 300 * 1.5
        assert!((fm.roi - 1.5).abs() < 1e-9);
        // Critical-stock win is logged as an override approval
        assert!(state
            .agent_dialogues
            .iter()
            .any(|d| d.dialogue_type == "override_approval"));
    }

    #[test]
    fn evaluate_proposal_applies_roi_threshold() {
        let s = stage();
        let mut p = proposal("SKU-E", 10, 10.0, 5.0, 2);
        p.finance_metrics = Some(s.score(&p));
        let (approved, roi) = s.evaluate_proposal(&p);
        assert!(approved);
        assert!(roi > 1.1);

        // Projected value below the threshold fails
        p.finance_metrics.as_mut().unwrap().projected_value = 50.0;
        p.finance_metrics.as_mut().unwrap().total_cost = 100.0;
        let (approved, _) = s.evaluate_proposal(&p);
        assert!(!approved);
    }
}
