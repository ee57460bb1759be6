//! Negotiation stage: quantity-reduction counter-proposals
//!
//! Real supply chains do not argue a budget away; they shrink the order.
//! For each budget-rejected item that is genuinely critical (stock below
//! threshold), propose a reduced quantity sized by how close the stockout
//! is, and hand the proposals back to Finance for one re-optimization.

use crate::agent::dialogue::DialogueGenerator;
use crate::agent::events::{EventKind, EventSink};
use crate::agent::state::{CycleState, NegotiationProposal, Proposal};
use tracing::{debug, info};

const STAGE: &str = "NEGOTIATION";

pub struct NegotiationStage {
    dialogue: DialogueGenerator,
}

impl NegotiationStage {
    pub fn new(dialogue: DialogueGenerator) -> Self {
        Self { dialogue }
    }

    /// Urgency-banded reduction: the closer the stockout, the more of the
    /// original request survives.
    pub fn reduction_factor(days_until_stockout: f64) -> f64 {
        if days_until_stockout < 3.0 {
            0.6
        } else if days_until_stockout < 7.0 {
            0.5
        } else if days_until_stockout < 14.0 {
            0.4
        } else {
            0.3
        }
    }

    pub fn run(&self, state: &mut CycleState, sink: &EventSink) {
        if state.finance_rejections.is_empty() {
            info!("[{}] No rejections to negotiate", state.cycle_id);
            return;
        }

        info!(
            "💬 Negotiation: generating quantity reduction proposals for {} items",
            state.finance_rejections.len()
        );

        let mut proposals = Vec::new();
        for rejected in &state.finance_rejections {
            if let Some(proposal) = self.counter_proposal(state, rejected) {
                proposals.push(proposal);
            }
        }

        for proposal in &proposals {
            sink.emit_with(
                EventKind::AgentDialogue,
                STAGE,
                format!(
                    "PROPOSE: {} - Reduce quantity from {} to {} ({:.0}%). {}",
                    proposal.product_name,
                    proposal.original_quantity,
                    proposal.new_quantity,
                    proposal.reduction_factor * 100.0,
                    proposal.justification
                ),
                Some(serde_json::json!({
                    "agent": "Decision",
                    "target": "Finance",
                    "type": "PROPOSE",
                    "sku": proposal.sku,
                    "fipa": proposal.fipa,
                })),
            );
        }

        info!(
            "[{}] Generated {} quantity reduction proposals",
            state.cycle_id,
            proposals.len()
        );
        state.negotiation_proposals = proposals;
        state.negotiation_rounds += 1;
    }

    fn counter_proposal(
        &self,
        state: &CycleState,
        rejected: &Proposal,
    ) -> Option<NegotiationProposal> {
        let original_qty = rejected.order_quantity;
        let total_cost = rejected
            .finance_metrics
            .as_ref()
            .map(|m| m.total_cost)
            .unwrap_or(0.0);
        let unit_cost = total_cost / original_qty.max(1) as f64;

        let inventory = state.inventory_data.get(&rejected.sku);
        let current_stock = inventory
            .map(|i| i.quantity)
            .unwrap_or(rejected.details.current_stock);
        let threshold = inventory
            .map(|i| i.threshold)
            .unwrap_or(rejected.details.threshold);

        // Not critical enough to argue about
        if current_stock >= threshold {
            debug!(
                "Skipping {}: not critical (stock {} >= threshold {})",
                rejected.sku, current_stock, threshold
            );
            return None;
        }

        let daily_demand = rejected.details.daily_avg_demand;
        let days_until_stockout = current_stock as f64 / daily_demand.max(0.1);

        let reduction_factor = Self::reduction_factor(days_until_stockout);
        let mut new_qty = (original_qty as f64 * reduction_factor).floor() as i64;
        if new_qty < 10 {
            new_qty = ((original_qty as f64 * 0.3).floor() as i64).max(10);
        }
        let new_cost = new_qty as f64 * unit_cost;

        let (justification, fipa) = self.dialogue.propose_reduction(
            &rejected.sku,
            &rejected.product_name,
            original_qty,
            new_qty,
            new_cost,
            days_until_stockout,
            reduction_factor,
        );

        info!(
            "💬 Negotiation: propose {} qty reduction {} -> {} (${:.2})",
            rejected.sku, original_qty, new_qty, new_cost
        );

        Some(NegotiationProposal {
            sku: rejected.sku.clone(),
            product_name: rejected.product_name.clone(),
            original_quantity: original_qty,
            new_quantity: new_qty,
            new_cost,
            reduction_factor,
            days_until_stockout,
            justification,
            fipa,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::events::create_stream;
    use crate::agent::state::{CostAnalysis, DecisionDetails, FinanceMetrics};
    use crate::models::{InventoryRecord, Urgency};

    fn stage() -> NegotiationStage {
        NegotiationStage::new(DialogueGenerator::templated())
    }

    fn rejected(sku: &str, qty: i64, total_cost: f64, daily_demand: f64, stock: i64) -> Proposal {
        Proposal {
            sku: sku.to_string(),
            product_name: format!("{sku} product"),
            reorder_required: true,
            order_quantity: qty,
            urgency: Urgency::High,
            reason: String::new(),
            details: DecisionDetails {
                current_stock: stock,
                daily_avg_demand: daily_demand,
                lead_time_days: 7,
                ..Default::default()
            },
            cost_analysis: CostAnalysis::default(),
            finance_metrics: Some(FinanceMetrics {
                total_cost,
                roi: 1.0,
                stockout_risk_factor: 1.0,
                days_until_stockout: 0.0,
                projected_value: 0.0,
            }),
            negotiated: false,
            original_quantity: None,
            requires_approval: false,
            approval_reason: None,
            utility_score: 0.0,
        }
    }

    #[test]
    fn reduction_factor_bands() {
        assert_eq!(NegotiationStage::reduction_factor(2.5), 0.6);
        assert_eq!(NegotiationStage::reduction_factor(5.0), 0.5);
        assert_eq!(NegotiationStage::reduction_factor(10.0), 0.4);
        assert_eq!(NegotiationStage::reduction_factor(20.0), 0.3);
    }

    #[test]
    fn proposals_match_urgency_bands() {
        // S3: SKU-HIGH days = 5/2 = 2.5 -> 0.6 -> 30 @ 3000;
        //     SKU-LOW days = 10/1 = 10 -> 0.4 -> 40 @ 1200
        let mut state = CycleState::new("c-neg", 1, 0.0, 3);
        state.inventory_data.insert(
            "SKU-HIGH".to_string(),
            InventoryRecord::new("SKU-HIGH", "High", 5, 20),
        );
        state.inventory_data.insert(
            "SKU-LOW".to_string(),
            InventoryRecord::new("SKU-LOW", "Low", 10, 20),
        );
        state.finance_rejections = vec![
            rejected("SKU-HIGH", 50, 5000.0, 2.0, 5),
            rejected("SKU-LOW", 100, 3000.0, 1.0, 10),
        ];

        let sink = create_stream("c-neg-bands");
        stage().run(&mut state, &sink);

        assert_eq!(state.negotiation_rounds, 1);
        assert_eq!(state.negotiation_proposals.len(), 2);

        let high = &state.negotiation_proposals[0];
        assert_eq!(high.new_quantity, 30);
        assert_eq!(high.new_cost, 3000.0);
        assert_eq!(high.reduction_factor, 0.6);

        let low = &state.negotiation_proposals[1];
        assert_eq!(low.new_quantity, 40);
        assert_eq!(low.new_cost, 1200.0);
        assert_eq!(low.reduction_factor, 0.4);
    }

    #[test]
    fn non_critical_items_are_skipped() {
        let mut state = CycleState::new("c-neg", 1, 0.0, 3);
        state.inventory_data.insert(
            "SKU-OK".to_string(),
            InventoryRecord::new("SKU-OK", "Comfortable", 50, 20),
        );
        state.finance_rejections = vec![rejected("SKU-OK", 40, 400.0, 2.0, 50)];

        let sink = create_stream("c-neg-skip");
        stage().run(&mut state, &sink);

        assert!(state.negotiation_proposals.is_empty());
        assert_eq!(state.negotiation_rounds, 1);
    }

    #[test]
    fn minimum_quantity_floor_applies() {
        let mut state = CycleState::new("c-neg", 1, 0.0, 3);
        state.inventory_data.insert(
            "SKU-S".to_string(),
            InventoryRecord::new("SKU-S", "Small", 1, 20),
        );
        // 12 * 0.6 = 7.2 -> below 10 -> max(10, floor(12*0.3)=3) = 10
        state.finance_rejections = vec![rejected("SKU-S", 12, 120.0, 2.0, 1)];

        let sink = create_stream("c-neg-floor");
        stage().run(&mut state, &sink);

        assert_eq!(state.negotiation_proposals[0].new_quantity, 10);
        assert_eq!(state.negotiation_proposals[0].new_cost, 100.0);
    }

    #[test]
    fn empty_rejections_do_not_advance_round() {
        let mut state = CycleState::new("c-neg", 1, 0.0, 3);
        let sink = create_stream("c-neg-empty");
        stage().run(&mut state, &sink);
        assert_eq!(state.negotiation_rounds, 0);
    }
}
