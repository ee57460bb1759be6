//! Agent dialogue generation (ANEX protocol)
//!
//! Every Finance/Decision exchange is logged as a short human-readable
//! message inside a FIPA ACL envelope. An optional language-model port
//! phrases the message; the templated fallback is deterministic so tests
//! and offline runs behave identically.

use crate::agent::llm::DialoguePort;
use crate::agent::state::{DialogueEntry, FipaMessage};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const FINANCE_PERSONA: &str =
    "Chief Financial Officer. Conservative, budget-conscious, data-driven. Focuses on ROI.";
const DECISION_PERSONA: &str =
    "Supply Chain Manager. Analytical, urgency-aware. Prioritizes avoiding stockouts.";

pub struct DialogueGenerator {
    port: Option<Arc<dyn DialoguePort>>,
    timeout: Duration,
}

impl DialogueGenerator {
    pub fn new(port: Option<Arc<dyn DialoguePort>>, timeout: Duration) -> Self {
        Self { port, timeout }
    }

    /// Deterministic-only generator (tests, offline runs).
    pub fn templated() -> Self {
        Self {
            port: None,
            timeout: Duration::from_secs(0),
        }
    }

    fn phrase(&self, prompt: &str, fallback: String) -> String {
        match &self.port {
            Some(port) => port
                .compose(prompt, 100, self.timeout)
                .unwrap_or_else(|e| {
                    debug!("Dialogue port failed, using template: {e}");
                    fallback.clone()
                }),
            None => fallback,
        }
    }

    /// Finance refuses an order that did not make the budget cut.
    pub fn rejection(
        &self,
        sku: &str,
        product_name: &str,
        cost: f64,
        budget_remaining: f64,
        reason: &str,
    ) -> DialogueEntry {
        let fallback = format!("Rejecting {product_name} order (${cost:.2}). {reason}");
        let prompt = format!(
            "You are the {FINANCE_PERSONA}\nReject this purchase order in one brief sentence.\n\
             Product: {product_name} (SKU {sku}), cost ${cost:.2}, budget remaining ${budget_remaining:.2}.\nReason: {reason}"
        );
        let message = self.phrase(&prompt, fallback);

        let fipa = FipaMessage::new(
            "REFUSE",
            "Finance",
            "Decision",
            serde_json::json!({
                "reason": reason,
                "message": message,
                "sku": sku,
                "cost": cost,
            }),
        );

        DialogueEntry {
            agent: "Finance".to_string(),
            target: "Decision".to_string(),
            message,
            dialogue_type: "rejection".to_string(),
            sku: sku.to_string(),
            fipa,
        }
    }

    /// Decision proposes a quantity reduction for a rejected order.
    pub fn propose_reduction(
        &self,
        sku: &str,
        product_name: &str,
        original_qty: i64,
        new_qty: i64,
        new_cost: f64,
        days_until_stockout: f64,
        reduction_factor: f64,
    ) -> (String, FipaMessage) {
        let fallback = format!(
            "Critical stock shortage. Reduced to {:.0}% quantity to fit budget.",
            reduction_factor * 100.0
        );
        let urgency = if days_until_stockout < 7.0 { "CRITICAL" } else { "MODERATE" };
        let prompt = format!(
            "You are the {DECISION_PERSONA}\nJustify this counter-proposal in two short sentences.\n\
             Product: {product_name} (SKU {sku}). Original request {original_qty} units; \
             proposing {new_qty} units at ${new_cost:.2}. Stockout in {days_until_stockout:.1} days ({urgency})."
        );
        let justification = self.phrase(&prompt, fallback);

        let fipa = FipaMessage::new(
            "PROPOSE",
            "Decision",
            "Finance",
            serde_json::json!({
                "proposal": "Quantity Reduction",
                "sku": sku,
                "original_quantity": original_qty,
                "proposed_quantity": new_qty,
                "justification": justification,
            }),
        );

        (justification, fipa)
    }

    /// Finance accepts a negotiated counter-proposal.
    pub fn accept_proposal(
        &self,
        sku: &str,
        product_name: &str,
        new_qty: i64,
        original_qty: i64,
        cost: f64,
    ) -> DialogueEntry {
        let pct = if original_qty > 0 {
            new_qty as f64 / original_qty as f64 * 100.0
        } else {
            100.0
        };
        let message = format!(
            "ACCEPT-PROPOSAL: {product_name} approved with reduced quantity \
             ({new_qty} units, {pct:.0}% of original). Cost: ${cost:.2}"
        );

        let fipa = FipaMessage::new(
            "ACCEPT-PROPOSAL",
            "Finance",
            "Decision",
            serde_json::json!({
                "sku": sku,
                "approved_quantity": new_qty,
                "cost": cost,
            }),
        );

        DialogueEntry {
            agent: "Finance".to_string(),
            target: "Decision".to_string(),
            message,
            dialogue_type: "accept_proposal".to_string(),
            sku: sku.to_string(),
            fipa,
        }
    }

    /// Finance rejects a counter-proposal after re-optimization.
    pub fn reject_proposal(&self, sku: &str, product_name: &str, cost: f64) -> DialogueEntry {
        let message = format!(
            "REJECT-PROPOSAL: {product_name} - Budget exhausted after optimizing approvals"
        );

        let fipa = FipaMessage::new(
            "REJECT-PROPOSAL",
            "Finance",
            "Decision",
            serde_json::json!({
                "sku": sku,
                "cost": cost,
            }),
        );

        DialogueEntry {
            agent: "Finance".to_string(),
            target: "Decision".to_string(),
            message,
            dialogue_type: "reject_proposal".to_string(),
            sku: sku.to_string(),
            fipa,
        }
    }

    /// Finance approves an item it initially rejected (negotiation win).
    pub fn override_approval(
        &self,
        sku: &str,
        product_name: &str,
        roi: f64,
        cost: f64,
    ) -> DialogueEntry {
        let fallback = format!(
            "Approving {product_name} order (${cost:.2}). Counter-argument accepted (ROI {roi:.1}x)."
        );
        let prompt = format!(
            "You are the {FINANCE_PERSONA}\nYou initially rejected {product_name} (${cost:.2}) \
             but after the counter-argument (ROI {roi:.1}x) you agree. Confirm in one sentence."
        );
        let message = self.phrase(&prompt, fallback);

        let fipa = FipaMessage::new(
            "AGREE",
            "Finance",
            "Decision",
            serde_json::json!({
                "response": "Override Approved",
                "message": message,
                "sku": sku,
                "cost": cost,
            }),
        );

        DialogueEntry {
            agent: "Finance".to_string(),
            target: "Decision".to_string(),
            message,
            dialogue_type: "override_approval".to_string(),
            sku: sku.to_string(),
            fipa,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn templated_rejection_is_deterministic() {
        let generator = DialogueGenerator::templated();
        let a = generator.rejection("SKU-A", "Widget", 500.0, 100.0, "Budget exceeded");
        let b = generator.rejection("SKU-A", "Widget", 500.0, 100.0, "Budget exceeded");
        assert_eq!(a.message, b.message);
        assert_eq!(a.fipa.performative, "REFUSE");
        assert_eq!(a.fipa.sender, "Finance");
        assert_eq!(a.fipa.receiver, "Decision");
        assert_eq!(a.dialogue_type, "rejection");
    }

    #[test]
    fn propose_reduction_carries_fipa_envelope() {
        let generator = DialogueGenerator::templated();
        let (justification, fipa) =
            generator.propose_reduction("SKU-H", "Gadget", 50, 30, 3000.0, 2.5, 0.6);
        assert!(justification.contains("60%"));
        assert_eq!(fipa.performative, "PROPOSE");
        assert_eq!(fipa.sender, "Decision");
        assert_eq!(fipa.content["proposed_quantity"], 30);
        assert_eq!(fipa.protocol, "ANEX-Negotiation");
    }

    #[test]
    fn accept_proposal_reports_reduction_percentage() {
        let generator = DialogueGenerator::templated();
        let entry = generator.accept_proposal("SKU-H", "Gadget", 30, 50, 3000.0);
        assert!(entry.message.contains("60%"));
        assert_eq!(entry.fipa.performative, "ACCEPT-PROPOSAL");
    }
}
