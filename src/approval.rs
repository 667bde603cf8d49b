//! Approval requests built from engine interrupts

use crate::error::{Result, StreamError};
use crate::types::{ActionRequest, Decision, DecisionType, InterruptPayload};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// An action request enriched with the decisions a human may take
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalItem {
    /// Action (tool) name
    pub name: String,

    /// Action arguments
    pub args: serde_json::Value,

    /// Optional human-readable description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Decisions the human may choose from
    pub allowed_decisions: Vec<DecisionType>,
}

impl ApprovalItem {
    fn new(request: &ActionRequest, allowed_decisions: Vec<DecisionType>) -> Self {
        Self {
            name: request.name.clone(),
            args: request.args.clone(),
            description: request.description.clone(),
            allowed_decisions,
        }
    }
}

/// Flatten interrupt payloads into approval items
///
/// Review configs from all payloads are pooled by action name (a later
/// config for the same name replaces an earlier one). Actions without a
/// config get approve/reject.
pub fn build_approval_items(payloads: &[InterruptPayload]) -> Vec<ApprovalItem> {
    let configs: HashMap<&str, &[DecisionType]> = payloads
        .iter()
        .flat_map(|p| p.review_configs.iter())
        .map(|c| (c.action_name.as_str(), c.allowed_decisions.as_slice()))
        .collect();

    payloads
        .iter()
        .flat_map(|p| p.action_requests.iter())
        .map(|request| {
            let allowed = configs
                .get(request.name.as_str())
                .map(|d| d.to_vec())
                .unwrap_or_else(DecisionType::default_allowed);
            ApprovalItem::new(request, allowed)
        })
        .collect()
}

/// Check decisions against the approval items they answer
///
/// Decisions pair with items by position. A decision that names an action
/// must name the item's action. The streaming pipeline never calls this;
/// it exists for callers that want to refuse bad input before resuming.
pub fn check_decisions(items: &[ApprovalItem], decisions: &[Decision]) -> Result<()> {
    if items.len() != decisions.len() {
        return Err(StreamError::InvalidDecision {
            action: "*".to_string(),
            reason: format!(
                "expected {} decisions, got {}",
                items.len(),
                decisions.len()
            ),
        });
    }

    for (item, decision) in items.iter().zip(decisions) {
        if let Some(action) = &decision.action {
            if action != &item.name {
                return Err(StreamError::InvalidDecision {
                    action: action.clone(),
                    reason: format!("expected a decision for '{}'", item.name),
                });
            }
        }

        let chosen = decision.decision_type();
        if !item.allowed_decisions.contains(&chosen) {
            return Err(StreamError::InvalidDecision {
                action: item.name.clone(),
                reason: format!("'{}' is not an allowed decision", chosen),
            });
        }
    }

    Ok(())
}
