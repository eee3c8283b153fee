use std::collections::BTreeMap;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::approval::Decision;
use crate::domain::company::UserId;
use crate::domain::flow::{ApprovalRule, FlowValidationError, Level};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LevelOutcome {
    Satisfied,
    Rejected,
    Pending,
}

/// Tally behind a level outcome. Only votes from eligible approvers count.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelEvaluation {
    pub outcome: LevelOutcome,
    pub eligible: usize,
    pub approved: usize,
    pub rejected: usize,
    pub pending: usize,
    /// Approvals needed to satisfy the level under its rule.
    pub required: usize,
}

impl LevelEvaluation {
    /// Audit tag written to `rule_applied` once the level resolves.
    pub fn rule_tag(&self, rule: &ApprovalRule) -> Option<String> {
        let tag = match (rule, self.outcome) {
            (_, LevelOutcome::Pending) => return None,
            (ApprovalRule::All, LevelOutcome::Satisfied) => "ALL_APPROVED".to_owned(),
            (ApprovalRule::All, LevelOutcome::Rejected) => "ALL_REJECTED_BY_ANY".to_owned(),
            (ApprovalRule::Any, LevelOutcome::Satisfied) => "ANY_APPROVED".to_owned(),
            (ApprovalRule::Any, LevelOutcome::Rejected) => "ANY_ALL_REJECTED".to_owned(),
            (ApprovalRule::Percentage { threshold }, LevelOutcome::Satisfied) => {
                format!("PERCENTAGE_{}_REACHED", threshold.normalize())
            }
            (ApprovalRule::Percentage { threshold }, LevelOutcome::Rejected) => {
                format!("PERCENTAGE_{}_UNREACHABLE", threshold.normalize())
            }
            (ApprovalRule::Specific { .. }, LevelOutcome::Satisfied) => {
                "SPECIFIC_APPROVED".to_owned()
            }
            (ApprovalRule::Specific { .. }, LevelOutcome::Rejected) => {
                "SPECIFIC_REJECTED".to_owned()
            }
        };
        Some(tag)
    }
}

/// Approvals needed out of `eligible` for a percentage threshold, rounded up.
/// The product is taken before dividing so fractional thresholds stay exact.
pub fn required_approvals(threshold: Decimal, eligible: usize) -> usize {
    let exact = threshold * Decimal::from(eligible) / Decimal::ONE_HUNDRED;
    exact.ceil().to_usize().map_or(eligible, |required| required.min(eligible))
}

/// Decide whether a level is satisfied, rejected, or still pending given the
/// decisions recorded so far. The level is re-validated first so a malformed
/// flow never resolves by accident.
pub fn evaluate_level(
    level: &Level,
    decisions: &BTreeMap<UserId, Decision>,
) -> Result<LevelEvaluation, FlowValidationError> {
    level.validate()?;

    let eligible = level.eligible_approvers();
    let mut approved = 0;
    let mut rejected = 0;
    for approver in &eligible {
        match decisions.get(approver) {
            Some(Decision::Approve) => approved += 1,
            Some(Decision::Reject) => rejected += 1,
            None => {}
        }
    }
    let pending = eligible.len() - approved - rejected;

    let (outcome, required) = match &level.rule {
        ApprovalRule::All => {
            let outcome = if rejected > 0 {
                LevelOutcome::Rejected
            } else if approved == eligible.len() {
                LevelOutcome::Satisfied
            } else {
                LevelOutcome::Pending
            };
            (outcome, eligible.len())
        }
        ApprovalRule::Any => {
            let outcome = if approved > 0 {
                LevelOutcome::Satisfied
            } else if rejected == eligible.len() {
                LevelOutcome::Rejected
            } else {
                LevelOutcome::Pending
            };
            (outcome, 1)
        }
        ApprovalRule::Percentage { threshold } => {
            let required = required_approvals(*threshold, eligible.len());
            let outcome = if approved >= required {
                LevelOutcome::Satisfied
            } else if approved + pending < required {
                LevelOutcome::Rejected
            } else {
                LevelOutcome::Pending
            };
            (outcome, required)
        }
        ApprovalRule::Specific { approver } => {
            let outcome = match decisions.get(approver) {
                Some(Decision::Approve) => LevelOutcome::Satisfied,
                Some(Decision::Reject) => LevelOutcome::Rejected,
                None => LevelOutcome::Pending,
            };
            (outcome, 1)
        }
    };

    Ok(LevelEvaluation { outcome, eligible: eligible.len(), approved, rejected, pending, required })
}
