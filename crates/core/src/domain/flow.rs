use std::collections::HashSet;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::company::{CompanyId, UserId};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlowId(pub String);

impl FlowId {
    pub fn generate() -> Self {
        Self(format!("FLOW-{}", Uuid::new_v4()))
    }
}

/// Satisfaction rule for one approval level.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ApprovalRule {
    All,
    Any,
    /// Percentage of eligible approvers, in `(0, 100]`. Fractions such as
    /// `62.5` are allowed.
    Percentage {
        threshold: Decimal,
    },
    Specific {
        approver: UserId,
    },
}

impl ApprovalRule {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Any => "any",
            Self::Percentage { .. } => "percentage",
            Self::Specific { .. } => "specific",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Level {
    pub level_number: u32,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub approvers: Vec<UserId>,
    pub rule: ApprovalRule,
}

impl Level {
    /// Approvers allowed to act at this level. A `Specific` rule's designated
    /// approver is always eligible, even when omitted from `approvers`.
    pub fn eligible_approvers(&self) -> Vec<UserId> {
        let mut eligible = self.approvers.clone();
        if let ApprovalRule::Specific { approver } = &self.rule {
            if !eligible.contains(approver) {
                eligible.push(approver.clone());
            }
        }
        eligible
    }

    pub fn is_eligible(&self, user: &UserId) -> bool {
        self.approvers.contains(user)
            || matches!(&self.rule, ApprovalRule::Specific { approver } if approver == user)
    }

    pub fn role_label(&self) -> String {
        let role = self.role.trim();
        if role.is_empty() {
            format!("Level {}", self.level_number)
        } else {
            role.to_owned()
        }
    }

    pub fn validate(&self) -> Result<(), FlowValidationError> {
        let mut seen = HashSet::new();
        for approver in &self.approvers {
            if approver.0.trim().is_empty() {
                return Err(FlowValidationError::BlankApprover { level: self.level_number });
            }
            if !seen.insert(approver) {
                return Err(FlowValidationError::DuplicateApprover {
                    level: self.level_number,
                    approver: approver.clone(),
                });
            }
        }

        match &self.rule {
            ApprovalRule::All | ApprovalRule::Any => {
                if self.approvers.is_empty() {
                    return Err(FlowValidationError::NoApprovers {
                        level: self.level_number,
                        rule: self.rule.as_str(),
                    });
                }
            }
            ApprovalRule::Percentage { threshold } => {
                if self.approvers.is_empty() {
                    return Err(FlowValidationError::NoApprovers {
                        level: self.level_number,
                        rule: self.rule.as_str(),
                    });
                }
                if *threshold <= Decimal::ZERO || *threshold > Decimal::ONE_HUNDRED {
                    return Err(FlowValidationError::InvalidThreshold {
                        level: self.level_number,
                        threshold: *threshold,
                    });
                }
            }
            ApprovalRule::Specific { approver } => {
                if approver.0.trim().is_empty() {
                    return Err(FlowValidationError::MissingSpecificApprover {
                        level: self.level_number,
                    });
                }
            }
        }

        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum FlowValidationError {
    #[error("approval flow name must not be blank")]
    BlankName,
    #[error("approval flow must define at least one level")]
    NoLevels,
    #[error("approval levels must be numbered 1..n without gaps: expected {expected}, found {found}")]
    LevelOutOfSequence { expected: u32, found: u32 },
    #[error("level {level} uses rule `{rule}` but has no approvers")]
    NoApprovers { level: u32, rule: &'static str },
    #[error("level {level} percentage threshold {threshold} must be in (0, 100]")]
    InvalidThreshold { level: u32, threshold: Decimal },
    #[error("level {level} uses rule `specific` without a designated approver")]
    MissingSpecificApprover { level: u32 },
    #[error("level {level} lists approver `{approver}` more than once")]
    DuplicateApprover { level: u32, approver: UserId },
    #[error("level {level} contains a blank approver reference")]
    BlankApprover { level: u32 },
}

/// Company-scoped, ordered template of approval levels.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalFlow {
    pub id: FlowId,
    pub company_id: CompanyId,
    pub name: String,
    pub description: Option<String>,
    pub levels: Vec<Level>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ApprovalFlow {
    pub fn level(&self, level_number: u32) -> Option<&Level> {
        self.levels.iter().find(|level| level.level_number == level_number)
    }

    pub fn first_level(&self) -> Option<&Level> {
        self.level(1)
    }

    pub fn next_level(&self, current_level_number: u32) -> Option<&Level> {
        self.level(current_level_number + 1)
    }

    pub fn validate(&self) -> Result<(), FlowValidationError> {
        if self.name.trim().is_empty() {
            return Err(FlowValidationError::BlankName);
        }
        if self.levels.is_empty() {
            return Err(FlowValidationError::NoLevels);
        }

        for (index, level) in self.levels.iter().enumerate() {
            let expected = index as u32 + 1;
            if level.level_number != expected {
                return Err(FlowValidationError::LevelOutOfSequence {
                    expected,
                    found: level.level_number,
                });
            }
            level.validate()?;
        }

        Ok(())
    }
}

/// Flow definition as authored by an administrator, before it is bound to a
/// company and stored.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowDraft {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub levels: Vec<Level>,
}

impl FlowDraft {
    pub fn into_flow(self, company_id: CompanyId) -> Result<ApprovalFlow, FlowValidationError> {
        let now = Utc::now();
        let mut levels = self.levels;
        levels.sort_by_key(|level| level.level_number);

        let flow = ApprovalFlow {
            id: FlowId::generate(),
            company_id,
            name: self.name.trim().to_owned(),
            description: self.description,
            levels,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        flow.validate()?;
        Ok(flow)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use super::{ApprovalFlow, ApprovalRule, FlowDraft, FlowId, FlowValidationError, Level};
    use crate::domain::company::{CompanyId, UserId};

    fn level(level_number: u32, approvers: &[&str], rule: ApprovalRule) -> Level {
        Level {
            level_number,
            role: String::new(),
            approvers: approvers.iter().map(|id| UserId::new(*id)).collect(),
            rule,
        }
    }

    fn flow(levels: Vec<Level>) -> ApprovalFlow {
        ApprovalFlow {
            id: FlowId("FLOW-1".to_owned()),
            company_id: CompanyId::new("acme"),
            name: "Standard".to_owned(),
            description: None,
            levels,
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn valid_two_level_flow_passes_and_exposes_next_level() {
        let flow = flow(vec![
            level(1, &["mgr"], ApprovalRule::All),
            level(2, &["cfo"], ApprovalRule::Specific { approver: UserId::new("cfo") }),
        ]);

        flow.validate().expect("flow should be valid");
        assert_eq!(flow.next_level(1).map(|level| level.level_number), Some(2));
        assert!(flow.next_level(2).is_none());
    }

    #[test]
    fn gaps_in_level_numbers_are_rejected() {
        let flow = flow(vec![
            level(1, &["mgr"], ApprovalRule::All),
            level(3, &["cfo"], ApprovalRule::Any),
        ]);

        assert_eq!(
            flow.validate(),
            Err(FlowValidationError::LevelOutOfSequence { expected: 2, found: 3 })
        );
    }

    #[test]
    fn empty_flow_is_rejected() {
        assert_eq!(flow(Vec::new()).validate(), Err(FlowValidationError::NoLevels));
    }

    #[test]
    fn any_level_without_approvers_is_malformed() {
        let flow = flow(vec![level(1, &[], ApprovalRule::Any)]);
        assert!(matches!(flow.validate(), Err(FlowValidationError::NoApprovers { level: 1, .. })));
    }

    #[test]
    fn percentage_threshold_must_be_in_range() {
        let percentage = |threshold: Decimal| {
            flow(vec![level(1, &["a", "b"], ApprovalRule::Percentage { threshold })])
        };

        for threshold in [Decimal::ZERO, Decimal::new(-5, 0), Decimal::new(1001, 1)] {
            assert!(matches!(
                percentage(threshold).validate(),
                Err(FlowValidationError::InvalidThreshold { .. })
            ));
        }
        percentage(Decimal::new(1, 1)).validate().expect("0.1% is a valid threshold");
        percentage(Decimal::ONE_HUNDRED).validate().expect("100% is a valid threshold");
    }

    #[test]
    fn fractional_threshold_parses_from_toml() {
        let draft: FlowDraft = toml::from_str(
            r#"
name = "Board sign-off"

[[levels]]
level_number = 1
role = "Board"
approvers = ["b-1", "b-2", "b-3", "b-4", "b-5", "b-6", "b-7", "b-8"]
rule = { kind = "percentage", threshold = 62.5 }
"#,
        )
        .expect("draft should parse");

        let flow = draft.into_flow(CompanyId::new("acme")).expect("draft should be valid");
        assert_eq!(flow.levels[0].rule, ApprovalRule::Percentage { threshold: Decimal::new(625, 1) });
    }

    #[test]
    fn specific_level_may_omit_approver_list() {
        let level = level(1, &[], ApprovalRule::Specific { approver: UserId::new("cfo") });

        level.validate().expect("specific approver alone is enough");
        assert_eq!(level.eligible_approvers(), vec![UserId::new("cfo")]);
        assert!(level.is_eligible(&UserId::new("cfo")));
    }

    #[test]
    fn specific_level_without_designated_approver_is_malformed() {
        let level = level(1, &["a"], ApprovalRule::Specific { approver: UserId::new(" ") });
        assert_eq!(level.validate(), Err(FlowValidationError::MissingSpecificApprover { level: 1 }));
    }

    #[test]
    fn duplicate_approvers_are_rejected() {
        let level = level(1, &["a", "a"], ApprovalRule::All);
        assert!(matches!(level.validate(), Err(FlowValidationError::DuplicateApprover { .. })));
    }

    #[test]
    fn blank_role_falls_back_to_level_label() {
        let mut level = level(2, &["a"], ApprovalRule::All);
        assert_eq!(level.role_label(), "Level 2");
        level.role = " Finance ".to_owned();
        assert_eq!(level.role_label(), "Finance");
    }

    #[test]
    fn draft_parses_from_toml_and_sorts_levels() {
        let draft: FlowDraft = toml::from_str(
            r#"
name = "Travel approvals"

[[levels]]
level_number = 2
role = "Finance"
approvers = ["fin-1", "fin-2", "fin-3"]
rule = { kind = "percentage", threshold = 60 }

[[levels]]
level_number = 1
role = "Manager"
approvers = ["mgr-1"]
rule = { kind = "all" }
"#,
        )
        .expect("draft should parse");

        let flow = draft.into_flow(CompanyId::new("acme")).expect("draft should be valid");
        assert_eq!(flow.levels[0].role, "Manager");
        assert_eq!(flow.levels[1].rule, ApprovalRule::Percentage { threshold: Decimal::from(60) });
        assert!(flow.is_active);
    }
}
