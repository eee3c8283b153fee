use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::approvals::projector::{LevelResolution, StatusProjector};
use crate::approvals::rules::{evaluate_level, LevelEvaluation, LevelOutcome};
use crate::approvals::ApprovalError;
use crate::config::ApprovalsConfig;
use crate::domain::approval::{ApprovalRequest, ApprovalStatus, Decision};
use crate::domain::company::UserId;
use crate::domain::expense::{Expense, ExpenseId, ExpenseStatus, LevelAction};
use crate::domain::flow::ApprovalFlow;

/// Position of an expense in its approval lifecycle. Forward-only:
/// `NotSubmitted -> AwaitingLevel(1) -> ... -> Approved | Rejected`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApprovalState {
    NotSubmitted,
    AwaitingLevel(u32),
    Approved,
    Rejected,
}

impl ApprovalState {
    pub fn of(expense: &Expense) -> Result<Self, ApprovalError> {
        match expense.status {
            ExpenseStatus::Draft | ExpenseStatus::Submitted => Ok(Self::NotSubmitted),
            ExpenseStatus::PendingApproval => match expense.current_level {
                Some(level) => Ok(Self::AwaitingLevel(level)),
                None => Err(ApprovalError::InvalidExpense(format!(
                    "expense `{}` is pending approval without a current level",
                    expense.id.0
                ))),
            },
            ExpenseStatus::Approved => Ok(Self::Approved),
            ExpenseStatus::Rejected => Ok(Self::Rejected),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Approved | Self::Rejected)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DecisionPolicy {
    pub require_comment_on_reject: bool,
}

impl From<&ApprovalsConfig> for DecisionPolicy {
    fn from(config: &ApprovalsConfig) -> Self {
        Self { require_comment_on_reject: config.require_comment_on_reject }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionCommand {
    pub expense_id: ExpenseId,
    pub approver: UserId,
    pub decision: Decision,
    #[serde(default)]
    pub comments: String,
    /// Level the approver believes is current; `None` targets whichever level
    /// is active.
    #[serde(default)]
    pub level: Option<u32>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubmissionOutcome {
    pub expense: Expense,
    pub rows: Vec<ApprovalRequest>,
    /// Visible statuses the expense passed through, oldest first.
    pub statuses: Vec<ExpenseStatus>,
    pub state: ApprovalState,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecisionOutcome {
    pub expense: Expense,
    pub changed_rows: Vec<ApprovalRequest>,
    pub from: ApprovalState,
    pub to: ApprovalState,
    pub evaluation: LevelEvaluation,
    pub resolution: Option<LevelResolution>,
}

/// Pure approval state machine. Callers load the expense, its flow and its
/// rows, apply one transition, and persist the result as a single unit.
#[derive(Clone, Debug, Default)]
pub struct ApprovalSequencer {
    policy: DecisionPolicy,
    projector: StatusProjector,
}

impl ApprovalSequencer {
    pub fn new(policy: DecisionPolicy) -> Self {
        Self { policy, projector: StatusProjector }
    }

    pub fn policy(&self) -> &DecisionPolicy {
        &self.policy
    }

    pub fn submit(
        &self,
        mut expense: Expense,
        flow: &ApprovalFlow,
        now: DateTime<Utc>,
    ) -> Result<SubmissionOutcome, ApprovalError> {
        match expense.status {
            ExpenseStatus::Approved | ExpenseStatus::Rejected => {
                return Err(ApprovalError::AlreadyFinalized {
                    expense_id: expense.id.clone(),
                    status: expense.status,
                });
            }
            ExpenseStatus::PendingApproval => {
                return Err(ApprovalError::AlreadySubmitted { expense_id: expense.id.clone() });
            }
            ExpenseStatus::Draft | ExpenseStatus::Submitted => {}
        }

        if flow.company_id != expense.company_id {
            return Err(ApprovalError::InvalidExpense(format!(
                "flow `{}` belongs to company `{}`, expense `{}` to `{}`",
                flow.id.0, flow.company_id, expense.id.0, expense.company_id
            )));
        }
        flow.validate()?;

        let mut statuses = vec![expense.status];
        if expense.status == ExpenseStatus::Draft {
            expense.submit().map_err(|error| ApprovalError::InvalidExpense(error.to_string()))?;
            statuses.push(expense.status);
        }

        let rows = flow
            .levels
            .iter()
            .flat_map(|level| {
                let role = level.role_label();
                let expense_id = expense.id.clone();
                let company_id = expense.company_id.clone();
                level.eligible_approvers().into_iter().map(move |approver| {
                    ApprovalRequest::pending(
                        expense_id.clone(),
                        company_id.clone(),
                        approver,
                        role.clone(),
                        level.level_number,
                        level.level_number == 1,
                        now,
                    )
                })
            })
            .collect::<Vec<_>>();

        let state = ApprovalState::AwaitingLevel(1);
        expense.flow_id = Some(flow.id.clone());
        expense.submitted_at = Some(now);
        self.projector.project(&mut expense, flow, &state, None, now);
        statuses.push(expense.status);

        Ok(SubmissionOutcome { expense, rows, statuses, state })
    }

    pub fn record_decision(
        &self,
        mut expense: Expense,
        flow: &ApprovalFlow,
        mut rows: Vec<ApprovalRequest>,
        command: &DecisionCommand,
        now: DateTime<Utc>,
    ) -> Result<DecisionOutcome, ApprovalError> {
        let from = ApprovalState::of(&expense)?;
        let current = match from {
            ApprovalState::Approved | ApprovalState::Rejected => {
                return Err(ApprovalError::AlreadyFinalized {
                    expense_id: expense.id.clone(),
                    status: expense.status,
                });
            }
            ApprovalState::NotSubmitted => {
                return Err(ApprovalError::NotSubmitted {
                    expense_id: expense.id.clone(),
                    status: expense.status,
                });
            }
            ApprovalState::AwaitingLevel(level) => level,
        };

        if let Some(requested) = command.level {
            if requested != current {
                return Err(ApprovalError::InvalidLevel {
                    expense_id: expense.id.clone(),
                    current,
                    requested,
                });
            }
        }

        let level = flow.level(current).ok_or_else(|| {
            ApprovalError::InvalidExpense(format!(
                "flow `{}` has no level {current} for expense `{}`",
                flow.id.0, expense.id.0
            ))
        })?;

        if !level.is_eligible(&command.approver) {
            return Err(ApprovalError::NotEligibleApprover {
                expense_id: expense.id.clone(),
                level: current,
                approver: command.approver.clone(),
            });
        }

        let original = rows.clone();
        let row = rows
            .iter_mut()
            .find(|row| row.level_number == current && row.approver == command.approver)
            .ok_or_else(|| {
                ApprovalError::InvalidExpense(format!(
                    "expense `{}` has no approval row for `{}` at level {current}",
                    expense.id.0, command.approver
                ))
            })?;

        if row.status != ApprovalStatus::Pending {
            return Err(ApprovalError::DuplicateAction {
                expense_id: expense.id.clone(),
                level: current,
                approver: command.approver.clone(),
            });
        }

        let comments = command.comments.trim();
        if command.decision == Decision::Reject
            && self.policy.require_comment_on_reject
            && comments.is_empty()
        {
            return Err(ApprovalError::CommentRequired);
        }

        row.record(command.decision, comments, now);

        let decisions = rows
            .iter()
            .filter(|row| row.level_number == current)
            .filter_map(|row| match row.status {
                ApprovalStatus::Approved => Some((row.approver.clone(), Decision::Approve)),
                ApprovalStatus::Rejected => Some((row.approver.clone(), Decision::Reject)),
                ApprovalStatus::Pending | ApprovalStatus::Skipped => None,
            })
            .collect::<BTreeMap<_, _>>();

        let evaluation = evaluate_level(level, &decisions)?;
        let rule_applied = evaluation.rule_tag(&level.rule);

        let to = match evaluation.outcome {
            LevelOutcome::Pending => ApprovalState::AwaitingLevel(current),
            LevelOutcome::Rejected => {
                for row in rows.iter_mut().filter(|row| row.level_number >= current) {
                    close_row(row, rule_applied.as_deref(), current, now);
                }
                ApprovalState::Rejected
            }
            LevelOutcome::Satisfied => {
                for row in rows.iter_mut().filter(|row| row.level_number == current) {
                    close_row(row, rule_applied.as_deref(), current, now);
                }
                match flow.next_level(current) {
                    Some(next) => {
                        for row in rows.iter_mut().filter(|row| row.level_number == next.level_number)
                        {
                            row.is_active = true;
                            row.updated_at = now;
                        }
                        ApprovalState::AwaitingLevel(next.level_number)
                    }
                    None => ApprovalState::Approved,
                }
            }
        };

        let resolution = match evaluation.outcome {
            LevelOutcome::Pending => None,
            LevelOutcome::Satisfied | LevelOutcome::Rejected => Some(LevelResolution {
                level_number: current,
                role: level.role_label(),
                action: if evaluation.outcome == LevelOutcome::Satisfied {
                    LevelAction::Approved
                } else {
                    LevelAction::Rejected
                },
                decided_by: command.approver.clone(),
                comments: comments.to_owned(),
                rule_applied,
            }),
        };

        self.projector.project(&mut expense, flow, &to, resolution.as_ref(), now);

        let before = original.iter().map(|row| (&row.id, row)).collect::<HashMap<_, _>>();
        let changed_rows = rows
            .iter()
            .filter(|row| before.get(&row.id).map_or(true, |previous| *previous != *row))
            .cloned()
            .collect::<Vec<_>>();

        Ok(DecisionOutcome { expense, changed_rows, from, to, evaluation, resolution })
    }
}

/// Closes a row of a resolved level. Rows of the resolved level get the rule
/// tag; undecided rows are skipped.
fn close_row(
    row: &mut ApprovalRequest,
    rule_applied: Option<&str>,
    resolved_level: u32,
    now: DateTime<Utc>,
) {
    if row.status == ApprovalStatus::Pending {
        row.skip(now);
    }
    if row.level_number == resolved_level {
        row.rule_applied = rule_applied.map(str::to_owned);
        row.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, Utc};
    use rust_decimal::Decimal;

    use super::{ApprovalSequencer, ApprovalState, DecisionCommand, DecisionPolicy};
    use crate::approvals::rules::LevelOutcome;
    use crate::approvals::ApprovalError;
    use crate::domain::approval::{ApprovalRequest, ApprovalStatus, Decision};
    use crate::domain::company::{CompanyId, UserId};
    use crate::domain::expense::{Expense, ExpenseCategory, ExpenseStatus, LevelAction};
    use crate::domain::flow::{ApprovalFlow, ApprovalRule, FlowId, Level};

    fn level(level_number: u32, role: &str, approvers: &[&str], rule: ApprovalRule) -> Level {
        Level {
            level_number,
            role: role.to_owned(),
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

    fn expense() -> Expense {
        Expense::draft(
            CompanyId::new("acme"),
            UserId::new("emp"),
            Decimal::new(31_000, 2),
            "USD",
            ExpenseCategory::Accommodation,
            "Hotel, two nights",
            NaiveDate::from_ymd_opt(2026, 4, 9).expect("valid date"),
        )
        .expect("valid draft")
    }

    fn vote(approver: &str, decision: Decision) -> DecisionCommand {
        DecisionCommand {
            expense_id: expense().id,
            approver: UserId::new(approver),
            decision,
            comments: String::new(),
            level: None,
        }
    }

    struct Run {
        sequencer: ApprovalSequencer,
        flow: ApprovalFlow,
        expense: Expense,
        rows: Vec<ApprovalRequest>,
    }

    impl Run {
        fn start(flow: ApprovalFlow) -> Self {
            let sequencer = ApprovalSequencer::default();
            let submitted = sequencer.submit(expense(), &flow, Utc::now()).expect("submit");
            Self { sequencer, flow, expense: submitted.expense, rows: submitted.rows }
        }

        fn act(&mut self, command: DecisionCommand) -> Result<super::DecisionOutcome, ApprovalError> {
            let outcome = self.sequencer.record_decision(
                self.expense.clone(),
                &self.flow,
                self.rows.clone(),
                &command,
                Utc::now(),
            )?;
            for changed in &outcome.changed_rows {
                if let Some(row) = self.rows.iter_mut().find(|row| row.id == changed.id) {
                    *row = changed.clone();
                }
            }
            self.expense = outcome.expense.clone();
            Ok(outcome)
        }

        fn row(&self, level: u32, approver: &str) -> &ApprovalRequest {
            self.rows
                .iter()
                .find(|row| row.level_number == level && row.approver.0 == approver)
                .expect("row exists")
        }
    }

    #[test]
    fn submission_creates_every_row_with_only_level_one_active() {
        let flow = flow(vec![
            level(1, "Manager", &["m1", "m2"], ApprovalRule::All),
            level(2, "Finance", &["f1"], ApprovalRule::Specific { approver: UserId::new("cfo") }),
        ]);
        let outcome =
            ApprovalSequencer::default().submit(expense(), &flow, Utc::now()).expect("submit");

        assert_eq!(
            outcome.statuses,
            vec![ExpenseStatus::Draft, ExpenseStatus::Submitted, ExpenseStatus::PendingApproval]
        );
        assert_eq!(outcome.state, ApprovalState::AwaitingLevel(1));
        assert_eq!(outcome.rows.len(), 4);
        assert!(outcome.rows.iter().all(|row| row.status == ApprovalStatus::Pending));
        assert!(outcome.rows.iter().all(|row| row.is_active == (row.level_number == 1)));
        assert_eq!(outcome.expense.current_approvers, vec![UserId::new("m1"), UserId::new("m2")]);
        assert_eq!(outcome.expense.flow_id, Some(flow.id.clone()));
        assert!(outcome.rows.iter().any(|row| row.approver.0 == "cfo" && row.approver_role == "Finance"));
    }

    #[test]
    fn submitting_twice_is_refused() {
        let flow = flow(vec![level(1, "Manager", &["m1"], ApprovalRule::Any)]);
        let run = Run::start(flow.clone());

        let error = run.sequencer.submit(run.expense.clone(), &flow, Utc::now()).expect_err("twice");
        assert!(matches!(error, ApprovalError::AlreadySubmitted { .. }));
    }

    #[test]
    fn two_level_flow_walks_to_approved() {
        let mut run = Run::start(flow(vec![
            level(1, "Manager", &["a"], ApprovalRule::All),
            level(2, "Director", &["x", "y"], ApprovalRule::Specific { approver: UserId::new("x") }),
        ]));

        let first = run.act(vote("a", Decision::Approve)).expect("level 1");
        assert_eq!(first.to, ApprovalState::AwaitingLevel(2));
        assert_eq!(run.expense.status, ExpenseStatus::PendingApproval);
        assert_eq!(run.expense.current_approvers, vec![UserId::new("x"), UserId::new("y")]);
        assert!(run.row(2, "x").is_active && run.row(2, "y").is_active);

        let second = run.act(vote("x", Decision::Approve)).expect("level 2");
        assert_eq!(second.to, ApprovalState::Approved);
        assert_eq!(run.expense.status, ExpenseStatus::Approved);
        assert!(run.expense.current_approvers.is_empty());
        assert_eq!(run.expense.approvals.len(), 2);

        let decided = run.rows.iter().filter(|row| row.status != ApprovalStatus::Skipped).count();
        assert_eq!(decided, 2);
        assert_eq!(run.row(2, "y").status, ApprovalStatus::Skipped);
        assert_eq!(run.row(2, "x").rule_applied.as_deref(), Some("SPECIFIC_APPROVED"));
        assert!(run.rows.iter().all(|row| !row.is_active));
    }

    #[test]
    fn rejection_at_all_level_is_final_and_skips_later_levels() {
        let mut run = Run::start(flow(vec![
            level(1, "Manager", &["a", "b", "c"], ApprovalRule::All),
            level(2, "Finance", &["f"], ApprovalRule::Any),
        ]));

        run.act(vote("a", Decision::Approve)).expect("a approves");
        let mut reject = vote("b", Decision::Reject);
        reject.comments = "duplicate claim".to_owned();
        let outcome = run.act(reject).expect("b rejects");

        assert_eq!(outcome.to, ApprovalState::Rejected);
        assert_eq!(outcome.evaluation.outcome, LevelOutcome::Rejected);
        assert_eq!(run.expense.status, ExpenseStatus::Rejected);
        assert_eq!(run.expense.final_comments, "duplicate claim");
        assert_eq!(run.row(1, "c").status, ApprovalStatus::Skipped);
        assert_eq!(run.row(1, "a").status, ApprovalStatus::Approved);
        assert_eq!(run.row(2, "f").status, ApprovalStatus::Skipped);
        assert_eq!(run.expense.approvals[0].action, LevelAction::Rejected);

        let error = run.act(vote("c", Decision::Approve)).expect_err("finalized");
        assert!(matches!(
            error,
            ApprovalError::AlreadyFinalized { status: ExpenseStatus::Rejected, .. }
        ));
    }

    #[test]
    fn any_level_tolerates_a_lone_rejection() {
        let mut run = Run::start(flow(vec![level(1, "Manager", &["m1", "m2"], ApprovalRule::Any)]));

        let first = run.act(vote("m2", Decision::Reject)).expect("m2 rejects");
        assert_eq!(first.to, ApprovalState::AwaitingLevel(1));
        assert_eq!(run.expense.status, ExpenseStatus::PendingApproval);

        let second = run.act(vote("m1", Decision::Approve)).expect("m1 approves");
        assert_eq!(second.to, ApprovalState::Approved);
        assert_eq!(run.row(1, "m2").status, ApprovalStatus::Rejected);
        assert_eq!(run.row(1, "m2").rule_applied.as_deref(), Some("ANY_APPROVED"));
    }

    #[test]
    fn percentage_level_resolves_on_threshold_and_impossibility() {
        let approvers = ["p1", "p2", "p3", "p4", "p5"];
        let percentage = ApprovalRule::Percentage { threshold: Decimal::from(60) };

        let mut approving = Run::start(flow(vec![level(1, "Board", &approvers, percentage.clone())]));
        approving.act(vote("p1", Decision::Approve)).expect("p1");
        approving.act(vote("p2", Decision::Reject)).expect("p2");
        approving.act(vote("p3", Decision::Approve)).expect("p3");
        let done = approving.act(vote("p4", Decision::Approve)).expect("p4");
        assert_eq!(done.to, ApprovalState::Approved);
        assert_eq!(approving.row(1, "p5").status, ApprovalStatus::Skipped);

        let mut rejecting = Run::start(flow(vec![level(1, "Board", &approvers, percentage)]));
        rejecting.act(vote("p1", Decision::Reject)).expect("p1");
        rejecting.act(vote("p2", Decision::Reject)).expect("p2");
        let done = rejecting.act(vote("p3", Decision::Reject)).expect("p3");
        assert_eq!(done.to, ApprovalState::Rejected);
        assert_eq!(
            rejecting.row(1, "p1").rule_applied.as_deref(),
            Some("PERCENTAGE_60_UNREACHABLE")
        );
    }

    #[test]
    fn specific_level_ignores_other_approvers() {
        let mut run = Run::start(flow(vec![level(
            1,
            "Director",
            &["x", "y"],
            ApprovalRule::Specific { approver: UserId::new("x") },
        )]));

        let outcome = run.act(vote("y", Decision::Reject)).expect("y rejects");
        assert_eq!(outcome.to, ApprovalState::AwaitingLevel(1));

        let outcome = run.act(vote("x", Decision::Approve)).expect("x approves");
        assert_eq!(outcome.to, ApprovalState::Approved);
    }

    #[test]
    fn double_vote_is_a_duplicate_action() {
        let mut run = Run::start(flow(vec![level(1, "Manager", &["a", "b"], ApprovalRule::All)]));
        run.act(vote("a", Decision::Approve)).expect("first vote");

        let error = run.act(vote("a", Decision::Reject)).expect_err("second vote");
        assert!(matches!(error, ApprovalError::DuplicateAction { level: 1, .. }));
        assert_eq!(run.row(1, "a").status, ApprovalStatus::Approved);
    }

    #[test]
    fn stale_level_is_rejected() {
        let mut run = Run::start(flow(vec![
            level(1, "Manager", &["a"], ApprovalRule::Any),
            level(2, "Finance", &["a", "f"], ApprovalRule::Any),
        ]));
        run.act(vote("a", Decision::Approve)).expect("level 1");

        let mut late = vote("a", Decision::Approve);
        late.level = Some(1);
        let error = run.act(late).expect_err("level 1 already resolved");
        assert!(matches!(error, ApprovalError::InvalidLevel { current: 2, requested: 1, .. }));
    }

    #[test]
    fn ineligible_approver_is_refused() {
        let mut run = Run::start(flow(vec![level(1, "Manager", &["a"], ApprovalRule::Any)]));

        let error = run.act(vote("mallory", Decision::Approve)).expect_err("not eligible");
        assert!(matches!(error, ApprovalError::NotEligibleApprover { .. }));
    }

    #[test]
    fn draft_expense_cannot_be_decided() {
        let flow = flow(vec![level(1, "Manager", &["a"], ApprovalRule::Any)]);
        let error = ApprovalSequencer::default()
            .record_decision(expense(), &flow, Vec::new(), &vote("a", Decision::Approve), Utc::now())
            .expect_err("draft");
        assert!(matches!(error, ApprovalError::NotSubmitted { status: ExpenseStatus::Draft, .. }));
    }

    #[test]
    fn rejection_comment_policy_is_enforced() {
        let flow = flow(vec![level(1, "Manager", &["a"], ApprovalRule::Any)]);
        let sequencer = ApprovalSequencer::new(DecisionPolicy { require_comment_on_reject: true });
        let submitted = sequencer.submit(expense(), &flow, Utc::now()).expect("submit");

        let error = sequencer
            .record_decision(
                submitted.expense,
                &flow,
                submitted.rows,
                &vote("a", Decision::Reject),
                Utc::now(),
            )
            .expect_err("comment required");
        assert_eq!(error, ApprovalError::CommentRequired);
    }

    #[test]
    fn pending_vote_changes_only_the_voter_row() {
        let mut run = Run::start(flow(vec![level(1, "Manager", &["a", "b"], ApprovalRule::All)]));
        let version = run.expense.version;

        let outcome = run.act(vote("a", Decision::Approve)).expect("a approves");
        assert_eq!(outcome.changed_rows.len(), 1);
        assert_eq!(outcome.changed_rows[0].approver, UserId::new("a"));
        assert!(outcome.resolution.is_none());
        assert_eq!(run.expense.version, version + 1);
    }
}
