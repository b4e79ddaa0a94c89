//! Membership reconciler
//!
//! Applies eligibility statuses to the gated group. Decisions compare the
//! record against the user's live membership, so re-running with unchanged
//! inputs issues nothing new. A failure for one user is logged and the batch
//! moves on.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

use super::tracker::{EligibilityRecord, Status};
use crate::handlers::registration::UserId;

/// Live membership of a user in the gated group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberState {
    Member,
    /// Owner or administrator. Never acted upon.
    Privileged,
    /// Not in the group of their own accord.
    Left,
    /// Banned from the group.
    Removed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MembershipAction {
    /// Ban and immediately unban: out of the group, free to rejoin later.
    RemoveAllowRejoin,
    /// Lift an earlier ban.
    LiftRemoval,
}

impl fmt::Display for MembershipAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MembershipAction::RemoveAllowRejoin => f.write_str("remove"),
            MembershipAction::LiftRemoval => f.write_str("lift removal"),
        }
    }
}

/// The group-membership side of the chat platform.
#[async_trait]
pub trait MembershipBackend: Send + Sync {
    async fn member_state(
        &self,
        user: UserId,
    ) -> Result<MemberState, Box<dyn std::error::Error + Send + Sync>>;

    async fn remove_allow_rejoin(
        &self,
        user: UserId,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;

    async fn lift_removal(
        &self,
        user: UserId,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// Pure decision: which action, if any, brings `state` in line with `status`.
pub fn plan_action(status: Status, state: MemberState) -> Option<MembershipAction> {
    match (status, state) {
        (Status::Invalid, MemberState::Member) => Some(MembershipAction::RemoveAllowRejoin),
        (Status::Valid, MemberState::Removed) => Some(MembershipAction::LiftRemoval),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Applied(MembershipAction),
    /// Dry-run: the action that would have been applied.
    Planned(MembershipAction),
    Unchanged,
    Failed(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileSummary {
    pub removed: usize,
    pub restored: usize,
    pub planned: usize,
    pub unchanged: usize,
    pub failed: usize,
}

impl ReconcileSummary {
    fn record(&mut self, outcome: &ReconcileOutcome) {
        match outcome {
            ReconcileOutcome::Applied(MembershipAction::RemoveAllowRejoin) => self.removed += 1,
            ReconcileOutcome::Applied(MembershipAction::LiftRemoval) => self.restored += 1,
            ReconcileOutcome::Planned(_) => self.planned += 1,
            ReconcileOutcome::Unchanged => self.unchanged += 1,
            ReconcileOutcome::Failed(_) => self.failed += 1,
        }
    }
}

pub struct MembershipReconciler {
    backend: Arc<dyn MembershipBackend>,
    concurrency: usize,
    dry_run: bool,
}

impl MembershipReconciler {
    pub fn new(backend: Arc<dyn MembershipBackend>, concurrency: usize, dry_run: bool) -> Self {
        Self {
            backend,
            concurrency: concurrency.max(1),
            dry_run,
        }
    }

    /// Reconcile one user against an already-known membership state.
    pub async fn reconcile(
        &self,
        user: UserId,
        record: &EligibilityRecord,
        state: MemberState,
    ) -> ReconcileOutcome {
        let Some(action) = plan_action(record.status, state) else {
            if state == MemberState::Privileged && record.status == Status::Invalid {
                log::debug!("[reconciler] Skipping privileged member {}", user);
            }
            return ReconcileOutcome::Unchanged;
        };

        if self.dry_run {
            log::info!(
                "[reconciler] Dry run: would {} user {} (status {})",
                action,
                user,
                record.status
            );
            return ReconcileOutcome::Planned(action);
        }

        let result = match action {
            MembershipAction::RemoveAllowRejoin => self.backend.remove_allow_rejoin(user).await,
            MembershipAction::LiftRemoval => self.backend.lift_removal(user).await,
        };

        match result {
            Ok(()) => {
                log::info!("[reconciler] Applied {} to user {}", action, user);
                ReconcileOutcome::Applied(action)
            }
            Err(e) => {
                log::error!("[reconciler] Failed to {} user {}: {}", action, user, e);
                ReconcileOutcome::Failed(e.to_string())
            }
        }
    }

    /// Query the live state of one user, then reconcile.
    pub async fn reconcile_user(
        &self,
        user: UserId,
        record: &EligibilityRecord,
    ) -> ReconcileOutcome {
        match self.backend.member_state(user).await {
            Ok(state) => self.reconcile(user, record, state).await,
            Err(e) => {
                log::error!(
                    "[reconciler] Failed to check membership of user {}: {}",
                    user,
                    e
                );
                ReconcileOutcome::Failed(e.to_string())
            }
        }
    }

    /// Reconcile every user, with bounded concurrency. Never aborts early.
    pub async fn reconcile_all(
        &self,
        records: Vec<(UserId, EligibilityRecord)>,
    ) -> ReconcileSummary {
        let outcomes: Vec<ReconcileOutcome> = stream::iter(records)
            .map(|(user, record)| async move { self.reconcile_user(user, &record).await })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut summary = ReconcileSummary::default();
        for outcome in &outcomes {
            summary.record(outcome);
        }
        summary
    }
}
