//! One reconciliation pass: evaluate every bound address, update the
//! hysteresis counters in a single save, then reconcile membership.
//!
//! All counter updates for a cycle are committed before any membership
//! decision of that cycle reads them.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use super::evaluator::EligibilityEvaluator;
use super::reconciler::{MembershipReconciler, ReconcileSummary};
use super::scheduler::Cycle;
use super::tracker::{HysteresisTracker, Status};
use crate::handlers::registration::AddressRegistry;
use crate::storage::StoreError;

#[derive(Debug)]
pub enum CycleError {
    /// Counters could not be persisted; membership was left untouched.
    Persist(StoreError),
}

impl fmt::Display for CycleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CycleError::Persist(e) => write!(f, "failed to persist eligibility records: {}", e),
        }
    }
}

impl std::error::Error for CycleError {}

impl From<StoreError> for CycleError {
    fn from(e: StoreError) -> Self {
        CycleError::Persist(e)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleReport {
    pub users: usize,
    /// Users whose signal was positive this cycle.
    pub eligible: usize,
    /// Users whose status is valid after the update.
    pub valid: usize,
    pub membership: ReconcileSummary,
}

pub struct ReconciliationCycle {
    registry: Arc<AddressRegistry>,
    evaluator: EligibilityEvaluator,
    tracker: Arc<HysteresisTracker>,
    reconciler: MembershipReconciler,
    concurrency: usize,
}

impl ReconciliationCycle {
    pub fn new(
        registry: Arc<AddressRegistry>,
        evaluator: EligibilityEvaluator,
        tracker: Arc<HysteresisTracker>,
        reconciler: MembershipReconciler,
        concurrency: usize,
    ) -> Self {
        Self {
            registry,
            evaluator,
            tracker,
            reconciler,
            concurrency: concurrency.max(1),
        }
    }

    pub async fn run(&self) -> Result<CycleReport, CycleError> {
        let started = Instant::now();
        let bindings = self.registry.bindings().await;
        if bindings.is_empty() {
            log::info!("[cycle] No registered addresses, nothing to check");
            return Ok(CycleReport::default());
        }

        log::info!(
            "[cycle] Checking {} addresses against {} tokens",
            bindings.len(),
            self.evaluator.tokens().len()
        );

        let cycle = self.evaluator.start_cycle();
        let cycle = &cycle;
        let signals: Vec<_> = stream::iter(bindings)
            .map(|(user, address)| async move { (user, cycle.evaluate(&address).await) })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let users = signals.len();
        let eligible = signals.iter().filter(|(_, eligible)| *eligible).count();

        let records = self.tracker.update_batch(signals).await?;
        let valid = records
            .iter()
            .filter(|(_, record)| record.status == Status::Valid)
            .count();

        let membership = self.reconciler.reconcile_all(records).await;

        let report = CycleReport {
            users,
            eligible,
            valid,
            membership,
        };
        log::info!(
            "[cycle] Done in {:?}: {} users, {} eligible now, {} valid, {} removed, {} restored, {} planned, {} failed ({} lookups)",
            started.elapsed(),
            report.users,
            report.eligible,
            report.valid,
            report.membership.removed,
            report.membership.restored,
            report.membership.planned,
            report.membership.failed,
            cycle.cached_lookups().await
        );

        Ok(report)
    }
}

#[async_trait]
impl Cycle for ReconciliationCycle {
    async fn run_once(&self) -> Result<CycleReport, CycleError> {
        self.run().await
    }
}
