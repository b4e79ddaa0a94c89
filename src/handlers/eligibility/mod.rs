pub mod cycle;
pub mod evaluator;
pub mod reconciler;
pub mod scheduler;
pub mod tracker;

pub use cycle::{CycleError, CycleReport, ReconciliationCycle};
pub use evaluator::{CycleEvaluator, EligibilityEvaluator};
pub use reconciler::{MemberState, MembershipAction, MembershipBackend, MembershipReconciler};
pub use scheduler::{Cycle, IntervalTicker, Scheduler, SchedulerState, Ticker};
pub use tracker::{EligibilityRecord, EligibilityTable, HysteresisTracker, Status};
