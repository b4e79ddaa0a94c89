//! Background scheduler for reconciliation cycles
//!
//! Ticks come from an injectable [`Ticker`]. At most one cycle runs at a
//! time: a tick that arrives while a cycle is still running is skipped, never
//! queued. Failed or panicking cycles are logged and the next tick proceeds.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};

use super::cycle::{CycleError, CycleReport};

/// Source of scheduling ticks.
#[async_trait]
pub trait Ticker: Send {
    async fn tick(&mut self);
}

/// Fixed-period ticker; the first tick fires after `startup_delay`.
pub struct IntervalTicker {
    interval: Interval,
}

impl IntervalTicker {
    pub fn new(startup_delay: Duration, period: Duration) -> Self {
        let mut interval = tokio::time::interval_at(Instant::now() + startup_delay, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self { interval }
    }
}

#[async_trait]
impl Ticker for IntervalTicker {
    async fn tick(&mut self) {
        self.interval.tick().await;
    }
}

/// One unit of scheduled work.
#[async_trait]
pub trait Cycle: Send + Sync {
    async fn run_once(&self) -> Result<CycleReport, CycleError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
}

impl SchedulerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchedulerState::Idle => "idle",
            SchedulerState::Running => "running",
        }
    }
}

#[derive(Debug, Clone)]
pub struct LastCycle {
    pub finished_at: DateTime<Utc>,
    pub outcome: Result<CycleReport, String>,
}

/// Puts the scheduler back to idle when the cycle task ends, panics included.
struct RunningGuard(Arc<AtomicBool>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[derive(Clone)]
pub struct Scheduler {
    cycle: Arc<dyn Cycle>,
    running: Arc<AtomicBool>,
    last_cycle: Arc<Mutex<Option<LastCycle>>>,
}

impl Scheduler {
    pub fn new(cycle: Arc<dyn Cycle>) -> Self {
        Self {
            cycle,
            running: Arc::new(AtomicBool::new(false)),
            last_cycle: Arc::new(Mutex::new(None)),
        }
    }

    pub fn state(&self) -> SchedulerState {
        if self.running.load(Ordering::SeqCst) {
            SchedulerState::Running
        } else {
            SchedulerState::Idle
        }
    }

    pub fn last_cycle(&self) -> Option<LastCycle> {
        self.last_cycle.lock().ok().and_then(|last| last.clone())
    }

    /// Start a cycle unless one is already running.
    ///
    /// Returns the handle of the spawned cycle, or `None` if the tick was skipped.
    pub fn trigger(&self) -> Option<JoinHandle<()>> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            log::warn!("[scheduler] Previous cycle still running, skipping this tick");
            return None;
        }

        let guard = RunningGuard(self.running.clone());
        let cycle = self.cycle.clone();
        let last_cycle = self.last_cycle.clone();

        Some(tokio::spawn(async move {
            let _guard = guard;
            let outcome = match cycle.run_once().await {
                Ok(report) => Ok(report),
                Err(e) => {
                    log::error!("[scheduler] Reconciliation cycle failed: {}", e);
                    Err(e.to_string())
                }
            };
            if let Ok(mut last) = last_cycle.lock() {
                *last = Some(LastCycle {
                    finished_at: Utc::now(),
                    outcome,
                });
            }
        }))
    }

    /// Trigger a cycle on every tick until `shutdown` flips to true or its
    /// sender goes away. An in-flight cycle is awaited before returning.
    pub async fn run<T: Ticker>(&self, mut ticker: T, mut shutdown: watch::Receiver<bool>) {
        log::info!("[scheduler] Starting reconciliation scheduler");
        let mut in_flight: Option<JoinHandle<()>> = None;

        while !*shutdown.borrow() {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Some(handle) = self.trigger() {
                        in_flight = Some(handle);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        if let Some(handle) = in_flight {
            if !handle.is_finished() {
                log::info!("[scheduler] Waiting for the running cycle to finish");
            }
            if let Err(e) = handle.await {
                log::error!("[scheduler] Cycle task ended abnormally: {}", e);
            }
        }
        log::info!("[scheduler] Stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::eligibility::reconciler::ReconcileSummary;
    use crate::storage::StoreError;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::{Semaphore, mpsc};

    /// Ticks whenever the test sends on the channel.
    struct ChannelTicker(mpsc::Receiver<()>);

    #[async_trait]
    impl Ticker for ChannelTicker {
        async fn tick(&mut self) {
            if self.0.recv().await.is_none() {
                std::future::pending::<()>().await;
            }
        }
    }

    enum Behaviour {
        Succeed,
        Fail,
        Panic,
    }

    /// Cycle that blocks on a gate, counts completed runs, and reports each one.
    struct GatedCycle {
        gate: Arc<Semaphore>,
        runs: AtomicUsize,
        done: mpsc::UnboundedSender<usize>,
        behaviour: Behaviour,
    }

    impl GatedCycle {
        fn new(behaviour: Behaviour) -> (Arc<Self>, mpsc::UnboundedReceiver<usize>) {
            let (done, rx) = mpsc::unbounded_channel();
            let cycle = Arc::new(Self {
                gate: Arc::new(Semaphore::new(0)),
                runs: AtomicUsize::new(0),
                done,
                behaviour,
            });
            (cycle, rx)
        }

        fn open(&self) {
            self.gate.add_permits(1000);
        }
    }

    #[async_trait]
    impl Cycle for GatedCycle {
        async fn run_once(&self) -> Result<CycleReport, CycleError> {
            let _permit = self.gate.acquire().await.unwrap();
            let run = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
            let _ = self.done.send(run);
            match self.behaviour {
                Behaviour::Succeed => Ok(CycleReport {
                    users: run,
                    eligible: 0,
                    valid: 0,
                    membership: ReconcileSummary::default(),
                }),
                Behaviour::Fail => Err(CycleError::Persist(StoreError::Corrupt(
                    "disk full".to_string(),
                ))),
                Behaviour::Panic => panic!("cycle exploded"),
            }
        }
    }

    #[tokio::test]
    async fn test_tick_during_running_cycle_is_skipped() {
        let (cycle, _done) = GatedCycle::new(Behaviour::Succeed);
        let scheduler = Scheduler::new(cycle.clone());

        let first = scheduler.trigger().expect("first tick starts a cycle");
        assert_eq!(scheduler.state(), SchedulerState::Running);
        assert!(scheduler.trigger().is_none());

        cycle.open();
        first.await.unwrap();

        assert_eq!(scheduler.state(), SchedulerState::Idle);
        assert_eq!(cycle.runs.load(Ordering::SeqCst), 1);
        let last = scheduler.last_cycle().unwrap();
        assert_eq!(last.outcome.unwrap().users, 1);

        scheduler.trigger().expect("idle again").await.unwrap();
        assert_eq!(cycle.runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_cycle_is_recorded_and_scheduler_recovers() {
        let (cycle, _done) = GatedCycle::new(Behaviour::Fail);
        cycle.open();
        let scheduler = Scheduler::new(cycle.clone());

        scheduler.trigger().unwrap().await.unwrap();
        assert_eq!(scheduler.state(), SchedulerState::Idle);
        let last = scheduler.last_cycle().unwrap();
        assert!(last.outcome.unwrap_err().contains("disk full"));

        assert!(scheduler.trigger().is_some());
    }

    #[tokio::test]
    async fn test_panicking_cycle_returns_to_idle() {
        let (cycle, _done) = GatedCycle::new(Behaviour::Panic);
        cycle.open();
        let scheduler = Scheduler::new(cycle.clone());

        let result = scheduler.trigger().unwrap().await;
        assert!(result.unwrap_err().is_panic());
        assert_eq!(scheduler.state(), SchedulerState::Idle);
        assert!(scheduler.last_cycle().is_none());
    }

    #[tokio::test]
    async fn test_run_triggers_on_each_tick_until_shutdown() {
        let (cycle, mut done) = GatedCycle::new(Behaviour::Succeed);
        cycle.open();
        let scheduler = Scheduler::new(cycle.clone());

        let (tick_tx, tick_rx) = mpsc::channel(4);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let runner = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move { scheduler.run(ChannelTicker(tick_rx), shutdown_rx).await })
        };

        tick_tx.send(()).await.unwrap();
        assert_eq!(done.recv().await, Some(1));
        tick_tx.send(()).await.unwrap();
        assert_eq!(done.recv().await, Some(2));

        shutdown_tx.send(true).unwrap();
        runner.await.unwrap();
        assert_eq!(cycle.runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_in_flight_cycle() {
        let (cycle, mut done) = GatedCycle::new(Behaviour::Succeed);
        let scheduler = Scheduler::new(cycle.clone());

        let (tick_tx, tick_rx) = mpsc::channel(4);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let runner = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move { scheduler.run(ChannelTicker(tick_rx), shutdown_rx).await })
        };

        tick_tx.send(()).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while scheduler.state() != SchedulerState::Running {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        shutdown_tx.send(true).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!runner.is_finished());

        cycle.open();
        assert_eq!(done.recv().await, Some(1));
        runner.await.unwrap();
        assert_eq!(scheduler.state(), SchedulerState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_ticker_waits_for_startup_delay() {
        let start = Instant::now();
        let mut ticker = IntervalTicker::new(Duration::from_secs(10), Duration::from_secs(60));

        ticker.tick().await;
        assert_eq!(start.elapsed(), Duration::from_secs(10));
        ticker.tick().await;
        assert_eq!(start.elapsed(), Duration::from_secs(70));
    }
}
