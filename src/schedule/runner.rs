/// Self-chaining schedule runner
///
/// Each enabled schedule is driven by a chain of durable invocations:
/// sleep until `next_run_at`, fire one workflow execution, recompute the
/// next occurrence, persist it, and re-enqueue a start signal for the same
/// schedule id. The chain ends when the schedule is disabled, deleted,
/// cancelled while sleeping, or passes its end date.
///
/// States per invocation:
/// `AWAITING_FIRE -> SLEEPING -> FIRING -> RESCHEDULED | DISABLED | CANCELLED`
///
/// A fixed-tick reconciliation poller backs the chains up: it re-arms any
/// enabled, overdue schedule that has no live chain (e.g. after a crash
/// with no pending sleep). The poller never fires workflows itself, so a
/// schedule is never double-fired by the two mechanisms.

use crate::error::Result;
use crate::runtime::substrate::{
    InProcessStepRunner, SleepOutcome, StepRunner, TriggerDispatcher,
};
use crate::schedule::recurrence;
use crate::schedule::store::{ScheduleStore, ScheduledWorkflow};
use crate::workflow::types::TriggerEvent;
use chrono::Utc;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Control signals correlated on schedule id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleSignal {
    /// Begin or continue a chain.
    Start { schedule_id: String },
    /// Abort a sleeping chain. Firings already in flight complete normally.
    Cancel { schedule_id: String },
}

/// Terminal state of one chain invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainOutcome {
    /// Fired and re-enqueued itself.
    Rescheduled,
    /// Schedule disabled (by the user or by passing its end date).
    Disabled,
    /// Cancelled while sleeping; the pending firing never happened.
    Cancelled,
    /// Schedule row gone; treated as already cancelled.
    Missing,
}

/// Routes schedule signals and owns the live chains
pub struct ScheduleService {
    store: ScheduleStore,
    dispatcher: Arc<dyn TriggerDispatcher>,
    /// Cancellation token of each live chain, keyed by schedule id. A fresh
    /// token is issued per invocation, so a cancel that lands mid-firing
    /// does not survive into the next sleep.
    chains: Mutex<HashMap<String, CancellationToken>>,
    tx: mpsc::UnboundedSender<ScheduleSignal>,
}

impl ScheduleService {
    /// Create the service and spawn its signal loop.
    pub fn new(store: ScheduleStore, dispatcher: Arc<dyn TriggerDispatcher>) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let service = Arc::new(Self {
            store,
            dispatcher,
            chains: Mutex::new(HashMap::new()),
            tx,
        });

        let signal_service = Arc::clone(&service);
        tokio::spawn(async move { signal_service.signal_loop(rx).await });

        service
    }

    pub fn store(&self) -> &ScheduleStore {
        &self.store
    }

    /// Emit a signal into the service loop.
    pub fn signal(&self, signal: ScheduleSignal) {
        if self.tx.send(signal).is_err() {
            tracing::error!("schedule signal loop is gone");
        }
    }

    pub fn start_chain(&self, schedule_id: &str) {
        self.signal(ScheduleSignal::Start {
            schedule_id: schedule_id.to_string(),
        });
    }

    pub fn cancel_chain(&self, schedule_id: &str) {
        self.signal(ScheduleSignal::Cancel {
            schedule_id: schedule_id.to_string(),
        });
    }

    /// Whether a chain invocation is currently live for this schedule.
    pub fn has_active_chain(&self, schedule_id: &str) -> bool {
        self.chains.lock().unwrap().contains_key(schedule_id)
    }

    /// Persist a newly attached schedule (computing its first occurrence if
    /// the editor did not) and start its chain.
    pub async fn arm(&self, mut schedule: ScheduledWorkflow) -> Result<ScheduledWorkflow> {
        if schedule.next_run_at.is_none() {
            schedule.next_run_at = Some(recurrence::next_occurrence(&schedule, Utc::now())?);
        }
        self.store.save(&schedule).await?;
        self.start_chain(&schedule.id);
        Ok(schedule)
    }

    /// Start a chain for every enabled schedule. Called once at startup to
    /// resume chains that died with the previous process.
    pub async fn resume_chains(&self) -> Result<usize> {
        let schedules = self.store.all_enabled().await?;
        let count = schedules.len();
        for schedule in schedules {
            self.start_chain(&schedule.id);
        }
        Ok(count)
    }

    /// Spawn the reconciliation poller on a fixed tick.
    pub fn spawn_reconciler(self: Arc<Self>, interval: std::time::Duration) {
        let service = self;
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tick.tick().await;
                if let Err(err) = service.reconcile().await {
                    tracing::error!("schedule reconciliation failed: {}", err);
                }
            }
        });
    }

    /// Re-arm any enabled, overdue schedule without a live chain.
    pub async fn reconcile(&self) -> Result<()> {
        let due = self.store.due(Utc::now()).await?;
        for schedule in due {
            if !self.has_active_chain(&schedule.id) {
                tracing::warn!("re-arming schedule {} with no live chain", schedule.id);
                self.start_chain(&schedule.id);
            }
        }
        Ok(())
    }

    async fn signal_loop(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<ScheduleSignal>) {
        while let Some(signal) = rx.recv().await {
            match signal {
                ScheduleSignal::Start { schedule_id } => Self::handle_start(&self, schedule_id),
                ScheduleSignal::Cancel { schedule_id } => {
                    let chains = self.chains.lock().unwrap();
                    match chains.get(&schedule_id) {
                        Some(token) => {
                            tracing::info!("cancelling chain for schedule {}", schedule_id);
                            token.cancel();
                        }
                        None => {
                            tracing::debug!(
                                "cancel for schedule {} matched no live chain",
                                schedule_id
                            );
                        }
                    }
                }
            }
        }
    }

    /// Start one chain invocation unless the schedule already has a live
    /// chain (a duplicate start would double-fire every occurrence).
    fn handle_start(service: &Arc<Self>, schedule_id: String) {
        let token = CancellationToken::new();
        {
            let mut chains = service.chains.lock().unwrap();
            if chains.contains_key(&schedule_id) {
                tracing::debug!("chain already live for schedule {}; ignoring start", schedule_id);
                return;
            }
            chains.insert(schedule_id.clone(), token.clone());
        }

        let service = Arc::clone(service);
        tokio::spawn(async move {
            let outcome = service.run_invocation(&schedule_id, token).await;

            service.chains.lock().unwrap().remove(&schedule_id);

            match outcome {
                Ok(ChainOutcome::Rescheduled) => {
                    // Self-chain: re-enqueue a start for our own id.
                    service.signal(ScheduleSignal::Start { schedule_id });
                }
                Ok(outcome) => {
                    tracing::info!("chain for schedule {} ended: {:?}", schedule_id, outcome);
                }
                Err(err) => {
                    // The row keeps its stale next_run_at, so the
                    // reconciler re-arms it on a later tick instead of the
                    // chain dying silently or spinning hot.
                    tracing::error!("chain for schedule {} errored: {}", schedule_id, err);
                }
            }
        });
    }

    /// One firing of the state machine.
    async fn run_invocation(
        &self,
        schedule_id: &str,
        token: CancellationToken,
    ) -> Result<ChainOutcome> {
        // AWAITING_FIRE
        let Some(schedule) = self.store.get(schedule_id).await? else {
            return Ok(ChainOutcome::Missing);
        };
        if !schedule.enabled {
            return Ok(ChainOutcome::Disabled);
        }

        // SLEEPING: durable, cancelable suspension until the occurrence.
        if let Some(next_run_at) = schedule.next_run_at {
            let step = InProcessStepRunner::with_cancellation(token);
            if step.sleep_until("sleep-until-next-run", next_run_at).await
                == SleepOutcome::Cancelled
            {
                tracing::info!("schedule {} cancelled while sleeping", schedule_id);
                return Ok(ChainOutcome::Cancelled);
            }
        }

        // The schedule may have been disabled or deleted while we slept.
        let Some(schedule) = self.store.get(schedule_id).await? else {
            return Ok(ChainOutcome::Missing);
        };
        if !schedule.enabled {
            return Ok(ChainOutcome::Disabled);
        }

        // FIRING: emit the trigger event. A failed dispatch never kills the
        // chain; the loop still reschedules so one transient failure cannot
        // permanently stop a recurring schedule.
        let fired_at = Utc::now();
        let event = schedule_trigger_event(&schedule, fired_at);
        let event_id = event.id.clone();

        tracing::info!(
            "⏰ schedule {} firing workflow {} (trigger event {})",
            schedule.id,
            schedule.workflow_id,
            event_id
        );

        if let Err(err) = self.dispatcher.dispatch(event).await {
            tracing::error!(
                "schedule {} failed to trigger workflow {}: {:#}",
                schedule.id,
                schedule.workflow_id,
                err
            );
        }

        // RESCHEDULE
        let next_run_at = recurrence::next_occurrence(&schedule, fired_at)?;

        if let Some(end_date) = schedule.end_date {
            if next_run_at > end_date {
                self.store.set_enabled(schedule_id, false).await?;
                tracing::info!(
                    "schedule {} passed its end date; chain terminated",
                    schedule_id
                );
                return Ok(ChainOutcome::Disabled);
            }
        }

        self.store
            .record_firing(schedule_id, next_run_at, fired_at, &event_id)
            .await?;

        tracing::debug!(
            "schedule {} rescheduled for {}",
            schedule_id,
            next_run_at.to_rfc3339()
        );

        Ok(ChainOutcome::Rescheduled)
    }
}

/// Build the trigger event one firing emits.
fn schedule_trigger_event(
    schedule: &ScheduledWorkflow,
    triggered_at: chrono::DateTime<Utc>,
) -> TriggerEvent {
    let payload = json!({
        "scheduleTrigger": {
            "scheduleId": schedule.id,
            "nodeId": schedule.node_id,
            "scheduledAt": schedule.next_run_at.map(|t| t.to_rfc3339()),
            "triggeredAt": triggered_at.to_rfc3339(),
            "scheduleType": schedule.schedule_type.as_str(),
        }
    });

    TriggerEvent::new(
        schedule.workflow_id.clone(),
        payload.as_object().cloned(),
    )
}
