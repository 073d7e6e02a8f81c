/// Consumed substrate abstractions
///
/// The engine does not implement durable execution or pub-sub itself; it
/// consumes three capabilities as traits: a durable step runner (labeled,
/// replay-memoized units of work and resumable sleeps), a best-effort
/// status publisher, and a trigger dispatcher connecting the schedule
/// runner to the orchestrator. The in-process implementations here back
/// the standalone binary and the test suite; a production deployment can
/// swap in a real durable-execution substrate behind the same traits.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::workflow::types::TriggerEvent;

/// How a durable sleep ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepOutcome {
    /// The wake instant was reached.
    Elapsed,
    /// A matching cancellation signal arrived while suspended.
    Cancelled,
}

/// Durable step runner consumed by executors and the schedule runner.
///
/// `run` guarantees at-least-once execution with replay-safe memoization
/// per label; `sleep_until` suspends durably (a cancelable, resumable
/// timer, never a blocked thread).
#[async_trait]
pub trait StepRunner: Send + Sync {
    async fn run(
        &self,
        label: &str,
        work: BoxFuture<'static, anyhow::Result<Value>>,
    ) -> anyhow::Result<Value>;

    async fn sleep_until(&self, label: &str, wake_at: DateTime<Utc>) -> SleepOutcome;
}

/// In-process step runner: memoizes step results by label for the lifetime
/// of one invocation and sleeps on the tokio timer. Cancellation is wired
/// per invocation via a `CancellationToken`; an uncancellable runner is
/// used for plain workflow executions.
pub struct InProcessStepRunner {
    journal: Mutex<HashMap<String, Value>>,
    cancel: Option<CancellationToken>,
}

impl InProcessStepRunner {
    pub fn new() -> Self {
        Self {
            journal: Mutex::new(HashMap::new()),
            cancel: None,
        }
    }

    pub fn with_cancellation(cancel: CancellationToken) -> Self {
        Self {
            journal: Mutex::new(HashMap::new()),
            cancel: Some(cancel),
        }
    }
}

impl Default for InProcessStepRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StepRunner for InProcessStepRunner {
    async fn run(
        &self,
        label: &str,
        work: BoxFuture<'static, anyhow::Result<Value>>,
    ) -> anyhow::Result<Value> {
        if let Some(memoized) = self.journal.lock().await.get(label) {
            return Ok(memoized.clone());
        }

        let result = work.await?;
        self.journal
            .lock()
            .await
            .insert(label.to_string(), result.clone());
        Ok(result)
    }

    async fn sleep_until(&self, label: &str, wake_at: DateTime<Utc>) -> SleepOutcome {
        let now = Utc::now();
        let Ok(duration) = (wake_at - now).to_std() else {
            // Wake instant already passed.
            return SleepOutcome::Elapsed;
        };

        tracing::debug!("sleeping until {} ({})", wake_at.to_rfc3339(), label);

        match &self.cancel {
            Some(token) => {
                tokio::select! {
                    _ = token.cancelled() => SleepOutcome::Cancelled,
                    _ = tokio::time::sleep(duration) => SleepOutcome::Elapsed,
                }
            }
            None => {
                tokio::time::sleep(duration).await;
                SleepOutcome::Elapsed
            }
        }
    }
}

/// Per-node status published while a run progresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Loading,
    Success,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusUpdate {
    pub node_id: String,
    pub status: NodeStatus,
}

/// Best-effort, fire-and-forget status publisher.
///
/// Publish failures must never fail a run; the orchestrator logs and
/// swallows them.
#[async_trait]
pub trait StatusPublisher: Send + Sync {
    async fn publish(&self, channel: &str, topic: &str, update: StatusUpdate)
        -> anyhow::Result<()>;
}

/// Publisher that discards all updates. Used when no realtime consumer is
/// attached.
pub struct NoopPublisher;

#[async_trait]
impl StatusPublisher for NoopPublisher {
    async fn publish(
        &self,
        _channel: &str,
        _topic: &str,
        _update: StatusUpdate,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Publisher that mirrors updates into the tracing stream. The default for
/// the standalone binary, where no pub-sub backend is wired.
pub struct LogPublisher;

#[async_trait]
impl StatusPublisher for LogPublisher {
    async fn publish(
        &self,
        channel: &str,
        topic: &str,
        update: StatusUpdate,
    ) -> anyhow::Result<()> {
        tracing::debug!(
            "status {}/{}: node {} -> {:?}",
            channel,
            topic,
            update.node_id,
            update.status
        );
        Ok(())
    }
}

/// Boundary between the schedule runner and the orchestrator.
///
/// The runner emits trigger events through this trait and shares no
/// in-process state with the engine; the in-process implementation lives
/// next to the engine, and tests substitute a capturing dispatcher.
#[async_trait]
pub trait TriggerDispatcher: Send + Sync {
    async fn dispatch(&self, event: TriggerEvent) -> anyhow::Result<()>;
}

/// Shared handle type used wherever a publisher is threaded through.
pub type SharedPublisher = Arc<dyn StatusPublisher>;
