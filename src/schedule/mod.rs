/// Recurring Schedule Subsystem
///
/// Durable recurring execution for schedule-trigger nodes:
/// - Persisted schedule rows with recurrence configuration
/// - Deterministic next-occurrence computation
/// - The self-chaining sleep/wake runner with targeted cancellation
/// - A reconciliation poller that re-arms chains lost to a crash

// Scheduled workflow rows and their SQLite store
pub mod store;

// Next-occurrence policy (INTERVAL/DAILY/WEEKLY/MONTHLY/CRON)
pub mod recurrence;

// Self-chaining runner, signal routing, reconciliation
pub mod runner;

// Re-export main types
pub use recurrence::next_occurrence;
pub use runner::{ChainOutcome, ScheduleService, ScheduleSignal};
pub use store::{IntervalUnit, ScheduleStore, ScheduleType, ScheduledWorkflow};
