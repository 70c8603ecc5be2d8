use crate::job::JobId;

use thiserror::Error;

/// Errors surfaced by `JobStore` implementations.
///
/// `NotFound` is load-bearing: the executor maps it to
/// [`RunError::JobNotFound`] so the registry can self-unregister, and the
/// registry treats it as success when applying a `Delete` event whose
/// document is already gone.
#[derive(Error, Debug)]
pub enum StoreError {
  #[error("document not found")]
  NotFound,
  #[error("store backend error: {0}")]
  Backend(String),
}

/// Errors surfaced by `CacheService` implementations.
#[derive(Error, Debug)]
pub enum CacheError {
  #[error("cache backend error: {0}")]
  Backend(String),
  #[error("subscription closed: {0}")]
  Closed(String),
}

/// Outcome of a failed lock acquisition attempt.
///
/// `WaitForNextSchedule` is not a failure: some other node owns this
/// occurrence and the caller's tick is simply skipped.
#[derive(Error, Debug)]
pub enum LockError {
  #[error("lock already held, wait for next schedule")]
  WaitForNextSchedule,
  #[error(transparent)]
  Cache(#[from] CacheError),
}

/// Errors from parsing a job's schedule expression or timezone.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScheduleError {
  #[error("invalid schedule expression '{expression}': {reason}")]
  InvalidExpression { expression: String, reason: String },
  #[error("unknown timezone '{0}'")]
  UnknownTimezone(String),
  #[error("timezone '{0}' is not in the supported set")]
  UnsupportedTimezone(String),
}

/// Errors from a single job occurrence executed by the `TaskExecutor`.
///
/// All variants except `JobNotFound` are occurrence-local: they are recorded
/// in the run log and the job's status, and never propagate beyond the one
/// fire. `JobNotFound` is registry-correcting — the trigger closure reacts
/// to it by removing the local schedule entry.
#[derive(Error, Debug)]
pub enum RunError {
  #[error("job {0} not found")]
  JobNotFound(JobId),
  #[error("empty command for job {0}")]
  EmptyCommand(JobId),
  #[error("process error: {0}")]
  Process(#[source] std::io::Error),
  #[error("command exited with {0}")]
  Exit(std::process::ExitStatus),
  #[error("command '{command}' reached its {timeout_secs}s timeout limit")]
  Timeout { command: String, timeout_secs: u64 },
  #[error("http request failed: {0}")]
  Http(#[from] reqwest::Error),
  #[error("failed to serialize http payload: {0}")]
  Serialize(#[from] serde_json::Error),
  #[error(transparent)]
  Schedule(#[from] ScheduleError),
  #[error("lock acquisition failed: {0}")]
  Lock(#[source] CacheError),
  #[error("store error: {0}")]
  Store(#[from] StoreError),
}

/// Errors from registry operations (adding jobs, applying events).
#[derive(Error, Debug)]
pub enum RegistryError {
  #[error(transparent)]
  Schedule(#[from] ScheduleError),
  #[error("store error: {0}")]
  Store(#[from] StoreError),
}

/// Errors in the change event wire codec and publish path.
#[derive(Error, Debug)]
pub enum EventError {
  #[error("event codec error: {0}")]
  Codec(String),
  #[error("unknown event code {0}")]
  UnknownCode(u32),
  #[error(transparent)]
  Cache(#[from] CacheError),
}

/// Terminal causes of the event subscriber loop.
///
/// Any of these means the node's registry can no longer be trusted to track
/// the store; the supervisor restarts the node rather than resubscribing
/// in-process.
#[derive(Error, Debug)]
pub enum SubscribeError {
  #[error("failed to subscribe to change topic: {0}")]
  Subscribe(#[source] CacheError),
  #[error("change subscription stream failed: {0}")]
  Stream(#[source] CacheError),
  #[error("change subscription stream ended")]
  Ended,
}

/// Errors that abort node startup.
#[derive(Error, Debug)]
pub enum StartupError {
  #[error("job store unreachable: {0}")]
  Store(#[source] StoreError),
  #[error("cache service unreachable: {0}")]
  Cache(#[source] CacheError),
  #[error("failed to load jobs into the registry: {0}")]
  Load(#[source] RegistryError),
}

/// Errors from the node's run/shutdown lifecycle.
#[derive(Error, Debug)]
pub enum NodeError {
  #[error(transparent)]
  Startup(#[from] StartupError),
  #[error("event subscription terminated: {0}")]
  Subscription(#[source] SubscribeError),
  #[error("timed out waiting for in-flight runs to drain")]
  DrainTimeout,
}
