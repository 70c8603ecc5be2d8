use crate::error::{RegistryError, ScheduleError, StoreError};
use crate::job::{
  Job, JobId, JobPage, JobPayload, JobQuery, JobRun, JobStatus, RunQuery, RunPage, TimezoneEntry,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Partial field set for [`JobStore::update_job`].
///
/// `None` leaves a field untouched; administrative updates patch whatever
/// the caller sent, the executor patches only `status`/`updated_at`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobPatch {
  pub name: Option<String>,
  pub disabled: Option<bool>,
  pub expression: Option<String>,
  pub timezone: Option<String>,
  pub payload: Option<JobPayload>,
  pub timeout: Option<u64>,
  pub log_enabled: Option<bool>,
  pub status: Option<JobStatus>,
  pub updated_at: Option<i64>,
}

impl JobPatch {
  /// Applies the patch to a job in place. Store implementations that hold
  /// whole documents (tests, embedded backends) can reuse this instead of
  /// translating to a native partial-update operation.
  pub fn apply(&self, job: &mut Job) {
    if let Some(name) = &self.name {
      job.name = name.clone();
    }
    if let Some(disabled) = self.disabled {
      job.disabled = disabled;
    }
    if let Some(expression) = &self.expression {
      job.expression = expression.clone();
    }
    if let Some(timezone) = &self.timezone {
      job.timezone = timezone.clone();
    }
    if let Some(payload) = &self.payload {
      job.payload = payload.clone();
    }
    if let Some(timeout) = self.timeout {
      job.timeout = timeout;
    }
    if let Some(log_enabled) = self.log_enabled {
      job.log_enabled = log_enabled;
    }
    if let Some(status) = self.status {
      job.status = status;
    }
    if let Some(updated_at) = self.updated_at {
      job.updated_at = updated_at;
    }
  }
}

/// The authoritative document store (MongoDB in production).
///
/// Concrete client wiring is the host's concern; the core only depends on
/// these operations. `get_job` must distinguish a missing document
/// ([`StoreError::NotFound`]) from backend failure — the registry's
/// self-healing and delete-event handling both key off it.
#[async_trait]
pub trait JobStore: Send + Sync {
  /// Filtered, sorted, paginated listing with a total match count.
  async fn list_jobs(&self, query: &JobQuery) -> Result<JobPage, StoreError>;

  async fn get_job(&self, id: &str) -> Result<Job, StoreError>;

  /// Inserts a job and returns its store-assigned id.
  async fn insert_job(&self, job: &Job) -> Result<JobId, StoreError>;

  async fn update_job(&self, id: &str, patch: &JobPatch) -> Result<(), StoreError>;

  async fn delete_job(&self, id: &str) -> Result<(), StoreError>;

  /// Appends a run log document. Run logs are never mutated afterwards.
  async fn insert_run(&self, run: &JobRun) -> Result<(), StoreError>;

  async fn list_runs(&self, query: &RunQuery) -> Result<RunPage, StoreError>;

  /// Prunes run logs matching the query's timestamp window. Administrative
  /// retention path; the executor never deletes.
  async fn delete_runs(&self, query: &RunQuery) -> Result<u64, StoreError>;

  /// The supported-timezone allow-list used to validate `Job::timezone`.
  async fn list_timezones(&self) -> Result<Vec<TimezoneEntry>, StoreError>;

  /// Connectivity probe used at node startup.
  async fn ping(&self) -> Result<(), StoreError>;
}

/// Checks that `timezone` resolves to a real IANA zone *and* is present in
/// the store's supported set.
///
/// Runs at job-creation time; registries resolve zones directly and assume
/// stored jobs already passed this gate.
pub async fn validate_timezone(store: &dyn JobStore, timezone: &str) -> Result<(), RegistryError> {
  crate::schedule::resolve_timezone(timezone)?;
  let supported = store.list_timezones().await?;
  if supported.iter().any(|entry| entry.value == timezone) {
    Ok(())
  } else {
    Err(ScheduleError::UnsupportedTimezone(timezone.to_string()).into())
  }
}
