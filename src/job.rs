use crate::error::ScheduleError;
use crate::schedule::ScheduleSpec;

use chrono::Utc;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// --- Public Type Aliases ---

/// Identifier of a job document. Opaque and store-assigned (a hex object id,
/// a UUID — whatever the backing store hands out).
pub type JobId = String;

/// Identifier of a run log document.
pub type RunId = String;

// --- Core Job Structures ---

/// How a job's work is carried out when an occurrence fires.
///
/// Decoded at the store boundary into a tagged union so the executor never
/// inspects loosely-typed payload maps at run time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobPayload {
  /// Run a command line through `sh -c`, capturing stdout/stderr.
  Shell { command: String },
  /// Dispatch an HTTP request; the response body is the captured output.
  Http {
    /// Scheme + authority, e.g. `http://reports.internal:8080`.
    endpoint: String,
    /// Path prefix appended to the endpoint to form the request URL.
    prefix: String,
    method: HttpMethod,
    /// Body template. The executor injects a `timestamp` field computed in
    /// the job's timezone before serialization.
    #[serde(default)]
    body: serde_json::Map<String, serde_json::Value>,
  },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
  Get,
  Post,
}

/// Coarse outcome of the most recent run, written back onto the job
/// document by the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
  Pending,
  Started,
  Success,
  Failure,
}

impl Default for JobStatus {
  fn default() -> Self {
    JobStatus::Pending
  }
}

/// A recurring unit of work: a cron-style schedule, a timezone, and a
/// shell or HTTP payload.
///
/// Authoritative copies live in the job store; nodes only ever hold
/// re-fetched snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
  /// Store-assigned identity. Empty until the document is inserted.
  #[serde(default)]
  pub id: JobId,
  pub name: String,
  /// Disabled jobs stay in the store but are never registered with any
  /// node's schedule engine.
  #[serde(default)]
  pub disabled: bool,
  /// Cron expression with an optional seconds field, descriptors
  /// (`@daily` …), or the `@every <dur>` shorthand.
  pub expression: String,
  /// IANA zone name the expression is evaluated in. Validated against the
  /// supported-timezone set at creation time.
  #[serde(default)]
  pub timezone: String,
  pub payload: JobPayload,
  /// Per-occurrence timeout in seconds. Zero means unbounded.
  #[serde(default)]
  pub timeout: u64,
  /// When set, every run appends a [`JobRun`] document.
  #[serde(default)]
  pub log_enabled: bool,
  #[serde(default)]
  pub status: JobStatus,
  #[serde(default)]
  pub created_at: i64,
  #[serde(default)]
  pub updated_at: i64,
}

impl Job {
  /// Parses the job's schedule expression.
  pub fn schedule(&self) -> Result<ScheduleSpec, ScheduleError> {
    ScheduleSpec::parse(&self.expression)
  }

  /// Resolves the job's timezone, falling back to `default` when the job
  /// carries none.
  pub fn timezone_or(&self, default: Tz) -> Result<Tz, ScheduleError> {
    if self.timezone.is_empty() {
      return Ok(default);
    }
    self
      .timezone
      .parse::<Tz>()
      .map_err(|_| ScheduleError::UnknownTimezone(self.timezone.clone()))
  }
}

// --- Run Logs ---

/// One recorded job occurrence. Append-only; never mutated after creation.
///
/// HTTP runs store the response body in `stdout` and leave `stderr` empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRun {
  pub id: RunId,
  pub job_id: JobId,
  pub stdout: String,
  pub stderr: String,
  pub started_at: i64,
  pub ended_at: i64,
  pub created_at: i64,
}

impl JobRun {
  pub fn new(
    job_id: &str,
    stdout: String,
    stderr: String,
    started_at: i64,
    ended_at: i64,
  ) -> Self {
    Self {
      id: Uuid::new_v4().simple().to_string(),
      job_id: job_id.to_string(),
      stdout,
      stderr,
      started_at,
      ended_at,
      created_at: Utc::now().timestamp(),
    }
  }
}

// --- Supported Timezones ---

/// Immutable reference data: one IANA zone a job is allowed to use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimezoneEntry {
  pub id: String,
  /// Canonical IANA name, e.g. `Asia/Shanghai`.
  pub value: String,
  /// Display label for administrative UIs.
  pub label: String,
  #[serde(default)]
  pub created_at: i64,
  #[serde(default)]
  pub updated_at: i64,
}

// --- Queries ---

/// Pagination parameters shared by list queries. Stores clamp `index` to at
/// least 1 and `count` to at least 1 (defaulting to 10 when zero).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Page {
  #[serde(default)]
  pub index: u64,
  #[serde(default)]
  pub count: u64,
  /// Field to sort by, descending. Store-interpreted.
  #[serde(default)]
  pub order: Option<String>,
}

impl Page {
  /// Returns `(skip, limit)` with the store-side defaults applied.
  pub fn clamped(&self) -> (u64, u64) {
    let count = if self.count < 1 { 10 } else { self.count };
    let index = if self.index < 1 { 1 } else { self.index };
    ((index - 1) * count, count)
  }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobQuery {
  #[serde(flatten)]
  pub page: Page,
  /// Substring match on the job name.
  #[serde(default)]
  pub name: Option<String>,
  #[serde(default)]
  pub disabled: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunQuery {
  #[serde(flatten)]
  pub page: Page,
  #[serde(default)]
  pub job_id: Option<JobId>,
  /// Inclusive lower bound on `created_at`.
  #[serde(default)]
  pub since: Option<i64>,
  /// Exclusive upper bound on `created_at`.
  #[serde(default)]
  pub until: Option<i64>,
}

/// One page of jobs plus the total match count (for pagination UIs).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobPage {
  pub jobs: Vec<Job>,
  pub total: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunPage {
  pub runs: Vec<JobRun>,
  pub total: u64,
}
