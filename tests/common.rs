//! tests/common.rs
//! Shared fakes and helpers: in-memory `JobStore` and `CacheService`
//! implementations with just enough behavior (TTLs, pub/sub fan-out,
//! forced expiry) to exercise the core against them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chime::{
  CacheError, CacheService, Job, JobPage, JobPatch, JobPayload, JobQuery, JobRun, JobStatus,
  JobStore, LockConfig, MessageStream, Messenger, NodeConfig, RunPage, RunQuery, StoreError,
  TaskExecutor, TimezoneEntry,
};
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use uuid::Uuid;

// Initializes tracing subscriber for test output.
pub fn setup_tracing() {
  // Use try_init to avoid panic if called multiple times
  let _ = tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_test_writer()
    .try_init();
}

// --- In-memory cache service ---

struct CacheEntry {
  value: String,
  expires_at: Option<Instant>,
}

impl CacheEntry {
  fn expired(&self) -> bool {
    matches!(self.expires_at, Some(deadline) if Instant::now() >= deadline)
  }
}

/// Single-process stand-in for the shared cache: TTL-bearing keys with the
/// atomic operations the lock manager needs, plus topic fan-out for the
/// change event tests.
#[derive(Default)]
pub struct MemoryCache {
  entries: Mutex<HashMap<String, CacheEntry>>,
  topics: Mutex<HashMap<String, Vec<mpsc::UnboundedSender<(String, Vec<u8>)>>>>,
  fail_ping: AtomicBool,
}

impl MemoryCache {
  pub fn new() -> Arc<Self> {
    Arc::new(Self::default())
  }

  fn live_value(&self, key: &str) -> Option<String> {
    let mut entries = self.entries.lock();
    match entries.get(key) {
      Some(entry) if entry.expired() => {
        entries.remove(key);
        None
      }
      Some(entry) => Some(entry.value.clone()),
      None => None,
    }
  }

  /// Drops a key as if its TTL elapsed (owner crashed without renewing).
  pub fn force_expire(&self, key: &str) {
    self.entries.lock().remove(key);
  }

  /// Tears down every subscription; active streams end, which subscribers
  /// must treat as a fatal condition.
  pub fn close_subscribers(&self) {
    self.topics.lock().clear();
  }

  pub fn set_fail_ping(&self, fail: bool) {
    self.fail_ping.store(fail, Ordering::SeqCst);
  }
}

#[async_trait]
impl CacheService for MemoryCache {
  async fn exists(&self, key: &str) -> Result<bool, CacheError> {
    Ok(self.live_value(key).is_some())
  }

  async fn set_if_absent(
    &self,
    key: &str,
    value: &str,
    ttl: Duration,
  ) -> Result<bool, CacheError> {
    let mut entries = self.entries.lock();
    if matches!(entries.get(key), Some(entry) if !entry.expired()) {
      return Ok(false);
    }
    entries.insert(
      key.to_string(),
      CacheEntry {
        value: value.to_string(),
        expires_at: Some(Instant::now() + ttl),
      },
    );
    Ok(true)
  }

  async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, CacheError> {
    let mut entries = self.entries.lock();
    match entries.get_mut(key) {
      Some(entry) if !entry.expired() => {
        entry.expires_at = Some(Instant::now() + ttl);
        Ok(true)
      }
      _ => Ok(false),
    }
  }

  async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
    Ok(self.live_value(key))
  }

  async fn delete_if_equals(&self, key: &str, value: &str) -> Result<bool, CacheError> {
    let mut entries = self.entries.lock();
    match entries.get(key) {
      Some(entry) if !entry.expired() && entry.value == value => {
        entries.remove(key);
        Ok(true)
      }
      _ => Ok(false),
    }
  }

  async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), CacheError> {
    let mut topics = self.topics.lock();
    if let Some(subscribers) = topics.get_mut(topic) {
      subscribers.retain(|tx| tx.send((topic.to_string(), payload.to_vec())).is_ok());
    }
    Ok(())
  }

  async fn subscribe(&self, topic: &str) -> Result<MessageStream, CacheError> {
    let (tx, rx) = mpsc::unbounded_channel();
    self
      .topics
      .lock()
      .entry(topic.to_string())
      .or_default()
      .push(tx);
    let stream = futures::stream::unfold(rx, |mut rx| async move {
      rx.recv().await.map(|message| (Ok(message), rx))
    });
    Ok(stream.boxed())
  }

  async fn ping(&self) -> Result<(), CacheError> {
    if self.fail_ping.load(Ordering::SeqCst) {
      return Err(CacheError::Backend("ping refused".to_string()));
    }
    Ok(())
  }
}

// --- In-memory job store ---

#[derive(Default)]
struct StoreState {
  jobs: HashMap<String, Job>,
  runs: Vec<JobRun>,
  timezones: Vec<TimezoneEntry>,
}

#[derive(Default)]
pub struct MemoryStore {
  state: Mutex<StoreState>,
}

impl MemoryStore {
  pub fn new() -> Arc<Self> {
    Arc::new(Self::default())
  }

  pub fn run_count(&self, job_id: &str) -> usize {
    self
      .state
      .lock()
      .runs
      .iter()
      .filter(|run| run.job_id == job_id)
      .count()
  }

  pub fn runs_for(&self, job_id: &str) -> Vec<JobRun> {
    self
      .state
      .lock()
      .runs
      .iter()
      .filter(|run| run.job_id == job_id)
      .cloned()
      .collect()
  }

  pub fn add_timezone(&self, value: &str, label: &str) {
    let mut state = self.state.lock();
    state.timezones.push(TimezoneEntry {
      id: Uuid::new_v4().simple().to_string(),
      value: value.to_string(),
      label: label.to_string(),
      created_at: 0,
      updated_at: 0,
    });
  }
}

#[async_trait]
impl JobStore for MemoryStore {
  async fn list_jobs(&self, query: &JobQuery) -> Result<JobPage, StoreError> {
    let state = self.state.lock();
    let mut matched: Vec<Job> = state
      .jobs
      .values()
      .filter(|job| match &query.name {
        Some(needle) => job.name.contains(needle),
        None => true,
      })
      .filter(|job| match query.disabled {
        Some(disabled) => job.disabled == disabled,
        None => true,
      })
      .cloned()
      .collect();
    matched.sort_by(|a, b| a.id.cmp(&b.id));
    let total = matched.len() as u64;
    let (skip, limit) = query.page.clamped();
    let jobs = matched
      .into_iter()
      .skip(skip as usize)
      .take(limit as usize)
      .collect();
    Ok(JobPage { jobs, total })
  }

  async fn get_job(&self, id: &str) -> Result<Job, StoreError> {
    self
      .state
      .lock()
      .jobs
      .get(id)
      .cloned()
      .ok_or(StoreError::NotFound)
  }

  async fn insert_job(&self, job: &Job) -> Result<String, StoreError> {
    let mut job = job.clone();
    if job.id.is_empty() {
      job.id = Uuid::new_v4().simple().to_string();
    }
    let id = job.id.clone();
    self.state.lock().jobs.insert(id.clone(), job);
    Ok(id)
  }

  async fn update_job(&self, id: &str, patch: &JobPatch) -> Result<(), StoreError> {
    let mut state = self.state.lock();
    let job = state.jobs.get_mut(id).ok_or(StoreError::NotFound)?;
    patch.apply(job);
    Ok(())
  }

  async fn delete_job(&self, id: &str) -> Result<(), StoreError> {
    self
      .state
      .lock()
      .jobs
      .remove(id)
      .map(|_| ())
      .ok_or(StoreError::NotFound)
  }

  async fn insert_run(&self, run: &JobRun) -> Result<(), StoreError> {
    self.state.lock().runs.push(run.clone());
    Ok(())
  }

  async fn list_runs(&self, query: &RunQuery) -> Result<RunPage, StoreError> {
    let state = self.state.lock();
    let matched: Vec<JobRun> = state
      .runs
      .iter()
      .filter(|run| match &query.job_id {
        Some(job_id) => &run.job_id == job_id,
        None => true,
      })
      .filter(|run| query.since.map_or(true, |ts| run.created_at >= ts))
      .filter(|run| query.until.map_or(true, |ts| run.created_at < ts))
      .cloned()
      .collect();
    let total = matched.len() as u64;
    let (skip, limit) = query.page.clamped();
    let runs = matched
      .into_iter()
      .skip(skip as usize)
      .take(limit as usize)
      .collect();
    Ok(RunPage { runs, total })
  }

  async fn delete_runs(&self, query: &RunQuery) -> Result<u64, StoreError> {
    let mut state = self.state.lock();
    let before = state.runs.len();
    state.runs.retain(|run| {
      let in_window = query.since.map_or(true, |ts| run.created_at >= ts)
        && query.until.map_or(true, |ts| run.created_at < ts)
        && query.job_id.as_ref().map_or(true, |id| &run.job_id == id);
      !in_window
    });
    Ok((before - state.runs.len()) as u64)
  }

  async fn list_timezones(&self) -> Result<Vec<TimezoneEntry>, StoreError> {
    Ok(self.state.lock().timezones.clone())
  }

  async fn ping(&self) -> Result<(), StoreError> {
    Ok(())
  }
}

// --- Builders ---

/// Lock tuning fast enough for tests: no jitter, sub-second TTLs.
pub fn fast_lock_config() -> LockConfig {
  LockConfig {
    prefix: "test:lease".to_string(),
    ttl: Duration::from_millis(400),
    renew_interval: Duration::from_millis(100),
    acquire_jitter: Duration::ZERO,
    release_grace: Duration::from_millis(100),
  }
}

/// Node configuration matching `fast_lock_config`.
pub fn fast_node_config() -> NodeConfig {
  NodeConfig {
    lock_prefix: "test:lease".to_string(),
    lock_ttl_secs: 1,
    lock_renew_secs: 1,
    acquire_jitter_ms: 0,
    release_grace_ms: 100,
    topic: "test:events".to_string(),
    shutdown_grace_secs: 5,
    ..NodeConfig::default()
  }
}

pub fn shell_job(id: &str, expression: &str, command: &str) -> Job {
  Job {
    id: id.to_string(),
    name: format!("job-{id}"),
    disabled: false,
    expression: expression.to_string(),
    timezone: String::new(),
    payload: JobPayload::Shell {
      command: command.to_string(),
    },
    timeout: 0,
    log_enabled: true,
    status: JobStatus::Pending,
    created_at: 0,
    updated_at: 0,
  }
}

pub fn make_executor(store: Arc<MemoryStore>, cache: Arc<MemoryCache>) -> Arc<TaskExecutor> {
  let (messenger, receiver) = Messenger::new(64);
  // Tests that care about the fan-out build their own messenger; here the
  // receiver is simply dropped and publishes become no-ops.
  drop(receiver);
  Arc::new(TaskExecutor::new(
    store,
    chime::LockManager::new(cache, fast_lock_config()),
    messenger,
    chrono_tz::UTC,
  ))
}
