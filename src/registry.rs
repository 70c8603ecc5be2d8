use crate::engine::{CronEngine, EntryId, TriggerFn};
use crate::error::{RegistryError, RunError, StoreError};
use crate::events::{ChangeEvent, ChangeKind};
use crate::executor::{RunOutcome, TaskExecutor};
use crate::job::{Job, JobId, JobQuery, Page};
use crate::store::JobStore;

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use chrono_tz::Tz;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

const LOAD_PAGE_SIZE: u64 = 200;

/// A node's in-memory mapping from job id to its local schedule-engine
/// entry, plus the logic that keeps it consistent with the store.
///
/// The map is the only node-local mutable shared structure; one mutex
/// serializes every mutation, whether it comes from the initial load, the
/// event subscriber, or an administrative trigger. Per job id the states
/// are just `absent` and `scheduled`: disable/delete moves to `absent`,
/// modify re-adds in place (remove-then-add, since the engine cannot edit
/// an entry's expression).
///
/// Cheaply cloneable; clones share state.
#[derive(Clone)]
pub struct CronRegistry {
  inner: Arc<RegistryInner>,
}

struct RegistryInner {
  engine: CronEngine,
  entries: Mutex<HashMap<JobId, EntryId>>,
  store: Arc<dyn JobStore>,
  executor: Arc<TaskExecutor>,
  default_tz: Tz,
}

impl CronRegistry {
  pub fn new(store: Arc<dyn JobStore>, executor: Arc<TaskExecutor>, default_tz: Tz) -> Self {
    Self {
      inner: Arc::new(RegistryInner {
        engine: CronEngine::new(),
        entries: Mutex::new(HashMap::new()),
        store,
        executor,
        default_tz,
      }),
    }
  }

  /// Schedules a job with the local engine, replacing any existing entry.
  pub fn add(&self, job: &Job) -> Result<(), RegistryError> {
    let spec = job.schedule()?;
    let tz = job.timezone_or(self.inner.default_tz)?;
    let trigger = self.trigger_for(job);

    let mut entries = self.inner.entries.lock();
    if let Some(old) = entries.remove(&job.id) {
      self.inner.engine.remove(old);
    }
    let entry = self.inner.engine.add(spec, tz, trigger);
    entries.insert(job.id.clone(), entry);
    info!(
      job_id = %job.id,
      name = %job.name,
      expression = %job.expression,
      %tz,
      entry,
      "scheduled job"
    );
    Ok(())
  }

  /// Unschedules a job. Absent ids are a no-op — duplicate and
  /// out-of-order events must be harmless.
  pub fn remove(&self, job_id: &str) {
    self.inner.remove(job_id)
  }

  pub fn is_scheduled(&self, job_id: &str) -> bool {
    self.inner.entries.lock().contains_key(job_id)
  }

  pub fn len(&self) -> usize {
    self.inner.entries.lock().len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Applies one change notification.
  ///
  /// `Create`/`Modify` re-fetch the document by id rather than trusting
  /// anything beyond the id — event delivery is unordered, so only current
  /// store state is safe to act on. A missing document on `Delete` is the
  /// expected case (the row is already gone) and counts as success.
  pub async fn apply_event(&self, event: &ChangeEvent) -> Result<(), RegistryError> {
    debug!(kind = ?event.kind, job_id = %event.job_id, "applying change event");
    match event.kind {
      ChangeKind::Delete | ChangeKind::Disable => {
        self.inner.remove(&event.job_id);
        Ok(())
      }
      ChangeKind::Create | ChangeKind::Modify => {
        let job = match self.inner.store.get_job(&event.job_id).await {
          Ok(job) => job,
          Err(StoreError::NotFound) => {
            warn!(job_id = %event.job_id, "job in change event no longer exists, skipping");
            return Ok(());
          }
          Err(other) => return Err(other.into()),
        };
        if job.disabled {
          // A disabled job must never hold a live entry, whatever order
          // its events arrived in.
          self.inner.remove(&job.id);
          Ok(())
        } else {
          self.add(&job)
        }
      }
    }
  }

  /// Startup path: pages through every stored job and schedules the
  /// enabled ones. Jobs that fail to parse are logged and skipped; they
  /// were validated at creation, so a failure here means the stored
  /// document was corrupted out-of-band.
  pub async fn load_all(&self) -> Result<usize, RegistryError> {
    let mut added = 0usize;
    let mut index = 1u64;
    loop {
      let query = JobQuery {
        page: Page {
          index,
          count: LOAD_PAGE_SIZE,
          order: None,
        },
        ..Default::default()
      };
      let page = self.inner.store.list_jobs(&query).await?;
      let fetched = page.jobs.len() as u64;
      for job in &page.jobs {
        if job.disabled {
          debug!(job_id = %job.id, name = %job.name, "skipping disabled job");
          continue;
        }
        match self.add(job) {
          Ok(()) => added += 1,
          Err(cause) => {
            error!(job_id = %job.id, name = %job.name, error = %cause, "failed to schedule stored job")
          }
        }
      }
      if fetched < LOAD_PAGE_SIZE {
        break;
      }
      index += 1;
    }
    info!(added, "registry loaded from store");
    Ok(added)
  }

  /// Stops the underlying engine: no further occurrences fire.
  pub fn stop(&self) {
    self.inner.engine.stop();
  }

  /// Resolves once in-flight occurrences have finished. Meaningful after
  /// [`stop`](CronRegistry::stop).
  pub async fn drained(&self) {
    self.inner.engine.drained().await;
  }

  /// Builds the closure the engine fires for this job. Holds only a weak
  /// reference back to the registry so dangling entry timers cannot keep
  /// a dropped registry alive.
  fn trigger_for(&self, job: &Job) -> TriggerFn {
    let registry: Weak<RegistryInner> = Arc::downgrade(&self.inner);
    let job_id = job.id.clone();
    let job_name = job.name.clone();
    Arc::new(move || {
      let registry = registry.clone();
      let job_id = job_id.clone();
      let job_name = job_name.clone();
      Box::pin(async move {
        let Some(registry) = registry.upgrade() else {
          return;
        };
        match registry.executor.run(&job_id).await {
          Ok(RunOutcome::Completed) => {}
          Ok(RunOutcome::Skipped) => {
            debug!(%job_id, name = %job_name, "occurrence owned by another node");
          }
          Err(RunError::JobNotFound(_)) => {
            info!(
              %job_id,
              name = %job_name,
              "job vanished from the store, removing local schedule entry"
            );
            registry.remove(&job_id);
          }
          Err(cause) => {
            error!(%job_id, name = %job_name, error = %cause, "job occurrence failed");
          }
        }
      }) as BoxFuture<'static, ()>
    })
  }
}

impl RegistryInner {
  fn remove(&self, job_id: &str) {
    let mut entries = self.entries.lock();
    match entries.remove(job_id) {
      Some(entry) => {
        self.engine.remove(entry);
        info!(%job_id, entry, "removed schedule entry");
      }
      None => debug!(%job_id, "no schedule entry to remove"),
    }
  }
}
