use crate::schedule::ScheduleSpec;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use chrono_tz::Tz;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, trace};

/// Opaque handle to one registered schedule entry. Never zero.
pub type EntryId = u64;

/// The closure fired on every occurrence of an entry. Each invocation runs
/// on its own task; slow occurrences never delay other entries.
pub type TriggerFn = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// The node-local schedule engine.
///
/// Every entry gets a timer task that computes the next occurrence of its
/// schedule in its timezone, sleeps until then, and spawns the trigger
/// closure. Engines do not support editing an entry in place — callers
/// remove and re-add (the registry's modify path relies on this).
#[derive(Clone)]
pub struct CronEngine {
  inner: Arc<EngineInner>,
}

struct EngineInner {
  next_entry: AtomicU64,
  entries: Mutex<HashMap<EntryId, CancellationToken>>,
  /// Tracks in-flight trigger executions, not timers; `drained` resolves
  /// once every spawned occurrence has finished.
  tracker: TaskTracker,
  root: CancellationToken,
}

impl CronEngine {
  pub fn new() -> Self {
    Self {
      inner: Arc::new(EngineInner {
        next_entry: AtomicU64::new(1),
        entries: Mutex::new(HashMap::new()),
        tracker: TaskTracker::new(),
        root: CancellationToken::new(),
      }),
    }
  }

  /// Registers a schedule and returns the entry id for later removal.
  pub fn add(&self, spec: ScheduleSpec, tz: Tz, trigger: TriggerFn) -> EntryId {
    let entry = self.inner.next_entry.fetch_add(1, Ordering::Relaxed);
    let token = self.inner.root.child_token();
    self.inner.entries.lock().insert(entry, token.clone());

    let tracker = self.inner.tracker.clone();
    tokio::spawn(async move {
      entry_loop(entry, spec, tz, trigger, token, tracker).await;
    });
    entry
  }

  /// Unregisters an entry. Unknown ids are a no-op.
  pub fn remove(&self, entry: EntryId) {
    if let Some(token) = self.inner.entries.lock().remove(&entry) {
      token.cancel();
      debug!(entry, "schedule entry cancelled");
    }
  }

  /// Stops all timers; no further occurrences fire. In-flight occurrences
  /// keep running — await [`drained`](CronEngine::drained) for those.
  pub fn stop(&self) {
    self.inner.root.cancel();
    self.inner.entries.lock().clear();
    self.inner.tracker.close();
  }

  /// Resolves once every in-flight occurrence has completed. Only
  /// meaningful after [`stop`](CronEngine::stop).
  pub async fn drained(&self) {
    self.inner.tracker.wait().await;
  }
}

impl Default for CronEngine {
  fn default() -> Self {
    Self::new()
  }
}

async fn entry_loop(
  entry: EntryId,
  spec: ScheduleSpec,
  tz: Tz,
  trigger: TriggerFn,
  token: CancellationToken,
  tracker: TaskTracker,
) {
  let mut after = Utc::now();
  loop {
    let Some(next) = spec.next_fire(after, tz) else {
      debug!(entry, "schedule has no further occurrences");
      break;
    };
    let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
    tokio::select! {
      _ = token.cancelled() => break,
      _ = tokio::time::sleep(wait) => {
        trace!(entry, fired_at = %next, "entry fired");
        tracker.spawn(trigger());
        after = next;
      }
    }
  }
  trace!(entry, "entry timer stopped");
}
