use crate::cache::CacheService;
use crate::error::LockError;

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::oneshot;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace, warn};
use uuid::Uuid;

// --- Configuration ---

/// Tuning for the distributed execution lock.
#[derive(Debug, Clone)]
pub struct LockConfig {
  /// Key prefix; the full key is `"{prefix}:{job_id}"`.
  pub prefix: String,
  /// Time-to-live stamped on the key at acquisition and on every renewal.
  pub ttl: Duration,
  /// Renewal period. Must be comfortably below `ttl`; TTL/3 is the usual
  /// choice.
  pub renew_interval: Duration,
  /// Upper bound of the random sleep before an acquisition attempt.
  /// Desynchronizes nodes whose clocks drifted and would otherwise race
  /// on the same tick.
  pub acquire_jitter: Duration,
  /// Pause between the done signal and the compare-and-delete release,
  /// covering the window where the lease expired right at completion and
  /// another node already re-acquired.
  pub release_grace: Duration,
}

impl Default for LockConfig {
  fn default() -> Self {
    Self {
      prefix: "chime:lease".to_string(),
      ttl: Duration::from_secs(60),
      renew_interval: Duration::from_secs(20),
      acquire_jitter: Duration::from_millis(1000),
      release_grace: Duration::from_secs(1),
    }
  }
}

// --- Lease Guard ---

/// Ownership of one acquired lock, alive for the duration of one run.
///
/// Dropping the guard (or calling [`release`](LeaseGuard::release)) signals
/// the lease-renewal task that the run is done; the task then waits the
/// release grace period and removes the key with an atomic
/// "delete iff the value is still mine". Because the signal rides on
/// `Drop`, the lock is released even when the job body errors out early.
#[derive(Debug)]
pub struct LeaseGuard {
  done: Option<oneshot::Sender<()>>,
  key: String,
}

impl LeaseGuard {
  /// The full cache key this lease owns. Exposed for logging.
  pub fn key(&self) -> &str {
    &self.key
  }

  /// Explicitly signals run completion. Equivalent to dropping the guard.
  pub fn release(mut self) {
    self.signal_done();
  }

  fn signal_done(&mut self) {
    if let Some(done) = self.done.take() {
      let _ = done.send(());
    }
  }
}

impl Drop for LeaseGuard {
  fn drop(&mut self) {
    self.signal_done();
  }
}

// --- Lock Manager ---

/// Acquires and maintains per-job mutual-exclusion tokens in the shared
/// cache, so that each scheduled occurrence executes on at most one node.
///
/// The guarantee is at-most-one under normal operation. The release path's
/// grace-then-compare-and-delete closes the common completion races but is
/// not a proof of exclusion under arbitrary scheduler stalls; a run that
/// outlives its lease without renewing (e.g. a node frozen longer than the
/// TTL) can overlap with the next owner.
#[derive(Clone)]
pub struct LockManager {
  cache: Arc<dyn CacheService>,
  config: Arc<LockConfig>,
}

impl LockManager {
  pub fn new(cache: Arc<dyn CacheService>, config: LockConfig) -> Self {
    Self {
      cache,
      config: Arc::new(config),
    }
  }

  /// Attempts to take ownership of `job_id`'s current occurrence.
  ///
  /// Returns [`LockError::WaitForNextSchedule`] when another node already
  /// holds the key — the caller skips this tick. Cache failures are real
  /// errors: the occurrence is skipped and retried on the next tick.
  pub async fn acquire(&self, job_id: &str) -> Result<LeaseGuard, LockError> {
    let jitter_ms = {
      let mut rng = rand::thread_rng();
      rng.gen_range(0..=self.config.acquire_jitter.as_millis() as u64)
    };
    if jitter_ms > 0 {
      tokio::time::sleep(Duration::from_millis(jitter_ms)).await;
    }

    let key = format!("{}:{}", self.config.prefix, job_id);
    let nonce = Uuid::new_v4().simple().to_string();
    let value = format!("{job_id}:{nonce}");

    // Fast path: a visible key means the occurrence is already owned. The
    // set-if-absent below is the authoritative, race-safe check.
    if self.cache.exists(&key).await? {
      debug!(%key, "lock held elsewhere, waiting for next schedule");
      return Err(LockError::WaitForNextSchedule);
    }
    if !self
      .cache
      .set_if_absent(&key, &value, self.config.ttl)
      .await?
    {
      debug!(%key, "lost acquisition race, waiting for next schedule");
      return Err(LockError::WaitForNextSchedule);
    }

    trace!(%key, "lock acquired");
    let (done_tx, done_rx) = oneshot::channel();
    tokio::spawn(lease_loop(
      self.cache.clone(),
      self.config.clone(),
      key.clone(),
      value,
      done_rx,
    ));

    Ok(LeaseGuard {
      done: Some(done_tx),
      key,
    })
  }
}

/// Keeps one acquired key alive until the run completes, then releases it.
///
/// Runs as its own task per in-flight lock. Renewal failures are logged and
/// retried on the next tick; if renewals keep failing long enough for the
/// TTL to lapse, the lock expires mid-run — an accepted limitation.
async fn lease_loop(
  cache: Arc<dyn CacheService>,
  config: Arc<LockConfig>,
  key: String,
  value: String,
  mut done: oneshot::Receiver<()>,
) {
  // interval() panics on a zero period; clamp misconfigured renewals.
  let mut tick = tokio::time::interval(config.renew_interval.max(Duration::from_millis(1)));
  tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
  tick.tick().await; // the first tick completes immediately

  loop {
    tokio::select! {
      // A dropped sender counts as done too: the guard signals on Drop, and
      // even an aborted owner task must not leave the renewal loop running.
      _ = &mut done => {
        tokio::time::sleep(config.release_grace).await;
        match cache.delete_if_equals(&key, &value).await {
          Ok(true) => trace!(%key, "lease released"),
          Ok(false) => debug!(%key, "lease no longer ours, leaving key in place"),
          Err(error) => warn!(%key, %error, "failed to release lease"),
        }
        break;
      }
      _ = tick.tick() => {
        match cache.expire(&key, config.ttl).await {
          Ok(true) => trace!(%key, "lease renewed"),
          Ok(false) => warn!(%key, "lease key vanished during renewal; lock may have expired mid-run"),
          Err(error) => warn!(%key, %error, "lease renewal failed, retrying next interval"),
        }
      }
    }
  }
}
