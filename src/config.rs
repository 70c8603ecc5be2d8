use crate::lock::LockConfig;

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Everything a node needs from its host's configuration. Loading (file
/// format, env overrides, watching) is the host's concern; any format that
/// deserializes into this struct works.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
  /// Lock key prefix; full keys are `"{lock_prefix}:{job_id}"`.
  pub lock_prefix: String,
  /// Lock TTL in seconds.
  pub lock_ttl_secs: u64,
  /// Lease renewal period in seconds. Keep well below the TTL.
  pub lock_renew_secs: u64,
  /// Upper bound of the pre-acquisition jitter sleep, in milliseconds.
  pub acquire_jitter_ms: u64,
  /// Pause before the compare-and-delete release, in milliseconds.
  pub release_grace_ms: u64,
  /// Pub/sub topic carrying change events.
  pub topic: String,
  /// Global switch for event propagation. Off means mutations still hit
  /// the store but nodes only converge via restart.
  pub propagate_events: bool,
  /// Fallback IANA zone for jobs without one of their own.
  pub default_timezone: String,
  /// Capacity of the live output message stream.
  pub message_buffer: usize,
  /// How long shutdown waits for in-flight runs before giving up.
  pub shutdown_grace_secs: u64,
}

impl Default for NodeConfig {
  fn default() -> Self {
    Self {
      lock_prefix: "chime:lease".to_string(),
      lock_ttl_secs: 60,
      lock_renew_secs: 20,
      acquire_jitter_ms: 1000,
      release_grace_ms: 1000,
      topic: "chime:events".to_string(),
      propagate_events: true,
      default_timezone: "UTC".to_string(),
      message_buffer: 1000,
      shutdown_grace_secs: 30,
    }
  }
}

impl NodeConfig {
  pub fn lock_config(&self) -> LockConfig {
    LockConfig {
      prefix: self.lock_prefix.clone(),
      ttl: Duration::from_secs(self.lock_ttl_secs),
      renew_interval: Duration::from_secs(self.lock_renew_secs),
      acquire_jitter: Duration::from_millis(self.acquire_jitter_ms),
      release_grace: Duration::from_millis(self.release_grace_ms),
    }
  }

  pub fn shutdown_grace(&self) -> Duration {
    Duration::from_secs(self.shutdown_grace_secs)
  }
}
