use crate::error::CacheError;

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;

/// Stream of `(topic, payload)` messages yielded by a subscription.
///
/// A `Some(Err(_))` item or the end of the stream is a subscription-level
/// failure; the consumer is expected to tear down rather than resubscribe
/// silently.
pub type MessageStream = BoxStream<'static, Result<(String, Vec<u8>), CacheError>>;

/// The shared cache service every node talks to (Redis in production).
///
/// Only the operations the core needs are specified; the concrete client
/// wiring lives with the host. Two operations carry atomicity requirements
/// that implementations must honor:
///
/// - [`set_if_absent`](CacheService::set_if_absent) is the lock acquisition
///   primitive and must be a single atomic check-and-set with expiry
///   (Redis `SET NX EX`).
/// - [`delete_if_equals`](CacheService::delete_if_equals) must compare and
///   delete atomically (a Lua `get`/`del` script) — a plain get-then-delete
///   reintroduces the race the operation exists to close.
#[async_trait]
pub trait CacheService: Send + Sync {
  async fn exists(&self, key: &str) -> Result<bool, CacheError>;

  /// Sets `key = value` with `ttl` only if the key is absent. Returns
  /// whether the set happened.
  async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration)
    -> Result<bool, CacheError>;

  /// Re-arms the key's expiry. Returns false when the key no longer exists.
  async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, CacheError>;

  async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

  /// Deletes `key` iff its current value equals `value`. Returns whether a
  /// deletion happened.
  async fn delete_if_equals(&self, key: &str, value: &str) -> Result<bool, CacheError>;

  async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), CacheError>;

  async fn subscribe(&self, topic: &str) -> Result<MessageStream, CacheError>;

  /// Connectivity probe used at node startup.
  async fn ping(&self) -> Result<(), CacheError>;
}
