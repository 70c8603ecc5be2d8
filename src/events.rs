use crate::cache::CacheService;
use crate::error::{EventError, SubscribeError};
use crate::job::JobId;
use crate::registry::CronRegistry;

use std::sync::Arc;

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

// --- Wire Format ---

/// What happened to a job's authoritative record. The numeric codes are the
/// wire contract shared by every publisher and subscriber; they never
/// change meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
  Create,
  Modify,
  Disable,
  Delete,
}

impl ChangeKind {
  pub fn code(self) -> u32 {
    match self {
      ChangeKind::Create => 1,
      ChangeKind::Modify => 2,
      ChangeKind::Disable => 3,
      ChangeKind::Delete => 4,
    }
  }

  pub fn from_code(code: u32) -> Result<Self, EventError> {
    match code {
      1 => Ok(ChangeKind::Create),
      2 => Ok(ChangeKind::Modify),
      3 => Ok(ChangeKind::Disable),
      4 => Ok(ChangeKind::Delete),
      other => Err(EventError::UnknownCode(other)),
    }
  }
}

/// A compact change notification: event kind plus job id, nothing else.
///
/// Appliers re-fetch the document — delivery is unordered and possibly
/// duplicated, so current store state is the only content worth trusting.
/// Exists only on the wire; never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
  pub kind: ChangeKind,
  pub job_id: JobId,
}

/// On-wire shape: `{event: u32, job_id: string}`, bincode-encoded.
#[derive(Serialize, Deserialize)]
struct WireEvent {
  event: u32,
  job_id: String,
}

impl ChangeEvent {
  pub fn new(kind: ChangeKind, job_id: impl Into<JobId>) -> Self {
    Self {
      kind,
      job_id: job_id.into(),
    }
  }

  pub fn encode(&self) -> Result<Vec<u8>, EventError> {
    let wire = WireEvent {
      event: self.kind.code(),
      job_id: self.job_id.clone(),
    };
    bincode::serde::encode_to_vec(&wire, bincode::config::standard())
      .map_err(|e| EventError::Codec(e.to_string()))
  }

  pub fn decode(bytes: &[u8]) -> Result<Self, EventError> {
    let (wire, _): (WireEvent, usize) =
      bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map_err(|e| EventError::Codec(e.to_string()))?;
    Ok(Self {
      kind: ChangeKind::from_code(wire.event)?,
      job_id: wire.job_id,
    })
  }
}

// --- Publisher ---

/// Publishes change notifications after successful administrative
/// mutations. This is the one contract the admin layer owes the core:
/// every mutation that changes a job's registration status publishes on
/// success.
///
/// Honors the global propagation switch — with propagation off, publishes
/// become silent no-ops and nodes only converge through restarts.
#[derive(Clone)]
pub struct EventPublisher {
  cache: Arc<dyn CacheService>,
  topic: String,
  propagate: bool,
}

impl EventPublisher {
  pub fn new(cache: Arc<dyn CacheService>, topic: impl Into<String>, propagate: bool) -> Self {
    Self {
      cache,
      topic: topic.into(),
      propagate,
    }
  }

  pub async fn publish(&self, kind: ChangeKind, job_id: &str) -> Result<(), EventError> {
    if !self.propagate {
      debug!(?kind, %job_id, "event propagation disabled, skipping publish");
      return Ok(());
    }
    let payload = ChangeEvent::new(kind, job_id).encode()?;
    self.cache.publish(&self.topic, &payload).await?;
    debug!(?kind, %job_id, topic = %self.topic, "published change event");
    Ok(())
  }
}

// --- Subscriber ---

/// One node's long-lived subscription to the change topic.
///
/// Message-level decode failures are logged and skipped. Subscription-level
/// failures terminate the loop and are returned to the caller — the
/// supervisor restarts the node rather than letting it run with a registry
/// that silently stopped tracking the store.
pub struct EventSubscriber {
  cache: Arc<dyn CacheService>,
  registry: CronRegistry,
  topic: String,
}

impl EventSubscriber {
  pub fn new(cache: Arc<dyn CacheService>, registry: CronRegistry, topic: impl Into<String>) -> Self {
    Self {
      cache,
      registry,
      topic: topic.into(),
    }
  }

  /// Runs the subscription loop until it fails. The returned error is the
  /// terminal cause; there is no non-error way out.
  pub async fn run(&self) -> SubscribeError {
    let mut stream = match self.cache.subscribe(&self.topic).await {
      Ok(stream) => stream,
      Err(cause) => return SubscribeError::Subscribe(cause),
    };
    info!(topic = %self.topic, "subscribed to change topic");

    loop {
      match stream.next().await {
        Some(Ok((_topic, payload))) => {
          let event = match ChangeEvent::decode(&payload) {
            Ok(event) => event,
            Err(cause) => {
              warn!(error = %cause, "dropping undecodable change event");
              continue;
            }
          };
          if let Err(cause) = self.registry.apply_event(&event).await {
            // Event application errors are per-message; the subscription
            // itself is still healthy.
            error!(
              kind = ?event.kind,
              job_id = %event.job_id,
              error = %cause,
              "failed to apply change event"
            );
          }
        }
        Some(Err(cause)) => return SubscribeError::Stream(cause),
        None => return SubscribeError::Ended,
      }
    }
  }
}
