//! Chime: the core of a distributed cron-style job scheduler.
//!
//! Independent worker nodes each keep a local in-memory schedule of
//! recurring jobs (shell commands or HTTP calls). A shared document store
//! holds the authoritative job definitions and a shared cache service
//! provides the cross-node coordination. Chime is the part every node runs:
//!
//! - [`CronRegistry`] — the per-node map from job id to schedule-engine
//!   entry, with the create/modify/disable/delete lifecycle applied to it.
//! - [`EventSubscriber`] / [`EventPublisher`] — the compact change-event
//!   protocol that converges every node's registry to the store's state
//!   without full resynchronization.
//! - [`LockManager`] — the distributed execution lock (jittered set-NX
//!   acquire, lease renewal, grace-then-compare-and-delete release) that
//!   makes each scheduled occurrence fire on at most one node.
//! - [`TaskExecutor`] — runs one occurrence end-to-end: lock, execute
//!   under timeout, capture output, persist the run.
//! - [`Node`] — a thin supervisor tying the above to a
//!   `new → start → run → shutdown` lifecycle.
//!
//! The store and cache are reached through the [`JobStore`] and
//! [`CacheService`] traits; production wiring (MongoDB, Redis) lives with
//! the host, and tests run against in-memory fakes.
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use chime::{CacheService, JobStore, Node, NodeConfig, NodeError};
//!
//! async fn worker(store: Arc<dyn JobStore>, cache: Arc<dyn CacheService>) -> Result<(), NodeError> {
//!   let mut node = Node::new(NodeConfig::default(), store, cache);
//!   node.start().await?;
//!   // Blocks until interrupted or the event subscription dies, then
//!   // drains in-flight runs.
//!   node.run().await
//! }
//! ```
//!
//! # Guarantees (and the one that is weaker than it looks)
//!
//! At-most-one concurrent execution per job holds under normal operation:
//! the lock is taken with an atomic set-if-absent, kept alive by lease
//! renewal while the run is in flight, and released only through an atomic
//! "delete iff the value is still mine". It is *not* exactly-once under
//! network partition — a node cut off from the cache long enough for its
//! lease to lapse can overlap with the next owner. See
//! [`LockManager`] for the details.

// Declare modules within the crate
pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod executor;
pub mod job;
pub mod lock;
pub mod messenger;
pub mod node;
pub mod registry;
pub mod schedule;
pub mod store;

// --- Public Re-exports ---

// Boundary traits
pub use cache::{CacheService, MessageStream};
pub use store::{JobPatch, JobStore};

// Core components
pub use engine::{CronEngine, EntryId, TriggerFn};
pub use events::{ChangeEvent, ChangeKind, EventPublisher, EventSubscriber};
pub use executor::{RunOutcome, TaskExecutor};
pub use lock::{LeaseGuard, LockConfig, LockManager};
pub use messenger::Messenger;
pub use node::Node;
pub use registry::CronRegistry;
pub use schedule::ScheduleSpec;

// Model types
pub use job::{
  HttpMethod, Job, JobId, JobPage, JobPayload, JobQuery, JobRun, JobStatus, Page, RunPage,
  RunQuery, TimezoneEntry,
};

// Configuration
pub use config::NodeConfig;

// Error types
pub use error::{
  CacheError, EventError, LockError, NodeError, RegistryError, RunError, ScheduleError,
  StartupError, StoreError, SubscribeError,
};
