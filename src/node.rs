use crate::cache::CacheService;
use crate::config::NodeConfig;
use crate::error::{NodeError, StartupError, SubscribeError};
use crate::events::EventSubscriber;
use crate::executor::TaskExecutor;
use crate::lock::LockManager;
use crate::messenger::Messenger;
use crate::registry::CronRegistry;
use crate::store::JobStore;

use std::sync::Arc;

use chrono_tz::Tz;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// One worker node: registry + executor + event subscriber under a single
/// lifecycle.
///
/// `new → start → run → shutdown`, all on an owned value — multiple nodes
/// can coexist in one process (tests do exactly that). `start` aborts on
/// store/cache connectivity failure; `run` returns when the process is
/// interrupted or the event subscription dies, and the caller decides
/// whether to restart.
pub struct Node {
  config: NodeConfig,
  store: Arc<dyn JobStore>,
  cache: Arc<dyn CacheService>,
  registry: CronRegistry,
  messages: Option<mpsc::Receiver<String>>,
  subscriber: Option<JoinHandle<SubscribeError>>,
}

impl Node {
  pub fn new(config: NodeConfig, store: Arc<dyn JobStore>, cache: Arc<dyn CacheService>) -> Self {
    let default_tz = config.default_timezone.parse::<Tz>().unwrap_or_else(|_| {
      warn!(
        timezone = %config.default_timezone,
        "configured default timezone is unknown, falling back to UTC"
      );
      chrono_tz::UTC
    });

    let (messenger, messages) = Messenger::new(config.message_buffer);
    let locks = LockManager::new(cache.clone(), config.lock_config());
    let executor = Arc::new(TaskExecutor::new(
      store.clone(),
      locks,
      messenger,
      default_tz,
    ));
    let registry = CronRegistry::new(store.clone(), executor, default_tz);

    Self {
      config,
      store,
      cache,
      registry,
      messages: Some(messages),
      subscriber: None,
    }
  }

  pub fn registry(&self) -> &CronRegistry {
    &self.registry
  }

  /// The receiving half of the live output stream, for the host's
  /// status/log endpoint. Yields `Some` exactly once.
  pub fn take_message_stream(&mut self) -> Option<mpsc::Receiver<String>> {
    self.messages.take()
  }

  /// Brings the node up: connectivity checks, initial registry load, and
  /// the change-topic subscription.
  pub async fn start(&mut self) -> Result<(), StartupError> {
    self.store.ping().await.map_err(StartupError::Store)?;
    self.cache.ping().await.map_err(StartupError::Cache)?;

    let loaded = self.registry.load_all().await.map_err(StartupError::Load)?;

    let subscriber = EventSubscriber::new(
      self.cache.clone(),
      self.registry.clone(),
      self.config.topic.clone(),
    );
    self.subscriber = Some(tokio::spawn(async move { subscriber.run().await }));

    info!(loaded, "node started");
    Ok(())
  }

  /// Blocks until an interrupt arrives or the event subscription dies,
  /// then shuts down. A subscription death is returned as an error so the
  /// supervisor restarts the node instead of treating it as a clean exit.
  pub async fn run(&mut self) -> Result<(), NodeError> {
    let fatal = match self.subscriber.as_mut() {
      Some(handle) => {
        tokio::select! {
          _ = tokio::signal::ctrl_c() => {
            info!("interrupt received, shutting down");
            None
          }
          joined = handle => {
            let cause = joined.unwrap_or(SubscribeError::Ended);
            error!(error = %cause, "event subscription terminated");
            Some(cause)
          }
        }
      }
      None => {
        tokio::signal::ctrl_c().await.ok();
        info!("interrupt received, shutting down");
        None
      }
    };

    let drained = self.shutdown().await;
    match fatal {
      Some(cause) => Err(NodeError::Subscription(cause)),
      None => drained,
    }
  }

  /// Two-phase shutdown: stop the schedule engine (no new fires), then
  /// wait a bounded grace period for in-flight runs to drain. On timeout
  /// the caller force-exits; the runs' locks expire on their own TTLs.
  pub async fn shutdown(&mut self) -> Result<(), NodeError> {
    if let Some(handle) = self.subscriber.take() {
      handle.abort();
    }
    self.registry.stop();
    info!("schedule engine stopped, draining in-flight runs");

    match tokio::time::timeout(self.config.shutdown_grace(), self.registry.drained()).await {
      Ok(()) => {
        info!("all in-flight runs drained");
        Ok(())
      }
      Err(_) => {
        error!(
          grace_secs = self.config.shutdown_grace_secs,
          "in-flight runs did not drain in time"
        );
        Err(NodeError::DrainTimeout)
      }
    }
  }
}
