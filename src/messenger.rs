use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{trace, warn};

/// Best-effort fan-out of captured job output for live status/log viewing.
///
/// Publishing never blocks job completion: a full buffer drops the line
/// with a warning, and a missing consumer is not an error at all.
#[derive(Clone)]
pub struct Messenger {
  tx: mpsc::Sender<String>,
}

impl Messenger {
  /// Creates the messenger and the receiving half the host hands to its
  /// status/log stream endpoint.
  pub fn new(capacity: usize) -> (Self, mpsc::Receiver<String>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (Self { tx }, rx)
  }

  pub fn publish(&self, line: String) {
    match self.tx.try_send(line) {
      Ok(()) => {}
      Err(TrySendError::Full(_)) => warn!("message stream full, dropping output line"),
      Err(TrySendError::Closed(_)) => trace!("no message stream consumer attached"),
    }
  }
}
