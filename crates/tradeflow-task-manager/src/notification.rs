//! Completion notifications: task manager to orchestrator.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::warn;
use tradeflow_config::TaskStatus;

/// A task's new status plus the global context keys it wrote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionNotification {
  pub task_id: String,
  pub status: TaskStatus,
  #[serde(default)]
  pub append_global_context: serde_json::Map<String, serde_json::Value>,
}

/// Create a bounded completion channel.
pub fn completion_channel(
  capacity: usize,
) -> (CompletionSender, mpsc::Receiver<CompletionNotification>) {
  let (sender, receiver) = mpsc::channel(capacity.max(1));
  (
    CompletionSender {
      sender,
      dropped: Arc::new(AtomicU64::new(0)),
    },
    receiver,
  )
}

/// Sending half of the completion channel.
///
/// Sends never wait. When the channel is full (or closed) the notification
/// is dropped, counted, and logged.
#[derive(Debug, Clone)]
pub struct CompletionSender {
  sender: mpsc::Sender<CompletionNotification>,
  dropped: Arc<AtomicU64>,
}

impl CompletionSender {
  /// Try to enqueue a notification. Returns `false` if it was dropped.
  pub fn notify(&self, notification: CompletionNotification) -> bool {
    let (notification, reason) = match self.sender.try_send(notification) {
      Ok(()) => return true,
      Err(TrySendError::Full(n)) => (n, "channel full"),
      Err(TrySendError::Closed(n)) => (n, "channel closed"),
    };

    let dropped_total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
    warn!(
      task_id = %notification.task_id,
      status = %notification.status,
      reason,
      dropped_total,
      "completion notification dropped"
    );
    false
  }

  /// Notifications dropped so far, across every clone of this sender.
  pub fn dropped(&self) -> u64 {
    self.dropped.load(Ordering::Relaxed)
  }

  pub fn capacity(&self) -> usize {
    self.sender.max_capacity()
  }

  pub fn is_closed(&self) -> bool {
    self.sender.is_closed()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn notification(task_id: &str) -> CompletionNotification {
    CompletionNotification {
      task_id: task_id.to_string(),
      status: TaskStatus::Completed,
      append_global_context: serde_json::Map::new(),
    }
  }

  #[tokio::test]
  async fn test_overflow_drops_without_blocking() {
    let (sender, mut receiver) = completion_channel(2);

    assert!(sender.notify(notification("a")));
    assert!(sender.notify(notification("b")));
    assert!(!sender.notify(notification("c")));
    assert!(!sender.clone().notify(notification("d")));

    assert_eq!(sender.dropped(), 2);
    assert_eq!(receiver.recv().await.unwrap().task_id, "a");
    assert_eq!(receiver.recv().await.unwrap().task_id, "b");
    assert!(receiver.try_recv().is_err());
  }

  #[tokio::test]
  async fn test_closed_channel_counts_drop() {
    let (sender, receiver) = completion_channel(4);
    drop(receiver);

    assert!(sender.is_closed());
    assert!(!sender.notify(notification("a")));
    assert_eq!(sender.dropped(), 1);
  }

  #[test]
  fn test_capacity() {
    let (sender, _receiver) = completion_channel(100);
    assert_eq!(sender.capacity(), 100);
  }
}
