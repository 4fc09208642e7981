//! Outbound notifications to external services, with retry.
//!
//! A 2xx response succeeds. 5xx, 429 and transport errors are retried with
//! exponential backoff; any other status ends the attempt loop at once.

use std::time::Duration;

use reqwest::StatusCode;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};
use tradeflow_config::NotifierConfig;

use crate::TaskError;

/// Timeout of a single HTTP attempt.
const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(30);

/// Attempt count and backoff for outbound calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
  /// Total attempts, including the first.
  pub max_attempts: u32,
  /// Delay before the first retry (doubles each retry: 1s, 2s, 4s, ...).
  pub base_delay: Duration,
}

impl RetryPolicy {
  /// Delay to wait after failed attempt number `attempt` (zero based).
  pub fn delay_after(&self, attempt: u32) -> Duration {
    self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
  }

  pub fn is_retryable(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
  }
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self::from(&NotifierConfig::default())
  }
}

impl From<&NotifierConfig> for RetryPolicy {
  fn from(config: &NotifierConfig) -> Self {
    Self {
      max_attempts: config.max_attempts.max(1),
      base_delay: Duration::from_millis(config.base_delay_ms),
    }
  }
}

/// Posts JSON to external services.
#[derive(Debug, Clone)]
pub struct ExternalNotifier {
  client: reqwest::Client,
  policy: RetryPolicy,
  /// Budget for a detached notification, retries included.
  budget: Duration,
  /// Parent of every detached notification's cancellation token.
  shutdown: CancellationToken,
  /// Detached notifications still in flight.
  in_flight: TaskTracker,
}

impl ExternalNotifier {
  pub fn new(config: &NotifierConfig) -> Self {
    Self {
      client: reqwest::Client::new(),
      policy: RetryPolicy::from(config),
      budget: Duration::from_millis(config.request_timeout_ms),
      shutdown: CancellationToken::new(),
      in_flight: TaskTracker::new(),
    }
  }

  pub fn with_client(mut self, client: reqwest::Client) -> Self {
    self.client = client;
    self
  }

  pub fn policy(&self) -> RetryPolicy {
    self.policy
  }

  /// Cancel every detached notification still in flight.
  pub fn shutdown(&self) {
    self.shutdown.cancel();
  }

  /// Wait until every detached notification has finished.
  pub async fn wait(&self) {
    self.in_flight.close();
    self.in_flight.wait().await;
    self.in_flight.reopen();
  }

  /// POST `body` to `url`, retrying per the policy.
  ///
  /// Returns the number of attempts made on success.
  pub async fn post_json(
    &self,
    url: &str,
    body: &serde_json::Value,
    cancel: &CancellationToken,
  ) -> Result<u32, TaskError> {
    let mut last_error = String::new();

    for attempt in 0..self.policy.max_attempts {
      if attempt > 0 {
        let delay = self.policy.delay_after(attempt - 1);
        warn!(
          url = %url,
          attempt = attempt + 1,
          max_attempts = self.policy.max_attempts,
          delay_ms = delay.as_millis() as u64,
          error = %last_error,
          "notification failed, retrying"
        );
        tokio::select! {
          _ = cancel.cancelled() => return Err(TaskError::Cancelled),
          _ = tokio::time::sleep(delay) => {}
        }
      }
      if cancel.is_cancelled() {
        return Err(TaskError::Cancelled);
      }

      let request = self.client.post(url).json(body).timeout(ATTEMPT_TIMEOUT);
      match request.send().await {
        Ok(response) if response.status().is_success() => {
          debug!(url = %url, attempts = attempt + 1, "notification delivered");
          return Ok(attempt + 1);
        }
        Ok(response) if RetryPolicy::is_retryable(response.status()) => {
          last_error = format!("status {}", response.status());
        }
        Ok(response) => {
          return Err(TaskError::Rejected {
            url: url.to_string(),
            status: response.status().as_u16(),
          });
        }
        Err(e) => {
          last_error = e.to_string();
        }
      }
    }

    Err(TaskError::RetriesExhausted {
      attempts: self.policy.max_attempts,
      last_error,
    })
  }

  /// Send a notification on its own task so it outlives the caller.
  ///
  /// The notification gets its own deadline and is only cancelled by
  /// [`ExternalNotifier::shutdown`]. Failures are logged; the task that
  /// requested the notification keeps its current status.
  pub fn notify_detached(
    &self,
    url: String,
    body: serde_json::Value,
    task_id: String,
    consignment_id: String,
  ) -> JoinHandle<()> {
    let notifier = self.clone();
    let cancel = self.shutdown.child_token();

    self.in_flight.spawn(async move {
      let outcome =
        tokio::time::timeout(notifier.budget, notifier.post_json(&url, &body, &cancel)).await;

      match outcome {
        Ok(Ok(attempts)) => {
          info!(task_id = %task_id, url = %url, attempts, "external service notified");
        }
        Ok(Err(TaskError::Cancelled)) => {
          info!(task_id = %task_id, url = %url, "external notification cancelled");
        }
        Ok(Err(e)) => {
          warn!(
            task_id = %task_id,
            consignment_id = %consignment_id,
            url = %url,
            error = %e,
            "failed to notify external service, task may be stuck"
          );
        }
        Err(_) => {
          warn!(
            task_id = %task_id,
            consignment_id = %consignment_id,
            url = %url,
            budget_ms = notifier.budget.as_millis() as u64,
            "external notification timed out, task may be stuck"
          );
        }
      }
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_backoff_doubles() {
    let policy = RetryPolicy::default();
    assert_eq!(policy.max_attempts, 3);
    assert_eq!(policy.delay_after(0), Duration::from_secs(1));
    assert_eq!(policy.delay_after(1), Duration::from_secs(2));
    assert_eq!(policy.delay_after(2), Duration::from_secs(4));
  }

  #[test]
  fn test_retryable_statuses() {
    assert!(RetryPolicy::is_retryable(StatusCode::SERVICE_UNAVAILABLE));
    assert!(RetryPolicy::is_retryable(StatusCode::INTERNAL_SERVER_ERROR));
    assert!(RetryPolicy::is_retryable(StatusCode::TOO_MANY_REQUESTS));
    assert!(!RetryPolicy::is_retryable(StatusCode::NOT_FOUND));
    assert!(!RetryPolicy::is_retryable(StatusCode::BAD_REQUEST));
  }

  #[test]
  fn test_zero_attempts_clamped() {
    let policy = RetryPolicy::from(&NotifierConfig {
      max_attempts: 0,
      ..NotifierConfig::default()
    });
    assert_eq!(policy.max_attempts, 1);
  }

  #[tokio::test]
  async fn test_cancelled_before_first_attempt() {
    let notifier = ExternalNotifier::new(&NotifierConfig::default());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = notifier
      .post_json("http://127.0.0.1:1/", &serde_json::json!({}), &cancel)
      .await;
    assert!(matches!(result, Err(TaskError::Cancelled)));
  }
}
