use async_trait::async_trait;
use serde_json::json;

use crate::{PluginResult, ResumePayload, StateManager, TaskContext, TaskError, TaskPlugin};

/// Waits for the trader to pay, then completes.
///
/// `start` echoes the configured charge (e.g. `{"amount": 120, "currency": "USD"}`)
/// so the caller can present it. Any resume counts as payment.
#[derive(Debug, Default)]
pub struct Payment;

#[async_trait]
impl TaskPlugin for Payment {
  async fn start(
    &self,
    _ctx: &TaskContext,
    config: &serde_json::Value,
    local: &mut StateManager,
    _global: &mut StateManager,
  ) -> Result<PluginResult, TaskError> {
    local.set("charge", config.clone());
    Ok(PluginResult::awaiting_input(config.clone()))
  }

  async fn resume(
    &self,
    _ctx: &TaskContext,
    local: &mut StateManager,
    global: &mut StateManager,
    input: &ResumePayload,
  ) -> Result<PluginResult, TaskError> {
    if let Some(reference) = input.content.get("reference") {
      local.set("reference", reference.clone());
    }
    global.set("paymentStatus", "paid");
    Ok(PluginResult::completed(json!({"result": "paid"})))
  }
}
