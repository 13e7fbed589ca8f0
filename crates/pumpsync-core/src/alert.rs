//! Alerts raised by the reconciler for the user's attention.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
  /// A record arrived from a device other than the registered one.
  WrongPumpData,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
  Info,
  Low,
  Normal,
  Urgent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
  pub kind:     AlertKind,
  pub message:  String,
  pub severity: Severity,
}

/// Receiver of alerts. Fire-and-forget: nothing is returned to the caller.
pub trait AlertSink: Send + Sync {
  fn notify(&self, alert: Alert);
}

impl<T: AlertSink + ?Sized> AlertSink for Arc<T> {
  fn notify(&self, alert: Alert) { (**self).notify(alert) }
}

/// Writes alerts to the log at `WARN`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogAlertSink;

impl AlertSink for LogAlertSink {
  fn notify(&self, alert: Alert) {
    tracing::warn!(
      kind = ?alert.kind,
      severity = ?alert.severity,
      "alert: {}",
      alert.message
    );
  }
}
