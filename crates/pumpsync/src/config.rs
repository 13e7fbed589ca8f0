//! Runtime settings for a reconciler instance.

use std::path::PathBuf;

use chrono::Duration;
use pumpsync_core::profile::ActiveProfile;
use serde::{Deserialize, Serialize};

use crate::guard::GuardConfig;

fn default_store_path() -> PathBuf { PathBuf::from("pumpsync.db") }

fn default_registration_grace_secs() -> u64 { 60 }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
  /// SQLite file holding history and the registered pump.
  #[serde(default = "default_store_path")]
  pub store_path:              PathBuf,
  /// How much older than "now" the record registering a new pump may be.
  #[serde(default = "default_registration_grace_secs")]
  pub registration_grace_secs: u64,
  #[serde(default)]
  pub profile_name:            Option<String>,
  /// Scheduled basal in U/h for the static profile.
  #[serde(default)]
  pub profile_basal_rate:      Option<f64>,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      store_path:              default_store_path(),
      registration_grace_secs: default_registration_grace_secs(),
      profile_name:            None,
      profile_basal_rate:      None,
    }
  }
}

impl SyncConfig {
  pub fn guard_config(&self) -> GuardConfig {
    let secs = i64::try_from(self.registration_grace_secs).unwrap_or(i64::MAX);
    GuardConfig { registration_grace: Duration::try_seconds(secs).unwrap_or(Duration::MAX) }
  }

  /// The static profile, present only when a basal rate is configured.
  pub fn profile(&self) -> Option<ActiveProfile> {
    let basal_rate = self.profile_basal_rate?;
    Some(ActiveProfile {
      name: self.profile_name.clone().unwrap_or_else(|| "default".to_owned()),
      basal_rate,
    })
  }
}
