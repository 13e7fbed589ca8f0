//! The active therapy profile, as far as the expected-state query needs it.
//!
//! Profile selection and basal schedules live outside this workspace; the
//! query only asks a [`ProfileSource`] what applies at a given instant.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveProfile {
  pub name:       String,
  /// Scheduled basal rate in U/h at the queried instant.
  pub basal_rate: f64,
}

pub trait ProfileSource: Send + Sync {
  fn active_profile(&self, at: DateTime<Utc>) -> Option<ActiveProfile>;
}

/// A fixed profile that applies at all times.
impl ProfileSource for ActiveProfile {
  fn active_profile(&self, _at: DateTime<Utc>) -> Option<ActiveProfile> {
    Some(self.clone())
  }
}

impl ProfileSource for Option<ActiveProfile> {
  fn active_profile(&self, _at: DateTime<Utc>) -> Option<ActiveProfile> {
    self.clone()
  }
}
