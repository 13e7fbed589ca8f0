//! What the pump is expected to be doing, according to history.
//!
//! Drivers compare this against what the device itself reports to spot
//! drift. Reading it never mutates history and never consults the identity
//! guard's gate.

use chrono::{DateTime, Duration, Utc};
use pumpsync_core::{
  alert::AlertSink,
  clock::Clock,
  duration_ms,
  profile::{ActiveProfile, ProfileSource},
  store::{Preferences, TreatmentStore},
  treatment::{Bolus, ExtendedBolus, RowId, Stored, TemporaryBasal, TemporaryBasalType},
};
use serde::{Deserialize, Serialize};

use crate::{Error, Result, sync::PumpSync};

fn remaining_minutes(end: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
  let ms = (end - now).num_milliseconds();
  ((ms as f64 / 60_000.0).round() as i64).max(0)
}

// ─── Temporary basal ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpectedTemporaryBasal {
  pub id:          RowId,
  pub pump_id:     Option<i64>,
  pub timestamp:   DateTime<Utc>,
  #[serde(with = "duration_ms")]
  pub duration:    Duration,
  /// U/h when `is_absolute`, otherwise percent of the profile basal.
  pub rate:        f64,
  pub is_absolute: bool,
  pub kind:        TemporaryBasalType,
}

impl ExpectedTemporaryBasal {
  pub fn end(&self) -> DateTime<Utc> { self.timestamp + self.duration }

  /// Whole minutes left of the planned duration, never negative.
  pub fn planned_remaining_minutes(&self, now: DateTime<Utc>) -> i64 {
    remaining_minutes(self.end(), now)
  }

  /// The rate in U/h against `profile`'s scheduled basal.
  pub fn converted_to_absolute(&self, profile: &ActiveProfile) -> f64 {
    if self.is_absolute {
      self.rate
    } else {
      profile.basal_rate * self.rate / 100.0
    }
  }

  /// The rate as a whole percentage of `profile`'s scheduled basal.
  ///
  /// An absolute rate against a zero basal has no meaningful percentage and
  /// is reported as 0.
  pub fn converted_to_percent(&self, profile: &ActiveProfile) -> f64 {
    if !self.is_absolute {
      return self.rate;
    }
    if profile.basal_rate <= 0.0 {
      return 0.0;
    }
    (self.rate / profile.basal_rate * 100.0).round()
  }
}

impl From<Stored<TemporaryBasal>> for ExpectedTemporaryBasal {
  fn from(row: Stored<TemporaryBasal>) -> Self {
    let r = row.record;
    Self {
      id:          row.id,
      pump_id:     r.ids.pump_id,
      timestamp:   r.timestamp,
      duration:    r.duration,
      rate:        r.rate,
      is_absolute: r.is_absolute,
      kind:        r.kind,
    }
  }
}

// ─── Extended bolus ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpectedExtendedBolus {
  pub id:        RowId,
  pub pump_id:   Option<i64>,
  pub timestamp: DateTime<Utc>,
  #[serde(with = "duration_ms")]
  pub duration:  Duration,
  pub amount:    f64,
  /// U/h.
  pub rate:      f64,
}

impl ExpectedExtendedBolus {
  pub fn end(&self) -> DateTime<Utc> { self.timestamp + self.duration }

  pub fn planned_remaining_minutes(&self, now: DateTime<Utc>) -> i64 {
    remaining_minutes(self.end(), now)
  }
}

impl From<Stored<ExtendedBolus>> for ExpectedExtendedBolus {
  fn from(row: Stored<ExtendedBolus>) -> Self {
    let rate = row.record.rate();
    let r = row.record;
    Self {
      id: row.id,
      pump_id: r.ids.pump_id,
      timestamp: r.timestamp,
      duration: r.duration,
      amount: r.amount,
      rate,
    }
  }
}

// ─── Snapshot ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LastBolus {
  pub timestamp: DateTime<Utc>,
  pub amount:    f64,
}

impl From<Stored<Bolus>> for LastBolus {
  fn from(row: Stored<Bolus>) -> Self {
    Self { timestamp: row.record.timestamp, amount: row.record.amount }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PumpState {
  pub temporary_basal: Option<ExpectedTemporaryBasal>,
  pub extended_bolus:  Option<ExpectedExtendedBolus>,
  /// Most recent valid bolus other than priming.
  pub last_bolus:      Option<LastBolus>,
  pub profile:         Option<ActiveProfile>,
  /// Serial of the registered pump, if any.
  pub serial_number:   Option<String>,
}

impl<S, P, A, C> PumpSync<S, P, A, C>
where
  S: TreatmentStore,
  P: Preferences,
  A: AlertSink,
  C: Clock,
{
  /// The expected pump state at `now`.
  pub async fn snapshot(
    &self,
    now: DateTime<Utc>,
    profiles: &impl ProfileSource,
  ) -> Result<PumpState> {
    let temporary_basal =
      self.store.temporary_basal_active_at(now).await.map_err(Error::store)?;
    let extended_bolus =
      self.store.extended_bolus_active_at(now).await.map_err(Error::store)?;
    let last_bolus = self.store.last_bolus().await.map_err(Error::store)?;
    let serial_number = self.guard.current().await?.map(|r| r.pump.serial);

    Ok(PumpState {
      temporary_basal: temporary_basal.map(Into::into),
      extended_bolus: extended_bolus.map(Into::into),
      last_bolus: last_bolus.map(Into::into),
      profile: profiles.active_profile(now),
      serial_number,
    })
  }

  /// [`snapshot`](Self::snapshot) at the clock's current time.
  pub async fn expected_pump_state(
    &self,
    profiles: &impl ProfileSource,
  ) -> Result<PumpState> {
    let now = self.guard.clock().now();
    self.snapshot(now, profiles).await
  }
}
