//! Treatment types: the records the reconciler keeps in history.
//!
//! Five kinds of treatment are reported by a pump: boluses, carbohydrate
//! entries, temporary basal rates, extended boluses, and therapy events. Each
//! carries [`InterfaceIds`] naming the device (and device-side ids) it came
//! from.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use strum::{EnumString, IntoStaticStr};

use crate::{Result, duration_ms, error::parse_tag, pump::InterfaceIds};

// ─── Row identity ────────────────────────────────────────────────────────────

/// Store-assigned primary key of a treatment row.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct RowId(pub i64);

impl std::fmt::Display for RowId {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "#{}", self.0)
  }
}

/// A persisted row: the record plus its store id and validity flag.
///
/// `is_valid == false` means the row was invalidated (soft-deleted); it is
/// kept for audit but excluded from every "active" query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stored<T> {
  pub id:       RowId,
  pub is_valid: bool,
  pub record:   T,
}

// ─── Tags ────────────────────────────────────────────────────────────────────

/// The kind of treatment a row holds.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  IntoStaticStr,
  EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TreatmentKind {
  Bolus,
  Carbs,
  TemporaryBasal,
  ExtendedBolus,
  TherapyEvent,
}

impl TreatmentKind {
  pub const ALL: [Self; 5] = [
    Self::Bolus,
    Self::Carbs,
    Self::TemporaryBasal,
    Self::ExtendedBolus,
    Self::TherapyEvent,
  ];

  pub fn tag(self) -> &'static str { self.into() }

  pub fn from_tag(tag: &str) -> Result<Self> { parse_tag("treatment kind", tag) }
}

#[derive(
  Debug,
  Clone,
  Copy,
  Default,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
  IntoStaticStr,
  EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BolusType {
  #[default]
  Normal,
  /// Super micro bolus issued by the loop.
  Smb,
  /// Cannula/tubing fill; never reported as the "last bolus".
  Priming,
}

impl BolusType {
  pub fn tag(self) -> &'static str { self.into() }

  pub fn from_tag(tag: &str) -> Result<Self> { parse_tag("bolus type", tag) }
}

#[derive(
  Debug,
  Clone,
  Copy,
  Default,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
  IntoStaticStr,
  EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TemporaryBasalType {
  #[default]
  Normal,
  /// Zero-rate basal standing in for a suspend on pumps that cannot report one.
  EmulatedPumpSuspend,
  PumpSuspend,
  Superbolus,
  /// Basal used to emulate an extended bolus.
  FakeExtended,
}

impl TemporaryBasalType {
  pub fn tag(self) -> &'static str { self.into() }

  pub fn from_tag(tag: &str) -> Result<Self> {
    parse_tag("temporary basal type", tag)
  }
}

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
  IntoStaticStr,
  EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TherapyEventType {
  CannulaChange,
  InsulinChange,
  PumpBatteryChange,
  SensorChange,
  FingerStickBgValue,
  Exercise,
  Question,
  Note,
  /// Free-text message from the pump driver (errors, warnings).
  Announcement,
}

impl TherapyEventType {
  pub fn tag(self) -> &'static str { self.into() }

  pub fn from_tag(tag: &str) -> Result<Self> {
    parse_tag("therapy event type", tag)
  }
}

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
  IntoStaticStr,
  EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum GlucoseUnit {
  MgDl,
  Mmol,
}

impl GlucoseUnit {
  pub fn tag(self) -> &'static str { self.into() }

  pub fn from_tag(tag: &str) -> Result<Self> { parse_tag("glucose unit", tag) }
}

// ─── Records ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bolus {
  pub timestamp: DateTime<Utc>,
  /// Units of insulin, as reported.
  pub amount:    f64,
  pub kind:      BolusType,
  pub ids:       InterfaceIds,
}

/// A carbohydrate entry. `duration` is zero for a point entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Carbs {
  pub timestamp: DateTime<Utc>,
  /// Grams.
  pub amount:    f64,
  #[serde(with = "duration_ms")]
  pub duration:  Duration,
  pub ids:       InterfaceIds,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemporaryBasal {
  pub timestamp:   DateTime<Utc>,
  /// U/h when `is_absolute`, otherwise percent of the profile basal.
  pub rate:        f64,
  #[serde(with = "duration_ms")]
  pub duration:    Duration,
  pub is_absolute: bool,
  pub kind:        TemporaryBasalType,
  pub ids:         InterfaceIds,
}

impl TemporaryBasal {
  /// Exclusive end of the active window.
  pub fn end(&self) -> DateTime<Utc> { self.timestamp + self.duration }

  /// Whether `at` falls in `[timestamp, timestamp + duration)`.
  pub fn is_active_at(&self, at: DateTime<Utc>) -> bool {
    self.timestamp <= at && at < self.end()
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtendedBolus {
  pub timestamp:               DateTime<Utc>,
  /// Total units over the whole duration.
  pub amount:                  f64,
  #[serde(with = "duration_ms")]
  pub duration:                Duration,
  pub is_emulating_temp_basal: bool,
  pub ids:                     InterfaceIds,
}

impl ExtendedBolus {
  pub fn end(&self) -> DateTime<Utc> { self.timestamp + self.duration }

  /// Delivery rate in U/h; zero for a degenerate zero-length bolus.
  pub fn rate(&self) -> f64 {
    let ms = self.duration.num_milliseconds();
    if ms <= 0 {
      return 0.0;
    }
    self.amount / (ms as f64 / 3_600_000.0)
  }

  /// Zero-duration extended boluses are never active.
  pub fn is_active_at(&self, at: DateTime<Utc>) -> bool {
    self.duration > Duration::zero() && self.timestamp <= at && at < self.end()
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GlucoseReading {
  pub value: f64,
  pub units: GlucoseUnit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TherapyEvent {
  pub timestamp: DateTime<Utc>,
  pub kind:      TherapyEventType,
  pub note:      Option<String>,
  pub glucose:   Option<GlucoseReading>,
  pub ids:       InterfaceIds,
}

// ─── Treatment ───────────────────────────────────────────────────────────────

/// Any stored treatment row; the variant is the `kind` discriminant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "row", rename_all = "snake_case")]
pub enum Treatment {
  Bolus(Stored<Bolus>),
  Carbs(Stored<Carbs>),
  TemporaryBasal(Stored<TemporaryBasal>),
  ExtendedBolus(Stored<ExtendedBolus>),
  TherapyEvent(Stored<TherapyEvent>),
}

impl Treatment {
  pub fn kind(&self) -> TreatmentKind {
    match self {
      Self::Bolus(_) => TreatmentKind::Bolus,
      Self::Carbs(_) => TreatmentKind::Carbs,
      Self::TemporaryBasal(_) => TreatmentKind::TemporaryBasal,
      Self::ExtendedBolus(_) => TreatmentKind::ExtendedBolus,
      Self::TherapyEvent(_) => TreatmentKind::TherapyEvent,
    }
  }

  pub fn id(&self) -> RowId {
    match self {
      Self::Bolus(s) => s.id,
      Self::Carbs(s) => s.id,
      Self::TemporaryBasal(s) => s.id,
      Self::ExtendedBolus(s) => s.id,
      Self::TherapyEvent(s) => s.id,
    }
  }

  pub fn timestamp(&self) -> DateTime<Utc> {
    match self {
      Self::Bolus(s) => s.record.timestamp,
      Self::Carbs(s) => s.record.timestamp,
      Self::TemporaryBasal(s) => s.record.timestamp,
      Self::ExtendedBolus(s) => s.record.timestamp,
      Self::TherapyEvent(s) => s.record.timestamp,
    }
  }

  pub fn is_valid(&self) -> bool {
    match self {
      Self::Bolus(s) => s.is_valid,
      Self::Carbs(s) => s.is_valid,
      Self::TemporaryBasal(s) => s.is_valid,
      Self::ExtendedBolus(s) => s.is_valid,
      Self::TherapyEvent(s) => s.is_valid,
    }
  }
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone as _;

  use super::*;
  use crate::pump::{PumpIdentity, PumpType};

  fn ids() -> InterfaceIds {
    InterfaceIds::new(PumpIdentity::new(PumpType::DanaRs, "S1"))
  }

  #[test]
  fn temporary_basal_window_is_half_open() {
    let start = Utc.timestamp_millis_opt(1_000_000).unwrap();
    let tbr = TemporaryBasal {
      timestamp:   start,
      rate:        1.5,
      duration:    Duration::minutes(30),
      is_absolute: true,
      kind:        TemporaryBasalType::Normal,
      ids:         ids(),
    };
    assert!(tbr.is_active_at(start));
    assert!(tbr.is_active_at(start + Duration::minutes(29)));
    assert!(!tbr.is_active_at(start + Duration::minutes(30)));
    assert!(!tbr.is_active_at(start - Duration::milliseconds(1)));
  }

  #[test]
  fn zero_duration_extended_bolus_is_never_active() {
    let start = Utc.timestamp_millis_opt(1_000_000).unwrap();
    let eb = ExtendedBolus {
      timestamp:               start,
      amount:                  2.0,
      duration:                Duration::zero(),
      is_emulating_temp_basal: false,
      ids:                     ids(),
    };
    assert!(!eb.is_active_at(start));
    assert_eq!(eb.rate(), 0.0);
  }

  #[test]
  fn extended_bolus_rate_is_units_per_hour() {
    let eb = ExtendedBolus {
      timestamp:               Utc.timestamp_millis_opt(0).unwrap(),
      amount:                  3.0,
      duration:                Duration::minutes(90),
      is_emulating_temp_basal: false,
      ids:                     ids(),
    };
    assert!((eb.rate() - 2.0).abs() < 1e-9);
  }

  #[test]
  fn carbs_serialise_duration_as_millis() {
    let carbs = Carbs {
      timestamp: Utc.timestamp_millis_opt(0).unwrap(),
      amount:    30.0,
      duration:  Duration::minutes(1),
      ids:       ids(),
    };
    let json = serde_json::to_value(&carbs).unwrap();
    assert_eq!(json["duration"], 60_000);
  }
}
