//! Pump identity: which physical device a record came from.
//!
//! Every treatment row carries the identity of the device that reported it.
//! A device is identified by its type and serial number; the pair is what the
//! identity guard compares against the registered device.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{EnumString, IntoStaticStr};

use crate::{Result, error::parse_tag};

/// The model of insulin pump that reported a record.
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
pub enum PumpType {
  Generic,
  AccuChekCombo,
  AccuChekInsight,
  DanaR,
  DanaRs,
  DanaI,
  OmnipodEros,
  OmnipodDash,
  Medtronic,
  YpsoPump,
  DiaconnG8,
  Eopatch2,
  Medtrum,
  Equil,
  /// Software pump used when no hardware is attached.
  Virtual,
}

impl PumpType {
  /// The tag stored in the `pump_type` column and in preferences.
  pub fn tag(self) -> &'static str { self.into() }

  pub fn from_tag(tag: &str) -> Result<Self> { parse_tag("pump type", tag) }
}

/// The (type, serial) pair identifying one physical device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PumpIdentity {
  pub pump_type: PumpType,
  pub serial:    String,
}

impl PumpIdentity {
  pub fn new(pump_type: PumpType, serial: impl Into<String>) -> Self {
    Self { pump_type, serial: serial.into() }
  }
}

impl std::fmt::Display for PumpIdentity {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{} {}", self.pump_type.tag(), self.serial)
  }
}

/// The device currently considered authoritative, and since when.
///
/// Replaced as a whole on registration; never partially updated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PumpIdentityRecord {
  pub pump:          PumpIdentity,
  pub registered_at: DateTime<Utc>,
}

/// Identifiers attached to every treatment row.
///
/// A row is addressable by `(pump, pump_id)` once the device has assigned its
/// permanent id, or by `(pump, temporary_id)` before that.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceIds {
  pub temporary_id: Option<i64>,
  pub pump_id:      Option<i64>,
  /// Device id of the event that closed a running basal or extended bolus.
  pub end_id:       Option<i64>,
  pub pump:         PumpIdentity,
}

impl InterfaceIds {
  pub fn new(pump: PumpIdentity) -> Self {
    Self { temporary_id: None, pump_id: None, end_id: None, pump }
  }

  pub fn with_temporary_id(mut self, temporary_id: i64) -> Self {
    self.temporary_id = Some(temporary_id);
    self
  }

  pub fn with_pump_id(mut self, pump_id: Option<i64>) -> Self {
    self.pump_id = pump_id;
    self
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn pump_type_tags_are_snake_case() {
    assert_eq!(PumpType::AccuChekCombo.tag(), "accu_chek_combo");
    assert_eq!(PumpType::DanaRs.tag(), "dana_rs");
    assert_eq!(PumpType::from_tag("omnipod_dash").unwrap(), PumpType::OmnipodDash);
  }

  #[test]
  fn unknown_pump_type_tag_errors() {
    let err = PumpType::from_tag("toaster").unwrap_err();
    assert!(matches!(err, crate::Error::UnknownTag { kind: "pump type", .. }));
  }
}
