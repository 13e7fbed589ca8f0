//! Encoding and decoding helpers between Rust domain types and the plain
//! representations stored in SQLite columns.
//!
//! Instants are stored as epoch milliseconds and durations as milliseconds.
//! Enum tags are stored as their snake_case names.

use chrono::{DateTime, Duration, Utc};
use pumpsync_core::{
  pump::{InterfaceIds, PumpIdentity, PumpType},
  treatment::{
    Bolus, BolusType, Carbs, ExtendedBolus, GlucoseReading, GlucoseUnit, RowId,
    Stored, TemporaryBasal, TemporaryBasalType, TherapyEvent, TherapyEventType,
  },
};
use rusqlite::Row;

use crate::{Error, Result};

// ─── DateTime<Utc> / Duration ────────────────────────────────────────────────

pub fn encode_ms(dt: DateTime<Utc>) -> i64 { dt.timestamp_millis() }

pub fn decode_ms(ms: i64) -> Result<DateTime<Utc>> {
  DateTime::from_timestamp_millis(ms)
    .ok_or_else(|| Error::Decode(format!("timestamp out of range: {ms}")))
}

pub fn encode_duration(d: Duration) -> i64 { d.num_milliseconds() }

pub fn decode_duration(ms: i64) -> Result<Duration> {
  Duration::try_milliseconds(ms)
    .ok_or_else(|| Error::Decode(format!("duration out of range: {ms}")))
}

// ─── Column lists ────────────────────────────────────────────────────────────

/// Shared leading columns of every treatment table, in [`RawIds`] order.
macro_rules! id_columns {
  () => {
    "id, is_valid, temporary_id, pump_id, end_id, pump_type, pump_serial, timestamp"
  };
}

pub const BOLUS_COLUMNS: &str = concat!(id_columns!(), ", amount, bolus_type");
pub const CARBS_COLUMNS: &str = concat!(id_columns!(), ", amount, duration");
pub const TEMPORARY_BASAL_COLUMNS: &str =
  concat!(id_columns!(), ", rate, duration, is_absolute, basal_type");
pub const EXTENDED_BOLUS_COLUMNS: &str =
  concat!(id_columns!(), ", amount, duration, is_emulating_temp_basal");
pub const THERAPY_EVENT_COLUMNS: &str =
  concat!(id_columns!(), ", event_type, note, glucose, glucose_units");

/// Index of the first kind-specific column.
const K: usize = 8;

// ─── Row types ───────────────────────────────────────────────────────────────

/// Raw values of the shared identity columns.
pub struct RawIds {
  pub id:           i64,
  pub is_valid:     bool,
  pub temporary_id: Option<i64>,
  pub pump_id:      Option<i64>,
  pub end_id:       Option<i64>,
  pub pump_type:    String,
  pub pump_serial:  String,
  pub timestamp:    i64,
}

impl RawIds {
  fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id:           row.get(0)?,
      is_valid:     row.get(1)?,
      temporary_id: row.get(2)?,
      pump_id:      row.get(3)?,
      end_id:       row.get(4)?,
      pump_type:    row.get(5)?,
      pump_serial:  row.get(6)?,
      timestamp:    row.get(7)?,
    })
  }

  fn decode(self) -> Result<(RowId, bool, DateTime<Utc>, InterfaceIds)> {
    let ids = InterfaceIds {
      temporary_id: self.temporary_id,
      pump_id:      self.pump_id,
      end_id:       self.end_id,
      pump:         PumpIdentity {
        pump_type: PumpType::from_tag(&self.pump_type)?,
        serial:    self.pump_serial,
      },
    };
    Ok((RowId(self.id), self.is_valid, decode_ms(self.timestamp)?, ids))
  }
}

pub struct RawBolus {
  ids:        RawIds,
  amount:     f64,
  bolus_type: String,
}

impl RawBolus {
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      ids:        RawIds::from_row(row)?,
      amount:     row.get(K)?,
      bolus_type: row.get(K + 1)?,
    })
  }

  pub fn into_stored(self) -> Result<Stored<Bolus>> {
    let (id, is_valid, timestamp, ids) = self.ids.decode()?;
    Ok(Stored {
      id,
      is_valid,
      record: Bolus {
        timestamp,
        amount: self.amount,
        kind: BolusType::from_tag(&self.bolus_type)?,
        ids,
      },
    })
  }
}

pub struct RawCarbs {
  ids:      RawIds,
  amount:   f64,
  duration: i64,
}

impl RawCarbs {
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      ids:      RawIds::from_row(row)?,
      amount:   row.get(K)?,
      duration: row.get(K + 1)?,
    })
  }

  pub fn into_stored(self) -> Result<Stored<Carbs>> {
    let (id, is_valid, timestamp, ids) = self.ids.decode()?;
    Ok(Stored {
      id,
      is_valid,
      record: Carbs {
        timestamp,
        amount: self.amount,
        duration: decode_duration(self.duration)?,
        ids,
      },
    })
  }
}

pub struct RawTemporaryBasal {
  ids:         RawIds,
  rate:        f64,
  duration:    i64,
  is_absolute: bool,
  basal_type:  String,
}

impl RawTemporaryBasal {
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      ids:         RawIds::from_row(row)?,
      rate:        row.get(K)?,
      duration:    row.get(K + 1)?,
      is_absolute: row.get(K + 2)?,
      basal_type:  row.get(K + 3)?,
    })
  }

  pub fn into_stored(self) -> Result<Stored<TemporaryBasal>> {
    let (id, is_valid, timestamp, ids) = self.ids.decode()?;
    Ok(Stored {
      id,
      is_valid,
      record: TemporaryBasal {
        timestamp,
        rate: self.rate,
        duration: decode_duration(self.duration)?,
        is_absolute: self.is_absolute,
        kind: TemporaryBasalType::from_tag(&self.basal_type)?,
        ids,
      },
    })
  }
}

pub struct RawExtendedBolus {
  ids:                     RawIds,
  amount:                  f64,
  duration:                i64,
  is_emulating_temp_basal: bool,
}

impl RawExtendedBolus {
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      ids:                     RawIds::from_row(row)?,
      amount:                  row.get(K)?,
      duration:                row.get(K + 1)?,
      is_emulating_temp_basal: row.get(K + 2)?,
    })
  }

  pub fn into_stored(self) -> Result<Stored<ExtendedBolus>> {
    let (id, is_valid, timestamp, ids) = self.ids.decode()?;
    Ok(Stored {
      id,
      is_valid,
      record: ExtendedBolus {
        timestamp,
        amount: self.amount,
        duration: decode_duration(self.duration)?,
        is_emulating_temp_basal: self.is_emulating_temp_basal,
        ids,
      },
    })
  }
}

pub struct RawTherapyEvent {
  ids:           RawIds,
  event_type:    String,
  note:          Option<String>,
  glucose:       Option<f64>,
  glucose_units: Option<String>,
}

impl RawTherapyEvent {
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      ids:           RawIds::from_row(row)?,
      event_type:    row.get(K)?,
      note:          row.get(K + 1)?,
      glucose:       row.get(K + 2)?,
      glucose_units: row.get(K + 3)?,
    })
  }

  pub fn into_stored(self) -> Result<Stored<TherapyEvent>> {
    let (id, is_valid, timestamp, ids) = self.ids.decode()?;
    let glucose = match (self.glucose, self.glucose_units) {
      (Some(value), Some(units)) => Some(GlucoseReading {
        value,
        units: GlucoseUnit::from_tag(&units)?,
      }),
      _ => None,
    };
    Ok(Stored {
      id,
      is_valid,
      record: TherapyEvent {
        timestamp,
        kind: TherapyEventType::from_tag(&self.event_type)?,
        note: self.note,
        glucose,
        ids,
      },
    })
  }
}
