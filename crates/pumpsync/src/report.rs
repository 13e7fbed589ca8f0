//! [`DeviceReport`] is one driver call in serialisable form.
//!
//! Reports are what the CLI replays from JSON lines. Each variant maps onto
//! exactly one [`PumpSync`] method.

use chrono::{DateTime, Utc};
use pumpsync_core::{
  alert::AlertSink,
  clock::Clock,
  pump::PumpIdentity,
  store::{Preferences, TreatmentStore},
  transaction::{BolusSync, ExtendedBolusSync, TemporaryBasalSync},
  treatment::{BolusType, GlucoseReading, RowId, TherapyEventType, TreatmentKind},
};
use serde::{Deserialize, Serialize};
use strum::IntoStaticStr;

use crate::{Result, sync::PumpSync};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, IntoStaticStr)]
#[serde(tag = "op", rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DeviceReport {
  AddBolusWithTempId {
    timestamp:    DateTime<Utc>,
    amount:       f64,
    temporary_id: i64,
    #[serde(default)]
    kind:         BolusType,
    pump:         PumpIdentity,
  },
  SyncBolusWithTempId {
    temporary_id: i64,
    pump_id:      i64,
    #[serde(flatten)]
    sync:         BolusSync,
  },
  SyncBolusWithPumpId {
    pump_id: i64,
    #[serde(flatten)]
    sync:    BolusSync,
  },
  SyncCarbsWithTimestamp {
    timestamp: DateTime<Utc>,
    amount:    f64,
    #[serde(default)]
    pump_id:   Option<i64>,
    pump:      PumpIdentity,
  },
  InsertTherapyEventIfNewWithTimestamp {
    timestamp:  DateTime<Utc>,
    event_type: TherapyEventType,
    #[serde(default)]
    note:       Option<String>,
    #[serde(default)]
    glucose:    Option<GlucoseReading>,
    #[serde(default)]
    pump_id:    Option<i64>,
    pump:       PumpIdentity,
  },
  InsertAnnouncement {
    message: String,
    #[serde(default)]
    pump_id: Option<i64>,
    pump:    PumpIdentity,
  },
  AddTemporaryBasalWithTempId {
    temporary_id: i64,
    #[serde(flatten)]
    sync:         TemporaryBasalSync,
  },
  SyncTemporaryBasalWithTempId {
    temporary_id: i64,
    #[serde(default)]
    pump_id:      Option<i64>,
    #[serde(flatten)]
    sync:         TemporaryBasalSync,
  },
  SyncTemporaryBasalWithPumpId {
    pump_id: i64,
    #[serde(flatten)]
    sync:    TemporaryBasalSync,
  },
  SyncStopTemporaryBasalWithPumpId {
    timestamp:   DateTime<Utc>,
    end_pump_id: i64,
    pump:        PumpIdentity,
  },
  SyncExtendedBolusWithPumpId {
    pump_id: i64,
    #[serde(flatten)]
    sync:    ExtendedBolusSync,
  },
  SyncStopExtendedBolusWithPumpId {
    timestamp:   DateTime<Utc>,
    end_pump_id: i64,
    pump:        PumpIdentity,
  },
  InvalidateTemporaryBasalWithPumpId {
    pump_id: i64,
    pump:    PumpIdentity,
  },
  InvalidateTemporaryBasalWithTempId {
    temporary_id: i64,
  },
  Invalidate {
    kind: TreatmentKind,
    id:   RowId,
  },
}

impl DeviceReport {
  /// The `op` tag, e.g. `"sync_bolus_with_pump_id"`.
  pub fn name(&self) -> &'static str { self.into() }
}

impl<S, P, A, C> PumpSync<S, P, A, C>
where
  S: TreatmentStore,
  P: Preferences,
  A: AlertSink,
  C: Clock,
{
  /// Dispatch `report` to the matching method and return its outcome.
  ///
  /// An announcement always yields `true` once handed off; its own failures
  /// are only logged.
  pub async fn apply(&self, report: DeviceReport) -> Result<bool> {
    match report {
      DeviceReport::AddBolusWithTempId { timestamp, amount, temporary_id, kind, pump } => {
        self.add_bolus_with_temp_id(timestamp, amount, temporary_id, kind, &pump).await
      }
      DeviceReport::SyncBolusWithTempId { temporary_id, pump_id, sync } => {
        self.sync_bolus_with_temp_id(temporary_id, pump_id, sync).await
      }
      DeviceReport::SyncBolusWithPumpId { pump_id, sync } => {
        self.sync_bolus_with_pump_id(pump_id, sync).await
      }
      DeviceReport::SyncCarbsWithTimestamp { timestamp, amount, pump_id, pump } => {
        self.sync_carbs_with_timestamp(timestamp, amount, pump_id, &pump).await
      }
      DeviceReport::InsertTherapyEventIfNewWithTimestamp {
        timestamp,
        event_type,
        note,
        glucose,
        pump_id,
        pump,
      } => {
        self
          .insert_therapy_event_if_new_with_timestamp(
            timestamp, event_type, note, glucose, pump_id, &pump,
          )
          .await
      }
      DeviceReport::InsertAnnouncement { message, pump_id, pump } => {
        self.insert_announcement(message, pump_id, &pump).await;
        Ok(true)
      }
      DeviceReport::AddTemporaryBasalWithTempId { temporary_id, sync } => {
        self.add_temporary_basal_with_temp_id(temporary_id, sync).await
      }
      DeviceReport::SyncTemporaryBasalWithTempId { temporary_id, pump_id, sync } => {
        self.sync_temporary_basal_with_temp_id(temporary_id, pump_id, sync).await
      }
      DeviceReport::SyncTemporaryBasalWithPumpId { pump_id, sync } => {
        self.sync_temporary_basal_with_pump_id(pump_id, sync).await
      }
      DeviceReport::SyncStopTemporaryBasalWithPumpId { timestamp, end_pump_id, pump } => {
        self.sync_stop_temporary_basal_with_pump_id(timestamp, end_pump_id, &pump).await
      }
      DeviceReport::SyncExtendedBolusWithPumpId { pump_id, sync } => {
        self.sync_extended_bolus_with_pump_id(pump_id, sync).await
      }
      DeviceReport::SyncStopExtendedBolusWithPumpId { timestamp, end_pump_id, pump } => {
        self.sync_stop_extended_bolus_with_pump_id(timestamp, end_pump_id, &pump).await
      }
      DeviceReport::InvalidateTemporaryBasalWithPumpId { pump_id, pump } => {
        self.invalidate_temporary_basal_with_pump_id(pump_id, &pump).await
      }
      DeviceReport::InvalidateTemporaryBasalWithTempId { temporary_id } => {
        self.invalidate_temporary_basal_with_temp_id(temporary_id).await
      }
      DeviceReport::Invalidate { kind, id } => self.invalidate(kind, id).await,
    }
  }
}
