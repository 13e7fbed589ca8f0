//! Transactions: the closed set of mutations a store must apply atomically.
//!
//! Every reconciliation case turns into exactly one [`Transaction`]. A store
//! backend executes the whole variant inside a single database transaction,
//! including any "look up, then write" step, and reports which rows it
//! touched in a [`TransactionResult`].

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::{
  pump::PumpIdentity,
  treatment::{
    Bolus, BolusType, Carbs, RowId, TemporaryBasal, TemporaryBasalType,
    TherapyEvent, TreatmentKind,
  },
};

// ─── Payloads ────────────────────────────────────────────────────────────────

/// Bolus fields reported alongside a device id.
///
/// `kind: None` means the device did not say; an insert falls back to
/// [`BolusType::Normal`] and an update keeps the stored kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BolusSync {
  pub timestamp: DateTime<Utc>,
  pub amount:    f64,
  pub kind:      Option<BolusType>,
  pub pump:      PumpIdentity,
}

/// Temporary basal fields reported alongside a device id. `kind` follows the
/// same rule as [`BolusSync::kind`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemporaryBasalSync {
  pub timestamp:   DateTime<Utc>,
  pub rate:        f64,
  #[serde(with = "crate::duration_ms")]
  pub duration:    Duration,
  pub is_absolute: bool,
  pub kind:        Option<TemporaryBasalType>,
  pub pump:        PumpIdentity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtendedBolusSync {
  pub timestamp:               DateTime<Utc>,
  pub amount:                  f64,
  #[serde(with = "crate::duration_ms")]
  pub duration:                Duration,
  pub is_emulating_temp_basal: bool,
  pub pump:                    PumpIdentity,
}

/// Close whatever is running for `pump` at `timestamp`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cancellation {
  pub timestamp:   DateTime<Utc>,
  /// Device id of the stop event; recorded as the row's `end_id`.
  pub end_pump_id: i64,
  pub pump:        PumpIdentity,
}

// ─── Per-kind operations ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum BolusOp {
  /// Always inserts; the record must carry a temporary id.
  InsertWithTempId { bolus: Bolus },
  /// Attach the permanent id to the row keyed by `temporary_id`.
  ResolveTempId {
    temporary_id: i64,
    pump_id:      i64,
    sync:         BolusSync,
  },
  UpsertByPumpId { pump_id: i64, sync: BolusSync },
  Invalidate { id: RowId },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum CarbsOp {
  /// Inserts only if no row exists for (pump, timestamp).
  InsertIfNewByTimestamp { carbs: Carbs },
  Invalidate { id: RowId },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum TemporaryBasalOp {
  InsertWithTempId { temporary_basal: TemporaryBasal },
  ResolveTempId {
    temporary_id: i64,
    pump_id:      Option<i64>,
    sync:         TemporaryBasalSync,
  },
  UpsertByPumpId { pump_id: i64, sync: TemporaryBasalSync },
  CancelActive(Cancellation),
  Invalidate { id: RowId },
  InvalidateByPumpId { pump_id: i64, pump: PumpIdentity },
  InvalidateByTempId { temporary_id: i64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ExtendedBolusOp {
  UpsertByPumpId { pump_id: i64, sync: ExtendedBolusSync },
  CancelActive(Cancellation),
  Invalidate { id: RowId },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum TherapyEventOp {
  /// Inserts only if no row exists for (pump, timestamp, event kind).
  InsertIfNewByTimestamp { therapy_event: TherapyEvent },
  Invalidate { id: RowId },
}

// ─── Transaction ─────────────────────────────────────────────────────────────

/// One atomic unit of work against the treatment history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "op", rename_all = "snake_case")]
pub enum Transaction {
  Bolus(BolusOp),
  Carbs(CarbsOp),
  TemporaryBasal(TemporaryBasalOp),
  ExtendedBolus(ExtendedBolusOp),
  TherapyEvent(TherapyEventOp),
}

impl Transaction {
  /// Soft-delete row `id` of the given kind.
  pub fn invalidate(kind: TreatmentKind, id: RowId) -> Self {
    match kind {
      TreatmentKind::Bolus => Self::Bolus(BolusOp::Invalidate { id }),
      TreatmentKind::Carbs => Self::Carbs(CarbsOp::Invalidate { id }),
      TreatmentKind::TemporaryBasal => {
        Self::TemporaryBasal(TemporaryBasalOp::Invalidate { id })
      }
      TreatmentKind::ExtendedBolus => {
        Self::ExtendedBolus(ExtendedBolusOp::Invalidate { id })
      }
      TreatmentKind::TherapyEvent => {
        Self::TherapyEvent(TherapyEventOp::Invalidate { id })
      }
    }
  }

  pub fn kind(&self) -> TreatmentKind {
    match self {
      Self::Bolus(_) => TreatmentKind::Bolus,
      Self::Carbs(_) => TreatmentKind::Carbs,
      Self::TemporaryBasal(_) => TreatmentKind::TemporaryBasal,
      Self::ExtendedBolus(_) => TreatmentKind::ExtendedBolus,
      Self::TherapyEvent(_) => TreatmentKind::TherapyEvent,
    }
  }

  /// Short operation name for logs, e.g. `"temporary_basal.cancel_active"`.
  pub fn name(&self) -> &'static str {
    match self {
      Self::Bolus(op) => match op {
        BolusOp::InsertWithTempId { .. } => "bolus.insert_with_temp_id",
        BolusOp::ResolveTempId { .. } => "bolus.resolve_temp_id",
        BolusOp::UpsertByPumpId { .. } => "bolus.upsert_by_pump_id",
        BolusOp::Invalidate { .. } => "bolus.invalidate",
      },
      Self::Carbs(op) => match op {
        CarbsOp::InsertIfNewByTimestamp { .. } => "carbs.insert_if_new",
        CarbsOp::Invalidate { .. } => "carbs.invalidate",
      },
      Self::TemporaryBasal(op) => match op {
        TemporaryBasalOp::InsertWithTempId { .. } => {
          "temporary_basal.insert_with_temp_id"
        }
        TemporaryBasalOp::ResolveTempId { .. } => "temporary_basal.resolve_temp_id",
        TemporaryBasalOp::UpsertByPumpId { .. } => {
          "temporary_basal.upsert_by_pump_id"
        }
        TemporaryBasalOp::CancelActive(_) => "temporary_basal.cancel_active",
        TemporaryBasalOp::Invalidate { .. } => "temporary_basal.invalidate",
        TemporaryBasalOp::InvalidateByPumpId { .. } => {
          "temporary_basal.invalidate_by_pump_id"
        }
        TemporaryBasalOp::InvalidateByTempId { .. } => {
          "temporary_basal.invalidate_by_temp_id"
        }
      },
      Self::ExtendedBolus(op) => match op {
        ExtendedBolusOp::UpsertByPumpId { .. } => "extended_bolus.upsert_by_pump_id",
        ExtendedBolusOp::CancelActive(_) => "extended_bolus.cancel_active",
        ExtendedBolusOp::Invalidate { .. } => "extended_bolus.invalidate",
      },
      Self::TherapyEvent(op) => match op {
        TherapyEventOp::InsertIfNewByTimestamp { .. } => {
          "therapy_event.insert_if_new"
        }
        TherapyEventOp::Invalidate { .. } => "therapy_event.invalidate",
      },
    }
  }
}

// ─── Result ──────────────────────────────────────────────────────────────────

/// Rows touched by one transaction. Rows closed by a cancel (or cut short by
/// a newer basal) are reported as `updated`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionResult {
  pub inserted:    Vec<RowId>,
  pub updated:     Vec<RowId>,
  pub invalidated: Vec<RowId>,
}

impl TransactionResult {
  pub fn is_empty(&self) -> bool {
    self.inserted.is_empty() && self.updated.is_empty() && self.invalidated.is_empty()
  }
}
