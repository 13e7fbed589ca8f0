//! [`PumpSync`] is the reconciler facade the pump drivers call.
//!
//! Every device-facing method follows the same path: ask the
//! [`IdentityGuard`] whether the record may enter history, build exactly one
//! [`Transaction`], run it, and report whether the row set changed the way
//! the caller cares about.

use chrono::{DateTime, Duration, Utc};
use pumpsync_core::{
  alert::AlertSink,
  clock::Clock,
  pump::{InterfaceIds, PumpIdentity},
  store::{Preferences, TreatmentStore},
  transaction::{
    BolusOp, BolusSync, Cancellation, CarbsOp, ExtendedBolusOp, ExtendedBolusSync,
    TemporaryBasalOp, TemporaryBasalSync, TherapyEventOp, Transaction, TransactionResult,
  },
  treatment::{
    Bolus, BolusType, Carbs, GlucoseReading, RowId, TemporaryBasal, TherapyEvent,
    TherapyEventType, TreatmentKind,
  },
};
use tracing::{debug, error};

use crate::{Error, Result, guard::IdentityGuard};

pub struct PumpSync<S, P, A, C> {
  pub(crate) store: S,
  pub(crate) guard: IdentityGuard<P, A, C>,
}

impl<S, P, A, C> PumpSync<S, P, A, C>
where
  S: TreatmentStore,
  P: Preferences,
  A: AlertSink,
  C: Clock,
{
  pub fn new(store: S, guard: IdentityGuard<P, A, C>) -> Self { Self { store, guard } }

  pub fn store(&self) -> &S { &self.store }

  pub fn guard(&self) -> &IdentityGuard<P, A, C> { &self.guard }

  async fn run(&self, transaction: Transaction) -> Result<TransactionResult> {
    let op = transaction.name();
    match self.store.run(transaction).await {
      Ok(result) => {
        debug!(
          op,
          inserted = result.inserted.len(),
          updated = result.updated.len(),
          invalidated = result.invalidated.len(),
          "transaction applied"
        );
        Ok(result)
      }
      Err(e) => {
        error!(op, error = %e, "error while saving treatment");
        Err(Error::store(e))
      }
    }
  }

  async fn inserts(&self, transaction: Transaction) -> Result<bool> {
    Ok(!self.run(transaction).await?.inserted.is_empty())
  }

  async fn updates(&self, transaction: Transaction) -> Result<bool> {
    Ok(!self.run(transaction).await?.updated.is_empty())
  }

  async fn invalidates(&self, transaction: Transaction) -> Result<bool> {
    Ok(!self.run(transaction).await?.invalidated.is_empty())
  }

  // ─── Pump identity ─────────────────────────────────────────────────────────

  /// Forget the registered pump so the next record registers a new one.
  ///
  /// With `end_running`, the temporary basal and extended bolus still running
  /// for the old pump are closed at "now" before the identity is cleared.
  pub async fn connect_new_pump(&self, end_running: bool) -> Result<()> {
    if end_running && let Some(current) = self.guard.current().await? {
      let now = self.guard.clock().now();
      let cancellation = Cancellation {
        timestamp:   now,
        end_pump_id: now.timestamp_millis(),
        pump:        current.pump,
      };
      self
        .run(Transaction::TemporaryBasal(TemporaryBasalOp::CancelActive(
          cancellation.clone(),
        )))
        .await?;
      self
        .run(Transaction::ExtendedBolus(ExtendedBolusOp::CancelActive(cancellation)))
        .await?;
    }
    self.guard.reset().await
  }

  /// Whether `pump` is the registered pump. Does not register anything.
  pub async fn verify_pump_identification(&self, pump: &PumpIdentity) -> Result<bool> {
    self.guard.verify(pump).await
  }

  // ─── Boluses ───────────────────────────────────────────────────────────────

  /// Record a bolus the driver is about to deliver, before the pump has
  /// assigned its own id.
  pub async fn add_bolus_with_temp_id(
    &self,
    timestamp: DateTime<Utc>,
    amount: f64,
    temporary_id: i64,
    kind: BolusType,
    pump: &PumpIdentity,
  ) -> Result<bool> {
    if !self.guard.accept(timestamp, pump).await? {
      return Ok(false);
    }
    let bolus = Bolus {
      timestamp,
      amount,
      kind,
      ids: InterfaceIds::new(pump.clone()).with_temporary_id(temporary_id),
    };
    self.inserts(Transaction::Bolus(BolusOp::InsertWithTempId { bolus })).await
  }

  /// Attach the pump's permanent id to the bolus recorded under
  /// `temporary_id`. Returns `true` if a row was resolved.
  pub async fn sync_bolus_with_temp_id(
    &self,
    temporary_id: i64,
    pump_id: i64,
    sync: BolusSync,
  ) -> Result<bool> {
    if !self.guard.accept(sync.timestamp, &sync.pump).await? {
      return Ok(false);
    }
    self
      .updates(Transaction::Bolus(BolusOp::ResolveTempId { temporary_id, pump_id, sync }))
      .await
  }

  /// Insert or update the bolus the pump knows as `pump_id`. Returns `true`
  /// only when a new row was created.
  pub async fn sync_bolus_with_pump_id(&self, pump_id: i64, sync: BolusSync) -> Result<bool> {
    if !self.guard.accept(sync.timestamp, &sync.pump).await? {
      return Ok(false);
    }
    self.inserts(Transaction::Bolus(BolusOp::UpsertByPumpId { pump_id, sync })).await
  }

  // ─── Carbs and therapy events ──────────────────────────────────────────────

  /// Store a carbohydrate entry unless one already exists for this pump at
  /// exactly `timestamp`.
  pub async fn sync_carbs_with_timestamp(
    &self,
    timestamp: DateTime<Utc>,
    amount: f64,
    pump_id: Option<i64>,
    pump: &PumpIdentity,
  ) -> Result<bool> {
    if !self.guard.accept(timestamp, pump).await? {
      return Ok(false);
    }
    let carbs = Carbs {
      timestamp,
      amount,
      duration: Duration::zero(),
      ids: InterfaceIds::new(pump.clone()).with_pump_id(pump_id),
    };
    self.inserts(Transaction::Carbs(CarbsOp::InsertIfNewByTimestamp { carbs })).await
  }

  pub async fn insert_therapy_event_if_new_with_timestamp(
    &self,
    timestamp: DateTime<Utc>,
    kind: TherapyEventType,
    note: Option<String>,
    glucose: Option<GlucoseReading>,
    pump_id: Option<i64>,
    pump: &PumpIdentity,
  ) -> Result<bool> {
    if !self.guard.accept(timestamp, pump).await? {
      return Ok(false);
    }
    let therapy_event = TherapyEvent {
      timestamp,
      kind,
      note,
      glucose,
      ids: InterfaceIds::new(pump.clone()).with_pump_id(pump_id),
    };
    self
      .inserts(Transaction::TherapyEvent(TherapyEventOp::InsertIfNewByTimestamp {
        therapy_event,
      }))
      .await
  }

  /// Record a driver message as an announcement stamped "now".
  ///
  /// Best effort: a rejection or a store failure is logged and dropped.
  pub async fn insert_announcement(
    &self,
    message: impl Into<String>,
    pump_id: Option<i64>,
    pump: &PumpIdentity,
  ) {
    let now = self.guard.clock().now();
    let outcome = self
      .insert_therapy_event_if_new_with_timestamp(
        now,
        TherapyEventType::Announcement,
        Some(message.into()),
        None,
        pump_id,
        pump,
      )
      .await;
    match outcome {
      Ok(true) => {}
      Ok(false) => debug!(pump = %pump, "announcement not stored"),
      Err(e) => error!(pump = %pump, error = %e, "failed to store announcement"),
    }
  }

  // ─── Temporary basals ──────────────────────────────────────────────────────

  /// Record a temporary basal before the pump has confirmed it. A basal
  /// still running for the same pump is cut short at `sync.timestamp`.
  pub async fn add_temporary_basal_with_temp_id(
    &self,
    temporary_id: i64,
    sync: TemporaryBasalSync,
  ) -> Result<bool> {
    if !self.guard.accept(sync.timestamp, &sync.pump).await? {
      return Ok(false);
    }
    let temporary_basal = TemporaryBasal {
      timestamp:   sync.timestamp,
      rate:        sync.rate,
      duration:    sync.duration,
      is_absolute: sync.is_absolute,
      kind:        sync.kind.unwrap_or_default(),
      ids:         InterfaceIds::new(sync.pump).with_temporary_id(temporary_id),
    };
    self
      .inserts(Transaction::TemporaryBasal(TemporaryBasalOp::InsertWithTempId {
        temporary_basal,
      }))
      .await
  }

  pub async fn sync_temporary_basal_with_temp_id(
    &self,
    temporary_id: i64,
    pump_id: Option<i64>,
    sync: TemporaryBasalSync,
  ) -> Result<bool> {
    if !self.guard.accept(sync.timestamp, &sync.pump).await? {
      return Ok(false);
    }
    self
      .updates(Transaction::TemporaryBasal(TemporaryBasalOp::ResolveTempId {
        temporary_id,
        pump_id,
        sync,
      }))
      .await
  }

  pub async fn sync_temporary_basal_with_pump_id(
    &self,
    pump_id: i64,
    sync: TemporaryBasalSync,
  ) -> Result<bool> {
    if !self.guard.accept(sync.timestamp, &sync.pump).await? {
      return Ok(false);
    }
    self
      .inserts(Transaction::TemporaryBasal(TemporaryBasalOp::UpsertByPumpId {
        pump_id,
        sync,
      }))
      .await
  }

  /// Close the temporary basal running at `timestamp`. Returns `false` when
  /// nothing was running.
  pub async fn sync_stop_temporary_basal_with_pump_id(
    &self,
    timestamp: DateTime<Utc>,
    end_pump_id: i64,
    pump: &PumpIdentity,
  ) -> Result<bool> {
    if !self.guard.accept(timestamp, pump).await? {
      return Ok(false);
    }
    let cancellation = Cancellation { timestamp, end_pump_id, pump: pump.clone() };
    self
      .updates(Transaction::TemporaryBasal(TemporaryBasalOp::CancelActive(cancellation)))
      .await
  }

  // ─── Extended boluses ──────────────────────────────────────────────────────

  pub async fn sync_extended_bolus_with_pump_id(
    &self,
    pump_id: i64,
    sync: ExtendedBolusSync,
  ) -> Result<bool> {
    if !self.guard.accept(sync.timestamp, &sync.pump).await? {
      return Ok(false);
    }
    self
      .inserts(Transaction::ExtendedBolus(ExtendedBolusOp::UpsertByPumpId {
        pump_id,
        sync,
      }))
      .await
  }

  pub async fn sync_stop_extended_bolus_with_pump_id(
    &self,
    timestamp: DateTime<Utc>,
    end_pump_id: i64,
    pump: &PumpIdentity,
  ) -> Result<bool> {
    if !self.guard.accept(timestamp, pump).await? {
      return Ok(false);
    }
    let cancellation = Cancellation { timestamp, end_pump_id, pump: pump.clone() };
    self
      .updates(Transaction::ExtendedBolus(ExtendedBolusOp::CancelActive(cancellation)))
      .await
  }

  // ─── Corrections ───────────────────────────────────────────────────────────
  //
  // Invalidations fix history after the fact and bypass the identity guard.

  pub async fn invalidate_temporary_basal(&self, id: RowId) -> Result<bool> {
    self.invalidate(TreatmentKind::TemporaryBasal, id).await
  }

  pub async fn invalidate_temporary_basal_with_pump_id(
    &self,
    pump_id: i64,
    pump: &PumpIdentity,
  ) -> Result<bool> {
    self
      .invalidates(Transaction::TemporaryBasal(TemporaryBasalOp::InvalidateByPumpId {
        pump_id,
        pump: pump.clone(),
      }))
      .await
  }

  pub async fn invalidate_temporary_basal_with_temp_id(
    &self,
    temporary_id: i64,
  ) -> Result<bool> {
    self
      .invalidates(Transaction::TemporaryBasal(TemporaryBasalOp::InvalidateByTempId {
        temporary_id,
      }))
      .await
  }

  /// Soft-delete row `id` of `kind`. Returns `false` if it was already
  /// invalid or does not exist.
  pub async fn invalidate(&self, kind: TreatmentKind, id: RowId) -> Result<bool> {
    self.invalidates(Transaction::invalidate(kind, id)).await
  }
}
