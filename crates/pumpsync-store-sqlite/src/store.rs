//! [`SqliteStore`]: the SQLite implementation of [`TreatmentStore`].

use std::path::Path;

use chrono::{DateTime, Utc};
use pumpsync_core::{
  store::{HistoryQuery, TreatmentStore},
  transaction::{Transaction, TransactionResult},
  treatment::{
    Bolus, BolusType, ExtendedBolus, Stored, TemporaryBasal, Treatment, TreatmentKind,
  },
};
use rusqlite::{OptionalExtension as _, TransactionBehavior};

use crate::{
  Result,
  apply::apply,
  encode::{
    BOLUS_COLUMNS, CARBS_COLUMNS, EXTENDED_BOLUS_COLUMNS, RawBolus, RawCarbs,
    RawExtendedBolus, RawTemporaryBasal, RawTherapyEvent, TEMPORARY_BASAL_COLUMNS,
    THERAPY_EVENT_COLUMNS, encode_ms,
  },
  preferences::SqlitePreferences,
  schema::SCHEMA,
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A treatment history backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store, for tests.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Durable preferences living in the same database file.
  pub fn preferences(&self) -> SqlitePreferences {
    SqlitePreferences::new(self.conn.clone())
  }

  async fn history_of(
    &self,
    kind: TreatmentKind,
    query: &HistoryQuery,
  ) -> Result<Vec<Treatment>> {
    let (table, columns) = match kind {
      TreatmentKind::Bolus => ("boluses", BOLUS_COLUMNS),
      TreatmentKind::Carbs => ("carbs", CARBS_COLUMNS),
      TreatmentKind::TemporaryBasal => ("temporary_basals", TEMPORARY_BASAL_COLUMNS),
      TreatmentKind::ExtendedBolus => ("extended_boluses", EXTENDED_BOLUS_COLUMNS),
      TreatmentKind::TherapyEvent => ("therapy_events", THERAPY_EVENT_COLUMNS),
    };

    let pump_type   = query.pump.as_ref().map(|p| p.pump_type.tag());
    let pump_serial = query.pump.as_ref().map(|p| p.serial.clone());
    let since       = query.since.map(encode_ms);
    let until       = query.until.map(encode_ms);
    let include_inv = query.include_invalid;

    let sql = format!(
      "SELECT {columns} FROM {table}
       WHERE (?1 IS NULL OR pump_type = ?1)
         AND (?2 IS NULL OR pump_serial = ?2)
         AND (?3 IS NULL OR timestamp >= ?3)
         AND (?4 IS NULL OR timestamp < ?4)
         AND (?5 OR is_valid = 1)
       ORDER BY timestamp, id"
    );

    macro_rules! fetch {
      ($raw:ty, $variant:path) => {{
        let raws: Vec<$raw> = self
          .conn
          .call(move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
              .query_map(
                rusqlite::params![pump_type, pump_serial, since, until, include_inv],
                <$raw>::from_row,
              )?
              .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
          })
          .await?;
        raws
          .into_iter()
          .map(|raw| raw.into_stored().map($variant))
          .collect::<Result<Vec<_>>>()
      }};
    }

    match kind {
      TreatmentKind::Bolus => fetch!(RawBolus, Treatment::Bolus),
      TreatmentKind::Carbs => fetch!(RawCarbs, Treatment::Carbs),
      TreatmentKind::TemporaryBasal => {
        fetch!(RawTemporaryBasal, Treatment::TemporaryBasal)
      }
      TreatmentKind::ExtendedBolus => {
        fetch!(RawExtendedBolus, Treatment::ExtendedBolus)
      }
      TreatmentKind::TherapyEvent => fetch!(RawTherapyEvent, Treatment::TherapyEvent),
    }
  }
}

// ─── TreatmentStore impl ─────────────────────────────────────────────────────

impl TreatmentStore for SqliteStore {
  type Error = crate::Error;

  async fn run(&self, transaction: Transaction) -> Result<TransactionResult> {
    let result = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let result = apply(&tx, transaction)?;
        tx.commit()?;
        Ok(result)
      })
      .await?;
    Ok(result)
  }

  async fn temporary_basal_active_at(
    &self,
    at: DateTime<Utc>,
  ) -> Result<Option<Stored<TemporaryBasal>>> {
    let at_ms = encode_ms(at);
    let raw: Option<RawTemporaryBasal> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!(
                "SELECT {TEMPORARY_BASAL_COLUMNS} FROM temporary_basals
                 WHERE is_valid = 1
                   AND timestamp <= ?1 AND timestamp + duration > ?1
                 ORDER BY timestamp DESC LIMIT 1"
              ),
              rusqlite::params![at_ms],
              RawTemporaryBasal::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawTemporaryBasal::into_stored).transpose()
  }

  async fn extended_bolus_active_at(
    &self,
    at: DateTime<Utc>,
  ) -> Result<Option<Stored<ExtendedBolus>>> {
    let at_ms = encode_ms(at);
    let raw: Option<RawExtendedBolus> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!(
                "SELECT {EXTENDED_BOLUS_COLUMNS} FROM extended_boluses
                 WHERE is_valid = 1 AND duration > 0
                   AND timestamp <= ?1 AND timestamp + duration > ?1
                 ORDER BY timestamp DESC LIMIT 1"
              ),
              rusqlite::params![at_ms],
              RawExtendedBolus::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawExtendedBolus::into_stored).transpose()
  }

  async fn last_bolus(&self) -> Result<Option<Stored<Bolus>>> {
    let priming = BolusType::Priming.tag();
    let raw: Option<RawBolus> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!(
                "SELECT {BOLUS_COLUMNS} FROM boluses
                 WHERE is_valid = 1 AND bolus_type != ?1
                 ORDER BY timestamp DESC, id DESC LIMIT 1"
              ),
              rusqlite::params![priming],
              RawBolus::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawBolus::into_stored).transpose()
  }

  async fn history(&self, query: &HistoryQuery) -> Result<Vec<Treatment>> {
    let mut rows = Vec::new();
    for kind in TreatmentKind::ALL {
      if query.wants(kind) {
        rows.extend(self.history_of(kind, query).await?);
      }
    }

    // Stable: rows of one kind are already in (timestamp, id) order.
    rows.sort_by_key(Treatment::timestamp);
    if let Some(limit) = query.limit {
      rows.truncate(limit);
    }
    Ok(rows)
  }
}
