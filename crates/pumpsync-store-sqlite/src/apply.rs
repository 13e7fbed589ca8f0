//! Execution of a [`Transaction`] inside one SQLite transaction.
//!
//! Everything here runs on the connection thread with the write lock already
//! taken (`BEGIN IMMEDIATE`), so each "look up, then write" sequence is
//! atomic with respect to every other writer.

use chrono::{DateTime, Utc};
use pumpsync_core::{
  pump::{InterfaceIds, PumpIdentity},
  transaction::{
    BolusOp, BolusSync, Cancellation, CarbsOp, ExtendedBolusOp, ExtendedBolusSync,
    TemporaryBasalOp, TemporaryBasalSync, TherapyEventOp, Transaction,
    TransactionResult,
  },
  treatment::{Bolus, RowId, TemporaryBasal},
};
use rusqlite::{OptionalExtension as _, params};

use crate::encode::{encode_duration, encode_ms};

type Tx<'c> = rusqlite::Transaction<'c>;

/// Apply `transaction`, recording every touched row in the returned result.
pub fn apply(
  tx: &Tx<'_>,
  transaction: Transaction,
) -> rusqlite::Result<TransactionResult> {
  let mut result = TransactionResult::default();
  match transaction {
    Transaction::Bolus(op) => bolus(tx, op, &mut result)?,
    Transaction::Carbs(op) => carbs(tx, op, &mut result)?,
    Transaction::TemporaryBasal(op) => temporary_basal(tx, op, &mut result)?,
    Transaction::ExtendedBolus(op) => extended_bolus(tx, op, &mut result)?,
    Transaction::TherapyEvent(op) => therapy_event(tx, op, &mut result)?,
  }
  Ok(result)
}

// ─── Shared helpers ──────────────────────────────────────────────────────────

/// Set `is_valid = 0` on row `id` of `table` if it is still valid.
fn invalidate_row(
  tx: &Tx<'_>,
  table: &'static str,
  id: RowId,
  result: &mut TransactionResult,
) -> rusqlite::Result<()> {
  let changed = tx.execute(
    &format!("UPDATE {table} SET is_valid = 0 WHERE id = ?1 AND is_valid = 1"),
    params![id.0],
  )?;
  if changed > 0 {
    result.invalidated.push(id);
  }
  Ok(())
}

/// Shorten whichever valid row of `pump` is running at `at` so that it ends
/// there. Used before writing a newer basal or extended bolus; `exclude` is
/// the row being rewritten, if any.
fn cut_running(
  tx: &Tx<'_>,
  table: &'static str,
  pump: &PumpIdentity,
  at: DateTime<Utc>,
  exclude: Option<i64>,
  result: &mut TransactionResult,
) -> rusqlite::Result<()> {
  let at_ms = encode_ms(at);
  let running: Option<(i64, i64)> = tx
    .query_row(
      &format!(
        "SELECT id, timestamp FROM {table}
         WHERE pump_type = ?1 AND pump_serial = ?2 AND is_valid = 1
           AND duration > 0
           AND timestamp <= ?3 AND timestamp + duration > ?3
           AND (?4 IS NULL OR id != ?4)
         ORDER BY timestamp DESC LIMIT 1"
      ),
      params![pump.pump_type.tag(), pump.serial, at_ms, exclude],
      |r| Ok((r.get(0)?, r.get(1)?)),
    )
    .optional()?;

  if let Some((id, start)) = running {
    tx.execute(
      &format!("UPDATE {table} SET duration = ?2 WHERE id = ?1"),
      params![id, at_ms - start],
    )?;
    result.updated.push(RowId(id));
  }
  Ok(())
}

/// End row `id` no later than the start of the next valid row of the same
/// pump. Reports can arrive out of order, so the row just written may start
/// before one that is already stored.
fn clamp_to_next(tx: &Tx<'_>, table: &'static str, id: i64) -> rusqlite::Result<()> {
  let (start, next): (i64, Option<i64>) = tx.query_row(
    &format!(
      "SELECT t.timestamp, MIN(n.timestamp) FROM {table} t
       LEFT JOIN {table} n
         ON n.pump_type = t.pump_type AND n.pump_serial = t.pump_serial
        AND n.id != t.id AND n.is_valid = 1 AND n.duration > 0
        AND n.timestamp > t.timestamp
        AND n.timestamp < t.timestamp + t.duration
       WHERE t.id = ?1"
    ),
    params![id],
    |r| Ok((r.get(0)?, r.get(1)?)),
  )?;

  if let Some(next) = next {
    tx.execute(
      &format!("UPDATE {table} SET duration = ?2 WHERE id = ?1"),
      params![id, next - start],
    )?;
  }
  Ok(())
}

/// The open row of `pump` whose window covers the cancellation instant.
fn find_cancellable(
  tx: &Tx<'_>,
  table: &'static str,
  c: &Cancellation,
) -> rusqlite::Result<Option<(i64, i64, i64)>> {
  tx.query_row(
    &format!(
      "SELECT id, timestamp, duration FROM {table}
       WHERE pump_type = ?1 AND pump_serial = ?2 AND is_valid = 1
         AND end_id IS NULL AND duration > 0
         AND timestamp <= ?3 AND timestamp + duration > ?3
       ORDER BY timestamp DESC LIMIT 1"
    ),
    params![c.pump.pump_type.tag(), c.pump.serial, encode_ms(c.timestamp)],
    |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
  )
  .optional()
}

// ─── Bolus ───────────────────────────────────────────────────────────────────

fn insert_bolus(tx: &Tx<'_>, bolus: &Bolus) -> rusqlite::Result<RowId> {
  let InterfaceIds { temporary_id, pump_id, end_id, pump } = &bolus.ids;
  tx.execute(
    "INSERT INTO boluses (
       temporary_id, pump_id, end_id, pump_type, pump_serial,
       timestamp, amount, bolus_type
     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
    params![
      temporary_id,
      pump_id,
      end_id,
      pump.pump_type.tag(),
      pump.serial,
      encode_ms(bolus.timestamp),
      bolus.amount,
      bolus.kind.tag(),
    ],
  )?;
  Ok(RowId(tx.last_insert_rowid()))
}

fn bolus(
  tx: &Tx<'_>,
  op: BolusOp,
  result: &mut TransactionResult,
) -> rusqlite::Result<()> {
  match op {
    BolusOp::InsertWithTempId { bolus } => {
      result.inserted.push(insert_bolus(tx, &bolus)?);
    }

    BolusOp::ResolveTempId { temporary_id, pump_id, sync } => {
      // Only unresolved rows match, so a second resolution is a no-op.
      let found: Option<i64> = tx
        .query_row(
          "SELECT id FROM boluses
           WHERE pump_type = ?1 AND pump_serial = ?2
             AND temporary_id = ?3 AND pump_id IS NULL
           ORDER BY id DESC LIMIT 1",
          params![sync.pump.pump_type.tag(), sync.pump.serial, temporary_id],
          |r| r.get(0),
        )
        .optional()?;

      if let Some(id) = found {
        tx.execute(
          "UPDATE boluses
           SET timestamp = ?2, amount = ?3,
               bolus_type = COALESCE(?4, bolus_type), pump_id = ?5
           WHERE id = ?1",
          params![
            id,
            encode_ms(sync.timestamp),
            sync.amount,
            sync.kind.map(|k| k.tag()),
            pump_id,
          ],
        )?;
        result.updated.push(RowId(id));
      }
    }

    BolusOp::UpsertByPumpId { pump_id, sync } => {
      let BolusSync { timestamp, amount, kind, pump } = sync;
      let existing: Option<(i64, i64, f64, String)> = tx
        .query_row(
          "SELECT id, timestamp, amount, bolus_type FROM boluses
           WHERE pump_type = ?1 AND pump_serial = ?2 AND pump_id = ?3
           ORDER BY id DESC LIMIT 1",
          params![pump.pump_type.tag(), pump.serial, pump_id],
          |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
        )
        .optional()?;

      match existing {
        None => {
          let bolus = Bolus {
            timestamp,
            amount,
            kind: kind.unwrap_or_default(),
            ids: InterfaceIds::new(pump).with_pump_id(Some(pump_id)),
          };
          result.inserted.push(insert_bolus(tx, &bolus)?);
        }
        Some((id, stored_ts, stored_amount, stored_kind)) => {
          let kind_changed = kind.is_some_and(|k| k.tag() != stored_kind);
          if stored_ts != encode_ms(timestamp) || stored_amount != amount || kind_changed
          {
            tx.execute(
              "UPDATE boluses
               SET timestamp = ?2, amount = ?3, bolus_type = COALESCE(?4, bolus_type)
               WHERE id = ?1",
              params![id, encode_ms(timestamp), amount, kind.map(|k| k.tag())],
            )?;
            result.updated.push(RowId(id));
          }
        }
      }
    }

    BolusOp::Invalidate { id } => invalidate_row(tx, "boluses", id, result)?,
  }
  Ok(())
}

// ─── Carbs ───────────────────────────────────────────────────────────────────

fn carbs(
  tx: &Tx<'_>,
  op: CarbsOp,
  result: &mut TransactionResult,
) -> rusqlite::Result<()> {
  match op {
    CarbsOp::InsertIfNewByTimestamp { carbs } => {
      let InterfaceIds { temporary_id, pump_id, end_id, pump } = &carbs.ids;
      let ts = encode_ms(carbs.timestamp);

      // Keyed on (pump, timestamp) only: a second entry at the same instant
      // is treated as a retry whatever its amount. Invalidated rows do not
      // count, so a corrected entry can be reported again.
      let exists = tx
        .query_row(
          "SELECT 1 FROM carbs
           WHERE pump_type = ?1 AND pump_serial = ?2 AND timestamp = ?3
             AND is_valid = 1",
          params![pump.pump_type.tag(), pump.serial, ts],
          |_| Ok(()),
        )
        .optional()?
        .is_some();

      if !exists {
        tx.execute(
          "INSERT INTO carbs (
             temporary_id, pump_id, end_id, pump_type, pump_serial,
             timestamp, amount, duration
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
          params![
            temporary_id,
            pump_id,
            end_id,
            pump.pump_type.tag(),
            pump.serial,
            ts,
            carbs.amount,
            encode_duration(carbs.duration),
          ],
        )?;
        result.inserted.push(RowId(tx.last_insert_rowid()));
      }
    }

    CarbsOp::Invalidate { id } => invalidate_row(tx, "carbs", id, result)?,
  }
  Ok(())
}

// ─── Temporary basal ─────────────────────────────────────────────────────────

fn insert_temporary_basal(
  tx: &Tx<'_>,
  tbr: &TemporaryBasal,
) -> rusqlite::Result<RowId> {
  let InterfaceIds { temporary_id, pump_id, end_id, pump } = &tbr.ids;
  tx.execute(
    "INSERT INTO temporary_basals (
       temporary_id, pump_id, end_id, pump_type, pump_serial,
       timestamp, rate, duration, is_absolute, basal_type
     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
    params![
      temporary_id,
      pump_id,
      end_id,
      pump.pump_type.tag(),
      pump.serial,
      encode_ms(tbr.timestamp),
      tbr.rate,
      encode_duration(tbr.duration),
      tbr.is_absolute,
      tbr.kind.tag(),
    ],
  )?;
  Ok(RowId(tx.last_insert_rowid()))
}

fn temporary_basal(
  tx: &Tx<'_>,
  op: TemporaryBasalOp,
  result: &mut TransactionResult,
) -> rusqlite::Result<()> {
  const TABLE: &str = "temporary_basals";

  match op {
    TemporaryBasalOp::InsertWithTempId { temporary_basal } => {
      cut_running(
        tx,
        TABLE,
        &temporary_basal.ids.pump,
        temporary_basal.timestamp,
        None,
        result,
      )?;
      let id = insert_temporary_basal(tx, &temporary_basal)?;
      clamp_to_next(tx, TABLE, id.0)?;
      result.inserted.push(id);
    }

    TemporaryBasalOp::ResolveTempId { temporary_id, pump_id, sync } => {
      let TemporaryBasalSync { timestamp, rate, duration, is_absolute, kind, pump } =
        sync;
      let found: Option<i64> = tx
        .query_row(
          "SELECT id FROM temporary_basals
           WHERE pump_type = ?1 AND pump_serial = ?2
             AND temporary_id = ?3 AND pump_id IS NULL
           ORDER BY id DESC LIMIT 1",
          params![pump.pump_type.tag(), pump.serial, temporary_id],
          |r| r.get(0),
        )
        .optional()?;

      if let Some(id) = found {
        cut_running(tx, TABLE, &pump, timestamp, Some(id), result)?;
        tx.execute(
          "UPDATE temporary_basals
           SET timestamp = ?2, rate = ?3, duration = ?4, is_absolute = ?5,
               basal_type = COALESCE(?6, basal_type), pump_id = ?7
           WHERE id = ?1",
          params![
            id,
            encode_ms(timestamp),
            rate,
            encode_duration(duration),
            is_absolute,
            kind.map(|k| k.tag()),
            pump_id,
          ],
        )?;
        clamp_to_next(tx, TABLE, id)?;
        result.updated.push(RowId(id));
      }
    }

    TemporaryBasalOp::UpsertByPumpId { pump_id, sync } => {
      let TemporaryBasalSync { timestamp, rate, duration, is_absolute, kind, pump } =
        sync;
      let existing: Option<(i64, Option<i64>, i64, f64, i64, bool, String)> = tx
        .query_row(
          "SELECT id, end_id, timestamp, rate, duration, is_absolute, basal_type
           FROM temporary_basals
           WHERE pump_type = ?1 AND pump_serial = ?2 AND pump_id = ?3
           ORDER BY id DESC LIMIT 1",
          params![pump.pump_type.tag(), pump.serial, pump_id],
          |r| {
            Ok((
              r.get(0)?,
              r.get(1)?,
              r.get(2)?,
              r.get(3)?,
              r.get(4)?,
              r.get(5)?,
              r.get(6)?,
            ))
          },
        )
        .optional()?;

      match existing {
        None => {
          cut_running(tx, TABLE, &pump, timestamp, None, result)?;
          let tbr = TemporaryBasal {
            timestamp,
            rate,
            duration,
            is_absolute,
            kind: kind.unwrap_or_default(),
            ids: InterfaceIds::new(pump).with_pump_id(Some(pump_id)),
          };
          let id = insert_temporary_basal(tx, &tbr)?;
          clamp_to_next(tx, TABLE, id.0)?;
          result.inserted.push(id);
        }
        // A row already closed by a stop event keeps its shortened window;
        // re-reporting the original start must not reopen it.
        Some((_, Some(_), ..)) => {}
        Some((id, None, s_ts, s_rate, s_duration, s_absolute, s_kind)) => {
          let changed = s_ts != encode_ms(timestamp)
            || s_rate != rate
            || s_duration != encode_duration(duration)
            || s_absolute != is_absolute
            || kind.is_some_and(|k| k.tag() != s_kind);
          if changed {
            cut_running(tx, TABLE, &pump, timestamp, Some(id), result)?;
            tx.execute(
              "UPDATE temporary_basals
               SET timestamp = ?2, rate = ?3, duration = ?4, is_absolute = ?5,
                   basal_type = COALESCE(?6, basal_type)
               WHERE id = ?1",
              params![
                id,
                encode_ms(timestamp),
                rate,
                encode_duration(duration),
                is_absolute,
                kind.map(|k| k.tag()),
              ],
            )?;
            clamp_to_next(tx, TABLE, id)?;
            result.updated.push(RowId(id));
          }
        }
      }
    }

    TemporaryBasalOp::CancelActive(c) => {
      if let Some((id, start, _)) = find_cancellable(tx, TABLE, &c)? {
        tx.execute(
          "UPDATE temporary_basals SET duration = ?2, end_id = ?3 WHERE id = ?1",
          params![id, encode_ms(c.timestamp) - start, c.end_pump_id],
        )?;
        result.updated.push(RowId(id));
      }
    }

    TemporaryBasalOp::Invalidate { id } => invalidate_row(tx, TABLE, id, result)?,

    TemporaryBasalOp::InvalidateByPumpId { pump_id, pump } => {
      let found: Option<i64> = tx
        .query_row(
          "SELECT id FROM temporary_basals
           WHERE pump_type = ?1 AND pump_serial = ?2 AND pump_id = ?3
             AND is_valid = 1
           ORDER BY id DESC LIMIT 1",
          params![pump.pump_type.tag(), pump.serial, pump_id],
          |r| r.get(0),
        )
        .optional()?;
      if let Some(id) = found {
        invalidate_row(tx, TABLE, RowId(id), result)?;
      }
    }

    TemporaryBasalOp::InvalidateByTempId { temporary_id } => {
      let found: Option<i64> = tx
        .query_row(
          "SELECT id FROM temporary_basals
           WHERE temporary_id = ?1 AND is_valid = 1
           ORDER BY id DESC LIMIT 1",
          params![temporary_id],
          |r| r.get(0),
        )
        .optional()?;
      if let Some(id) = found {
        invalidate_row(tx, TABLE, RowId(id), result)?;
      }
    }
  }
  Ok(())
}

// ─── Extended bolus ──────────────────────────────────────────────────────────

fn extended_bolus(
  tx: &Tx<'_>,
  op: ExtendedBolusOp,
  result: &mut TransactionResult,
) -> rusqlite::Result<()> {
  const TABLE: &str = "extended_boluses";

  match op {
    ExtendedBolusOp::UpsertByPumpId { pump_id, sync } => {
      let ExtendedBolusSync {
        timestamp,
        amount,
        duration,
        is_emulating_temp_basal,
        pump,
      } = sync;
      let existing: Option<(i64, Option<i64>, i64, f64, i64, bool)> = tx
        .query_row(
          "SELECT id, end_id, timestamp, amount, duration, is_emulating_temp_basal
           FROM extended_boluses
           WHERE pump_type = ?1 AND pump_serial = ?2 AND pump_id = ?3
           ORDER BY id DESC LIMIT 1",
          params![pump.pump_type.tag(), pump.serial, pump_id],
          |r| {
            Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?, r.get(5)?))
          },
        )
        .optional()?;

      match existing {
        None => {
          cut_running(tx, TABLE, &pump, timestamp, None, result)?;
          tx.execute(
            "INSERT INTO extended_boluses (
               pump_id, pump_type, pump_serial,
               timestamp, amount, duration, is_emulating_temp_basal
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
              pump_id,
              pump.pump_type.tag(),
              pump.serial,
              encode_ms(timestamp),
              amount,
              encode_duration(duration),
              is_emulating_temp_basal,
            ],
          )?;
          let id = tx.last_insert_rowid();
          clamp_to_next(tx, TABLE, id)?;
          result.inserted.push(RowId(id));
        }
        Some((_, Some(_), ..)) => {}
        Some((id, None, s_ts, s_amount, s_duration, s_emulating)) => {
          let changed = s_ts != encode_ms(timestamp)
            || s_amount != amount
            || s_duration != encode_duration(duration)
            || s_emulating != is_emulating_temp_basal;
          if changed {
            cut_running(tx, TABLE, &pump, timestamp, Some(id), result)?;
            tx.execute(
              "UPDATE extended_boluses
               SET timestamp = ?2, amount = ?3, duration = ?4,
                   is_emulating_temp_basal = ?5
               WHERE id = ?1",
              params![
                id,
                encode_ms(timestamp),
                amount,
                encode_duration(duration),
                is_emulating_temp_basal,
              ],
            )?;
            clamp_to_next(tx, TABLE, id)?;
            result.updated.push(RowId(id));
          }
        }
      }
    }

    ExtendedBolusOp::CancelActive(c) => {
      if let Some((id, start, duration)) = find_cancellable(tx, TABLE, &c)? {
        let delivered = encode_ms(c.timestamp) - start;
        // Only the share of the bolus that ran before the stop was delivered.
        let fraction = delivered as f64 / duration as f64;
        tx.execute(
          "UPDATE extended_boluses
           SET amount = amount * ?2, duration = ?3, end_id = ?4
           WHERE id = ?1",
          params![id, fraction, delivered, c.end_pump_id],
        )?;
        result.updated.push(RowId(id));
      }
    }

    ExtendedBolusOp::Invalidate { id } => invalidate_row(tx, TABLE, id, result)?,
  }
  Ok(())
}

// ─── Therapy event ───────────────────────────────────────────────────────────

fn therapy_event(
  tx: &Tx<'_>,
  op: TherapyEventOp,
  result: &mut TransactionResult,
) -> rusqlite::Result<()> {
  match op {
    TherapyEventOp::InsertIfNewByTimestamp { therapy_event: te } => {
      let InterfaceIds { temporary_id, pump_id, end_id, pump } = &te.ids;
      let ts = encode_ms(te.timestamp);

      let exists = tx
        .query_row(
          "SELECT 1 FROM therapy_events
           WHERE pump_type = ?1 AND pump_serial = ?2
             AND timestamp = ?3 AND event_type = ?4 AND is_valid = 1",
          params![pump.pump_type.tag(), pump.serial, ts, te.kind.tag()],
          |_| Ok(()),
        )
        .optional()?
        .is_some();

      if !exists {
        tx.execute(
          "INSERT INTO therapy_events (
             temporary_id, pump_id, end_id, pump_type, pump_serial,
             timestamp, event_type, note, glucose, glucose_units
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
          params![
            temporary_id,
            pump_id,
            end_id,
            pump.pump_type.tag(),
            pump.serial,
            ts,
            te.kind.tag(),
            te.note,
            te.glucose.map(|g| g.value),
            te.glucose.map(|g| g.units.tag()),
          ],
        )?;
        result.inserted.push(RowId(tx.last_insert_rowid()));
      }
    }

    TherapyEventOp::Invalidate { id } => {
      invalidate_row(tx, "therapy_events", id, result)?
    }
  }
  Ok(())
}
