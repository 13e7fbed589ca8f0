//! SQL schema for the pumpsync SQLite store.
//!
//! Executed once at connection startup via `PRAGMA user_version`. Future
//! migrations will be gated on that version number.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
///
/// Every treatment table starts with the same identity columns so rows decode
/// through one helper. Instants are epoch milliseconds and durations are
/// milliseconds, which keeps active-window checks in plain SQL arithmetic.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;

CREATE TABLE IF NOT EXISTS boluses (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    is_valid     INTEGER NOT NULL DEFAULT 1,
    temporary_id INTEGER,
    pump_id      INTEGER,
    end_id       INTEGER,
    pump_type    TEXT    NOT NULL,
    pump_serial  TEXT    NOT NULL,
    timestamp    INTEGER NOT NULL,
    amount       REAL    NOT NULL,
    bolus_type   TEXT    NOT NULL   -- 'normal' | 'smb' | 'priming'
);

CREATE TABLE IF NOT EXISTS carbs (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    is_valid     INTEGER NOT NULL DEFAULT 1,
    temporary_id INTEGER,
    pump_id      INTEGER,
    end_id       INTEGER,
    pump_type    TEXT    NOT NULL,
    pump_serial  TEXT    NOT NULL,
    timestamp    INTEGER NOT NULL,
    amount       REAL    NOT NULL,
    duration     INTEGER NOT NULL DEFAULT 0
);

-- Rows are closed by shortening `duration`; `end_id` names the stop event.
CREATE TABLE IF NOT EXISTS temporary_basals (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    is_valid     INTEGER NOT NULL DEFAULT 1,
    temporary_id INTEGER,
    pump_id      INTEGER,
    end_id       INTEGER,
    pump_type    TEXT    NOT NULL,
    pump_serial  TEXT    NOT NULL,
    timestamp    INTEGER NOT NULL,
    rate         REAL    NOT NULL,
    duration     INTEGER NOT NULL,
    is_absolute  INTEGER NOT NULL,
    basal_type   TEXT    NOT NULL
);

CREATE TABLE IF NOT EXISTS extended_boluses (
    id                      INTEGER PRIMARY KEY AUTOINCREMENT,
    is_valid                INTEGER NOT NULL DEFAULT 1,
    temporary_id            INTEGER,
    pump_id                 INTEGER,
    end_id                  INTEGER,
    pump_type               TEXT    NOT NULL,
    pump_serial             TEXT    NOT NULL,
    timestamp               INTEGER NOT NULL,
    amount                  REAL    NOT NULL,
    duration                INTEGER NOT NULL,
    is_emulating_temp_basal INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS therapy_events (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    is_valid      INTEGER NOT NULL DEFAULT 1,
    temporary_id  INTEGER,
    pump_id       INTEGER,
    end_id        INTEGER,
    pump_type     TEXT    NOT NULL,
    pump_serial   TEXT    NOT NULL,
    timestamp     INTEGER NOT NULL,
    event_type    TEXT    NOT NULL,
    note          TEXT,
    glucose       REAL,
    glucose_units TEXT
);

-- Durable key-value pairs (registered pump identity).
CREATE TABLE IF NOT EXISTS preferences (
    key        TEXT PRIMARY KEY,
    text_value TEXT,
    long_value INTEGER
);

CREATE INDEX IF NOT EXISTS boluses_pump_id_idx  ON boluses(pump_type, pump_serial, pump_id);
CREATE INDEX IF NOT EXISTS boluses_temp_id_idx  ON boluses(pump_type, pump_serial, temporary_id);
CREATE INDEX IF NOT EXISTS boluses_ts_idx       ON boluses(timestamp);
CREATE INDEX IF NOT EXISTS carbs_ts_idx         ON carbs(pump_type, pump_serial, timestamp);
CREATE INDEX IF NOT EXISTS tbr_pump_id_idx      ON temporary_basals(pump_type, pump_serial, pump_id);
CREATE INDEX IF NOT EXISTS tbr_temp_id_idx      ON temporary_basals(temporary_id);
CREATE INDEX IF NOT EXISTS tbr_ts_idx           ON temporary_basals(timestamp);
CREATE INDEX IF NOT EXISTS eb_pump_id_idx       ON extended_boluses(pump_type, pump_serial, pump_id);
CREATE INDEX IF NOT EXISTS eb_ts_idx            ON extended_boluses(timestamp);
CREATE INDEX IF NOT EXISTS te_ts_idx            ON therapy_events(pump_type, pump_serial, timestamp, event_type);

PRAGMA user_version = 1;
";
