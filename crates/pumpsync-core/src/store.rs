//! The `TreatmentStore` and `Preferences` traits and supporting query types.
//!
//! Both traits are implemented by storage backends (e.g.
//! `pumpsync-store-sqlite`). The reconciler depends on these abstractions,
//! not on any concrete backend.

use std::{collections::HashMap, convert::Infallible, future::Future, sync::Mutex};

use chrono::{DateTime, Utc};

use crate::{
  pump::PumpIdentity,
  transaction::{Transaction, TransactionResult},
  treatment::{Bolus, ExtendedBolus, Stored, TemporaryBasal, Treatment, TreatmentKind},
};

// ─── Query type ──────────────────────────────────────────────────────────────

/// Parameters for [`TreatmentStore::history`].
#[derive(Debug, Clone, Default)]
pub struct HistoryQuery {
  /// Restrict to these kinds; empty means all kinds.
  pub kinds:           Vec<TreatmentKind>,
  /// Restrict to rows reported by this device.
  pub pump:            Option<PumpIdentity>,
  pub since:           Option<DateTime<Utc>>,
  pub until:           Option<DateTime<Utc>>,
  /// If `false`, invalidated rows are left out.
  pub include_invalid: bool,
  pub limit:           Option<usize>,
}

impl HistoryQuery {
  pub fn wants(&self, kind: TreatmentKind) -> bool {
    self.kinds.is_empty() || self.kinds.contains(&kind)
  }
}

// ─── Treatment store ─────────────────────────────────────────────────────────

/// Abstraction over the transactional treatment history.
///
/// [`run`](Self::run) must execute the whole [`Transaction`] atomically: two
/// concurrent calls can never both observe "no existing row" and both insert.
///
/// All methods return `Send` futures so the trait can be used from a
/// multi-threaded tokio runtime.
pub trait TreatmentStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Apply one transaction and report which rows it touched.
  fn run(
    &self,
    transaction: Transaction,
  ) -> impl Future<Output = Result<TransactionResult, Self::Error>> + Send + '_;

  /// The valid temporary basal whose window covers `at`, if any.
  fn temporary_basal_active_at(
    &self,
    at: DateTime<Utc>,
  ) -> impl Future<Output = Result<Option<Stored<TemporaryBasal>>, Self::Error>>
  + Send
  + '_;

  /// The valid, non-degenerate extended bolus whose window covers `at`.
  fn extended_bolus_active_at(
    &self,
    at: DateTime<Utc>,
  ) -> impl Future<Output = Result<Option<Stored<ExtendedBolus>>, Self::Error>>
  + Send
  + '_;

  /// The most recent valid bolus, priming excluded.
  fn last_bolus(
    &self,
  ) -> impl Future<Output = Result<Option<Stored<Bolus>>, Self::Error>> + Send + '_;

  /// Stored treatments matching `query`, ordered by timestamp then id.
  fn history<'a>(
    &'a self,
    query: &'a HistoryQuery,
  ) -> impl Future<Output = Result<Vec<Treatment>, Self::Error>> + Send + 'a;
}

// ─── Preferences ─────────────────────────────────────────────────────────────

/// Small durable key-value store, used for the registered pump identity.
pub trait Preferences: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  fn get_string<'a>(
    &'a self,
    key: &'a str,
  ) -> impl Future<Output = Result<Option<String>, Self::Error>> + Send + 'a;

  fn get_long<'a>(
    &'a self,
    key: &'a str,
  ) -> impl Future<Output = Result<Option<i64>, Self::Error>> + Send + 'a;

  fn put_string<'a>(
    &'a self,
    key: &'a str,
    value: String,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  fn put_long<'a>(
    &'a self,
    key: &'a str,
    value: i64,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  fn remove<'a>(
    &'a self,
    key: &'a str,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;
}

#[derive(Debug, Clone, PartialEq)]
enum PrefValue {
  String(String),
  Long(i64),
}

/// Process-local [`Preferences`]; nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryPreferences {
  values: Mutex<HashMap<String, PrefValue>>,
}

impl MemoryPreferences {
  pub fn new() -> Self { Self::default() }

  fn with<T>(&self, f: impl FnOnce(&mut HashMap<String, PrefValue>) -> T) -> T {
    let mut guard = self.values.lock().unwrap_or_else(|e| e.into_inner());
    f(&mut guard)
  }
}

impl Preferences for MemoryPreferences {
  type Error = Infallible;

  async fn get_string(&self, key: &str) -> Result<Option<String>, Infallible> {
    Ok(self.with(|m| match m.get(key) {
      Some(PrefValue::String(s)) => Some(s.clone()),
      _ => None,
    }))
  }

  async fn get_long(&self, key: &str) -> Result<Option<i64>, Infallible> {
    Ok(self.with(|m| match m.get(key) {
      Some(PrefValue::Long(v)) => Some(*v),
      _ => None,
    }))
  }

  async fn put_string(&self, key: &str, value: String) -> Result<(), Infallible> {
    self.with(|m| m.insert(key.to_owned(), PrefValue::String(value)));
    Ok(())
  }

  async fn put_long(&self, key: &str, value: i64) -> Result<(), Infallible> {
    self.with(|m| m.insert(key.to_owned(), PrefValue::Long(value)));
    Ok(())
  }

  async fn remove(&self, key: &str) -> Result<(), Infallible> {
    self.with(|m| m.remove(key));
    Ok(())
  }
}
