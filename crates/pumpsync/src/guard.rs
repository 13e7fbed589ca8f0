//! Device identity guard: decides whether a record may enter the history.
//!
//! The guard owns three persisted preferences (pump type, serial, and the
//! instant the pump was registered). Records from any other device, or from
//! before the registration instant, are refused.

use chrono::{DateTime, Duration, Utc};
use pumpsync_core::{
  alert::{Alert, AlertKind, AlertSink, Severity},
  clock::Clock,
  pump::{PumpIdentity, PumpIdentityRecord, PumpType},
  store::Preferences,
};
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::{Error, Result};

pub const KEY_PUMP_TYPE: &str = "active_pump_type";
pub const KEY_PUMP_SERIAL: &str = "active_pump_serial_number";
pub const KEY_REGISTERED_AT: &str = "active_pump_change_timestamp";

#[derive(Debug, Clone, Copy)]
pub struct GuardConfig {
  /// How much older than "now" the record that registers a new pump may be.
  pub registration_grace: Duration,
}

impl Default for GuardConfig {
  fn default() -> Self { Self { registration_grace: Duration::minutes(1) } }
}

/// Gatekeeper for every mutating reconciliation call.
///
/// The read-check-register sequence runs under an async mutex, so two
/// concurrent first records cannot both register a (different) pump.
pub struct IdentityGuard<P, A, C> {
  prefs:  P,
  alerts: A,
  clock:  C,
  config: GuardConfig,
  lock:   Mutex<()>,
}

/// Raw identity fields as persisted; empty strings mean "unset".
struct StoredIdentity {
  pump_type:     String,
  serial:        String,
  registered_at: i64,
}

impl StoredIdentity {
  fn is_registered(&self) -> bool {
    !self.pump_type.is_empty() && !self.serial.is_empty()
  }

  fn matches(&self, pump: &PumpIdentity) -> bool {
    self.pump_type == pump.pump_type.tag() && self.serial == pump.serial
  }
}

impl<P, A, C> IdentityGuard<P, A, C>
where
  P: Preferences,
  A: AlertSink,
  C: Clock,
{
  pub fn new(prefs: P, alerts: A, clock: C) -> Self {
    Self { prefs, alerts, clock, config: GuardConfig::default(), lock: Mutex::new(()) }
  }

  pub fn with_config(mut self, config: GuardConfig) -> Self {
    self.config = config;
    self
  }

  pub fn clock(&self) -> &C { &self.clock }

  async fn get_string(&self, key: &str) -> Result<String> {
    let value = self.prefs.get_string(key).await.map_err(Error::preferences)?;
    Ok(value.unwrap_or_default())
  }

  async fn load(&self) -> Result<StoredIdentity> {
    Ok(StoredIdentity {
      pump_type:     self.get_string(KEY_PUMP_TYPE).await?,
      serial:        self.get_string(KEY_PUMP_SERIAL).await?,
      registered_at: self
        .prefs
        .get_long(KEY_REGISTERED_AT)
        .await
        .map_err(Error::preferences)?
        .unwrap_or(0),
    })
  }

  async fn register(&self, pump: &PumpIdentity, now: DateTime<Utc>) -> Result<()> {
    info!(pump = %pump, "registering new pump");
    self
      .prefs
      .put_string(KEY_PUMP_TYPE, pump.pump_type.tag().to_owned())
      .await
      .map_err(Error::preferences)?;
    self
      .prefs
      .put_string(KEY_PUMP_SERIAL, pump.serial.clone())
      .await
      .map_err(Error::preferences)?;
    self
      .prefs
      .put_long(KEY_REGISTERED_AT, now.timestamp_millis())
      .await
      .map_err(Error::preferences)?;
    Ok(())
  }

  /// Decide whether a record stamped `timestamp` from `pump` may be stored.
  ///
  /// With no pump registered, `pump` becomes the registered pump as of now,
  /// and the record is accepted only if it is within the registration grace
  /// window. A record from a different pump raises a
  /// [`AlertKind::WrongPumpData`] alert on every call.
  pub async fn accept(&self, timestamp: DateTime<Utc>, pump: &PumpIdentity) -> Result<bool> {
    let _held = self.lock.lock().await;
    let now = self.clock.now();
    let stored = self.load().await?;

    if !stored.is_registered() {
      self.register(pump, now).await?;
      // A grace reaching past the start of time puts no lower bound on it.
      let fresh = match now.checked_sub_signed(self.config.registration_grace) {
        Some(earliest) => timestamp >= earliest,
        None => true,
      };
      if !fresh {
        error!(
          pump = %pump,
          %timestamp,
          "ignoring record older than the registration of a new pump"
        );
      }
      return Ok(fresh);
    }

    let same_device = stored.matches(pump);
    if same_device && timestamp.timestamp_millis() >= stored.registered_at {
      debug!(pump = %pump, %timestamp, "record accepted");
      return Ok(true);
    }

    if !same_device {
      self.alerts.notify(Alert {
        kind:     AlertKind::WrongPumpData,
        message:  format!(
          "Data from a different pump ({pump}) than the active one ({} {}) was ignored",
          stored.pump_type, stored.serial
        ),
        severity: Severity::Urgent,
      });
    }
    error!(
      allowed_type = %stored.pump_type,
      allowed_serial = %stored.serial,
      allowed_since = stored.registered_at,
      received = %pump,
      %timestamp,
      "ignoring pump history record"
    );
    Ok(false)
  }

  /// Whether `pump` is the registered pump. Never registers, never alerts.
  pub async fn verify(&self, pump: &PumpIdentity) -> Result<bool> {
    let stored = self.load().await?;
    let ok = stored.matches(pump);
    if !ok {
      debug!(pump = %pump, "pump identification does not match");
    }
    Ok(ok)
  }

  /// The registered pump, if any.
  pub async fn current(&self) -> Result<Option<PumpIdentityRecord>> {
    let stored = self.load().await?;
    if !stored.is_registered() {
      return Ok(None);
    }
    let registered_at = DateTime::from_timestamp_millis(stored.registered_at)
      .unwrap_or(DateTime::UNIX_EPOCH);
    Ok(Some(PumpIdentityRecord {
      pump: PumpIdentity::new(PumpType::from_tag(&stored.pump_type)?, stored.serial),
      registered_at,
    }))
  }

  /// Forget the registered pump; the next record registers a new one.
  pub async fn reset(&self) -> Result<()> {
    let _held = self.lock.lock().await;
    info!("clearing registered pump");
    for key in [KEY_PUMP_TYPE, KEY_PUMP_SERIAL, KEY_REGISTERED_AT] {
      self.prefs.remove(key).await.map_err(Error::preferences)?;
    }
    Ok(())
  }
}
