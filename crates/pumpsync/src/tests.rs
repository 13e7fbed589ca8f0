//! Reconciler tests against an in-memory SQLite store.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, TimeZone as _, Utc};
use pumpsync_core::{
  alert::{Alert, AlertKind, AlertSink, Severity},
  clock::ManualClock,
  profile::ActiveProfile,
  pump::{PumpIdentity, PumpType},
  store::{HistoryQuery, MemoryPreferences, TreatmentStore},
  transaction::{BolusSync, ExtendedBolusSync, TemporaryBasalSync},
  treatment::{BolusType, TemporaryBasalType, TherapyEventType, Treatment, TreatmentKind},
};
use pumpsync_store_sqlite::{SqlitePreferences, SqliteStore};

use crate::{DeviceReport, GuardConfig, IdentityGuard, PumpSync};

// ─── Fixtures ────────────────────────────────────────────────────────────────

#[derive(Default)]
struct RecordingAlerts {
  alerts: Mutex<Vec<Alert>>,
}

impl RecordingAlerts {
  fn count(&self) -> usize { self.alerts.lock().unwrap().len() }
}

impl AlertSink for RecordingAlerts {
  fn notify(&self, alert: Alert) { self.alerts.lock().unwrap().push(alert) }
}

type Reconciler =
  PumpSync<SqliteStore, SqlitePreferences, Arc<RecordingAlerts>, Arc<ManualClock>>;

struct Fixture {
  sync:   Reconciler,
  alerts: Arc<RecordingAlerts>,
  clock:  Arc<ManualClock>,
}

async fn fixture(now: DateTime<Utc>) -> Fixture {
  let store = SqliteStore::open_in_memory()
    .await
    .expect("in-memory store");
  let alerts = Arc::new(RecordingAlerts::default());
  let clock = Arc::new(ManualClock::new(now));
  let guard = IdentityGuard::new(store.preferences(), alerts.clone(), clock.clone());
  Fixture { sync: PumpSync::new(store, guard), alerts, clock }
}

const NO_PROFILE: Option<ActiveProfile> = None;

fn s1() -> PumpIdentity { PumpIdentity::new(PumpType::DanaRs, "S1") }

fn s2() -> PumpIdentity { PumpIdentity::new(PumpType::DanaRs, "S2") }

fn at(minutes: i64) -> DateTime<Utc> {
  Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap() + Duration::minutes(minutes)
}

fn ms(millis: i64) -> DateTime<Utc> { Utc.timestamp_millis_opt(millis).unwrap() }

fn bolus(timestamp: DateTime<Utc>, amount: f64, pump: PumpIdentity) -> BolusSync {
  BolusSync { timestamp, amount, kind: None, pump }
}

fn tbr(start: i64, minutes: i64, rate: f64, is_absolute: bool) -> TemporaryBasalSync {
  TemporaryBasalSync {
    timestamp: at(start),
    rate,
    duration: Duration::minutes(minutes),
    is_absolute,
    kind: None,
    pump: s1(),
  }
}

fn eb(start: i64, minutes: i64, amount: f64) -> ExtendedBolusSync {
  ExtendedBolusSync {
    timestamp: at(start),
    amount,
    duration: Duration::minutes(minutes),
    is_emulating_temp_basal: false,
    pump: s1(),
  }
}

async fn history(f: &Fixture, kind: TreatmentKind) -> Vec<Treatment> {
  f.sync
    .store()
    .history(&HistoryQuery { kinds: vec![kind], ..Default::default() })
    .await
    .unwrap()
}

// ─── Reconciliation ──────────────────────────────────────────────────────────

#[tokio::test]
async fn upsert_by_pump_id_is_idempotent() {
  let f = fixture(at(0)).await;

  assert!(f.sync.sync_bolus_with_pump_id(500, bolus(at(0), 2.0, s1())).await.unwrap());
  assert!(!f.sync.sync_bolus_with_pump_id(500, bolus(at(0), 2.0, s1())).await.unwrap());

  assert_eq!(history(&f, TreatmentKind::Bolus).await.len(), 1);
}

#[tokio::test]
async fn temp_id_resolves_to_pump_id() {
  let f = fixture(at(0)).await;

  assert!(
    f.sync
      .add_bolus_with_temp_id(at(0), 2.0, 100, BolusType::Normal, &s1())
      .await
      .unwrap()
  );
  assert!(f.sync.sync_bolus_with_temp_id(100, 500, bolus(at(0), 2.0, s1())).await.unwrap());
  assert!(!f.sync.sync_bolus_with_temp_id(101, 501, bolus(at(0), 2.0, s1())).await.unwrap());

  let rows = history(&f, TreatmentKind::Bolus).await;
  assert_eq!(rows.len(), 1);
  let Treatment::Bolus(row) = &rows[0] else { panic!("expected a bolus") };
  assert_eq!(row.record.ids.pump_id, Some(500));
}

#[tokio::test]
async fn stopped_temporary_basal_is_no_longer_active() {
  let f = fixture(at(0)).await;

  assert!(f.sync.sync_temporary_basal_with_pump_id(1, tbr(0, 60, 1.5, true)).await.unwrap());
  let inserted = f.sync.store().temporary_basal_active_at(at(1)).await.unwrap().unwrap();

  assert!(f.sync.sync_stop_temporary_basal_with_pump_id(at(20), 2, &s1()).await.unwrap());
  // Nothing left to stop.
  assert!(!f.sync.sync_stop_temporary_basal_with_pump_id(at(30), 3, &s1()).await.unwrap());

  let store = f.sync.store();
  let late = at(60) - Duration::milliseconds(1);
  assert!(store.temporary_basal_active_at(late).await.unwrap().is_none());

  let before_stop = at(20) - Duration::milliseconds(1);
  let closed = store.temporary_basal_active_at(before_stop).await.unwrap().unwrap();
  assert_eq!(closed.id, inserted.id);
  assert_eq!(closed.record.duration, Duration::minutes(20));
  assert_eq!(closed.record.ids.end_id, Some(2));
}

#[tokio::test]
async fn temporary_basal_temp_id_lifecycle() {
  let f = fixture(at(0)).await;

  assert!(f.sync.add_temporary_basal_with_temp_id(10, tbr(0, 30, 0.0, true)).await.unwrap());
  assert!(
    f.sync
      .sync_temporary_basal_with_temp_id(10, Some(77), tbr(0, 30, 0.0, true))
      .await
      .unwrap()
  );

  let row = f.sync.store().temporary_basal_active_at(at(5)).await.unwrap().unwrap();
  assert_eq!(row.record.ids.pump_id, Some(77));
  assert_eq!(row.record.kind, TemporaryBasalType::Normal);

  assert!(f.sync.invalidate_temporary_basal_with_pump_id(77, &s1()).await.unwrap());
  assert!(f.sync.store().temporary_basal_active_at(at(5)).await.unwrap().is_none());
  assert!(!f.sync.invalidate_temporary_basal(row.id).await.unwrap());
}

#[tokio::test]
async fn carbs_dedup_by_timestamp() {
  let f = fixture(at(0)).await;

  assert!(f.sync.sync_carbs_with_timestamp(at(0), 30.0, None, &s1()).await.unwrap());
  assert!(!f.sync.sync_carbs_with_timestamp(at(0), 45.0, None, &s1()).await.unwrap());

  let rows = history(&f, TreatmentKind::Carbs).await;
  assert_eq!(rows.len(), 1);
  let Treatment::Carbs(row) = &rows[0] else { panic!("expected carbs") };
  assert_eq!(row.record.amount, 30.0);
}

#[tokio::test]
async fn extended_bolus_start_and_stop() {
  let f = fixture(at(0)).await;

  assert!(f.sync.sync_extended_bolus_with_pump_id(9, eb(0, 60, 3.0)).await.unwrap());
  assert!(!f.sync.sync_extended_bolus_with_pump_id(9, eb(0, 60, 3.0)).await.unwrap());
  assert!(f.sync.sync_stop_extended_bolus_with_pump_id(at(20), 10, &s1()).await.unwrap());

  let store = f.sync.store();
  assert!(store.extended_bolus_active_at(at(30)).await.unwrap().is_none());
  let row = store.extended_bolus_active_at(at(10)).await.unwrap().unwrap();
  assert!((row.record.amount - 1.0).abs() < 1e-9);
}

#[tokio::test]
async fn therapy_events_and_announcements() {
  let f = fixture(at(0)).await;

  assert!(
    f.sync
      .insert_therapy_event_if_new_with_timestamp(
        at(0),
        TherapyEventType::CannulaChange,
        None,
        None,
        Some(3),
        &s1(),
      )
      .await
      .unwrap()
  );
  assert!(
    !f.sync
      .insert_therapy_event_if_new_with_timestamp(
        at(0),
        TherapyEventType::CannulaChange,
        Some("again".into()),
        None,
        Some(3),
        &s1(),
      )
      .await
      .unwrap()
  );

  f.clock.set(at(1));
  f.sync.insert_announcement("Occlusion", None, &s1()).await;
  // Wrong pump: logged and dropped, never an error.
  f.sync.insert_announcement("Ignored", None, &s2()).await;

  let rows = history(&f, TreatmentKind::TherapyEvent).await;
  assert_eq!(rows.len(), 2);
  let Treatment::TherapyEvent(note) = &rows[1] else { panic!("expected a therapy event") };
  assert_eq!(note.record.kind, TherapyEventType::Announcement);
  assert_eq!(note.record.timestamp, at(1));
  assert_eq!(note.record.note.as_deref(), Some("Occlusion"));
  assert_eq!(f.alerts.count(), 1);
}

// ─── Identity guard ──────────────────────────────────────────────────────────

#[tokio::test]
async fn new_pump_accepts_recent_record() {
  let f = fixture(at(10)).await;

  let recent = at(10) - Duration::seconds(30);
  assert!(f.sync.sync_carbs_with_timestamp(recent, 20.0, None, &s1()).await.unwrap());

  let current = f.sync.guard().current().await.unwrap().unwrap();
  assert_eq!(current.pump, s1());
  assert_eq!(current.registered_at, at(10));
}

#[tokio::test]
async fn new_pump_rejects_stale_first_record() {
  let f = fixture(at(10)).await;

  assert!(!f.sync.sync_carbs_with_timestamp(at(8), 20.0, None, &s1()).await.unwrap());
  assert!(history(&f, TreatmentKind::Carbs).await.is_empty());
  assert_eq!(f.alerts.count(), 0);
}

#[tokio::test]
async fn registration_grace_is_configurable() {
  let store = SqliteStore::open_in_memory().await.unwrap();
  let clock = Arc::new(ManualClock::new(at(10)));
  let alerts = Arc::new(RecordingAlerts::default());
  let guard = IdentityGuard::new(MemoryPreferences::new(), alerts, clock)
    .with_config(GuardConfig { registration_grace: Duration::minutes(5) });
  let sync = PumpSync::new(store, guard);

  assert!(sync.sync_carbs_with_timestamp(at(8), 20.0, None, &s1()).await.unwrap());
}

#[tokio::test]
async fn huge_registration_grace_accepts_any_first_record() {
  let store = SqliteStore::open_in_memory().await.unwrap();
  let clock = Arc::new(ManualClock::new(at(10)));
  let alerts = Arc::new(RecordingAlerts::default());
  let config = crate::SyncConfig {
    registration_grace_secs: 100_000_000_000_000_000,
    ..Default::default()
  };
  let guard = IdentityGuard::new(MemoryPreferences::new(), alerts, clock)
    .with_config(config.guard_config());
  let sync = PumpSync::new(store, guard);

  let long_ago = Utc.with_ymd_and_hms(1990, 1, 1, 0, 0, 0).unwrap();
  assert!(sync.sync_carbs_with_timestamp(long_ago, 20.0, None, &s1()).await.unwrap());
}

#[tokio::test]
async fn record_from_before_registration_is_rejected_silently() {
  let f = fixture(at(10)).await;

  assert!(f.sync.sync_bolus_with_pump_id(1, bolus(at(10), 1.0, s1())).await.unwrap());
  assert!(!f.sync.sync_bolus_with_pump_id(2, bolus(at(5), 1.0, s1())).await.unwrap());
  assert_eq!(f.alerts.count(), 0);
}

#[tokio::test]
async fn other_pump_is_rejected_until_reset() {
  let f = fixture(at(0)).await;

  assert!(f.sync.sync_bolus_with_pump_id(1, bolus(at(0), 1.0, s1())).await.unwrap());

  assert!(!f.sync.sync_bolus_with_pump_id(1, bolus(at(5), 1.0, s2())).await.unwrap());
  assert_eq!(f.alerts.count(), 1);
  {
    let alerts = f.alerts.alerts.lock().unwrap();
    assert_eq!(alerts[0].kind, AlertKind::WrongPumpData);
    assert_eq!(alerts[0].severity, Severity::Urgent);
  }

  assert!(!f.sync.sync_bolus_with_pump_id(2, bolus(at(6), 1.0, s2())).await.unwrap());
  assert_eq!(f.alerts.count(), 2);

  f.sync.connect_new_pump(false).await.unwrap();
  assert!(f.sync.sync_bolus_with_pump_id(2, bolus(at(0), 1.0, s2())).await.unwrap());
  assert_eq!(f.alerts.count(), 2);
}

#[tokio::test]
async fn concurrent_first_records_register_one_pump() {
  let f = fixture(at(0)).await;

  let (p1, p2) = (s1(), s2());
  let (a, b) = tokio::join!(
    f.sync.guard().accept(at(0), &p1),
    f.sync.guard().accept(at(0), &p2),
  );
  let (a, b) = (a.unwrap(), b.unwrap());

  assert!(a ^ b);
  assert_eq!(f.alerts.count(), 1);
}

#[tokio::test]
async fn verify_pump_identification_never_registers() {
  let f = fixture(at(0)).await;

  assert!(!f.sync.verify_pump_identification(&s1()).await.unwrap());
  assert!(f.sync.guard().current().await.unwrap().is_none());

  f.sync.sync_carbs_with_timestamp(at(0), 10.0, None, &s1()).await.unwrap();
  assert!(f.sync.verify_pump_identification(&s1()).await.unwrap());
  assert!(!f.sync.verify_pump_identification(&s2()).await.unwrap());
  assert_eq!(f.alerts.count(), 0);
}

#[tokio::test]
async fn invalidation_bypasses_guard() {
  let f = fixture(at(0)).await;

  assert!(f.sync.add_temporary_basal_with_temp_id(4, tbr(0, 30, 120.0, false)).await.unwrap());
  f.sync.connect_new_pump(false).await.unwrap();

  assert!(f.sync.invalidate_temporary_basal_with_temp_id(4).await.unwrap());
  assert!(f.sync.guard().current().await.unwrap().is_none());
}

#[tokio::test]
async fn connect_new_pump_closes_running_treatments() {
  let f = fixture(at(0)).await;

  f.sync.sync_temporary_basal_with_pump_id(1, tbr(0, 60, 2.0, true)).await.unwrap();
  f.sync.sync_extended_bolus_with_pump_id(2, eb(0, 60, 3.0)).await.unwrap();

  f.clock.set(at(15));
  f.sync.connect_new_pump(true).await.unwrap();

  let state = f.sync.expected_pump_state(&NO_PROFILE).await.unwrap();
  assert!(state.temporary_basal.is_none());
  assert!(state.extended_bolus.is_none());
  assert!(state.serial_number.is_none());

  let rows = history(&f, TreatmentKind::TemporaryBasal).await;
  let Treatment::TemporaryBasal(row) = &rows[0] else { panic!("expected a basal") };
  assert_eq!(row.record.duration, Duration::minutes(15));
}

// ─── Expected state ──────────────────────────────────────────────────────────

#[tokio::test]
async fn snapshot_reflects_history() {
  let f = fixture(at(0)).await;

  f.sync.sync_bolus_with_pump_id(1, bolus(at(0), 4.0, s1())).await.unwrap();
  f.sync
    .sync_bolus_with_pump_id(2, BolusSync {
      kind: Some(BolusType::Priming),
      ..bolus(at(1), 0.5, s1())
    })
    .await
    .unwrap();
  f.sync.sync_temporary_basal_with_pump_id(3, tbr(0, 30, 150.0, false)).await.unwrap();

  let profile = ActiveProfile { name: "Day".into(), basal_rate: 1.0 };
  let state = f.sync.snapshot(at(10), &profile).await.unwrap();

  let basal = state.temporary_basal.unwrap();
  assert_eq!(basal.pump_id, Some(3));
  assert_eq!(basal.planned_remaining_minutes(at(10)), 20);
  assert!((basal.converted_to_absolute(&profile) - 1.5).abs() < 1e-9);
  assert_eq!(basal.converted_to_percent(&profile), 150.0);

  assert!(state.extended_bolus.is_none());
  assert_eq!(state.last_bolus.unwrap().amount, 4.0);
  assert_eq!(state.profile, Some(profile));
  assert_eq!(state.serial_number.as_deref(), Some("S1"));
}

#[tokio::test]
async fn snapshot_after_window_is_empty() {
  let f = fixture(at(0)).await;

  f.sync.sync_temporary_basal_with_pump_id(1, tbr(0, 30, 0.8, true)).await.unwrap();
  f.sync.sync_extended_bolus_with_pump_id(2, eb(0, 30, 1.0)).await.unwrap();

  let during = f.sync.snapshot(at(29), &NO_PROFILE).await.unwrap();
  let eb = during.extended_bolus.unwrap();
  assert!((eb.rate - 2.0).abs() < 1e-9);
  assert_eq!(eb.planned_remaining_minutes(at(29)), 1);

  let after = f.sync.snapshot(at(30), &NO_PROFILE).await.unwrap();
  assert!(after.temporary_basal.is_none());
  assert!(after.extended_bolus.is_none());
}

// ─── Device reports ──────────────────────────────────────────────────────────

#[tokio::test]
async fn device_reports_dispatch_from_json() {
  let f = fixture(at(0)).await;

  let lines = [
    r#"{"op":"sync_bolus_with_pump_id","pump_id":5,"timestamp":"2026-03-01T12:00:00Z","amount":1.5,"pump":{"pump_type":"dana_rs","serial":"S1"}}"#,
    r#"{"op":"sync_temporary_basal_with_pump_id","pump_id":6,"timestamp":"2026-03-01T12:00:00Z","rate":0.5,"duration":1800000,"is_absolute":true,"kind":"emulated_pump_suspend","pump":{"pump_type":"dana_rs","serial":"S1"}}"#,
    r#"{"op":"insert_announcement","message":"Battery low","pump":{"pump_type":"dana_rs","serial":"S1"}}"#,
  ];
  for line in lines {
    let report: DeviceReport = serde_json::from_str(line).unwrap();
    assert!(f.sync.apply(report).await.unwrap(), "{line}");
  }

  let basal = f.sync.store().temporary_basal_active_at(at(10)).await.unwrap().unwrap();
  assert_eq!(basal.record.kind, TemporaryBasalType::EmulatedPumpSuspend);
  assert_eq!(basal.record.duration, Duration::minutes(30));

  let invalidate = DeviceReport::Invalidate { kind: TreatmentKind::TemporaryBasal, id: basal.id };
  assert!(f.sync.apply(invalidate.clone()).await.unwrap());
  assert!(!f.sync.apply(invalidate).await.unwrap());
}

// ─── End to end ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn two_pumps_end_to_end() {
  let f = fixture(ms(1000)).await;

  assert!(
    f.sync
      .add_bolus_with_temp_id(ms(1000), 2.0, 7, BolusType::Normal, &s1())
      .await
      .unwrap()
  );
  assert!(f.sync.sync_bolus_with_temp_id(7, 42, bolus(ms(1000), 2.0, s1())).await.unwrap());

  assert!(!f.sync.sync_bolus_with_pump_id(8, bolus(ms(1100), 1.0, s2())).await.unwrap());
  assert_eq!(f.alerts.count(), 1);

  assert!(f.sync.sync_bolus_with_pump_id(43, bolus(ms(1200), 1.0, s1())).await.unwrap());

  let pump_ids: Vec<_> = history(&f, TreatmentKind::Bolus)
    .await
    .into_iter()
    .map(|row| match row {
      Treatment::Bolus(b) => b.record.ids.pump_id,
      other => panic!("unexpected {:?}", other.kind()),
    })
    .collect();
  assert_eq!(pump_ids, vec![Some(42), Some(43)]);
}

// ─── Config ──────────────────────────────────────────────────────────────────

#[test]
fn config_defaults_and_static_profile() {
  let config: crate::SyncConfig = serde_json::from_str("{}").unwrap();
  assert_eq!(config.registration_grace_secs, 60);
  assert_eq!(config.guard_config().registration_grace, Duration::minutes(1));
  assert!(config.profile().is_none());

  let config: crate::SyncConfig =
    serde_json::from_str(r#"{"profile_basal_rate":0.9}"#).unwrap();
  let profile = config.profile().unwrap();
  assert_eq!(profile.name, "default");
  assert_eq!(profile.basal_rate, 0.9);
}
