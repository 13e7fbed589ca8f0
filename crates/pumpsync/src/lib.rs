//! Reconciliation of insulin-pump history.
//!
//! Pump drivers report what the device did (boluses, carbs, temporary
//! basals, extended boluses and therapy events). [`PumpSync`] turns each
//! report into at most one correctly identified row in a
//! [`TreatmentStore`](pumpsync_core::store::TreatmentStore), after the
//! [`IdentityGuard`] has checked that the report comes from the registered
//! pump.

pub mod config;
pub mod error;
pub mod guard;
pub mod report;
pub mod state;
pub mod sync;

pub use config::SyncConfig;
pub use error::{Error, Result};
pub use guard::{GuardConfig, IdentityGuard};
pub use report::DeviceReport;
pub use state::{ExpectedExtendedBolus, ExpectedTemporaryBasal, LastBolus, PumpState};
pub use sync::PumpSync;

#[cfg(test)]
mod tests;
