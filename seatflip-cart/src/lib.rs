pub mod controller;
pub mod expiry;
pub mod reconcile;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use controller::{CartController, ConsumeAck, ControllerSettings, ProduceAck, RepairOutcome};
pub use expiry::ExpiryWatcher;
pub use reconcile::{ReconcileReport, Reconciler};
