//! Instrument universe: snapshot loading and reconciliation against storage

pub mod registry;
pub mod snapshot;

pub use registry::{InstrumentRegistry, ReconcileReport};
pub use snapshot::{load_snapshot_csv, read_snapshot};
