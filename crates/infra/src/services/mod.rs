//! Service layer implementations.
//!
//! Services adapt site configuration to the ports the syncer consumes.

pub mod feature_gate;

pub use feature_gate::ConfigSyncGate;
