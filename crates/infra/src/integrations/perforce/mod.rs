//! Perforce Helix Core authorization
//!
//! Permissions come from the server's protection table, read with the `p4`
//! client. Users get depot prefix patterns instead of an exact repository
//! list; repositories get the emails of every user left with read access.

mod executor;
mod protects;
mod provider;

pub use executor::{P4Cli, P4Executor};
pub use provider::{PerforceAccountData, PerforceProvider};
