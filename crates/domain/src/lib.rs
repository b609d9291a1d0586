//! # Permsync Domain
//!
//! Business domain types for the permissions syncer.
//!
//! This crate contains:
//! - Sync request metadata and permission records
//! - Code host accounts, services and repository identities
//! - Error taxonomy and Result definitions
//! - Configuration structures and defaults
//!
//! ## Architecture
//! - No dependencies on other permsync crates
//! - Pure data structures, no I/O

pub mod config;
pub mod constants;
pub mod errors;
pub mod types;

// Re-export commonly used items
pub use config::*;
pub use errors::*;
pub use types::*;
