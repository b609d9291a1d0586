//! Store implementations
//!
//! [`MemoryStore`] keeps users, repositories, accounts and permissions in
//! process memory. It backs tests and single-node deployments that seed the
//! directory themselves.

pub mod contains;
pub mod memory;

pub use contains::{contains_regex, ContainsMatcher};
pub use memory::MemoryStore;
