//! Code host integrations

pub mod perforce;
