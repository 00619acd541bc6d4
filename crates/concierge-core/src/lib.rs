//! # concierge-core
//!
//! Core types, capability traits, configuration, and error handling shared by
//! every Concierge crate.

pub mod config;
pub mod error;
pub mod message;
pub mod phone;
pub mod schedule;
pub mod traits;

pub use config::shellexpand;
