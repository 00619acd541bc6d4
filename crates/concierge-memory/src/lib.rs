//! # concierge-memory
//!
//! SQLite-backed implementations of the Concierge collaborator traits.

pub mod store;

pub use store::{Store, SurveyRecord};
