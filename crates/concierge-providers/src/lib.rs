//! # concierge-providers
//!
//! Reply construction for turns no conversation mode claimed: operator
//! keyword rules first, then an OpenAI-compatible generative provider.

pub mod chain;
pub mod openai;

pub use chain::ResponderChain;
pub use openai::OpenAiProvider;
