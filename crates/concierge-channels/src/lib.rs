//! # concierge-channels
//!
//! The HTTP bridge to the external messaging transport, and voice-note
//! transcription.

pub mod bridge;
pub mod whisper;
