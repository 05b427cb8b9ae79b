//! Wire types shared by the sigrelay server and its tools.
//!
//! This crate provides:
//! - The JSON envelope exchanged over every relay connection ([`envelope`])
//! - Protocol type definitions and constants ([`types`])

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod envelope;
pub mod types;

pub use envelope::{Envelope, EnvelopeError};
pub use types::ClientId;
