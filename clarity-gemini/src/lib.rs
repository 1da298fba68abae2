//! Gemini inference client for Clarity
//!
//! Sends an assembled payload to `generateContent`, retrying transport
//! failures and 5xx responses with exponential backoff, and classifies every
//! outcome into a [`clarity_core::FailureKind`].

pub mod client;
pub mod retry;
pub mod wire;

pub use client::{Endpoint, GeminiClient, RetryNotice, RetryObserver, DEFAULT_TIMEOUT};
pub use retry::{AttemptState, RetryPolicy};
