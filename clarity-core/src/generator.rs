//! Generator trait and implementations
//!
//! The seam between the session worker and whatever turns a payload into
//! markdown:
//! - `clarity-gemini` provides the real HTTP client
//! - `MockGenerator` scripts responses for tests

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{ClarityError, Result};
use crate::payload::Payload;

/// Sampling parameters sent with every request
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationParams {
    pub temperature: f32,
    pub max_output_tokens: u32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.2,
            max_output_tokens: 8192,
        }
    }
}

/// Successful generation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generated {
    pub markdown: String,
    /// Attempts used, including the successful one
    pub attempts: u32,
    pub model: String,
}

/// Outcome of one generation: markdown or a classified failure, never both
pub type GenerationResult = Result<Generated>;

/// Turns an assembled payload into markdown (testable)
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(
        &self,
        payload: Payload,
        model: &str,
        params: &GenerationParams,
    ) -> GenerationResult;
}

/// Scripted generator for tests. Replies are consumed in order; once they run
/// out every call succeeds with `"# PBI: Mock"`.
#[derive(Default)]
pub struct MockGenerator {
    replies: Mutex<VecDeque<GenerationResult>>,
    calls: Mutex<Vec<Payload>>,
    delay: Option<Duration>,
}

impl MockGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long before answering each call
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn push_markdown(&self, markdown: impl Into<String>) {
        self.push(Ok(Generated {
            markdown: markdown.into(),
            attempts: 1,
            model: "mock".to_string(),
        }));
    }

    pub fn push_error(&self, error: ClarityError) {
        self.push(Err(error));
    }

    /// Payloads received so far
    pub fn calls(&self) -> Vec<Payload> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn push(&self, reply: GenerationResult) {
        if let Ok(mut replies) = self.replies.lock() {
            replies.push_back(reply);
        }
    }
}

#[async_trait]
impl Generator for MockGenerator {
    async fn generate(
        &self,
        payload: Payload,
        model: &str,
        _params: &GenerationParams,
    ) -> GenerationResult {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(payload);
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = self.replies.lock().ok().and_then(|mut r| r.pop_front());
        scripted.unwrap_or_else(|| {
            Ok(Generated {
                markdown: "# PBI: Mock".to_string(),
                attempts: 1,
                model: model.to_string(),
            })
        })
    }
}
