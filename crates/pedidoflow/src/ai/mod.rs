//! Text-generation collaborator port.
//!
//! The refinement stage treats the service as text-in/text-out with a
//! connection-status side channel. Failures here must never fail a task.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod http;
pub mod schema;

pub use http::HttpTextGenerator;

/// Connection status of the external service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// Sampling parameters forwarded to the service.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            temperature: Some(0.2),
            top_p: Some(0.9),
            max_output_tokens: Some(1024),
        }
    }
}

#[derive(Debug, Error)]
pub enum GeneratorError {
    #[error("Service not connected")]
    NotConnected,

    #[error("Request failed: {0}")]
    Request(String),

    #[error("Service returned an unusable response: {0}")]
    BadResponse(String),
}

/// Port to the generative-text service.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Generates a completion for `prompt`. `Ok(None)` means the service
    /// answered but produced no text (e.g. a content block).
    async fn generate_content(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<Option<String>, GeneratorError>;

    /// Last known connection state (no I/O).
    fn connection_state(&self) -> ConnectionState;

    /// Actively probes the service, updating the connection state.
    async fn check_connection(&self) -> bool;

    /// Last error reported by the service, if any.
    fn last_error(&self) -> Option<String>;
}

#[cfg(test)]
pub mod stub {
    //! Generator stubs for tests.

    use std::sync::Mutex;

    use super::*;

    /// Returns a fixed response and records received prompts.
    pub struct StaticGenerator {
        pub response: Option<String>,
        pub state: ConnectionState,
        pub prompts: Mutex<Vec<String>>,
    }

    impl StaticGenerator {
        pub fn connected(response: &str) -> Self {
            Self {
                response: Some(response.to_string()),
                state: ConnectionState::Connected,
                prompts: Mutex::new(Vec::new()),
            }
        }

        pub fn disconnected() -> Self {
            Self {
                response: None,
                state: ConnectionState::Disconnected,
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl TextGenerator for StaticGenerator {
        async fn generate_content(
            &self,
            prompt: &str,
            _options: &GenerationOptions,
        ) -> Result<Option<String>, GeneratorError> {
            if let Ok(mut prompts) = self.prompts.lock() {
                prompts.push(prompt.to_string());
            }
            Ok(self.response.clone())
        }

        fn connection_state(&self) -> ConnectionState {
            self.state
        }

        async fn check_connection(&self) -> bool {
            self.state == ConnectionState::Connected
        }

        fn last_error(&self) -> Option<String> {
            None
        }
    }

    /// Always errors; used to prove refinement failures stay silent.
    pub struct FailingGenerator;

    #[async_trait]
    impl TextGenerator for FailingGenerator {
        async fn generate_content(
            &self,
            _prompt: &str,
            _options: &GenerationOptions,
        ) -> Result<Option<String>, GeneratorError> {
            Err(GeneratorError::Request("simulated outage".to_string()))
        }

        fn connection_state(&self) -> ConnectionState {
            ConnectionState::Connected
        }

        async fn check_connection(&self) -> bool {
            true
        }

        fn last_error(&self) -> Option<String> {
            Some("simulated outage".to_string())
        }
    }
}
