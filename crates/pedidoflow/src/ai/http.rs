//! HTTP-backed text generator.
//!
//! Talks to a `generateContent`-style endpoint. Connection state and the
//! last error are tracked so callers can skip refinement when the service
//! is unreachable instead of paying a timeout per task.

use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use super::{ConnectionState, GenerationOptions, GeneratorError, TextGenerator};

pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

pub struct HttpTextGenerator {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    state: RwLock<ConnectionState>,
    last_error: RwLock<Option<String>>,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ContentPart>,
}

#[derive(Debug, Deserialize)]
struct ContentPart {
    #[serde(default)]
    text: Option<String>,
}

impl HttpTextGenerator {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, GeneratorError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GeneratorError::Request(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key,
            state: RwLock::new(ConnectionState::Disconnected),
            last_error: RwLock::new(None),
        })
    }

    fn set_state(&self, state: ConnectionState) {
        if let Ok(mut guard) = self.state.write() {
            *guard = state;
        }
    }

    fn record_error(&self, message: String) {
        warn!("text generation failed: {message}");
        self.set_state(ConnectionState::Error);
        if let Ok(mut guard) = self.last_error.write() {
            *guard = Some(message);
        }
    }

    fn request_body(prompt: &str, options: &GenerationOptions) -> serde_json::Value {
        json!({
            "contents": [{
                "parts": [{ "text": prompt }]
            }],
            "generationConfig": {
                "temperature": options.temperature,
                "topP": options.top_p,
                "maxOutputTokens": options.max_output_tokens,
            }
        })
    }

    fn extract_text(response: GenerateResponse) -> Option<String> {
        let text: String = response
            .candidates
            .into_iter()
            .filter_map(|c| c.content)
            .flat_map(|c| c.parts)
            .filter_map(|p| p.text)
            .collect();
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }
}

#[async_trait]
impl TextGenerator for HttpTextGenerator {
    async fn generate_content(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<Option<String>, GeneratorError> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .json(&Self::request_body(prompt, options));
        if let Some(key) = &self.api_key {
            request = request.header("x-goog-api-key", key);
        }

        let response = request.send().await.map_err(|e| {
            self.record_error(e.to_string());
            GeneratorError::Request(e.to_string())
        })?;

        if !response.status().is_success() {
            let message = format!("HTTP {}", response.status());
            self.record_error(message.clone());
            return Err(GeneratorError::Request(message));
        }

        let parsed: GenerateResponse = response.json().await.map_err(|e| {
            self.record_error(e.to_string());
            GeneratorError::BadResponse(e.to_string())
        })?;

        self.set_state(ConnectionState::Connected);
        debug!("text generation succeeded");
        Ok(Self::extract_text(parsed))
    }

    fn connection_state(&self) -> ConnectionState {
        self.state
            .read()
            .map(|guard| *guard)
            .unwrap_or(ConnectionState::Error)
    }

    async fn check_connection(&self) -> bool {
        self.set_state(ConnectionState::Connecting);

        // A minimal request doubles as the health probe.
        let probe = self
            .generate_content("ping", &GenerationOptions {
                temperature: Some(0.0),
                top_p: None,
                max_output_tokens: Some(1),
            })
            .await;

        match probe {
            Ok(_) => {
                self.set_state(ConnectionState::Connected);
                true
            }
            Err(_) => false,
        }
    }

    fn last_error(&self) -> Option<String> {
        self.last_error.read().ok().and_then(|guard| guard.clone())
    }
}
