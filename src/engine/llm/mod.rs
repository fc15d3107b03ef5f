pub mod azure_openai;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::Config;
use crate::engine::round_to;
use crate::models::llm_model::LlmModel;

pub use azure_openai::{AzureOpenAiProvider, AZURE_OPENAI_PROVIDER};

pub const DEFAULT_TEMPERATURE: f64 = 0.7;
pub const DEFAULT_MAX_TOKENS: u32 = 4000;
pub const DEFAULT_TOP_P: f64 = 1.0;
pub const DEFAULT_FREQUENCY_PENALTY: f64 = 0.0;
pub const DEFAULT_PRESENCE_PENALTY: f64 = 0.0;

pub const SYSTEM_PROMPT: &str = "You are a helpful AI assistant.";

const MOCK_PROMPT_TOKENS: u32 = 50;
const MOCK_COMPLETION_TOKENS: u32 = 25;
const MOCK_PROMPT_PREVIEW_CHARS: usize = 100;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Unsupported provider: {0}")]
    UnsupportedProvider(String),
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("provider returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed provider response: {0}")]
    MalformedResponse(String),
}

/// Sampling parameters after merging agent overrides over model defaults.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SamplingParams {
    pub temperature: f64,
    pub max_tokens: u32,
    pub top_p: f64,
    pub frequency_penalty: f64,
    pub presence_penalty: f64,
}

impl SamplingParams {
    pub fn merge(defaults: &Value, overrides: &Value) -> Self {
        let pick = |key: &str, fallback: f64| -> f64 {
            overrides
                .get(key)
                .and_then(Value::as_f64)
                .or_else(|| defaults.get(key).and_then(Value::as_f64))
                .unwrap_or(fallback)
        };

        SamplingParams {
            temperature: pick("temperature", DEFAULT_TEMPERATURE),
            max_tokens: pick("max_tokens", DEFAULT_MAX_TOKENS as f64).max(1.0) as u32,
            top_p: pick("top_p", DEFAULT_TOP_P),
            frequency_penalty: pick("frequency_penalty", DEFAULT_FREQUENCY_PENALTY),
            presence_penalty: pick("presence_penalty", DEFAULT_PRESENCE_PENALTY),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub system_prompt: String,
    pub prompt: String,
    pub params: SamplingParams,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatResponse {
    pub text: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// A concrete model backend. Registered on the gateway under a provider name.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn complete(&self, model: &LlmModel, request: &ChatRequest)
        -> Result<ChatResponse, LlmError>;
}

#[derive(Debug, Clone, Serialize)]
pub struct LlmCallResult {
    pub success: bool,
    pub response_text: Option<String>,
    pub error: Option<String>,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    pub cost: f64,
    pub duration_seconds: f64,
}

/// Providers mock mode stands in for. Models naming anything else fail the
/// same way they would against real credentials.
const MOCKED_PROVIDERS: &[&str] = &[AZURE_OPENAI_PROVIDER];

/// Single entry point for model calls. With no providers registered the
/// gateway runs in mock mode and answers deterministically.
#[derive(Clone, Default)]
pub struct LlmGateway {
    providers: HashMap<String, Arc<dyn LlmProvider>>,
}

impl LlmGateway {
    pub fn mock() -> Self {
        Self::default()
    }

    pub fn from_config(config: &Config) -> Result<Self, LlmError> {
        let gateway = Self::default();
        match &config.azure_openai {
            Some(settings) => {
                let client = reqwest::Client::builder()
                    .timeout(Duration::from_secs(config.llm_timeout_seconds))
                    .build()?;
                Ok(gateway.with_provider(
                    AZURE_OPENAI_PROVIDER,
                    Arc::new(AzureOpenAiProvider::new(client, settings.clone())),
                ))
            }
            None => {
                warn!("LLM credentials not configured; gateway running in mock mode");
                Ok(gateway)
            }
        }
    }

    pub fn with_provider(mut self, name: &str, provider: Arc<dyn LlmProvider>) -> Self {
        self.providers.insert(name.to_string(), provider);
        self
    }

    pub fn is_mock(&self) -> bool {
        self.providers.is_empty()
    }

    /// Never fails: provider errors come back as `success = false` with zeroed usage.
    pub async fn call(&self, model: &LlmModel, prompt: &str, overrides: &Value) -> LlmCallResult {
        let started = Instant::now();
        let params = SamplingParams::merge(&model.parameters, overrides);

        if self.is_mock() {
            if !MOCKED_PROVIDERS.contains(&model.provider.as_str()) {
                let err = LlmError::UnsupportedProvider(model.provider.clone());
                return failed_result(model, err, started);
            }
            return mock_result(model, prompt, started);
        }

        let outcome = match self.providers.get(&model.provider) {
            Some(provider) => {
                let request = ChatRequest {
                    system_prompt: SYSTEM_PROMPT.to_string(),
                    prompt: prompt.to_string(),
                    params,
                };
                provider.complete(model, &request).await
            }
            None => Err(LlmError::UnsupportedProvider(model.provider.clone())),
        };

        let duration_seconds = round_to(started.elapsed().as_secs_f64(), 3);
        match outcome {
            Ok(response) => {
                let cost = round_to(response.total_tokens as f64 * model.cost_per_token, 5);
                debug!(
                    model = %model.name,
                    total_tokens = response.total_tokens,
                    cost,
                    "llm call completed"
                );
                LlmCallResult {
                    success: true,
                    response_text: Some(response.text),
                    error: None,
                    prompt_tokens: response.prompt_tokens,
                    completion_tokens: response.completion_tokens,
                    total_tokens: response.total_tokens,
                    cost,
                    duration_seconds,
                }
            }
            Err(err) => failed_result(model, err, started),
        }
    }
}

fn failed_result(model: &LlmModel, err: LlmError, started: Instant) -> LlmCallResult {
    warn!(model = %model.name, provider = %model.provider, ?err, "llm call failed");
    LlmCallResult {
        success: false,
        response_text: None,
        error: Some(err.to_string()),
        prompt_tokens: 0,
        completion_tokens: 0,
        total_tokens: 0,
        cost: 0.0,
        duration_seconds: round_to(started.elapsed().as_secs_f64(), 3),
    }
}

fn mock_result(model: &LlmModel, prompt: &str, started: Instant) -> LlmCallResult {
    let preview: String = prompt.chars().take(MOCK_PROMPT_PREVIEW_CHARS).collect();
    let total_tokens = MOCK_PROMPT_TOKENS + MOCK_COMPLETION_TOKENS;
    LlmCallResult {
        success: true,
        response_text: Some(format!(
            "Mock response for prompt: {preview}... This is a simulated AI response for testing purposes."
        )),
        error: None,
        prompt_tokens: MOCK_PROMPT_TOKENS,
        completion_tokens: MOCK_COMPLETION_TOKENS,
        total_tokens,
        cost: round_to(total_tokens as f64 * model.cost_per_token, 5),
        duration_seconds: round_to(started.elapsed().as_secs_f64(), 3),
    }
}
