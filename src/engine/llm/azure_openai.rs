use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::{ChatRequest, ChatResponse, LlmError, LlmProvider};
use crate::config::AzureOpenAiSettings;
use crate::models::llm_model::LlmModel;

pub const AZURE_OPENAI_PROVIDER: &str = "azure_openai";

/// Chat completions against an Azure OpenAI deployment named after `model_name`.
pub struct AzureOpenAiProvider {
    client: reqwest::Client,
    settings: AzureOpenAiSettings,
}

#[derive(Deserialize)]
struct CompletionBody {
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Deserialize)]
struct Message {
    content: Option<String>,
}

#[derive(Deserialize, Default)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

impl AzureOpenAiProvider {
    pub fn new(client: reqwest::Client, settings: AzureOpenAiSettings) -> Self {
        Self { client, settings }
    }

    fn url(&self, model: &LlmModel) -> String {
        let endpoint = model
            .endpoint
            .as_deref()
            .filter(|e| !e.trim().is_empty())
            .unwrap_or(&self.settings.endpoint)
            .trim_end_matches('/');
        format!(
            "{endpoint}/openai/deployments/{}/chat/completions?api-version={}",
            urlencoding::encode(&model.model_name),
            urlencoding::encode(&self.settings.api_version)
        )
    }
}

#[async_trait]
impl LlmProvider for AzureOpenAiProvider {
    async fn complete(
        &self,
        model: &LlmModel,
        request: &ChatRequest,
    ) -> Result<ChatResponse, LlmError> {
        let body = json!({
            "messages": [
                {"role": "system", "content": request.system_prompt},
                {"role": "user", "content": request.prompt},
            ],
            "temperature": request.params.temperature,
            "max_tokens": request.params.max_tokens,
            "top_p": request.params.top_p,
            "frequency_penalty": request.params.frequency_penalty,
            "presence_penalty": request.params.presence_penalty,
        });

        let response = self
            .client
            .post(self.url(model))
            .header("api-key", &self.settings.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: CompletionBody = response
            .json()
            .await
            .map_err(|e| LlmError::MalformedResponse(e.to_string()))?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| LlmError::MalformedResponse("response has no choices".into()))?;
        let usage = parsed.usage.unwrap_or_default();
        let total_tokens = if usage.total_tokens > 0 {
            usage.total_tokens
        } else {
            usage.prompt_tokens + usage.completion_tokens
        };

        Ok(ChatResponse {
            text,
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            total_tokens,
        })
    }
}
