use crate::config::{AiConfig, ModelConfig};
use crate::error::{Error, Result};
use crate::http::{HttpClient, USER_AGENT};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// LLM provider; selects the API format and default endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Mistral,
    /// OpenRouter, used for the DeepSeek models.
    OpenRouter,
    #[serde(rename = "openai")]
    OpenAi,
}

/// Wire format spoken by a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiStyle {
    /// `POST /chat/completions` with system + user messages.
    ChatCompletions,
    /// `POST /responses` with a single `input` string.
    Responses,
}

impl Provider {
    pub fn default_base_url(&self) -> &'static str {
        match self {
            Self::Mistral => "https://api.mistral.ai/v1",
            Self::OpenRouter => "https://openrouter.ai/api/v1",
            Self::OpenAi => "https://api.openai.com/v1",
        }
    }

    pub fn default_api_key_env(&self) -> &'static str {
        match self {
            Self::Mistral => "MISTRAL_API_KEY",
            Self::OpenRouter => "DEEPSEEK_API_KEY",
            Self::OpenAi => "OPENAI_API_KEY",
        }
    }

    pub fn api_style(&self) -> ApiStyle {
        match self {
            Self::Mistral | Self::OpenRouter => ApiStyle::ChatCompletions,
            Self::OpenAi => ApiStyle::Responses,
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Mistral => write!(f, "mistral"),
            Self::OpenRouter => write!(f, "openrouter"),
            Self::OpenAi => write!(f, "openai"),
        }
    }
}

pub struct LlmClient {
    provider: Provider,
    api_key: String,
    model: String,
    base_url: String,
    http: HttpClient,
}

// -- Chat Completions format --

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Msg<'a>>,
}

#[derive(Serialize)]
struct Msg<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

// -- Responses format --

#[derive(Serialize)]
struct ResponsesRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct ResponsesResponse {
    #[serde(default)]
    output_text: Option<String>,
    #[serde(default)]
    output: Vec<OutputItem>,
}

#[derive(Deserialize)]
struct OutputItem {
    #[serde(default)]
    content: Vec<OutputContent>,
}

#[derive(Deserialize)]
struct OutputContent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

impl LlmClient {
    pub fn new(
        provider: Provider,
        api_key: String,
        model: String,
        base_url: Option<String>,
        http: HttpClient,
    ) -> Self {
        let base_url = base_url
            .unwrap_or_else(|| provider.default_base_url().into())
            .trim_end_matches('/')
            .to_string();
        Self {
            provider,
            api_key,
            model,
            base_url,
            http,
        }
    }

    /// Build from a catalogue entry, reading the API key from its env var.
    pub fn from_config(model: &ModelConfig, ai: &AiConfig) -> Result<Self> {
        let env_var = model
            .api_key_env
            .clone()
            .unwrap_or_else(|| model.provider.default_api_key_env().into());
        let api_key = std::env::var(&env_var).unwrap_or_default();
        let proxy = if model.use_proxy {
            ai.proxy.clone()
        } else {
            None
        };
        let http = HttpClient::builder(USER_AGENT)
            .timeout(Duration::from_secs(ai.timeout_secs))
            .retries(ai.retry_attempts, Duration::from_millis(ai.retry_delay_ms))
            .proxy(proxy)
            .build()?;
        Ok(Self::new(
            model.provider,
            api_key,
            model.name.clone(),
            model.base_url.clone(),
            http,
        ))
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Send one prompt. Responses-style providers get `system` and `user`
    /// joined by a blank line as their single input.
    pub async fn complete(&self, system: &str, user_message: &str) -> Result<String> {
        if self.api_key.is_empty() {
            return Err(Error::config(format!(
                "no API key configured for {} ({})",
                self.model, self.provider
            )));
        }
        debug!(provider = %self.provider, model = %self.model, "sending LLM request");

        let text = match self.provider.api_style() {
            ApiStyle::ChatCompletions => self.complete_chat(system, user_message).await?,
            ApiStyle::Responses => {
                let input = format!("{system}\n\n{user_message}");
                self.complete_responses(&input).await?
            }
        };

        if text.trim().is_empty() {
            return Err(Error::parse(format!("empty response from {}", self.model)));
        }
        Ok(text)
    }

    async fn complete_chat(&self, system: &str, user_message: &str) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                Msg {
                    role: "system",
                    content: system,
                },
                Msg {
                    role: "user",
                    content: user_message,
                },
            ],
        };

        let body = serde_json::to_string(&request)
            .map_err(|e| Error::parse(format!("serialize request: {e}")))?;

        let url = format!("{}/chat/completions", self.base_url);
        let response_text = self
            .http
            .post_json_authed(&url, &body, &self.api_key)
            .await
            .inspect_err(|e| warn!(provider = %self.provider, "LLM API error: {e}"))?;

        parse_chat_response(&response_text)
    }

    async fn complete_responses(&self, input: &str) -> Result<String> {
        let request = ResponsesRequest {
            model: &self.model,
            input,
        };

        let body = serde_json::to_string(&request)
            .map_err(|e| Error::parse(format!("serialize request: {e}")))?;

        let url = format!("{}/responses", self.base_url);
        let response_text = self
            .http
            .post_json_authed(&url, &body, &self.api_key)
            .await
            .inspect_err(|e| warn!(provider = %self.provider, "LLM API error: {e}"))?;

        parse_responses_response(&response_text)
    }
}

fn parse_chat_response(raw: &str) -> Result<String> {
    let resp: ChatResponse = serde_json::from_str(raw)
        .map_err(|e| Error::parse(format!("parse chat response: {e}")))?;
    resp.choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| Error::parse("empty response from LLM"))
}

fn parse_responses_response(raw: &str) -> Result<String> {
    let resp: ResponsesResponse = serde_json::from_str(raw)
        .map_err(|e| Error::parse(format!("parse responses output: {e}")))?;
    if let Some(text) = resp.output_text {
        return Ok(text);
    }
    let text = resp
        .output
        .into_iter()
        .flat_map(|item| item.content)
        .filter(|c| c.kind == "output_text")
        .filter_map(|c| c.text)
        .collect::<Vec<_>>()
        .join("");
    Ok(text)
}
