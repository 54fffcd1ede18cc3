pub mod prompts;

use crate::config::AiConfig;
use crate::error::Result;
use crate::llm::LlmClient;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, warn};

pub const DEFAULT_MODEL: &str = "mistral-large-latest";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputType {
    Voice,
    Csv,
    #[default]
    Text,
}

impl std::fmt::Display for InputType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Voice => write!(f, "voice"),
            Self::Csv => write!(f, "csv"),
            Self::Text => write!(f, "text"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AiRequest {
    pub text: String,
    pub combined_context: String,
    pub chat_history: String,
    #[serde(default)]
    pub input_type: InputType,
    #[serde(default = "default_model")]
    pub model: String,
}

fn default_model() -> String {
    DEFAULT_MODEL.into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiResponse {
    pub ai_response: String,
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Model '{0}' is not supported")]
    UnsupportedModel(String),

    #[error("Failed to get a response from any model")]
    AllModelsFailed { last_error: String },
}

/// Sends a prompt to the requested model and falls back along the
/// configured order when it fails.
pub struct Dispatcher {
    clients: Vec<LlmClient>,
    order: Vec<String>,
}

impl Dispatcher {
    pub fn new(clients: Vec<LlmClient>, order: Vec<String>) -> Self {
        Self { clients, order }
    }

    pub fn from_config(config: &AiConfig) -> Result<Self> {
        let clients = config
            .models
            .iter()
            .map(|m| LlmClient::from_config(m, config))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(clients, config.order.clone()))
    }

    pub fn models(&self) -> impl Iterator<Item = &str> {
        self.clients.iter().map(|c| c.model())
    }

    fn client(&self, model: &str) -> Option<&LlmClient> {
        self.clients.iter().find(|c| c.model() == model)
    }

    /// Requested model first, then the fallback order without it.
    fn attempt_order<'a>(&'a self, requested: &'a str) -> Vec<&'a str> {
        std::iter::once(requested)
            .chain(
                self.order
                    .iter()
                    .map(String::as_str)
                    .filter(|m| *m != requested),
            )
            .collect()
    }

    pub async fn answer(&self, request: &AiRequest) -> std::result::Result<String, DispatchError> {
        info!(
            query_len = request.text.len(),
            input_type = %request.input_type,
            model = %request.model,
            "processing AI request"
        );

        if self.client(&request.model).is_none() {
            error!(model = %request.model, "unsupported model requested");
            return Err(DispatchError::UnsupportedModel(request.model.clone()));
        }

        let system = prompts::system_prompt(request.input_type);
        let user = prompts::user_message(
            &request.text,
            &request.combined_context,
            &request.chat_history,
        );

        let mut last_error = String::from("no models configured");
        for model in self.attempt_order(&request.model) {
            let Some(client) = self.client(model) else {
                continue;
            };
            debug!(model, "trying model");

            match client.complete(system, &user).await {
                Ok(text) if model == request.model => {
                    info!(model, "AI request answered");
                    return Ok(text);
                }
                Ok(text) => {
                    warn!(model, requested = %request.model, "answered by fallback model");
                    return Ok(format!(
                        "{}{text}",
                        prompts::fallback_notice(model, &request.model)
                    ));
                }
                Err(e) => {
                    warn!(model, error = %e, "model failed");
                    last_error = e.to_string();
                }
            }
        }

        error!(last_error = %last_error, "all models failed");
        Err(DispatchError::AllModelsFailed { last_error })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_defaults() {
        let req: AiRequest = serde_json::from_str(
            r#"{"text":"hi","combined_context":"","chat_history":""}"#,
        )
        .unwrap();
        assert_eq!(req.input_type, InputType::Text);
        assert_eq!(req.model, DEFAULT_MODEL);
    }

    #[test]
    fn unknown_input_type_is_rejected() {
        let res = serde_json::from_str::<AiRequest>(
            r#"{"text":"hi","combined_context":"","chat_history":"","input_type":"video"}"#,
        );
        assert!(res.is_err());
    }

    #[test]
    fn attempt_order_puts_requested_first_without_duplicates() {
        let dispatcher = Dispatcher::new(
            Vec::new(),
            vec!["a".into(), "b".into(), "c".into()],
        );
        assert_eq!(dispatcher.attempt_order("b"), vec!["b", "a", "c"]);
        assert_eq!(dispatcher.attempt_order("a"), vec!["a", "b", "c"]);
    }
}
