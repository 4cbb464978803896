//! Hosted model access through rig-core.

use async_trait::async_trait;
use rig::client::CompletionClient;
use rig::completion::Prompt;
use rig::providers::{anthropic, openai};
use secrecy::{ExposeSecret, SecretString};

use super::CompletionBackend;
use crate::error::LlmError;

pub enum RigBackend {
    OpenAi(rig::client::Client<openai::client::OpenAIResponsesExt>),
    Anthropic(rig::client::Client<anthropic::client::AnthropicExt>),
}

/// Build a backend for `provider`, reading its API key from the environment.
pub fn create_backend(provider: &str) -> Result<RigBackend, LlmError> {
    match provider {
        "openai" => {
            let key = api_key("OPENAI_API_KEY", provider)?;
            let client = openai::Client::new(key.expose_secret()).map_err(|e| {
                LlmError::RequestFailed {
                    provider: provider.to_string(),
                    reason: format!("Failed to create OpenAI client: {e}"),
                }
            })?;
            Ok(RigBackend::OpenAi(client))
        }
        "anthropic" => {
            let key = api_key("ANTHROPIC_API_KEY", provider)?;
            let client = anthropic::Client::new(key.expose_secret()).map_err(|e| {
                LlmError::RequestFailed {
                    provider: provider.to_string(),
                    reason: format!("Failed to create Anthropic client: {e}"),
                }
            })?;
            Ok(RigBackend::Anthropic(client))
        }
        other => Err(LlmError::UnknownProvider(other.to_string())),
    }
}

fn api_key(var: &str, provider: &str) -> Result<SecretString, LlmError> {
    std::env::var(var)
        .ok()
        .filter(|k| !k.trim().is_empty())
        .map(SecretString::from)
        .ok_or_else(|| LlmError::MissingApiKey(provider.to_string()))
}

#[async_trait]
impl CompletionBackend for RigBackend {
    fn provider(&self) -> &'static str {
        match self {
            RigBackend::OpenAi(_) => "openai",
            RigBackend::Anthropic(_) => "anthropic",
        }
    }

    async fn complete(&self, prompt: &str, model: &str, max_tokens: u64) -> Result<String, LlmError> {
        let result = match self {
            RigBackend::OpenAi(client) => {
                client
                    .agent(model)
                    .max_tokens(max_tokens)
                    .build()
                    .prompt(prompt)
                    .await
            }
            RigBackend::Anthropic(client) => {
                client
                    .agent(model)
                    .max_tokens(max_tokens)
                    .build()
                    .prompt(prompt)
                    .await
            }
        };
        result.map_err(|e| LlmError::RequestFailed {
            provider: self.provider().to_string(),
            reason: e.to_string(),
        })
    }
}
