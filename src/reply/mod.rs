//! Reply generation: prompt an LLM, fall back to a fixed text on failure.
//!
//! Generation never fails from the caller's point of view. Every error
//! becomes [`ReplyOutcome::Fallback`] carrying the tenant's fallback reply.

mod rig_adapter;

pub use rig_adapter::{RigBackend, create_backend};

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config::TenantConfig;
use crate::error::LlmError;

/// Result of one generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyOutcome {
    Generated(String),
    Fallback { text: String, reason: String },
}

impl ReplyOutcome {
    pub fn text(&self) -> &str {
        match self {
            ReplyOutcome::Generated(text) | ReplyOutcome::Fallback { text, .. } => text,
        }
    }

    pub fn into_text(self) -> String {
        match self {
            ReplyOutcome::Generated(text) | ReplyOutcome::Fallback { text, .. } => text,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, ReplyOutcome::Fallback { .. })
    }
}

/// Produces reply text for an email snippet.
#[async_trait]
pub trait ReplyGenerator: Send + Sync {
    async fn generate(&self, snippet: &str) -> ReplyOutcome;
}

/// Raw text completion against a hosted model.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    fn provider(&self) -> &'static str;

    async fn complete(&self, prompt: &str, model: &str, max_tokens: u64) -> Result<String, LlmError>;
}

/// Build the full prompt sent for one email.
pub fn build_prompt(instructions: &str, snippet: &str) -> String {
    format!("{instructions}\n\nMail: {snippet}\n\nSvar:")
}

fn with_signature(text: String, signature: Option<&str>) -> String {
    match signature.map(str::trim).filter(|s| !s.is_empty()) {
        Some(sig) => format!("{text}\n\n{sig}"),
        None => text,
    }
}

/// [`ReplyGenerator`] over a [`CompletionBackend`].
pub struct LlmReplyGenerator {
    backend: Arc<dyn CompletionBackend>,
    instructions: String,
    model: String,
    max_tokens: u64,
    fallback: String,
    signature: Option<String>,
}

impl LlmReplyGenerator {
    pub fn new(backend: Arc<dyn CompletionBackend>, tenant: &TenantConfig) -> Self {
        Self {
            backend,
            instructions: tenant.rendered_prompt(),
            model: tenant.ai.model.clone(),
            max_tokens: tenant.ai.max_tokens,
            fallback: tenant.ai.fallback_reply.clone(),
            signature: tenant.signature.clone(),
        }
    }

    fn fallback(&self, reason: String) -> ReplyOutcome {
        ReplyOutcome::Fallback {
            text: with_signature(self.fallback.clone(), self.signature.as_deref()),
            reason,
        }
    }
}

#[async_trait]
impl ReplyGenerator for LlmReplyGenerator {
    async fn generate(&self, snippet: &str) -> ReplyOutcome {
        let prompt = build_prompt(&self.instructions, snippet);
        match self
            .backend
            .complete(&prompt, &self.model, self.max_tokens)
            .await
        {
            Ok(text) if !text.trim().is_empty() => {
                debug!(provider = self.backend.provider(), model = %self.model, "Reply generated");
                ReplyOutcome::Generated(with_signature(
                    text.trim().to_string(),
                    self.signature.as_deref(),
                ))
            }
            Ok(_) => {
                let e = LlmError::EmptyResponse {
                    provider: self.backend.provider().to_string(),
                };
                warn!(error = %e, "Using fallback reply");
                self.fallback(e.to_string())
            }
            Err(e) => {
                warn!(error = %e, "Using fallback reply");
                self.fallback(e.to_string())
            }
        }
    }
}
