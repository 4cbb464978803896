//! Tenants from the hosted tables.
//!
//! A tenant document is assembled from three rows: `companies`,
//! `mail_configs` and `ai_configs`, then validated like a local file.
//! Hosted tenants always store hashed message ids.

use std::sync::Arc;

use async_trait::async_trait;

use super::{TenantRegistry, TenantSummary};
use crate::config::{
    AiFile, BotFile, CompanyFile, DEFAULT_MAX_TOKENS, StorageFile, TenantConfig, TenantFile,
};
use crate::error::{ConfigError, RegistryError};
use crate::supabase::{AiConfigRow, CompanyRow, SupabaseClient};

pub struct RemoteRegistry {
    client: Arc<SupabaseClient>,
}

impl RemoteRegistry {
    pub fn new(client: Arc<SupabaseClient>) -> Self {
        Self { client }
    }
}

fn assemble(
    company: CompanyRow,
    mail_server: crate::config::MailServerFile,
    ai: AiConfigRow,
) -> TenantFile {
    TenantFile {
        company: CompanyFile {
            id: Some(company.id),
            name: company.name,
            email: company.email.unwrap_or_default(),
            signature: ai.signature,
            status: company.status,
        },
        mail_server,
        ai: AiFile {
            provider: ai.provider,
            model: ai.model,
            prompt_template: ai.prompt_template,
            max_tokens: ai.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            fallback_reply: None,
        },
        bot: BotFile {
            check_interval: ai.check_interval,
            max_messages_per_check: ai.max_messages_per_check,
            auto_send: ai.auto_send,
        },
        storage: StorageFile {
            hash_ids: true,
            ..StorageFile::default()
        },
    }
}

#[async_trait]
impl TenantRegistry for RemoteRegistry {
    async fn list_active(&self) -> Result<Vec<TenantSummary>, RegistryError> {
        Ok(self
            .client
            .get_active_companies()
            .await?
            .into_iter()
            .map(|c| TenantSummary {
                id: c.id,
                name: c.name,
                status: c.status,
            })
            .collect())
    }

    async fn load_config(&self, tenant_id: &str) -> Result<TenantConfig, RegistryError> {
        let company = self
            .client
            .get_company(tenant_id)
            .await?
            .ok_or_else(|| ConfigError::TenantNotFound(tenant_id.to_string()))?;
        let mail = self
            .client
            .get_mail_config(tenant_id)
            .await?
            .ok_or_else(|| ConfigError::missing("mail_configs", "No mail config for tenant"))?;
        let ai = self
            .client
            .get_ai_config(tenant_id)
            .await?
            .ok_or_else(|| ConfigError::missing("ai_configs", "No AI config for tenant"))?;

        Ok(assemble(company, mail, ai).into_config(tenant_id)?)
    }
}
