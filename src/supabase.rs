//! Hosted registry client: PostgREST over `reqwest`.
//!
//! One `SupabaseClient` is constructed at startup and shared by `Arc`
//! between the tenant registry, the hashed dedup stores and the counters.

use chrono::NaiveDate;
use reqwest::{Method, RequestBuilder, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::debug;

use crate::config::{MailServerFile, SupabaseConfig};
use crate::error::RegistryError;
use crate::stats::Stat;

/// Row of the `companies` table.
#[derive(Debug, Clone, Deserialize)]
pub struct CompanyRow {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    pub status: String,
}

/// Row of the `ai_configs` table.
#[derive(Debug, Clone, Deserialize)]
pub struct AiConfigRow {
    pub provider: String,
    pub model: String,
    pub prompt_template: String,
    #[serde(default)]
    pub signature: Option<String>,
    #[serde(default)]
    pub max_tokens: Option<u64>,
    pub check_interval: u64,
    pub max_messages_per_check: usize,
    pub auto_send: bool,
}

/// Row of the `email_stats` table.
#[derive(Debug, Clone, Deserialize)]
struct StatsRow {
    id: serde_json::Value,
    #[serde(default)]
    emails_processed: i64,
    #[serde(default)]
    drafts_created: i64,
    #[serde(default)]
    errors: i64,
}

impl StatsRow {
    fn get(&self, stat: Stat) -> i64 {
        match stat {
            Stat::EmailsProcessed => self.emails_processed,
            Stat::DraftsCreated => self.drafts_created,
            Stat::Errors => self.errors,
        }
    }
}

/// Shared REST handle.
pub struct SupabaseClient {
    http: reqwest::Client,
    base_url: String,
    service_key: SecretString,
}

impl SupabaseClient {
    pub fn new(config: &SupabaseConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: config.url.trim_end_matches('/').to_string(),
            service_key: config.service_key.clone(),
        }
    }

    fn request(&self, method: Method, table: &str) -> RequestBuilder {
        let key = self.service_key.expose_secret();
        self.http
            .request(method, format!("{}/rest/v1/{}", self.base_url, table))
            .header("apikey", key)
            .bearer_auth(key)
    }

    async fn send_json<T: DeserializeOwned>(req: RequestBuilder) -> Result<T, RegistryError> {
        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(RegistryError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(resp.json::<T>().await?)
    }

    async fn send_empty(req: RequestBuilder) -> Result<(), RegistryError> {
        let resp = req.send().await?;
        let status = resp.status();
        if status.is_success() || status == StatusCode::CONFLICT {
            return Ok(());
        }
        let body = resp.text().await.unwrap_or_default();
        Err(RegistryError::Status {
            status: status.as_u16(),
            body,
        })
    }

    async fn first_row<T: DeserializeOwned>(
        &self,
        table: &str,
        key: &str,
        value: &str,
    ) -> Result<Option<T>, RegistryError> {
        let req = self.request(Method::GET, table).query(&[
            ("select", "*".to_string()),
            (key, format!("eq.{value}")),
            ("limit", "1".to_string()),
        ]);
        let mut rows: Vec<T> = Self::send_json(req).await?;
        Ok(if rows.is_empty() {
            None
        } else {
            Some(rows.swap_remove(0))
        })
    }

    // ── Companies ───────────────────────────────────────────────────

    /// All companies with `status = active`.
    pub async fn get_active_companies(&self) -> Result<Vec<CompanyRow>, RegistryError> {
        let req = self
            .request(Method::GET, "companies")
            .query(&[("select", "*"), ("status", "eq.active")]);
        Self::send_json(req).await
    }

    pub async fn get_company(&self, company_id: &str) -> Result<Option<CompanyRow>, RegistryError> {
        self.first_row("companies", "id", company_id).await
    }

    // ── Mail / AI config ────────────────────────────────────────────

    pub async fn get_mail_config(
        &self,
        company_id: &str,
    ) -> Result<Option<MailServerFile>, RegistryError> {
        self.first_row("mail_configs", "company_id", company_id).await
    }

    pub async fn get_ai_config(
        &self,
        company_id: &str,
    ) -> Result<Option<AiConfigRow>, RegistryError> {
        self.first_row("ai_configs", "company_id", company_id).await
    }

    // ── Processed emails ────────────────────────────────────────────

    pub async fn is_email_processed(
        &self,
        company_id: &str,
        message_hash: &str,
    ) -> Result<bool, RegistryError> {
        let req = self.request(Method::GET, "processed_emails").query(&[
            ("select", "id".to_string()),
            ("company_id", format!("eq.{company_id}")),
            ("message_hash", format!("eq.{message_hash}")),
            ("limit", "1".to_string()),
        ]);
        let rows: Vec<serde_json::Value> = Self::send_json(req).await?;
        Ok(!rows.is_empty())
    }

    /// Insert a processed-email row; an existing row is left untouched.
    pub async fn mark_email_processed(
        &self,
        company_id: &str,
        message_hash: &str,
        thread_hash: Option<&str>,
    ) -> Result<(), RegistryError> {
        let req = self
            .request(Method::POST, "processed_emails")
            .query(&[("on_conflict", "company_id,message_hash")])
            .header("Prefer", "resolution=ignore-duplicates,return=minimal")
            .json(&json!({
                "company_id": company_id,
                "message_hash": message_hash,
                "thread_hash": thread_hash,
            }));
        Self::send_empty(req).await
    }

    // ── Stats ───────────────────────────────────────────────────────

    /// Bump one counter in the tenant's row for `date`.
    pub async fn increment_stat(
        &self,
        company_id: &str,
        stat: Stat,
        date: NaiveDate,
    ) -> Result<(), RegistryError> {
        let date = date.format("%Y-%m-%d").to_string();
        let req = self.request(Method::GET, "email_stats").query(&[
            ("select", "*".to_string()),
            ("company_id", format!("eq.{company_id}")),
            ("date", format!("eq.{date}")),
        ]);
        let rows: Vec<StatsRow> = Self::send_json(req).await?;

        let column = stat.column();
        match rows.first() {
            Some(row) => {
                let id = match &row.id {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                debug!(company_id, column, "Updating stats row");
                let req = self
                    .request(Method::PATCH, "email_stats")
                    .query(&[("id", format!("eq.{id}"))])
                    .json(&json!({ column: row.get(stat) + 1 }));
                Self::send_empty(req).await
            }
            None => {
                debug!(company_id, column, "Inserting stats row");
                let req = self.request(Method::POST, "email_stats").json(&json!({
                    "company_id": company_id,
                    "date": date,
                    column: 1,
                }));
                Self::send_empty(req).await
            }
        }
    }
}
