//! Configuration types.
//!
//! Tenant configuration is parsed from JSON into raw `*File` structs and then
//! converted into the validated [`TenantConfig`]. Every required field is
//! checked at load time so a broken tenant fails before its first cycle.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::Deserialize;

use crate::auth::MailAuth;
use crate::error::ConfigError;

/// Canned reply used when the LLM call fails.
pub const DEFAULT_FALLBACK_REPLY: &str = "Hej! Detta är ett automatiskt svar på ditt mail.";

/// Default dedup file name.
pub const DEFAULT_STORAGE_FILE: &str = "sent_drafts.json";

/// Completion budget when a tenant does not set one.
pub const DEFAULT_MAX_TOKENS: u64 = 200;

// ── Validated configuration ─────────────────────────────────────────

/// One mailbox plus its AI and scheduling settings.
#[derive(Debug, Clone)]
pub struct TenantConfig {
    pub id: String,
    pub name: String,
    pub email: String,
    pub signature: Option<String>,
    pub active: bool,
    pub mail: MailServerConfig,
    pub ai: AiConfig,
    pub bot: BotConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone)]
pub struct MailServerConfig {
    pub imap_host: String,
    pub imap_port: u16,
    pub imap_use_ssl: bool,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_use_tls: bool,
    pub username: String,
    pub auth: MailAuth,
    pub inbox_folder: String,
    pub drafts_folder: String,
}

#[derive(Debug, Clone)]
pub struct AiConfig {
    /// `openai` or `anthropic`.
    pub provider: String,
    pub model: String,
    /// Prompt prefix; `{company_name}` is substituted.
    pub prompt_template: String,
    pub max_tokens: u64,
    pub fallback_reply: String,
}

#[derive(Debug, Clone)]
pub struct BotConfig {
    pub check_interval: Duration,
    pub max_messages_per_check: usize,
    /// Send replies instead of saving drafts.
    pub auto_send: bool,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub file: PathBuf,
    /// Store SHA-256 digests instead of raw identifiers.
    pub hash_ids: bool,
}

impl TenantConfig {
    /// Load and validate a tenant from a JSON file.
    ///
    /// The tenant id is `company.id` when present, otherwise the file stem.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::missing(
                    &path.display().to_string(),
                    "Create it from config.json.example",
                )
            } else {
                ConfigError::Io(e)
            }
        })?;
        let fallback_id = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("default");
        Self::from_json(&raw, fallback_id)
    }

    /// Parse and validate a tenant from a JSON document.
    pub fn from_json(raw: &str, fallback_id: &str) -> Result<Self, ConfigError> {
        let file: TenantFile =
            serde_json::from_str(raw).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        file.into_config(fallback_id)
    }

    /// Render the prompt prefix for this tenant.
    pub fn rendered_prompt(&self) -> String {
        self.ai.prompt_template.replace("{company_name}", &self.name)
    }
}

// ── Raw file format ─────────────────────────────────────────────────

/// Tenant document as stored on disk (or assembled from the registry).
#[derive(Debug, Clone, Deserialize)]
pub struct TenantFile {
    pub company: CompanyFile,
    pub mail_server: MailServerFile,
    pub ai: AiFile,
    pub bot: BotFile,
    pub storage: StorageFile,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompanyFile {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub signature: Option<String>,
    #[serde(default = "default_status")]
    pub status: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MailServerFile {
    #[serde(default)]
    pub imap_host: String,
    #[serde(default = "default_imap_port")]
    pub imap_port: u16,
    #[serde(default = "default_true", alias = "use_ssl")]
    pub imap_use_ssl: bool,
    #[serde(default)]
    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    #[serde(default = "default_true")]
    pub smtp_use_tls: bool,
    #[serde(default, alias = "email_address")]
    pub username: String,
    #[serde(default, alias = "email_password")]
    pub password: Option<String>,
    #[serde(default)]
    pub oauth_provider: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub token_expires_at: Option<DateTime<Utc>>,
    #[serde(default = "default_inbox")]
    pub inbox_folder: String,
    #[serde(default = "default_drafts")]
    pub drafts_folder: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AiFile {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub prompt_template: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u64,
    #[serde(default)]
    pub fallback_reply: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BotFile {
    #[serde(default = "default_check_interval")]
    pub check_interval: u64,
    #[serde(default = "default_max_messages")]
    pub max_messages_per_check: usize,
    #[serde(default)]
    pub auto_send: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageFile {
    #[serde(default = "default_storage_file")]
    pub file: String,
    #[serde(default)]
    pub hash_ids: bool,
}

impl Default for BotFile {
    fn default() -> Self {
        Self {
            check_interval: default_check_interval(),
            max_messages_per_check: default_max_messages(),
            auto_send: false,
        }
    }
}

impl Default for StorageFile {
    fn default() -> Self {
        Self {
            file: default_storage_file(),
            hash_ids: false,
        }
    }
}

fn default_status() -> String {
    "active".to_string()
}
fn default_true() -> bool {
    true
}
fn default_imap_port() -> u16 {
    993
}
fn default_smtp_port() -> u16 {
    587
}
fn default_inbox() -> String {
    "INBOX".to_string()
}
fn default_drafts() -> String {
    "Drafts".to_string()
}
fn default_provider() -> String {
    "openai".to_string()
}
fn default_model() -> String {
    "gpt-3.5-turbo".to_string()
}
fn default_max_tokens() -> u64 {
    DEFAULT_MAX_TOKENS
}
fn default_check_interval() -> u64 {
    60
}
fn default_max_messages() -> usize {
    5
}
fn default_storage_file() -> String {
    DEFAULT_STORAGE_FILE.to_string()
}

fn require(value: &str, key: &str) -> Result<String, ConfigError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::missing(key, "Field must be non-empty"));
    }
    Ok(trimmed.to_string())
}

/// Tenant ids name a directory under the data dir, so they must stay one
/// plain path component.
fn check_tenant_id(id: &str) -> Result<(), ConfigError> {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::missing("company.id", "Field must be non-empty"));
    }
    if trimmed.contains(['/', '\\', '\0']) || trimmed == "." || trimmed.contains("..") {
        return Err(ConfigError::invalid(
            "company.id",
            format!("'{id}' must not contain path separators or '..'"),
        ));
    }
    Ok(())
}

impl TenantFile {
    /// Validate every field and build the typed configuration.
    pub fn into_config(self, fallback_id: &str) -> Result<TenantConfig, ConfigError> {
        let TenantFile {
            company,
            mail_server: mail,
            ai,
            bot,
            storage,
        } = self;

        let name = require(&company.name, "company.name")?;
        let id = company
            .id
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| fallback_id.to_string());
        check_tenant_id(&id)?;

        let imap_host = require(&mail.imap_host, "mail_server.imap_host")?;
        let smtp_host = require(&mail.smtp_host, "mail_server.smtp_host")?;
        let username = require(&mail.username, "mail_server.username")?;
        if mail.imap_port == 0 {
            return Err(ConfigError::invalid("mail_server.imap_port", "must be non-zero"));
        }
        if mail.smtp_port == 0 {
            return Err(ConfigError::invalid("mail_server.smtp_port", "must be non-zero"));
        }

        let auth = match mail.oauth_provider.filter(|p| !p.trim().is_empty()) {
            Some(provider) => {
                let token = mail
                    .access_token
                    .filter(|t| !t.is_empty())
                    .ok_or_else(|| {
                        ConfigError::missing(
                            "mail_server.access_token",
                            "OAuth2 tenants need a stored access token",
                        )
                    })?;
                MailAuth::OAuth2 {
                    provider,
                    access_token: SecretString::from(token),
                    expires_at: mail.token_expires_at,
                }
            }
            None => {
                let password = mail.password.filter(|p| !p.is_empty()).ok_or_else(|| {
                    ConfigError::missing(
                        "mail_server.password",
                        "Set a password or configure oauth_provider",
                    )
                })?;
                MailAuth::Password(SecretString::from(password))
            }
        };

        let provider = ai.provider.trim().to_lowercase();
        if provider != "openai" && provider != "anthropic" {
            return Err(ConfigError::invalid(
                "ai.provider",
                format!("unsupported provider '{}'", ai.provider),
            ));
        }
        let model = require(&ai.model, "ai.model")?;
        if ai.prompt_template.trim().is_empty() {
            return Err(ConfigError::missing(
                "ai.prompt_template",
                "A prompt template is required",
            ));
        }
        if ai.max_tokens == 0 {
            return Err(ConfigError::invalid("ai.max_tokens", "must be positive"));
        }

        if bot.check_interval == 0 {
            return Err(ConfigError::invalid("bot.check_interval", "must be positive"));
        }
        if bot.max_messages_per_check == 0 {
            return Err(ConfigError::invalid(
                "bot.max_messages_per_check",
                "must be positive",
            ));
        }

        let storage_file = require(&storage.file, "storage.file")?;

        Ok(TenantConfig {
            id,
            name,
            email: company.email.trim().to_string(),
            signature: company.signature.filter(|s| !s.trim().is_empty()),
            active: company.status.eq_ignore_ascii_case("active"),
            mail: MailServerConfig {
                imap_host,
                imap_port: mail.imap_port,
                imap_use_ssl: mail.imap_use_ssl,
                smtp_host,
                smtp_port: mail.smtp_port,
                smtp_use_tls: mail.smtp_use_tls,
                username,
                auth,
                inbox_folder: mail.inbox_folder,
                drafts_folder: mail.drafts_folder,
            },
            ai: AiConfig {
                provider,
                model,
                prompt_template: ai.prompt_template,
                max_tokens: ai.max_tokens,
                fallback_reply: ai
                    .fallback_reply
                    .filter(|s| !s.trim().is_empty())
                    .unwrap_or_else(|| DEFAULT_FALLBACK_REPLY.to_string()),
            },
            bot: BotConfig {
                check_interval: Duration::from_secs(bot.check_interval),
                max_messages_per_check: bot.max_messages_per_check,
                auto_send: bot.auto_send,
            },
            storage: StorageConfig {
                file: PathBuf::from(storage_file),
                hash_ids: storage.hash_ids,
            },
        })
    }
}

// ── Process settings ────────────────────────────────────────────────

/// How the process schedules tenants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// One tenant, fixed-interval polling.
    Single,
    /// Every active tenant, one IDLE worker each.
    Multi,
}

/// Process-level settings, built from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub mode: RunMode,
    pub config_path: PathBuf,
    pub tenants_dir: Option<PathBuf>,
    pub data_dir: PathBuf,
    pub supabase: Option<SupabaseConfig>,
    pub supervisor: SupervisorConfig,
}

#[derive(Debug, Clone)]
pub struct SupabaseConfig {
    pub url: String,
    pub service_key: SecretString,
}

/// Scheduling knobs for multi-tenant mode.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// How often the tenant registry is re-read.
    pub registry_poll_interval: Duration,
    /// Delay before restarting a crashed worker.
    pub restart_cooldown: Duration,
    /// Maximum length of a single IDLE wait (RFC 2177 recommends < 30 min).
    pub idle_timeout: Duration,
    /// Sleep used when the server does not support IDLE.
    pub idle_fallback_interval: Duration,
    /// Give up on a tenant after this many restarts.
    pub max_restarts: Option<u32>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            registry_poll_interval: Duration::from_secs(300), // 5 minutes
            restart_cooldown: Duration::from_secs(60),
            idle_timeout: Duration::from_secs(1740), // 29 minutes
            idle_fallback_interval: Duration::from_secs(60),
            max_restarts: None,
        }
    }
}

fn env_secs(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

impl SupervisorConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            registry_poll_interval: env_secs(
                "MAILBOT_REGISTRY_POLL_SECS",
                defaults.registry_poll_interval,
            ),
            restart_cooldown: env_secs("MAILBOT_RESTART_COOLDOWN_SECS", defaults.restart_cooldown),
            idle_timeout: env_secs("MAILBOT_IDLE_TIMEOUT_SECS", defaults.idle_timeout),
            idle_fallback_interval: env_secs(
                "MAILBOT_IDLE_FALLBACK_SECS",
                defaults.idle_fallback_interval,
            ),
            max_restarts: std::env::var("MAILBOT_MAX_RESTARTS")
                .ok()
                .and_then(|s| s.parse().ok()),
        }
    }
}

impl AppConfig {
    /// Build process settings from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mode = match std::env::var("MAILBOT_MODE")
            .unwrap_or_else(|_| "single".to_string())
            .to_lowercase()
            .as_str()
        {
            "single" => RunMode::Single,
            "multi" => RunMode::Multi,
            other => {
                return Err(ConfigError::invalid(
                    "MAILBOT_MODE",
                    format!("expected 'single' or 'multi', got '{other}'"),
                ));
            }
        };

        let config_path = std::env::var("MAILBOT_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config.json"));
        let tenants_dir = std::env::var("MAILBOT_TENANTS_DIR").ok().map(PathBuf::from);
        let data_dir = std::env::var("MAILBOT_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("data"));

        let supabase = match (
            std::env::var("SUPABASE_URL").ok(),
            std::env::var("SUPABASE_SERVICE_KEY").ok(),
        ) {
            (Some(url), Some(key)) if !url.is_empty() && !key.is_empty() => Some(SupabaseConfig {
                url,
                service_key: SecretString::from(key),
            }),
            _ => None,
        };

        if mode == RunMode::Multi && supabase.is_none() && tenants_dir.is_none() {
            return Err(ConfigError::missing(
                "MAILBOT_TENANTS_DIR",
                "Multi-tenant mode needs SUPABASE_URL/SUPABASE_SERVICE_KEY or a tenants directory",
            ));
        }

        Ok(Self {
            mode,
            config_path,
            tenants_dir,
            data_dir,
            supabase,
            supervisor: SupervisorConfig::from_env(),
        })
    }

    /// Resolve where a tenant's flat-file dedup store lives.
    ///
    /// Inside the data directory when it exists, otherwise the configured path.
    pub fn dedup_path(&self, storage: &StorageConfig) -> PathBuf {
        resolve_storage_path(&self.data_dir, &storage.file)
    }
}

/// Place `file` inside `data_dir` when that directory exists.
pub fn resolve_storage_path(data_dir: &Path, file: &Path) -> PathBuf {
    if data_dir.is_dir() {
        match file.file_name() {
            Some(name) => data_dir.join(name),
            None => file.to_path_buf(),
        }
    } else {
        file.to_path_buf()
    }
}
