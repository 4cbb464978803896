//! Tenant runtime: everything one cycle needs, wired from a [`TenantConfig`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::config::TenantConfig;
use crate::dedup::{DedupStore, FileDedupStore, IdHashing, RemoteDedupStore};
use crate::error::Error;
use crate::registry::TenantRegistry;
use crate::reply::{LlmReplyGenerator, ReplyGenerator, create_backend};
use crate::stats::{RemoteStats, StatsRecorder, TenantStats};
use crate::supabase::SupabaseClient;
use crate::transport::{ImapTransport, MailTransport, ReplyMode};

/// One tenant's collaborators.
pub struct TenantRuntime {
    pub config: TenantConfig,
    pub transport: Box<dyn MailTransport>,
    pub dedup: Arc<dyn DedupStore>,
    pub generator: Arc<dyn ReplyGenerator>,
    pub stats: Arc<dyn StatsRecorder>,
}

impl TenantRuntime {
    pub fn reply_mode(&self) -> ReplyMode {
        ReplyMode::from_auto_send(self.config.bot.auto_send)
    }
}

/// Where a tenant's dedup state and counters live.
#[derive(Clone)]
pub enum StateBackend {
    /// Flat JSON file, counters in memory.
    File(Arc<FileDedupStore>),
    /// Hosted tables.
    Remote(Arc<SupabaseClient>),
}

/// Open the tenant's flat-file store at `path`, hashing ids if configured.
pub fn open_file_store(config: &TenantConfig, path: PathBuf) -> Arc<FileDedupStore> {
    let hashing = if config.storage.hash_ids {
        IdHashing::Sha256
    } else {
        IdHashing::Plain
    };
    Arc::new(FileDedupStore::open(path, hashing))
}

/// Assemble a runtime with the production transport and generator.
pub fn build_runtime(config: TenantConfig, state: StateBackend) -> Result<TenantRuntime, Error> {
    let backend = Arc::new(create_backend(&config.ai.provider)?);
    let generator: Arc<dyn ReplyGenerator> = Arc::new(LlmReplyGenerator::new(backend, &config));
    let transport = Box::new(ImapTransport::new(config.mail.clone(), config.email.clone()));

    let (dedup, stats): (Arc<dyn DedupStore>, Arc<dyn StatsRecorder>) = match state {
        StateBackend::File(store) => (store, TenantStats::new()),
        StateBackend::Remote(client) => (
            Arc::new(RemoteDedupStore::new(Arc::clone(&client), config.id.clone())),
            Arc::new(RemoteStats::new(client, config.id.clone())),
        ),
    };

    info!(
        tenant = %config.id,
        provider = %config.ai.provider,
        model = %config.ai.model,
        "Tenant runtime ready"
    );

    Ok(TenantRuntime {
        config,
        transport,
        dedup,
        generator,
        stats,
    })
}

/// Builds a fresh runtime for a tenant id; used on every worker (re)start.
#[async_trait]
pub trait RuntimeFactory: Send + Sync {
    async fn build(&self, tenant_id: &str) -> Result<TenantRuntime, Error>;
}

/// Loads configuration from a registry and wires production collaborators.
pub struct RegistryRuntimeFactory {
    registry: Arc<dyn TenantRegistry>,
    supabase: Option<Arc<SupabaseClient>>,
    data_dir: PathBuf,
}

impl RegistryRuntimeFactory {
    pub fn new(
        registry: Arc<dyn TenantRegistry>,
        supabase: Option<Arc<SupabaseClient>>,
        data_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            registry,
            supabase,
            data_dir: data_dir.into(),
        }
    }
}

/// Per-tenant file under `data_dir/<tenant_id>/`.
pub fn tenant_store_path(data_dir: &Path, tenant_id: &str, file: &Path) -> PathBuf {
    let name = file
        .file_name()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(crate::config::DEFAULT_STORAGE_FILE));
    data_dir.join(tenant_id).join(name)
}

#[async_trait]
impl RuntimeFactory for RegistryRuntimeFactory {
    async fn build(&self, tenant_id: &str) -> Result<TenantRuntime, Error> {
        let config = self.registry.load_config(tenant_id).await?;
        let state = match &self.supabase {
            Some(client) => StateBackend::Remote(Arc::clone(client)),
            None => {
                let path = tenant_store_path(&self.data_dir, &config.id, &config.storage.file);
                StateBackend::File(open_file_store(&config, path))
            }
        };
        build_runtime(config, state)
    }
}
