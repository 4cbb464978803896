use std::sync::Arc;

use mailbot::config::{AppConfig, RunMode, TenantConfig};
use mailbot::registry::{DirectoryRegistry, RemoteRegistry, TenantRegistry};
use mailbot::supabase::SupabaseClient;
use mailbot::tenant::{RegistryRuntimeFactory, StateBackend, build_runtime, open_file_store};
use mailbot::worker::{Shutdown, Supervisor, run_polling_loop};
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    let _ = rustls::crypto::ring::default_provider().install_default();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let app = match AppConfig::from_env() {
        Ok(app) => app,
        Err(e) => {
            error!(fatal = true, error = %e, "Invalid process configuration");
            std::process::exit(1);
        }
    };

    let shutdown = Shutdown::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupt received, shutting down");
                shutdown.trigger();
            }
        });
    }

    match app.mode {
        RunMode::Single => run_single(&app, shutdown).await,
        RunMode::Multi => run_multi(&app, shutdown).await,
    }

    info!("Mailbot stopped");
    Ok(())
}

async fn run_single(app: &AppConfig, shutdown: Shutdown) {
    let config = match TenantConfig::from_file(&app.config_path) {
        Ok(config) => config,
        Err(e) => {
            error!(
                fatal = true,
                path = %app.config_path.display(),
                error = %e,
                "Failed to load tenant configuration"
            );
            std::process::exit(1);
        }
    };

    let store = open_file_store(&config, app.dedup_path(&config.storage));
    info!(
        version = env!("CARGO_PKG_VERSION"),
        tenant = %config.name,
        mailbox = %config.mail.username,
        imap = %config.mail.imap_host,
        interval_secs = config.bot.check_interval.as_secs(),
        max_per_check = config.bot.max_messages_per_check,
        auto_send = config.bot.auto_send,
        processed = store.len(),
        store = %store.path().display(),
        "Mailbot starting"
    );

    let runtime = match build_runtime(config, StateBackend::File(store)) {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(fatal = true, error = %e, "Failed to initialise tenant");
            std::process::exit(1);
        }
    };

    run_polling_loop(runtime, shutdown).await;
}

async fn run_multi(app: &AppConfig, shutdown: Shutdown) {
    let supabase = app
        .supabase
        .as_ref()
        .map(|config| Arc::new(SupabaseClient::new(config)));

    let registry: Arc<dyn TenantRegistry> = match (&supabase, &app.tenants_dir) {
        (Some(client), _) => Arc::new(RemoteRegistry::new(Arc::clone(client))),
        (None, Some(dir)) => Arc::new(DirectoryRegistry::new(dir)),
        (None, None) => {
            error!(fatal = true, "Multi-tenant mode needs a hosted registry or a tenants directory");
            std::process::exit(1);
        }
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        registry = if supabase.is_some() { "hosted" } else { "directory" },
        "Mailbot starting in multi-tenant mode"
    );

    let factory = Arc::new(RegistryRuntimeFactory::new(
        Arc::clone(&registry),
        supabase,
        app.data_dir.clone(),
    ));
    Supervisor::new(registry, factory, app.supervisor.clone(), shutdown)
        .run()
        .await;
}
