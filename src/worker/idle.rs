//! Event-driven worker: wait for new mail with IMAP IDLE, then run a cycle.

use std::time::Duration;

use tracing::{debug, info, warn};

use super::Shutdown;
use crate::config::SupervisorConfig;
use crate::error::WorkerError;
use crate::pipeline::process_tenant;
use crate::tenant::TenantRuntime;
use crate::transport::Activity;

#[derive(Debug, Clone, Copy)]
pub struct IdleSettings {
    /// Longest single wait before re-entering IDLE.
    pub timeout: Duration,
    /// Sleep between cycles when the server cannot IDLE.
    pub fallback_interval: Duration,
}

impl From<&SupervisorConfig> for IdleSettings {
    fn from(config: &SupervisorConfig) -> Self {
        Self {
            timeout: config.idle_timeout,
            fallback_interval: config.idle_fallback_interval,
        }
    }
}

/// Run one tenant's worker until `stop` fires.
///
/// Mail that arrived while the worker was down is handled by an initial
/// cycle. Cycles observe `shutdown` between messages; `stop` retires the
/// worker after its current cycle. A failing wait ends the worker with an
/// error so the supervisor can restart it.
pub async fn run_idle_worker(
    mut runtime: TenantRuntime,
    settings: IdleSettings,
    stop: Shutdown,
    shutdown: Shutdown,
) -> Result<(), WorkerError> {
    let tenant = runtime.config.id.clone();
    info!(tenant = %tenant, "IDLE worker started");

    process_tenant(&mut runtime, &shutdown).await;

    loop {
        let activity = tokio::select! {
            _ = stop.wait() => break,
            result = runtime.transport.wait_for_activity(settings.timeout) => result,
        };

        match activity {
            Ok(Activity::Detected) => {
                info!(tenant = %tenant, "New mail detected");
                process_tenant(&mut runtime, &shutdown).await;
            }
            Ok(Activity::TimedOut) => {
                debug!(tenant = %tenant, "IDLE timeout, re-entering");
            }
            Ok(Activity::Unsupported) => {
                debug!(
                    tenant = %tenant,
                    secs = settings.fallback_interval.as_secs(),
                    "IDLE unsupported, polling instead"
                );
                tokio::select! {
                    _ = stop.wait() => break,
                    _ = tokio::time::sleep(settings.fallback_interval) => {}
                }
                process_tenant(&mut runtime, &shutdown).await;
            }
            Err(e) => {
                warn!(tenant = %tenant, error = %e, "Waiting for new mail failed");
                runtime.transport.disconnect().await;
                return Err(WorkerError::Failed {
                    tenant,
                    reason: e.to_string(),
                });
            }
        }
    }

    runtime.transport.disconnect().await;
    info!(tenant = %tenant, "IDLE worker stopped");
    Ok(())
}
