//! Fixed-interval polling for a single tenant.

use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use tracing::{debug, error, info};

use super::Shutdown;
use crate::pipeline::{panic_message, process_tenant};
use crate::tenant::TenantRuntime;

/// Run a cycle, sleep `check_interval`, repeat until `shutdown` fires.
///
/// A panicking cycle is logged and the loop carries on at the next interval.
pub async fn run_polling_loop(mut runtime: TenantRuntime, shutdown: Shutdown) {
    let tenant = runtime.config.id.clone();
    let interval = runtime.config.bot.check_interval;
    info!(tenant = %tenant, interval_secs = interval.as_secs(), "Polling loop started");

    while !shutdown.is_triggered() {
        match AssertUnwindSafe(process_tenant(&mut runtime, &shutdown))
            .catch_unwind()
            .await
        {
            Ok(report) => debug!(
                tenant = %tenant,
                processed = report.processed,
                errors = report.errors,
                "Cycle finished"
            ),
            Err(panic) => {
                error!(tenant = %tenant, reason = %panic_message(&*panic), "Cycle panicked");
                runtime.transport.disconnect().await;
            }
        }

        tokio::select! {
            _ = shutdown.wait() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }

    runtime.transport.disconnect().await;
    match runtime.stats.totals() {
        Some(totals) => info!(
            tenant = %tenant,
            emails_processed = totals.emails_processed,
            drafts_created = totals.drafts_created,
            errors = totals.errors,
            "Polling loop stopped"
        ),
        None => info!(tenant = %tenant, "Polling loop stopped"),
    }
}
