//! Tenant processing cycle: fetch unread → dedup → generate → submit → record.
//!
//! One message failing never aborts the batch, and the transport is
//! disconnected on every exit path. A reply is only recorded as processed
//! (and its mail flagged read) after it was submitted, so failed submissions
//! are retried next cycle.

use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use tracing::{debug, error, info, warn};

use crate::stats::Stat;
use crate::tenant::TenantRuntime;
use crate::transport::{InboundEmail, OutgoingReply};
use crate::worker::Shutdown;

/// Counts from one cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub processed: usize,
    pub errors: usize,
}

/// What happened to a single message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MessageOutcome {
    Replied,
    AlreadyProcessed,
    Failed,
}

/// Reply subject for `subject`.
///
/// The prefix check is exact and case-sensitive: `"RE: x"` becomes `"Re: RE: x"`.
pub fn reply_subject(subject: &str) -> String {
    if subject.starts_with("Re:") {
        subject.to_string()
    } else {
        format!("Re: {subject}")
    }
}

/// Run one cycle for `runtime`.
///
/// Never fails: connection problems yield an empty report, per-message
/// failures are counted. `shutdown` is checked between messages.
pub async fn process_tenant(runtime: &mut TenantRuntime, shutdown: &Shutdown) -> CycleReport {
    let tenant = runtime.config.id.clone();

    if let Err(e) = runtime.transport.connect().await {
        error!(tenant = %tenant, error = %e, "Could not connect to mail server, skipping cycle");
        runtime.stats.increment(Stat::Errors).await;
        runtime.transport.disconnect().await;
        return CycleReport::default();
    }

    let messages = runtime
        .transport
        .fetch_unread(runtime.config.bot.max_messages_per_check)
        .await;
    debug!(tenant = %tenant, count = messages.len(), "Fetched unread messages");

    let mut report = CycleReport::default();
    for message in &messages {
        if shutdown.is_triggered() {
            info!(tenant = %tenant, "Shutdown requested, stopping cycle early");
            break;
        }

        let outcome = AssertUnwindSafe(process_message(runtime, message))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                error!(
                    tenant = %tenant,
                    id = %message.id,
                    reason = %panic_message(&*panic),
                    "Message handling panicked"
                );
                MessageOutcome::Failed
            });

        match outcome {
            MessageOutcome::Replied => report.processed += 1,
            MessageOutcome::AlreadyProcessed => {}
            MessageOutcome::Failed => {
                report.errors += 1;
                runtime.stats.increment(Stat::Errors).await;
                continue;
            }
        }

        // Handled mail leaves the unread set so older mail gets its turn.
        if !runtime.transport.mark_seen(&message.id).await {
            warn!(tenant = %tenant, id = %message.id, "Could not flag message as seen");
        }
    }

    runtime.transport.disconnect().await;

    if report.processed > 0 || report.errors > 0 {
        info!(
            tenant = %tenant,
            processed = report.processed,
            errors = report.errors,
            "Cycle complete"
        );
        if let Some(totals) = runtime.stats.totals() {
            info!(
                tenant = %tenant,
                emails_processed = totals.emails_processed,
                drafts_created = totals.drafts_created,
                errors = totals.errors,
                "Tenant totals"
            );
        }
    }
    report
}

async fn process_message(runtime: &mut TenantRuntime, message: &InboundEmail) -> MessageOutcome {
    let tenant = runtime.config.id.as_str();

    match runtime
        .dedup
        .is_processed(&message.id, &message.thread_id)
        .await
    {
        Ok(true) => {
            debug!(tenant = %tenant, id = %message.id, "Already processed, skipping");
            return MessageOutcome::AlreadyProcessed;
        }
        Ok(false) => {}
        Err(e) => {
            error!(tenant = %tenant, id = %message.id, error = %e, "Dedup lookup failed");
            return MessageOutcome::Failed;
        }
    }

    let outcome = runtime.generator.generate(&message.snippet).await;
    if let crate::reply::ReplyOutcome::Fallback { reason, .. } = &outcome {
        warn!(tenant = %tenant, id = %message.id, reason = %reason, "Replying with fallback text");
    }

    let reply = OutgoingReply {
        to: message.from_address.clone(),
        subject: reply_subject(&message.subject),
        body: outcome.into_text(),
        in_reply_to: Some(message.id.clone()),
    };
    let mode = runtime.reply_mode();

    if !runtime.transport.submit_reply(&reply, mode).await {
        error!(tenant = %tenant, id = %message.id, to = %reply.to, "Reply submission failed, will retry");
        return MessageOutcome::Failed;
    }
    runtime.stats.increment(Stat::DraftsCreated).await;

    if let Err(e) = runtime
        .dedup
        .mark_processed(&message.id, &message.thread_id)
        .await
    {
        // The reply is out; a retry would duplicate it.
        error!(tenant = %tenant, id = %message.id, error = %e, "Failed to record processed message");
    }
    runtime.stats.increment(Stat::EmailsProcessed).await;

    info!(
        tenant = %tenant,
        to = %reply.to,
        subject = %reply.subject,
        action = mode.label(),
        "Replied to email"
    );
    MessageOutcome::Replied
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
