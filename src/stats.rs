//! Per-tenant counters: emails processed, drafts created, errors.
//!
//! Counters only grow. Any reset policy belongs to the backing store.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tracing::warn;

use crate::supabase::SupabaseClient;

/// Counter kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stat {
    EmailsProcessed,
    DraftsCreated,
    Errors,
}

impl Stat {
    /// Column name in the remote `email_stats` table.
    pub fn column(self) -> &'static str {
        match self {
            Stat::EmailsProcessed => "emails_processed",
            Stat::DraftsCreated => "drafts_created",
            Stat::Errors => "errors",
        }
    }
}

/// Sink for counter increments. Never fails the caller.
#[async_trait]
pub trait StatsRecorder: Send + Sync {
    async fn increment(&self, stat: Stat);

    /// Running totals, for recorders that keep them in process.
    fn totals(&self) -> Option<StatsSnapshot> {
        None
    }
}

/// In-process counters.
#[derive(Debug, Default)]
pub struct TenantStats {
    emails_processed: AtomicU64,
    drafts_created: AtomicU64,
    errors: AtomicU64,
}

/// Point-in-time copy of [`TenantStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub emails_processed: u64,
    pub drafts_created: u64,
    pub errors: u64,
}

impl TenantStats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn counter(&self, stat: Stat) -> &AtomicU64 {
        match stat {
            Stat::EmailsProcessed => &self.emails_processed,
            Stat::DraftsCreated => &self.drafts_created,
            Stat::Errors => &self.errors,
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            emails_processed: self.emails_processed.load(Ordering::Relaxed),
            drafts_created: self.drafts_created.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

#[async_trait]
impl StatsRecorder for TenantStats {
    async fn increment(&self, stat: Stat) {
        self.counter(stat).fetch_add(1, Ordering::Relaxed);
    }

    fn totals(&self) -> Option<StatsSnapshot> {
        Some(self.snapshot())
    }
}

/// Per-day counters in the hosted `email_stats` table.
pub struct RemoteStats {
    client: Arc<SupabaseClient>,
    company_id: String,
}

impl RemoteStats {
    pub fn new(client: Arc<SupabaseClient>, company_id: impl Into<String>) -> Self {
        Self {
            client,
            company_id: company_id.into(),
        }
    }
}

#[async_trait]
impl StatsRecorder for RemoteStats {
    async fn increment(&self, stat: Stat) {
        let today = chrono::Local::now().date_naive();
        if let Err(e) = self
            .client
            .increment_stat(&self.company_id, stat, today)
            .await
        {
            warn!(tenant = %self.company_id, stat = stat.column(), error = %e, "Failed to record stat");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn counters_are_independent() {
        let stats = TenantStats::new();
        stats.increment(Stat::EmailsProcessed).await;
        stats.increment(Stat::EmailsProcessed).await;
        stats.increment(Stat::Errors).await;

        let snap = stats.snapshot();
        assert_eq!(snap.emails_processed, 2);
        assert_eq!(snap.drafts_created, 0);
        assert_eq!(snap.errors, 1);
    }

    #[tokio::test]
    async fn recorder_exposes_local_totals() {
        let stats = TenantStats::new();
        stats.increment(Stat::DraftsCreated).await;
        let recorder: Arc<dyn StatsRecorder> = stats;
        assert_eq!(recorder.totals().map(|s| s.drafts_created), Some(1));
    }

    #[test]
    fn columns_match_remote_schema() {
        assert_eq!(Stat::EmailsProcessed.column(), "emails_processed");
        assert_eq!(Stat::DraftsCreated.column(), "drafts_created");
        assert_eq!(Stat::Errors.column(), "errors");
    }
}
