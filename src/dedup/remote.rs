//! Hashed remote dedup store.
//!
//! Only SHA-256 digests of the identifiers leave the process. Rows are keyed
//! by `(company_id, message_hash)`; the thread hash is stored alongside but
//! membership is decided by the message hash alone.

use std::sync::Arc;

use async_trait::async_trait;

use super::{DedupStore, sha256_hex};
use crate::error::StoreError;
use crate::supabase::SupabaseClient;

pub struct RemoteDedupStore {
    client: Arc<SupabaseClient>,
    company_id: String,
}

impl RemoteDedupStore {
    pub fn new(client: Arc<SupabaseClient>, company_id: impl Into<String>) -> Self {
        Self {
            client,
            company_id: company_id.into(),
        }
    }
}

#[async_trait]
impl DedupStore for RemoteDedupStore {
    async fn is_processed(&self, message_id: &str, _thread_id: &str) -> Result<bool, StoreError> {
        self.client
            .is_email_processed(&self.company_id, &sha256_hex(message_id))
            .await
            .map_err(|e| StoreError::Remote(e.to_string()))
    }

    async fn mark_processed(&self, message_id: &str, thread_id: &str) -> Result<(), StoreError> {
        let thread_hash = (!thread_id.is_empty()).then(|| sha256_hex(thread_id));
        self.client
            .mark_email_processed(
                &self.company_id,
                &sha256_hex(message_id),
                thread_hash.as_deref(),
            )
            .await
            .map_err(|e| StoreError::Remote(e.to_string()))
    }
}
