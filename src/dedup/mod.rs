//! Dedup store: which (message, thread) pairs already got a reply.
//!
//! Two backends share one contract:
//! - `file`: flat JSON list of pairs, whole-file rewrite on every change
//! - `remote`: hashed rows in the hosted `processed_emails` table
//!
//! Entries are never removed. The store grows for the lifetime of the
//! mailbox.

pub mod file;
pub mod remote;

pub use file::FileDedupStore;
pub use remote::RemoteDedupStore;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::error::StoreError;

/// One handled unread message.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessedRecord {
    pub message_id: String,
    pub thread_id: String,
}

impl ProcessedRecord {
    pub fn new(message_id: impl Into<String>, thread_id: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            thread_id: thread_id.into(),
        }
    }
}

/// Membership queries and inserts over processed pairs.
///
/// `is_processed` on a fresh store returns `Ok(false)`. `mark_processed` is
/// idempotent: marking a present pair changes nothing.
#[async_trait]
pub trait DedupStore: Send + Sync {
    async fn is_processed(&self, message_id: &str, thread_id: &str) -> Result<bool, StoreError>;

    async fn mark_processed(&self, message_id: &str, thread_id: &str) -> Result<(), StoreError>;
}

/// What gets written for an identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IdHashing {
    #[default]
    Plain,
    Sha256,
}

impl IdHashing {
    pub fn key(self, id: &str) -> String {
        match self {
            IdHashing::Plain => id.to_string(),
            IdHashing::Sha256 => sha256_hex(id),
        }
    }
}

/// Lowercase hex SHA-256 of `id`.
pub fn sha256_hex(id: &str) -> String {
    hex::encode(Sha256::digest(id.as_bytes()))
}
