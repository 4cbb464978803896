//! Mailbot: answers unread mail with LLM-written drafts or replies.

pub mod auth;
pub mod config;
pub mod dedup;
pub mod error;
pub mod pipeline;
pub mod registry;
pub mod reply;
pub mod stats;
pub mod supabase;
pub mod tenant;
pub mod transport;
pub mod worker;
