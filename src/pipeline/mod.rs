//! Tenant processing pipeline.

pub mod cycle;

pub use cycle::{CycleReport, process_tenant, reply_subject};
pub(crate) use cycle::panic_message;
