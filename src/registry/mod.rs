//! Tenant registry: which tenants exist and how each is configured.
//!
//! - `directory`: one JSON document per tenant in a local directory
//! - `remote`: the hosted `companies` / `mail_configs` / `ai_configs` tables

pub mod directory;
pub mod remote;

pub use directory::DirectoryRegistry;
pub use remote::RemoteRegistry;

use async_trait::async_trait;

use crate::config::TenantConfig;
use crate::error::RegistryError;

/// Listing entry for an active tenant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantSummary {
    pub id: String,
    pub name: String,
    pub status: String,
}

#[async_trait]
pub trait TenantRegistry: Send + Sync {
    /// Tenants whose status is active. Only these are scheduled.
    async fn list_active(&self) -> Result<Vec<TenantSummary>, RegistryError>;

    /// Fully validated configuration for one tenant.
    async fn load_config(&self, tenant_id: &str) -> Result<TenantConfig, RegistryError>;
}
