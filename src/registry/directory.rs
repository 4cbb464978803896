//! Tenants as `*.json` files in one directory; the file stem is the default id.

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::warn;

use super::{TenantRegistry, TenantSummary};
use crate::config::TenantConfig;
use crate::error::{ConfigError, RegistryError};

pub struct DirectoryRegistry {
    dir: PathBuf,
}

impl DirectoryRegistry {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn tenant_files(&self) -> Result<Vec<PathBuf>, RegistryError> {
        let entries = std::fs::read_dir(&self.dir).map_err(|e| RegistryError::Directory {
            path: self.dir.display().to_string(),
            reason: e.to_string(),
        })?;
        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "json"))
            .collect();
        files.sort();
        Ok(files)
    }

    fn load_all(&self) -> Result<Vec<(PathBuf, Result<TenantConfig, ConfigError>)>, RegistryError> {
        Ok(self
            .tenant_files()?
            .into_iter()
            .map(|path| {
                let config = TenantConfig::from_file(&path);
                (path, config)
            })
            .collect())
    }
}

#[async_trait]
impl TenantRegistry for DirectoryRegistry {
    async fn list_active(&self) -> Result<Vec<TenantSummary>, RegistryError> {
        let mut active = Vec::new();
        for (path, config) in self.load_all()? {
            match config {
                Ok(config) if config.active => active.push(TenantSummary {
                    id: config.id,
                    name: config.name,
                    status: "active".to_string(),
                }),
                Ok(_) => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping invalid tenant config"),
            }
        }
        Ok(active)
    }

    async fn load_config(&self, tenant_id: &str) -> Result<TenantConfig, RegistryError> {
        for (_, config) in self.load_all()? {
            if let Ok(config) = config
                && config.id == tenant_id
            {
                return Ok(config);
            }
        }
        Err(ConfigError::TenantNotFound(tenant_id.to_string()).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::SAMPLE;
    use std::path::Path;

    fn write(dir: &Path, name: &str, body: &str) {
        std::fs::write(dir.join(name), body).unwrap();
    }

    #[tokio::test]
    async fn lists_only_active_valid_tenants() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "acme.json", SAMPLE);
        write(
            dir.path(),
            "paused.json",
            &SAMPLE.replace(r#""name": "Acme AB""#, r#""name": "Paused", "status": "inactive""#),
        );
        write(dir.path(), "broken.json", "{ not json");
        write(dir.path(), "notes.txt", "ignored");

        let registry = DirectoryRegistry::new(dir.path());
        let active = registry.list_active().await.unwrap();

        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, "acme");
        assert_eq!(active[0].name, "Acme AB");
    }

    #[tokio::test]
    async fn loads_config_by_id() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "acme.json", SAMPLE);
        let registry = DirectoryRegistry::new(dir.path());

        let config = registry.load_config("acme").await.unwrap();
        assert_eq!(config.mail.imap_host, "imap.acme.se");

        let err = registry.load_config("nobody").await.unwrap_err();
        assert!(matches!(err, RegistryError::Config(ConfigError::TenantNotFound(_))));
    }

    #[tokio::test]
    async fn missing_directory_is_an_error() {
        let registry = DirectoryRegistry::new("/nonexistent/tenants");
        assert!(matches!(
            registry.list_active().await,
            Err(RegistryError::Directory { .. })
        ));
    }
}
