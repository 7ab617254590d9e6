//! Project sync orchestration: merge engine, activity log and the project service.

mod activity;
mod merge;
mod service;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use hacktrack_adapters::{AdapterContext, Dispatcher, ForgeHost};
use hacktrack_core::SourceKind;
use hacktrack_storage::HttpClientConfig;
use serde::Deserialize;
use thiserror::Error;
use tokio::fs;
use tracing::{info, warn};
use uuid::Uuid;

pub use activity::{build_timeline, revertible_version, ActivityLog, RevertError, TimelineEntry};
pub use merge::{sync_project_data, MergeOutcome};
pub use service::ProjectSync;

pub const CRATE_NAME: &str = "hacktrack-sync";

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("the event is locked for {0}")]
    Locked(&'static str),
    #[error("project has no remote source to sync from")]
    NotAutoupdateable,
    #[error("hidden projects are not synced")]
    Hidden,
    #[error("project {0} not found")]
    ProjectNotFound(Uuid),
    #[error("activity {0} not found")]
    ActivityNotFound(Uuid),
    #[error("user {0} not found")]
    UserNotFound(Uuid),
    #[error("user {0} is not active")]
    InactiveUser(Uuid),
    #[error(transparent)]
    Revert(#[from] RevertError),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Outcome of one autoupdate run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncReport {
    /// The reference did not resolve to any source.
    NoData,
    /// A source answered but nothing usable landed in `autotext`.
    EmptyReadme { source: SourceKind },
    Synced {
        source: SourceKind,
        bytes: usize,
        changed: bool,
    },
}

impl SyncReport {
    pub fn message(&self) -> String {
        match self {
            SyncReport::NoData => {
                "To Sync: ensure a README exists on the remote site.".to_string()
            }
            SyncReport::EmptyReadme { source } => {
                format!("Could not sync: the {source} source returned no content.")
            }
            SyncReport::Synced { source, bytes, .. } => {
                format!("Synced {bytes} bytes from {source}.")
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceRegistry {
    pub forges: Vec<ForgeHost>,
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self {
            forges: ForgeHost::builtin(),
        }
    }
}

impl SourceRegistry {
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).context("parsing source registry")
    }

    /// Reads the registry at `path`, or the built-in hosts when the file does not exist.
    pub async fn load(path: &Path) -> Result<Self> {
        let text = match fs::read_to_string(path).await {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "source registry missing, using built-in forges");
                return Ok(Self::default());
            }
            Err(err) => {
                return Err(err).with_context(|| format!("reading {}", path.display()));
            }
        };
        let registry: SourceRegistry =
            serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
        info!(path = %path.display(), forges = registry.forges.len(), "loaded source registry");
        Ok(registry)
    }

    pub fn dispatcher(&self, ctx: AdapterContext) -> Dispatcher {
        Dispatcher::with_forges(ctx, &self.forges)
    }
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub sources_path: PathBuf,
    pub static_url: String,
}

impl SyncConfig {
    pub fn from_env() -> Self {
        Self {
            user_agent: std::env::var("HACKTRACK_USER_AGENT")
                .unwrap_or_else(|_| "hacktrack-bot/0.1".to_string()),
            http_timeout_secs: std::env::var("HACKTRACK_HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(20),
            sources_path: std::env::var("HACKTRACK_SOURCES")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./sources.yaml")),
            static_url: std::env::var("HACKTRACK_STATIC_URL")
                .unwrap_or_else(|_| "/static".to_string()),
        }
    }

    pub fn http_client_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: Duration::from_secs(self.http_timeout_secs),
            user_agent: Some(self.user_agent.clone()),
            ..HttpClientConfig::default()
        }
    }

    pub fn adapter_context(&self) -> AdapterContext {
        AdapterContext::new(self.static_url.clone())
    }

    /// Loads the source registry and builds a dispatcher over it.
    pub async fn dispatcher(&self) -> Result<Dispatcher> {
        let registry = SourceRegistry::load(&self.sources_path).await?;
        Ok(registry.dispatcher(self.adapter_context()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hacktrack_adapters::ForgeKind;

    #[test]
    fn registry_parses_forge_hosts_in_order() {
        let registry = SourceRegistry::from_yaml_str(
            r#"
forges:
  - kind: github
    host: github.com
    api_base: https://api.github.com
    raw_base: https://raw.githubusercontent.com
  - kind: gitea
    host: git.example.org
    api_base: https://git.example.org/api/v1
"#,
        )
        .unwrap();
        assert_eq!(registry.forges.len(), 2);
        assert_eq!(registry.forges[0].kind, ForgeKind::GitHub);
        assert_eq!(registry.forges[1].host, "git.example.org");
        assert_eq!(registry.forges[1].raw_base, None);
    }

    #[tokio::test]
    async fn missing_registry_falls_back_to_builtin_hosts() {
        let dir = tempfile::tempdir().unwrap();
        let registry = SourceRegistry::load(&dir.path().join("sources.yaml")).await.unwrap();
        let hosts: Vec<_> = registry.forges.iter().map(|f| f.host.as_str()).collect();
        assert!(hosts.contains(&"github.com"));
        assert!(hosts.contains(&"codeberg.org"));
    }

    #[tokio::test]
    async fn shipped_registry_matches_builtin_hosts() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../sources.yaml");
        let registry = SourceRegistry::load(&path).await.unwrap();
        assert_eq!(registry.forges, ForgeHost::builtin());
    }

    #[tokio::test]
    async fn malformed_registry_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sources.yaml");
        std::fs::write(&path, "forges:\n  - kind: sourceforge\n    host: x\n").unwrap();
        let err = SourceRegistry::load(&path).await.unwrap_err();
        assert!(format!("{err:#}").contains("parsing"));
    }

    #[test]
    fn report_messages() {
        assert!(SyncReport::NoData.message().contains("README"));
        let synced = SyncReport::Synced {
            source: SourceKind::GitHub,
            bytes: 42,
            changed: true,
        };
        assert_eq!(synced.message(), "Synced 42 bytes from GitHub.");
    }
}
