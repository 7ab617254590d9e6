//! HTTP fetch utilities, data-access interfaces and the render cache for hacktrack.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hacktrack_core::{Activity, ActivityKind, Project, ProjectSnapshot, User};
use reqwest::StatusCode;
use thiserror::Error;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info_span, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "hacktrack-storage";

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub global_concurrency: usize,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: None,
            global_concurrency: 16,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub final_url: String,
    pub body: Vec<u8>,
    pub fetched_at: DateTime<Utc>,
}

impl FetchedResponse {
    /// Body decoded as UTF-8, replacing invalid sequences.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("fetcher is shut down")]
    Closed,
    #[error("could not connect to {url}")]
    Unreachable { url: String },
}

/// A single GET round trip. Implementations never retry.
#[async_trait]
pub trait Fetch: Send + Sync {
    async fn get(&self, url: &str) -> Result<FetchedResponse, FetchError>;
}

#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    global_limit: Arc<Semaphore>,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self {
            client,
            global_limit: Arc::new(Semaphore::new(config.global_concurrency.max(1))),
        })
    }
}

#[async_trait]
impl Fetch for HttpFetcher {
    async fn get(&self, url: &str) -> Result<FetchedResponse, FetchError> {
        let _permit = self
            .global_limit
            .acquire()
            .await
            .map_err(|_| FetchError::Closed)?;

        async {
            let resp = self.client.get(url).send().await?;
            let status = resp.status();
            let final_url = resp.url().to_string();
            if !status.is_success() {
                return Err(FetchError::HttpStatus {
                    status: status.as_u16(),
                    url: final_url,
                });
            }
            let body = resp.bytes().await?.to_vec();
            debug!(status = status.as_u16(), bytes = body.len(), "fetched");
            Ok(FetchedResponse {
                status,
                final_url,
                body,
                fetched_at: Utc::now(),
            })
        }
        .instrument(info_span!("http_fetch", url))
        .await
    }
}

/// In-memory fetcher serving canned responses by exact URL.
///
/// Every request is recorded, including ones with no registered response
/// (those answer 404).
#[derive(Debug, Clone, Default)]
pub struct StaticFetcher {
    inner: Arc<StdMutex<StaticFetcherInner>>,
}

#[derive(Debug, Clone)]
enum StaticRoute {
    Respond(u16, Vec<u8>),
    Unreachable,
}

#[derive(Debug, Default)]
struct StaticFetcherInner {
    routes: HashMap<String, StaticRoute>,
    requests: Vec<String>,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StaticFetcherInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn with_body(self, url: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        self.insert(url, body);
        self
    }

    pub fn insert(&self, url: impl Into<String>, body: impl Into<Vec<u8>>) {
        self.insert_status(url, 200, body);
    }

    pub fn insert_status(&self, url: impl Into<String>, status: u16, body: impl Into<Vec<u8>>) {
        self.lock()
            .routes
            .insert(url.into(), StaticRoute::Respond(status, body.into()));
    }

    /// Requests to `url` fail as if the connection could not be made.
    pub fn with_unreachable(self, url: impl Into<String>) -> Self {
        self.insert_unreachable(url);
        self
    }

    pub fn insert_unreachable(&self, url: impl Into<String>) {
        self.lock().routes.insert(url.into(), StaticRoute::Unreachable);
    }

    pub fn requests(&self) -> Vec<String> {
        self.lock().requests.clone()
    }
}

#[async_trait]
impl Fetch for StaticFetcher {
    async fn get(&self, url: &str) -> Result<FetchedResponse, FetchError> {
        let mut inner = self.lock();
        inner.requests.push(url.to_string());
        let (status, body) = match inner.routes.get(url).cloned() {
            Some(StaticRoute::Respond(status, body)) => (status, body),
            Some(StaticRoute::Unreachable) => {
                return Err(FetchError::Unreachable {
                    url: url.to_string(),
                })
            }
            None => {
                return Err(FetchError::HttpStatus {
                    status: 404,
                    url: url.to_string(),
                })
            }
        };
        let status_code = StatusCode::from_u16(status).map_err(|_| FetchError::HttpStatus {
            status,
            url: url.to_string(),
        })?;
        if !status_code.is_success() {
            return Err(FetchError::HttpStatus {
                status,
                url: url.to_string(),
            });
        }
        Ok(FetchedResponse {
            status: status_code,
            final_url: url.to_string(),
            body,
            fetched_at: Utc::now(),
        })
    }
}

/// Query over the activity log.
#[derive(Debug, Clone, Default)]
pub struct ActivityFilter {
    pub project_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
    pub kind: Option<ActivityKind>,
    pub include_removed: bool,
}

impl ActivityFilter {
    pub fn for_project(project_id: Uuid) -> Self {
        Self {
            project_id: Some(project_id),
            ..Self::default()
        }
    }

    pub fn kind(mut self, kind: ActivityKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn user(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn including_removed(mut self) -> Self {
        self.include_removed = true;
        self
    }

    pub fn matches(&self, activity: &Activity) -> bool {
        (self.include_removed || !activity.removed)
            && self.project_id.map_or(true, |id| activity.project_id == id)
            && self.user_id.map_or(true, |id| activity.user_id == Some(id))
            && self.kind.map_or(true, |kind| activity.kind == kind)
    }
}

#[async_trait]
pub trait ProjectStore: Send + Sync {
    async fn project(&self, id: Uuid) -> anyhow::Result<Option<Project>>;

    /// Persists the project and returns its new version number. The first save is version 0.
    async fn save_project(&self, project: &Project) -> anyhow::Result<u32>;

    async fn latest_version(&self, id: Uuid) -> anyhow::Result<Option<u32>>;

    async fn project_version(&self, id: Uuid, version: u32)
        -> anyhow::Result<Option<ProjectSnapshot>>;
}

#[async_trait]
pub trait ActivityStore: Send + Sync {
    async fn append_activity(&self, activity: Activity) -> anyhow::Result<()>;

    async fn activity(&self, id: Uuid) -> anyhow::Result<Option<Activity>>;

    /// Matching rows in insertion order.
    async fn activities(&self, filter: &ActivityFilter) -> anyhow::Result<Vec<Activity>>;

    async fn count_activities(&self, filter: &ActivityFilter) -> anyhow::Result<usize> {
        Ok(self.activities(filter).await?.len())
    }

    /// Soft-deletes or restores a row. Returns false when the row does not exist.
    async fn set_removed(&self, id: Uuid, removed: bool) -> anyhow::Result<bool>;
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn user(&self, id: Uuid) -> anyhow::Result<Option<User>>;
}

/// Process-local store used by tests and the CLI.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    projects: HashMap<Uuid, Project>,
    versions: HashMap<Uuid, Vec<ProjectSnapshot>>,
    activities: Vec<Activity>,
    users: HashMap<Uuid, User>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_user(&self, user: User) {
        self.inner.lock().await.users.insert(user.id, user);
    }
}

#[async_trait]
impl ProjectStore for MemoryStore {
    async fn project(&self, id: Uuid) -> anyhow::Result<Option<Project>> {
        Ok(self.inner.lock().await.projects.get(&id).cloned())
    }

    async fn save_project(&self, project: &Project) -> anyhow::Result<u32> {
        let mut inner = self.inner.lock().await;
        inner.projects.insert(project.id, project.clone());
        let versions = inner.versions.entry(project.id).or_default();
        versions.push(project.snapshot());
        u32::try_from(versions.len() - 1).context("project version overflow")
    }

    async fn latest_version(&self, id: Uuid) -> anyhow::Result<Option<u32>> {
        let inner = self.inner.lock().await;
        match inner.versions.get(&id) {
            Some(versions) if !versions.is_empty() => Ok(Some(
                u32::try_from(versions.len() - 1).context("project version overflow")?,
            )),
            _ => Ok(None),
        }
    }

    async fn project_version(
        &self,
        id: Uuid,
        version: u32,
    ) -> anyhow::Result<Option<ProjectSnapshot>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .versions
            .get(&id)
            .and_then(|versions| versions.get(version as usize))
            .cloned())
    }
}

#[async_trait]
impl ActivityStore for MemoryStore {
    async fn append_activity(&self, activity: Activity) -> anyhow::Result<()> {
        self.inner.lock().await.activities.push(activity);
        Ok(())
    }

    async fn activity(&self, id: Uuid) -> anyhow::Result<Option<Activity>> {
        let inner = self.inner.lock().await;
        Ok(inner.activities.iter().find(|a| a.id == id).cloned())
    }

    async fn activities(&self, filter: &ActivityFilter) -> anyhow::Result<Vec<Activity>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .activities
            .iter()
            .filter(|a| filter.matches(a))
            .cloned()
            .collect())
    }

    async fn set_removed(&self, id: Uuid, removed: bool) -> anyhow::Result<bool> {
        let mut inner = self.inner.lock().await;
        match inner.activities.iter_mut().find(|a| a.id == id) {
            Some(activity) => {
                activity.removed = removed;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn user(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        Ok(self.inner.lock().await.users.get(&id).cloned())
    }
}

/// Key to rendered-fragment cache used by embed boxes.
///
/// There is no per-key invalidation: any project write clears everything.
pub trait RenderCache: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: String);
    fn clear(&self);
}

#[derive(Debug, Default)]
pub struct MemoryRenderCache {
    entries: StdMutex<HashMap<String, String>>,
}

impl MemoryRenderCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl RenderCache for MemoryRenderCache {
    fn get(&self, key: &str) -> Option<String> {
        self.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: String) {
        self.lock().insert(key.to_string(), value);
    }

    fn clear(&self) {
        self.lock().clear();
    }
}
