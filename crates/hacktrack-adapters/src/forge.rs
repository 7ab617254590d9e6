//! Code-forge adapters: repository metadata and README over each forge's REST API.

use std::sync::LazyLock;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use hacktrack_core::{CommitSummary, NormalizedRecord, SourceKind};
use hacktrack_storage::Fetch;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::{
    finish, get_json, get_text, non_empty, AdapterContext, AdapterError, Probe, SourceAdapter,
};

const BITBUCKET_README_NAMES: &[&str] = &["README.md", "README.rst", "README.txt", "README"];

static README_IMG_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"<img src="([^"]*)""#).expect("static regex"));
static README_MD_IMAGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"!\[([^\]]*)\]\(([^)\s]*)").expect("static regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ForgeKind {
    GitHub,
    GitLab,
    Gitea,
    Bitbucket,
}

impl ForgeKind {
    pub fn source_kind(self) -> SourceKind {
        match self {
            ForgeKind::GitHub => SourceKind::GitHub,
            ForgeKind::GitLab => SourceKind::GitLab,
            ForgeKind::Gitea => SourceKind::Gitea,
            ForgeKind::Bitbucket => SourceKind::Bitbucket,
        }
    }
}

/// One forge installation: the web hostname users paste and the API it maps to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForgeHost {
    pub kind: ForgeKind,
    pub host: String,
    pub api_base: String,
    /// Raw-content root used to absolutize README image paths.
    #[serde(default)]
    pub raw_base: Option<String>,
}

impl ForgeHost {
    pub fn new(kind: ForgeKind, host: impl Into<String>, api_base: impl Into<String>) -> Self {
        Self {
            kind,
            host: host.into(),
            api_base: api_base.into(),
            raw_base: None,
        }
    }

    pub fn with_raw_base(mut self, raw_base: impl Into<String>) -> Self {
        self.raw_base = Some(raw_base.into());
        self
    }

    pub fn github() -> Self {
        Self::new(ForgeKind::GitHub, "github.com", "https://api.github.com")
            .with_raw_base("https://raw.githubusercontent.com")
    }

    pub fn gitlab() -> Self {
        Self::new(ForgeKind::GitLab, "gitlab.com", "https://gitlab.com/api/v4")
    }

    pub fn bitbucket() -> Self {
        Self::new(ForgeKind::Bitbucket, "bitbucket.org", "https://api.bitbucket.org/2.0")
    }

    pub fn codeberg() -> Self {
        Self::new(ForgeKind::Gitea, "codeberg.org", "https://codeberg.org/api/v1")
    }

    pub fn builtin() -> Vec<Self> {
        vec![Self::github(), Self::gitlab(), Self::bitbucket(), Self::codeberg()]
    }

    fn api(&self) -> &str {
        self.api_base.trim_end_matches('/')
    }

    /// `owner/repo` (or the full group path on GitLab) when `reference` lives on this host.
    pub fn repo_path(&self, reference: &str) -> Option<String> {
        let url = Url::parse(reference.trim()).ok()?;
        let host = url.host_str()?;
        let host = host.strip_prefix("www.").unwrap_or(host);
        if !host.eq_ignore_ascii_case(&self.host) {
            return None;
        }
        let mut segments: Vec<&str> = url.path_segments()?.filter(|s| !s.is_empty()).collect();
        match self.kind {
            ForgeKind::GitLab => {
                if let Some(pos) = segments.iter().position(|s| *s == "-") {
                    segments.truncate(pos);
                }
            }
            _ => segments.truncate(2),
        }
        if segments.len() < 2 {
            return None;
        }
        let path = segments.join("/");
        Some(path.strip_suffix(".git").unwrap_or(&path).to_string())
    }
}

/// Points repo-relative README images at `raw_root` (`<raw host>/<full name>/<branch>`).
pub fn absolutize_readme_images(readme: &str, raw_root: &str) -> String {
    let raw_root = raw_root.trim_end_matches('/');
    let absolute = |target: &str| {
        if target.starts_with("http") {
            target.to_string()
        } else {
            format!("{raw_root}/{}", target.trim_start_matches("./").trim_start_matches('/'))
        }
    };
    let rewritten = README_IMG_TAG.replace_all(readme, |caps: &Captures| {
        format!(r#"<img src="{}""#, absolute(&caps[1]))
    });
    README_MD_IMAGE
        .replace_all(&rewritten, |caps: &Captures| {
            format!("![{}]({}", &caps[1], absolute(&caps[2]))
        })
        .into_owned()
}

#[derive(Debug, Default, Deserialize)]
struct ForgeOwner {
    avatar_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GitHubRepo {
    name: Option<String>,
    full_name: Option<String>,
    description: Option<String>,
    #[serde(default)]
    html_url: String,
    default_branch: Option<String>,
    homepage: Option<String>,
    #[serde(default)]
    has_issues: bool,
    avatar_url: Option<String>,
    #[serde(default)]
    owner: ForgeOwner,
}

#[derive(Debug, Deserialize)]
struct GitHubReadme {
    content: Option<String>,
}

/// Commit listing shape shared by GitHub and Gitea.
#[derive(Debug, Deserialize)]
struct GitCommitEntry {
    sha: String,
    #[serde(default)]
    html_url: String,
    commit: GitCommitDetail,
}

#[derive(Debug, Deserialize)]
struct GitCommitDetail {
    #[serde(default)]
    message: String,
    author: Option<GitCommitAuthor>,
}

#[derive(Debug, Deserialize)]
struct GitCommitAuthor {
    #[serde(default)]
    name: String,
    date: Option<DateTime<Utc>>,
}

impl From<GitCommitEntry> for CommitSummary {
    fn from(entry: GitCommitEntry) -> Self {
        let (author, timestamp) = match entry.commit.author {
            Some(a) => (a.name, a.date),
            None => (String::new(), None),
        };
        CommitSummary {
            id: entry.sha,
            message: first_line(&entry.commit.message),
            author,
            url: entry.html_url,
            timestamp,
        }
    }
}

#[derive(Debug, Deserialize)]
struct GitLabProject {
    id: Option<u64>,
    name: Option<String>,
    description: Option<String>,
    #[serde(default)]
    web_url: String,
    readme_url: Option<String>,
    avatar_url: Option<String>,
    issues_enabled: Option<bool>,
    namespace: Option<ForgeOwner>,
}

#[derive(Debug, Deserialize)]
struct GitLabCommit {
    id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    author_name: String,
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    web_url: String,
}

impl From<GitLabCommit> for CommitSummary {
    fn from(commit: GitLabCommit) -> Self {
        CommitSummary {
            id: commit.id,
            message: commit.title,
            author: commit.author_name,
            url: commit.web_url,
            timestamp: commit.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
struct GiteaRepo {
    name: Option<String>,
    description: Option<String>,
    #[serde(default)]
    html_url: String,
    #[serde(default)]
    has_issues: bool,
    avatar_url: Option<String>,
    #[serde(default)]
    owner: ForgeOwner,
}

#[derive(Debug, Deserialize)]
struct GiteaEntry {
    name: String,
    download_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BitbucketRepo {
    name: Option<String>,
    description: Option<String>,
    website: Option<String>,
    #[serde(default)]
    has_issues: bool,
    project: Option<BitbucketProject>,
    links: Option<BitbucketLinks>,
}

#[derive(Debug, Deserialize)]
struct BitbucketProject {
    links: Option<BitbucketLinks>,
}

#[derive(Debug, Deserialize)]
struct BitbucketLinks {
    avatar: Option<BitbucketHref>,
}

#[derive(Debug, Deserialize)]
struct BitbucketHref {
    href: String,
}

fn first_line(message: &str) -> String {
    message.lines().next().unwrap_or_default().trim().to_string()
}

fn encode_segments(path: &str) -> String {
    path.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

fn issues_url(web_url: &str, enabled: bool) -> String {
    if enabled && !web_url.is_empty() {
        format!("{}/issues", web_url.trim_end_matches('/'))
    } else {
        String::new()
    }
}

/// Recent commits are a bonus: any failure yields an empty list.
async fn best_effort_commits<T, F>(http: &dyn Fetch, url: &str, convert: F) -> Vec<CommitSummary>
where
    T: serde::de::DeserializeOwned,
    F: Fn(T) -> CommitSummary,
{
    match get_json::<Vec<T>>(http, url).await {
        Ok(entries) => entries.into_iter().map(convert).collect(),
        Err(err) => {
            debug!(url, error = %err, "commit history unavailable");
            Vec::new()
        }
    }
}

/// Adapter for one forge host, selected by hostname alone.
#[derive(Debug, Clone)]
pub struct ForgeAdapter {
    host: ForgeHost,
}

impl ForgeAdapter {
    pub fn new(host: ForgeHost) -> Self {
        Self { host }
    }

    pub fn host(&self) -> &ForgeHost {
        &self.host
    }

    async fn fetch_github(
        &self,
        http: &dyn Fetch,
        path: &str,
    ) -> Result<NormalizedRecord, AdapterError> {
        let repo_url = format!("{}/repos/{}", self.host.api(), path);
        let repo: GitHubRepo = get_json(http, &repo_url).await?;
        let (Some(name), Some(full_name)) = (repo.name, repo.full_name) else {
            return Err(AdapterError::Malformed(format!("{repo_url}: missing name or full_name")));
        };
        let branch = non_empty(repo.default_branch).unwrap_or_else(|| "main".to_string());

        let readme: GitHubReadme = get_json(http, &format!("{repo_url}/readme")).await?;
        let description = match readme.content {
            Some(content) => {
                let packed: String = content.split_whitespace().collect();
                let bytes = STANDARD
                    .decode(packed)
                    .map_err(|e| AdapterError::Malformed(format!("{repo_url}/readme: {e}")))?;
                let text = String::from_utf8_lossy(&bytes);
                let raw_base = self
                    .host
                    .raw_base
                    .as_deref()
                    .unwrap_or("https://raw.githubusercontent.com")
                    .trim_end_matches('/');
                absolutize_readme_images(&text, &format!("{raw_base}/{full_name}/{branch}"))
            }
            None => String::new(),
        };

        let commits_url = format!("{}/repos/{}/commits", self.host.api(), full_name);
        let commits =
            best_effort_commits::<GitCommitEntry, _>(http, &commits_url, Into::into).await;

        let mut record = NormalizedRecord::new(SourceKind::GitHub, name, description);
        record.summary = repo.description.unwrap_or_default();
        record.homepage_url = non_empty(repo.homepage);
        record.source_url = repo.html_url.clone();
        record.image_url = non_empty(repo.avatar_url)
            .or(non_empty(repo.owner.avatar_url))
            .unwrap_or_default();
        record.contact_url = issues_url(&repo.html_url, repo.has_issues);
        record.download_url = Some(format!("{}/releases", repo.html_url));
        record.commits = commits;
        finish(record)
    }

    async fn fetch_gitlab(
        &self,
        http: &dyn Fetch,
        path: &str,
    ) -> Result<NormalizedRecord, AdapterError> {
        let project_url = format!("{}/projects/{}", self.host.api(), urlencoding::encode(path));
        let project: GitLabProject = get_json(http, &project_url).await?;
        let Some(name) = project.name else {
            return Err(AdapterError::Malformed(format!("{project_url}: missing name")));
        };

        let description = match non_empty(project.readme_url) {
            Some(readme_url) => get_text(http, &format!("{readme_url}?inline=false")).await?,
            None => String::new(),
        };

        let commits = match project.id {
            Some(id) => {
                let commits_url = format!("{}/projects/{}/repository/commits", self.host.api(), id);
                best_effort_commits::<GitLabCommit, _>(http, &commits_url, Into::into).await
            }
            None => Vec::new(),
        };

        let namespace_avatar = project
            .namespace
            .and_then(|ns| non_empty(ns.avatar_url))
            .map(|avatar| {
                if avatar.starts_with('/') {
                    format!("https://{}{}", self.host.host, avatar)
                } else {
                    avatar
                }
            });

        let mut record = NormalizedRecord::new(SourceKind::GitLab, name, description);
        record.summary = project.description.unwrap_or_default();
        record.source_url = project.web_url.clone();
        record.image_url = non_empty(project.avatar_url)
            .or(namespace_avatar)
            .unwrap_or_default();
        record.contact_url = issues_url(&project.web_url, project.issues_enabled.unwrap_or(true));
        record.commits = commits;
        finish(record)
    }

    async fn fetch_gitea(
        &self,
        http: &dyn Fetch,
        path: &str,
    ) -> Result<NormalizedRecord, AdapterError> {
        let repo_url = format!("{}/repos/{}", self.host.api(), encode_segments(path));
        let repo: GiteaRepo = get_json(http, &repo_url).await?;
        let Some(name) = repo.name else {
            return Err(AdapterError::Malformed(format!("{repo_url}: missing name")));
        };

        let contents_url = format!("{repo_url}/contents");
        let readme_url = match get_json::<Vec<GiteaEntry>>(http, &contents_url).await {
            Ok(entries) => entries
                .into_iter()
                .find(|entry| entry.name.to_lowercase().contains("readme"))
                .and_then(|entry| non_empty(entry.download_url)),
            Err(err) => {
                debug!(url = %contents_url, error = %err, "repository listing unavailable");
                None
            }
        };
        let description = match readme_url {
            Some(url) => get_text(http, &url).await?,
            None => {
                debug!(repo = path, "no README in repository listing");
                String::new()
            }
        };

        let commits_url = format!("{repo_url}/commits");
        let commits =
            best_effort_commits::<GitCommitEntry, _>(http, &commits_url, Into::into).await;

        let mut record = NormalizedRecord::new(SourceKind::Gitea, name, description);
        record.summary = repo.description.unwrap_or_default();
        record.source_url = repo.html_url.clone();
        record.image_url = non_empty(repo.avatar_url)
            .or(non_empty(repo.owner.avatar_url))
            .unwrap_or_default();
        record.contact_url = issues_url(&repo.html_url, repo.has_issues);
        record.commits = commits;
        finish(record)
    }

    async fn fetch_bitbucket(
        &self,
        http: &dyn Fetch,
        path: &str,
    ) -> Result<NormalizedRecord, AdapterError> {
        let repo_url = format!("{}/repositories/{}", self.host.api(), path);
        let repo: BitbucketRepo = get_json(http, &repo_url).await?;
        let Some(name) = repo.name else {
            return Err(AdapterError::Malformed(format!("{repo_url}: missing name")));
        };

        let mut description = String::new();
        for readme in BITBUCKET_README_NAMES {
            match get_text(http, &format!("{repo_url}/src/HEAD/{readme}")).await {
                Ok(text) if !text.starts_with(r#"{"type":"error""#) => {
                    description = text;
                    break;
                }
                Ok(_) => continue,
                Err(err) if err.is_network() => return Err(err),
                Err(_) => continue,
            }
        }

        let web_url = format!("https://{}/{}", self.host.host, path);
        let website = non_empty(repo.website);
        let contact_url = if repo.has_issues {
            format!("{web_url}/issues")
        } else {
            website.clone().unwrap_or_else(|| web_url.clone())
        };
        let avatar = |links: Option<BitbucketLinks>| links.and_then(|l| l.avatar).map(|a| a.href);
        let image_url = repo
            .project
            .and_then(|p| avatar(p.links))
            .or_else(|| avatar(repo.links))
            .unwrap_or_default();

        let mut record = NormalizedRecord::new(SourceKind::Bitbucket, name, description);
        record.summary = repo.description.unwrap_or_default();
        record.homepage_url = website;
        record.source_url = web_url;
        record.image_url = image_url;
        record.contact_url = contact_url;
        finish(record)
    }
}

#[async_trait]
impl SourceAdapter for ForgeAdapter {
    fn kind(&self) -> SourceKind {
        self.host.kind.source_kind()
    }

    fn detect(&self, probe: &Probe<'_>) -> bool {
        match probe {
            Probe::Reference(url) => self.host.repo_path(url).is_some(),
            Probe::Page(_) => false,
        }
    }

    async fn fetch(
        &self,
        http: &dyn Fetch,
        _ctx: &AdapterContext,
        probe: &Probe<'_>,
    ) -> Result<NormalizedRecord, AdapterError> {
        let Some(path) = self.host.repo_path(probe.url()) else {
            return Err(AdapterError::NotFound(probe.url().to_string()));
        };
        debug!(forge = %self.host.host, repo = %path, "fetching forge project");
        match self.host.kind {
            ForgeKind::GitHub => self.fetch_github(http, &path).await,
            ForgeKind::GitLab => self.fetch_gitlab(http, &path).await,
            ForgeKind::Gitea => self.fetch_gitea(http, &path).await,
            ForgeKind::Bitbucket => self.fetch_bitbucket(http, &path).await,
        }
    }
}
