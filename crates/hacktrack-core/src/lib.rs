//! Core domain model and scoring for hacktrack.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

pub const CRATE_NAME: &str = "hacktrack-core";

/// Progress of a challenge that no team has picked up yet.
pub const PROGRESS_UNSTARTED: i32 = -1;
/// Highest progress value that still counts as the challenge phase.
pub const PROGRESS_CHALLENGE: i32 = 0;
/// Progress given to projects created while their event is running.
pub const PROGRESS_TEAM_START: i32 = 5;

pub const MAX_SCORE: i32 = 100;
pub const MAX_EXCERPT_LENGTH: usize = 500;
pub const MAX_SUMMARY_LENGTH: usize = 140;

/// Persisted text columns are nullable; the domain model treats null as "".
fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// Platform a normalized record was fetched from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceKind {
    GitHub,
    GitLab,
    Gitea,
    Bitbucket,
    #[serde(rename = "Google Docs")]
    GoogleDocs,
    Markdown,
    DokuWiki,
    Etherpad,
    Instructables,
    #[serde(rename = "Data Package")]
    DataPackage,
}

impl SourceKind {
    pub fn label(self) -> &'static str {
        match self {
            SourceKind::GitHub => "GitHub",
            SourceKind::GitLab => "GitLab",
            SourceKind::Gitea => "Gitea",
            SourceKind::Bitbucket => "Bitbucket",
            SourceKind::GoogleDocs => "Google Docs",
            SourceKind::Markdown => "Markdown",
            SourceKind::DokuWiki => "DokuWiki",
            SourceKind::Etherpad => "Etherpad",
            SourceKind::Instructables => "Instructables",
            SourceKind::DataPackage => "Data Package",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One entry of a forge's recent commit history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitSummary {
    pub id: String,
    pub message: String,
    pub author: String,
    pub url: String,
    pub timestamp: Option<DateTime<Utc>>,
}

/// Adapter output: a project's description as published on a third-party platform.
///
/// A record is either empty (see [`NormalizedRecord::is_empty`]) or carries at
/// least a name and a description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    #[serde(rename = "type")]
    pub kind: SourceKind,
    pub name: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub summary: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub description: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub source_url: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub image_url: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub contact_url: String,
    #[serde(default)]
    pub homepage_url: Option<String>,
    #[serde(default)]
    pub download_url: Option<String>,
    #[serde(default)]
    pub commits: Vec<CommitSummary>,
}

impl NormalizedRecord {
    pub fn new(kind: SourceKind, name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            summary: String::new(),
            description: description.into(),
            source_url: String::new(),
            image_url: String::new(),
            contact_url: String::new(),
            homepage_url: None,
            download_url: None,
            commits: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.name.trim().is_empty() || self.description.trim().is_empty()
    }
}

/// Editable project fields captured for each saved version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectSnapshot {
    pub name: String,
    pub summary: String,
    pub hashtag: String,
    pub image_url: String,
    pub source_url: String,
    pub webpage_url: String,
    pub contact_url: String,
    pub autotext_url: String,
    pub download_url: String,
    pub autotext: String,
    pub longtext: String,
    pub logo_color: String,
    pub logo_icon: String,
    pub category_id: Option<Uuid>,
    pub progress: i32,
    pub is_hidden: bool,
    pub is_webembed: bool,
    pub is_autoupdate: bool,
}

/// Persisted hackathon project.
///
/// `score` is derived: it is only ever written by [`Project::update`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub summary: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub hashtag: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub image_url: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub source_url: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub webpage_url: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub contact_url: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub autotext_url: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub download_url: String,
    #[serde(default)]
    pub is_hidden: bool,
    #[serde(default)]
    pub is_webembed: bool,
    #[serde(default = "default_true")]
    pub is_autoupdate: bool,
    /// Last content synced from `autotext_url`.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub autotext: String,
    /// Content written by the team; never touched by sync.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub longtext: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub logo_color: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub logo_icon: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub user_id: Option<Uuid>,
    #[serde(default)]
    pub event_id: Option<Uuid>,
    #[serde(default)]
    pub category_id: Option<Uuid>,
    #[serde(default = "default_progress")]
    pub progress: i32,
    #[serde(default)]
    pub score: i32,
}

fn default_true() -> bool {
    true
}

fn default_progress() -> i32 {
    PROGRESS_UNSTARTED
}

fn over(text: &str, limit: usize) -> bool {
    text.chars().count() > limit
}

fn content_depth_points(text: &str) -> i32 {
    let mut points = 0;
    if over(text, 3) {
        points += 1;
    }
    if over(text, 100) {
        points += 3;
    }
    if over(text, 500) {
        points += 5;
    }
    points
}

fn truncate_with_ellipsis(text: &str, max: usize) -> String {
    let mut out: String = text.chars().take(max).collect();
    if over(text, max) {
        out.push_str("...");
    }
    out
}

impl Project {
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            summary: String::new(),
            hashtag: String::new(),
            image_url: String::new(),
            source_url: String::new(),
            webpage_url: String::new(),
            contact_url: String::new(),
            autotext_url: String::new(),
            download_url: String::new(),
            is_hidden: false,
            is_webembed: false,
            is_autoupdate: true,
            autotext: String::new(),
            longtext: String::new(),
            logo_color: String::new(),
            logo_icon: String::new(),
            created_at: now,
            updated_at: now,
            user_id: None,
            event_id: None,
            category_id: None,
            progress: PROGRESS_UNSTARTED,
            score: 0,
        }
    }

    pub fn is_challenge(&self) -> bool {
        self.progress <= PROGRESS_CHALLENGE
    }

    pub fn is_autoupdateable(&self) -> bool {
        !self.autotext_url.trim().is_empty()
    }

    /// Completeness score from current field values and the project's activity count.
    pub fn calculate_score(&self, activity_count: usize) -> i32 {
        if self.is_challenge() {
            return 0;
        }
        let activities = i32::try_from(activity_count).unwrap_or(i32::MAX);
        let mut score = self.progress.saturating_add(activities);

        for field in [
            &self.summary,
            &self.image_url,
            &self.source_url,
            &self.webpage_url,
            &self.logo_color,
            &self.logo_icon,
        ] {
            if over(field, 3) {
                score = score.saturating_add(1);
            }
        }

        score = score
            .saturating_add(content_depth_points(&self.longtext))
            .saturating_add(content_depth_points(&self.autotext));

        score.clamp(0, MAX_SCORE)
    }

    /// Applies field corrections, stamps `updated_at` and recomputes `score`.
    ///
    /// Call after every user-visible mutation, before the project is saved.
    pub fn update(&mut self, activity_count: usize) {
        self.update_at(activity_count, Utc::now());
    }

    pub fn update_at(&mut self, activity_count: usize, now: DateTime<Utc>) {
        if self.logo_icon.contains("fa-") {
            self.logo_icon = self.logo_icon.replace("fa-", "");
        }
        if self.logo_color == "#000000" {
            self.logo_color.clear();
        }
        self.updated_at = now;
        self.score = self.calculate_score(activity_count);
    }

    /// Short preview text: team-written content first, synced content as fallback.
    pub fn excerpt(&self) -> String {
        if over(&self.longtext, 10) {
            truncate_with_ellipsis(&self.longtext, MAX_EXCERPT_LENGTH)
        } else if self.is_autoupdateable() && over(&self.autotext, 10) {
            truncate_with_ellipsis(&self.autotext, MAX_EXCERPT_LENGTH)
        } else {
            String::new()
        }
    }

    pub fn snapshot(&self) -> ProjectSnapshot {
        ProjectSnapshot {
            name: self.name.clone(),
            summary: self.summary.clone(),
            hashtag: self.hashtag.clone(),
            image_url: self.image_url.clone(),
            source_url: self.source_url.clone(),
            webpage_url: self.webpage_url.clone(),
            contact_url: self.contact_url.clone(),
            autotext_url: self.autotext_url.clone(),
            download_url: self.download_url.clone(),
            autotext: self.autotext.clone(),
            longtext: self.longtext.clone(),
            logo_color: self.logo_color.clone(),
            logo_icon: self.logo_icon.clone(),
            category_id: self.category_id,
            progress: self.progress,
            is_hidden: self.is_hidden,
            is_webembed: self.is_webembed,
            is_autoupdate: self.is_autoupdate,
        }
    }

    pub fn restore(&mut self, snapshot: &ProjectSnapshot) {
        let snapshot = snapshot.clone();
        self.name = snapshot.name;
        self.summary = snapshot.summary;
        self.hashtag = snapshot.hashtag;
        self.image_url = snapshot.image_url;
        self.source_url = snapshot.source_url;
        self.webpage_url = snapshot.webpage_url;
        self.contact_url = snapshot.contact_url;
        self.autotext_url = snapshot.autotext_url;
        self.download_url = snapshot.download_url;
        self.autotext = snapshot.autotext;
        self.longtext = snapshot.longtext;
        self.logo_color = snapshot.logo_color;
        self.logo_icon = snapshot.logo_icon;
        self.category_id = snapshot.category_id;
        self.progress = snapshot.progress;
        self.is_hidden = snapshot.is_hidden;
        self.is_webembed = snapshot.is_webembed;
        self.is_autoupdate = snapshot.is_autoupdate;
    }
}

/// Truncates a summary to the persisted column width.
pub fn clip_summary(text: &str) -> String {
    text.trim().chars().take(MAX_SUMMARY_LENGTH).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityKind {
    Review,
    Boost,
    Create,
    Update,
    Star,
}

impl ActivityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ActivityKind::Review => "review",
            ActivityKind::Boost => "boost",
            ActivityKind::Create => "create",
            ActivityKind::Update => "update",
            ActivityKind::Star => "star",
        }
    }
}

impl fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append-only log row describing something that happened to a project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Activity {
    pub id: Uuid,
    pub kind: ActivityKind,
    /// Free-text subtype such as `post`, `sync` or `commit`.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub action: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub content: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub ref_url: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub user_id: Option<Uuid>,
    pub project_id: Uuid,
    pub project_progress: i32,
    pub project_score: i32,
    /// Saved project version current when the row was written.
    #[serde(default)]
    pub project_version: Option<u32>,
    #[serde(default)]
    pub removed: bool,
}

impl Activity {
    /// New row snapshotting the project's progress and score.
    pub fn new(kind: ActivityKind, project: &Project, user_id: Option<Uuid>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            action: String::new(),
            content: String::new(),
            ref_url: String::new(),
            timestamp: Utc::now(),
            user_id,
            project_id: project.id,
            project_progress: project.progress,
            project_score: project.score,
            project_version: None,
            removed: false,
        }
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = action.into();
        self
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    pub fn with_ref_url(mut self, ref_url: impl Into<String>) -> Self {
        self.ref_url = ref_url.into();
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_version(mut self, version: Option<u32>) -> Self {
        self.project_version = version;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub is_admin: bool,
}

impl User {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            username: username.into(),
            active: true,
            is_admin: false,
        }
    }
}

/// Event-level switches a caller reads before asking the core to mutate a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Locks {
    pub editing: bool,
    pub starting: bool,
    pub resources: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub name: String,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    #[serde(default)]
    pub lock_editing: bool,
    #[serde(default)]
    pub lock_starting: bool,
    #[serde(default)]
    pub lock_resources: bool,
}

impl Event {
    pub fn new(name: impl Into<String>, starts_at: DateTime<Utc>, ends_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            starts_at,
            ends_at,
            lock_editing: false,
            lock_starting: false,
            lock_resources: false,
        }
    }

    pub fn has_started(&self, now: DateTime<Utc>) -> bool {
        self.starts_at <= now && now <= self.ends_at
    }

    pub fn has_finished(&self, now: DateTime<Utc>) -> bool {
        now > self.ends_at
    }

    pub fn can_start_project(&self, now: DateTime<Utc>) -> bool {
        !self.has_finished(now) && !self.lock_starting
    }

    pub fn locks(&self) -> Locks {
        Locks {
            editing: self.lock_editing,
            starting: self.lock_starting,
            resources: self.lock_resources,
        }
    }
}
