use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use hacktrack_adapters::Dispatcher;
use hacktrack_core::{
    Activity, ActivityKind, Event, NormalizedRecord, Project, User, PROGRESS_TEAM_START,
    PROGRESS_UNSTARTED,
};
use hacktrack_storage::{
    ActivityFilter, ActivityStore, Fetch, HttpFetcher, ProjectStore, RenderCache, UserStore,
};
use tracing::{debug, info};
use uuid::Uuid;

use crate::activity::{ActivityLog, TimelineEntry};
use crate::merge::sync_project_data;
use crate::{SyncConfig, SyncError, SyncReport};

/// Project write operations: each one saves through [`Project::update`], logs an
/// activity and clears the render cache.
///
/// Lock checks happen here, before any mutation. Concurrent writes to the same
/// project are not coordinated; the last save wins.
pub struct ProjectSync<S> {
    store: Arc<S>,
    log: ActivityLog<S>,
    dispatcher: Arc<Dispatcher>,
    http: Arc<dyn Fetch>,
    cache: Arc<dyn RenderCache>,
}

impl<S> ProjectSync<S>
where
    S: ProjectStore + ActivityStore + UserStore,
{
    pub fn new(
        store: Arc<S>,
        dispatcher: Dispatcher,
        http: Arc<dyn Fetch>,
        cache: Arc<dyn RenderCache>,
    ) -> Self {
        Self {
            log: ActivityLog::new(Arc::clone(&store)),
            store,
            dispatcher: Arc::new(dispatcher),
            http,
            cache,
        }
    }

    /// Live HTTP fetcher and the configured source registry.
    pub async fn from_config(
        config: &SyncConfig,
        store: Arc<S>,
        cache: Arc<dyn RenderCache>,
    ) -> anyhow::Result<Self> {
        let http = HttpFetcher::new(config.http_client_config())?;
        let dispatcher = config.dispatcher().await?;
        Ok(Self::new(store, dispatcher, Arc::new(http), cache))
    }

    pub fn activity_log(&self) -> &ActivityLog<S> {
        &self.log
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub async fn project(&self, project_id: Uuid) -> Result<Project, SyncError> {
        self.store
            .project(project_id)
            .await?
            .ok_or(SyncError::ProjectNotFound(project_id))
    }

    /// Fetches what the project's remote source would contribute, without saving.
    pub async fn preview(&self, reference: &str) -> Option<NormalizedRecord> {
        self.dispatcher
            .get_project_data(self.http.as_ref(), reference)
            .await
    }

    /// Saves a new project into `event`.
    ///
    /// Projects created once the event is running start as a team with the creator
    /// starred; earlier ones start as challenges.
    pub async fn create(
        &self,
        event: &Event,
        mut project: Project,
        creator: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<(Project, Option<SyncReport>), SyncError> {
        if event.locks().starting {
            return Err(SyncError::Locked("starting"));
        }
        let started = event.has_started(now);
        project.event_id = Some(event.id);
        project.user_id = creator;
        project.progress = if started {
            PROGRESS_TEAM_START
        } else {
            PROGRESS_UNSTARTED
        };

        self.save(&mut project).await?;
        self.log
            .record(&project, ActivityKind::Create, creator, "", "")
            .await?;
        if let (true, Some(user_id)) = (started, creator) {
            self.log
                .record(&project, ActivityKind::Star, Some(user_id), "", "")
                .await?;
        }
        info!(project = %project.id, event = %event.id, started, "project created");

        let report = self.sync_if_linked(&mut project).await?;
        Ok((project, report))
    }

    pub async fn edit<F>(
        &self,
        event: &Event,
        project_id: Uuid,
        actor: Option<Uuid>,
        apply: F,
    ) -> Result<Project, SyncError>
    where
        F: FnOnce(&mut Project) + Send,
    {
        if event.locks().editing {
            return Err(SyncError::Locked("editing"));
        }
        let mut project = self.project(project_id).await?;
        apply(&mut project);
        self.save(&mut project).await?;
        self.log
            .record(&project, ActivityKind::Update, actor, "", "")
            .await?;
        Ok(project)
    }

    /// Progress note from the team, optionally moving the project's stage.
    pub async fn post(
        &self,
        event: &Event,
        project_id: Uuid,
        actor: Option<Uuid>,
        note: &str,
        progress: Option<i32>,
    ) -> Result<(Project, Option<SyncReport>), SyncError> {
        if event.locks().resources {
            return Err(SyncError::Locked("resources"));
        }
        let mut project = self.project(project_id).await?;
        if let Some(progress) = progress {
            project.progress = progress;
        }
        self.save(&mut project).await?;
        self.log
            .record(&project, ActivityKind::Update, actor, "post", note)
            .await?;

        let report = self.sync_if_linked(&mut project).await?;
        Ok((project, report))
    }

    /// Pulls the project's `autotext_url` source into the project and saves it.
    pub async fn autoupdate(
        &self,
        event: &Event,
        project_id: Uuid,
    ) -> Result<SyncReport, SyncError> {
        if event.locks().editing {
            return Err(SyncError::Locked("editing"));
        }
        let mut project = self.project(project_id).await?;
        self.sync_project(&mut project).await
    }

    /// Adds `user_id` to the team. Returns `None` when they already are a member.
    pub async fn star(
        &self,
        project_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<Activity>, SyncError> {
        let user = self.active_user(user_id).await?;
        let project = self.project(project_id).await?;
        if self.log.is_member(project_id, user.id).await? {
            debug!(project = %project_id, user = %user.username, "already on the team");
            return Ok(None);
        }
        let star = self
            .log
            .record(&project, ActivityKind::Star, Some(user.id), "", "")
            .await?;
        info!(project = %project_id, user = %user.username, "joined team");
        Ok(Some(star))
    }

    pub async fn unstar(&self, project_id: Uuid, user_id: Uuid) -> Result<usize, SyncError> {
        let removed = self.log.unstar(project_id, user_id).await?;
        if removed > 0 {
            info!(project = %project_id, user = %user_id, "left team");
        }
        Ok(removed)
    }

    pub async fn boost(
        &self,
        project_id: Uuid,
        actor: Option<Uuid>,
        boost: &str,
        note: &str,
    ) -> Result<Activity, SyncError> {
        let project = self.project(project_id).await?;
        self.cache.clear();
        self.log
            .record(&project, ActivityKind::Boost, actor, boost, note)
            .await
    }

    pub async fn comment(
        &self,
        project_id: Uuid,
        actor: Option<Uuid>,
        note: &str,
    ) -> Result<Activity, SyncError> {
        let project = self.project(project_id).await?;
        self.log
            .record(&project, ActivityKind::Review, actor, "post", note)
            .await
    }

    /// Hides a timeline entry. The row itself is kept.
    pub async fn remove_post(&self, activity_id: Uuid) -> Result<(), SyncError> {
        if !self.log.remove(activity_id).await? {
            return Err(SyncError::ActivityNotFound(activity_id));
        }
        self.cache.clear();
        Ok(())
    }

    /// Restores the project's editable fields to the version `activity_id` recorded.
    ///
    /// The restored state is saved as a new version; existing activities are untouched.
    pub async fn revert(
        &self,
        event: &Event,
        activity_id: Uuid,
    ) -> Result<(Project, u32), SyncError> {
        if event.locks().editing {
            return Err(SyncError::Locked("editing"));
        }
        let activity = self.log.activity(activity_id).await?;
        let (version, snapshot) = self.log.revert_target(&activity).await?;
        let mut project = self.project(activity.project_id).await?;
        project.restore(&snapshot);
        let saved = self.save(&mut project).await?;
        info!(project = %project.id, to = version, saved, "project reverted");
        Ok((project, saved))
    }

    pub async fn timeline(
        &self,
        project_id: Uuid,
        event: Option<&Event>,
        now: DateTime<Utc>,
    ) -> Result<Vec<TimelineEntry>, SyncError> {
        self.log.timeline(project_id, event, now).await
    }

    pub async fn team(&self, project_id: Uuid) -> Result<Vec<User>, SyncError> {
        self.log.team(project_id).await
    }

    async fn active_user(&self, user_id: Uuid) -> Result<User, SyncError> {
        let user = self
            .store
            .user(user_id)
            .await?
            .ok_or(SyncError::UserNotFound(user_id))?;
        if !user.active {
            return Err(SyncError::InactiveUser(user_id));
        }
        Ok(user)
    }

    async fn save(&self, project: &mut Project) -> Result<u32, SyncError> {
        let activities = self
            .store
            .count_activities(&ActivityFilter::for_project(project.id))
            .await?;
        project.update(activities);
        let version = self.store.save_project(project).await?;
        self.cache.clear();
        debug!(project = %project.id, version, score = project.score, "project saved");
        Ok(version)
    }

    async fn sync_if_linked(&self, project: &mut Project) -> Result<Option<SyncReport>, SyncError> {
        if !project.is_autoupdateable() || project.is_hidden {
            return Ok(None);
        }
        self.sync_project(project).await.map(Some)
    }

    async fn sync_project(&self, project: &mut Project) -> Result<SyncReport, SyncError> {
        if !project.is_autoupdateable() {
            return Err(SyncError::NotAutoupdateable);
        }
        if project.is_hidden {
            return Err(SyncError::Hidden);
        }
        let first_sync = project.autotext.trim().chars().count() <= 1;

        let Some(record) = self.preview(&project.autotext_url).await else {
            info!(project = %project.id, url = %project.autotext_url, "nothing to sync");
            return Ok(SyncReport::NoData);
        };
        let outcome = sync_project_data(project, &record);
        let commits = self.log_commits(project, &record).await?;
        self.save(project).await?;

        let source = record.kind;
        let bytes = project.autotext.len();
        if first_sync {
            if project.autotext.trim().chars().count() <= 1 {
                return Ok(SyncReport::EmptyReadme { source });
            }
            self.log
                .record(project, ActivityKind::Update, None, "sync", &format!("{bytes} bytes"))
                .await?;
        }
        info!(
            project = %project.id,
            source = %source,
            bytes,
            commits,
            changed = outcome.changed(),
            "project synced"
        );
        Ok(SyncReport::Synced {
            source,
            bytes,
            changed: outcome.changed(),
        })
    }

    /// Logs commits not seen before, oldest first. Returns how many were added.
    async fn log_commits(
        &self,
        project: &Project,
        record: &NormalizedRecord,
    ) -> Result<usize, SyncError> {
        if record.commits.is_empty() {
            return Ok(0);
        }
        let filter = ActivityFilter::for_project(project.id)
            .kind(ActivityKind::Update)
            .including_removed();
        let mut seen: HashSet<String> = self
            .store
            .activities(&filter)
            .await?
            .into_iter()
            .filter(|a| a.action == "commit")
            .map(|a| a.ref_url)
            .collect();

        let mut added = 0;
        for commit in record.commits.iter().rev() {
            if commit.url.is_empty() || !seen.insert(commit.url.clone()) {
                continue;
            }
            let activity = Activity::new(ActivityKind::Update, project, None)
                .with_action("commit")
                .with_content(commit.message.trim())
                .with_ref_url(&commit.url)
                .with_timestamp(commit.timestamp.unwrap_or_else(Utc::now));
            self.log.append(project, activity).await?;
            added += 1;
        }
        Ok(added)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use hacktrack_adapters::AdapterContext;
    use hacktrack_core::{CommitSummary, SourceKind, PROGRESS_CHALLENGE};
    use hacktrack_storage::{MemoryRenderCache, MemoryStore, StaticFetcher};

    const PAD: &str = "https://pad.example.org/p/solar_kiosk";
    const PAD_PAGE: &str = r#"<html><head><title>solar_kiosk</title>
</head>
<body>
<a id="exportetherpada" data-l10n-id="pad.importExport.exportetherpad">Etherpad</a>
</body></html>"#;

    struct Harness {
        store: Arc<MemoryStore>,
        cache: Arc<MemoryRenderCache>,
        http: Arc<StaticFetcher>,
        sync: ProjectSync<MemoryStore>,
    }

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, day, hour, 0, 0).single().unwrap()
    }

    fn event() -> Event {
        Event::new("Hack Days", at(2, 9), at(3, 18))
    }

    fn harness(http: StaticFetcher) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let cache = Arc::new(MemoryRenderCache::new());
        let http = Arc::new(http);
        let sync = ProjectSync::new(
            Arc::clone(&store),
            Dispatcher::standard(AdapterContext::default()),
            http.clone(),
            cache.clone(),
        );
        Harness {
            store,
            cache,
            http,
            sync,
        }
    }

    fn pad_fetcher(text: &str) -> StaticFetcher {
        StaticFetcher::new()
            .with_body(PAD, PAD_PAGE)
            .with_body(format!("{PAD}/export/txt"), text.to_string())
    }

    #[tokio::test]
    async fn creation_before_and_after_the_start() {
        let h = harness(StaticFetcher::new());
        let ada = User::new("ada");
        h.store.insert_user(ada.clone()).await;

        let (early, report) = h
            .sync
            .create(&event(), Project::new("Early idea"), Some(ada.id), at(1, 12))
            .await
            .unwrap();
        assert_eq!(early.progress, PROGRESS_UNSTARTED);
        assert!(early.progress <= PROGRESS_CHALLENGE);
        assert_eq!(early.score, 0);
        assert_eq!(report, None);
        assert!(h.sync.team(early.id).await.unwrap().is_empty());

        let (team, _) = h
            .sync
            .create(&event(), Project::new("Kiosk"), Some(ada.id), at(2, 12))
            .await
            .unwrap();
        assert_eq!(team.progress, PROGRESS_TEAM_START);
        let members: Vec<_> = h
            .sync
            .team(team.id)
            .await
            .unwrap()
            .into_iter()
            .map(|u| u.username)
            .collect();
        assert_eq!(members, vec!["ada"]);
        let kinds: Vec<_> = h
            .sync
            .activity_log()
            .activities(team.id)
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.kind)
            .collect();
        assert_eq!(kinds, vec![ActivityKind::Create, ActivityKind::Star]);
    }

    #[tokio::test]
    async fn locks_refuse_writes() {
        let h = harness(StaticFetcher::new());
        let mut locked = event();
        locked.lock_starting = true;
        locked.lock_editing = true;
        locked.lock_resources = true;

        assert!(matches!(
            h.sync.create(&locked, Project::new("x"), None, at(2, 12)).await,
            Err(SyncError::Locked("starting"))
        ));

        let (project, _) = h
            .sync
            .create(&event(), Project::new("x"), None, at(2, 12))
            .await
            .unwrap();
        assert!(matches!(
            h.sync.edit(&locked, project.id, None, |p| p.name = "y".into()).await,
            Err(SyncError::Locked("editing"))
        ));
        assert!(matches!(
            h.sync.post(&locked, project.id, None, "note", None).await,
            Err(SyncError::Locked("resources"))
        ));
        assert!(matches!(
            h.sync.autoupdate(&locked, project.id).await,
            Err(SyncError::Locked("editing"))
        ));
        assert_eq!(h.sync.project(project.id).await.unwrap().name, "x");
    }

    #[tokio::test]
    async fn first_sync_logs_bytes_and_keeps_longtext() {
        let text = "Solar kiosk build log\n\nDay one: panels mounted.";
        let h = harness(pad_fetcher(text));
        let mut project = Project::new("Kiosk");
        project.autotext_url = PAD.into();
        project.longtext = "Our own words".into();

        let (project, report) = h.sync.create(&event(), project, None, at(2, 12)).await.unwrap();
        assert_eq!(
            report,
            Some(SyncReport::Synced {
                source: SourceKind::Etherpad,
                bytes: text.len(),
                changed: true,
            })
        );
        assert_eq!(project.autotext, text);
        assert_eq!(project.longtext, "Our own words");
        assert_eq!(project.name, "Kiosk");

        let stored = h.sync.project(project.id).await.unwrap();
        assert_eq!(stored, project);
        let sync_notes: Vec<_> = h
            .sync
            .activity_log()
            .activities(project.id)
            .await
            .unwrap()
            .into_iter()
            .filter(|a| a.action == "sync")
            .map(|a| a.content)
            .collect();
        assert_eq!(sync_notes, vec![format!("{} bytes", text.len())]);

        let again = h.sync.autoupdate(&event(), project.id).await.unwrap();
        assert_eq!(
            again,
            SyncReport::Synced {
                source: SourceKind::Etherpad,
                bytes: text.len(),
                changed: false,
            }
        );
        let syncs = h
            .sync
            .activity_log()
            .activities(project.id)
            .await
            .unwrap()
            .into_iter()
            .filter(|a| a.action == "sync")
            .count();
        assert_eq!(syncs, 1);
    }

    #[tokio::test]
    async fn unreachable_source_reports_no_data() {
        let h = harness(StaticFetcher::new());
        let mut project = Project::new("Kiosk");
        project.autotext_url = "https://example.org/nothing".into();
        project.autotext = "kept from last time".into();
        let (project, report) = h.sync.create(&event(), project, None, at(2, 12)).await.unwrap();
        assert_eq!(report, Some(SyncReport::NoData));
        assert_eq!(project.autotext, "kept from last time");
    }

    #[tokio::test]
    async fn autoupdate_needs_a_visible_linked_project() {
        let h = harness(StaticFetcher::new());
        let (plain, _) = h.sync.create(&event(), Project::new("x"), None, at(2, 12)).await.unwrap();
        assert!(matches!(
            h.sync.autoupdate(&event(), plain.id).await,
            Err(SyncError::NotAutoupdateable)
        ));

        let mut hidden = Project::new("y");
        hidden.autotext_url = PAD.into();
        hidden.is_hidden = true;
        let (hidden, report) = h.sync.create(&event(), hidden, None, at(2, 12)).await.unwrap();
        assert_eq!(report, None);
        assert!(matches!(
            h.sync.autoupdate(&event(), hidden.id).await,
            Err(SyncError::Hidden)
        ));
        assert!(h.http.requests().is_empty());
        assert!(matches!(
            h.sync.autoupdate(&event(), Uuid::new_v4()).await,
            Err(SyncError::ProjectNotFound(_))
        ));
    }

    #[tokio::test]
    async fn writes_clear_the_render_cache_and_rescore() {
        let h = harness(StaticFetcher::new());
        let (project, _) = h
            .sync
            .create(&event(), Project::new("Kiosk"), None, at(2, 12))
            .await
            .unwrap();
        let base = project.score;

        h.cache.set("https://data.example.org/datapackage.json", "<div/>".into());
        let (project, _) = h
            .sync
            .post(&event(), project.id, None, "Wired the inverter", None)
            .await
            .unwrap();
        assert!(h.cache.is_empty());
        assert_eq!(project.score, base + 1);

        h.cache.set("k", "v".into());
        h.sync.boost(project.id, None, "Jury pick", "Great demo").await.unwrap();
        assert!(h.cache.is_empty());
    }

    #[tokio::test]
    async fn star_requires_an_active_user_and_is_idempotent() {
        let h = harness(StaticFetcher::new());
        let (project, _) = h
            .sync
            .create(&event(), Project::new("Kiosk"), None, at(2, 12))
            .await
            .unwrap();
        let grace = User::new("grace");
        let mut gone = User::new("gone");
        gone.active = false;
        h.store.insert_user(grace.clone()).await;
        h.store.insert_user(gone.clone()).await;

        assert!(h.sync.star(project.id, grace.id).await.unwrap().is_some());
        assert!(h.sync.star(project.id, grace.id).await.unwrap().is_none());
        assert!(matches!(
            h.sync.star(project.id, gone.id).await,
            Err(SyncError::InactiveUser(_))
        ));
        assert!(matches!(
            h.sync.star(project.id, Uuid::new_v4()).await,
            Err(SyncError::UserNotFound(_))
        ));

        assert_eq!(h.sync.unstar(project.id, grace.id).await.unwrap(), 1);
        assert!(h.sync.team(project.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn removed_posts_leave_the_timeline() {
        let h = harness(StaticFetcher::new());
        let (project, _) = h
            .sync
            .create(&event(), Project::new("Kiosk"), None, at(2, 12))
            .await
            .unwrap();
        let comment = h.sync.comment(project.id, None, "spam").await.unwrap();

        h.sync.remove_post(comment.id).await.unwrap();
        let timeline = h.sync.timeline(project.id, None, at(2, 13)).await.unwrap();
        assert!(timeline.iter().all(|e| e.text != "spam"));
        assert!(matches!(
            h.sync.remove_post(Uuid::new_v4()).await,
            Err(SyncError::ActivityNotFound(_))
        ));
    }

    #[tokio::test]
    async fn commits_are_logged_once() {
        let h = harness(StaticFetcher::new());
        let (project, _) = h
            .sync
            .create(&event(), Project::new("Kiosk"), None, at(2, 12))
            .await
            .unwrap();
        let mut record = NormalizedRecord::new(SourceKind::GitHub, "kiosk", "readme");
        record.commits = vec![
            CommitSummary {
                id: "b2".into(),
                message: "Add inverter\n".into(),
                author: "ada".into(),
                url: "https://github.com/acme/kiosk/commit/b2".into(),
                timestamp: Some(at(2, 11)),
            },
            CommitSummary {
                id: "a1".into(),
                message: "Initial commit".into(),
                author: "ada".into(),
                url: "https://github.com/acme/kiosk/commit/a1".into(),
                timestamp: Some(at(2, 10)),
            },
        ];

        assert_eq!(h.sync.log_commits(&project, &record).await.unwrap(), 2);
        assert_eq!(h.sync.log_commits(&project, &record).await.unwrap(), 0);

        let commits: Vec<_> = h
            .sync
            .activity_log()
            .activities(project.id)
            .await
            .unwrap()
            .into_iter()
            .filter(|a| a.action == "commit")
            .map(|a| (a.content, a.timestamp))
            .collect();
        assert_eq!(
            commits,
            vec![
                ("Initial commit".to_string(), at(2, 10)),
                ("Add inverter".to_string(), at(2, 11)),
            ]
        );
    }
}
