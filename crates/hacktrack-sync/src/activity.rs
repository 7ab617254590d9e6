//! Activity log writer, timeline reconstruction and revert lookup.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use hacktrack_core::{Activity, ActivityKind, Event, Project, ProjectSnapshot, User};
use hacktrack_storage::{ActivityFilter, ActivityStore, ProjectStore, UserStore};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::SyncError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RevertError {
    #[error("Could not revert: data not available.")]
    VersionUnavailable,
    #[error("Could not revert: this is the earliest version.")]
    EarliestVersion,
    #[error("Could not revert: data for version {0} is not available.")]
    SnapshotMissing(u32),
}

/// One row of the rendered project timeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimelineEntry {
    pub title: String,
    pub text: String,
    pub author: Option<String>,
    /// Activity kind, or `start`/`finish` for the synthetic event rows.
    pub name: String,
    pub icon: &'static str,
    pub date: DateTime<Utc>,
    pub ref_url: String,
    /// `None` for synthetic rows.
    pub activity_id: Option<Uuid>,
}

fn title_and_icon(activity: &Activity) -> (String, &'static str) {
    match activity.kind {
        ActivityKind::Create => ("Created".into(), "flag"),
        ActivityKind::Star => ("Joined the team".into(), "user-plus"),
        ActivityKind::Update => match activity.action.as_str() {
            "commit" => ("Code commit".into(), "code"),
            "sync" => ("Synchronized".into(), "refresh"),
            "post" => ("Progress".into(), "comment"),
            _ => ("Edited".into(), "pencil"),
        },
        ActivityKind::Review => ("Comment".into(), "comments"),
        ActivityKind::Boost if activity.action.trim().is_empty() => ("Boost".into(), "trophy"),
        ActivityKind::Boost => (activity.action.trim().to_string(), "trophy"),
    }
}

/// Builds the display timeline from a project's activities, newest first.
///
/// Adjacent entries with the same title and text are collapsed. Event boundaries that
/// have passed at `now` are appended as synthetic rows before the final sort.
pub fn build_timeline(
    mut activities: Vec<Activity>,
    users: &HashMap<Uuid, User>,
    event: Option<&Event>,
    now: DateTime<Utc>,
) -> Vec<TimelineEntry> {
    activities.retain(|a| !a.removed);
    activities.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

    let mut entries: Vec<TimelineEntry> = Vec::with_capacity(activities.len() + 2);
    for activity in activities {
        let (title, icon) = title_and_icon(&activity);
        let text = activity.content.trim().to_string();
        if let Some(prev) = entries.last() {
            if prev.title == title && prev.text == text {
                continue;
            }
        }
        entries.push(TimelineEntry {
            title,
            text,
            author: activity
                .user_id
                .and_then(|id| users.get(&id))
                .map(|u| u.username.clone()),
            name: activity.kind.as_str().to_string(),
            icon,
            date: activity.timestamp,
            ref_url: activity.ref_url,
            activity_id: Some(activity.id),
        });
    }

    if let Some(event) = event {
        if event.has_started(now) || event.has_finished(now) {
            entries.push(synthetic("Event started", "calendar", "start", event.starts_at));
        }
        if event.has_finished(now) {
            entries.push(synthetic("Event finished", "bullhorn", "finish", event.ends_at));
        }
    }
    entries.sort_by(|a, b| b.date.cmp(&a.date));
    entries
}

fn synthetic(title: &str, icon: &'static str, name: &str, date: DateTime<Utc>) -> TimelineEntry {
    TimelineEntry {
        title: title.to_string(),
        text: String::new(),
        author: None,
        name: name.to_string(),
        icon,
        date,
        ref_url: String::new(),
        activity_id: None,
    }
}

/// Checks that `activity` carries a version that can be restored.
pub fn revertible_version(activity: &Activity) -> Result<u32, RevertError> {
    match activity.project_version {
        Some(0) => Err(RevertError::EarliestVersion),
        Some(version) => Ok(version),
        None => Err(RevertError::VersionUnavailable),
    }
}

/// Append-only writer and reader over the activity store.
pub struct ActivityLog<S> {
    store: Arc<S>,
}

impl<S> Clone for ActivityLog<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S> ActivityLog<S>
where
    S: ProjectStore + ActivityStore + UserStore,
{
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Writes one row, snapshotting the project's progress, score and latest saved version.
    pub async fn record(
        &self,
        project: &Project,
        kind: ActivityKind,
        actor: Option<Uuid>,
        action: &str,
        note: &str,
    ) -> Result<Activity, SyncError> {
        let activity = Activity::new(kind, project, actor)
            .with_action(action)
            .with_content(note);
        self.append(project, activity).await
    }

    /// Writes a prepared row, filling in the latest saved version.
    pub async fn append(
        &self,
        project: &Project,
        activity: Activity,
    ) -> Result<Activity, SyncError> {
        let version = self.store.latest_version(project.id).await?;
        let activity = activity.with_version(version);
        debug!(project = %project.id, kind = %activity.kind, action = %activity.action, "activity");
        self.store.append_activity(activity.clone()).await?;
        Ok(activity)
    }

    pub async fn activities(&self, project_id: Uuid) -> Result<Vec<Activity>, SyncError> {
        Ok(self
            .store
            .activities(&ActivityFilter::for_project(project_id))
            .await?)
    }

    pub async fn timeline(
        &self,
        project_id: Uuid,
        event: Option<&Event>,
        now: DateTime<Utc>,
    ) -> Result<Vec<TimelineEntry>, SyncError> {
        let activities = self.activities(project_id).await?;
        let mut users = HashMap::new();
        for id in activities.iter().filter_map(|a| a.user_id) {
            if users.contains_key(&id) {
                continue;
            }
            if let Some(user) = self.store.user(id).await? {
                users.insert(id, user);
            }
        }
        Ok(build_timeline(activities, &users, event, now))
    }

    /// Active users holding a star on the project, in the order they joined.
    pub async fn team(&self, project_id: Uuid) -> Result<Vec<User>, SyncError> {
        let stars = self
            .store
            .activities(&ActivityFilter::for_project(project_id).kind(ActivityKind::Star))
            .await?;
        let mut seen = HashSet::new();
        let mut team = Vec::new();
        for user_id in stars.iter().filter_map(|a| a.user_id) {
            if !seen.insert(user_id) {
                continue;
            }
            match self.store.user(user_id).await? {
                Some(user) if user.active => team.push(user),
                _ => {}
            }
        }
        Ok(team)
    }

    pub async fn is_member(&self, project_id: Uuid, user_id: Uuid) -> Result<bool, SyncError> {
        let filter = ActivityFilter::for_project(project_id)
            .kind(ActivityKind::Star)
            .user(user_id);
        Ok(self.store.count_activities(&filter).await? > 0)
    }

    /// Soft-removes one row. Returns false when it does not exist.
    pub async fn remove(&self, activity_id: Uuid) -> Result<bool, SyncError> {
        Ok(self.store.set_removed(activity_id, true).await?)
    }

    /// Soft-removes every star `user_id` holds on the project; returns how many.
    pub async fn unstar(&self, project_id: Uuid, user_id: Uuid) -> Result<usize, SyncError> {
        let filter = ActivityFilter::for_project(project_id)
            .kind(ActivityKind::Star)
            .user(user_id);
        let mut removed = 0;
        for star in self.store.activities(&filter).await? {
            if self.store.set_removed(star.id, true).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    pub async fn activity(&self, activity_id: Uuid) -> Result<Activity, SyncError> {
        self.store
            .activity(activity_id)
            .await?
            .ok_or(SyncError::ActivityNotFound(activity_id))
    }

    /// Looks up the saved snapshot an activity points at.
    pub async fn revert_target(
        &self,
        activity: &Activity,
    ) -> Result<(u32, ProjectSnapshot), SyncError> {
        let version = revertible_version(activity)?;
        let snapshot = self
            .store
            .project_version(activity.project_id, version)
            .await?
            .ok_or(RevertError::SnapshotMissing(version))?;
        Ok((version, snapshot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use hacktrack_storage::MemoryStore;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 2, hour, 0, 0).single().unwrap()
    }

    fn mk_activity(
        project: &Project,
        kind: ActivityKind,
        action: &str,
        text: &str,
        hour: u32,
    ) -> Activity {
        Activity::new(kind, project, None)
            .with_action(action)
            .with_content(text)
            .with_timestamp(at(hour))
    }

    #[test]
    fn adjacent_duplicates_collapse_but_distant_ones_do_not() {
        let project = Project::new("Widget");
        let activities = vec![
            mk_activity(&project, ActivityKind::Update, "post", "Soldered the board", 9),
            mk_activity(&project, ActivityKind::Update, "post", "Soldered the board", 10),
            mk_activity(&project, ActivityKind::Review, "post", "Nice!", 11),
            mk_activity(&project, ActivityKind::Update, "post", "Soldered the board", 12),
        ];
        let timeline = build_timeline(activities, &HashMap::new(), None, at(13));

        let titles: Vec<_> = timeline.iter().map(|e| e.title.as_str()).collect();
        assert_eq!(titles, vec!["Progress", "Comment", "Progress"]);
        assert_eq!(timeline[0].date, at(12));
        assert_eq!(timeline[2].date, at(10));
    }

    #[test]
    fn event_boundaries_are_added_once_passed() {
        let project = Project::new("Widget");
        let event = Event::new("Hack Days", at(8), at(20));
        let activities = vec![mk_activity(&project, ActivityKind::Create, "", "", 9)];

        let during = build_timeline(activities.clone(), &HashMap::new(), Some(&event), at(12));
        let names: Vec<_> = during.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["create", "start"]);

        let after = build_timeline(
            activities.clone(),
            &HashMap::new(),
            Some(&event),
            at(20) + Duration::hours(1),
        );
        let names: Vec<_> = after.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["finish", "create", "start"]);
        assert_eq!(after[0].title, "Event finished");
        assert_eq!(after[0].activity_id, None);

        let before = build_timeline(activities, &HashMap::new(), Some(&event), at(7));
        assert_eq!(before.len(), 1);
    }

    #[test]
    fn titles_follow_kind_and_action() {
        let project = Project::new("Widget");
        let cases = [
            (ActivityKind::Star, "", "Joined the team"),
            (ActivityKind::Update, "commit", "Code commit"),
            (ActivityKind::Update, "sync", "Synchronized"),
            (ActivityKind::Update, "", "Edited"),
            (ActivityKind::Boost, "Top pick", "Top pick"),
            (ActivityKind::Boost, "", "Boost"),
        ];
        for (kind, action, title) in cases {
            assert_eq!(title_and_icon(&mk_activity(&project, kind, action, "", 9)).0, title);
        }
    }

    #[test]
    fn authors_and_removed_rows() {
        let project = Project::new("Widget");
        let ada = User::new("ada");
        let mut hidden = mk_activity(&project, ActivityKind::Review, "post", "spam", 10);
        hidden.removed = true;
        let mut signed = mk_activity(&project, ActivityKind::Review, "post", "Looks great", 9);
        signed.user_id = Some(ada.id);

        let users = HashMap::from([(ada.id, ada.clone())]);
        let timeline = build_timeline(vec![hidden, signed], &users, None, at(12));
        assert_eq!(timeline.len(), 1);
        assert_eq!(timeline[0].author.as_deref(), Some("ada"));
    }

    #[test]
    fn version_zero_and_missing_versions_are_not_revertible() {
        let project = Project::new("Widget");
        let activity = Activity::new(ActivityKind::Update, &project, None);
        assert_eq!(revertible_version(&activity), Err(RevertError::VersionUnavailable));
        assert_eq!(
            revertible_version(&activity.clone().with_version(Some(0))),
            Err(RevertError::EarliestVersion)
        );
        assert_eq!(revertible_version(&activity.with_version(Some(3))), Ok(3));
    }

    #[tokio::test]
    async fn team_lists_active_starred_users_once() {
        let store = Arc::new(MemoryStore::new());
        let log = ActivityLog::new(Arc::clone(&store));
        let project = Project::new("Widget");
        let ada = User::new("ada");
        let mut grace = User::new("grace");
        grace.active = false;
        let alan = User::new("alan");
        for user in [&ada, &grace, &alan] {
            store.insert_user(user.clone()).await;
        }

        for user in [&ada, &grace, &ada, &alan] {
            log.record(&project, ActivityKind::Star, Some(user.id), "", "").await.unwrap();
        }
        let names: Vec<_> = log
            .team(project.id)
            .await
            .unwrap()
            .into_iter()
            .map(|u| u.username)
            .collect();
        assert_eq!(names, vec!["ada", "alan"]);

        assert_eq!(log.unstar(project.id, ada.id).await.unwrap(), 2);
        assert!(!log.is_member(project.id, ada.id).await.unwrap());
        let names: Vec<_> = log
            .team(project.id)
            .await
            .unwrap()
            .into_iter()
            .map(|u| u.username)
            .collect();
        assert_eq!(names, vec!["alan"]);
    }

    #[tokio::test]
    async fn rows_carry_the_latest_saved_version() {
        let store = Arc::new(MemoryStore::new());
        let log = ActivityLog::new(Arc::clone(&store));
        let project = Project::new("Widget");

        let before = log.record(&project, ActivityKind::Create, None, "", "").await.unwrap();
        assert_eq!(before.project_version, None);

        store.save_project(&project).await.unwrap();
        store.save_project(&project).await.unwrap();
        let after = log.record(&project, ActivityKind::Update, None, "post", "hi").await.unwrap();
        assert_eq!(after.project_version, Some(1));

        let stored = log.activity(after.id).await.unwrap();
        let (version, snapshot) = log.revert_target(&stored).await.unwrap();
        assert_eq!(version, 1);
        assert_eq!(snapshot.name, "Widget");
        assert!(matches!(
            log.revert_target(&before).await,
            Err(SyncError::Revert(RevertError::VersionUnavailable))
        ));
        assert!(matches!(
            log.activity(Uuid::new_v4()).await,
            Err(SyncError::ActivityNotFound(_))
        ));
    }
}
