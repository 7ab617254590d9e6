//! Applies a fetched record onto a persisted project.

use hacktrack_core::{clip_summary, NormalizedRecord, Project};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The record was empty; the project was left alone.
    NothingToSync,
    Unchanged,
    Updated { fields: Vec<&'static str> },
}

impl MergeOutcome {
    pub fn changed(&self) -> bool {
        matches!(self, MergeOutcome::Updated { .. })
    }
}

fn overwrite(field: &mut String, value: &str, name: &'static str, changed: &mut Vec<&'static str>) {
    let value = value.trim();
    if value.is_empty() || field == value {
        return;
    }
    *field = value.to_string();
    changed.push(name);
}

/// Copies remote content into `autotext` and remote metadata into the display fields.
///
/// Only non-empty remote values overwrite. `longtext` is never touched and `summary`
/// is only filled while it is blank. Does not call [`Project::update`].
pub fn sync_project_data(project: &mut Project, record: &NormalizedRecord) -> MergeOutcome {
    if record.is_empty() {
        return MergeOutcome::NothingToSync;
    }

    let mut fields = Vec::new();
    if project.autotext != record.description {
        project.autotext = record.description.clone();
        fields.push("autotext");
    }
    overwrite(&mut project.image_url, &record.image_url, "image_url", &mut fields);
    overwrite(&mut project.source_url, &record.source_url, "source_url", &mut fields);
    overwrite(&mut project.contact_url, &record.contact_url, "contact_url", &mut fields);
    if let Some(homepage) = &record.homepage_url {
        overwrite(&mut project.webpage_url, homepage, "webpage_url", &mut fields);
    }
    if let Some(download) = &record.download_url {
        overwrite(&mut project.download_url, download, "download_url", &mut fields);
    }
    if project.summary.trim().is_empty() {
        let source = if record.summary.trim().is_empty() {
            &record.name
        } else {
            &record.summary
        };
        overwrite(&mut project.summary, &clip_summary(source), "summary", &mut fields);
    }

    if fields.is_empty() {
        MergeOutcome::Unchanged
    } else {
        MergeOutcome::Updated { fields }
    }
}
