//! Frictionless Data Package descriptors as project sources.

use async_trait::async_trait;
use hacktrack_core::{NormalizedRecord, SourceKind};
use hacktrack_storage::Fetch;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    finish, get_json, get_text, non_empty, AdapterContext, AdapterError, Probe, SourceAdapter,
};

const DESCRIPTOR_FILE: &str = "datapackage.json";

/// `path` may be a single location or a list of chunks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DataPath {
    One(String),
    Many(Vec<String>),
}

impl DataPath {
    pub fn first(&self) -> &str {
        match self {
            DataPath::One(path) => path,
            DataPath::Many(paths) => paths.first().map(String::as_str).unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataField {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSchema {
    #[serde(default)]
    pub fields: Vec<DataField>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataResource {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub path: Option<DataPath>,
    #[serde(default)]
    pub schema: Option<DataSchema>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSource {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataLicense {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataContributor {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub web: Option<String>,
}

/// The subset of a `datapackage.json` descriptor used for projects and embed boxes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataPackage {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub homepage: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub created: Option<String>,
    #[serde(default)]
    pub resources: Vec<DataResource>,
    #[serde(default)]
    pub sources: Vec<DataSource>,
    #[serde(default)]
    pub licenses: Vec<DataLicense>,
    #[serde(default)]
    pub maintainers: Vec<DataContributor>,
}

impl DataPackage {
    pub fn maintainer_web(&self) -> Option<String> {
        self.maintainers.first().and_then(|m| non_empty(m.web.clone()))
    }

    /// Where the long description lives: the homepage, else a README next to the descriptor.
    pub fn readme_url(&self, descriptor_url: &str) -> String {
        self.homepage
            .clone()
            .unwrap_or_else(|| descriptor_url.replace(DESCRIPTOR_FILE, "README.md"))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DataPackageAdapter;

#[async_trait]
impl SourceAdapter for DataPackageAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::DataPackage
    }

    fn detect(&self, probe: &Probe<'_>) -> bool {
        match probe {
            Probe::Reference(url) => {
                let url = url.trim();
                url.starts_with("http") && url.ends_with(DESCRIPTOR_FILE)
            }
            Probe::Page(_) => false,
        }
    }

    async fn fetch(
        &self,
        http: &dyn Fetch,
        ctx: &AdapterContext,
        probe: &Probe<'_>,
    ) -> Result<NormalizedRecord, AdapterError> {
        let url = probe.url().trim();
        let package: DataPackage = get_json(http, url).await?;
        let (Some(name), Some(title)) = (
            non_empty(package.name.clone()),
            non_empty(package.title.clone()),
        ) else {
            return Err(AdapterError::Malformed(format!("{url}: missing name or title")));
        };

        let mut text = format!("{url}\n\n");
        let readme_url = package.readme_url(url);
        let mut appended = false;
        if readme_url.starts_with("http") && readme_url != url {
            match get_text(http, &readme_url).await {
                Ok(readme) => {
                    appended = !readme.trim().is_empty();
                    text.push_str(&readme);
                }
                Err(err) if err.is_network() => return Err(err),
                Err(err) => {
                    debug!(url = %readme_url, error = %err, "data package readme unavailable")
                }
            }
        }
        if !appended {
            if let Some(description) = non_empty(package.description.clone()) {
                text.push_str(&description);
            }
        }

        let mut record = NormalizedRecord::new(SourceKind::DataPackage, name, text);
        record.summary = title;
        record.source_url = url.to_string();
        record.image_url = ctx.static_image("datapackage_icon.png");
        record.contact_url = package.maintainer_web().unwrap_or_default();
        finish(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::fixture;
    use hacktrack_storage::StaticFetcher;

    const URL: &str = "https://data.example.org/bikes/datapackage.json";

    #[tokio::test]
    async fn descriptor_text_is_url_plus_sibling_readme() {
        let http = StaticFetcher::new()
            .with_body(URL, fixture("datapackage/datapackage.json"))
            .with_body(
                "https://data.example.org/bikes/README.md",
                fixture("datapackage/README.md"),
            );
        let record = DataPackageAdapter
            .fetch(&http, &AdapterContext::default(), &Probe::Reference(URL))
            .await
            .unwrap();

        assert_eq!(record.kind, SourceKind::DataPackage);
        assert_eq!(record.name, "bike-counters");
        assert_eq!(record.summary, "Bike Counters");
        assert!(record.description.starts_with(&format!("{URL}\n\n# Bike counters")));
        assert_eq!(record.contact_url, "https://example.org/~mia");
        assert_eq!(record.image_url, "/static/img/datapackage_icon.png");
        assert_eq!(record.source_url, URL);
    }

    #[tokio::test]
    async fn missing_readme_falls_back_to_description() {
        let http = StaticFetcher::new().with_body(URL, fixture("datapackage/datapackage.json"));
        let record = DataPackageAdapter
            .fetch(&http, &AdapterContext::default(), &Probe::Reference(URL))
            .await
            .unwrap();
        assert!(record.description.ends_with("Hourly bicycle counts from city sensors."));
    }

    #[tokio::test]
    async fn unreachable_readme_is_surfaced_not_skipped() {
        let http = StaticFetcher::new()
            .with_body(URL, fixture("datapackage/datapackage.json"))
            .with_unreachable("https://data.example.org/bikes/README.md");
        let err = DataPackageAdapter
            .fetch(&http, &AdapterContext::default(), &Probe::Reference(URL))
            .await
            .unwrap_err();
        assert!(err.is_network(), "{err}");
    }

    #[tokio::test]
    async fn descriptor_without_title_is_malformed() {
        let http = StaticFetcher::new().with_body(URL, r#"{"name": "bike-counters"}"#);
        let err = DataPackageAdapter
            .fetch(&http, &AdapterContext::default(), &Probe::Reference(URL))
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::Malformed(_)));
    }

    #[test]
    fn resource_paths_accept_lists() {
        let value = serde_json::json!({"name": "a", "path": ["x.csv", "y.csv"]});
        let resource: DataResource = serde_json::from_value(value).unwrap();
        assert_eq!(resource.path.unwrap().first(), "x.csv");
    }

    #[test]
    fn detects_descriptor_urls_only() {
        assert!(DataPackageAdapter.detect(&Probe::Reference(URL)));
        assert!(!DataPackageAdapter.detect(&Probe::Reference("https://data.example.org/bikes/")));
    }
}
