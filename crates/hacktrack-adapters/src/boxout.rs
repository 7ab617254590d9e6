//! Embed boxes for Data Package links found in project text.

use std::sync::LazyLock;

use askama::Template;
use hacktrack_storage::{Fetch, RenderCache};
use regex::Regex;
use tracing::{debug, info, warn};

use crate::datapackage::DataPackage;
use crate::get_json;

static DATAPACKAGE_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^.*(https?://.+datapackage\.json)\)*").expect("static regex")
});

struct ResourceView {
    name: String,
    path: String,
    field_types: Vec<String>,
}

struct LinkView {
    name: String,
    path: String,
}

struct LicenseView {
    path: String,
    title: String,
}

#[derive(Template)]
#[template(path = "datapackage_box.html")]
struct DataPackageBox {
    url: String,
    homepage: String,
    title: String,
    description: String,
    resources: Vec<ResourceView>,
    sources: Vec<LinkView>,
    licenses: Vec<LicenseView>,
    created: String,
    version: String,
}

impl DataPackageBox {
    fn new(url: &str, package: &DataPackage) -> Self {
        let or_empty = |value: &Option<String>| value.clone().unwrap_or_default();
        Self {
            url: url.to_string(),
            homepage: or_empty(&package.homepage),
            title: package
                .title
                .clone()
                .or_else(|| package.name.clone())
                .unwrap_or_default(),
            description: or_empty(&package.description),
            resources: package
                .resources
                .iter()
                .map(|r| ResourceView {
                    name: or_empty(&r.name),
                    path: r.path.as_ref().map(|p| p.first().to_string()).unwrap_or_default(),
                    field_types: r
                        .schema
                        .iter()
                        .flat_map(|s| s.fields.iter())
                        .map(|f| f.kind.clone().unwrap_or_else(|| "any".to_string()))
                        .collect(),
                })
                .collect(),
            sources: package
                .sources
                .iter()
                .map(|s| LinkView {
                    name: s.title.clone().or_else(|| s.name.clone()).unwrap_or_default(),
                    path: or_empty(&s.path),
                })
                .collect(),
            licenses: package
                .licenses
                .iter()
                .map(|l| LicenseView {
                    path: or_empty(&l.path),
                    title: l.title.clone().or_else(|| l.name.clone()).unwrap_or_default(),
                })
                .collect(),
            created: or_empty(&package.created),
            version: or_empty(&package.version),
        }
    }
}

/// True for a line that is a descriptor URL or ends in a Markdown link to one.
pub fn chk_datapackage(line: &str) -> bool {
    let line = line.trim();
    (line.starts_with("http") && line.ends_with("datapackage.json"))
        || line.ends_with("datapackage.json)")
}

pub fn datapackage_url(line: &str) -> Option<String> {
    DATAPACKAGE_LINE
        .captures(line.trim())
        .map(|caps| caps[1].to_string())
}

pub fn render_datapackage_box(url: &str, package: &DataPackage) -> Result<String, askama::Error> {
    DataPackageBox::new(url, package).render()
}

/// Renders the embed box for `line`, reading through `cache` keyed by descriptor URL.
///
/// Returns `None` when the line does not end in a descriptor URL or the descriptor
/// cannot be loaded.
pub async fn box_datapackage(
    line: &str,
    http: &dyn Fetch,
    cache: Option<&dyn RenderCache>,
) -> Option<String> {
    if !chk_datapackage(line) {
        return None;
    }
    let url = datapackage_url(line)?;
    if let Some(hit) = cache.and_then(|c| c.get(&url)) {
        debug!(url = %url, "data package box from cache");
        return Some(hit);
    }

    info!(url = %url, "fetching data package");
    let package: DataPackage = match get_json(http, &url).await {
        Ok(package) => package,
        Err(err) => {
            warn!(url = %url, error = %err, "data package not parsed");
            return None;
        }
    };
    let html = match render_datapackage_box(&url, &package) {
        Ok(html) => html,
        Err(err) => {
            warn!(url = %url, error = %err, "data package box failed to render");
            return None;
        }
    };
    if let Some(cache) = cache {
        cache.set(&url, html.clone());
        debug!(url = %url, "cached data package box");
    }
    Some(html)
}
