//! Source adapter contracts, the content sanitizer and the fetch dispatcher.

mod boxout;
mod datapackage;
mod dispatch;
mod forge;
mod sanitize;
mod web;

use async_trait::async_trait;
use hacktrack_core::{NormalizedRecord, SourceKind};
use hacktrack_storage::{Fetch, FetchError};
use scraper::{Html, Selector};
use serde::de::DeserializeOwned;
use thiserror::Error;

pub use boxout::{box_datapackage, chk_datapackage, datapackage_url, render_datapackage_box};
pub use datapackage::{
    DataContributor, DataField, DataLicense, DataPackage, DataPackageAdapter, DataPath,
    DataResource, DataSchema, DataSource,
};
pub use dispatch::Dispatcher;
pub use forge::{absolutize_readme_images, ForgeAdapter, ForgeHost, ForgeKind};
pub use sanitize::{sanitize_html, sanitize_html_with_root, ALLOWED_TAGS};
pub use web::{
    render_markdown, CodiMdAdapter, DokuWikiAdapter, EtherpadAdapter, GoogleDocAdapter,
    InstructablesAdapter,
};

pub const CRATE_NAME: &str = "hacktrack-adapters";

/// Page body fetched once by the dispatcher and handed to content-signature adapters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedPage {
    /// The reference as requested, before redirects.
    pub url: String,
    pub html: String,
}

impl FetchedPage {
    pub fn new(url: impl Into<String>, html: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            html: html.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterContext {
    /// Base URL placeholder icons are served from.
    pub static_base_url: String,
}

impl Default for AdapterContext {
    fn default() -> Self {
        Self::new("/static")
    }
}

impl AdapterContext {
    pub fn new(static_base_url: impl Into<String>) -> Self {
        Self {
            static_base_url: static_base_url.into(),
        }
    }

    pub fn static_image(&self, file_name: &str) -> String {
        format!(
            "{}/img/{}",
            self.static_base_url.trim_end_matches('/'),
            file_name
        )
    }
}

/// What an adapter gets to look at when deciding whether it applies.
#[derive(Debug, Clone, Copy)]
pub enum Probe<'a> {
    /// The raw reference URL, before any request.
    Reference(&'a str),
    /// The reference after the single exploratory fetch.
    Page(&'a FetchedPage),
}

impl<'a> Probe<'a> {
    pub fn url(&self) -> &'a str {
        match *self {
            Probe::Reference(url) => url,
            Probe::Page(page) => &page.url,
        }
    }

    pub fn page(&self) -> Option<&'a FetchedPage> {
        match *self {
            Probe::Reference(_) => None,
            Probe::Page(page) => Some(page),
        }
    }
}

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("no project data at {0}")]
    NotFound(String),
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("network failure: {0}")]
    Network(FetchError),
    #[error("content rejected: {0}")]
    Rejected(String),
    #[error("invalid selector: {0}")]
    Selector(String),
}

impl AdapterError {
    pub fn is_network(&self) -> bool {
        matches!(self, AdapterError::Network(_))
    }
}

impl From<FetchError> for AdapterError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::HttpStatus { status, url } => {
                AdapterError::NotFound(format!("{url} (http {status})"))
            }
            other => AdapterError::Network(other),
        }
    }
}

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn kind(&self) -> SourceKind;

    fn detect(&self, probe: &Probe<'_>) -> bool;

    async fn fetch(
        &self,
        http: &dyn Fetch,
        ctx: &AdapterContext,
        probe: &Probe<'_>,
    ) -> Result<NormalizedRecord, AdapterError>;
}

/// Enforces the record invariant: name and description present, or no record at all.
pub(crate) fn finish(record: NormalizedRecord) -> Result<NormalizedRecord, AdapterError> {
    if record.name.trim().is_empty() {
        return Err(AdapterError::Malformed(format!(
            "{} record without a name at {}",
            record.kind, record.source_url
        )));
    }
    if record.description.trim().is_empty() {
        return Err(AdapterError::Rejected(format!(
            "{} record without a description at {}",
            record.kind, record.source_url
        )));
    }
    Ok(record)
}

pub(crate) fn text_or_none(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

pub(crate) fn non_empty(value: Option<String>) -> Option<String> {
    value.and_then(|v| text_or_none(&v))
}

pub(crate) fn selector(css: &str) -> Result<Selector, AdapterError> {
    Selector::parse(css).map_err(|e| AdapterError::Selector(e.to_string()))
}

pub(crate) fn select_first_text(
    document: &Html,
    css: &str,
) -> Result<Option<String>, AdapterError> {
    let sel = selector(css)?;
    Ok(document
        .select(&sel)
        .next()
        .and_then(|n| text_or_none(&n.text().collect::<String>())))
}

pub(crate) fn select_first_html(
    document: &Html,
    css: &str,
) -> Result<Option<String>, AdapterError> {
    let sel = selector(css)?;
    Ok(document
        .select(&sel)
        .next()
        .and_then(|n| text_or_none(&n.inner_html())))
}

pub(crate) fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
    out
}

pub(crate) async fn get_text(http: &dyn Fetch, url: &str) -> Result<String, AdapterError> {
    Ok(http.get(url).await?.text())
}

pub(crate) async fn get_json<T: DeserializeOwned>(
    http: &dyn Fetch,
    url: &str,
) -> Result<T, AdapterError> {
    let body = get_text(http, url).await?;
    if !body.contains('{') {
        return Err(AdapterError::Malformed(format!("no JSON object at {url}")));
    }
    serde_json::from_str(&body).map_err(|e| AdapterError::Malformed(format!("{url}: {e}")))
}

#[cfg(test)]
pub(crate) mod testutil {
    use std::fs;
    use std::path::PathBuf;

    pub fn fixtures_root() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../fixtures")
    }

    pub fn fixture(rel: &str) -> String {
        let path = fixtures_root().join(rel);
        fs::read_to_string(&path).unwrap_or_else(|e| panic!("reading {}: {e}", path.display()))
    }
}
