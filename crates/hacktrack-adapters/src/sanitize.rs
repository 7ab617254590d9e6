//! Allow-list HTML sanitizer applied to fetched descriptions.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use ammonia::{Builder, UrlRelative};
use url::Url;

/// Tags that survive sanitizing; everything else is unwrapped to its text.
pub const ALLOWED_TAGS: &[&str] = &[
    "a", "abbr", "acronym", "b", "blockquote", "code", "em", "i", "li", "ol", "strong", "ul",
    "img", "font", "center", "sub", "sup", "pre", "h1", "h2", "h3", "h4", "h5", "p", "u",
];

const ALLOWED_ATTRIBUTES: &[(&str, &[&str])] = &[
    ("a", &["href", "title", "class", "name"]),
    ("abbr", &["title"]),
    ("acronym", &["title"]),
    ("h1", &["id"]),
    ("h2", &["id"]),
    ("h3", &["id"]),
    ("h4", &["id"]),
    ("h5", &["id"]),
    ("img", &["src", "width", "height", "alt", "class"]),
    ("font", &["color"]),
];

fn policy<'a>() -> Builder<'a> {
    let tag_attributes: HashMap<&str, HashSet<&str>> = ALLOWED_ATTRIBUTES
        .iter()
        .map(|(tag, attrs)| (*tag, attrs.iter().copied().collect()))
        .collect();

    let mut builder = Builder::default();
    builder
        .tags(ALLOWED_TAGS.iter().copied().collect())
        .tag_attributes(tag_attributes)
        .generic_attributes(HashSet::new())
        .link_rel(None)
        .url_relative(UrlRelative::PassThrough);
    builder
}

static SANITIZER: LazyLock<Builder<'static>> = LazyLock::new(policy);

/// Strips every tag and attribute outside the allow-list, keeping text content.
///
/// `<script>` and `<style>` are dropped together with their content. Running the
/// output through again returns it unchanged. Output that is only whitespace
/// collapses to the empty string.
pub fn sanitize_html(html: &str) -> String {
    if html.trim().is_empty() {
        return String::new();
    }
    non_blank(SANITIZER.clean(html).to_string())
}

fn non_blank(clean: String) -> String {
    if clean.trim().is_empty() {
        String::new()
    } else {
        clean
    }
}

/// Like [`sanitize_html`], additionally resolving relative `href`/`src` against `root`.
///
/// An unparseable root leaves relative links as they are.
pub fn sanitize_html_with_root(html: &str, root: &str) -> String {
    if html.trim().is_empty() {
        return String::new();
    }
    let Ok(base) = Url::parse(root) else {
        return sanitize_html(html);
    };
    let mut builder = policy();
    builder.url_relative(UrlRelative::RewriteWithBase(base));
    non_blank(builder.clean(html).to_string())
}
