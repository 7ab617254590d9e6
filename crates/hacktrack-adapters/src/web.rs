//! Document, wiki, pad and tutorial adapters, selected by page content.

use async_trait::async_trait;
use hacktrack_core::{NormalizedRecord, SourceKind};
use hacktrack_storage::Fetch;
use pulldown_cmark::{html, Event, Options, Parser};
use scraper::{ElementRef, Html};
use tracing::debug;

use crate::sanitize::{sanitize_html, sanitize_html_with_root};
use crate::{
    escape_html, finish, get_text, select_first_html, select_first_text, selector, AdapterContext,
    AdapterError, FetchedPage, Probe, SourceAdapter,
};

const GOOGLE_DOC_PREFIX: &str = "https://docs.google.com/document";
const CODIMD_SIGNATURE: &str = r#"<div id="doc" "#;
const DOKUWIKI_SIGNATURE: &str = r#"<meta name="generator" content="DokuWiki"/>"#;
const ETHERPAD_SIGNATURE: &str = "pad.importExport.exportetherpad";
const INSTRUCTABLES_PREFIX: &str = "https://www.instructables.com/";

fn page_of<'a>(probe: &Probe<'a>) -> Result<&'a FetchedPage, AdapterError> {
    probe
        .page()
        .ok_or_else(|| AdapterError::NotFound(format!("{} was not fetched", probe.url())))
}

fn required(value: Option<String>, what: &str, url: &str) -> Result<String, AdapterError> {
    value.ok_or_else(|| AdapterError::Rejected(format!("no {what} at {url}")))
}

fn page_record(
    kind: SourceKind,
    page: &FetchedPage,
    name: String,
    description: String,
    image_url: String,
) -> Result<NormalizedRecord, AdapterError> {
    let mut record = NormalizedRecord::new(kind, name, description);
    record.source_url = page.url.clone();
    record.image_url = image_url;
    finish(record)
}

/// Markdown to HTML with raw HTML blocks emitted as escaped text.
pub fn render_markdown(text: &str) -> String {
    let options =
        Options::ENABLE_TABLES | Options::ENABLE_STRIKETHROUGH | Options::ENABLE_TASKLISTS;
    let parser = Parser::new_ext(text, options).map(|event| match event {
        Event::Html(raw) | Event::InlineHtml(raw) => Event::Text(raw),
        other => other,
    });
    let mut out = String::new();
    html::push_html(&mut out, parser);
    out
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GoogleDocAdapter;

fn parse_google_doc(
    page: &FetchedPage,
    ctx: &AdapterContext,
) -> Result<NormalizedRecord, AdapterError> {
    let document = Html::parse_document(&page.html);
    let title = match select_first_text(&document, "div#title")? {
        Some(title) => Some(title),
        None => select_first_text(&document, "div#header")?,
    };
    let title = required(title, "document title", &page.url)?;
    let content = select_first_html(&document, "div#contents")?;
    let content = required(content, "document body", &page.url)?;
    page_record(
        SourceKind::GoogleDocs,
        page,
        title,
        sanitize_html(&content),
        ctx.static_image("document_icon.png"),
    )
}

#[async_trait]
impl SourceAdapter for GoogleDocAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::GoogleDocs
    }

    fn detect(&self, probe: &Probe<'_>) -> bool {
        probe
            .page()
            .is_some_and(|page| page.url.starts_with(GOOGLE_DOC_PREFIX))
    }

    async fn fetch(
        &self,
        _http: &dyn Fetch,
        ctx: &AdapterContext,
        probe: &Probe<'_>,
    ) -> Result<NormalizedRecord, AdapterError> {
        parse_google_doc(page_of(probe)?, ctx)
    }
}

/// CodiMD / HackMD notes: the container holds the note's Markdown source.
#[derive(Debug, Clone, Copy, Default)]
pub struct CodiMdAdapter;

fn parse_codimd(
    page: &FetchedPage,
    ctx: &AdapterContext,
) -> Result<NormalizedRecord, AdapterError> {
    let document = Html::parse_document(&page.html);
    let title = required(select_first_text(&document, "title")?, "note title", &page.url)?;
    let doc_sel = selector("div#doc")?;
    let source = document
        .select(&doc_sel)
        .next()
        .map(|node| node.text().collect::<String>())
        .filter(|text| !text.trim().is_empty());
    let source = required(source, "note body", &page.url)?;
    page_record(
        SourceKind::Markdown,
        page,
        title,
        render_markdown(source.trim()),
        ctx.static_image("codimd.png"),
    )
}

#[async_trait]
impl SourceAdapter for CodiMdAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Markdown
    }

    fn detect(&self, probe: &Probe<'_>) -> bool {
        probe
            .page()
            .is_some_and(|page| page.html.contains(CODIMD_SIGNATURE))
    }

    async fn fetch(
        &self,
        _http: &dyn Fetch,
        ctx: &AdapterContext,
        probe: &Probe<'_>,
    ) -> Result<NormalizedRecord, AdapterError> {
        parse_codimd(page_of(probe)?, ctx)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DokuWikiAdapter;

fn parse_dokuwiki(
    page: &FetchedPage,
    ctx: &AdapterContext,
) -> Result<NormalizedRecord, AdapterError> {
    let document = Html::parse_document(&page.html);
    let title = required(select_first_text(&document, "span.pageId")?, "page id", &page.url)?;
    let content = select_first_html(&document, "div.dw-content")?;
    let content = required(content, "wiki content", &page.url)?;
    page_record(
        SourceKind::DokuWiki,
        page,
        title.replace("project:", ""),
        sanitize_html_with_root(&content, &page.url),
        ctx.static_image("dokuwiki_icon.png"),
    )
}

#[async_trait]
impl SourceAdapter for DokuWikiAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::DokuWiki
    }

    fn detect(&self, probe: &Probe<'_>) -> bool {
        probe
            .page()
            .is_some_and(|page| page.html.contains(DOKUWIKI_SIGNATURE))
    }

    async fn fetch(
        &self,
        _http: &dyn Fetch,
        ctx: &AdapterContext,
        probe: &Probe<'_>,
    ) -> Result<NormalizedRecord, AdapterError> {
        parse_dokuwiki(page_of(probe)?, ctx)
    }
}

/// Etherpad Lite pads. The page itself is a JS shell, so the text export is fetched instead.
#[derive(Debug, Clone, Copy, Default)]
pub struct EtherpadAdapter;

fn pad_name(url: &str) -> Option<String> {
    let last = url.trim_end_matches('/').rsplit('/').next()?;
    let last = last.split(['?', '#']).next().unwrap_or(last);
    if last.is_empty() {
        return None;
    }
    let decoded = urlencoding::decode(last)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| last.to_string());
    Some(decoded.replace('_', " "))
}

#[async_trait]
impl SourceAdapter for EtherpadAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Etherpad
    }

    fn detect(&self, probe: &Probe<'_>) -> bool {
        probe
            .page()
            .is_some_and(|page| page.html.contains(ETHERPAD_SIGNATURE))
    }

    async fn fetch(
        &self,
        http: &dyn Fetch,
        ctx: &AdapterContext,
        probe: &Probe<'_>,
    ) -> Result<NormalizedRecord, AdapterError> {
        let page = page_of(probe)?;
        let name = required(pad_name(&page.url), "pad name", &page.url)?;
        let export_url = format!("{}/export/txt", page.url.trim_end_matches('/'));
        debug!(url = %export_url, "fetching pad export");
        let text = get_text(http, &export_url).await?;
        page_record(
            SourceKind::Etherpad,
            page,
            name,
            text,
            ctx.static_image("document_white.png"),
        )
    }
}

/// Instructables tutorials, assembled step by step.
#[derive(Debug, Clone, Copy, Default)]
pub struct InstructablesAdapter;

fn render_step(step: ElementRef<'_>, out: &mut String) -> Result<(), AdapterError> {
    let title_sel = selector(".step-title")?;
    let noscript_sel = selector("noscript")?;
    let body_sel = selector(".step-body")?;

    if let Some(title) = step.select(&title_sel).next() {
        let title = title.text().collect::<String>();
        out.push_str(&format!("<h3>{}</h3>", escape_html(title.trim())));
    }

    // noscript bodies parse as raw text, so their markup is the text content
    for image in step.select(&noscript_sel) {
        let raw: String = image.text().collect();
        let markup = if raw.trim().is_empty() { image.inner_html() } else { raw };
        if markup.contains("{{ file") {
            continue;
        }
        out.push_str(&sanitize_html(&markup));
    }

    let Some(body) = step.select(&body_sel).next() else {
        return Ok(());
    };
    for child in body.children().filter_map(ElementRef::wrap) {
        let tag = child.value().name();
        let inner = child.inner_html();
        if inner.trim().is_empty() {
            continue;
        }
        let block = if matches!(tag, "pre" | "code") {
            format!("<pre>{}</pre>", inner)
        } else {
            format!("<{tag}>{}</{tag}>", inner.trim())
        };
        out.push_str(&sanitize_html(&block));
    }
    Ok(())
}

fn parse_instructables(
    page: &FetchedPage,
    ctx: &AdapterContext,
) -> Result<NormalizedRecord, AdapterError> {
    let document = Html::parse_document(&page.html);
    let title = select_first_text(&document, ".header-title")?;
    let title = required(title, "tutorial title", &page.url)?;
    let main_sel = selector(".main-content")?;
    let step_sel = selector(".step")?;
    let content = document
        .select(&main_sel)
        .next()
        .ok_or_else(|| AdapterError::Rejected(format!("no tutorial content at {}", page.url)))?;

    let mut description = String::new();
    for step in content.select(&step_sel) {
        render_step(step, &mut description)?;
    }
    page_record(
        SourceKind::Instructables,
        page,
        title,
        description,
        ctx.static_image("instructables.png"),
    )
}

#[async_trait]
impl SourceAdapter for InstructablesAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Instructables
    }

    fn detect(&self, probe: &Probe<'_>) -> bool {
        probe
            .page()
            .is_some_and(|page| page.url.starts_with(INSTRUCTABLES_PREFIX))
    }

    async fn fetch(
        &self,
        _http: &dyn Fetch,
        ctx: &AdapterContext,
        probe: &Probe<'_>,
    ) -> Result<NormalizedRecord, AdapterError> {
        parse_instructables(page_of(probe)?, ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::fixture;
    use hacktrack_storage::StaticFetcher;

    fn ctx() -> AdapterContext {
        AdapterContext::new("https://hack.example.org/static")
    }

    #[test]
    fn google_doc_title_and_sanitized_body() {
        let page = FetchedPage::new(
            "https://docs.google.com/document/d/abc123/pub",
            fixture("web/googledoc.html"),
        );
        let record = parse_google_doc(&page, &ctx()).unwrap();
        assert_eq!(record.kind, SourceKind::GoogleDocs);
        assert_eq!(record.name, "Team Rocket Plan");
        assert!(
            record.description.contains(r#"<h2 id="h.goals">Goals</h2>"#),
            "{}",
            record.description
        );
        assert!(record.description.contains("Build the launcher"));
        assert!(!record.description.contains("class="));
        assert!(!record.description.contains("color:#333"));
        assert!(!record.description.contains("<script"));
        assert!(!record.description.contains("<span"));
        assert_eq!(record.image_url, "https://hack.example.org/static/img/document_icon.png");
        assert_eq!(record.source_url, page.url);
    }

    #[test]
    fn google_doc_without_body_is_rejected() {
        let page = FetchedPage::new(
            "https://docs.google.com/document/d/abc123/pub",
            r#"<html><body><div id="title">Only a title</div></body></html>"#,
        );
        assert!(matches!(
            parse_google_doc(&page, &ctx()),
            Err(AdapterError::Rejected(_))
        ));
    }

    #[test]
    fn codimd_note_is_rendered_from_markdown() {
        let page = FetchedPage::new("https://hackmd.example.org/s/xyz", fixture("web/codimd.html"));
        let record = parse_codimd(&page, &ctx()).unwrap();
        assert_eq!(record.kind, SourceKind::Markdown);
        assert_eq!(record.name, "Hack Night Notes");
        assert!(record.description.contains("<h1>Hack Night Notes</h1>"), "{}", record.description);
        assert!(record.description.contains("<li>soldering</li>"));
        assert!(record.description.contains("&lt;script&gt;"));
        assert!(!record.description.contains("<script>"));
    }

    #[test]
    fn raw_html_in_markdown_is_escaped() {
        let out = render_markdown("Hello <b onclick=\"x\">there</b>\n\n<div>block</div>");
        assert!(out.contains("&lt;b onclick=&quot;x&quot;&gt;"));
        assert!(out.contains("&lt;div&gt;block&lt;/div&gt;"));
    }

    #[test]
    fn dokuwiki_page_id_loses_namespace() {
        let page = FetchedPage::new(
            "https://wiki.example.org/doku.php?id=project:solar_kiosk",
            fixture("web/dokuwiki.html"),
        );
        let record = parse_dokuwiki(&page, &ctx()).unwrap();
        assert_eq!(record.kind, SourceKind::DokuWiki);
        assert_eq!(record.name, "solar_kiosk");
        assert!(record.description.contains(r#"<h1 id="solar_kiosk">"#), "{}", record.description);
        assert!(!record.description.contains("<div"));
        assert!(record.description.contains(
            r#"<a href="https://wiki.example.org/doku.php?id=project:solar_kiosk:wiring" class="wikilink1">"#
        ));
    }

    #[test]
    fn pad_names_come_from_the_last_segment() {
        assert_eq!(
            pad_name("https://pad.example.org/p/open_data_bikes").as_deref(),
            Some("open data bikes")
        );
        assert_eq!(
            pad_name("https://pad.example.org/p/caf%C3%A9_lab/").as_deref(),
            Some("café lab")
        );
        assert_eq!(pad_name("https://pad.example.org/p/x?lang=de").as_deref(), Some("x"));
    }

    #[tokio::test]
    async fn etherpad_reads_text_export() {
        let url = "https://pad.example.org/p/open_data_bikes";
        let http = StaticFetcher::new()
            .with_body(format!("{url}/export/txt"), "Bike counters\nfor everyone");
        let page = FetchedPage::new(url, fixture("web/etherpad.html"));
        let record = EtherpadAdapter
            .fetch(&http, &ctx(), &Probe::Page(&page))
            .await
            .unwrap();
        assert_eq!(record.name, "open data bikes");
        assert_eq!(record.description, "Bike counters\nfor everyone");
        assert_eq!(record.image_url, "https://hack.example.org/static/img/document_white.png");
        assert_eq!(http.requests(), vec![format!("{url}/export/txt")]);
    }

    #[test]
    fn instructables_steps_become_sections() {
        let page = FetchedPage::new(
            "https://www.instructables.com/Cardboard-Robot-Arm/",
            fixture("web/instructables.html"),
        );
        let record = parse_instructables(&page, &ctx()).unwrap();
        let html = &record.description;
        assert_eq!(record.name, "Cardboard Robot Arm");
        assert!(html.contains("<h3>Step 1: Cut the Parts</h3>"), "{html}");
        assert!(html.contains("<h3>Step 2: Wire the Servo</h3>"));
        assert!(html.contains(r#"<img src="https://content.instructables.com/step1.jpg""#));
        assert!(!html.contains("{{ file"));
        assert!(html.contains("<p>Cut four strips of cardboard.</p>"));
        assert!(html.contains("<pre>servo.write(90);</pre>"));
        assert!(!html.contains("onclick"));
        let first = html.find("Step 1").unwrap();
        let second = html.find("Step 2").unwrap();
        assert!(first < second);
    }

    #[test]
    fn detection_uses_page_signatures() {
        let codimd = FetchedPage::new(
            "https://notes.example.org/x",
            r#"<body><div id="doc" class="markdown-body"></div>"#,
        );
        let doku = FetchedPage::new("https://wiki.example.org/x", DOKUWIKI_SIGNATURE);
        assert!(CodiMdAdapter.detect(&Probe::Page(&codimd)));
        assert!(!DokuWikiAdapter.detect(&Probe::Page(&codimd)));
        assert!(DokuWikiAdapter.detect(&Probe::Page(&doku)));
        assert!(!CodiMdAdapter.detect(&Probe::Reference("https://notes.example.org/x")));
    }
}
