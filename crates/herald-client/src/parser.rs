use std::sync::Arc;

use chrono::Utc;
use herald_core::error::AppError;
use herald_core::models::{ContentItem, ContentKind, FetchMethod, FetchedPage, SourceRecord};
use herald_core::traits::ContentParser;
use htmd::HtmlToMarkdown;
use quick_xml::de::from_str;
use scraper::{ElementRef, Html, Selector};
use serde::Deserialize;

/// HTML-to-Markdown content parser using htmd.
///
/// Pages become one item whose body is the page's Markdown, stripped of
/// non-content elements. RSS and Atom feeds are read as XML and become one
/// item per entry, with HTML descriptions converted the same way.
pub struct MarkdownParser {
    converter: Arc<HtmlToMarkdown>,
}

impl Clone for MarkdownParser {
    fn clone(&self) -> Self {
        Self {
            converter: Arc::clone(&self.converter),
        }
    }
}

impl MarkdownParser {
    pub fn new() -> Self {
        let converter = HtmlToMarkdown::builder()
            .skip_tags(vec![
                "script", "style", "nav", "footer", "header", "aside", "noscript", "iframe", "svg",
                "form",
            ])
            .build();

        Self {
            converter: Arc::new(converter),
        }
    }

    fn parse_page(
        &self,
        source: &SourceRecord,
        page: &FetchedPage,
    ) -> Result<Vec<ContentItem>, AppError> {
        let document = Html::parse_document(&page.body);
        let title = first_text(&document.root_element(), "title")?;

        let markdown = self
            .converter
            .convert(&page.body)
            .map_err(|e| AppError::ParseError(e.to_string()))?;
        let markdown = markdown.trim();
        if markdown.is_empty() {
            return Err(AppError::ParseError(format!(
                "No readable content in {}",
                page.target
            )));
        }

        // A range-fallback body is truncated, so it is never a full article set.
        let kind = if page.method == FetchMethod::RangeFallback {
            ContentKind::RawPage
        } else {
            ContentKind::ArticleSet
        };

        Ok(vec![ContentItem {
            source_id: source.id.clone(),
            url: page.target.clone(),
            title,
            body: markdown.to_string(),
            kind,
            fetched_at: Utc::now(),
        }])
    }

    fn parse_feed(
        &self,
        source: &SourceRecord,
        page: &FetchedPage,
        format: FeedFormat,
    ) -> Result<Vec<ContentItem>, AppError> {
        let xml = replace_html_entities(&page.body);
        let entries = match format {
            FeedFormat::Rss => from_str::<Rss>(&xml)
                .map(Rss::into_entries)
                .map_err(|e| AppError::ParseError(format!("Malformed RSS at {}: {e}", page.target)))?,
            FeedFormat::Atom => from_str::<AtomFeed>(&xml)
                .map(AtomFeed::into_entries)
                .map_err(|e| AppError::ParseError(format!("Malformed Atom feed at {}: {e}", page.target)))?,
        };

        let fetched_at = Utc::now();
        let items: Vec<ContentItem> = entries
            .into_iter()
            .filter_map(|entry| {
                let body = entry
                    .body
                    .map(|html| self.to_markdown(&html))
                    .filter(|md| !md.is_empty())
                    .or_else(|| entry.title.clone())?;
                Some(ContentItem {
                    source_id: source.id.clone(),
                    url: entry.url.unwrap_or_else(|| page.target.clone()),
                    title: entry.title,
                    body,
                    kind: ContentKind::Feed,
                    fetched_at,
                })
            })
            .collect();

        if items.is_empty() {
            return Err(AppError::ParseError(format!(
                "Feed at {} has no entries",
                page.target
            )));
        }
        Ok(items)
    }

    /// Markdown for an HTML fragment. Plain text passes through unchanged.
    fn to_markdown(&self, html: &str) -> String {
        self.converter
            .convert(html)
            .map(|md| md.trim().to_string())
            .unwrap_or_else(|_| html.trim().to_string())
    }
}

impl Default for MarkdownParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ContentParser for MarkdownParser {
    fn parse(
        &self,
        source: &SourceRecord,
        page: &FetchedPage,
    ) -> Result<Vec<ContentItem>, AppError> {
        match feed_format(page) {
            Some(format) if page.method != FetchMethod::RangeFallback => {
                self.parse_feed(source, page, format)
            }
            _ => self.parse_page(source, page),
        }
    }
}

fn selector(css: &str) -> Result<Selector, AppError> {
    Selector::parse(css).map_err(|e| AppError::ParseError(format!("Bad selector '{css}': {e}")))
}

fn first_text(root: &ElementRef<'_>, css: &str) -> Result<Option<String>, AppError> {
    let selector = selector(css)?;
    Ok(root
        .select(&selector)
        .map(|el| el.text().collect::<String>().trim().to_string())
        .find(|text| !text.is_empty()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FeedFormat {
    Rss,
    Atom,
}

fn feed_format(page: &FetchedPage) -> Option<FeedFormat> {
    if let Some(ct) = page.content_type.as_deref() {
        if ct.contains("atom") {
            return Some(FeedFormat::Atom);
        }
        if ct.contains("rss") {
            return Some(FeedFormat::Rss);
        }
    }
    let head: String = page.body.trim_start().chars().take(512).collect();
    let head = head.to_lowercase();
    if head.contains("<rss") || head.contains("<rdf:rdf") {
        Some(FeedFormat::Rss)
    } else if head.contains("<feed") {
        Some(FeedFormat::Atom)
    } else {
        None
    }
}

/// HTML named entities common in feeds but undefined in XML.
const HTML_ENTITIES: [(&str, &str); 8] = [
    ("&nbsp;", "\u{a0}"),
    ("&ndash;", "\u{2013}"),
    ("&mdash;", "\u{2014}"),
    ("&lsquo;", "\u{2018}"),
    ("&rsquo;", "\u{2019}"),
    ("&ldquo;", "\u{201c}"),
    ("&rdquo;", "\u{201d}"),
    ("&hellip;", "\u{2026}"),
];

fn replace_html_entities(xml: &str) -> String {
    HTML_ENTITIES
        .iter()
        .fold(xml.to_string(), |acc, (entity, ch)| acc.replace(entity, ch))
}

// -- Feed documents, deserialized with quick-xml --

/// Element text, whatever attributes the element carries
/// (`isPermaLink`, `type="html"`). CDATA sections are included.
#[derive(Debug, Default, Deserialize)]
struct Text {
    #[serde(rename = "$text", default)]
    value: String,
}

fn text(field: Option<Text>) -> Option<String> {
    field
        .map(|t| t.value.trim().to_string())
        .filter(|t| !t.is_empty())
}

/// One entry, format-independent.
struct FeedEntry {
    title: Option<String>,
    url: Option<String>,
    /// HTML or plain text.
    body: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Option<Channel>,
    /// RSS 1.0 keeps items beside the channel.
    #[serde(rename = "item", default)]
    items: Vec<RssItem>,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    items: Vec<RssItem>,
}

#[derive(Debug, Deserialize)]
struct RssItem {
    title: Option<Text>,
    link: Option<Text>,
    guid: Option<Text>,
    description: Option<Text>,
}

impl Rss {
    fn into_entries(self) -> Vec<FeedEntry> {
        self.channel
            .map(|c| c.items)
            .unwrap_or_default()
            .into_iter()
            .chain(self.items)
            .map(|item| FeedEntry {
                title: text(item.title),
                url: text(item.link).or_else(|| text(item.guid)),
                body: text(item.description),
            })
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct AtomFeed {
    #[serde(rename = "entry", default)]
    entries: Vec<AtomEntry>,
}

#[derive(Debug, Deserialize)]
struct AtomEntry {
    title: Option<Text>,
    #[serde(rename = "link", default)]
    links: Vec<AtomLink>,
    id: Option<Text>,
    summary: Option<Text>,
    content: Option<Text>,
}

#[derive(Debug, Deserialize)]
struct AtomLink {
    #[serde(rename = "@href")]
    href: Option<String>,
    #[serde(rename = "@rel")]
    rel: Option<String>,
}

impl AtomEntry {
    /// The `alternate` link (the default rel), else any link, else the id.
    fn url(&self) -> Option<String> {
        let with_href = || self.links.iter().filter(|l| l.href.is_some());
        with_href()
            .find(|l| l.rel.as_deref().is_none_or(|rel| rel == "alternate"))
            .or_else(|| with_href().next())
            .and_then(|l| l.href.clone())
    }
}

impl AtomFeed {
    fn into_entries(self) -> Vec<FeedEntry> {
        self.entries
            .into_iter()
            .map(|entry| {
                let url = entry.url();
                FeedEntry {
                    title: text(entry.title),
                    url: url.or_else(|| text(entry.id)),
                    body: text(entry.summary).or_else(|| text(entry.content)),
                }
            })
            .collect()
    }
}
