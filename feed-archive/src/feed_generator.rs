//! Projection of ledger state into RSS documents.
//!
//! Everything here is a pure function of the sources, the entries handed in
//! and [`FeedOptions`]. The same input always renders the same bytes, which
//! lets downstream upload logic skip unchanged documents.

use chrono::{DateTime, Utc};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use url::Url;

use crate::ledger::publish_order;
use crate::types::{ArchiveError, BuildReport, LedgerEntry, Result, SourceConfig};
use crate::utils::{slug, time, url as urls};

pub const DEFAULT_MAX_ITEMS: usize = 100;
pub const GENERATOR: &str = concat!("feed-archive ", env!("CARGO_PKG_VERSION"));

const ITUNES_NS: &str = "http://www.itunes.com/dtds/podcast-1.0.dtd";
const ATOM_NS: &str = "http://www.w3.org/2005/Atom";

/// Metadata of the document that merges every source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateMeta {
    pub slug: String,
    pub title: String,
    pub description: String,
    /// Root-relative artwork path.
    pub artwork: Option<String>,
}

impl Default for AggregateMeta {
    fn default() -> Self {
        Self {
            slug: "all".to_string(),
            title: "All sources".to_string(),
            description: "Every archived item across all sources".to_string(),
            artwork: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FeedOptions {
    /// Items per document; [`DEFAULT_MAX_ITEMS`] when unset.
    pub max_items: Option<usize>,
    /// When set, every URL in a document is absolute under this base.
    /// Otherwise URLs are root-relative paths, valid for a document written
    /// at the archive root.
    pub base_url: Option<Url>,
    pub aggregate: AggregateMeta,
}

impl FeedOptions {
    pub fn max_items(&self) -> usize {
        self.max_items.unwrap_or(DEFAULT_MAX_ITEMS)
    }

    fn url_for(&self, relative: &str) -> Result<String> {
        Ok(urls::resolve(self.base_url.as_ref(), relative)?)
    }
}

/// One rendered `<item>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyndicationItem {
    pub item_id: String,
    pub source_id: String,
    pub source_label: String,
    pub title: String,
    pub description: Option<String>,
    pub published_at: DateTime<Utc>,
    pub link: String,
    pub enclosure_url: String,
    pub enclosure_length: u64,
    pub enclosure_type: String,
    pub image: Option<String>,
    pub duration_seconds: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedDocument {
    pub slug: String,
    pub title: String,
    pub description: String,
    pub link: String,
    /// Only present for hosted documents.
    pub self_link: Option<String>,
    pub image: Option<String>,
    pub items: Vec<SyndicationItem>,
}

/// A source as seen by rendering: either configured, or reconstructed from
/// what the ledger stored.
struct ResolvedSource {
    id: String,
    slug: String,
    label: String,
    artwork: String,
}

impl ResolvedSource {
    fn configured(source: &SourceConfig) -> Self {
        Self {
            id: source.id.clone(),
            slug: source.id.clone(),
            label: source.label.clone(),
            artwork: source.artwork_path(),
        }
    }

    fn fallback(source_id: &str) -> Self {
        let slug = slug::slugify(source_id);
        Self {
            id: source_id.to_string(),
            artwork: format!("{}/artwork.jpg", slug),
            slug,
            label: source_id.to_string(),
        }
    }
}

fn document_name(slug: &str) -> String {
    format!("{}.xml", slug)
}

fn project(entry: &LedgerEntry, source: &ResolvedSource, options: &FeedOptions) -> Result<SyndicationItem> {
    let media_url = options.url_for(&entry.local_path)?;
    Ok(SyndicationItem {
        item_id: entry.item_id.clone(),
        source_id: source.id.clone(),
        source_label: source.label.clone(),
        title: entry.title.clone(),
        description: entry.description.clone(),
        published_at: entry.published_at,
        link: media_url.clone(),
        enclosure_url: media_url,
        enclosure_length: entry.size_bytes,
        enclosure_type: entry.media_kind.mime_type(&entry.local_path).to_string(),
        image: Some(options.url_for(&source.artwork)?),
        duration_seconds: entry.duration_seconds,
    })
}

fn channel(
    slug: &str,
    title: &str,
    description: &str,
    artwork: Option<&str>,
    items: Vec<SyndicationItem>,
    options: &FeedOptions,
) -> Result<FeedDocument> {
    let link = options.url_for(&document_name(slug))?;
    let self_link = options.base_url.as_ref().map(|_| link.clone());
    let image = artwork.map(|path| options.url_for(path)).transpose()?;
    Ok(FeedDocument {
        slug: slug.to_string(),
        title: title.to_string(),
        description: description.to_string(),
        link,
        self_link,
        image,
        items,
    })
}

/// Build the document for a single source.
pub fn build_source_feed(source: &SourceConfig, entries: &[LedgerEntry], options: &FeedOptions) -> Result<FeedDocument> {
    let resolved = ResolvedSource::configured(source);
    let mut ordered: Vec<&LedgerEntry> = entries.iter().collect();
    ordered.sort_by(|a, b| publish_order(a, b));
    ordered.truncate(options.max_items());

    let items = ordered
        .into_iter()
        .map(|entry| project(entry, &resolved, options))
        .collect::<Result<Vec<_>>>()?;

    let description = source.description.as_deref().unwrap_or(&source.label);
    channel(
        &resolved.slug,
        &source.label,
        description,
        Some(&resolved.artwork),
        items,
        options,
    )
}

/// Build the document merging every source's entries.
///
/// Entries whose source is not configured still appear, under a label and
/// slug reconstructed from the stored source id.
pub fn build_aggregate_feed(
    sources: &[SourceConfig],
    entries_by_source: &BTreeMap<String, Vec<LedgerEntry>>,
    options: &FeedOptions,
) -> Result<FeedDocument> {
    let configured: HashMap<&str, ResolvedSource> = sources
        .iter()
        .map(|source| (source.id.as_str(), ResolvedSource::configured(source)))
        .collect();
    let mut fallbacks: BTreeMap<&str, ResolvedSource> = BTreeMap::new();

    let mut ordered: Vec<&LedgerEntry> = entries_by_source.values().flatten().collect();
    ordered.sort_by(|a, b| publish_order(a, b));
    ordered.truncate(options.max_items());

    for entry in &ordered {
        let source_id = entry.source_id.as_str();
        if !configured.contains_key(source_id) && !fallbacks.contains_key(source_id) {
            warn!("{}; using a derived label", ArchiveError::UnknownSourceReference(source_id.to_string()));
            fallbacks.insert(source_id, ResolvedSource::fallback(source_id));
        }
    }

    let items = ordered
        .into_iter()
        .map(|entry| {
            let source = configured
                .get(entry.source_id.as_str())
                .or_else(|| fallbacks.get(entry.source_id.as_str()))
                .ok_or_else(|| ArchiveError::UnknownSourceReference(entry.source_id.clone()))?;
            project(entry, source, options)
        })
        .collect::<Result<Vec<_>>>()?;

    let meta = &options.aggregate;
    channel(
        &meta.slug,
        &meta.title,
        &meta.description,
        meta.artwork.as_deref(),
        items,
        options,
    )
}

/// Where rendered documents go.
pub trait OutputSink {
    /// Store `contents` under `name`, returning the written location.
    fn write_document(&mut self, name: &str, contents: &[u8]) -> Result<String>;
}

/// Writes documents into a directory, normally the archive root.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    dir: PathBuf,
}

impl DirectorySink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl OutputSink for DirectorySink {
    fn write_document(&mut self, name: &str, contents: &[u8]) -> Result<String> {
        fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(name);
        let location = path.display().to_string();

        // Leave identical documents untouched so their mtime stays stable.
        if fs::read(&path).map(|existing| existing == contents).unwrap_or(false) {
            debug!("Feed {} unchanged", location);
            return Ok(location);
        }

        let tmp = self.dir.join(format!(".{}.tmp", name));
        fs::write(&tmp, contents)?;
        if let Err(e) = fs::rename(&tmp, &path) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(location)
    }
}

/// Keeps documents in memory, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    pub documents: BTreeMap<String, Vec<u8>>,
}

impl OutputSink for MemorySink {
    fn write_document(&mut self, name: &str, contents: &[u8]) -> Result<String> {
        self.documents.insert(name.to_string(), contents.to_vec());
        Ok(name.to_string())
    }
}

/// Write one document per non-empty source, then the aggregate.
pub fn build_all(
    sources: &[SourceConfig],
    entries_by_source: &BTreeMap<String, Vec<LedgerEntry>>,
    sink: &mut dyn OutputSink,
    options: &FeedOptions,
) -> Result<BuildReport> {
    let mut report = BuildReport::default();

    for source in sources {
        let entries = match entries_by_source.get(&source.id) {
            Some(entries) if !entries.is_empty() => entries,
            _ => {
                info!("Skipping feed for {}: no archived items", source.id);
                report.skipped.push(source.id.clone());
                continue;
            }
        };
        let document = build_source_feed(source, entries, options)?;
        let location = sink.write_document(&document.file_name(), document.to_xml()?.as_bytes())?;
        debug!("Wrote {} items to {}", document.items.len(), location);
        report.written.push(location);
    }

    let aggregate = build_aggregate_feed(sources, entries_by_source, options)?;
    let location = sink.write_document(&aggregate.file_name(), aggregate.to_xml()?.as_bytes())?;
    report.written.push(location);

    info!(
        "Wrote {} feeds ({} sources skipped): {}",
        report.written.len(),
        report.skipped.len(),
        report.written.join(", ")
    );
    Ok(report)
}

fn render_error(e: impl std::fmt::Display) -> ArchiveError {
    ArchiveError::Render(e.to_string())
}

/// Drop characters XML 1.0 cannot carry at all, not even escaped.
/// Upstream titles and descriptions routinely contain stray C0 controls.
fn xml_safe(text: &str) -> Cow<'_, str> {
    fn allowed(c: char) -> bool {
        matches!(
            c,
            '\t' | '\n' | '\r' | '\u{20}'..='\u{D7FF}' | '\u{E000}'..='\u{FFFD}' | '\u{10000}'..='\u{10FFFF}'
        )
    }
    if text.chars().all(allowed) {
        Cow::Borrowed(text)
    } else {
        Cow::Owned(text.chars().filter(|c| allowed(*c)).collect())
    }
}

struct XmlOut {
    writer: Writer<Vec<u8>>,
}

impl XmlOut {
    fn new() -> Self {
        Self {
            writer: Writer::new_with_indent(Vec::new(), b' ', 2),
        }
    }

    fn event(&mut self, event: Event<'_>) -> Result<()> {
        self.writer.write_event(event).map_err(render_error)
    }

    fn tag<'a>(name: &'a str, attrs: &[(&str, &str)]) -> BytesStart<'a> {
        let mut tag = BytesStart::new(name);
        for (key, value) in attrs {
            tag.push_attribute((*key, xml_safe(value).as_ref()));
        }
        tag
    }

    fn start(&mut self, name: &str, attrs: &[(&str, &str)]) -> Result<()> {
        self.event(Event::Start(Self::tag(name, attrs)))
    }

    fn end(&mut self, name: &str) -> Result<()> {
        self.event(Event::End(BytesEnd::new(name)))
    }

    fn empty(&mut self, name: &str, attrs: &[(&str, &str)]) -> Result<()> {
        self.event(Event::Empty(Self::tag(name, attrs)))
    }

    fn text(&mut self, name: &str, text: &str) -> Result<()> {
        self.text_with(name, &[], text)
    }

    fn text_with(&mut self, name: &str, attrs: &[(&str, &str)], text: &str) -> Result<()> {
        self.start(name, attrs)?;
        self.event(Event::Text(BytesText::new(&xml_safe(text))))?;
        self.end(name)
    }

    fn finish(self) -> Result<String> {
        let mut xml = String::from_utf8(self.writer.into_inner()).map_err(render_error)?;
        xml.push('\n');
        Ok(xml)
    }
}

impl FeedDocument {
    pub fn file_name(&self) -> String {
        document_name(&self.slug)
    }

    /// Newest item date; stands in for the build date so output stays stable.
    pub fn last_build_date(&self) -> Option<DateTime<Utc>> {
        self.items.iter().map(|item| item.published_at).max()
    }

    pub fn to_xml(&self) -> Result<String> {
        let mut out = XmlOut::new();
        out.event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
        out.start(
            "rss",
            &[
                ("version", "2.0"),
                ("xmlns:itunes", ITUNES_NS),
                ("xmlns:atom", ATOM_NS),
            ],
        )?;
        out.start("channel", &[])?;

        out.text("title", &self.title)?;
        out.text("link", &self.link)?;
        out.text("description", &self.description)?;
        out.text("generator", GENERATOR)?;
        if let Some(date) = self.last_build_date() {
            out.text("lastBuildDate", &time::format_rfc2822(&date))?;
        }
        if let Some(self_link) = &self.self_link {
            out.empty(
                "atom:link",
                &[
                    ("href", self_link.as_str()),
                    ("rel", "self"),
                    ("type", "application/rss+xml"),
                ],
            )?;
        }
        if let Some(image) = &self.image {
            out.start("image", &[])?;
            out.text("url", image)?;
            out.text("title", &self.title)?;
            out.text("link", &self.link)?;
            out.end("image")?;
            out.empty("itunes:image", &[("href", image.as_str())])?;
        }

        for item in &self.items {
            write_item(&mut out, item)?;
        }

        out.end("channel")?;
        out.end("rss")?;
        out.finish()
    }
}

fn write_item(out: &mut XmlOut, item: &SyndicationItem) -> Result<()> {
    out.start("item", &[])?;
    out.text("title", &item.title)?;
    out.text("link", &item.link)?;
    out.text_with("guid", &[("isPermaLink", "false")], &item.item_id)?;
    out.text("pubDate", &time::format_rfc2822(&item.published_at))?;
    if let Some(description) = &item.description {
        out.text("description", description)?;
    }
    let length = item.enclosure_length.to_string();
    out.empty(
        "enclosure",
        &[
            ("url", item.enclosure_url.as_str()),
            ("length", length.as_str()),
            ("type", item.enclosure_type.as_str()),
        ],
    )?;
    out.text("itunes:author", &item.source_label)?;
    if let Some(image) = &item.image {
        out.empty("itunes:image", &[("href", image.as_str())])?;
    }
    if let Some(duration) = item.duration_seconds {
        out.text("itunes:duration", &time::format_duration(duration))?;
    }
    out.end("item")
}
