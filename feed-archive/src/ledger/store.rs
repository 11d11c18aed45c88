use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};

use super::codec::{self, RecordLayout};
use super::{publish_order, LedgerView};
use crate::types::{ArchiveError, LedgerEntry, LoadReport, Result};

pub const LEDGER_FILE: &str = "ledger.tsv";

/// The durable record of every materialized item, keyed by item id.
///
/// New ids are appended as a single line; replacing an existing id rewrites
/// the whole file through a temp file and a rename. Nothing here takes a file
/// lock, so one backing file must only ever be mutated by one process.
///
/// Lines that fail to decode are carried through every rewrite verbatim. A
/// file whose header declares unknown columns is loaded but never written.
#[derive(Debug)]
pub struct LedgerStore {
    root: PathBuf,
    path: PathBuf,
    entries: HashMap<String, LedgerEntry>,
    /// Raw lines that did not decode, in file order.
    unreadable: Vec<String>,
    last_recorded: Option<DateTime<Utc>>,
    /// The file ends in a torn line; the next append must start on a new one.
    needs_newline: bool,
    report: LoadReport,
}

impl LedgerStore {
    /// Open (creating if needed) the ledger under `root` and load it fully.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = absolute_root(root.as_ref());
        fs::create_dir_all(&root).map_err(|e| ArchiveError::StorageUnavailable {
            path: root.clone(),
            source: e,
        })?;
        let path = root.join(LEDGER_FILE);

        let mut store = Self {
            root,
            path,
            entries: HashMap::new(),
            unreadable: Vec::new(),
            last_recorded: None,
            needs_newline: false,
            report: LoadReport::default(),
        };

        if !store.path.exists() {
            info!("Creating ledger at {}", store.path.display());
            store
                .write_snapshot(Vec::new())
                .map_err(|e| store.unavailable(e))?;
            return Ok(store);
        }

        store.load()?;
        if !store.report.unknown_columns.is_empty() {
            warn!(
                "Ledger {} declares unknown columns ({}); opening read-only",
                store.path.display(),
                store.report.unknown_columns.join(", ")
            );
        } else if store.report.needs_compaction() {
            info!(
                "Compacting ledger {} ({} normalized, {} duplicates, schema upgrade: {})",
                store.path.display(),
                store.report.normalized,
                store.report.duplicates,
                store.report.upgraded_schema
            );
            if !store.unreadable.is_empty() {
                warn!(
                    "Keeping {} unreadable lines of {} as they are",
                    store.unreadable.len(),
                    store.path.display()
                );
            }
            store.rewrite_all().map_err(|e| store.unavailable(e))?;
        }

        info!(
            "Loaded {} ledger entries from {} ({} skipped)",
            store.report.recovered,
            store.path.display(),
            store.report.skipped
        );
        Ok(store)
    }

    fn load(&mut self) -> Result<()> {
        let bytes = fs::read(&self.path).map_err(|e| ArchiveError::StorageUnavailable {
            path: self.path.clone(),
            source: e,
        })?;
        let raw = String::from_utf8_lossy(&bytes);
        self.needs_newline = !raw.is_empty() && !raw.ends_with('\n');

        // Headerless, empty, or older-header files get rewritten with the current header.
        let header = raw.lines().next().and_then(RecordLayout::parse_header);
        self.report.upgraded_schema = header.as_ref().map_or(true, |layout| !layout.is_current());
        let skip = usize::from(header.is_some());
        let layout = header.unwrap_or_else(RecordLayout::current);
        self.report.unknown_columns = layout.unknown_columns().to_vec();

        for (idx, line) in raw.lines().enumerate().skip(skip) {
            if line.trim().is_empty() {
                continue;
            }
            let line_no = idx + 1;
            let mut entry = match layout.decode(line, line_no) {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping ledger record in {}: {}", self.path.display(), e);
                    self.report.skipped += 1;
                    self.unreadable.push(line.trim_end_matches('\r').to_string());
                    continue;
                }
            };

            if Path::new(&entry.local_path).is_absolute() {
                match self.relativize(Path::new(&entry.local_path)) {
                    Some(relative) => {
                        entry.local_path = relative;
                        self.report.normalized += 1;
                    }
                    None => warn!(
                        "Ledger entry {} points outside the archive root: {}",
                        entry.item_id, entry.local_path
                    ),
                }
            }

            if let Some(previous) = self.entries.insert(entry.item_id.clone(), entry) {
                warn!(
                    "Duplicate ledger record for {} on line {}; keeping the later one",
                    previous.item_id, line_no
                );
                self.report.duplicates += 1;
            }
        }

        self.report.recovered = self.entries.len();
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load_report(&self) -> &LoadReport {
        &self.report
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, item_id: &str) -> Option<&LedgerEntry> {
        self.entries.get(item_id)
    }

    /// Absolute location of an entry's artifact.
    pub fn resolve(&self, entry: &LedgerEntry) -> PathBuf {
        self.root.join(&entry.local_path)
    }

    /// All entries grouped by source, each group newest first.
    pub fn entries_by_source(&self) -> BTreeMap<String, Vec<LedgerEntry>> {
        let mut grouped: BTreeMap<String, Vec<LedgerEntry>> = BTreeMap::new();
        for entry in self.entries.values() {
            grouped
                .entry(entry.source_id.clone())
                .or_default()
                .push(entry.clone());
        }
        for entries in grouped.values_mut() {
            entries.sort_by(publish_order);
        }
        grouped
    }

    /// Record a materialized item.
    ///
    /// The in-memory view is only updated once the write has succeeded.
    pub fn record_entry(&mut self, mut entry: LedgerEntry) -> Result<()> {
        self.ensure_writable()?;
        self.normalize(&mut entry)?;

        let now = Utc::now();
        let stamp = match self.last_recorded {
            Some(last) if last > now => last,
            _ => now,
        };
        entry.recorded_at = stamp;

        if self.entries.contains_key(&entry.item_id) {
            let mut rows: Vec<&LedgerEntry> = self
                .entries
                .values()
                .filter(|existing| existing.item_id != entry.item_id)
                .collect();
            rows.push(&entry);
            self.write_snapshot(rows)?;
            self.needs_newline = false;
            debug!("Replaced ledger entry {}", entry.item_id);
        } else {
            self.append(&entry)?;
            debug!("Appended ledger entry {}", entry.item_id);
        }

        self.last_recorded = Some(stamp);
        self.entries.insert(entry.item_id.clone(), entry);
        Ok(())
    }

    /// Write every entry back in canonical order, replacing the file atomically.
    pub fn rewrite_all(&mut self) -> Result<()> {
        self.ensure_writable()?;
        self.write_snapshot(self.entries.values().collect())?;
        self.needs_newline = false;
        Ok(())
    }

    /// End the store's lifecycle. Every write is already durable.
    pub fn close(self) {
        info!(
            "Closing ledger {} with {} entries",
            self.path.display(),
            self.entries.len()
        );
    }

    pub fn is_read_only(&self) -> bool {
        !self.report.unknown_columns.is_empty()
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.is_read_only() {
            return Err(ArchiveError::UnsupportedLayout {
                path: self.path.clone(),
                columns: self.report.unknown_columns.join(", "),
            });
        }
        Ok(())
    }

    fn normalize(&self, entry: &mut LedgerEntry) -> Result<()> {
        if entry.item_id.is_empty() || entry.source_id.is_empty() {
            return Err(ArchiveError::InvalidEntry(
                "item id and source id must not be empty".to_string(),
            ));
        }
        for (field, value) in [
            ("item id", &entry.item_id),
            ("source id", &entry.source_id),
            ("local path", &entry.local_path),
        ] {
            if value.chars().any(char::is_control) {
                return Err(ArchiveError::InvalidEntry(format!(
                    "{} of {} contains control characters",
                    field, entry.item_id
                )));
            }
        }

        let path = Path::new(&entry.local_path);
        if path.components().any(|c| matches!(c, Component::ParentDir)) {
            return Err(ArchiveError::InvalidEntry(format!(
                "{} escapes the archive root",
                entry.local_path
            )));
        }
        let relative = if path.is_absolute() {
            self.relativize(path).ok_or_else(|| {
                ArchiveError::InvalidEntry(format!(
                    "{} is outside the archive root {}",
                    entry.local_path,
                    self.root.display()
                ))
            })?
        } else {
            to_slash_path(path)
        };
        if relative.is_empty() {
            return Err(ArchiveError::InvalidEntry(format!(
                "{} has no local path",
                entry.item_id
            )));
        }
        entry.local_path = relative;

        if entry.title.chars().any(char::is_control) {
            entry.title = entry
                .title
                .split(char::is_control)
                .filter(|part| !part.is_empty())
                .collect::<Vec<_>>()
                .join(" ");
        }
        if entry.description.as_deref() == Some("") {
            entry.description = None;
        }
        Ok(())
    }

    fn relativize(&self, path: &Path) -> Option<String> {
        let canonical_root = self.root.canonicalize().ok();
        let candidates = std::iter::once(self.root.as_path()).chain(canonical_root.as_deref());
        for root in candidates {
            if let Ok(stripped) = path.strip_prefix(root) {
                return Some(to_slash_path(stripped));
            }
        }
        None
    }

    fn append(&mut self, entry: &LedgerEntry) -> Result<()> {
        let mut line = String::new();
        if self.needs_newline {
            line.push('\n');
        }
        line.push_str(&codec::encode(entry));
        line.push('\n');

        let result = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .and_then(|mut file| {
                file.write_all(line.as_bytes())?;
                file.sync_data()
            });

        match result {
            Ok(()) => {
                self.needs_newline = false;
                Ok(())
            }
            Err(e) => {
                // A partial write may have left a torn line behind.
                self.needs_newline = true;
                Err(ArchiveError::StorageWriteFailed {
                    path: self.path.clone(),
                    source: e,
                })
            }
        }
    }

    fn write_snapshot(&self, mut rows: Vec<&LedgerEntry>) -> Result<()> {
        rows.sort_by(|a, b| a.item_id.cmp(&b.item_id));

        let mut contents = codec::header_line();
        contents.push('\n');
        for row in rows {
            contents.push_str(&codec::encode(row));
            contents.push('\n');
        }
        for line in &self.unreadable {
            contents.push_str(line);
            contents.push('\n');
        }

        let tmp = self.path.with_extension("tsv.tmp");
        let result = fs::File::create(&tmp)
            .and_then(|mut file| {
                file.write_all(contents.as_bytes())?;
                file.sync_all()
            })
            .and_then(|_| fs::rename(&tmp, &self.path));

        result.map_err(|e| {
            let _ = fs::remove_file(&tmp);
            ArchiveError::StorageWriteFailed {
                path: self.path.clone(),
                source: e,
            }
        })
    }

    fn unavailable(&self, err: ArchiveError) -> ArchiveError {
        match err {
            ArchiveError::StorageWriteFailed { path, source } => {
                ArchiveError::StorageUnavailable { path, source }
            }
            other => other,
        }
    }
}

impl LedgerView for LedgerStore {
    fn has(&self, item_id: &str) -> bool {
        self.entries.contains_key(item_id)
    }

    fn entries_for(&self, source_id: &str) -> Vec<LedgerEntry> {
        let mut entries: Vec<LedgerEntry> = self
            .entries
            .values()
            .filter(|entry| entry.source_id == source_id)
            .cloned()
            .collect();
        entries.sort_by(publish_order);
        entries
    }
}

fn absolute_root(root: &Path) -> PathBuf {
    if root.is_absolute() {
        root.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(root))
            .unwrap_or_else(|_| root.to_path_buf())
    }
}

/// Join the normal components of a relative path with `/`.
fn to_slash_path(path: &Path) -> String {
    path.components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}
