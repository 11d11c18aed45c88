//! Line codec for the ledger file.
//!
//! One record per line, cells separated by a tab. The header names the
//! columns, so rows written before a column existed simply end early and
//! decode with that field absent. Only `description` can carry arbitrary
//! text; it is base64-encoded so tabs and newlines never reach the file.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, SecondsFormat, Utc};

use crate::types::{ArchiveError, LedgerEntry, MediaKind, Result};

pub const DELIMITER: char = '\t';
const COLUMN_COUNT: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    Source,
    ItemId,
    Title,
    LocalPath,
    SizeBytes,
    MediaKind,
    PublishedAt,
    RecordedAt,
    Description,
    DurationSeconds,
}

impl Column {
    /// Canonical order. New columns are only ever appended.
    pub const ALL: [Column; COLUMN_COUNT] = [
        Column::Source,
        Column::ItemId,
        Column::Title,
        Column::LocalPath,
        Column::SizeBytes,
        Column::MediaKind,
        Column::PublishedAt,
        Column::RecordedAt,
        Column::Description,
        Column::DurationSeconds,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Source => "source",
            Self::ItemId => "item_id",
            Self::Title => "title",
            Self::LocalPath => "local_path",
            Self::SizeBytes => "size_bytes",
            Self::MediaKind => "media_kind",
            Self::PublishedAt => "published_at",
            Self::RecordedAt => "recorded_at",
            Self::Description => "description",
            Self::DurationSeconds => "duration_seconds",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|c| c.name() == name)
    }

    fn is_required(&self) -> bool {
        !matches!(self, Self::Description | Self::DurationSeconds)
    }
}

pub fn header_line() -> String {
    Column::ALL
        .iter()
        .map(Column::name)
        .collect::<Vec<_>>()
        .join("\t")
}

/// Maps cell positions to columns, as declared by a file's header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordLayout {
    columns: Vec<Option<Column>>,
    /// Header names this version does not know, in file order.
    unknown: Vec<String>,
}

impl RecordLayout {
    pub fn current() -> Self {
        Self {
            columns: Column::ALL.iter().copied().map(Some).collect(),
            unknown: Vec::new(),
        }
    }

    /// Returns `None` when the line is a data row rather than a header.
    ///
    /// A header always starts with the `source` and `item_id` columns; a row
    /// whose ids happen to read `source` is still data.
    pub fn parse_header(line: &str) -> Option<Self> {
        let line = line.trim_end_matches('\r');
        let mut cells = line.split(DELIMITER);
        if cells.next() != Some(Column::Source.name()) || cells.next() != Some(Column::ItemId.name()) {
            return None;
        }

        let mut columns = Vec::new();
        let mut unknown = Vec::new();
        for name in line.split(DELIMITER) {
            let column = Column::from_name(name);
            if column.is_none() {
                unknown.push(name.to_string());
            }
            columns.push(column);
        }
        Some(Self { columns, unknown })
    }

    /// True when every current column is declared, in canonical position.
    pub fn is_current(&self) -> bool {
        *self == Self::current()
    }

    /// Columns declared by a newer writer. Rewriting the file under this
    /// layout would drop their values.
    pub fn unknown_columns(&self) -> &[String] {
        &self.unknown
    }

    pub fn decode(&self, line: &str, line_no: usize) -> Result<LedgerEntry> {
        let malformed = |reason: String| ArchiveError::MalformedRecord {
            line: line_no,
            reason,
        };

        let mut cells: [Option<&str>; COLUMN_COUNT] = [None; COLUMN_COUNT];
        for (idx, cell) in line.trim_end_matches('\r').split(DELIMITER).enumerate() {
            if let Some(Some(column)) = self.columns.get(idx) {
                cells[*column as usize] = Some(cell);
            }
        }

        for column in Column::ALL.iter().filter(|c| c.is_required()) {
            if cells[*column as usize].is_none() {
                return Err(malformed(format!("missing column {}", column.name())));
            }
        }
        let cell = |column: Column| cells[column as usize].unwrap_or("");
        let optional = |column: Column| cells[column as usize].filter(|s| !s.is_empty());

        let source_id = cell(Column::Source).to_string();
        let item_id = cell(Column::ItemId).to_string();
        if source_id.is_empty() || item_id.is_empty() {
            return Err(malformed("empty source or item id".to_string()));
        }

        let size_bytes = cell(Column::SizeBytes)
            .parse::<u64>()
            .map_err(|e| malformed(format!("size_bytes: {}", e)))?;
        let media_kind = MediaKind::parse(cell(Column::MediaKind))
            .ok_or_else(|| malformed(format!("unknown media kind {:?}", cell(Column::MediaKind))))?;
        let published_at = decode_time(cell(Column::PublishedAt))
            .map_err(|e| malformed(format!("published_at: {}", e)))?;
        let recorded_at = decode_time(cell(Column::RecordedAt))
            .map_err(|e| malformed(format!("recorded_at: {}", e)))?;
        let description = optional(Column::Description)
            .map(decode_text)
            .transpose()
            .map_err(|e| malformed(format!("description: {}", e)))?;
        let duration_seconds = optional(Column::DurationSeconds)
            .map(str::parse::<u64>)
            .transpose()
            .map_err(|e| malformed(format!("duration_seconds: {}", e)))?;

        Ok(LedgerEntry {
            source_id,
            item_id,
            title: cell(Column::Title).to_string(),
            local_path: cell(Column::LocalPath).to_string(),
            size_bytes,
            media_kind,
            published_at,
            recorded_at,
            description,
            duration_seconds,
        })
    }
}

/// Encode one entry as a line, without the trailing newline.
pub fn encode(entry: &LedgerEntry) -> String {
    let cells = [
        entry.source_id.clone(),
        entry.item_id.clone(),
        entry.title.clone(),
        entry.local_path.clone(),
        entry.size_bytes.to_string(),
        entry.media_kind.as_str().to_string(),
        encode_time(&entry.published_at),
        encode_time(&entry.recorded_at),
        entry.description.as_deref().map(encode_text).unwrap_or_default(),
        entry
            .duration_seconds
            .map(|d| d.to_string())
            .unwrap_or_default(),
    ];
    cells.join("\t")
}

pub fn encode_text(text: &str) -> String {
    STANDARD.encode(text.as_bytes())
}

pub fn decode_text(cell: &str) -> std::result::Result<String, String> {
    let bytes = STANDARD.decode(cell).map_err(|e| e.to_string())?;
    String::from_utf8(bytes).map_err(|e| e.to_string())
}

pub fn encode_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

pub fn decode_time(cell: &str) -> std::result::Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(cell).map(|t| t.with_timezone(&Utc))
}
