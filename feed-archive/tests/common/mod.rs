#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use feed_archive::{AcquiredContent, AcquisitionError, ContentAcquirer, ItemDescriptor, LedgerEntry, MediaKind, SourceConfig};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Mutex, Once};

static INIT: Once = Once::new();

pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .try_init()
            .ok();
    });
}

pub fn ts(rfc3339: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(rfc3339)
        .expect("valid timestamp")
        .with_timezone(&Utc)
}

pub fn entry(source_id: &str, item_id: &str, published_at: &str) -> LedgerEntry {
    LedgerEntry {
        source_id: source_id.to_string(),
        item_id: item_id.to_string(),
        title: format!("Episode {}", item_id),
        local_path: format!("{}/{}.m4a", source_id, item_id),
        size_bytes: 1024,
        media_kind: MediaKind::Audio,
        published_at: ts(published_at),
        recorded_at: ts(published_at),
        description: None,
        duration_seconds: None,
    }
}

pub fn descriptor(id: &str, published_at: &str) -> ItemDescriptor {
    ItemDescriptor {
        id: id.to_string(),
        title: format!("Episode {}", id),
        url: format!("https://www.youtube.com/watch?v={}", id),
        published_at: ts(published_at),
        description: Some(format!("About {}", id)),
        media: None,
    }
}

pub fn source(id: &str, label: &str) -> SourceConfig {
    SourceConfig::new(id, label, format!("https://www.youtube.com/feeds/videos.xml?channel_id={}", id))
}

/// Writes `<dest_dir>/<item_id>.m4a` and counts calls per item.
#[derive(Default)]
pub struct RecordingAcquirer {
    calls: Mutex<HashMap<String, usize>>,
    /// Items that always fail.
    failing: HashSet<String>,
    /// Items that fail this many times before succeeding.
    flaky: HashMap<String, usize>,
}

impl RecordingAcquirer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(mut self, item_id: &str) -> Self {
        self.failing.insert(item_id.to_string());
        self
    }

    pub fn flaky(mut self, item_id: &str, failures: usize) -> Self {
        self.flaky.insert(item_id.to_string(), failures);
        self
    }

    pub fn calls(&self, item_id: &str) -> usize {
        self.calls.lock().unwrap().get(item_id).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }
}

#[async_trait]
impl ContentAcquirer for RecordingAcquirer {
    async fn acquire(
        &self,
        _source: &SourceConfig,
        item: &ItemDescriptor,
        dest_dir: &Path,
    ) -> Result<AcquiredContent, AcquisitionError> {
        let attempt = {
            let mut calls = self.calls.lock().unwrap();
            let count = calls.entry(item.id.clone()).or_insert(0);
            *count += 1;
            *count
        };

        if self.failing.contains(&item.id) {
            return Err(AcquisitionError::Exit {
                program: "mock".to_string(),
                status: "exit status: 1".to_string(),
                stderr: format!("{} is unavailable", item.id),
            });
        }
        if self.flaky.get(&item.id).is_some_and(|failures| attempt <= *failures) {
            return Err(AcquisitionError::Other(format!("transient failure {}", attempt)));
        }

        std::fs::create_dir_all(dest_dir).map_err(|e| AcquisitionError::Other(e.to_string()))?;
        let local_path = dest_dir.join(format!("{}.m4a", item.id));
        let body = format!("audio for {}", item.id);
        std::fs::write(&local_path, &body).map_err(|e| AcquisitionError::Other(e.to_string()))?;

        Ok(AcquiredContent {
            local_path,
            size_bytes: body.len() as u64,
            media_kind: MediaKind::Audio,
            duration_seconds: Some(61),
        })
    }
}
