use crate::config::AcquisitionConfig;
use crate::types::{AcquiredContent, AcquisitionError, ContentAcquirer, ItemDescriptor, MediaKind, SourceConfig};
use crate::utils::slug;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

/// Extensions left behind by interrupted downloads.
const PARTIAL_EXTENSIONS: &[&str] = &["part", "ytdl", "tmp", "temp"];

/// Longest stderr excerpt carried in an error.
const STDERR_EXCERPT: usize = 2000;

/// Ids longer than this are never used as a file name directly.
const MAX_PLAIN_STEM: usize = 64;
const MAX_SLUG_STEM: usize = 48;
const DIGEST_BYTES: usize = 6;

/// File stem of an item's artifact inside its destination directory.
///
/// Plain ids (ASCII alphanumerics, `-` and `_`) are used unchanged. Any other
/// id becomes a slug followed by a digest of the full id, so distinct ids
/// never share a stem and no id can name a path outside the directory.
pub fn artifact_stem(item_id: &str) -> String {
    let plain = !item_id.is_empty()
        && item_id.len() <= MAX_PLAIN_STEM
        && item_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if plain {
        return item_id.to_string();
    }

    let digest = Sha256::digest(item_id.as_bytes());
    let hash: String = digest
        .iter()
        .take(DIGEST_BYTES)
        .map(|b| format!("{:02x}", b))
        .collect();
    let mut base = slug::slugify(item_id);
    base.truncate(MAX_SLUG_STEM);
    format!("{}-{}", base.trim_end_matches('-'), hash)
}

/// Materializes items by running an external downloader (yt-dlp by default).
///
/// The artifact is expected at `<dest_dir>/<stem>.<ext>`, where the stem
/// comes from [`artifact_stem`] and the extension is chosen by the downloader.
#[derive(Debug, Clone)]
pub struct CommandAcquirer {
    config: AcquisitionConfig,
}

impl CommandAcquirer {
    pub fn new(config: AcquisitionConfig) -> Self {
        Self { config }
    }

    fn format_for(&self, kind: MediaKind) -> &str {
        match kind {
            MediaKind::Audio => &self.config.audio_format,
            MediaKind::Video => &self.config.video_format,
        }
    }

    /// Expand the argument template for one item.
    pub fn build_args(&self, source: &SourceConfig, item: &ItemDescriptor, dest_dir: &Path) -> Vec<String> {
        let output = dest_dir
            .join(format!("{}.%(ext)s", artifact_stem(&item.id)))
            .to_string_lossy()
            .into_owned();
        let format = self.format_for(source.preferred_media);

        self.config
            .args
            .iter()
            .map(|arg| {
                arg.replace("{url}", &item.url)
                    .replace("{output}", &output)
                    .replace("{format}", format)
            })
            .collect()
    }

    async fn locate_artifact(item_id: &str, dest_dir: &Path) -> Result<PathBuf, AcquisitionError> {
        let missing = || AcquisitionError::MissingArtifact {
            item_id: item_id.to_string(),
            dir: dest_dir.to_path_buf(),
        };

        let stem = artifact_stem(item_id);
        let mut dir = tokio::fs::read_dir(dest_dir).await.map_err(|_| missing())?;
        let mut candidates = Vec::new();
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| AcquisitionError::Other(format!("listing {}: {}", dest_dir.display(), e)))?
        {
            let path = entry.path();
            let stem_matches = path.file_stem().and_then(|s| s.to_str()) == Some(stem.as_str());
            let partial = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| PARTIAL_EXTENSIONS.contains(&ext));
            if stem_matches && !partial {
                candidates.push(path);
            }
        }

        // Several containers for one id only happen after a format change; take
        // the first by name so repeated runs agree.
        candidates.sort();
        candidates.into_iter().next().ok_or_else(missing)
    }
}

#[async_trait]
impl ContentAcquirer for CommandAcquirer {
    async fn acquire(
        &self,
        source: &SourceConfig,
        item: &ItemDescriptor,
        dest_dir: &Path,
    ) -> Result<AcquiredContent, AcquisitionError> {
        tokio::fs::create_dir_all(dest_dir)
            .await
            .map_err(|e| AcquisitionError::Other(format!("creating {}: {}", dest_dir.display(), e)))?;

        let args = self.build_args(source, item, dest_dir);
        debug!("Running {} {:?}", self.config.program, args);

        let output = Command::new(&self.config.program)
            .args(&args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| AcquisitionError::Spawn {
                program: self.config.program.clone(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let excerpt: String = stderr.trim().chars().take(STDERR_EXCERPT).collect();
            return Err(AcquisitionError::Exit {
                program: self.config.program.clone(),
                status: output.status.to_string(),
                stderr: excerpt,
            });
        }

        let local_path = Self::locate_artifact(&item.id, dest_dir).await?;
        let media_kind =
            MediaKind::from_path(&local_path).ok_or_else(|| AcquisitionError::UnknownContainer(local_path.clone()))?;
        let size_bytes = tokio::fs::metadata(&local_path)
            .await
            .map_err(|e| AcquisitionError::Other(format!("stat {}: {}", local_path.display(), e)))?
            .len();

        info!("Acquired {} ({} bytes, {})", local_path.display(), size_bytes, media_kind);
        Ok(AcquiredContent {
            local_path,
            size_bytes,
            media_kind,
            duration_seconds: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn item(id: &str) -> ItemDescriptor {
        ItemDescriptor {
            id: id.to_string(),
            title: "Episode".to_string(),
            url: format!("https://www.youtube.com/watch?v={}", id),
            published_at: Utc::now(),
            description: None,
            media: None,
        }
    }

    #[test]
    fn test_build_args_expands_placeholders() {
        let acquirer = CommandAcquirer::new(AcquisitionConfig::default());
        let mut source = SourceConfig::new("ch1", "Channel One", "https://example.com/feed");
        source.preferred_media = MediaKind::Video;

        let args = acquirer.build_args(&source, &item("abc"), Path::new("/srv/archive/ch1"));
        assert!(args.contains(&"https://www.youtube.com/watch?v=abc".to_string()));
        assert!(args.contains(&"/srv/archive/ch1/abc.%(ext)s".to_string()));
        assert!(args.contains(&AcquisitionConfig::default().video_format));
        assert!(!args.iter().any(|arg| arg.contains('{')));
    }

    #[tokio::test]
    async fn test_locate_artifact_ignores_partial_downloads() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("abc.m4a.part"), b"x").unwrap();
        std::fs::write(dir.path().join("abc.part"), b"x").unwrap();
        std::fs::write(dir.path().join("other.m4a"), b"x").unwrap();

        assert!(matches!(
            CommandAcquirer::locate_artifact("abc", dir.path()).await,
            Err(AcquisitionError::MissingArtifact { .. })
        ));

        std::fs::write(dir.path().join("abc.m4a"), b"audio").unwrap();
        let found = CommandAcquirer::locate_artifact("abc", dir.path()).await.unwrap();
        assert_eq!(found, dir.path().join("abc.m4a"));
    }

    #[test]
    fn test_artifact_stem_keeps_plain_ids() {
        assert_eq!(artifact_stem("dQw4w9WgXcQ"), "dQw4w9WgXcQ");
        assert_eq!(artifact_stem("-x_Y-1"), "-x_Y-1");
    }

    #[test]
    fn test_artifact_stem_confines_path_like_ids() {
        let ids = [
            "../../../etc/evil",
            "https://example.com/ep/1",
            "https://example.com/ep/1?",
            ".hidden",
            "..",
            "日本語",
        ];
        let stems: Vec<String> = ids.iter().map(|id| artifact_stem(id)).collect();
        for (id, stem) in ids.iter().zip(&stems) {
            assert!(!stem.is_empty());
            assert!(!stem.starts_with('.'), "{} -> {}", id, stem);
            assert!(
                stem.chars().all(|c| c.is_ascii_alphanumeric() || c == '-'),
                "{} -> {}",
                id,
                stem
            );
            assert_eq!(artifact_stem(id), *stem);
        }
        assert_ne!(stems[1], stems[2]);
        assert!(stems[1].starts_with("https-example-com-ep-1-"));
    }

    #[test]
    fn test_build_args_keep_output_inside_dest_dir() {
        let acquirer = CommandAcquirer::new(AcquisitionConfig {
            args: vec!["-o".to_string(), "{output}".to_string()],
            ..AcquisitionConfig::default()
        });
        let source = SourceConfig::new("ch1", "Channel One", "https://example.com/feed");
        let dest = Path::new("/srv/archive/ch1");

        for id in ["../../../etc/evil", "https://example.com/ep/1"] {
            let args = acquirer.build_args(&source, &item(id), dest);
            let output = Path::new(&args[1]);
            assert_eq!(output.parent(), Some(dest), "{}", args[1]);
            let name = output.file_name().unwrap().to_str().unwrap();
            assert_eq!(name, format!("{}.%(ext)s", artifact_stem(id)));
        }
    }

    #[tokio::test]
    async fn test_locate_artifact_uses_the_encoded_stem() {
        let dir = tempfile::tempdir().unwrap();
        let id = "https://example.com/ep/1";
        let path = dir.path().join(format!("{}.mp3", artifact_stem(id)));
        std::fs::write(&path, b"audio").unwrap();

        let found = CommandAcquirer::locate_artifact(id, dir.path()).await.unwrap();
        assert_eq!(found, path);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_command_reports_exit() {
        let dir = tempfile::tempdir().unwrap();
        let acquirer = CommandAcquirer::new(AcquisitionConfig {
            program: "false".to_string(),
            args: Vec::new(),
            ..AcquisitionConfig::default()
        });
        let source = SourceConfig::new("ch1", "Channel One", "https://example.com/feed");

        let err = acquirer.acquire(&source, &item("abc"), dir.path()).await.unwrap_err();
        assert!(matches!(err, AcquisitionError::Exit { .. }));
    }
}
