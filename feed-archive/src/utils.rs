/// Slug helpers for source ids and labels
pub mod slug {
    /// Lowercase ASCII slug: alphanumerics kept, every other run becomes `-`.
    pub fn slugify(text: &str) -> String {
        let mut slug = String::with_capacity(text.len());
        let mut pending_dash = false;
        for c in text.chars() {
            if c.is_ascii_alphanumeric() {
                if pending_dash && !slug.is_empty() {
                    slug.push('-');
                }
                pending_dash = false;
                slug.push(c.to_ascii_lowercase());
            } else {
                pending_dash = true;
            }
        }
        if slug.is_empty() {
            "source".to_string()
        } else {
            slug
        }
    }
}

/// URL utilities for published documents
pub mod url {
    use url::{ParseError, Url};

    /// Percent-encode a root-relative path so it can be used as a relative URL.
    pub fn encode_path(relative: &str) -> Result<String, ParseError> {
        // `set_path` escapes everything that may not appear in a URL path,
        // including `?` and `#`.
        let mut scratch = Url::parse("file:///")?;
        scratch.set_path(relative);
        Ok(scratch.path().trim_start_matches('/').to_string())
    }

    /// Resolve a root-relative path either against `base` or as a relative URL.
    pub fn resolve(base: Option<&Url>, relative: &str) -> Result<String, ParseError> {
        let encoded = encode_path(relative)?;
        match base {
            Some(base) => Ok(directory_url(base).join(&encoded)?.to_string()),
            None => Ok(encoded),
        }
    }

    /// `base` with a trailing slash, so joins append instead of replacing the last segment.
    pub fn directory_url(base: &Url) -> Url {
        let mut dir = base.clone();
        if !dir.path().ends_with('/') {
            let path = format!("{}/", dir.path());
            dir.set_path(&path);
        }
        dir
    }

    /// Validate a listing address
    pub fn is_valid_feed_url(url_str: &str) -> bool {
        if let Ok(url) = Url::parse(url_str) {
            url.scheme() == "http" || url.scheme() == "https" || url.scheme() == "file"
        } else {
            false
        }
    }
}

/// Time utilities for feed rendering
pub mod time {
    use chrono::{DateTime, Utc};

    pub fn format_rfc2822(time: &DateTime<Utc>) -> String {
        time.to_rfc2822()
    }

    /// `HH:MM:SS`, as podcast clients expect for `itunes:duration`.
    pub fn format_duration(total_seconds: u64) -> String {
        let hours = total_seconds / 3600;
        let minutes = (total_seconds % 3600) / 60;
        let seconds = total_seconds % 60;
        format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
    }
}
