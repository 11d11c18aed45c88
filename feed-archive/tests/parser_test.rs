mod common;

use common::{init_tracing, source};
use feed_archive::{Fetcher, FetchConfig, ListingFetch, ListingParser};

const YOUTUBE_ATOM: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns:yt="http://www.youtube.com/xml/schemas/2015" xmlns:media="http://search.yahoo.com/mrss/" xmlns="http://www.w3.org/2005/Atom">
  <title>Channel One</title>
  <entry>
    <id>yt:video:newest01</id>
    <yt:videoId>newest01</yt:videoId>
    <title>Newest upload</title>
    <link rel="alternate" href="https://www.youtube.com/watch?v=newest01"/>
    <published>2024-03-02T12:00:00+00:00</published>
    <updated>2024-03-02T13:00:00+00:00</updated>
    <media:group>
      <media:title>Newest upload</media:title>
      <media:thumbnail url="https://i.ytimg.com/vi/newest01/hqdefault.jpg" width="480" height="360"/>
      <media:description>Talking about things.</media:description>
    </media:group>
  </entry>
  <entry>
    <id>yt:video:older02</id>
    <title>Older upload</title>
    <link rel="alternate" href="https://www.youtube.com/watch?v=older02"/>
    <published>2024-03-01T12:00:00+00:00</published>
  </entry>
  <entry>
    <id>yt:video:newest01</id>
    <title>Repeated</title>
    <link rel="alternate" href="https://www.youtube.com/watch?v=newest01"/>
    <published>2024-03-02T12:00:00+00:00</published>
  </entry>
  <entry>
    <id>yt:video:nolink03</id>
    <title>No link</title>
    <published>2024-02-28T12:00:00+00:00</published>
  </entry>
</feed>"#;

#[test]
fn test_parse_youtube_listing() {
    init_tracing();
    let items = ListingParser::new().parse_listing(YOUTUBE_ATOM.as_bytes()).unwrap();

    let ids: Vec<_> = items.iter().map(|item| item.id.as_str()).collect();
    assert_eq!(ids, vec!["newest01", "older02"]);

    let newest = &items[0];
    assert_eq!(newest.title, "Newest upload");
    assert_eq!(newest.url, "https://www.youtube.com/watch?v=newest01");
    assert_eq!(newest.published_at, common::ts("2024-03-02T12:00:00Z"));
    assert_eq!(newest.description.as_deref(), Some("Talking about things."));
    let media = newest.media.as_ref().unwrap();
    assert_eq!(
        media.thumbnail_url.as_deref(),
        Some("https://i.ytimg.com/vi/newest01/hqdefault.jpg")
    );
    assert_eq!(media.width, Some(480));

    assert_eq!(items[1].description, None);
    assert_eq!(items[1].media, None);
}

#[test]
fn test_parse_rejects_non_feed() {
    init_tracing();
    assert!(ListingParser::new().parse_listing(b"<html><body>nope</body></html>").is_err());
    assert!(!ListingParser::is_valid_listing_content("<html></html>"));
    assert!(ListingParser::is_valid_listing_content(YOUTUBE_ATOM));
}

#[tokio::test]
async fn test_fetcher_reads_file_urls() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("listing.xml");
    std::fs::write(&path, YOUTUBE_ATOM).unwrap();

    let fetcher = Fetcher::new(FetchConfig::default()).unwrap();
    let url = url::Url::from_file_path(&path).unwrap();
    let mut ch1 = source("ch1", "Channel One");
    ch1.listing_url = url.to_string();

    let items = fetcher.fetch_listing(&ch1).await.unwrap();
    assert_eq!(items.len(), 2);
}
