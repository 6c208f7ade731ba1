//! # Atom feed decoding
//! Deserializes a pushed body with `quick_xml::de` and turns its entries
//! into [`Video`]s.
//!
//! Two failure classes are kept apart on purpose:
//! * [`FeedError::Parse`] means the bytes are not a single well-formed
//!   `<feed>` document (answered 400).
//! * [`FeedError::Missing`] / [`FeedError::Invalid`] mean the document is
//!   fine but an entry lacks a field we need (answered 500).
//!
//! The deserializer matches elements by local name, so `yt:videoId` is the
//! field `videoId` and `media:group` is `group`.

use chrono::{DateTime, Utc};
use quick_xml::de::from_str;
use quick_xml::events::Event;
use quick_xml::Reader;
use serde::Deserialize;
use thiserror::Error;

use crate::model::{parse_timestamp, Channel, Stats, Thumbnail, Timestamp, Video};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FeedError {
    #[error("malformed feed: {0}")]
    Parse(String),
    #[error("entry is missing `{0}`")]
    Missing(&'static str),
    #[error("entry has invalid `{field}`: {value:?}")]
    Invalid { field: &'static str, value: String },
}

impl FeedError {
    pub fn is_parse(&self) -> bool {
        matches!(self, FeedError::Parse(_))
    }
}

/// A deleted-entry marker: the hub telling us an item was removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tombstone {
    pub reference: Option<String>,
    pub when: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Feed {
    /// Channel creation time; absent from most hub pushes.
    published: Option<String>,
    #[serde(default, rename = "entry")]
    entries: Vec<Entry>,
    #[serde(rename = "deleted-entry")]
    deleted: Option<DeletedEntry>,
}

#[derive(Debug, Deserialize)]
struct DeletedEntry {
    #[serde(rename = "@ref")]
    reference: Option<String>,
    #[serde(rename = "@when")]
    when: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Entry {
    #[serde(rename = "videoId")]
    video_id: Option<String>,
    #[serde(rename = "channelId")]
    channel_id: Option<String>,
    title: Option<String>,
    #[serde(default, rename = "link")]
    links: Vec<Link>,
    author: Option<Author>,
    published: Option<String>,
    updated: Option<String>,
    #[serde(rename = "group")]
    media: Option<MediaGroup>,
}

#[derive(Debug, Deserialize)]
struct Link {
    #[serde(rename = "@rel")]
    rel: Option<String>,
    #[serde(rename = "@href")]
    href: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Author {
    name: Option<String>,
    uri: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MediaGroup {
    description: Option<String>,
    thumbnail: Option<MediaThumbnail>,
    /// Missing when the uploader hides likes and views.
    community: Option<Community>,
}

#[derive(Debug, Deserialize)]
struct MediaThumbnail {
    #[serde(rename = "@url")]
    url: Option<String>,
    #[serde(rename = "@width")]
    width: Option<String>,
    #[serde(rename = "@height")]
    height: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Community {
    #[serde(rename = "starRating")]
    star_rating: Option<StarRating>,
    statistics: Option<Statistics>,
}

#[derive(Debug, Deserialize)]
struct StarRating {
    #[serde(rename = "@count")]
    count: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Statistics {
    #[serde(rename = "@views")]
    views: Option<String>,
}

impl Feed {
    /// Decode `body`. Exactly one root element named `feed` is accepted.
    pub fn parse(body: &[u8]) -> Result<Self, FeedError> {
        let text = std::str::from_utf8(body).map_err(|e| FeedError::Parse(e.to_string()))?;
        check_root(text)?;
        from_str(text).map_err(|e| FeedError::Parse(e.to_string()))
    }

    pub fn tombstone(&self) -> Option<Tombstone> {
        self.deleted.as_ref().map(|d| Tombstone {
            reference: d.reference.clone(),
            when: d.when.clone(),
        })
    }

    /// Every `<entry>`, whether the feed carries one or several.
    pub fn entries(&self) -> impl Iterator<Item = &Entry> {
        self.entries.iter()
    }

    /// Build the [`Video`] `entry` describes. Any missing field fails the
    /// whole entry.
    pub fn to_video(&self, entry: &Entry) -> Result<Video, FeedError> {
        let created_at = match non_empty(&self.published) {
            Some(raw) => Some(parse_timestamp(raw).ok_or_else(|| FeedError::Invalid {
                field: "feed/published",
                value: raw.to_string(),
            })?),
            None => None,
        };
        let author = entry.author.as_ref().ok_or(FeedError::Missing("author"))?;
        let channel = Channel {
            id: entry.channel_id()?.to_string(),
            name: required(&author.name, "author/name")?.to_string(),
            url: required(&author.uri, "author/uri")?.to_string(),
            created_at,
        };

        let url = entry
            .links
            .iter()
            .find(|l| l.rel.as_deref() == Some("alternate"))
            .or_else(|| entry.links.first())
            .and_then(|l| non_empty(&l.href))
            .ok_or(FeedError::Missing("link"))?;

        let (description, thumbnail, stats) = match &entry.media {
            Some(group) => (
                non_empty(&group.description).unwrap_or_default().to_string(),
                group.thumbnail.as_ref().map(to_thumbnail).transpose()?,
                group.community.as_ref().map(to_stats).transpose()?,
            ),
            None => (String::new(), None, None),
        };

        Ok(Video {
            id: entry.video_id()?.to_string(),
            title: required(&entry.title, "title")?.to_string(),
            description,
            url: url.to_string(),
            thumbnail,
            stats,
            timestamp: Timestamp::new(
                timestamp_field(&entry.published, "published")?,
                timestamp_field(&entry.updated, "updated")?,
            ),
            channel,
        })
    }
}

impl Entry {
    pub fn channel_id(&self) -> Result<&str, FeedError> {
        required(&self.channel_id, "yt:channelId")
    }

    pub fn video_id(&self) -> Result<&str, FeedError> {
        required(&self.video_id, "yt:videoId")
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn required<'a>(value: &'a Option<String>, field: &'static str) -> Result<&'a str, FeedError> {
    non_empty(value).ok_or(FeedError::Missing(field))
}

fn number<T: std::str::FromStr>(value: &Option<String>, field: &'static str) -> Result<T, FeedError> {
    let raw = required(value, field)?;
    raw.parse().map_err(|_| FeedError::Invalid {
        field,
        value: raw.to_string(),
    })
}

fn timestamp_field(value: &Option<String>, field: &'static str) -> Result<DateTime<Utc>, FeedError> {
    let raw = required(value, field)?;
    parse_timestamp(raw).ok_or_else(|| FeedError::Invalid {
        field,
        value: raw.to_string(),
    })
}

fn to_thumbnail(t: &MediaThumbnail) -> Result<Thumbnail, FeedError> {
    Ok(Thumbnail {
        url: required(&t.url, "media:thumbnail/@url")?.to_string(),
        width: number(&t.width, "media:thumbnail/@width")?,
        height: number(&t.height, "media:thumbnail/@height")?,
    })
}

fn to_stats(c: &Community) -> Result<Stats, FeedError> {
    let rating = c
        .star_rating
        .as_ref()
        .ok_or(FeedError::Missing("media:starRating"))?;
    let statistics = c
        .statistics
        .as_ref()
        .ok_or(FeedError::Missing("media:statistics"))?;
    Ok(Stats {
        likes: number(&rating.count, "media:starRating/@count")?,
        views: number(&statistics.views, "media:statistics/@views")?,
    })
}

/// The deserializer ignores the root name and anything after the root, so
/// the document shape is checked first.
fn check_root(text: &str) -> Result<(), FeedError> {
    let mut reader = Reader::from_str(text);
    let mut depth = 0usize;
    let mut seen_root = false;

    loop {
        let event = reader.read_event().map_err(|e| {
            FeedError::Parse(format!("at byte {}: {e}", reader.buffer_position()))
        })?;
        match event {
            Event::Start(ref start) | Event::Empty(ref start) if depth == 0 => {
                if seen_root {
                    return Err(FeedError::Parse("second root element".into()));
                }
                if start.local_name().as_ref() != b"feed" {
                    return Err(FeedError::Parse(format!(
                        "expected <feed> root, found <{}>",
                        String::from_utf8_lossy(start.name().as_ref())
                    )));
                }
                seen_root = true;
                if matches!(event, Event::Start(_)) {
                    depth = 1;
                }
            }
            Event::Start(_) => depth += 1,
            // mismatched names are rejected by the reader itself
            Event::End(_) => depth = depth.saturating_sub(1),
            Event::Text(t) if depth == 0 => {
                let s = t.unescape().map_err(|e| FeedError::Parse(e.to_string()))?;
                if !s.trim().is_empty() {
                    return Err(FeedError::Parse("text outside the root element".into()));
                }
            }
            Event::CData(_) if depth == 0 => {
                return Err(FeedError::Parse("CDATA outside the root element".into()));
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if depth > 0 {
        return Err(FeedError::Parse("unclosed element".into()));
    }
    if !seen_root {
        return Err(FeedError::Parse("empty document".into()));
    }
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    const T0: &str = "2015-03-06T21:40:57+00:00";
    const T1: &str = "2015-03-09T19:05:24.552394234+00:00";

    fn only_video(body: &str) -> Result<Video, FeedError> {
        let feed = Feed::parse(body.as_bytes()).unwrap();
        let entry = feed.entries().next().unwrap();
        feed.to_video(entry)
    }

    #[test]
    fn single_entry_becomes_a_video() {
        let body = samples::entry_feed("VID1", "UC1", T0, T1);
        let feed = Feed::parse(body.as_bytes()).unwrap();
        assert!(feed.tombstone().is_none());

        let entries: Vec<_> = feed.entries().collect();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].channel_id().unwrap(), "UC1");

        let v = feed.to_video(entries[0]).unwrap();
        assert_eq!(v.id, "VID1");
        assert_eq!(v.title, "Video & title");
        assert_eq!(v.url, "http://www.youtube.com/watch?v=VID1");
        assert_eq!(v.channel.name, "Channel title");
        assert_eq!(v.channel.url, "http://www.youtube.com/channel/UC1");
        assert_eq!(v.channel.created_at, None);
        assert_eq!(v.description, "");
        assert!(v.thumbnail.is_none());
        assert!(v.stats.is_none());
        assert_eq!(
            v.timestamp.updated,
            Utc.with_ymd_and_hms(2015, 3, 9, 19, 5, 24).unwrap()
        );
        assert!(!v.timestamp.is_first_publication());
    }

    #[test]
    fn media_group_with_stats() {
        let v = only_video(&samples::media_feed("VID2", true)).unwrap();
        assert_eq!(v.description, "First line\nsecond line");
        let thumb = v.thumbnail.unwrap();
        assert_eq!(thumb.url, "https://i1.ytimg.com/vi/VID2/hqdefault.jpg");
        assert_eq!((thumb.width, thumb.height), (480, 360));
        assert_eq!(v.stats, Some(Stats { likes: 1234, views: 98765 }));
        assert_eq!(
            v.channel.created_at,
            Some(Utc.with_ymd_and_hms(2013, 7, 19, 9, 52, 49).unwrap())
        );
    }

    #[test]
    fn hidden_stats_are_none() {
        let v = only_video(&samples::media_feed("VID3", false)).unwrap();
        assert!(v.stats.is_none());
        assert!(v.thumbnail.is_some());
        assert_eq!(v.description, "First line\nsecond line");
    }

    #[test]
    fn bad_media_numbers_are_structural() {
        let body = samples::media_feed("VID4", true).replace(r#"views="98765""#, r#"views="lots""#);
        let err = only_video(&body).unwrap_err();
        assert!(matches!(err, FeedError::Invalid { field: "media:statistics/@views", .. }));
        assert!(!err.is_parse());
    }

    #[test]
    fn several_entries_are_listed_in_order() {
        let body = r#"<feed>
            <entry><yt:videoId>a</yt:videoId></entry>
            <entry><yt:videoId>b</yt:videoId></entry>
        </feed>"#;
        let feed = Feed::parse(body.as_bytes()).unwrap();
        let ids: Vec<_> = feed.entries().map(|e| e.video_id().unwrap()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn tombstone_is_detected() {
        let feed = Feed::parse(samples::TOMBSTONE.as_bytes()).unwrap();
        let t = feed.tombstone().unwrap();
        assert_eq!(t.reference.as_deref(), Some("yt:video:VIDEO_ID"));
        assert_eq!(feed.entries().count(), 0);
    }

    #[test]
    fn malformed_documents_are_parse_errors() {
        for body in [
            "",
            "not xml at all",
            "<feed><entry></feed>",
            "<feed>",
            "<feed></feed><feed></feed>",
            "<rss></rss>",
        ] {
            let err = Feed::parse(body.as_bytes()).unwrap_err();
            assert!(err.is_parse(), "{body:?} gave {err:?}");
        }
    }

    #[test]
    fn missing_fields_are_structural() {
        let body = samples::entry_feed("VID1", "UC1", T0, T1).replace("<title>Video &amp; title</title>", "");
        let err = only_video(&body).unwrap_err();
        assert_eq!(err, FeedError::Missing("title"));
        assert!(!err.is_parse());

        let err = only_video(&samples::entry_feed("VID1", "UC1", "garbage", T1)).unwrap_err();
        assert!(matches!(err, FeedError::Invalid { field: "published", .. }));
    }

    #[test]
    fn first_link_is_used_without_alternate() {
        let body = samples::entry_feed("V", "UC1", T0, T0).replace(r#"rel="alternate" "#, "");
        let v = only_video(&body).unwrap();
        assert_eq!(v.url, "http://www.youtube.com/watch?v=V");
        assert!(v.timestamp.is_first_publication());
    }
}
