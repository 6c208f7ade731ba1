//! # Model
//! Value types carried through the webhook pipeline: the channel that
//! published, the video itself, and the kind of notification it produced.
//!
//! Everything here is rebuilt from each delivery; nothing is cached across
//! deliveries except the video ID kept by the history store.

use std::fmt;

use chrono::{DateTime, SubsecRound, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::NotifierError;

/// Reserved scope key meaning "every channel" in the listener registry.
pub const WILDCARD_CHANNEL: &str = "*";

static CHANNEL_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,64}$").expect("channel id regex"));

/// Kind of a push notification.
///
/// `Any` only ever appears as a registry key; a delivered video is always
/// classified `Upload` or `Edit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Upload,
    Edit,
    Any,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Upload => "upload",
            NotificationKind::Edit => "edit",
            NotificationKind::Any => "any",
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub id: String,
    pub name: String,
    pub url: String,
    /// Only known when the feed carries its own `published` date.
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thumbnail {
    pub url: String,
    pub width: u32,
    pub height: u32,
}

/// Likes and views. Uploaders can hide both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    pub likes: u64,
    pub views: u64,
}

/// Publication timestamps of a video, truncated to whole seconds (UTC).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timestamp {
    pub published: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

impl Timestamp {
    pub fn new(published: DateTime<Utc>, updated: DateTime<Utc>) -> Self {
        Self {
            published: published.trunc_subsecs(0),
            updated: updated.trunc_subsecs(0),
        }
    }

    /// `published == updated` is what a first publication looks like.
    pub fn is_first_publication(&self) -> bool {
        self.published == self.updated
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Video {
    pub id: String,
    pub title: String,
    /// Empty when the delivery has no `media:group`.
    pub description: String,
    pub url: String,
    pub thumbnail: Option<Thumbnail>,
    pub stats: Option<Stats>,
    pub timestamp: Timestamp,
    pub channel: Channel,
}

/// Parse a feed timestamp such as `2015-04-01T19:05:24.552394234+00:00`.
/// Fractional seconds of any precision are accepted and dropped.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc).trunc_subsecs(0))
}

/// Channel IDs double as history filenames, so only a conservative
/// alphabet is accepted.
pub fn validate_channel_id(id: &str) -> Result<(), NotifierError> {
    if id == WILDCARD_CHANNEL {
        return Err(NotifierError::InvalidArgument(format!(
            "channel id cannot be the reserved '{WILDCARD_CHANNEL}'"
        )));
    }
    if !CHANNEL_ID_RE.is_match(id) {
        return Err(NotifierError::InvalidArgument(format!(
            "malformed channel id: {id:?}"
        )));
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use chrono::TimeZone;

    pub fn channel(id: &str) -> Channel {
        Channel {
            id: id.to_string(),
            name: "Mock Channel".to_string(),
            url: format!("https://www.youtube.com/channel/{id}"),
            created_at: None,
        }
    }

    pub fn video(id: &str, channel_id: &str, edited: bool) -> Video {
        let published = Utc.with_ymd_and_hms(2023, 1, 1, 12, 0, 0).unwrap();
        let updated = if edited {
            Utc.with_ymd_and_hms(2023, 1, 1, 13, 0, 0).unwrap()
        } else {
            published
        };
        Video {
            id: id.to_string(),
            title: "Mock Video".to_string(),
            description: String::new(),
            url: format!("https://www.youtube.com/watch?v={id}"),
            thumbnail: None,
            stats: None,
            timestamp: Timestamp::new(published, updated),
            channel: channel(channel_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn nanosecond_timestamps_truncate_to_seconds() {
        let ts = parse_timestamp("2015-04-01T19:05:24.552394234+00:00").unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2015, 4, 1, 19, 5, 24).unwrap());
    }

    #[test]
    fn offsets_are_normalized_to_utc() {
        let ts = parse_timestamp("2015-03-06T23:40:57+02:00").unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2015, 3, 6, 21, 40, 57).unwrap());
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn same_second_counts_as_first_publication() {
        let a = parse_timestamp("2015-03-06T21:40:57.1+00:00").unwrap();
        let b = parse_timestamp("2015-03-06T21:40:57.9+00:00").unwrap();
        assert!(Timestamp::new(a, b).is_first_publication());
    }

    #[test]
    fn channel_id_alphabet() {
        assert!(validate_channel_id("UCupvZG-5ko_eiXAupbDfxWw").is_ok());
        assert!(validate_channel_id("").is_err());
        assert!(validate_channel_id("../etc/passwd").is_err());
        assert!(validate_channel_id("has space").is_err());
        assert!(matches!(
            validate_channel_id(WILDCARD_CHANNEL),
            Err(NotifierError::InvalidArgument(_))
        ));
    }
}
