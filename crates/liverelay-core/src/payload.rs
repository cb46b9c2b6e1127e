//! Known shapes of upstream event payloads.
//!
//! Upstream payloads are loosely typed: the same field can arrive as a string,
//! a list of strings or an object carrying a URL list. [`UpstreamPayload`]
//! covers every shape the relay reads and ignores the rest.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Avatar used when neither the payload nor the cache has a usable URL.
pub const FALLBACK_AVATAR_URL: &str = "https://i.imgur.com/3yaf2ZQ.png";

/// Shorter strings are placeholders, not URLs.
const MIN_AVATAR_URL_LEN: usize = 6;

/// A URL-bearing field in any of its observed encodings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UrlField {
    One(String),
    Many(Vec<String>),
    Listed {
        #[serde(rename = "urlList", alias = "url_list", alias = "url")]
        url_list: Vec<String>,
    },
    Other(serde_json::Value),
}

impl UrlField {
    pub fn first(&self) -> Option<&str> {
        match self {
            Self::One(url) => Some(url.as_str()),
            Self::Many(urls) | Self::Listed { url_list: urls } => {
                urls.first().map(String::as_str)
            }
            Self::Other(_) => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfilePicture {
    pub url: Option<UrlField>,
    pub thumb: Option<UrlField>,
}

/// Boolean that some producers encode as 0/1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Flag {
    Bool(bool),
    Int(i64),
    Other(serde_json::Value),
}

impl Flag {
    pub fn as_bool(&self) -> bool {
        match self {
            Self::Bool(b) => *b,
            Self::Int(n) => *n != 0,
            Self::Other(_) => false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UpstreamPayload {
    pub unique_id: Option<String>,
    pub nickname: Option<String>,
    pub like_count: Option<u64>,
    pub gift_name: Option<String>,
    pub repeat_end: Option<Flag>,
    pub comment: Option<String>,
    pub viewer_count: Option<u64>,
    pub profile_picture_url: Option<String>,
    pub profile_picture: Option<ProfilePicture>,
    pub avatar_thumb: Option<UrlField>,
    pub avatar_medium: Option<UrlField>,
}

impl UpstreamPayload {
    pub fn from_value(value: &serde_json::Value) -> Result<Self, CoreError> {
        Ok(Self::deserialize(value)?)
    }

    pub fn actor_id(&self) -> &str {
        self.unique_id.as_deref().unwrap_or_default()
    }

    /// Display name, falling back to the unique id.
    pub fn actor_name(&self) -> &str {
        self.nickname
            .as_deref()
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| self.actor_id())
    }

    /// Avatar candidates in priority order.
    pub fn avatar_candidates(&self) -> impl Iterator<Item = &str> {
        let picture = self.profile_picture.as_ref();
        [
            self.profile_picture_url.as_deref(),
            picture.and_then(|p| p.url.as_ref()).and_then(UrlField::first),
            picture.and_then(|p| p.thumb.as_ref()).and_then(UrlField::first),
            self.avatar_thumb.as_ref().and_then(UrlField::first),
            self.avatar_medium.as_ref().and_then(UrlField::first),
        ]
        .into_iter()
        .flatten()
    }

    /// Highest-priority candidate that looks like a real URL.
    pub fn usable_avatar(&self) -> Option<&str> {
        self.avatar_candidates()
            .find(|url| url.len() >= MIN_AVATAR_URL_LEN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(v: serde_json::Value) -> UpstreamPayload {
        UpstreamPayload::from_value(&v).unwrap()
    }

    #[test]
    fn reads_common_fields_and_ignores_unknown_ones() {
        let p = parse(json!({
            "uniqueId": "alice",
            "nickname": "Alice",
            "likeCount": 7,
            "totalLikeCount": 900,
            "followRole": 1
        }));
        assert_eq!(p.actor_id(), "alice");
        assert_eq!(p.actor_name(), "Alice");
        assert_eq!(p.like_count, Some(7));
    }

    #[test]
    fn actor_name_falls_back_to_unique_id() {
        let p = parse(json!({"uniqueId": "bob", "nickname": ""}));
        assert_eq!(p.actor_name(), "bob");
    }

    #[test]
    fn profile_picture_url_wins() {
        let p = parse(json!({
            "profilePictureUrl": "https://cdn/a.jpg",
            "avatarThumb": "https://cdn/b.jpg"
        }));
        assert_eq!(p.usable_avatar(), Some("https://cdn/a.jpg"));
    }

    #[test]
    fn nested_url_list_shapes_are_understood() {
        let p = parse(json!({"profilePicture": {"url": ["https://cdn/list.jpg", "x"]}}));
        assert_eq!(p.usable_avatar(), Some("https://cdn/list.jpg"));

        let p = parse(json!({"avatarThumb": {"urlList": ["https://cdn/thumb.webp"]}}));
        assert_eq!(p.usable_avatar(), Some("https://cdn/thumb.webp"));

        let p = parse(json!({"profilePicture": {"thumb": "https://cdn/t.png"}}));
        assert_eq!(p.usable_avatar(), Some("https://cdn/t.png"));
    }

    #[test]
    fn short_candidates_are_skipped() {
        let p = parse(json!({
            "profilePictureUrl": "none",
            "avatarMedium": "https://cdn/m.png"
        }));
        assert_eq!(p.usable_avatar(), Some("https://cdn/m.png"));

        let p = parse(json!({"profilePictureUrl": "x"}));
        assert_eq!(p.usable_avatar(), None);
    }

    #[test]
    fn unexpected_field_shapes_do_not_fail_decoding() {
        let p = parse(json!({"uniqueId": "c", "avatarThumb": {"weird": true}}));
        assert_eq!(p.usable_avatar(), None);
    }

    #[test]
    fn repeat_end_accepts_numbers() {
        assert_eq!(parse(json!({"repeatEnd": 1})).repeat_end.map(|f| f.as_bool()), Some(true));
        assert_eq!(parse(json!({"repeatEnd": false})).repeat_end.map(|f| f.as_bool()), Some(false));
        assert_eq!(parse(json!({"repeatEnd": "yes"})).repeat_end.map(|f| f.as_bool()), Some(false));
    }

    #[test]
    fn non_object_payload_is_an_error() {
        assert!(UpstreamPayload::from_value(&json!("text")).is_err());
    }
}
