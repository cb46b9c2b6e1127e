use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

// ─── Tenant ──────────────────────────────────────────────────────

/// A configured viewer group bound to one upstream source.
///
/// Built from static configuration at startup and never mutated afterwards.
/// `tiktokUser` is accepted as an alias of `sourceId` so existing
/// `USERS_JSON`-style tenant lists load unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tenant {
    pub token: String,
    #[serde(alias = "tiktokUser", alias = "source_id")]
    pub source_id: String,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl Tenant {
    pub fn new(token: impl Into<String>, source_id: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            source_id: source_id.into(),
            active: true,
        }
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }
}

// ─── Event Kind ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventKind {
    Like,
    Follow,
    Gift,
    Join,
    Chat,
    Share,
    ViewerCount,
    Custom,
}

impl EventKind {
    pub const ALL: [Self; 8] = [
        Self::Like,
        Self::Follow,
        Self::Gift,
        Self::Join,
        Self::Chat,
        Self::Share,
        Self::ViewerCount,
        Self::Custom,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Like => "like",
            Self::Follow => "follow",
            Self::Gift => "gift",
            Self::Join => "join",
            Self::Chat => "chat",
            Self::Share => "share",
            Self::ViewerCount => "viewerCount",
            Self::Custom => "custom",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| CoreError::UnknownEventKind(s.to_owned()))
    }
}

// ─── Relay Event ─────────────────────────────────────────────────

/// Normalized envelope delivered to every viewer of a tenant.
///
/// Produced per upstream emission and never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayEvent {
    pub tenant_token: String,
    pub kind: EventKind,
    pub actor_id: String,
    pub actor_name: String,
    pub payload: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

impl RelayEvent {
    /// Caller-supplied event outside the upstream vocabulary (webhooks).
    pub fn custom(tenant_token: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            tenant_token: tenant_token.into(),
            kind: EventKind::Custom,
            actor_id: String::new(),
            actor_name: String::new(),
            payload,
            avatar_url: None,
        }
    }

    /// Serialize to the JSON text frame sent to viewers.
    pub fn to_frame(&self) -> Result<String, CoreError> {
        Ok(serde_json::to_string(self)?)
    }
}
