//! Synthetic events for manual overlay testing.

use serde_json::json;

use crate::types::{EventKind, RelayEvent};

pub const TEST_AVATAR_URL: &str = "https://i.imgur.com/0Z8FQmT.png";

/// Canned event of `kind` addressed to `tenant_token`.
pub fn synthetic_event(tenant_token: &str, kind: EventKind) -> RelayEvent {
    let (actor_id, actor_name, payload) = match kind {
        EventKind::Like => ("AAA", "TapTester", json!({ "likes": 1 })),
        EventKind::Follow => ("BBB", "FollowTester", json!({})),
        EventKind::Join => ("CCC", "JoinTester", json!({})),
        EventKind::Gift => (
            "DDD",
            "GiftTester",
            json!({ "giftName": "Test", "repeatEnd": true }),
        ),
        EventKind::Chat => ("EEE", "ChatTester", json!({ "comment": "test message" })),
        EventKind::Share => ("FFF", "ShareTester", json!({})),
        EventKind::ViewerCount => ("GGG", "ViewerTester", json!({ "viewerCount": 100 })),
        EventKind::Custom => ("HHH", "CustomTester", json!({ "test": true })),
    };
    RelayEvent {
        tenant_token: tenant_token.to_owned(),
        kind,
        actor_id: actor_id.to_owned(),
        actor_name: actor_name.to_owned(),
        payload,
        avatar_url: Some(TEST_AVATAR_URL.to_owned()),
    }
}
