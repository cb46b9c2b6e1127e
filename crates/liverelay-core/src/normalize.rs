//! Translation from upstream event names and payloads to [`RelayEvent`].

use serde_json::{Value, json};

use crate::payload::UpstreamPayload;
use crate::types::{EventKind, RelayEvent};

/// Map an upstream event name to the relay vocabulary.
///
/// Returns `None` for names the relay does not forward (including the
/// `error`/`disconnected` control signals, which never reach viewers).
pub fn event_kind_for(name: &str) -> Option<EventKind> {
    match name {
        "like" | "tap" => Some(EventKind::Like),
        "follow" => Some(EventKind::Follow),
        "gift" => Some(EventKind::Gift),
        "member" | "join" => Some(EventKind::Join),
        "chat" => Some(EventKind::Chat),
        "share" => Some(EventKind::Share),
        "viewerCount" | "viewer" | "roomUser" => Some(EventKind::ViewerCount),
        _ => None,
    }
}

/// Kind-specific part of the envelope.
pub fn kind_payload(kind: EventKind, payload: &UpstreamPayload) -> Value {
    match kind {
        EventKind::Like => json!({ "likes": payload.like_count.unwrap_or(1) }),
        EventKind::Gift => json!({
            "giftName": payload.gift_name.as_deref().unwrap_or_default(),
            "repeatEnd": payload.repeat_end.as_ref().is_some_and(|f| f.as_bool()),
        }),
        EventKind::Chat => json!({ "comment": payload.comment.as_deref().unwrap_or_default() }),
        EventKind::ViewerCount => json!({ "viewerCount": payload.viewer_count.unwrap_or(0) }),
        EventKind::Follow | EventKind::Join | EventKind::Share | EventKind::Custom => json!({}),
    }
}

/// Build the envelope for one upstream emission.
pub fn normalize(
    tenant_token: &str,
    kind: EventKind,
    payload: &UpstreamPayload,
    avatar_url: Option<String>,
) -> RelayEvent {
    RelayEvent {
        tenant_token: tenant_token.to_owned(),
        kind,
        actor_id: payload.actor_id().to_owned(),
        actor_name: payload.actor_name().to_owned(),
        payload: kind_payload(kind, payload),
        avatar_url,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(v: Value) -> UpstreamPayload {
        UpstreamPayload::from_value(&v).unwrap()
    }

    #[test]
    fn upstream_names_map_to_kinds() {
        assert_eq!(event_kind_for("member"), Some(EventKind::Join));
        assert_eq!(event_kind_for("viewer"), Some(EventKind::ViewerCount));
        assert_eq!(event_kind_for("like"), Some(EventKind::Like));
        assert_eq!(event_kind_for("error"), None);
        assert_eq!(event_kind_for("disconnected"), None);
        assert_eq!(event_kind_for("streamEnd"), None);
    }

    #[test]
    fn like_envelope_carries_like_count() {
        let p = payload(json!({"uniqueId": "userA", "nickname": "A", "likeCount": 1}));
        let ev = normalize("T1", EventKind::Like, &p, Some("https://cdn/a.png".into()));
        assert_eq!(ev.tenant_token, "T1");
        assert_eq!(ev.kind, EventKind::Like);
        assert_eq!(ev.actor_id, "userA");
        assert_eq!(ev.actor_name, "A");
        assert_eq!(ev.payload, json!({"likes": 1}));
        assert_eq!(ev.avatar_url.as_deref(), Some("https://cdn/a.png"));
    }

    #[test]
    fn gift_envelope_normalizes_repeat_end() {
        let p = payload(json!({"uniqueId": "g", "giftName": "Rose", "repeatEnd": 1}));
        let ev = normalize("T", EventKind::Gift, &p, None);
        assert_eq!(ev.payload, json!({"giftName": "Rose", "repeatEnd": true}));
    }

    #[test]
    fn chat_and_viewer_count_payloads() {
        let p = payload(json!({"comment": "hi", "viewerCount": 42}));
        assert_eq!(kind_payload(EventKind::Chat, &p), json!({"comment": "hi"}));
        assert_eq!(kind_payload(EventKind::ViewerCount, &p), json!({"viewerCount": 42}));
    }

    #[test]
    fn identity_only_kinds_have_empty_payload() {
        let p = payload(json!({"uniqueId": "f", "likeCount": 3}));
        for kind in [EventKind::Follow, EventKind::Join, EventKind::Share] {
            assert_eq!(kind_payload(kind, &p), json!({}));
        }
    }
}
