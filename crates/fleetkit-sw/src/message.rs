//! Control messages exchanged with the hosting page.
//!
//! Wire format is JSON: `{"type": "...", "payload": {...}}`. Unknown types
//! are ignored without a reply.

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Channel the worker answers on.
pub type ReplyPort = mpsc::UnboundedSender<ControlReply>;

/// A request from the page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    /// Leave the waiting state now. No reply.
    SkipWaiting,
    /// Report every store's size and keys.
    GetCacheInfo,
    /// Delete one store, or all of them when `cache_name` is `None`.
    ClearCache { cache_name: Option<String> },
    /// Fetch each URL into the dynamic store, best effort.
    PrefetchResources { urls: Vec<String> },
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: JsonValue,
}

#[derive(Deserialize, Default)]
struct ClearCachePayload {
    #[serde(rename = "cacheName", default)]
    cache_name: Option<String>,
}

#[derive(Deserialize, Default)]
struct PrefetchPayload {
    #[serde(default)]
    urls: Vec<String>,
}

impl ControlMessage {
    /// Decode a message. `None` for unknown types and malformed input.
    pub fn parse(value: &JsonValue) -> Option<Self> {
        let envelope: Envelope = match serde_json::from_value(value.clone()) {
            Ok(envelope) => envelope,
            Err(e) => {
                debug!(error = %e, "Ignoring malformed control message");
                return None;
            }
        };

        let message = match envelope.kind.as_str() {
            "SKIP_WAITING" => Self::SkipWaiting,
            "GET_CACHE_INFO" => Self::GetCacheInfo,
            "CLEAR_CACHE" => {
                let payload: ClearCachePayload = payload_or_default(envelope.payload)?;
                Self::ClearCache {
                    cache_name: payload.cache_name,
                }
            }
            "PREFETCH_RESOURCES" => {
                let payload: PrefetchPayload = payload_or_default(envelope.payload)?;
                Self::PrefetchResources { urls: payload.urls }
            }
            other => {
                trace!(kind = other, "Ignoring unknown control message");
                return None;
            }
        };
        Some(message)
    }
}

fn payload_or_default<T: for<'de> Deserialize<'de> + Default>(payload: JsonValue) -> Option<T> {
    if payload.is_null() {
        return Some(T::default());
    }
    match serde_json::from_value(payload) {
        Ok(parsed) => Some(parsed),
        Err(e) => {
            debug!(error = %e, "Ignoring control message with bad payload");
            None
        }
    }
}

/// Size and keys of one store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheInfo {
    pub size: usize,
    pub urls: Vec<String>,
}

/// A reply to the page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlReply {
    CacheInfo(HashMap<String, CacheInfo>),
    CacheCleared,
    PrefetchComplete,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_known_messages() {
        assert_eq!(
            ControlMessage::parse(&json!({"type": "SKIP_WAITING"})),
            Some(ControlMessage::SkipWaiting)
        );
        assert_eq!(
            ControlMessage::parse(&json!({"type": "GET_CACHE_INFO"})),
            Some(ControlMessage::GetCacheInfo)
        );
        assert_eq!(
            ControlMessage::parse(
                &json!({"type": "CLEAR_CACHE", "payload": {"cacheName": "fleet-api-v1"}})
            ),
            Some(ControlMessage::ClearCache {
                cache_name: Some("fleet-api-v1".into())
            })
        );
        assert_eq!(
            ControlMessage::parse(
                &json!({"type": "PREFETCH_RESOURCES", "payload": {"urls": ["/a", "/b"]}})
            ),
            Some(ControlMessage::PrefetchResources {
                urls: vec!["/a".into(), "/b".into()]
            })
        );
    }

    #[test]
    fn test_clear_cache_without_payload_clears_all() {
        assert_eq!(
            ControlMessage::parse(&json!({"type": "CLEAR_CACHE"})),
            Some(ControlMessage::ClearCache { cache_name: None })
        );
        assert_eq!(
            ControlMessage::parse(&json!({"type": "CLEAR_CACHE", "payload": {}})),
            Some(ControlMessage::ClearCache { cache_name: None })
        );
    }

    #[test]
    fn test_unknown_and_malformed_are_ignored() {
        assert_eq!(ControlMessage::parse(&json!({"type": "RELOAD_ALL"})), None);
        assert_eq!(ControlMessage::parse(&json!({"kind": "SKIP_WAITING"})), None);
        assert_eq!(ControlMessage::parse(&json!("SKIP_WAITING")), None);
        assert_eq!(
            ControlMessage::parse(&json!({"type": "PREFETCH_RESOURCES", "payload": {"urls": 3}})),
            None
        );
    }

    #[test]
    fn test_reply_wire_format() {
        assert_eq!(
            serde_json::to_value(ControlReply::CacheCleared).unwrap(),
            json!({"type": "CACHE_CLEARED"})
        );
        assert_eq!(
            serde_json::to_value(ControlReply::PrefetchComplete).unwrap(),
            json!({"type": "PREFETCH_COMPLETE"})
        );

        let mut stores = HashMap::new();
        stores.insert(
            "fleet-static-v1".to_string(),
            CacheInfo {
                size: 1,
                urls: vec!["http://localhost:5173/".into()],
            },
        );
        assert_eq!(
            serde_json::to_value(ControlReply::CacheInfo(stores)).unwrap(),
            json!({
                "type": "CACHE_INFO",
                "payload": {"fleet-static-v1": {"size": 1, "urls": ["http://localhost:5173/"]}}
            })
        );
    }
}
