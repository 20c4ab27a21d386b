//! Push payloads and system notifications.

use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::config::NotificationDefaults;
use crate::error::{Result, ServiceWorkerError};

/// A button on a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationAction {
    pub action: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

/// JSON body of a server push.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushPayload {
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub badge: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub data: Option<JsonValue>,
    #[serde(default)]
    pub actions: Option<Vec<NotificationAction>>,
    #[serde(default)]
    pub require_interaction: Option<bool>,
    #[serde(default)]
    pub silent: Option<bool>,
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub vibrate: Option<Vec<u32>>,
}

impl PushPayload {
    /// Decode the raw push body.
    pub fn parse(data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data).map_err(|e| ServiceWorkerError::InvalidPayload(e.to_string()))
    }
}

/// A notification as displayed, with every optional field resolved.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub tag: String,
    pub title: String,
    pub body: Option<String>,
    pub icon: String,
    pub badge: String,
    pub image: Option<String>,
    pub data: JsonValue,
    pub actions: Vec<NotificationAction>,
    pub require_interaction: bool,
    pub silent: bool,
    pub vibrate: Vec<u32>,
}

impl Notification {
    /// Fill in defaults for everything the payload left out.
    pub fn from_payload(payload: PushPayload, defaults: &NotificationDefaults) -> Self {
        Self {
            tag: payload.tag.unwrap_or_else(next_tag),
            title: payload.title,
            body: payload.body,
            icon: payload.icon.unwrap_or_else(|| defaults.icon.clone()),
            badge: payload.badge.unwrap_or_else(|| defaults.badge.clone()),
            image: payload.image,
            data: payload.data.unwrap_or(JsonValue::Null),
            actions: payload.actions.unwrap_or_default(),
            require_interaction: payload.require_interaction.unwrap_or(false),
            silent: payload.silent.unwrap_or(false),
            vibrate: payload.vibrate.unwrap_or_else(|| defaults.vibrate.clone()),
        }
    }

    /// `data.url`, the page a click should lead to.
    pub fn target_url(&self) -> Option<&str> {
        self.data.get("url").and_then(JsonValue::as_str)
    }
}

/// A click on a displayed notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationClick {
    pub tag: String,
    /// Which action button was pressed, if any.
    pub action: Option<String>,
}

/// Currently displayed notifications, keyed by tag.
#[derive(Debug, Default)]
pub struct Notifications {
    shown: IndexMap<String, Notification>,
}

impl Notifications {
    pub fn new() -> Self {
        Self::default()
    }

    /// Display a notification, replacing any with the same tag.
    pub fn show(&mut self, notification: Notification) {
        self.shown.shift_remove(&notification.tag);
        self.shown.insert(notification.tag.clone(), notification);
    }

    /// Close and return a notification.
    pub fn close(&mut self, tag: &str) -> Option<Notification> {
        self.shown.shift_remove(tag)
    }

    pub fn get(&self, tag: &str) -> Option<&Notification> {
        self.shown.get(tag)
    }

    /// Displayed notifications, oldest first.
    pub fn active(&self) -> Vec<&Notification> {
        self.shown.values().collect()
    }
}

fn next_tag() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    format!("notification-{}", COUNTER.fetch_add(1, Ordering::Relaxed))
}
