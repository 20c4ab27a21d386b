//! Worker configuration.
//!
//! One immutable [`SwConfig`] value is built before the worker starts and
//! shared by every handler. All fields have defaults matching the
//! production deployment, so an empty JSON object is a valid config.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Result, ServiceWorkerError};
use crate::generation::StoreKind;

/// Freshness horizon and size ceiling for one store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachePolicy {
    /// Entries whose `date` header is older than this are stale.
    pub ttl_secs: u64,
    /// Hard ceiling on entry count.
    pub max_entries: usize,
}

impl CachePolicy {
    pub const fn new(ttl_secs: u64, max_entries: usize) -> Self {
        Self {
            ttl_secs,
            max_entries,
        }
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

const DAY: u64 = 24 * 60 * 60;

/// Per-store policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyTable {
    pub static_assets: CachePolicy,
    pub dynamic: CachePolicy,
    pub images: CachePolicy,
    pub api: CachePolicy,
}

impl Default for PolicyTable {
    fn default() -> Self {
        Self {
            static_assets: CachePolicy::new(30 * DAY, 50),
            dynamic: CachePolicy::new(7 * DAY, 100),
            images: CachePolicy::new(30 * DAY, 200),
            api: CachePolicy::new(5 * 60, 50),
        }
    }
}

impl PolicyTable {
    pub fn for_kind(&self, kind: StoreKind) -> CachePolicy {
        match kind {
            StoreKind::Static => self.static_assets,
            StoreKind::Dynamic => self.dynamic,
            StoreKind::Image => self.images,
            StoreKind::Api => self.api,
        }
    }

    fn iter(&self) -> impl Iterator<Item = (StoreKind, CachePolicy)> + '_ {
        StoreKind::ALL.into_iter().map(|k| (k, self.for_kind(k)))
    }
}

/// One way a URL can identify a backend API call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ApiPattern {
    /// Path starts with this prefix, e.g. `/api/`.
    PathPrefix(String),
    /// Hostname contains this fragment, e.g. the backend provider's domain.
    HostContains(String),
    /// Some path segment equals this, e.g. `rest` in `/rest/v1/lojas`.
    PathSegment(String),
}

impl ApiPattern {
    pub fn matches(&self, url: &Url) -> bool {
        match self {
            ApiPattern::PathPrefix(prefix) => url.path().starts_with(prefix.as_str()),
            ApiPattern::HostContains(fragment) => url
                .host_str()
                .is_some_and(|host| host.contains(fragment.as_str())),
            ApiPattern::PathSegment(segment) => url
                .path_segments()
                .is_some_and(|mut segments| segments.any(|s| s == segment)),
        }
    }
}

/// Defaults applied to push notifications that omit optional fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationDefaults {
    pub icon: String,
    pub badge: String,
    pub vibrate: Vec<u32>,
}

impl Default for NotificationDefaults {
    fn default() -> Self {
        Self {
            icon: "/icons/icon-192x192.png".to_string(),
            badge: "/icons/icon-72x72.png".to_string(),
            vibrate: vec![100, 50, 100],
        }
    }
}

/// Service worker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SwConfig {
    /// Origin the worker is registered on. Relative paths resolve against it.
    pub origin: Url,

    /// Prefix of every store name.
    pub cache_prefix: String,

    /// Generation tag embedded in every store name.
    pub version: String,

    /// Paths fetched into the static store at install time.
    pub precache: Vec<String>,

    /// Page served to navigations when everything else fails.
    pub offline_page: String,

    /// SPA shell served to navigations when the network is down.
    pub root_document: String,

    pub policies: PolicyTable,

    /// Extensions (without dot) routed to the static store.
    pub static_extensions: Vec<String>,

    /// Extensions (without dot) routed to the image store.
    pub image_extensions: Vec<String>,

    /// Any match routes the request to the API store.
    pub api_patterns: Vec<ApiPattern>,

    pub notifications: NotificationDefaults,
}

impl Default for SwConfig {
    fn default() -> Self {
        Self {
            origin: Url::parse("http://localhost:5173/").expect("static origin is valid"),
            cache_prefix: "fleet".to_string(),
            version: "v1".to_string(),
            precache: vec![
                "/".to_string(),
                "/index.html".to_string(),
                "/manifest.json".to_string(),
                "/offline.html".to_string(),
            ],
            offline_page: "/offline.html".to_string(),
            root_document: "/".to_string(),
            policies: PolicyTable::default(),
            static_extensions: ["js", "mjs", "css", "woff", "woff2", "ttf", "eot", "otf"]
                .map(String::from)
                .to_vec(),
            image_extensions: ["png", "jpg", "jpeg", "gif", "webp", "avif", "svg", "ico"]
                .map(String::from)
                .to_vec(),
            api_patterns: vec![
                ApiPattern::PathPrefix("/api/".to_string()),
                ApiPattern::HostContains("supabase.co".to_string()),
                ApiPattern::PathSegment("rest".to_string()),
            ],
            notifications: NotificationDefaults::default(),
        }
    }
}

impl SwConfig {
    /// Parse from a JSON document and validate.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: SwConfig =
            serde_json::from_str(json).map_err(|e| ServiceWorkerError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read a JSON file and validate.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            ServiceWorkerError::Config(format!("reading {}: {e}", path.display()))
        })?;
        Self::from_json_str(&json)
    }

    /// Check invariants the engine relies on.
    pub fn validate(&self) -> Result<()> {
        if self.version.trim().is_empty() {
            return Err(ServiceWorkerError::Config("version must not be empty".into()));
        }
        if self.cache_prefix.trim().is_empty() {
            return Err(ServiceWorkerError::Config(
                "cache_prefix must not be empty".into(),
            ));
        }
        for (kind, policy) in self.policies.iter() {
            if policy.max_entries == 0 {
                return Err(ServiceWorkerError::Config(format!(
                    "{} store max_entries must be at least 1",
                    kind.as_str()
                )));
            }
        }
        if !self.precache.iter().any(|p| p == &self.offline_page) {
            return Err(ServiceWorkerError::Config(format!(
                "offline page {} is not in the precache list",
                self.offline_page
            )));
        }
        Ok(())
    }

    /// Resolve a path (or absolute URL) against the origin.
    pub fn resolve(&self, path: &str) -> Result<Url> {
        self.origin
            .join(path)
            .map_err(|e| ServiceWorkerError::Config(format!("{path}: {e}")))
    }
}
