//! Request classification.
//!
//! Categories are checked in a fixed order: static asset, image, API,
//! navigation, then the dynamic catch-all. The first match wins.

use std::collections::HashSet;

use fleetkit_net::{Request, RequestMode};
use http::Method;
use tracing::trace;
use url::Url;

use crate::config::{ApiPattern, SwConfig};
use crate::generation::StoreKind;

/// Which strategy and store a request is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestCategory {
    /// Scripts, styles, fonts and the precache list. Cache-first.
    StaticAsset,
    /// Stale-while-revalidate against the image store.
    Image,
    /// Backend calls. Network-first.
    Api,
    /// HTML document loads. Network with shell fallback.
    Navigation,
    /// Everything else. Stale-while-revalidate against the dynamic store.
    Dynamic,
}

impl RequestCategory {
    /// The store this category reads and writes.
    pub fn store(&self) -> StoreKind {
        match self {
            RequestCategory::StaticAsset => StoreKind::Static,
            RequestCategory::Image => StoreKind::Image,
            RequestCategory::Api => StoreKind::Api,
            RequestCategory::Navigation | RequestCategory::Dynamic => StoreKind::Dynamic,
        }
    }
}

/// Classifies intercepted requests.
#[derive(Debug, Clone)]
pub struct Classifier {
    origin: Url,
    static_paths: HashSet<String>,
    static_extensions: HashSet<String>,
    image_extensions: HashSet<String>,
    api_patterns: Vec<ApiPattern>,
}

impl Classifier {
    pub fn new(config: &SwConfig) -> Self {
        let lower = |exts: &[String]| exts.iter().map(|e| e.to_ascii_lowercase()).collect();
        Self {
            origin: config.origin.clone(),
            static_paths: config.precache.iter().cloned().collect(),
            static_extensions: lower(&config.static_extensions),
            image_extensions: lower(&config.image_extensions),
            api_patterns: config.api_patterns.clone(),
        }
    }

    /// Whether the worker handles this request at all.
    ///
    /// Only GETs are intercepted, and never browser-extension URLs.
    pub fn intercepts(&self, request: &Request) -> bool {
        request.method == Method::GET && !is_extension_scheme(request.url.scheme())
    }

    /// Category for an intercepted request, or `None` when it must pass
    /// through untouched.
    pub fn classify(&self, request: &Request) -> Option<RequestCategory> {
        if !self.intercepts(request) {
            return None;
        }

        let url = &request.url;
        let category = if self.is_static_asset(url) {
            RequestCategory::StaticAsset
        } else if self.is_image(url) {
            RequestCategory::Image
        } else if self.is_api(url) {
            RequestCategory::Api
        } else if is_navigation(request) {
            RequestCategory::Navigation
        } else {
            RequestCategory::Dynamic
        };

        trace!(url = %url, category = ?category, "Classified request");
        Some(category)
    }

    fn is_static_asset(&self, url: &Url) -> bool {
        if url.origin() == self.origin.origin() && self.static_paths.contains(url.path()) {
            return true;
        }
        extension(url).is_some_and(|ext| self.static_extensions.contains(&ext))
    }

    fn is_image(&self, url: &Url) -> bool {
        extension(url).is_some_and(|ext| self.image_extensions.contains(&ext))
    }

    fn is_api(&self, url: &Url) -> bool {
        self.api_patterns.iter().any(|p| p.matches(url))
    }
}

/// Browsing-context load, or a GET that asks for HTML.
fn is_navigation(request: &Request) -> bool {
    if request.mode == RequestMode::Navigate {
        return true;
    }
    request.method == Method::GET
        && request
            .accept()
            .is_some_and(|accept| accept.contains(mime::TEXT_HTML.essence_str()))
}

fn is_extension_scheme(scheme: &str) -> bool {
    scheme.ends_with("-extension")
}

/// Lowercased extension of the last path segment.
fn extension(url: &Url) -> Option<String> {
    let last = url.path_segments()?.next_back()?;
    let (stem, ext) = last.rsplit_once('.')?;
    if stem.is_empty() && ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}
