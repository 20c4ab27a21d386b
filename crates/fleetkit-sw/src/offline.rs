//! Last-resort responses when both cache and network have failed.

use fleetkit_net::{Request, Response};
use http::{header, StatusCode};
use tracing::{debug, warn};

use crate::cache::CacheManager;
use crate::classify::RequestCategory;

/// Inline placeholder shown in place of images that cannot be loaded.
const PLACEHOLDER_SVG: &str = r##"<svg xmlns="http://www.w3.org/2000/svg" width="200" height="150" viewBox="0 0 200 150"><rect width="200" height="150" fill="#e5e7eb"/><path d="M70 100l20-26 15 18 10-12 15 20z" fill="#9ca3af"/><circle cx="125" cy="58" r="9" fill="#9ca3af"/><text x="100" y="132" font-family="sans-serif" font-size="12" text-anchor="middle" fill="#6b7280">Imagem indisponível offline</text></svg>"##;

const OFFLINE_TEXT: &str = "Offline: conteúdo não disponível";

/// Builds fallback responses. Never fails.
#[derive(Clone)]
pub struct OfflineResponder {
    caches: CacheManager,
    static_store: String,
    offline_url: String,
}

impl OfflineResponder {
    pub fn new(caches: CacheManager, static_store: &str, offline_url: &str) -> Self {
        Self {
            caches,
            static_store: static_store.to_string(),
            offline_url: offline_url.to_string(),
        }
    }

    /// Fallback for `request`. `category` is `None` when classification
    /// itself never happened.
    pub async fn respond(&self, request: &Request, category: Option<RequestCategory>) -> Response {
        debug!(url = %request.url, category = ?category, "Serving offline fallback");
        match category {
            Some(RequestCategory::Navigation) => self.offline_page().await,
            Some(RequestCategory::Image) => placeholder_image(),
            _ => service_unavailable(),
        }
    }

    async fn offline_page(&self) -> Response {
        match self
            .caches
            .match_entry(&self.static_store, &self.offline_url)
            .await
        {
            Some(entry) => entry.to_response(),
            None => {
                warn!(url = %self.offline_url, "Offline page missing from static store");
                service_unavailable()
            }
        }
    }
}

/// Self-contained SVG placeholder, never stored.
pub fn placeholder_image() -> Response {
    Response::ok_with(PLACEHOLDER_SVG)
        .with_header(header::CONTENT_TYPE, "image/svg+xml")
        .with_header(header::CACHE_CONTROL, "no-store")
}

/// Generic 503.
pub fn service_unavailable() -> Response {
    Response::new(StatusCode::SERVICE_UNAVAILABLE, OFFLINE_TEXT)
        .with_header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder_is_uncacheable_svg() {
        let response = placeholder_image();
        assert!(response.ok());
        assert_eq!(response.header("content-type"), Some("image/svg+xml"));
        assert_eq!(response.header("cache-control"), Some("no-store"));
        assert!(response.text().unwrap().starts_with("<svg"));
    }

    #[test]
    fn test_service_unavailable() {
        let response = service_unavailable();
        assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.status_text(), "Service Unavailable");
    }
}
