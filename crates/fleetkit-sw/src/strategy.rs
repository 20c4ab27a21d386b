//! Caching strategies.
//!
//! | category      | strategy               | store   |
//! |---------------|------------------------|---------|
//! | static asset  | cache-first            | static  |
//! | API           | network-first          | api     |
//! | image         | stale-while-revalidate | image   |
//! | dynamic       | stale-while-revalidate | dynamic |
//! | navigation    | network, shell fallback| dynamic |
//!
//! Only `network_first` can fail: an API entry past its TTL is
//! never served silently when the network is down.

use std::sync::Arc;

use fleetkit_common::Clock;
use fleetkit_net::{Fetcher, NetError, Request, Response};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::cache::{CacheEntry, CacheManager};
use crate::classify::RequestCategory;
use crate::config::PolicyTable;
use crate::error::{Result, ServiceWorkerError};
use crate::generation::{Generation, StoreKind};
use crate::offline::OfflineResponder;

/// Where a response delivered to the page came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    /// Live network response.
    Network,
    /// Stored response, possibly stale.
    Cache,
    /// Synthesized by the offline responder.
    Fallback,
}

/// A response plus its provenance.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub response: Response,
    pub source: ResponseSource,
}

impl FetchResponse {
    pub fn network(response: Response) -> Self {
        Self {
            response,
            source: ResponseSource::Network,
        }
    }

    pub fn from_cache(entry: &CacheEntry) -> Self {
        Self {
            response: entry.to_response(),
            source: ResponseSource::Cache,
        }
    }

    pub fn fallback(response: Response) -> Self {
        Self {
            response,
            source: ResponseSource::Fallback,
        }
    }
}

/// Runs the strategy for each request category.
#[derive(Clone)]
pub struct StrategyEngine {
    caches: CacheManager,
    fetcher: Arc<dyn Fetcher>,
    clock: Arc<dyn Clock>,
    generation: Arc<Generation>,
    policies: PolicyTable,
    offline: OfflineResponder,
    root_url: String,
}

impl StrategyEngine {
    pub fn new(
        caches: CacheManager,
        fetcher: Arc<dyn Fetcher>,
        clock: Arc<dyn Clock>,
        generation: Arc<Generation>,
        policies: PolicyTable,
        offline: OfflineResponder,
        root_url: String,
    ) -> Self {
        Self {
            caches,
            fetcher,
            clock,
            generation,
            policies,
            offline,
            root_url,
        }
    }

    /// Serve `request` with the strategy for `category`.
    ///
    /// Strategy errors end at the offline responder, so this never fails.
    pub async fn handle(&self, request: &Request, category: RequestCategory) -> FetchResponse {
        let result = match category {
            RequestCategory::StaticAsset => self.cache_first(request).await,
            RequestCategory::Api => self.network_first(request).await,
            RequestCategory::Image | RequestCategory::Dynamic => {
                self.stale_while_revalidate(request, category).await
            }
            RequestCategory::Navigation => self.navigation(request).await,
        };

        match result {
            Ok(served) => served,
            Err(e) => {
                warn!(
                    url = %request.url,
                    category = ?category,
                    error = %e,
                    kind = e.category(),
                    "Strategy failed, serving offline fallback"
                );
                FetchResponse::fallback(self.offline.respond(request, Some(category)).await)
            }
        }
    }

    /// Serve from the static store while fresh; otherwise refresh from the
    /// network, keeping the stale copy as a fallback.
    pub async fn cache_first(&self, request: &Request) -> Result<FetchResponse> {
        let store = self.generation.store(StoreKind::Static);
        let policy = self.policies.static_assets;
        let key = request.url.as_str();

        let cached = self.caches.match_entry(store, key).await;
        if let Some(entry) = &cached {
            if !entry.is_expired(policy.ttl(), self.clock.now()) {
                debug!(url = %request.url, "Cache-first hit");
                return Ok(FetchResponse::from_cache(entry));
            }
            debug!(url = %request.url, "Cache-first entry expired, refreshing");
        }

        match self.fetcher.fetch(request.clone()).await {
            Ok(response) => {
                if response.ok() {
                    self.caches
                        .put_bounded(store, key, &response, policy.max_entries)
                        .await;
                }
                Ok(FetchResponse::network(response))
            }
            Err(e) => {
                warn!(url = %request.url, error = %e, "Network failed for static asset");
                match cached {
                    Some(entry) => Ok(FetchResponse::from_cache(&entry)),
                    None => Ok(FetchResponse::fallback(
                        self.offline
                            .respond(request, Some(RequestCategory::StaticAsset))
                            .await,
                    )),
                }
            }
        }
    }

    /// Always try the network; fall back to the API store only while the
    /// stored entry is within its TTL.
    pub async fn network_first(&self, request: &Request) -> Result<FetchResponse> {
        let store = self.generation.store(StoreKind::Api);
        let policy = self.policies.api;
        let key = request.url.as_str();

        let error = match self.fetcher.fetch(request.clone()).await {
            Ok(response) => {
                if response.ok() {
                    self.caches
                        .put_bounded(store, key, &response, policy.max_entries)
                        .await;
                }
                return Ok(FetchResponse::network(response));
            }
            Err(e) => e,
        };

        warn!(url = %request.url, error = %error, "Network failed for API call");
        match self.caches.match_entry(store, key).await {
            Some(entry) if !entry.is_expired(policy.ttl(), self.clock.now()) => {
                debug!(url = %request.url, "Serving cached API response");
                Ok(FetchResponse::from_cache(&entry))
            }
            Some(_) => Err(ServiceWorkerError::Expired {
                url: key.to_string(),
            }),
            None => Err(ServiceWorkerError::Network(error)),
        }
    }

    /// Answer from the store at once and refresh it in the background.
    /// With nothing cached, wait for the network.
    pub async fn stale_while_revalidate(
        &self,
        request: &Request,
        category: RequestCategory,
    ) -> Result<FetchResponse> {
        let kind = category.store();
        let store = self.generation.store(kind);
        let key = request.url.as_str();

        let cached = self.caches.match_entry(store, key).await;
        let revalidation = self.spawn_revalidation(request.clone(), kind);

        if let Some(entry) = cached {
            // Dropping the handle detaches the task; it updates the store
            // for the next request.
            drop(revalidation);
            debug!(url = %request.url, store, "Stale-while-revalidate hit");
            return Ok(FetchResponse::from_cache(&entry));
        }

        match revalidation.await {
            Ok(Ok(response)) => Ok(FetchResponse::network(response)),
            Ok(Err(_)) => Ok(FetchResponse::fallback(
                self.offline.respond(request, Some(category)).await,
            )),
            Err(e) => Err(ServiceWorkerError::Unavailable(format!(
                "{key}: revalidation task failed: {e}"
            ))),
        }
    }

    /// Network first for HTML navigations; offline, serve the cached SPA
    /// shell, then the offline page.
    ///
    /// Writes to the dynamic store skip the ceiling here.
    pub async fn navigation(&self, request: &Request) -> Result<FetchResponse> {
        match self.fetcher.fetch(request.clone()).await {
            Ok(response) => {
                if response.ok() {
                    let store = self.generation.store(StoreKind::Dynamic);
                    self.caches
                        .put(store, request.url.as_str(), &response)
                        .await;
                }
                Ok(FetchResponse::network(response))
            }
            Err(e) => {
                warn!(url = %request.url, error = %e, "Navigation offline, serving app shell");
                let store = self.generation.store(StoreKind::Static);
                match self.caches.match_entry(store, &self.root_url).await {
                    Some(shell) => Ok(FetchResponse::from_cache(&shell)),
                    None => Ok(FetchResponse::fallback(
                        self.offline
                            .respond(request, Some(RequestCategory::Navigation))
                            .await,
                    )),
                }
            }
        }
    }

    fn spawn_revalidation(
        &self,
        request: Request,
        kind: StoreKind,
    ) -> JoinHandle<std::result::Result<Response, NetError>> {
        let caches = self.caches.clone();
        let fetcher = Arc::clone(&self.fetcher);
        let store = self.generation.store(kind).to_string();
        let limit = self.policies.for_kind(kind).max_entries;

        tokio::spawn(async move {
            let key = request.url.to_string();
            match fetcher.fetch(request).await {
                Ok(response) => {
                    if response.ok() {
                        caches.put_bounded(&store, &key, &response, limit).await;
                    }
                    Ok(response)
                }
                Err(e) => {
                    warn!(url = %key, store = %store, error = %e, "Background revalidation failed");
                    Err(e)
                }
            }
        })
    }
}
