//! The service worker: one generation of the caching layer with its event
//! handlers.
//!
//! A host runtime wires its events to the `on_*` methods:
//!
//! ```text
//! install ──────────► on_install             (pre-warm static store)
//! activate ─────────► on_activate            (purge old stores, claim)
//! fetch ────────────► on_fetch               (classify → strategy)
//! message ──────────► on_message             (control channel)
//! push ─────────────► on_push                (show notification)
//! notificationclick ► on_notification_click  (focus or open window)
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use fleetkit_common::{Clock, SystemClock};
use fleetkit_net::{Fetcher, Request, Response};
use futures::future::{join_all, try_join_all};
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, error, info, warn};

use crate::cache::CacheManager;
use crate::classify::Classifier;
use crate::clients::{ClientMatchOptions, ClientType, Clients};
use crate::config::SwConfig;
use crate::error::{Result, ServiceWorkerError};
use crate::generation::{Generation, StoreKind};
use crate::message::{CacheInfo, ControlMessage, ControlReply, ReplyPort};
use crate::offline::OfflineResponder;
use crate::push::{Notification, NotificationClick, Notifications, PushPayload};
use crate::strategy::{FetchResponse, StrategyEngine};

// ==================== Types ====================

/// Service worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ServiceWorkerState {
    /// Constructed, install not yet run.
    #[default]
    Parsed,
    /// Pre-warming the static store.
    Installing,
    /// Installed and waiting for activation.
    Installed,
    /// Purging old stores and claiming clients.
    Activating,
    /// Active and intercepting requests.
    Activated,
    /// Install failed or a newer generation took over.
    Redundant,
}

/// Service worker events, for the host runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    /// State changed.
    StateChange {
        version: String,
        new_state: ServiceWorkerState,
    },
    /// The worker asked to skip the waiting phase; the host should activate it.
    SkipWaiting { version: String },
    /// A client is now controlled by this generation.
    ControllerChange { client_id: String },
    /// A notification was displayed.
    NotificationShown { tag: String },
    /// A notification was closed by a click.
    NotificationClosed { tag: String },
}

/// Result of intercepting a request.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    /// Not handled; the host performs the request itself.
    Passthrough,
    /// Answer the page with this response.
    Respond(FetchResponse),
}

impl FetchOutcome {
    pub fn response(&self) -> Option<&FetchResponse> {
        match self {
            FetchOutcome::Passthrough => None,
            FetchOutcome::Respond(served) => Some(served),
        }
    }
}

/// What a notification click did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickOutcome {
    /// An existing window at the target URL was focused.
    Focused { client_id: String },
    /// A new window was opened.
    Opened { client_id: String },
}

/// Outcome of a prefetch batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrefetchReport {
    pub succeeded: Vec<String>,
    pub failed: Vec<String>,
}

// ==================== Builder ====================

/// Builder for [`ServiceWorker`].
pub struct ServiceWorkerBuilder {
    config: SwConfig,
    fetcher: Arc<dyn Fetcher>,
    clock: Option<Arc<dyn Clock>>,
    caches: Option<CacheManager>,
}

impl ServiceWorkerBuilder {
    /// Time source for freshness checks. Defaults to the system clock.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Share existing cache storage, e.g. with a previous generation.
    pub fn caches(mut self, caches: CacheManager) -> Self {
        self.caches = Some(caches);
        self
    }

    /// Validate the config and assemble the worker.
    pub fn build(self) -> Result<(ServiceWorker, mpsc::UnboundedReceiver<WorkerEvent>)> {
        self.config.validate()?;

        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock) as Arc<dyn Clock>);
        let caches = self
            .caches
            .unwrap_or_else(|| CacheManager::new(Arc::clone(&clock)));
        let generation = Arc::new(Generation::new(
            &self.config.cache_prefix,
            &self.config.version,
        ));

        let offline_url = self.config.resolve(&self.config.offline_page)?;
        let root_url = self.config.resolve(&self.config.root_document)?;

        let offline = OfflineResponder::new(
            caches.clone(),
            generation.store(StoreKind::Static),
            offline_url.as_str(),
        );
        let engine = StrategyEngine::new(
            caches.clone(),
            Arc::clone(&self.fetcher),
            clock,
            Arc::clone(&generation),
            self.config.policies,
            offline,
            root_url.to_string(),
        );
        let classifier = Classifier::new(&self.config);
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        info!(version = %generation.version(), origin = %self.config.origin, "Service worker created");

        Ok((
            ServiceWorker {
                config: Arc::new(self.config),
                generation,
                classifier,
                engine,
                caches,
                fetcher: self.fetcher,
                state: RwLock::new(ServiceWorkerState::Parsed),
                skip_waiting: AtomicBool::new(false),
                clients: Arc::new(RwLock::new(Clients::new())),
                notifications: Arc::new(RwLock::new(Notifications::new())),
                event_tx,
            },
            event_rx,
        ))
    }
}

// ==================== Service Worker ====================

/// One generation of the caching layer.
pub struct ServiceWorker {
    config: Arc<SwConfig>,
    generation: Arc<Generation>,
    classifier: Classifier,
    engine: StrategyEngine,
    caches: CacheManager,
    fetcher: Arc<dyn Fetcher>,
    state: RwLock<ServiceWorkerState>,
    skip_waiting: AtomicBool,

    /// Page sessions.
    pub clients: Arc<RwLock<Clients>>,

    /// Displayed notifications.
    pub notifications: Arc<RwLock<Notifications>>,

    event_tx: mpsc::UnboundedSender<WorkerEvent>,
}

impl ServiceWorker {
    /// Start building a worker.
    pub fn builder(config: SwConfig, fetcher: Arc<dyn Fetcher>) -> ServiceWorkerBuilder {
        ServiceWorkerBuilder {
            config,
            fetcher,
            clock: None,
            caches: None,
        }
    }

    /// A worker with the system clock and fresh storage.
    pub fn new(
        config: SwConfig,
        fetcher: Arc<dyn Fetcher>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<WorkerEvent>)> {
        Self::builder(config, fetcher).build()
    }

    pub fn config(&self) -> &SwConfig {
        &self.config
    }

    pub fn generation(&self) -> &Generation {
        &self.generation
    }

    pub fn caches(&self) -> &CacheManager {
        &self.caches
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    pub fn engine(&self) -> &StrategyEngine {
        &self.engine
    }

    pub async fn state(&self) -> ServiceWorkerState {
        *self.state.read().await
    }

    /// Whether the worker asked to skip the waiting phase.
    pub fn is_skip_waiting(&self) -> bool {
        self.skip_waiting.load(Ordering::Acquire)
    }

    // ==================== Lifecycle ====================

    /// Pre-warm the static store with the precache list.
    ///
    /// All assets are fetched before any is stored; one failure fails the
    /// install and leaves the worker redundant. Old stores are untouched.
    pub async fn on_install(&self) -> Result<()> {
        self.transition(ServiceWorkerState::Parsed, ServiceWorkerState::Installing)
            .await?;

        let store = self.generation.store(StoreKind::Static);
        match self.fetch_precache().await {
            Ok(assets) => {
                self.caches.open(store).await;
                self.caches.put_all(store, &assets).await;
                info!(store, count = assets.len(), "Pre-warmed static store");
            }
            Err(e) => {
                error!(error = %e, "Install failed");
                self.set_state(ServiceWorkerState::Redundant).await;
                return Err(e);
            }
        }

        self.set_state(ServiceWorkerState::Installed).await;
        self.skip_waiting();
        Ok(())
    }

    async fn fetch_precache(&self) -> Result<Vec<(String, Response)>> {
        let fetches = self.config.precache.iter().map(|path| async move {
            let url = self.config.resolve(path)?;
            let key = url.to_string();
            let response = self
                .fetcher
                .fetch(Request::get(url))
                .await
                .map_err(|e| ServiceWorkerError::InstallFailed(format!("{key}: {e}")))?;
            if !response.ok() {
                return Err(ServiceWorkerError::InstallFailed(format!(
                    "{key}: status {}",
                    response.status
                )));
            }
            Ok::<_, ServiceWorkerError>((key, response))
        });
        try_join_all(fetches).await
    }

    /// Leave the waiting phase as soon as possible.
    pub fn skip_waiting(&self) {
        if !self.skip_waiting.swap(true, Ordering::AcqRel) {
            debug!(version = %self.generation.version(), "Skip waiting requested");
            let _ = self.event_tx.send(WorkerEvent::SkipWaiting {
                version: self.generation.version().to_string(),
            });
        }
    }

    /// Delete stores of other generations, then control every open page.
    pub async fn on_activate(&self) -> Result<()> {
        self.transition(ServiceWorkerState::Installed, ServiceWorkerState::Activating)
            .await?;

        let purged = self.caches.purge_except(&self.generation).await;
        info!(purged = purged.len(), "Removed stores from previous generations");

        let claimed = self.clients.write().await.claim();
        for client_id in claimed {
            let _ = self
                .event_tx
                .send(WorkerEvent::ControllerChange { client_id });
        }

        self.set_state(ServiceWorkerState::Activated).await;
        Ok(())
    }

    /// A newer generation took over.
    pub async fn supersede(&self) {
        self.set_state(ServiceWorkerState::Redundant).await;
    }

    async fn transition(
        &self,
        from: ServiceWorkerState,
        to: ServiceWorkerState,
    ) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if *state != from {
                return Err(ServiceWorkerError::State(format!(
                    "cannot move to {to:?} from {:?}",
                    *state
                )));
            }
            *state = to;
        }
        self.emit_state(to);
        Ok(())
    }

    async fn set_state(&self, to: ServiceWorkerState) {
        *self.state.write().await = to;
        self.emit_state(to);
    }

    fn emit_state(&self, new_state: ServiceWorkerState) {
        info!(version = %self.generation.version(), state = ?new_state, "Worker state changed");
        let _ = self.event_tx.send(WorkerEvent::StateChange {
            version: self.generation.version().to_string(),
            new_state,
        });
    }

    // ==================== Fetch ====================

    /// Intercept a request from a controlled page.
    pub async fn on_fetch(&self, request: Request) -> FetchOutcome {
        if self.state().await != ServiceWorkerState::Activated {
            return FetchOutcome::Passthrough;
        }
        match self.classifier.classify(&request) {
            Some(category) => FetchOutcome::Respond(self.engine.handle(&request, category).await),
            None => FetchOutcome::Passthrough,
        }
    }

    // ==================== Control Channel ====================

    /// Handle a control message from the page. Replies go to `reply` when
    /// the message kind has one.
    pub async fn on_message(&self, message: &JsonValue, reply: Option<&ReplyPort>) {
        let Some(message) = ControlMessage::parse(message) else {
            return;
        };
        debug!(message = ?message, "Control message");

        let answer = match message {
            ControlMessage::SkipWaiting => {
                self.skip_waiting();
                return;
            }
            ControlMessage::GetCacheInfo => ControlReply::CacheInfo(self.cache_info().await),
            ControlMessage::ClearCache { cache_name } => {
                match cache_name {
                    Some(name) => {
                        self.caches.delete_store(&name).await;
                    }
                    None => {
                        self.caches.clear_all().await;
                    }
                }
                ControlReply::CacheCleared
            }
            ControlMessage::PrefetchResources { urls } => {
                let report = self.prefetch(&urls).await;
                info!(
                    succeeded = report.succeeded.len(),
                    failed = report.failed.len(),
                    "Prefetch complete"
                );
                ControlReply::PrefetchComplete
            }
        };

        if let Some(port) = reply {
            if port.send(answer).is_err() {
                debug!("Reply port closed before answer was sent");
            }
        }
    }

    /// Size and keys of every store.
    pub async fn cache_info(&self) -> HashMap<String, CacheInfo> {
        let mut info = HashMap::new();
        for name in self.caches.list_stores().await {
            let urls = self.caches.list_entries(&name).await;
            info.insert(
                name,
                CacheInfo {
                    size: urls.len(),
                    urls,
                },
            );
        }
        info
    }

    /// Fetch every URL into the dynamic store. Each URL succeeds or fails
    /// on its own.
    pub async fn prefetch(&self, urls: &[String]) -> PrefetchReport {
        let store = self.generation.store(StoreKind::Dynamic);
        let limit = self.config.policies.dynamic.max_entries;

        let attempts = urls.iter().map(|raw| async move {
            let url = match self.config.resolve(raw) {
                Ok(url) => url,
                Err(e) => {
                    warn!(url = %raw, error = %e, "Prefetch skipped invalid URL");
                    return Err(raw.clone());
                }
            };
            match self.fetcher.fetch(Request::get(url.clone())).await {
                Ok(response) if response.ok() => {
                    self.caches
                        .put_bounded(store, url.as_str(), &response, limit)
                        .await;
                    Ok(raw.clone())
                }
                Ok(response) => {
                    warn!(url = %url, status = %response.status, "Prefetch got error status");
                    Err(raw.clone())
                }
                Err(e) => {
                    warn!(url = %url, error = %e, "Prefetch failed");
                    Err(raw.clone())
                }
            }
        });

        let mut report = PrefetchReport::default();
        for result in join_all(attempts).await {
            match result {
                Ok(url) => report.succeeded.push(url),
                Err(url) => report.failed.push(url),
            }
        }
        report
    }

    // ==================== Push / Notifications ====================

    /// Show a notification for a push. A push without data is ignored.
    pub async fn on_push(&self, data: Option<&[u8]>) -> Result<Option<Notification>> {
        let Some(data) = data else {
            debug!("Push without payload ignored");
            return Ok(None);
        };
        let payload = PushPayload::parse(data).inspect_err(|e| {
            warn!(error = %e, "Rejected push payload");
        })?;
        let notification = Notification::from_payload(payload, &self.config.notifications);

        self.notifications.write().await.show(notification.clone());
        info!(tag = %notification.tag, title = %notification.title, "Showing notification");
        let _ = self.event_tx.send(WorkerEvent::NotificationShown {
            tag: notification.tag.clone(),
        });
        Ok(Some(notification))
    }

    /// Close the clicked notification and bring its target page forward.
    pub async fn on_notification_click(&self, click: NotificationClick) -> Result<ClickOutcome> {
        let closed = self.notifications.write().await.close(&click.tag);
        if closed.is_some() {
            let _ = self.event_tx.send(WorkerEvent::NotificationClosed {
                tag: click.tag.clone(),
            });
        }

        let target = closed
            .as_ref()
            .and_then(Notification::target_url)
            .unwrap_or("/");
        let target = self.config.resolve(target)?;
        debug!(tag = %click.tag, action = ?click.action, target = %target, "Notification clicked");

        let mut clients = self.clients.write().await;
        let existing = clients
            .match_all(ClientMatchOptions {
                include_uncontrolled: true,
                client_type: ClientType::Window,
            })
            .into_iter()
            .find(|c| c.url == target)
            .map(|c| c.id.clone());

        match existing {
            Some(id) => {
                clients.focus(&id)?;
                Ok(ClickOutcome::Focused { client_id: id })
            }
            None => {
                let client = clients.open_window(target);
                Ok(ClickOutcome::Opened {
                    client_id: client.id,
                })
            }
        }
    }
}
