//! # FleetKit Service Worker
//!
//! Offline caching layer for the FleetKit dealership app. Every GET the
//! page makes is classified and answered by one of four strategies backed
//! by four named stores, with offline fallbacks when both cache and
//! network fail.
//!
//! ## Features
//!
//! - **Classification**: static asset, image, API, navigation, dynamic
//! - **Strategies**: cache-first, network-first, stale-while-revalidate,
//!   navigation with app-shell fallback
//! - **Stores**: per-store TTL and entry ceiling, oldest-first eviction
//! - **Lifecycle**: pre-warm on install, purge old generations on activate
//! - **Control channel**: cache info, clear, prefetch, skip waiting
//! - **Push**: notifications and click routing
//!
//! ## Architecture
//!
//! ```text
//! ServiceWorker
//!     ├── Classifier ──► StrategyEngine ──► CacheManager ──► CacheStorage
//!     │                        │                               └── Cache
//!     │                        └── OfflineResponder
//!     ├── Clients
//!     └── Notifications
//! ```

pub mod cache;
pub mod classify;
pub mod clients;
pub mod config;
pub mod error;
pub mod generation;
pub mod message;
pub mod offline;
pub mod push;
pub mod strategy;
pub mod worker;

pub use cache::{Cache, CacheEntry, CacheManager, CacheStorage};
pub use classify::{Classifier, RequestCategory};
pub use clients::{Client, ClientMatchOptions, ClientType, Clients};
pub use config::{ApiPattern, CachePolicy, NotificationDefaults, PolicyTable, SwConfig};
pub use error::{Result, ServiceWorkerError};
pub use generation::{Generation, StoreKind};
pub use message::{CacheInfo, ControlMessage, ControlReply, ReplyPort};
pub use offline::OfflineResponder;
pub use push::{Notification, NotificationAction, NotificationClick, Notifications, PushPayload};
pub use strategy::{FetchResponse, ResponseSource, StrategyEngine};
pub use worker::{
    ClickOutcome, FetchOutcome, PrefetchReport, ServiceWorker, ServiceWorkerBuilder,
    ServiceWorkerState, WorkerEvent,
};
