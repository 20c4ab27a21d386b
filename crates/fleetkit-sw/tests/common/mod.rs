//! Shared fixtures: a scripted network and a frozen clock.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use fleetkit_common::ManualClock;
use fleetkit_net::{Fetcher, NetError, Request, Response};
use fleetkit_sw::{CacheManager, ServiceWorker, SwConfig, WorkerEvent};
use http::header;
use tokio::sync::{mpsc, Notify};

pub const ORIGIN: &str = "http://localhost:5173";

/// `date` header value matching [`t0`].
pub const T0_HTTP: &str = "Fri, 01 Mar 2024 12:00:00 GMT";

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

pub fn url(path: &str) -> String {
    format!("{ORIGIN}{path}")
}

pub fn get(path: &str) -> Request {
    Request::parse(&url(path)).unwrap()
}

/// 200 response carrying `body` and a `date` header.
pub fn dated(body: &str, date: &str) -> Response {
    Response::ok_with(body.to_string()).with_header(header::DATE, date)
}

enum Route {
    Respond(Response),
    Fail,
    Gated(Response, Arc<Notify>),
    Hang,
}

/// What to do for URLs with no route.
#[derive(Clone, Copy)]
pub enum Unrouted {
    /// Network error.
    Fail,
    /// 200 with the URL as body.
    Echo,
}

/// In-process network with per-URL behavior and a call log.
pub struct ScriptedFetcher {
    routes: Mutex<HashMap<String, Route>>,
    calls: Mutex<Vec<String>>,
    unrouted: Mutex<Unrouted>,
}

impl ScriptedFetcher {
    pub fn new(unrouted: Unrouted) -> Arc<Self> {
        Arc::new(Self {
            routes: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            unrouted: Mutex::new(unrouted),
        })
    }

    /// Everything fails.
    pub fn offline() -> Arc<Self> {
        Self::new(Unrouted::Fail)
    }

    /// Everything succeeds.
    pub fn online() -> Arc<Self> {
        Self::new(Unrouted::Echo)
    }

    pub fn respond(&self, url: &str, response: Response) {
        self.routes
            .lock()
            .unwrap()
            .insert(url.to_string(), Route::Respond(response));
    }

    pub fn fail(&self, url: &str) {
        self.routes.lock().unwrap().insert(url.to_string(), Route::Fail);
    }

    /// Never resolves.
    pub fn hang(&self, url: &str) {
        self.routes.lock().unwrap().insert(url.to_string(), Route::Hang);
    }

    /// Resolves with `response` once the returned gate is notified.
    pub fn gate(&self, url: &str, response: Response) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.routes
            .lock()
            .unwrap()
            .insert(url.to_string(), Route::Gated(response, Arc::clone(&gate)));
        gate
    }

    pub fn set_unrouted(&self, unrouted: Unrouted) {
        *self.unrouted.lock().unwrap() = unrouted;
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, url: &str) -> usize {
        self.calls().iter().filter(|c| c.as_str() == url).count()
    }
}

enum Plan {
    Ready(Result<Response, NetError>),
    Wait(Response, Arc<Notify>),
    Hang,
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, request: Request) -> Result<Response, NetError> {
        let key = request.url.to_string();
        self.calls.lock().unwrap().push(key.clone());

        let plan = {
            let routes = self.routes.lock().unwrap();
            match routes.get(&key) {
                Some(Route::Respond(r)) => Plan::Ready(Ok(r.clone())),
                Some(Route::Fail) => Plan::Ready(Err(NetError::RequestFailed(format!(
                    "{key}: connection refused"
                )))),
                Some(Route::Gated(r, gate)) => Plan::Wait(r.clone(), Arc::clone(gate)),
                Some(Route::Hang) => Plan::Hang,
                None => match *self.unrouted.lock().unwrap() {
                    Unrouted::Fail => Plan::Ready(Err(NetError::RequestFailed(format!(
                        "{key}: offline"
                    )))),
                    Unrouted::Echo => Plan::Ready(Ok(dated(&key, T0_HTTP))),
                },
            }
        };

        match plan {
            Plan::Ready(result) => result,
            Plan::Wait(response, gate) => {
                gate.notified().await;
                Ok(response)
            }
            Plan::Hang => futures::future::pending().await,
        }
    }
}

/// A worker on the default config with a manual clock at [`t0`].
pub fn worker(
    fetcher: Arc<ScriptedFetcher>,
) -> (ServiceWorker, mpsc::UnboundedReceiver<WorkerEvent>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(t0()));
    let (sw, rx) = ServiceWorker::builder(config(), fetcher)
        .clock(clock.clone())
        .build()
        .unwrap();
    (sw, rx, clock)
}

/// Like [`worker`] but over existing storage.
pub fn worker_with_caches(
    fetcher: Arc<ScriptedFetcher>,
    caches: CacheManager,
) -> (ServiceWorker, mpsc::UnboundedReceiver<WorkerEvent>) {
    let clock = Arc::new(ManualClock::new(t0()));
    ServiceWorker::builder(config(), fetcher)
        .clock(clock)
        .caches(caches)
        .build()
        .unwrap()
}

pub fn config() -> SwConfig {
    SwConfig {
        origin: url::Url::parse(&format!("{ORIGIN}/")).unwrap(),
        ..SwConfig::default()
    }
}

/// Install and activate against an always-online network.
pub async fn activated(
    fetcher: Arc<ScriptedFetcher>,
) -> (ServiceWorker, mpsc::UnboundedReceiver<WorkerEvent>, Arc<ManualClock>) {
    let (sw, rx, clock) = worker(fetcher);
    sw.on_install().await.unwrap();
    sw.on_activate().await.unwrap();
    (sw, rx, clock)
}

pub fn drain(rx: &mut mpsc::UnboundedReceiver<WorkerEvent>) -> Vec<WorkerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Poll until `check` passes or a second elapses.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
