//! Page sessions the worker can see, focus, open and control.

use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;
use tracing::debug;
use url::Url;

use crate::error::{Result, ServiceWorkerError};

/// A client (controlled page).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Client {
    /// Client ID.
    pub id: String,

    /// Client URL.
    pub url: Url,

    /// Client type.
    pub client_type: ClientType,

    /// Whether focused.
    pub focused: bool,

    /// Whether the current generation controls this client.
    pub controlled: bool,
}

/// Client type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientType {
    #[default]
    Window,
    Worker,
    SharedWorker,
    All,
}

impl Client {
    /// A window client that is not yet controlled.
    pub fn window(url: Url) -> Self {
        Self {
            id: next_client_id(),
            url,
            client_type: ClientType::Window,
            focused: false,
            controlled: false,
        }
    }
}

/// Options for [`Clients::match_all`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ClientMatchOptions {
    pub include_uncontrolled: bool,
    pub client_type: ClientType,
}

/// Clients API.
#[derive(Debug, Default)]
pub struct Clients {
    clients: IndexMap<String, Client>,
}

impl Clients {
    /// Create new clients manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a client by ID.
    pub fn get(&self, id: &str) -> Option<&Client> {
        self.clients.get(id)
    }

    /// Match all clients.
    pub fn match_all(&self, options: ClientMatchOptions) -> Vec<&Client> {
        self.clients
            .values()
            .filter(|c| options.include_uncontrolled || c.controlled)
            .filter(|c| match options.client_type {
                ClientType::All => true,
                t => c.client_type == t,
            })
            .collect()
    }

    /// Open a window. The new window takes focus.
    pub fn open_window(&mut self, url: Url) -> Client {
        for other in self.clients.values_mut() {
            other.focused = false;
        }
        let mut client = Client::window(url);
        client.focused = true;
        debug!(client = %client.id, url = %client.url, "Opened window");
        self.clients.insert(client.id.clone(), client.clone());
        client
    }

    /// Focus a window client.
    pub fn focus(&mut self, id: &str) -> Result<&Client> {
        match self.clients.get(id) {
            None => return Err(ServiceWorkerError::State(format!("no client {id}"))),
            Some(c) if c.client_type != ClientType::Window => {
                return Err(ServiceWorkerError::State(
                    "Can only focus window clients".to_string(),
                ))
            }
            Some(_) => {}
        }
        for client in self.clients.values_mut() {
            client.focused = client.id == id;
        }
        self.clients
            .get(id)
            .ok_or_else(|| ServiceWorkerError::State(format!("no client {id}")))
    }

    /// Take control of every window client. Returns the newly claimed IDs.
    pub fn claim(&mut self) -> Vec<String> {
        self.clients
            .values_mut()
            .filter(|c| c.client_type == ClientType::Window && !c.controlled)
            .map(|c| {
                c.controlled = true;
                c.id.clone()
            })
            .collect()
    }

    /// Add a client.
    pub fn add(&mut self, client: Client) {
        self.clients.insert(client.id.clone(), client);
    }

    /// Remove a client.
    pub fn remove(&mut self, id: &str) -> Option<Client> {
        self.clients.shift_remove(id)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

fn next_client_id() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    format!("client-{}", COUNTER.fetch_add(1, Ordering::Relaxed))
}
