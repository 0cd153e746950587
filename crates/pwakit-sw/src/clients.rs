//! Clients: pages the worker controls.

use std::sync::atomic::{AtomicU64, Ordering};

use hashbrown::HashMap;
use url::Url;

use crate::worker::ServiceWorkerId;

/// Client type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientType {
    #[default]
    Window,
    Worker,
    SharedWorker,
}

/// A client (open page or worker).
#[derive(Debug, Clone, PartialEq)]
pub struct Client {
    pub id: String,
    pub url: Url,
    pub client_type: ClientType,
    pub focused: bool,
    /// Worker controlling this client, if any.
    pub controller: Option<ServiceWorkerId>,
}

impl Client {
    /// Create an uncontrolled window client.
    pub fn window(url: Url) -> Self {
        Self {
            id: next_client_id(),
            url,
            client_type: ClientType::Window,
            focused: false,
            controller: None,
        }
    }
}

/// Clients registry.
#[derive(Debug, Default)]
pub struct Clients {
    clients: HashMap<String, Client>,
}

impl Clients {
    /// Create new clients registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a client by ID.
    pub fn get(&self, id: &str) -> Option<&Client> {
        self.clients.get(id)
    }

    /// Add a client.
    pub fn add(&mut self, client: Client) {
        self.clients.insert(client.id.clone(), client);
    }

    /// Remove a client.
    pub fn remove(&mut self, id: &str) -> Option<Client> {
        self.clients.remove(id)
    }

    /// Clients of a type, optionally only those controlled by `controller`.
    pub fn match_all(
        &self,
        client_type: Option<ClientType>,
        controller: Option<ServiceWorkerId>,
    ) -> Vec<&Client> {
        self.clients
            .values()
            .filter(|c| client_type.map_or(true, |t| c.client_type == t))
            .filter(|c| controller.map_or(true, |id| c.controller == Some(id)))
            .collect()
    }

    /// Open a focused window controlled by `controller`.
    pub fn open_window(&mut self, url: Url, controller: ServiceWorkerId) -> Client {
        for client in self.clients.values_mut() {
            client.focused = false;
        }
        let client = Client {
            focused: true,
            controller: Some(controller),
            ..Client::window(url)
        };
        self.add(client.clone());
        client
    }

    /// Take control of every client. Returns the ids whose controller changed.
    pub fn claim(&mut self, controller: ServiceWorkerId) -> Vec<String> {
        self.clients
            .values_mut()
            .filter(|c| c.controller != Some(controller))
            .map(|c| {
                c.controller = Some(controller);
                c.id.clone()
            })
            .collect()
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
