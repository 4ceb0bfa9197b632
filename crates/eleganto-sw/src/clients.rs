//! Open pages the worker can focus, open or take control of.

use std::sync::atomic::{AtomicU64, Ordering};

use hashbrown::HashMap;
use url::Url;

use crate::lifecycle::ServiceWorkerId;
use crate::WorkerError;

/// Client type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientType {
    #[default]
    Window,
    Worker,
    All,
}

/// Visibility state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisibilityState {
    Hidden,
    Visible,
}

/// A page (or worker) of the site.
#[derive(Debug, Clone)]
pub struct Client {
    pub id: String,
    pub url: Url,
    pub client_type: ClientType,
    pub visibility_state: VisibilityState,
    pub focused: bool,

    /// Worker version controlling this client, if any.
    pub controller: Option<ServiceWorkerId>,
}

impl Client {
    /// A visible, unfocused, uncontrolled window at `url`.
    pub fn window(url: Url) -> Self {
        Self {
            id: next_client_id(),
            url,
            client_type: ClientType::Window,
            visibility_state: VisibilityState::Visible,
            focused: false,
            controller: None,
        }
    }

    /// Focus the client.
    pub fn focus(&mut self) -> Result<(), WorkerError> {
        if self.client_type != ClientType::Window {
            return Err(WorkerError::StateError(
                "Can only focus window clients".to_string(),
            ));
        }
        self.focused = true;
        self.visibility_state = VisibilityState::Visible;
        Ok(())
    }
}

/// Clients API.
#[derive(Debug, Default)]
pub struct Clients {
    clients: HashMap<String, Client>,
}

impl Clients {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<&Client> {
        self.clients.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Client> {
        self.clients.get_mut(id)
    }

    /// Clients of the given type, ordered by id.
    pub fn match_all(&self, client_type: ClientType) -> Vec<&Client> {
        let mut matched: Vec<&Client> = self
            .clients
            .values()
            .filter(|c| client_type == ClientType::All || c.client_type == client_type)
            .collect();
        matched.sort_by(|a, b| a.id.cmp(&b.id));
        matched
    }

    /// First window client showing exactly `url`.
    pub fn find_window(&self, url: &Url) -> Option<String> {
        self.match_all(ClientType::Window)
            .into_iter()
            .find(|c| c.url == *url)
            .map(|c| c.id.clone())
    }

    /// Open a focused window at `url`.
    pub fn open_window(&mut self, url: Url) -> Client {
        let mut client = Client::window(url);
        client.focused = true;
        self.clients.insert(client.id.clone(), client.clone());
        client
    }

    /// Make `worker` the controller of every window client. Returns the ids
    /// whose controller changed.
    pub fn claim(&mut self, worker: ServiceWorkerId) -> Vec<String> {
        let mut changed: Vec<String> = self
            .clients
            .values_mut()
            .filter(|c| c.client_type == ClientType::Window && c.controller != Some(worker))
            .map(|c| {
                c.controller = Some(worker);
                c.id.clone()
            })
            .collect();
        changed.sort();
        changed
    }

    pub fn add(&mut self, client: Client) {
        self.clients.insert(client.id.clone(), client);
    }

    pub fn remove(&mut self, id: &str) -> Option<Client> {
        self.clients.remove(id)
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
    format!("client-{:06}", COUNTER.fetch_add(1, Ordering::Relaxed))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(path: &str) -> Url {
        Url::parse("https://royaleleganto.example/")
            .unwrap()
            .join(path)
            .unwrap()
    }

    #[test]
    fn test_open_window_is_focused() {
        let mut clients = Clients::new();
        let client = clients.open_window(url("/gallery.html"));

        assert!(client.focused);
        assert_eq!(client.client_type, ClientType::Window);
        assert!(clients.get(&client.id).is_some());
    }

    #[test]
    fn test_find_window_exact_url() {
        let mut clients = Clients::new();
        let about = Client::window(url("/about.html"));
        let id = about.id.clone();
        clients.add(about);

        assert_eq!(clients.find_window(&url("/about.html")), Some(id));
        assert_eq!(clients.find_window(&url("/about.html?x=1")), None);
    }

    #[test]
    fn test_claim_only_windows_once() {
        let mut clients = Clients::new();
        clients.add(Client::window(url("/")));
        let mut worker = Client::window(url("/worker.js"));
        worker.client_type = ClientType::Worker;
        clients.add(worker);

        let id = ServiceWorkerId::next();
        assert_eq!(clients.claim(id).len(), 1);
        assert!(clients.claim(id).is_empty());
    }

    #[test]
    fn test_focus_rejects_workers() {
        let mut client = Client::window(url("/"));
        client.client_type = ClientType::Worker;
        assert!(client.focus().is_err());
    }
}
