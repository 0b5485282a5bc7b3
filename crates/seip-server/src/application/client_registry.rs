//! ClientRegistry: the server's in-memory table of connected clients.
//!
//! Each entry is a [`ClientHandle`]: the id the server assigned, the name the
//! client announced during its handshake, and the connection itself.
//!
//! # Locking discipline (for beginners)
//!
//! Several tasks touch the registry at the same time:
//!
//! - handshake tasks *insert* freshly connected clients,
//! - request and stop operations *look up* and *remove* clients,
//! - `list()` *iterates* over all of them.
//!
//! All of these go through one `tokio::sync::RwLock`.  Lookups and listing
//! take the read lock and may run in parallel; insertion and removal take the
//! write lock and run alone.  A listing therefore always sees a consistent
//! snapshot, never a half-removed entry.
//!
//! Handles are stored as `Arc<ClientHandle<C>>`.  A request that looked up a
//! client keeps its own `Arc`, so removing the entry while an exchange is in
//! flight cannot free the connection under the exchange's feet.
//!
//! # Ids
//!
//! Ids start at 1, grow by one per accepted client, and are never reused,
//! even after the client that held them is removed.  The next id is read and
//! bumped while the write lock is held, so two concurrent handshakes can
//! never receive the same id.

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::RwLock;

/// Identifier the server assigns to an accepted client.
pub type ClientId = u64;

/// Error type for registry operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("client {0} not found")]
    NotFound(ClientId),
}

/// One registered client.
///
/// Generic over the connection type so the application layer can be tested
/// with scripted fakes instead of real sockets.
#[derive(Debug)]
pub struct ClientHandle<C> {
    id: ClientId,
    name: String,
    connection: C,
}

impl<C> ClientHandle<C> {
    pub fn new(id: ClientId, name: impl Into<String>, connection: C) -> Self {
        Self {
            id,
            name: name.into(),
            connection,
        }
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn connection(&self) -> &C {
        &self.connection
    }
}

struct RegistryInner<C> {
    clients: BTreeMap<ClientId, Arc<ClientHandle<C>>>,
    next_id: ClientId,
}

/// Concurrent map of connected clients.
pub struct ClientRegistry<C> {
    inner: RwLock<RegistryInner<C>>,
}

impl<C> Default for ClientRegistry<C> {
    fn default() -> Self {
        Self {
            inner: RwLock::new(RegistryInner {
                clients: BTreeMap::new(),
                next_id: 1,
            }),
        }
    }
}

impl<C> ClientRegistry<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assigns the next id to `connection` and registers it.
    pub async fn add(&self, name: impl Into<String>, connection: C) -> Arc<ClientHandle<C>> {
        let mut inner = self.inner.write().await;
        let id = inner.next_id;
        inner.next_id += 1;
        let handle = Arc::new(ClientHandle::new(id, name, connection));
        inner.clients.insert(id, Arc::clone(&handle));
        handle
    }

    /// Removes a client and hands its handle back to the caller.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] if `id` is not registered.
    pub async fn remove(&self, id: ClientId) -> Result<Arc<ClientHandle<C>>, RegistryError> {
        self.inner
            .write()
            .await
            .clients
            .remove(&id)
            .ok_or(RegistryError::NotFound(id))
    }

    /// Returns the handle for `id`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] if `id` is not registered.
    pub async fn lookup(&self, id: ClientId) -> Result<Arc<ClientHandle<C>>, RegistryError> {
        self.inner
            .read()
            .await
            .clients
            .get(&id)
            .cloned()
            .ok_or(RegistryError::NotFound(id))
    }

    /// Snapshot of `(id, name)` pairs in ascending id order.
    pub async fn list(&self) -> Vec<(ClientId, String)> {
        self.inner
            .read()
            .await
            .clients
            .values()
            .map(|h| (h.id, h.name.clone()))
            .collect()
    }

    /// Snapshot of the registered ids in ascending order.
    pub async fn ids(&self) -> Vec<ClientId> {
        self.inner.read().await.clients.keys().copied().collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.clients.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Renders a client listing as `"<count>|<id>|<name>|<id>|<name>..."`.
pub fn format_client_list(entries: &[(ClientId, String)]) -> String {
    let mut out = entries.len().to_string();
    for (id, name) in entries {
        out.push('|');
        out.push_str(&id.to_string());
        out.push('|');
        out.push_str(name);
    }
    out
}

// ── Tests ─────────────────────────────────────────────────────────────────────
