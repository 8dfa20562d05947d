//! Connection manager: one pooled client per node address.
//!
//! Commands look clients up by normalized address. The map is shared between
//! concurrent workers behind a reader/writer lock; creation goes through a
//! double-check under the write guard so a client is opened at most once per
//! address. Retry policy lives in callers, never here.

use std::collections::HashMap;

use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::client::address::parse_address;
use crate::client::node_client::{NodeClient, ValkeyError};
use crate::settings::Settings;

/// In-process mapping from normalized `host:port` to a live client.
///
/// Clients live from first use until [`close_all`](Self::close_all) at the
/// end of the command invocation. Nothing is persisted between runs.
pub struct ConnectionPool {
    clients: RwLock<HashMap<String, NodeClient>>,
    settings: Settings,
}

impl ConnectionPool {
    pub fn new(settings: Settings) -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            settings,
        }
    }

    /// The settings this pool builds clients from.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Return the client for `address`, opening one if needed. The address
    /// is normalized first (bus suffix stripped, localhost rewritten, port
    /// validated); new clients must pass a liveness probe before they are
    /// shared.
    pub async fn connect(&self, address: &str) -> Result<NodeClient, ValkeyError> {
        let (host, port) = parse_address(address).map_err(|e| ValkeyError::Connection {
            address: address.to_string(),
            reason: e.to_string(),
        })?;
        let key = format!("{}:{}", host, port);

        {
            let clients = self.clients.read().await;
            if let Some(client) = clients.get(&key) {
                return Ok(client.clone());
            }
        }

        let mut clients = self.clients.write().await;
        // Another worker may have created the client while we waited for
        // the write guard.
        if let Some(client) = clients.get(&key) {
            return Ok(client.clone());
        }

        let client = NodeClient::connect(&host, port, &self.settings).await?;
        clients.insert(key, client.clone());
        Ok(client)
    }

    /// Tear down every client and empty the map. Individual quit failures
    /// are logged and do not stop the sweep.
    pub async fn close_all(&self) {
        let mut clients = self.clients.write().await;
        for (address, client) in clients.drain() {
            if let Err(err) = client.close().await {
                warn!(address = %address, error = %err, "failed to close client");
            } else {
                debug!(address = %address, "closed client");
            }
        }
    }

    /// Number of open clients, for diagnostics.
    pub async fn len(&self) -> usize {
        self.clients.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.clients.read().await.is_empty()
    }
}
