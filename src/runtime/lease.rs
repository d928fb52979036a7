use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::debug;

use crate::error::ConnectionError;

/// Endpoints currently held by a run, keyed by endpoint.
///
/// A run must not start on an endpoint another run is holding.
#[derive(Clone, Default)]
pub struct ConnectionLeases {
    held: Arc<DashMap<String, String>>,
}

impl ConnectionLeases {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&self, endpoint: &str, holder: &str) -> Result<Lease, ConnectionError> {
        match self.held.entry(endpoint.to_string()) {
            Entry::Occupied(entry) => Err(ConnectionError::InUse {
                endpoint: endpoint.to_string(),
                holder: entry.get().clone(),
            }),
            Entry::Vacant(entry) => {
                entry.insert(holder.to_string());
                debug!(endpoint = %endpoint, holder = %holder, "Leased endpoint");
                Ok(Lease {
                    held: self.held.clone(),
                    endpoint: endpoint.to_string(),
                })
            }
        }
    }

    pub fn holder(&self, endpoint: &str) -> Option<String> {
        self.held.get(endpoint).map(|h| h.value().clone())
    }

    pub fn is_held(&self, endpoint: &str) -> bool {
        self.held.contains_key(endpoint)
    }
}

/// Releases the endpoint when dropped.
pub struct Lease {
    held: Arc<DashMap<String, String>>,
    endpoint: String,
}

impl Lease {
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.held.remove(&self.endpoint);
        debug!(endpoint = %self.endpoint, "Released endpoint");
    }
}
