//! Provider Interaction Table
//!
//! Maps locally allocated ids to the URI and transaction id of the
//! interaction they were created for, so a provider relaying work onward can
//! route the eventual reply back to its source.

use crate::transaction::TransactionIdAllocator;
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Origin of a relayed interaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionSource {
    pub uri: String,
    pub transaction_id: u64,
}

#[derive(Debug)]
pub struct ProviderInteractionTable {
    allocator: TransactionIdAllocator,
    sources: Mutex<HashMap<u64, TransactionSource>>,
}

impl ProviderInteractionTable {
    pub fn new(allocator: TransactionIdAllocator) -> Self {
        Self {
            allocator,
            sources: Mutex::new(HashMap::new()),
        }
    }

    /// Record a source and return the local id it is known by
    pub fn add_transaction_source(&self, uri: impl Into<String>, transaction_id: u64) -> u64 {
        let mut sources = self.sources.lock();
        let id = self.allocator.next(|id| sources.contains_key(&id));
        let source = TransactionSource {
            uri: uri.into(),
            transaction_id,
        };
        debug!(id, uri = %source.uri, transaction_id, "Added transaction source");
        sources.insert(id, source);
        id
    }

    pub fn resolve_transaction_source(&self, id: u64) -> Option<TransactionSource> {
        self.sources.lock().get(&id).cloned()
    }

    pub fn remove_transaction_source(&self, id: u64) -> Option<TransactionSource> {
        let removed = self.sources.lock().remove(&id);
        if removed.is_none() {
            warn!(id, "Removing unknown transaction source");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.sources.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.lock().is_empty()
    }
}
