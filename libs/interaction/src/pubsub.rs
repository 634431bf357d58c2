//! Pub-Sub Routing Table
//!
//! Publisher listeners are keyed by `(endpoint URI, provider key)` and
//! subscriber notify listeners by `(endpoint URI, subscription id)`. A per-URI
//! index of subscription ids makes endpoint teardown a single lookup.

use crate::details::{provider_key_for_header, MessageDetails};
use crate::listener::{InteractionListener, PublishListener};
use mal_types::{MessageHeader, Subscription};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

/// Key of a publisher registration: endpoint URI and provider key
pub type PublisherKey = (String, String);

#[derive(Default)]
struct RoutingState {
    publishers: HashMap<PublisherKey, Arc<dyn PublishListener>>,
    notify: HashMap<(String, String), Arc<dyn InteractionListener>>,
    subscriptions_by_uri: HashMap<String, HashSet<String>>,
}

pub struct PubSubRoutingTable {
    separator: String,
    state: Mutex<RoutingState>,
}

impl std::fmt::Debug for PubSubRoutingTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("PubSubRoutingTable")
            .field("separator", &self.separator)
            .field("publishers", &state.publishers.len())
            .field("notify_listeners", &state.notify.len())
            .finish()
    }
}

impl PubSubRoutingTable {
    pub fn new(separator: impl Into<String>) -> Self {
        Self {
            separator: separator.into(),
            state: Mutex::new(RoutingState::default()),
        }
    }

    pub fn publisher_key(&self, details: &MessageDetails) -> PublisherKey {
        (
            details.endpoint_uri().to_string(),
            details.provider_key(&self.separator),
        )
    }

    /// Key of the publisher a broker reply is addressed to
    pub fn publisher_key_for_header(&self, header: &MessageHeader) -> PublisherKey {
        self.publisher_key_at(&header.uri_to, header)
    }

    /// Key of the publisher on `uri` whose session and domain `header` carries
    pub fn publisher_key_at(&self, uri: &str, header: &MessageHeader) -> PublisherKey {
        (
            uri.to_string(),
            provider_key_for_header(header, &self.separator),
        )
    }

    /// Register a publisher; an existing registration under the same key is replaced
    pub fn register_publish_listener(
        &self,
        details: &MessageDetails,
        listener: Arc<dyn PublishListener>,
    ) {
        let key = self.publisher_key(details);
        debug!(uri = %key.0, provider_key = %key.1, "Registered publish listener");
        self.state.lock().publishers.insert(key, listener);
    }

    pub fn get_publish_listener(&self, key: &PublisherKey) -> Option<Arc<dyn PublishListener>> {
        self.state.lock().publishers.get(key).cloned()
    }

    pub fn get_publish_listener_and_remove(
        &self,
        key: &PublisherKey,
    ) -> Option<Arc<dyn PublishListener>> {
        self.state.lock().publishers.remove(key)
    }

    /// Remove every publisher registered on `uri`
    pub fn get_publish_listeners_and_remove(&self, uri: &str) -> Vec<Arc<dyn PublishListener>> {
        let mut state = self.state.lock();
        let keys: Vec<PublisherKey> = state
            .publishers
            .keys()
            .filter(|(key_uri, _)| key_uri == uri)
            .cloned()
            .collect();
        keys.iter()
            .filter_map(|key| state.publishers.remove(key))
            .collect()
    }

    pub fn register_notify_listener(
        &self,
        details: &MessageDetails,
        subscription: &Subscription,
        listener: Arc<dyn InteractionListener>,
    ) {
        let uri = details.endpoint_uri().to_string();
        let id = subscription.subscription_id.clone();
        debug!(uri = %uri, subscription_id = %id, "Registered notify listener");

        let mut state = self.state.lock();
        state
            .subscriptions_by_uri
            .entry(uri.clone())
            .or_default()
            .insert(id.clone());
        state.notify.insert((uri, id), listener);
    }

    pub fn get_notify_listener(
        &self,
        uri: &str,
        subscription_id: &str,
    ) -> Option<Arc<dyn InteractionListener>> {
        self.state
            .lock()
            .notify
            .get(&(uri.to_string(), subscription_id.to_string()))
            .cloned()
    }

    /// Remove and return every notify listener on `uri` with its subscription id
    pub fn get_notify_listeners_and_remove(
        &self,
        uri: &str,
    ) -> Vec<(String, Arc<dyn InteractionListener>)> {
        let mut state = self.state.lock();
        let Some(ids) = state.subscriptions_by_uri.remove(uri) else {
            return Vec::new();
        };
        ids.into_iter()
            .filter_map(|id| {
                let listener = state.notify.remove(&(uri.to_string(), id.clone()))?;
                Some((id, listener))
            })
            .collect()
    }

    pub fn deregister_notify_listener(&self, details: &MessageDetails, subscription_ids: &[String]) {
        let uri = details.endpoint_uri().to_string();
        let mut state = self.state.lock();

        for id in subscription_ids {
            state.notify.remove(&(uri.clone(), id.clone()));
        }

        let bucket_empty = match state.subscriptions_by_uri.get_mut(&uri) {
            Some(ids) => {
                for id in subscription_ids {
                    ids.remove(id);
                }
                ids.is_empty()
            }
            None => false,
        };
        if bucket_empty {
            state.subscriptions_by_uri.remove(&uri);
        }
        debug!(uri = %uri, count = subscription_ids.len(), "Deregistered notify listeners");
    }

    pub fn notify_listener_count(&self) -> usize {
        self.state.lock().notify.len()
    }
}
