//! Short-lived copies of expensive responses, dropped when the data behind
//! them changes.

use chrono::{DateTime, Duration, Utc};
use futures::{Future, StreamExt as _};
use parking_lot::Mutex;
use serde::Serialize;
use std::{collections::BTreeMap, fmt, sync::Arc};
use tokio::select;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{Event, EventBus};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum Ttl {
    Short,
    Medium,
    Long,
}

impl Ttl {
    fn duration(self) -> Duration {
        match self {
            Self::Short => Duration::seconds(300),
            Self::Medium => Duration::seconds(1800),
            Self::Long => Duration::seconds(3600),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum Namespace {
    Data,
    Analytics,
    Models,
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Data => "data",
            Self::Analytics => "analytics",
            Self::Models => "models",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct Key {
    namespace: Namespace,
    name: String,
}

impl Key {
    /// Builds a key from the endpoint and its parameters.
    pub fn new(namespace: Namespace, endpoint: &str, params: &impl Serialize) -> Self {
        let params = serde_json::to_string(params).unwrap_or_default();
        Self {
            namespace,
            name: format!("{endpoint}:{params}"),
        }
    }
}

#[derive(Debug)]
struct Entry {
    value: serde_json::Value,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct ResponseCache(Arc<Mutex<BTreeMap<Key, Entry>>>);

impl ResponseCache {
    pub fn get(&self, key: &Key, now: DateTime<Utc>) -> Option<serde_json::Value> {
        let mut entries = self.0.lock();
        match entries.get(key) {
            Some(e) if e.expires_at > now => Some(e.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Stores `value`, dropping anything that has already expired.
    pub fn insert(&self, key: Key, value: serde_json::Value, ttl: Ttl, now: DateTime<Utc>) {
        let expires_at = now + ttl.duration();
        let mut entries = self.0.lock();
        entries.retain(|_, e| e.expires_at > now);
        entries.insert(key, Entry { value, expires_at });
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.0.lock().len()
    }

    /// Returns the cached response or computes, stores and returns it.
    pub async fn fetch<T, E, Fut>(
        &self,
        key: Key,
        ttl: Ttl,
        now: DateTime<Utc>,
        compute: impl FnOnce() -> Fut,
    ) -> Result<serde_json::Value, E>
    where
        T: Serialize,
        E: From<serde_json::Error>,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(value) = self.get(&key, now) {
            debug!(namespace = %key.namespace, key = %key.name, "Cache hit");
            return Ok(value);
        }

        let value = serde_json::to_value(compute().await?)?;
        self.insert(key, value.clone(), ttl, now);
        Ok(value)
    }

    /// Drops every entry in `namespace`, returning how many there were.
    pub fn invalidate(&self, namespace: Namespace) -> usize {
        let mut entries = self.0.lock();
        let before = entries.len();
        entries.retain(|k, _| k.namespace != namespace);
        before - entries.len()
    }

    pub fn clear(&self) {
        self.0.lock().clear();
    }
}

/// Invalidates cached responses as the underlying data changes.
pub(crate) async fn task(cache: ResponseCache, event_bus: EventBus, token: CancellationToken) {
    let mut events = event_bus.listen();

    loop {
        select! {
            () = token.cancelled() => break,
            Some(event) = events.next() => match event {
                Ok(event) => handle_event(&cache, event),
                Err(BroadcastStreamRecvError::Lagged(amt)) => {
                    warn!("Lost {amt} events due to lag, clearing the cache");
                    cache.clear();
                }
            },
        }
    }
}

fn handle_event(cache: &ResponseCache, event: Event) {
    match event {
        Event::SessionsChanged => {
            let removed = cache.invalidate(Namespace::Data) + cache.invalidate(Namespace::Analytics);
            debug!(removed, "Sessions changed");
        }

        Event::ModelChanged { name } => {
            let removed = cache.invalidate(Namespace::Models);
            debug!(model = %name, removed, "Model changed");
        }
    }
}
