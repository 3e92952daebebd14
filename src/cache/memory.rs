use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use log::debug;
use std::sync::Arc;
use tokio::sync::broadcast;

use super::{CacheEvent, CachedQuery, QueryCache, QueryData, QueryKey};

const EVENT_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct MemoryCache {
    entries: Arc<DashMap<QueryKey, CachedQuery>>,
    events: broadcast::Sender<CacheEvent>,
}

impl Default for MemoryCache {
    fn default() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            entries: Arc::new(DashMap::new()),
            events,
        }
    }
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn notify(&self, event: CacheEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }
}

impl QueryCache for MemoryCache {
    fn get(&self, key: &QueryKey) -> Option<CachedQuery> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    fn set(&self, key: QueryKey, data: QueryData) {
        self.entries.insert(key.clone(), CachedQuery { data, stale: false });
        self.notify(CacheEvent::Updated(key));
    }

    fn merge(&self, key: &QueryKey, f: &mut dyn FnMut(Option<&QueryData>) -> Option<QueryData>) -> bool {
        let changed = match self.entries.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                let stale = occupied.get().stale;
                let next = f(Some(&occupied.get().data));
                match next {
                    Some(data) => {
                        // a local edit is not a refetch, keep any pending invalidation
                        occupied.insert(CachedQuery { data, stale });
                        true
                    }
                    None => false,
                }
            }
            Entry::Vacant(vacant) => match f(None) {
                Some(data) => {
                    vacant.insert(CachedQuery { data, stale: false });
                    true
                }
                None => false,
            },
        };

        if changed {
            self.notify(CacheEvent::Updated(key.clone()));
        }
        changed
    }

    fn invalidate(&self, key: &QueryKey) {
        if let Some(mut entry) = self.entries.get_mut(key) {
            entry.stale = true;
        }
        debug!("invalidated {key:?}");
        self.notify(CacheEvent::Invalidated(key.clone()));
    }

    fn remove(&self, key: &QueryKey) {
        if self.entries.remove(key).is_some() {
            self.notify(CacheEvent::Removed(key.clone()));
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.events.subscribe()
    }
}
