//! Client-side query cache.
//!
//! Entries are keyed by [`QueryKey`], which always carries the owning user's
//! id so one cache instance never serves one user's data to another. Writes
//! go through merge functions and every change is broadcast to subscribers
//! as a [`CacheEvent`].

mod memory;

pub use memory::MemoryCache;

use tokio::sync::broadcast;

use crate::models::conversations::{ChatMessage, Conversation};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum QueryKey {
    Conversations { user_id: String },
    Conversation { id: String, user_id: String },
    Messages { conversation_id: String, user_id: String },
}

impl QueryKey {
    pub fn conversations(user_id: &str) -> Self {
        QueryKey::Conversations {
            user_id: user_id.to_string(),
        }
    }

    pub fn conversation(id: &str, user_id: &str) -> Self {
        QueryKey::Conversation {
            id: id.to_string(),
            user_id: user_id.to_string(),
        }
    }

    pub fn messages(conversation_id: &str, user_id: &str) -> Self {
        QueryKey::Messages {
            conversation_id: conversation_id.to_string(),
            user_id: user_id.to_string(),
        }
    }

    pub fn user_id(&self) -> &str {
        match self {
            QueryKey::Conversations { user_id }
            | QueryKey::Conversation { user_id, .. }
            | QueryKey::Messages { user_id, .. } => user_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueryData {
    Conversations(Vec<Conversation>),
    Conversation(Option<Conversation>),
    Messages(Vec<ChatMessage>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CachedQuery {
    pub data: QueryData,
    /// Set by [`QueryCache::invalidate`]; the next read-through query refetches.
    pub stale: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CacheEvent {
    Updated(QueryKey),
    Invalidated(QueryKey),
    Removed(QueryKey),
}

impl CacheEvent {
    pub fn key(&self) -> &QueryKey {
        match self {
            CacheEvent::Updated(key) | CacheEvent::Invalidated(key) | CacheEvent::Removed(key) => key,
        }
    }
}

/// Storage seam for the query cache. [`MemoryCache`] is the default; any
/// store that can hold [`QueryData`] per key and broadcast changes fits.
pub trait QueryCache: Send + Sync {
    fn get(&self, key: &QueryKey) -> Option<CachedQuery>;

    fn set(&self, key: QueryKey, data: QueryData);

    /// Runs `f` against the current entry. `Some` replaces the data and
    /// keeps the stale flag as it was, `None` leaves it untouched. Only
    /// [`QueryCache::set`] marks an entry fresh. `f` must not call
    /// back into the cache.
    fn merge(&self, key: &QueryKey, f: &mut dyn FnMut(Option<&QueryData>) -> Option<QueryData>) -> bool;

    fn invalidate(&self, key: &QueryKey);

    fn remove(&self, key: &QueryKey);

    fn subscribe(&self) -> broadcast::Receiver<CacheEvent>;
}

/// Typed accessors on top of [`QueryCache`].
pub trait QueryCacheExt: QueryCache {
    fn conversations(&self, user_id: &str) -> Option<Vec<Conversation>> {
        match self.get(&QueryKey::conversations(user_id))?.data {
            QueryData::Conversations(list) => Some(list),
            _ => None,
        }
    }

    fn conversation(&self, id: &str, user_id: &str) -> Option<Conversation> {
        match self.get(&QueryKey::conversation(id, user_id))?.data {
            QueryData::Conversation(conversation) => conversation,
            _ => None,
        }
    }

    fn messages(&self, conversation_id: &str, user_id: &str) -> Option<Vec<ChatMessage>> {
        match self.get(&QueryKey::messages(conversation_id, user_id))?.data {
            QueryData::Messages(list) => Some(list),
            _ => None,
        }
    }

    /// `f` receives the cached list, or an empty one when nothing is cached
    /// yet, and the result is written back.
    fn update_conversations<F>(&self, user_id: &str, mut f: F)
    where
        F: FnMut(Vec<Conversation>) -> Vec<Conversation>,
    {
        self.merge(&QueryKey::conversations(user_id), &mut |current| {
            let list = match current {
                Some(QueryData::Conversations(list)) => list.clone(),
                _ => Vec::new(),
            };
            Some(QueryData::Conversations(f(list)))
        });
    }

    /// Only touches an entry that is already cached.
    fn update_conversation<F>(&self, id: &str, user_id: &str, mut f: F) -> bool
    where
        F: FnMut(Conversation) -> Conversation,
    {
        self.merge(&QueryKey::conversation(id, user_id), &mut |current| match current {
            Some(QueryData::Conversation(Some(conversation))) => {
                Some(QueryData::Conversation(Some(f(conversation.clone()))))
            }
            _ => None,
        })
    }

    fn update_messages<F>(&self, conversation_id: &str, user_id: &str, mut f: F)
    where
        F: FnMut(Vec<ChatMessage>) -> Vec<ChatMessage>,
    {
        self.merge(&QueryKey::messages(conversation_id, user_id), &mut |current| {
            let list = match current {
                Some(QueryData::Messages(list)) => list.clone(),
                _ => Vec::new(),
            };
            Some(QueryData::Messages(f(list)))
        });
    }

    /// Rewrites the content of one cached message. No-op when the list is
    /// not cached.
    fn set_message_content(&self, conversation_id: &str, user_id: &str, message_id: &str, content: &str) -> bool {
        self.merge(&QueryKey::messages(conversation_id, user_id), &mut |current| match current {
            Some(QueryData::Messages(list)) => Some(QueryData::Messages(
                list.iter()
                    .map(|msg| {
                        if msg.id == message_id {
                            ChatMessage {
                                content: content.to_string(),
                                ..msg.clone()
                            }
                        } else {
                            msg.clone()
                        }
                    })
                    .collect(),
            )),
            _ => None,
        })
    }
}

impl<T: QueryCache + ?Sized> QueryCacheExt for T {}

/// Replace the message with the same id in place, else append.
pub fn upsert_message(mut list: Vec<ChatMessage>, message: ChatMessage) -> Vec<ChatMessage> {
    match list.iter().position(|msg| msg.id == message.id) {
        Some(index) => list[index] = message,
        None => list.push(message),
    }
    list
}
