//! Read-through queries. Each one is disabled, returning an empty value
//! without touching the network, while nobody is signed in or when the id
//! it needs is missing.

use log::debug;

use crate::cache::{CachedQuery, QueryCacheExt, QueryData, QueryKey};
use crate::errors::ChatError;
use crate::models::conversations::{ChatMessage, Conversation};
use crate::state::AppState;

fn present(id: Option<&str>) -> Option<&str> {
    id.filter(|id| !id.is_empty())
}

fn fresh(state: &AppState, key: &QueryKey) -> Option<QueryData> {
    match state.cache.get(key) {
        Some(CachedQuery { data, stale: false }) => Some(data),
        _ => None,
    }
}

pub async fn conversations(state: &AppState) -> Result<Vec<Conversation>, ChatError> {
    let Some(user_id) = state.auth.user_id() else {
        return Ok(Vec::new());
    };
    let key = QueryKey::conversations(&user_id);

    if let Some(QueryData::Conversations(list)) = fresh(state, &key) {
        return Ok(list);
    }

    let list = state.api.list_conversations().await?;
    debug!("fetched {} conversations", list.len());
    state.cache.set(key, QueryData::Conversations(list.clone()));
    Ok(list)
}

pub async fn conversation(state: &AppState, id: Option<&str>) -> Result<Option<Conversation>, ChatError> {
    let (Some(id), Some(user_id)) = (present(id), state.auth.user_id()) else {
        return Ok(None);
    };
    let key = QueryKey::conversation(id, &user_id);

    if let Some(QueryData::Conversation(conversation)) = fresh(state, &key) {
        return Ok(conversation);
    }

    let conversation = state.api.get_conversation(id).await?;
    state.cache.set(key, QueryData::Conversation(Some(conversation.clone())));
    Ok(Some(conversation))
}

pub async fn messages(state: &AppState, conversation_id: Option<&str>) -> Result<Vec<ChatMessage>, ChatError> {
    let (Some(conversation_id), Some(user_id)) = (present(conversation_id), state.auth.user_id()) else {
        return Ok(Vec::new());
    };
    let key = QueryKey::messages(conversation_id, &user_id);

    if let Some(QueryData::Messages(list)) = fresh(state, &key) {
        return Ok(list);
    }

    let list = state.api.list_messages(conversation_id).await?;
    debug!("fetched {} messages for {conversation_id}", list.len());
    state.cache.set(key, QueryData::Messages(list.clone()));
    Ok(list)
}

/// Whatever is cached right now, stale or not, else `[]`. Never does I/O.
pub fn messages_snapshot(state: &AppState, conversation_id: Option<&str>) -> Vec<ChatMessage> {
    match (present(conversation_id), state.auth.user_id()) {
        (Some(conversation_id), Some(user_id)) => state.cache.messages(conversation_id, &user_id).unwrap_or_default(),
        _ => Vec::new(),
    }
}
