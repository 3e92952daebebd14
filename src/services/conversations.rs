use log::{debug, error, info};

use crate::cache::{upsert_message, QueryCacheExt, QueryData, QueryKey};
use crate::errors::ChatError;
use crate::models::conversations::{ChatMessage, Conversation, NewConversation, UpdateConversation};
use crate::services::title_generation::{spawn_title_task, TitleTask};
use crate::state::AppState;

pub struct CreatedConversation {
    /// Canonical id, as returned by the server.
    pub conversation_id: String,
    pub conversation: Conversation,
    pub first_message: ChatMessage,
    /// Title generation keeps running after the mutation returns.
    pub title_task: TitleTask,
}

/// Starts a conversation from its first user message.
///
/// A "New Chat" placeholder goes to the head of the cached list before the
/// server is asked to create the conversation; the server's id then replaces
/// the client-side one everywhere. The first message is persisted under that
/// id and a detached task generates the real title. The conversation list is
/// invalidated once the mutation settles, whether it succeeded or not.
pub async fn create_conversation(state: &AppState, first_message: &str) -> Result<CreatedConversation, ChatError> {
    let user_id = state.auth.require_user_id()?;

    let result = create_and_seed(state, &user_id, first_message).await;

    state.cache.invalidate(&QueryKey::conversations(&user_id));
    result
}

async fn create_and_seed(state: &AppState, user_id: &str, first_message: &str) -> Result<CreatedConversation, ChatError> {
    let mut conversation = Conversation::placeholder(user_id);
    let client_id = conversation.id.clone();

    state.cache.update_conversations(user_id, |list| {
        let mut next = Vec::with_capacity(list.len() + 1);
        next.push(conversation.clone());
        next.extend(list);
        next
    });

    let body = NewConversation {
        id: &conversation.id,
        title: &conversation.title,
    };
    let created = match state.api.create_conversation(&body).await {
        Ok(created) => created,
        Err(e) => {
            error!("failed to create conversation {client_id}: {e}");
            state.cache.update_conversations(user_id, |list| {
                list.into_iter().filter(|c| c.id != client_id).collect()
            });
            return Err(e);
        }
    };

    if created.id != client_id {
        debug!("server assigned id {} to conversation {client_id}", created.id);
        conversation.id = created.id.clone();
        state.cache.update_conversations(user_id, |list| {
            list.into_iter()
                .map(|mut c| {
                    if c.id == client_id {
                        c.id = created.id.clone();
                    }
                    c
                })
                .collect()
        });
    }

    let message = ChatMessage::user(&conversation.id, user_id, first_message);
    state.api.save_message(&message).await?;
    state.cache.set(
        QueryKey::messages(&conversation.id, user_id),
        QueryData::Messages(vec![message.clone()]),
    );

    let title_task = spawn_title_task(
        state.clone(),
        conversation.id.clone(),
        user_id.to_string(),
        first_message.to_string(),
    );

    info!("created conversation {}", conversation.id);
    Ok(CreatedConversation {
        conversation_id: conversation.id.clone(),
        conversation,
        first_message: message,
        title_task,
    })
}

/// Stamps the message with the signed-in user, merges it into the cached
/// list for its conversation (same id replaces in place, otherwise append),
/// persists it, then invalidates that list.
pub async fn save_message(state: &AppState, message: ChatMessage) -> Result<ChatMessage, ChatError> {
    let user_id = state.auth.require_user_id()?;
    let message_to_save = ChatMessage {
        user_id: user_id.clone(),
        ..message
    };
    let conversation_id = message_to_save.conversation_id.clone();

    state.cache.update_messages(&conversation_id, &user_id, |list| {
        upsert_message(list, message_to_save.clone())
    });

    let saved = state.api.save_message(&message_to_save).await?;
    debug!("saved message {} in {conversation_id}", saved.id);

    state.cache.invalidate(&QueryKey::messages(&conversation_id, &user_id));
    Ok(saved)
}

/// Touches the conversation server-side (empty update) and invalidates
/// both the list and the single-conversation entry.
pub async fn update_conversation(state: &AppState, conversation_id: &str) -> Result<(), ChatError> {
    let user_id = state.auth.require_user_id()?;

    state
        .api
        .update_conversation(conversation_id, &UpdateConversation::default())
        .await?;

    state.cache.invalidate(&QueryKey::conversations(&user_id));
    state.cache.invalidate(&QueryKey::conversation(conversation_id, &user_id));
    Ok(())
}

pub async fn rename_conversation(state: &AppState, conversation_id: &str, title: &str) -> Result<(), ChatError> {
    let user_id = state.auth.require_user_id()?;
    apply_title(state, conversation_id, &user_id, title).await
}

/// Persists `title` and writes it to both conversation caches, clearing
/// the generating flag.
pub(crate) async fn apply_title(
    state: &AppState,
    conversation_id: &str,
    user_id: &str,
    title: &str,
) -> Result<(), ChatError> {
    state
        .api
        .update_conversation(conversation_id, &UpdateConversation { title: Some(title) })
        .await?;

    state.cache.update_conversations(user_id, |list| {
        list.into_iter()
            .map(|mut conversation| {
                if conversation.id == conversation_id {
                    conversation.title = title.to_string();
                    conversation.is_title_generating = false;
                }
                conversation
            })
            .collect()
    });
    state.cache.update_conversation(conversation_id, user_id, |mut conversation| {
        conversation.title = title.to_string();
        conversation.is_title_generating = false;
        conversation
    });
    Ok(())
}
