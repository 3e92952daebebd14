use chrono::Utc;
use futures_util::StreamExt;
use log::{debug, error, info};
use tokio::sync::watch;

use crate::cache::QueryCacheExt;
use crate::errors::ChatError;
use crate::models::conversations::{ChatMessage, Sender, PLACEHOLDER_USER_ID};
use crate::services::conversations::save_message;
use crate::state::AppState;
use crate::stream::send_message;

pub const ASSISTANT_ERROR_MESSAGE: &str =
    "Sorry, I encountered an error. Please make sure your API key is set correctly in the environment variables.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatPhase {
    Sending,
    Streaming,
    Finalizing,
    Succeeded,
    Failed,
}

impl ChatPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ChatPhase::Succeeded | ChatPhase::Failed)
    }
}

/// Drives conversational turns: streams the assistant reply into the
/// placeholder message, then persists it.
#[derive(Clone)]
pub struct Chat {
    state: AppState,
}

impl Chat {
    pub fn new(state: AppState) -> Self {
        Chat { state }
    }

    pub async fn send(
        &self,
        conversation_id: &str,
        messages: &[ChatMessage],
        pending_message_id: &str,
    ) -> Result<ChatMessage, ChatError> {
        let (phase, _) = watch::channel(ChatPhase::Sending);
        self.send_with_phase(conversation_id, messages, pending_message_id, &phase)
            .await
    }

    /// `messages` is the full history, ending with the placeholder assistant
    /// message whose id is `pending_message_id`. Every fragment rewrites that
    /// message's cached content with everything received so far.
    ///
    /// On failure the placeholder's content becomes
    /// [`ASSISTANT_ERROR_MESSAGE`], which is persisted before the original
    /// error is returned.
    pub async fn send_with_phase(
        &self,
        conversation_id: &str,
        messages: &[ChatMessage],
        pending_message_id: &str,
        phase: &watch::Sender<ChatPhase>,
    ) -> Result<ChatMessage, ChatError> {
        let user_id = self.state.auth.require_user_id()?;
        phase.send_replace(ChatPhase::Sending);

        match self
            .stream_and_persist(conversation_id, &user_id, messages, pending_message_id, phase)
            .await
        {
            Ok(assistant_message) => {
                phase.send_replace(ChatPhase::Succeeded);
                info!("assistant reply {pending_message_id} saved in {conversation_id}");
                Ok(assistant_message)
            }
            Err(e) => {
                error!("Chat API error: {e}");
                phase.send_replace(ChatPhase::Finalizing);

                self.state.cache.set_message_content(
                    conversation_id,
                    &user_id,
                    pending_message_id,
                    ASSISTANT_ERROR_MESSAGE,
                );
                let error_message = assistant_message(
                    conversation_id,
                    messages,
                    pending_message_id,
                    ASSISTANT_ERROR_MESSAGE.to_string(),
                );
                if let Err(save_error) = save_message(&self.state, error_message).await {
                    error!("failed to persist error reply {pending_message_id}: {save_error}");
                }

                phase.send_replace(ChatPhase::Failed);
                Err(e)
            }
        }
    }

    async fn stream_and_persist(
        &self,
        conversation_id: &str,
        user_id: &str,
        messages: &[ChatMessage],
        pending_message_id: &str,
        phase: &watch::Sender<ChatPhase>,
    ) -> Result<ChatMessage, ChatError> {
        let mut stream = send_message(&self.state.api, messages, self.state.config.stream_timeout);
        let mut full_response = String::new();

        while let Some(fragment) = stream.next().await {
            let fragment = fragment?;
            if full_response.is_empty() {
                phase.send_replace(ChatPhase::Streaming);
            }
            full_response.push_str(&fragment);
            self.state
                .cache
                .set_message_content(conversation_id, user_id, pending_message_id, &full_response);
        }
        debug!("stream for {pending_message_id} finished with {} bytes", full_response.len());

        phase.send_replace(ChatPhase::Finalizing);
        let reply = assistant_message(conversation_id, messages, pending_message_id, full_response);
        save_message(&self.state, reply.clone()).await?;
        Ok(reply)
    }
}

fn assistant_message(conversation_id: &str, history: &[ChatMessage], id: &str, content: String) -> ChatMessage {
    ChatMessage {
        id: id.to_string(),
        sender: Sender::Ai,
        content,
        created_at: Utc::now(),
        user_id: history
            .first()
            .map(|msg| msg.user_id.clone())
            .unwrap_or_else(|| PLACEHOLDER_USER_ID.to_string()),
        conversation_id: conversation_id.to_string(),
    }
}
