use async_trait::async_trait;
use futures_util::StreamExt;
use log::{debug, error, info};
use std::time::Duration;
use tokio::sync::oneshot;

use crate::api::ApiClient;
use crate::cache::QueryCacheExt;
use crate::errors::ChatError;
use crate::models::conversations::{ChatMessage, PLACEHOLDER_USER_ID};
use crate::services::conversations::apply_title;
use crate::state::AppState;
use crate::stream::send_message;

pub const FALLBACK_TITLE: &str = "New Conversation";
const MAX_TITLE_CHARS: usize = 150;

/// Produces a display title from a conversation's first message.
#[async_trait]
pub trait TitleGenerator: Send + Sync {
    async fn generate(&self, first_message: &str) -> anyhow::Result<String>;
}

/// Asks the completion endpoint for a title and collects the streamed reply.
pub struct RemoteTitleGenerator {
    api: ApiClient,
    timeout: Duration,
}

impl RemoteTitleGenerator {
    pub fn new(api: ApiClient, timeout: Duration) -> Self {
        RemoteTitleGenerator { api, timeout }
    }
}

#[async_trait]
impl TitleGenerator for RemoteTitleGenerator {
    async fn generate(&self, first_message: &str) -> anyhow::Result<String> {
        let prompt = format!(
            "Create a concise title (7 words or less) for a conversation that starts with this message: \"{}\"\n\nTitle:",
            first_message.chars().take(200).collect::<String>()
        );
        let request = [ChatMessage::user("", PLACEHOLDER_USER_ID, prompt)];

        let mut stream = send_message(&self.api, &request, self.timeout);
        let mut accumulated_title = String::new();
        while let Some(fragment) = stream.next().await {
            accumulated_title.push_str(&fragment?);
        }

        Ok(normalize_title(&accumulated_title))
    }
}

pub fn normalize_title(raw: &str) -> String {
    let title = raw.trim().trim_matches('"').trim();

    if title.chars().count() > MAX_TITLE_CHARS {
        title.chars().take(MAX_TITLE_CHARS - 3).collect::<String>() + "..."
    } else if title.is_empty() {
        FALLBACK_TITLE.to_string()
    } else {
        title.to_string()
    }
}

#[derive(Debug)]
pub enum TitleOutcome {
    Generated(String),
    /// The placeholder title was kept and the generating flag cleared.
    Failed(ChatError),
}

/// Handle to a title generation running detached from the mutation that
/// started it. Dropping the handle does not stop the task.
pub struct TitleTask {
    outcome: oneshot::Receiver<TitleOutcome>,
}

impl TitleTask {
    pub async fn wait(self) -> TitleOutcome {
        match self.outcome.await {
            Ok(outcome) => outcome,
            Err(_) => TitleOutcome::Failed(ChatError::GeneratedTitleFailed(
                "title task ended without reporting".to_string(),
            )),
        }
    }
}

pub fn spawn_title_task(state: AppState, conversation_id: String, user_id: String, first_message: String) -> TitleTask {
    let (tx, outcome) = oneshot::channel();

    tokio::spawn(async move {
        let result = generate_and_apply(&state, &conversation_id, &user_id, &first_message).await;
        let outcome = match result {
            Ok(title) => {
                info!("Updated conversation {conversation_id} title to: {title}");
                TitleOutcome::Generated(title)
            }
            Err(e) => {
                error!("Failed to generate chat title: {e}");
                clear_generating_flag(&state, &conversation_id, &user_id);
                TitleOutcome::Failed(e)
            }
        };
        let _ = tx.send(outcome);
    });

    TitleTask { outcome }
}

async fn generate_and_apply(
    state: &AppState,
    conversation_id: &str,
    user_id: &str,
    first_message: &str,
) -> Result<String, ChatError> {
    let title = state
        .title_generator
        .generate(first_message)
        .await
        .map_err(|e| ChatError::GeneratedTitleFailed(e.to_string()))?;
    debug!("generated title for {conversation_id}: {title}");

    apply_title(state, conversation_id, user_id, &title).await?;
    Ok(title)
}

fn clear_generating_flag(state: &AppState, conversation_id: &str, user_id: &str) {
    state.cache.update_conversations(user_id, |list| {
        list.into_iter()
            .map(|mut conversation| {
                if conversation.id == conversation_id {
                    conversation.is_title_generating = false;
                }
                conversation
            })
            .collect()
    });
    state.cache.update_conversation(conversation_id, user_id, |mut conversation| {
        conversation.is_title_generating = false;
        conversation
    });
}
