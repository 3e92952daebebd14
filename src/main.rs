use anyhow::{bail, Context};
use dotenv::dotenv;
use env_logger::Env;
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

use chatstream::cache::{upsert_message, CacheEvent, QueryCacheExt, QueryKey};
use chatstream::config::ClientConfig;
use chatstream::models::conversations::ChatMessage;
use chatstream::services::{
    create_conversation, queries, save_message, update_conversation, Chat, TitleOutcome,
};
use chatstream::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::init_from_env(Env::default().default_filter_or("info"));

    let config = ClientConfig::from_env().context("failed to load configuration")?;
    let state = AppState::new(config);
    let Some(user_id) = state.auth.user_id() else {
        bail!("CHAT_USER_ID must be set to start chatting");
    };
    log::info!("talking to {}", state.api.base_url());

    let chat = Chat::new(state.clone());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut conversation_id: Option<String> = None;

    prompt();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        match line {
            "" => {
                prompt();
                continue;
            }
            "/quit" => break,
            "/new" => {
                conversation_id = None;
                println!("(new conversation)");
                prompt();
                continue;
            }
            "/list" => {
                for conversation in queries::conversations(&state).await? {
                    println!("{}  {}", conversation.id, conversation.title);
                }
                prompt();
                continue;
            }
            _ => {}
        }

        let current_id = match &conversation_id {
            Some(id) => {
                save_message(&state, ChatMessage::user(id, &user_id, line)).await?;
                update_conversation(&state, id).await?;
                id.clone()
            }
            None => {
                let created = create_conversation(&state, line).await?;
                let title_task = created.title_task;
                tokio::spawn(async move {
                    if let TitleOutcome::Generated(title) = title_task.wait().await {
                        log::info!("conversation titled: {title}");
                    }
                });
                conversation_id = Some(created.conversation_id.clone());
                created.conversation_id
            }
        };

        let pending = ChatMessage::pending_assistant(&current_id, &user_id);
        state
            .cache
            .update_messages(&current_id, &user_id, |list| upsert_message(list, pending.clone()));
        let history = queries::messages_snapshot(&state, Some(&current_id));

        let done = CancellationToken::new();
        let printer = tokio::spawn(print_reply(
            state.clone(),
            current_id.clone(),
            user_id.clone(),
            pending.id.clone(),
            done.clone(),
        ));

        let result = chat.send(&current_id, &history, &pending.id).await;
        done.cancel();
        printer.await?;

        if let Err(e) = result {
            eprintln!("error: {e}");
        }
        prompt();
    }

    Ok(())
}

fn prompt() {
    print!("> ");
    let _ = std::io::stdout().flush();
}

/// Echoes the placeholder's content to stdout as the cache sees it grow.
async fn print_reply(
    state: AppState,
    conversation_id: String,
    user_id: String,
    message_id: String,
    done: CancellationToken,
) {
    let key = QueryKey::messages(&conversation_id, &user_id);
    let mut events = state.cache.subscribe();
    let mut printed = String::new();

    loop {
        tokio::select! {
            _ = done.cancelled() => {
                flush(&state, &conversation_id, &user_id, &message_id, &mut printed);
                println!();
                return;
            }
            event = events.recv() => match event {
                Ok(CacheEvent::Updated(updated)) if updated == key => {
                    flush(&state, &conversation_id, &user_id, &message_id, &mut printed);
                }
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => return,
            }
        }
    }
}

fn flush(state: &AppState, conversation_id: &str, user_id: &str, message_id: &str, printed: &mut String) {
    let Some(content) = state
        .cache
        .messages(conversation_id, user_id)
        .and_then(|list| list.into_iter().find(|msg| msg.id == message_id))
        .map(|msg| msg.content)
    else {
        return;
    };

    match content.strip_prefix(printed.as_str()) {
        Some(delta) => print!("{delta}"),
        // replaced wholesale, e.g. by the error text
        None => print!("\n{content}"),
    }
    let _ = std::io::stdout().flush();
    *printed = content;
}
