#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    body::{Body, Bytes},
    extract::{Path, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use url::Url;

use chatstream::config::ClientConfig;
use chatstream::models::conversations::{ChatMessage, Conversation};
use chatstream::models::users::UserView;
use chatstream::services::TitleGenerator;
use chatstream::AppState;

/// What `/api/openrouter` answers with.
#[derive(Clone)]
pub enum Completion {
    Chunks(Vec<&'static str>),
    /// Sends the chunks, then drops the connection mid-body.
    FailAfter(Vec<&'static str>),
    Status(u16, Value),
    PlainStatus(u16),
    NoContent,
    Hang,
}

struct Inner {
    user_id: String,
    conversations: Vec<Conversation>,
    messages: Vec<ChatMessage>,
    updates: Vec<(String, Value)>,
    completion_bodies: Vec<Value>,
    hits: HashMap<&'static str, usize>,
    completion: Completion,
    server_id: Option<String>,
    fail_create: bool,
    create_gate: Option<CreateGate>,
    authorization: Vec<Option<String>>,
    abandoned_completions: usize,
}

/// Holds the create handler until `release` is notified; `arrived` fires
/// once the request reached the backend.
#[derive(Clone)]
pub struct CreateGate {
    pub arrived: Arc<Notify>,
    pub release: Arc<Notify>,
}

impl CreateGate {
    pub fn new() -> Self {
        CreateGate {
            arrived: Arc::new(Notify::new()),
            release: Arc::new(Notify::new()),
        }
    }
}

/// Counts completion handlers dropped before they finished, which is what
/// happens when the client goes away mid-request.
struct AbandonGuard {
    backend: MockBackend,
    finished: bool,
}

impl Drop for AbandonGuard {
    fn drop(&mut self) {
        if !self.finished {
            self.backend.inner.lock().unwrap().abandoned_completions += 1;
        }
    }
}

#[derive(Clone)]
pub struct MockBackend {
    inner: Arc<Mutex<Inner>>,
}

impl MockBackend {
    pub fn new(completion: Completion) -> Self {
        MockBackend {
            inner: Arc::new(Mutex::new(Inner {
                user_id: "u1".to_string(),
                conversations: Vec::new(),
                messages: Vec::new(),
                updates: Vec::new(),
                completion_bodies: Vec::new(),
                hits: HashMap::new(),
                completion,
                server_id: None,
                fail_create: false,
                create_gate: None,
                authorization: Vec::new(),
                abandoned_completions: 0,
            })),
        }
    }

    pub fn assign_id(self, id: &str) -> Self {
        self.inner.lock().unwrap().server_id = Some(id.to_string());
        self
    }

    pub fn failing_create(self) -> Self {
        self.inner.lock().unwrap().fail_create = true;
        self
    }

    pub fn gated_create(self, gate: CreateGate) -> Self {
        self.inner.lock().unwrap().create_gate = Some(gate);
        self
    }

    pub fn with_conversation(self, id: &str, title: &str) -> Self {
        {
            let mut inner = self.inner.lock().unwrap();
            let user_id = inner.user_id.clone();
            inner.conversations.push(Conversation {
                id: id.to_string(),
                user_id,
                title: title.to_string(),
                created_at: Utc::now(),
                is_title_generating: false,
            });
        }
        self
    }

    pub fn with_message(self, message: ChatMessage) -> Self {
        self.inner.lock().unwrap().messages.push(message);
        self
    }

    pub fn hits(&self, route: &str) -> usize {
        self.inner.lock().unwrap().hits.get(route).copied().unwrap_or(0)
    }

    pub fn total_hits(&self) -> usize {
        self.inner.lock().unwrap().hits.values().sum()
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        self.inner.lock().unwrap().messages.clone()
    }

    pub fn updates(&self) -> Vec<(String, Value)> {
        self.inner.lock().unwrap().updates.clone()
    }

    pub fn completion_bodies(&self) -> Vec<Value> {
        self.inner.lock().unwrap().completion_bodies.clone()
    }

    /// `Authorization` header of every completion request, in order.
    pub fn authorization(&self) -> Vec<Option<String>> {
        self.inner.lock().unwrap().authorization.clone()
    }

    pub fn abandoned_completions(&self) -> usize {
        self.inner.lock().unwrap().abandoned_completions
    }

    fn hit(&self, route: &'static str) {
        *self.inner.lock().unwrap().hits.entry(route).or_insert(0) += 1;
    }

    pub async fn spawn(&self) -> Url {
        let app = Router::new()
            .route("/api/conversations", get(list_conversations).post(create_conversation))
            .route(
                "/api/conversations/{id}",
                get(get_conversation).put(update_conversation),
            )
            .route("/api/conversations/{id}/messages", get(list_messages))
            .route("/api/messages", post(save_message))
            .route("/api/openrouter", post(completion))
            .with_state(self.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Url::parse(&format!("http://{addr}")).unwrap()
    }
}

async fn list_conversations(State(backend): State<MockBackend>) -> Json<Vec<Conversation>> {
    backend.hit("list_conversations");
    Json(backend.inner.lock().unwrap().conversations.clone())
}

#[derive(Deserialize)]
struct NewConversationBody {
    id: String,
    title: String,
}

async fn create_conversation(
    State(backend): State<MockBackend>,
    Json(body): Json<NewConversationBody>,
) -> Response {
    backend.hit("create_conversation");
    let gate = backend.inner.lock().unwrap().create_gate.clone();
    if let Some(gate) = gate {
        gate.arrived.notify_one();
        gate.release.notified().await;
    }

    let mut inner = backend.inner.lock().unwrap();
    if inner.fail_create {
        return (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": "database unavailable"}))).into_response();
    }

    let conversation = Conversation {
        id: inner.server_id.clone().unwrap_or(body.id),
        user_id: inner.user_id.clone(),
        title: body.title,
        created_at: Utc::now(),
        is_title_generating: false,
    };
    inner.conversations.insert(0, conversation.clone());
    Json(conversation).into_response()
}

async fn get_conversation(State(backend): State<MockBackend>, Path(id): Path<String>) -> Response {
    backend.hit("get_conversation");
    let inner = backend.inner.lock().unwrap();
    match inner.conversations.iter().find(|c| c.id == id) {
        Some(conversation) => Json(conversation.clone()).into_response(),
        None => (StatusCode::NOT_FOUND, Json(json!({"error": "conversation not found"}))).into_response(),
    }
}

async fn update_conversation(
    State(backend): State<MockBackend>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> Json<Value> {
    backend.hit("update_conversation");
    let mut inner = backend.inner.lock().unwrap();
    if let Some(title) = body.get("title").and_then(|t| t.as_str()) {
        if let Some(conversation) = inner.conversations.iter_mut().find(|c| c.id == id) {
            conversation.title = title.to_string();
        }
    }
    inner.updates.push((id, body));
    Json(json!({"ok": true}))
}

async fn list_messages(State(backend): State<MockBackend>, Path(id): Path<String>) -> Json<Vec<ChatMessage>> {
    backend.hit("list_messages");
    let inner = backend.inner.lock().unwrap();
    Json(
        inner
            .messages
            .iter()
            .filter(|m| m.conversation_id == id)
            .cloned()
            .collect(),
    )
}

async fn save_message(State(backend): State<MockBackend>, Json(message): Json<ChatMessage>) -> Json<ChatMessage> {
    backend.hit("save_message");
    let mut inner = backend.inner.lock().unwrap();
    match inner.messages.iter().position(|m| m.id == message.id) {
        Some(index) => inner.messages[index] = message.clone(),
        None => inner.messages.push(message.clone()),
    }
    Json(message)
}

async fn completion(State(backend): State<MockBackend>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    backend.hit("completion");
    let completion = {
        let mut inner = backend.inner.lock().unwrap();
        inner.completion_bodies.push(body);
        inner.authorization.push(
            headers
                .get(AUTHORIZATION)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string),
        );
        inner.completion.clone()
    };
    let mut guard = AbandonGuard {
        backend: backend.clone(),
        finished: false,
    };

    let response = match completion {
        Completion::Chunks(chunks) => Body::from_stream(chunked(chunks, false)).into_response(),
        Completion::FailAfter(chunks) => Body::from_stream(chunked(chunks, true)).into_response(),
        Completion::Status(code, payload) => {
            (StatusCode::from_u16(code).unwrap(), Json(payload)).into_response()
        }
        Completion::PlainStatus(code) => (StatusCode::from_u16(code).unwrap(), "upstream exploded").into_response(),
        Completion::NoContent => StatusCode::NO_CONTENT.into_response(),
        Completion::Hang => {
            tokio::time::sleep(Duration::from_secs(30)).await;
            "too late".into_response()
        }
    };
    guard.finished = true;
    response
}

fn chunked(
    chunks: Vec<&'static str>,
    fail_at_end: bool,
) -> impl futures::Stream<Item = Result<Bytes, std::io::Error>> + Send + 'static {
    futures::stream::unfold((chunks.into_iter(), fail_at_end), |(mut chunks, fail_at_end)| async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        match chunks.next() {
            Some(chunk) => Some((Ok(Bytes::from_static(chunk.as_bytes())), (chunks, fail_at_end))),
            None if fail_at_end => Some((
                Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "model crashed")),
                (chunks, false),
            )),
            None => None,
        }
    })
}

/// Releases its title only once `release` is notified.
pub struct GatedTitle {
    pub title: &'static str,
    pub release: Arc<Notify>,
}

#[async_trait]
impl TitleGenerator for GatedTitle {
    async fn generate(&self, _first_message: &str) -> anyhow::Result<String> {
        self.release.notified().await;
        Ok(self.title.to_string())
    }
}

pub struct FailingTitle;

#[async_trait]
impl TitleGenerator for FailingTitle {
    async fn generate(&self, _first_message: &str) -> anyhow::Result<String> {
        anyhow::bail!("model unavailable")
    }
}

pub fn state_for(base_url: Url, user_id: Option<&str>) -> AppState {
    let config = ClientConfig::new(base_url).with_stream_timeout(Duration::from_secs(5));
    let state = AppState::new(config).with_title_generator(Arc::new(FailingTitle));
    if let Some(user_id) = user_id {
        state.auth.sign_in(UserView::new(user_id));
    }
    state
}
