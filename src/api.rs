use http::StatusCode;
use log::debug;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use url::Url;

use crate::config::ClientConfig;
use crate::errors::ChatError;
use crate::models::conversations::{
    ChatMessage, CompletionRequest, Conversation, NewConversation, ResponsePayload, UpdateConversation,
};

/// Thin typed wrapper over the backend's REST routes.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: Url,
    api_token: Option<String>,
}

impl ApiClient {
    pub fn new(config: &ClientConfig) -> Self {
        let mut base_url = config.api_base_url.clone();
        // relative joins drop the last segment unless the base ends in '/'
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        ApiClient {
            client: Client::new(),
            base_url,
            api_token: config.api_token.clone(),
        }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn endpoint(&self, path: &str) -> Result<Url, ChatError> {
        Ok(self.base_url.join(path.trim_start_matches('/'))?)
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, ChatError> {
        let url = self.endpoint(path)?;
        debug!("{method} {url}");
        let builder = self.client.request(method, url);
        Ok(match &self.api_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        })
    }

    pub async fn list_conversations(&self) -> Result<Vec<Conversation>, ChatError> {
        let response = self.request(Method::GET, "api/conversations")?.send().await?;
        read_json(response).await
    }

    pub async fn create_conversation(&self, body: &NewConversation<'_>) -> Result<Conversation, ChatError> {
        let response = self
            .request(Method::POST, "api/conversations")?
            .json(body)
            .send()
            .await?;
        read_json(response).await
    }

    pub async fn update_conversation(&self, id: &str, body: &UpdateConversation<'_>) -> Result<(), ChatError> {
        let path = format!("api/conversations/{}", urlencoding::encode(id));
        let response = self.request(Method::PUT, &path)?.json(body).send().await?;
        ensure_success(response).await.map(|_| ())
    }

    pub async fn get_conversation(&self, id: &str) -> Result<Conversation, ChatError> {
        let path = format!("api/conversations/{}", urlencoding::encode(id));
        let response = self.request(Method::GET, &path)?.send().await?;
        read_json(response).await
    }

    pub async fn list_messages(&self, conversation_id: &str) -> Result<Vec<ChatMessage>, ChatError> {
        let path = format!("api/conversations/{}/messages", urlencoding::encode(conversation_id));
        let response = self.request(Method::GET, &path)?.send().await?;
        read_json(response).await
    }

    pub async fn save_message(&self, message: &ChatMessage) -> Result<ChatMessage, ChatError> {
        let response = self
            .request(Method::POST, "api/messages")?
            .json(message)
            .send()
            .await?;
        read_json(response).await
    }

    /// Unsent completion request; the stream module owns sending it.
    pub fn completion_request(&self, messages: &[ChatMessage]) -> Result<RequestBuilder, ChatError> {
        Ok(self
            .request(Method::POST, "api/openrouter")?
            .json(&CompletionRequest { messages }))
    }
}

/// Builds the error for a non-success response from its optional
/// `{error, content}` payload, falling back to the status code.
pub async fn remote_failure(response: Response) -> ChatError {
    let status = response.status();
    let payload = response.json::<ResponsePayload>().await.unwrap_or_default();
    ChatError::RemoteRequestFailed {
        status,
        message: failure_message(status, payload),
    }
}

pub(crate) fn failure_message(status: StatusCode, payload: ResponsePayload) -> String {
    payload
        .error
        .or(payload.content)
        .unwrap_or_else(|| format!("Request failed with status {}", status.as_u16()))
}

async fn ensure_success(response: Response) -> Result<Response, ChatError> {
    if response.status().is_success() {
        Ok(response)
    } else {
        Err(remote_failure(response).await)
    }
}

async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, ChatError> {
    let response = ensure_success(response).await?;
    let bytes = response.bytes().await?;
    Ok(serde_json::from_slice(&bytes)?)
}
