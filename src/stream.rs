use futures::stream::Stream;
use futures_util::StreamExt;
use log::{debug, error, info};
use reqwest::RequestBuilder;
use std::{
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::api::{remote_failure, ApiClient};
use crate::errors::ChatError;
use crate::models::conversations::ChatMessage;

const FRAGMENT_BUFFER: usize = 100;

/// Receiving end of a streamed completion. Yields decoded text fragments in
/// arrival order, at most one `Err` as the last item, then ends. Dropping it
/// stops the producer and aborts the request.
pub struct FragmentStream {
    receiver: mpsc::Receiver<Result<String, ChatError>>,
    cancel_token: CancellationToken,
}

impl Stream for FragmentStream {
    type Item = Result<String, ChatError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

impl Drop for FragmentStream {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

/// Posts `messages` to the completion endpoint and streams the response
/// body back as text. The whole exchange, body included, must finish within
/// `timeout` or the request is aborted with [`ChatError::NetworkTimeout`].
pub fn send_message(api: &ApiClient, messages: &[ChatMessage], timeout: Duration) -> FragmentStream {
    let (tx, rx) = mpsc::channel(FRAGMENT_BUFFER);
    let cancel_token = CancellationToken::new();

    let request = api.completion_request(messages);
    let task_token = cancel_token.clone();

    tokio::spawn(async move {
        produce(request, tx, task_token, timeout).await;
    });

    FragmentStream {
        receiver: rx,
        cancel_token,
    }
}

async fn produce(
    request: Result<RequestBuilder, ChatError>,
    tx: mpsc::Sender<Result<String, ChatError>>,
    cancel_token: CancellationToken,
    timeout: Duration,
) {
    let request = match request {
        Ok(request) => request,
        Err(e) => {
            let _ = tx.send(Err(e)).await;
            return;
        }
    };

    // Whichever branch loses is dropped here, which drops the in-flight
    // response and the timer with it.
    let outcome = tokio::select! {
        _ = cancel_token.cancelled() => {
            info!("fragment stream dropped before the response finished");
            Ok(())
        }
        _ = tokio::time::sleep(timeout) => {
            error!("completion request timed out after {timeout:?}");
            Err(ChatError::NetworkTimeout(timeout))
        }
        result = pump(request, &tx) => result,
    };

    if let Err(e) = outcome {
        error!("Failed to send message: {e}");
        let _ = tx.send(Err(e)).await;
    }
}

async fn pump(request: RequestBuilder, tx: &mpsc::Sender<Result<String, ChatError>>) -> Result<(), ChatError> {
    let response = request.send().await?;
    let status = response.status();

    if !status.is_success() {
        return Err(remote_failure(response).await);
    }
    if status == http::StatusCode::NO_CONTENT || status == http::StatusCode::RESET_CONTENT {
        return Err(ChatError::EmptyResponseBody);
    }

    let mut body = response.bytes_stream();
    let mut decoder = Utf8Decoder::default();

    while let Some(item) = body.next().await {
        let bytes = item?;
        let chunk = decoder.decode(&bytes);
        if !chunk.is_empty() && tx.send(Ok(chunk)).await.is_err() {
            debug!("fragment receiver gone, stopping");
            return Ok(());
        }
    }

    let tail = decoder.finish();
    if !tail.is_empty() {
        let _ = tx.send(Ok(tail)).await;
    }

    debug!("Stream closed");
    Ok(())
}

/// Incremental UTF-8 decoding. A multi-byte character split across chunks
/// is held back until its remaining bytes arrive; invalid bytes become
/// U+FFFD.
#[derive(Debug, Default)]
struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    fn decode(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);
        let mut out = String::new();

        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    break;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match e.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + len);
                        }
                        None => {
                            self.pending.drain(..valid);
                            break;
                        }
                    }
                }
            }
        }

        out
    }

    fn finish(&mut self) -> String {
        let tail = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        tail
    }
}
