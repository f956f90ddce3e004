use std::sync::OnceLock;

use reqwest::header::{CONTENT_TYPE, RETRY_AFTER};
use reqwest::{Client, RequestBuilder, Response};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::sse::SseDecoder;
use crate::abort::AbortSignal;
use crate::error::{parse_retry_after, ProviderError};

/// Decoded wire events waiting for the consumer. The reader task suspends
/// once this many are queued.
pub(crate) const WIRE_EVENT_BUFFER: usize = 32;

pub(crate) type WireItem = Result<Value, ProviderError>;

pub(super) fn join_url(base_url: &str, path: &str) -> String {
    if base_url.ends_with('/') {
        format!("{base_url}{path}")
    } else {
        format!("{base_url}/{path}")
    }
}

pub(super) fn shared_http_client(base_url: &str) -> &'static Client {
    static DEFAULT_CLIENT: OnceLock<Client> = OnceLock::new();
    static LOOPBACK_CLIENT: OnceLock<Client> = OnceLock::new();

    if is_loopback_base_url(base_url) {
        LOOPBACK_CLIENT.get_or_init(|| {
            Client::builder()
                .no_proxy()
                .build()
                .unwrap_or_else(|_| Client::new())
        })
    } else {
        DEFAULT_CLIENT.get_or_init(Client::new)
    }
}

fn is_loopback_base_url(base_url: &str) -> bool {
    let Ok(url) = reqwest::Url::parse(base_url) else {
        return false;
    };
    let Some(host) = url.host_str() else {
        return false;
    };
    host.eq_ignore_ascii_case("localhost") || host == "127.0.0.1" || host == "::1"
}

/// Sends the request and classifies any non-success status.
pub(super) async fn send_request(
    request: RequestBuilder,
    payload: &Value,
    signal: Option<&AbortSignal>,
) -> Result<Response, ProviderError> {
    let send = request.json(payload).send();
    let response = match signal {
        Some(signal) => tokio::select! {
            response = send => response,
            _ = signal.cancelled() => return Err(ProviderError::aborted()),
        },
        None => send.await,
    }
    .map_err(|error| ProviderError::from_transport(&error))?;

    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(parse_retry_after);
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "unable to read error body".to_string());
    Err(ProviderError::from_status(status.as_u16(), retry_after, body))
}

pub(super) fn is_event_stream(response: &Response) -> bool {
    response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.trim().starts_with("text/event-stream"))
}

/// Reads an SSE body on a background task and forwards each decoded wire
/// event through a bounded channel.
///
/// The task ends at end of body, on the first transport error, when the
/// consumer drops the receiver, or when `signal` fires.
pub(super) fn spawn_wire_reader(
    mut response: Response,
    signal: Option<AbortSignal>,
) -> mpsc::Receiver<WireItem> {
    let (sender, receiver) = mpsc::channel(WIRE_EVENT_BUFFER);

    tokio::spawn(async move {
        let mut decoder = SseDecoder::new();
        loop {
            let chunk = match signal.as_ref() {
                Some(signal) => tokio::select! {
                    chunk = response.chunk() => chunk,
                    _ = signal.cancelled() => {
                        debug!("wire reader aborted");
                        let _ = sender.send(Err(ProviderError::aborted())).await;
                        return;
                    }
                },
                None => response.chunk().await,
            };

            match chunk {
                Ok(Some(bytes)) => {
                    for data in decoder.push(&bytes) {
                        if !forward_data(&sender, &data).await {
                            return;
                        }
                    }
                }
                Ok(None) => {
                    if let Some(data) = decoder.finish() {
                        forward_data(&sender, &data).await;
                    }
                    return;
                }
                Err(error) => {
                    warn!(error = %error, "wire stream read failed");
                    let _ = sender.send(Err(ProviderError::from_transport(&error))).await;
                    return;
                }
            }
        }
    });

    receiver
}

/// Buffers already-recorded wire items behind the same channel a live reader
/// would use.
pub(super) fn replay_channel(items: Vec<WireItem>) -> mpsc::Receiver<WireItem> {
    let (sender, receiver) = mpsc::channel(items.len().max(1));
    for item in items {
        // Capacity covers every item.
        let _ = sender.try_send(item);
    }
    receiver
}

pub(super) fn parse_wire_data(data: &str) -> Option<WireItem> {
    if data.trim() == "[DONE]" {
        return None;
    }
    Some(serde_json::from_str::<Value>(data).map_err(|error| {
        ProviderError::unclassified(format!("invalid wire event JSON: {error}"))
    }))
}

/// Returns false once the consumer has gone away.
async fn forward_data(sender: &mpsc::Sender<WireItem>, data: &str) -> bool {
    match parse_wire_data(data) {
        Some(item) => sender.send(item).await.is_ok(),
        None => true,
    }
}
