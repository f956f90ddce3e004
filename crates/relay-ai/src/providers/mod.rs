//! Backend adapters.
//!
//! Each adapter decodes its backend's wire events into [`StreamedPart`]s and
//! exposes them through a [`PartStream`], a pull interface the consumer
//! drains at its own pace.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Response;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

use crate::abort::AbortSignal;
use crate::config::{ProviderKind, ProviderSettings};
use crate::domain::WireMessage;
use crate::error::ProviderError;
use crate::types::{ResponseSummary, StopReason, StreamedPart, TokenUsage, Tool};

mod anthropic;
mod common;
mod openai;
mod sse;

pub use anthropic::{AnthropicDecoder, AnthropicProvider};
pub use openai::{OpenAiDecoder, OpenAiProvider};
pub use sse::{parse_sse_body, SseDecoder};

use common::{parse_wire_data, replay_channel, WireItem};

/// Turns one backend wire event into zero or more parts, recording response
/// metadata into `summary` as it goes.
pub trait WireEventDecoder: Send {
    fn decode(
        &mut self,
        event: &Value,
        summary: &mut ResponseSummary,
    ) -> Result<Vec<StreamedPart>, ProviderError>;

    /// Parts still held back when the wire events run out.
    fn finish(&mut self) -> Vec<StreamedPart> {
        Vec::new()
    }
}

pub fn decoder_for(kind: ProviderKind) -> Box<dyn WireEventDecoder> {
    match kind {
        ProviderKind::Anthropic => Box::new(AnthropicDecoder::default()),
        ProviderKind::Openai => Box::new(OpenAiDecoder::default()),
    }
}

/// Maps a complete (non-streamed) response body straight to parts.
pub fn complete_response_parts(
    kind: ProviderKind,
    body: &Value,
) -> Result<(Vec<StreamedPart>, ResponseSummary), ProviderError> {
    match kind {
        ProviderKind::Anthropic => anthropic::parts_from_message(body),
        ProviderKind::Openai => openai::parts_from_completion(body),
    }
}

/// Lazily-pulled sequence of parts from one backend response.
///
/// Usage, response id, and stop reason are readable at any point and reflect
/// what has been decoded so far.
pub struct PartStream {
    receiver: Option<mpsc::Receiver<WireItem>>,
    decoder: Option<Box<dyn WireEventDecoder>>,
    pending: VecDeque<StreamedPart>,
    summary: ResponseSummary,
    finished: bool,
}

impl PartStream {
    pub(crate) fn from_receiver(
        receiver: mpsc::Receiver<WireItem>,
        decoder: Box<dyn WireEventDecoder>,
    ) -> Self {
        Self {
            receiver: Some(receiver),
            decoder: Some(decoder),
            pending: VecDeque::new(),
            summary: ResponseSummary::default(),
            finished: false,
        }
    }

    /// A stream over parts that are already known, as for a complete response.
    pub fn from_parts(parts: Vec<StreamedPart>, summary: ResponseSummary) -> Self {
        Self {
            receiver: None,
            decoder: None,
            pending: parts.into(),
            summary,
            finished: false,
        }
    }

    /// Replays recorded wire events through the backend's decoder.
    pub fn from_wire_events(kind: ProviderKind, events: Vec<Value>) -> Self {
        let items = events.into_iter().map(Ok).collect();
        Self::from_receiver(replay_channel(items), decoder_for(kind))
    }

    /// Decodes a recorded response body: an SSE transcript or a complete JSON
    /// response.
    pub fn from_response_body(kind: ProviderKind, body: &str) -> Result<Self, ProviderError> {
        let events = parse_sse_body(body);
        if events.is_empty() {
            let value = serde_json::from_str::<Value>(body).map_err(|error| {
                ProviderError::unclassified(format!(
                    "{kind} response is neither SSE nor JSON: {error}"
                ))
            })?;
            let (parts, summary) = complete_response_parts(kind, &value)?;
            return Ok(Self::from_parts(parts, summary));
        }

        let items = events
            .iter()
            .filter_map(|data| parse_wire_data(data))
            .collect();
        Ok(Self::from_receiver(replay_channel(items), decoder_for(kind)))
    }

    /// Next part, `None` at end of response. After an error the stream is
    /// finished.
    pub async fn next(&mut self) -> Option<Result<StreamedPart, ProviderError>> {
        loop {
            if let Some(part) = self.pending.pop_front() {
                return Some(Ok(part));
            }
            if self.finished {
                return None;
            }

            let Some(receiver) = self.receiver.as_mut() else {
                self.finished = true;
                return None;
            };
            let Some(item) = receiver.recv().await else {
                self.finished = true;
                self.receiver = None;
                if let Some(decoder) = self.decoder.as_mut() {
                    self.pending.extend(decoder.finish());
                }
                continue;
            };

            let decoded = item.and_then(|event| match self.decoder.as_mut() {
                Some(decoder) => decoder.decode(&event, &mut self.summary),
                None => Ok(Vec::new()),
            });
            match decoded {
                Ok(parts) => self.pending.extend(parts),
                Err(error) => {
                    debug!(kind = error.kind(), "part stream failed");
                    self.finished = true;
                    self.receiver = None;
                    return Some(Err(error));
                }
            }
        }
    }

    /// Drains the stream, stopping at the first error.
    pub async fn collect_parts(mut self) -> Result<(Vec<StreamedPart>, ResponseSummary), ProviderError> {
        let mut parts = Vec::new();
        while let Some(part) = self.next().await {
            parts.push(part?);
        }
        Ok((parts, self.summary))
    }

    pub fn usage(&self) -> TokenUsage {
        self.summary.usage
    }

    pub fn response_id(&self) -> Option<&str> {
        self.summary.id.as_deref()
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        self.summary.stop_reason
    }

    pub fn summary(&self) -> &ResponseSummary {
        &self.summary
    }
}

/// What one model call sends, already in wire shape.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderRequest {
    pub system: Option<String>,
    pub messages: Vec<WireMessage>,
    pub tools: Vec<Tool>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
}

#[async_trait]
pub trait Provider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    fn settings(&self) -> &ProviderSettings;

    /// Issues the request. Failures before the first byte surface here;
    /// later ones come out of the returned stream.
    async fn stream(
        &self,
        request: &ProviderRequest,
        signal: Option<AbortSignal>,
    ) -> Result<PartStream, ProviderError>;
}

pub type ProviderRef = Arc<dyn Provider>;

pub fn create_provider(settings: ProviderSettings) -> ProviderRef {
    match settings.kind {
        ProviderKind::Anthropic => Arc::new(AnthropicProvider::new(settings)),
        ProviderKind::Openai => Arc::new(OpenAiProvider::new(settings)),
    }
}

/// Streams SSE bodies through a reader task; anything else is read whole and
/// treated as a complete response.
async fn open_part_stream(
    kind: ProviderKind,
    response: Response,
    signal: Option<AbortSignal>,
) -> Result<PartStream, ProviderError> {
    if common::is_event_stream(&response) {
        let receiver = common::spawn_wire_reader(response, signal);
        return Ok(PartStream::from_receiver(receiver, decoder_for(kind)));
    }

    let body = response
        .text()
        .await
        .map_err(|error| ProviderError::from_transport(&error))?;
    PartStream::from_response_body(kind, &body)
}
