use async_trait::async_trait;
use tracing::info;

use super::common::{join_url, send_request, shared_http_client};
use super::{open_part_stream, PartStream, Provider, ProviderRequest};
use crate::abort::AbortSignal;
use crate::config::{ProviderKind, ProviderSettings};
use crate::error::ProviderError;

mod decoder;
mod payload;

pub use decoder::AnthropicDecoder;
pub(crate) use decoder::parts_from_message;

const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    settings: ProviderSettings,
}

impl AnthropicProvider {
    pub fn new(settings: ProviderSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }

    fn settings(&self) -> &ProviderSettings {
        &self.settings
    }

    async fn stream(
        &self,
        request: &ProviderRequest,
        signal: Option<AbortSignal>,
    ) -> Result<PartStream, ProviderError> {
        let api_key = self.settings.resolve_api_key()?;
        let payload = payload::build_anthropic_payload(&self.settings, request);
        let base_url = self.settings.base_url();
        let endpoint = join_url(base_url, "messages");
        info!(model = %self.settings.model, endpoint = %endpoint, "anthropic request");

        let mut builder = shared_http_client(base_url)
            .post(endpoint.as_str())
            .header("x-api-key", api_key.as_str())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json");
        for (name, value) in &self.settings.headers {
            builder = builder.header(name, value);
        }

        let response = send_request(builder, &payload, signal.as_ref()).await?;
        open_part_stream(ProviderKind::Anthropic, response, signal).await
    }
}
