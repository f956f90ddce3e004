use async_trait::async_trait;
use tracing::info;

use super::common::{join_url, send_request, shared_http_client};
use super::{open_part_stream, PartStream, Provider, ProviderRequest};
use crate::abort::AbortSignal;
use crate::config::{ProviderKind, ProviderSettings};
use crate::error::ProviderError;

mod decoder;
mod payload;

pub use decoder::OpenAiDecoder;
pub(crate) use decoder::parts_from_completion;

pub struct OpenAiProvider {
    settings: ProviderSettings,
}

impl OpenAiProvider {
    pub fn new(settings: ProviderSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Openai
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
        let payload = payload::build_openai_payload(&self.settings, request);
        let base_url = self.settings.base_url();
        let endpoint = join_url(base_url, "chat/completions");
        info!(model = %self.settings.model, endpoint = %endpoint, "openai request");

        let mut builder = shared_http_client(base_url)
            .post(endpoint.as_str())
            .bearer_auth(api_key)
            .header("content-type", "application/json");
        for (name, value) in &self.settings.headers {
            builder = builder.header(name, value);
        }

        let response = send_request(builder, &payload, signal.as_ref()).await?;
        open_part_stream(ProviderKind::Openai, response, signal).await
    }
}
