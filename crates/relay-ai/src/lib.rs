//! Provider-neutral streaming primitives: the part vocabulary, backend
//! adapters, the part merger, the domain model, and the cancellable event
//! stream.

mod abort;
mod config;
mod domain;
mod error;
mod event_stream;
mod merge;
mod providers;
mod types;
mod validation;

pub use abort::{AbortController, AbortSignal};
pub use config::{ConfigError, ProviderKind, ProviderSettings};
pub use domain::{
    to_wire_message, to_wire_messages, DomainBlock, DomainMessage, DomainRole, WireBlock,
    WireMessage, WireRole,
};
pub use error::{parse_retry_after, ProviderError, StreamError};
pub use event_stream::EventStream;
pub use merge::{
    assemble_message, merge_parts, MergeError, MergeablePart, PartMerger, ToolCallBuilder,
};
pub use providers::{
    complete_response_parts, create_provider, decoder_for, parse_sse_body, AnthropicDecoder,
    AnthropicProvider, OpenAiDecoder, OpenAiProvider, PartStream, Provider, ProviderRef,
    ProviderRequest, SseDecoder, WireEventDecoder,
};
pub use types::{
    CompletedPart, ContextEdit, Message, MessageContent, ResponseSummary, Role, StopReason,
    StreamedPart, TokenUsage, Tool, ToolCall,
};
pub use validation::{
    validate_blocks, validate_tool_arguments, validate_tool_call, BlockViolation,
    SchemaViolation, ToolArgumentError, ValidationReport,
};
