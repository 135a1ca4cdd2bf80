// Request translator - turns a caller's chat request into the upstream payload

use serde::Serialize;
use serde_json::{Map, Number, Value};
use thiserror::Error;

use super::registry::{ModelRegistry, ModelTemplate};

#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("Invalid JSON format: {0}")]
    MalformedBody(#[from] serde_json::Error),

    #[error("'messages' must be a list")]
    InvalidMessages,
}

/// The two fields the relay reads from a caller's body.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundRequest {
    /// `None` when the caller sent no usable model identifier.
    pub model: Option<String>,
    /// Opaque chat turns, order preserved.
    pub messages: Vec<Value>,
}

impl InboundRequest {
    pub fn parse(raw: &[u8]) -> Result<Self, NormalizeError> {
        let body: Value = serde_json::from_slice(raw)?;
        tracing::debug!("Inbound payload: {}", body);
        Self::from_value(body)
    }

    pub fn from_value(body: Value) -> Result<Self, NormalizeError> {
        let Value::Object(mut body) = body else {
            return Err(NormalizeError::InvalidMessages);
        };

        let messages = match body.remove("messages") {
            Some(Value::Array(messages)) => messages,
            _ => return Err(NormalizeError::InvalidMessages),
        };

        let model = match body.remove("model") {
            Some(Value::String(model)) => Some(model),
            None | Some(Value::Null) => None,
            Some(other) => {
                tracing::debug!("Ignoring non-string model field: {}", other);
                None
            }
        };

        Ok(Self { model, messages })
    }
}

/// Body POSTed upstream: the template's fixed fields plus the caller's messages.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutboundPayload {
    pub model: String,
    pub temperature: Number,
    pub stream: bool,
    pub extra_body: Map<String, Value>,
    pub messages: Vec<Value>,
}

impl OutboundPayload {
    /// Every field is an owned copy, so later edits never reach the registry.
    pub fn from_template(template: &ModelTemplate, messages: Vec<Value>) -> Self {
        Self {
            model: template.model.clone(),
            temperature: template.temperature.clone(),
            stream: template.stream,
            extra_body: template.extra_body.clone(),
            messages,
        }
    }
}

/// Parse a raw request body and build its upstream payload.
pub fn normalize(raw: &[u8], registry: &ModelRegistry) -> Result<OutboundPayload, NormalizeError> {
    let request = InboundRequest::parse(raw)?;
    Ok(build_payload(request, registry))
}

pub fn build_payload(request: InboundRequest, registry: &ModelRegistry) -> OutboundPayload {
    let template = registry.resolve(request.model.as_deref());
    OutboundPayload::from_template(template, request.messages)
}
