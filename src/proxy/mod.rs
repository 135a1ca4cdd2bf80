// Proxy module - model templates and request translation

pub mod registry;
pub mod translator;

pub use registry::{ModelRegistry, ModelTemplate, DEFAULT_MODEL_ID};
pub use translator::{normalize, InboundRequest, NormalizeError, OutboundPayload};
