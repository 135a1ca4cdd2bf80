// Model registry - fixed request templates keyed by model identifier

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Number, Value};
use std::collections::BTreeMap;

use crate::config::{AppConfig, ConfigError};

pub const DEFAULT_MODEL_ID: &str = "gemini-3-pro";

/// Canonical request fields sent upstream for one model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelTemplate {
    pub model: String,
    /// Kept as written, so an integer `1` stays `1` on the wire.
    pub temperature: Number,
    /// The relay only speaks streaming, so this is never read from config.
    #[serde(skip_deserializing, default = "stream_enabled")]
    pub stream: bool,
    /// Provider-specific options (`thinking_level`, `reasoning_effort`, ...).
    #[serde(default)]
    pub extra_body: Map<String, Value>,
}

fn stream_enabled() -> bool {
    true
}

impl ModelTemplate {
    pub fn new(model: impl Into<String>, temperature: impl Into<Number>, extra_body: Value) -> Self {
        Self {
            model: model.into(),
            temperature: temperature.into(),
            stream: true,
            extra_body: match extra_body {
                Value::Object(map) => map,
                _ => Map::new(),
            },
        }
    }
}

/// Built-in templates: (identifier, upstream model, temperature, extra options)
fn builtin_templates() -> BTreeMap<String, ModelTemplate> {
    [
        (
            "gemini-3-pro",
            ModelTemplate::new("gemini-3-pro", 1, json!({ "thinking_level": "high" })),
        ),
        (
            "gpt-5.2",
            ModelTemplate::new(
                "gpt-5.2",
                1,
                json!({ "verbosity": "high", "reasoning_effort": "high" }),
            ),
        ),
    ]
    .into_iter()
    .map(|(id, template)| (id.to_string(), template))
    .collect()
}

/// Immutable lookup table shared read-only by every request.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    templates: BTreeMap<String, ModelTemplate>,
    default_id: String,
}

impl ModelRegistry {
    /// Build a registry; the default identifier must name one of `templates`.
    pub fn new(
        templates: BTreeMap<String, ModelTemplate>,
        default_id: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let default_id = default_id.into();
        if !templates.contains_key(&default_id) {
            return Err(ConfigError::UnknownDefaultModel(default_id));
        }
        Ok(Self {
            templates,
            default_id,
        })
    }

    pub fn builtin() -> Self {
        Self {
            templates: builtin_templates(),
            default_id: DEFAULT_MODEL_ID.to_string(),
        }
    }

    /// Built-in templates overlaid with the ones from configuration.
    pub fn from_config(config: &AppConfig) -> Result<Self, ConfigError> {
        let mut templates = builtin_templates();
        for (id, template) in &config.models {
            tracing::debug!("Registering model template {} -> {}", id, template.model);
            templates.insert(id.clone(), template.clone());
        }
        Self::new(templates, config.default_model.clone())
    }

    pub fn get(&self, id: &str) -> Option<&ModelTemplate> {
        self.templates.get(id)
    }

    pub fn default_id(&self) -> &str {
        &self.default_id
    }

    pub fn default_template(&self) -> &ModelTemplate {
        // Checked in `new`; `builtin` always contains the default.
        &self.templates[&self.default_id]
    }

    /// Exact, case-sensitive lookup; absent or unknown ids get the default.
    pub fn resolve(&self, id: Option<&str>) -> &ModelTemplate {
        match id.and_then(|id| self.templates.get(id)) {
            Some(template) => template,
            None => {
                tracing::debug!(
                    "Model {:?} not in registry, using default {}",
                    id,
                    self.default_id
                );
                self.default_template()
            }
        }
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.templates.keys().map(String::as_str)
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
