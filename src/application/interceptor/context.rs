use serde::Serialize;
use serde_json::{Map, Value};

/// Mutable state threaded through a single comment render.
///
/// A context is created for one pipeline run and dropped once the trailing
/// interceptors finish. It is never shared between runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RenderContext {
    /// Markdown source; rewritten in place by the pre-process stage.
    pub markdown: String,
    /// HTML produced by the process stage, refined by post-process.
    #[serde(rename = "parsedHTML")]
    pub parsed_html: Option<String>,
    /// Free-form values attached by interceptors.
    #[serde(flatten)]
    pub extras: Map<String, Value>,
}

impl RenderContext {
    pub fn new(markdown: impl Into<String>) -> Self {
        Self {
            markdown: markdown.into(),
            parsed_html: None,
            extras: Map::new(),
        }
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.extras.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.extras.get(key)
    }

    pub fn flag(&self, key: &str) -> bool {
        self.extras
            .get(key)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}
