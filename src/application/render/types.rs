use thiserror::Error;

/// Structured errors raised by the renderer transforms.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RenderError {
    #[error("markdown processing failed: {message}")]
    Markdown { message: String },
    #[error("table decoration failed: {message}")]
    TableDecoration { message: String },
}

impl RenderError {
    pub fn markdown(message: impl Into<String>) -> Self {
        Self::Markdown {
            message: message.into(),
        }
    }
}

/// The three text transforms applied by the render pipeline.
///
/// Implementations must not block on hidden asynchronous work; the pipeline
/// treats each call as one atomic step.
pub trait Renderer: Send + Sync {
    /// Text to text normalisation applied before compilation.
    fn pre_process(&self, markdown: &str) -> Result<String, RenderError>;

    /// Markdown to HTML compilation.
    fn process(&self, markdown: &str) -> Result<String, RenderError>;

    /// HTML finishing, e.g. sanitisation or link rewriting.
    fn post_process(&self, html: &str) -> Result<String, RenderError>;
}
