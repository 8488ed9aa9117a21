//! Comment rendering: the staged pipeline, its display sinks and the default
//! comrak-based renderer.
//!
//! The renderer transforms are pure; everything with side effects (interceptor
//! hooks, committing HTML to the display) is sequenced by [`RenderPipeline`].

mod display;
mod pipeline;
mod service;
mod types;

pub use display::{DisplaySink, WatchDisplay};
pub use pipeline::{PipelineError, PipelineStage, RenderOutcome, RenderPipeline, TrailingHandle};
pub use service::{ComrakCommentRenderer, CommentRendererOptions, comment_renderer};
pub use types::{RenderError, Renderer};
