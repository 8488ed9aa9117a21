mod config;
mod tables;

use std::sync::Arc;

use comrak::{Arena, format_html, parse_document};
use once_cell::sync::Lazy;

use crate::application::render::types::{RenderError, Renderer};

use config::{build_comment_sanitizer, comment_options};
use tables::{decorate_tables, strip_raw_sourcepos};

/// Switches for the comment renderer, usually derived from
/// [`crate::config::RenderSettings`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommentRendererOptions {
    /// Sanitise the finished HTML. Only disable for diagnostics.
    pub sanitize: bool,
    /// Wrap tables with the edit button.
    pub decorate_tables: bool,
    /// Treat single newlines as hard line breaks.
    pub line_breaks: bool,
}

impl Default for CommentRendererOptions {
    fn default() -> Self {
        Self {
            sanitize: true,
            decorate_tables: true,
            line_breaks: true,
        }
    }
}

impl From<&crate::config::RenderSettings> for CommentRendererOptions {
    fn from(settings: &crate::config::RenderSettings) -> Self {
        Self {
            sanitize: settings.sanitize,
            decorate_tables: settings.decorate_tables,
            line_breaks: settings.line_breaks,
        }
    }
}

/// Comrak-based comment renderer with Ammonia sanitisation.
pub struct ComrakCommentRenderer {
    options: comrak::options::Options<'static>,
    sanitizer: Option<ammonia::Builder<'static>>,
    decorate_tables: bool,
}

impl ComrakCommentRenderer {
    pub fn new(options: CommentRendererOptions) -> Self {
        Self {
            // source positions are only needed to locate tables
            options: comment_options(options.line_breaks, options.decorate_tables),
            sanitizer: options.sanitize.then(build_comment_sanitizer),
            decorate_tables: options.decorate_tables,
        }
    }
}

impl Default for ComrakCommentRenderer {
    fn default() -> Self {
        Self::new(CommentRendererOptions::default())
    }
}

static DEFAULT_RENDERER: Lazy<Arc<ComrakCommentRenderer>> =
    Lazy::new(|| Arc::new(ComrakCommentRenderer::default()));

/// Shared renderer with default options, initialised on first use.
pub fn comment_renderer() -> Arc<ComrakCommentRenderer> {
    Arc::clone(&DEFAULT_RENDERER)
}

impl Renderer for ComrakCommentRenderer {
    fn pre_process(&self, markdown: &str) -> Result<String, RenderError> {
        let without_bom = markdown.strip_prefix('\u{feff}').unwrap_or(markdown);
        Ok(normalize_line_endings(without_bom))
    }

    fn process(&self, markdown: &str) -> Result<String, RenderError> {
        let arena = Arena::new();
        let root = parse_document(&arena, markdown, &self.options);
        if self.decorate_tables {
            strip_raw_sourcepos(root)?;
        }

        let mut html = String::new();
        format_html(root, &self.options, &mut html)
            .map_err(|err| RenderError::markdown(err.to_string()))?;

        if self.decorate_tables {
            decorate_tables(&html)
        } else {
            Ok(html)
        }
    }

    fn post_process(&self, html: &str) -> Result<String, RenderError> {
        match &self.sanitizer {
            Some(sanitizer) => Ok(sanitizer.clean(html).to_string()),
            None => Ok(html.to_string()),
        }
    }
}

fn normalize_line_endings(text: &str) -> String {
    if !text.contains('\r') {
        return text.to_string();
    }
    text.replace("\r\n", "\n").replace('\r', "\n")
}
