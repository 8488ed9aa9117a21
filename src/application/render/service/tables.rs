//! Wraps rendered tables with an edit affordance that points back at the
//! markdown source lines the table came from.

use comrak::nodes::{AstNode, NodeValue};
use lol_html::{RewriteStrSettings, element, html_content::ContentType, rewrite_str};

use crate::application::render::types::RenderError;

pub(crate) const TABLE_CLASS: &str = "table table-bordered";
pub(crate) const BUTTON_ATTRIBUTES: &[&str] = &[
    "type",
    "class",
    "data-action",
    "data-markdown-table-begin-line",
    "data-markdown-table-end-line",
];

const SOURCEPOS_ATTRIBUTE: &str = "data-sourcepos";

/// Inclusive, 1-based source line range of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct LineRange {
    pub(crate) begin: u32,
    pub(crate) end: u32,
}

/// Decorate every `<table>` and drop source-position attributes left behind by
/// the markdown renderer.
pub(crate) fn decorate_tables(html: &str) -> Result<String, RenderError> {
    if !html.contains(SOURCEPOS_ATTRIBUTE) && !html.contains("<table") {
        return Ok(html.to_string());
    }

    rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: vec![
                element!("table", |el| {
                    let range = el
                        .get_attribute(SOURCEPOS_ATTRIBUTE)
                        .and_then(|value| parse_sourcepos(&value));
                    el.remove_attribute(SOURCEPOS_ATTRIBUTE);
                    el.set_attribute("class", TABLE_CLASS)?;

                    let opening = match range {
                        Some(range) => format!("<div>{}", edit_button(range)),
                        None => "<div>".to_string(),
                    };
                    el.before(&opening, ContentType::Html);
                    el.after("</div>", ContentType::Html);
                    Ok(())
                }),
                element!("[data-sourcepos]", |el| {
                    el.remove_attribute(SOURCEPOS_ATTRIBUTE);
                    Ok(())
                }),
            ],
            ..RewriteStrSettings::default()
        },
    )
    .map_err(|err| RenderError::TableDecoration {
        message: err.to_string(),
    })
}

/// Drop `data-sourcepos` from raw HTML written by the comment author so that
/// [`decorate_tables`] only sees positions emitted by the markdown renderer.
pub(crate) fn strip_raw_sourcepos<'a>(node: &'a AstNode<'a>) -> Result<(), RenderError> {
    {
        let mut data = node.data.borrow_mut();
        match &mut data.value {
            NodeValue::HtmlBlock(block) => block.literal = without_sourcepos(&block.literal)?,
            NodeValue::HtmlInline(html) => *html = without_sourcepos(html)?,
            _ => {}
        }
    }

    let mut child = node.first_child();
    while let Some(next) = child {
        strip_raw_sourcepos(next)?;
        child = next.next_sibling();
    }
    Ok(())
}

fn without_sourcepos(html: &str) -> Result<String, RenderError> {
    if !html.to_ascii_lowercase().contains(SOURCEPOS_ATTRIBUTE) {
        return Ok(html.to_string());
    }

    rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: vec![element!("[data-sourcepos]", |el| {
                el.remove_attribute(SOURCEPOS_ATTRIBUTE);
                Ok(())
            })],
            ..RewriteStrSettings::default()
        },
    )
    .map_err(|err| RenderError::TableDecoration {
        message: err.to_string(),
    })
}

fn edit_button(range: LineRange) -> String {
    format!(
        "<button type=\"button\" class=\"table-edit-button\" data-action=\"launch-table-editor\" \
         data-markdown-table-begin-line=\"{}\" data-markdown-table-end-line=\"{}\"></button>",
        range.begin, range.end
    )
}

/// Parse comrak's `start_line:start_col-end_line:end_col` notation.
pub(crate) fn parse_sourcepos(value: &str) -> Option<LineRange> {
    let (start, end) = value.split_once('-')?;
    let begin = start.split_once(':')?.0.trim().parse().ok()?;
    let end = end.split_once(':')?.0.trim().parse().ok()?;
    (begin > 0 && end >= begin).then_some(LineRange { begin, end })
}
