//! Interceptors shipped with the crate and their default registration.

use std::sync::Arc;

use async_trait::async_trait;
use metrics::{counter, histogram};

use super::{
    context::RenderContext,
    hook::{HookPoint, Interceptor, InterceptorError},
    registry::InterceptorManager,
};

pub const CONTAINS_CODE: &str = "contains_code";
pub const CONTAINS_TABLE: &str = "contains_table";
pub const CONTAINS_LINK: &str = "contains_link";

pub(crate) const METRIC_RENDER_COMMITTED: &str = "wiki_comments_render_committed_total";
pub(crate) const METRIC_RENDERED_HTML_BYTES: &str = "wiki_comments_rendered_html_bytes";

/// Marks what kind of content the finished HTML carries so display code can
/// decide whether to load highlighting or table tooling.
pub struct ContentFlagsInterceptor;

#[async_trait]
impl Interceptor for ContentFlagsInterceptor {
    fn name(&self) -> &str {
        "content-flags"
    }

    async fn process(
        &self,
        _point: HookPoint,
        context: &mut RenderContext,
    ) -> Result<(), InterceptorError> {
        let (code, table, link) = match context.parsed_html.as_deref() {
            Some(html) => (
                html.contains("<pre") || html.contains("<code"),
                html.contains("<table"),
                html.contains("<a "),
            ),
            None => (false, false, false),
        };

        context.insert(CONTAINS_CODE, code);
        context.insert(CONTAINS_TABLE, table);
        context.insert(CONTAINS_LINK, link);
        Ok(())
    }
}

/// Records committed renders through the `metrics` facade.
pub struct RenderMetricsInterceptor;

#[async_trait]
impl Interceptor for RenderMetricsInterceptor {
    fn name(&self) -> &str {
        "render-metrics"
    }

    async fn process(
        &self,
        _point: HookPoint,
        context: &mut RenderContext,
    ) -> Result<(), InterceptorError> {
        let bytes = context.parsed_html.as_ref().map_or(0, String::len);
        counter!(METRIC_RENDER_COMMITTED).increment(1);
        histogram!(METRIC_RENDERED_HTML_BYTES).record(bytes as f64);
        Ok(())
    }
}

/// Install the bundled interceptors at their hook points.
pub fn register_bundled(manager: &mut InterceptorManager) {
    manager.register(HookPoint::PostPostProcess, Arc::new(ContentFlagsInterceptor));
    manager.register(
        HookPoint::PostRenderCommentHtml,
        Arc::new(RenderMetricsInterceptor),
    );
}
