//! Named interception points around comment rendering.
//!
//! Feature modules register [`Interceptor`]s against a [`HookPoint`] while the
//! application starts. The render pipeline then asks the
//! [`InterceptorManager`] to run each point in turn; handlers execute one at a
//! time in registration order and the first failure stops the point.

mod bundled;
mod context;
mod hook;
mod registry;

pub use bundled::{
    CONTAINS_CODE, CONTAINS_LINK, CONTAINS_TABLE, ContentFlagsInterceptor,
    RenderMetricsInterceptor, register_bundled,
};
pub(crate) use bundled::{METRIC_RENDER_COMMITTED, METRIC_RENDERED_HTML_BYTES};
pub use context::RenderContext;
pub use hook::{FnInterceptor, HookPoint, Interceptor, InterceptorError};
pub use registry::InterceptorManager;
