use std::{fmt, str::FromStr};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::context::RenderContext;

/// Named stages of the comment render pipeline at which interceptors run.
///
/// The string spellings are shared with existing handler registrations and
/// must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HookPoint {
    PreRenderComment,
    PrePreProcess,
    PostPreProcess,
    PrePostProcess,
    PostPostProcess,
    PreRenderCommentHtml,
    PostRenderCommentHtml,
}

impl HookPoint {
    /// Every hook point, in pipeline order.
    pub const ALL: [HookPoint; 7] = [
        HookPoint::PreRenderComment,
        HookPoint::PrePreProcess,
        HookPoint::PostPreProcess,
        HookPoint::PrePostProcess,
        HookPoint::PostPostProcess,
        HookPoint::PreRenderCommentHtml,
        HookPoint::PostRenderCommentHtml,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            HookPoint::PreRenderComment => "preRenderComment",
            HookPoint::PrePreProcess => "prePreProcess",
            HookPoint::PostPreProcess => "postPreProcess",
            HookPoint::PrePostProcess => "prePostProcess",
            HookPoint::PostPostProcess => "postPostProcess",
            HookPoint::PreRenderCommentHtml => "preRenderCommentHtml",
            HookPoint::PostRenderCommentHtml => "postRenderCommentHtml",
        }
    }
}

impl fmt::Display for HookPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HookPoint {
    type Err = InterceptorError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        HookPoint::ALL
            .into_iter()
            .find(|point| point.as_str() == name)
            .ok_or_else(|| InterceptorError::UnknownHookPoint {
                name: name.to_string(),
            })
    }
}

/// Errors raised by interceptors or while registering them.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InterceptorError {
    #[error("interceptor `{handler}` failed at {point}: {message}")]
    Handler {
        point: HookPoint,
        handler: String,
        message: String,
    },
    #[error("unknown hook point `{name}`")]
    UnknownHookPoint { name: String },
}

impl InterceptorError {
    /// Convenience constructor for handler implementations.
    pub fn handler(point: HookPoint, handler: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Handler {
            point,
            handler: handler.into(),
            message: message.into(),
        }
    }
}

/// A handler invoked at one or more hook points.
///
/// Implementations may mutate the context in place; later handlers and
/// pipeline stages observe those mutations.
#[async_trait]
pub trait Interceptor: Send + Sync {
    /// Human-readable name used in logs and error reports.
    fn name(&self) -> &str;

    async fn process(
        &self,
        point: HookPoint,
        context: &mut RenderContext,
    ) -> Result<(), InterceptorError>;
}

/// Adapts a synchronous closure into an [`Interceptor`].
pub struct FnInterceptor<F> {
    name: String,
    func: F,
}

impl<F> FnInterceptor<F>
where
    F: Fn(HookPoint, &mut RenderContext) -> Result<(), InterceptorError> + Send + Sync,
{
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

#[async_trait]
impl<F> Interceptor for FnInterceptor<F>
where
    F: Fn(HookPoint, &mut RenderContext) -> Result<(), InterceptorError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(
        &self,
        point: HookPoint,
        context: &mut RenderContext,
    ) -> Result<(), InterceptorError> {
        (self.func)(point, context)
    }
}
