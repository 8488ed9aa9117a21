//! Registry that sequences interceptors per hook point.

use std::{collections::HashMap, sync::Arc};

use tracing::trace;

use super::{
    context::RenderContext,
    hook::{HookPoint, Interceptor, InterceptorError},
};

/// Ordered interceptor lists keyed by hook point.
///
/// Registration happens during startup through `&mut self`; afterwards the
/// manager is shared behind an [`Arc`] and only read.
#[derive(Default, Clone)]
pub struct InterceptorManager {
    handlers: HashMap<HookPoint, Vec<Arc<dyn Interceptor>>>,
}

impl InterceptorManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handler to the list for `point`. The same handler may be
    /// registered more than once; every registration runs.
    pub fn register(&mut self, point: HookPoint, handler: Arc<dyn Interceptor>) {
        self.handlers.entry(point).or_default().push(handler);
    }

    /// Register by the hook point's wire name.
    pub fn register_named(
        &mut self,
        name: &str,
        handler: Arc<dyn Interceptor>,
    ) -> Result<(), InterceptorError> {
        let point = name.parse::<HookPoint>()?;
        self.register(point, handler);
        Ok(())
    }

    pub fn handler_count(&self, point: HookPoint) -> usize {
        self.handlers.get(&point).map_or(0, Vec::len)
    }

    pub fn handler_names(&self, point: HookPoint) -> Vec<String> {
        self.handlers
            .get(&point)
            .map(|handlers| handlers.iter().map(|h| h.name().to_string()).collect())
            .unwrap_or_default()
    }

    /// Run every handler registered for `point`, one at a time, in
    /// registration order.
    ///
    /// The first failing handler ends the hook point and its error is returned
    /// as-is; failures are neither logged nor recovered here.
    pub async fn process(
        &self,
        point: HookPoint,
        context: &mut RenderContext,
    ) -> Result<(), InterceptorError> {
        let Some(handlers) = self.handlers.get(&point) else {
            return Ok(());
        };

        for handler in handlers {
            trace!(
                target = "application::interceptor",
                point = %point,
                handler = handler.name(),
                "dispatching interceptor"
            );
            handler.process(point, context).await?;
        }

        Ok(())
    }
}
