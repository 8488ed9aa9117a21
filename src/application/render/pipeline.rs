//! Drives one comment body through the interceptors and renderer transforms.

use std::{any::Any, fmt, panic::AssertUnwindSafe, sync::Arc, thread};

use futures::{FutureExt, channel::oneshot, executor::block_on};
use thiserror::Error;
use tokio::{runtime::Handle, task::JoinHandle};
use tracing::{debug, warn};

use crate::application::interceptor::{
    HookPoint, InterceptorError, InterceptorManager, RenderContext,
};

use super::{
    display::DisplaySink,
    types::{RenderError, Renderer},
};

/// Where a pipeline run currently is, or where it stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Idle,
    Intercepting(HookPoint),
    PreProcessing,
    Processing,
    PostProcessing,
    Committed,
    Aborted,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineStage::Idle => f.write_str("idle"),
            PipelineStage::Intercepting(point) => write!(f, "intercepting({point})"),
            PipelineStage::PreProcessing => f.write_str("pre-processing"),
            PipelineStage::Processing => f.write_str("processing"),
            PipelineStage::PostProcessing => f.write_str("post-processing"),
            PipelineStage::Committed => f.write_str("committed"),
            PipelineStage::Aborted => f.write_str("aborted"),
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    #[error("interceptor failed while {stage}: {source}")]
    Handler {
        stage: PipelineStage,
        source: InterceptorError,
    },
    #[error("transform failed while {stage}: {source}")]
    Transform {
        stage: PipelineStage,
        source: RenderError,
    },
    #[error("post-commit interceptor failed: {source}")]
    TrailingFailure { source: InterceptorError },
    #[error("render superseded by a newer request")]
    Superseded,
}

impl PipelineError {
    /// The stage that was executing when the run stopped.
    pub fn stage(&self) -> PipelineStage {
        match self {
            PipelineError::Handler { stage, .. } | PipelineError::Transform { stage, .. } => *stage,
            PipelineError::TrailingFailure { .. } => {
                PipelineStage::Intercepting(HookPoint::PostRenderCommentHtml)
            }
            PipelineError::Superseded => PipelineStage::Aborted,
        }
    }
}

/// Result of a committed render.
#[derive(Debug)]
pub struct RenderOutcome {
    /// HTML handed to the display sink.
    pub html: String,
    /// Always [`PipelineStage::Committed`].
    pub stage: PipelineStage,
    /// The detached `postRenderCommentHtml` run.
    pub trailing: TrailingHandle,
}

/// Handle to the detached post-commit interceptors.
///
/// Dropping it does not cancel them. Awaiting [`TrailingHandle::wait`] is only
/// needed by callers that care about the outcome; failures are already logged.
#[derive(Debug)]
pub struct TrailingHandle {
    inner: TrailingInner,
}

#[derive(Debug)]
enum TrailingInner {
    /// Running on the ambient tokio runtime.
    Spawned(JoinHandle<Result<(), PipelineError>>),
    /// Running on a dedicated thread because no runtime was available.
    Detached(oneshot::Receiver<Result<(), PipelineError>>),
    Finished(Result<(), PipelineError>),
}

impl TrailingHandle {
    pub async fn wait(self) -> Result<(), PipelineError> {
        match self.inner {
            TrailingInner::Finished(result) => result,
            TrailingInner::Spawned(handle) => match handle.await {
                Ok(result) => result,
                Err(join_error) => Err(trailing_failure("trailing-task", join_error.to_string())),
            },
            TrailingInner::Detached(receiver) => match receiver.await {
                Ok(result) => result,
                Err(_) => Err(trailing_failure(
                    "trailing-thread",
                    "post-commit thread ended without a result",
                )),
            },
        }
    }
}

/// Sequences interceptors and renderer transforms for comment bodies.
///
/// Stages run strictly one after another on a context owned by the run:
/// `preRenderComment`, `prePreProcess`, pre-process, `postPreProcess`,
/// process, `prePostProcess`, post-process, `postPostProcess`,
/// `preRenderCommentHtml`, commit, then a detached `postRenderCommentHtml`.
#[derive(Clone)]
pub struct RenderPipeline {
    interceptors: Arc<InterceptorManager>,
    renderer: Arc<dyn Renderer>,
}

impl RenderPipeline {
    pub fn new(interceptors: Arc<InterceptorManager>, renderer: Arc<dyn Renderer>) -> Self {
        Self {
            interceptors,
            renderer,
        }
    }

    /// Render `markdown` and commit the result to `sink`.
    ///
    /// Any failure before the commit leaves the sink untouched.
    pub async fn run(
        &self,
        markdown: impl Into<String>,
        sink: &dyn DisplaySink,
    ) -> Result<RenderOutcome, PipelineError> {
        let mut context = RenderContext::new(markdown);

        let html = match self.drive(&mut context).await {
            Ok(html) => html,
            Err(error) => {
                warn!(
                    target = "application::render::pipeline",
                    stage = %error.stage(),
                    error = %error,
                    "comment render aborted"
                );
                return Err(error);
            }
        };

        if !sink.commit(html.clone()) {
            debug!(
                target = "application::render::pipeline",
                "comment render superseded before commit"
            );
            return Err(PipelineError::Superseded);
        }

        debug!(
            target = "application::render::pipeline",
            bytes = html.len(),
            "comment render committed"
        );

        let trailing = self.spawn_trailing(context);

        Ok(RenderOutcome {
            html,
            stage: PipelineStage::Committed,
            trailing,
        })
    }

    async fn drive(&self, context: &mut RenderContext) -> Result<String, PipelineError> {
        self.intercept(HookPoint::PreRenderComment, context).await?;
        self.intercept(HookPoint::PrePreProcess, context).await?;

        context.markdown = transform(
            PipelineStage::PreProcessing,
            self.renderer.pre_process(&context.markdown),
        )?;

        self.intercept(HookPoint::PostPreProcess, context).await?;

        context.parsed_html = Some(transform(
            PipelineStage::Processing,
            self.renderer.process(&context.markdown),
        )?);

        self.intercept(HookPoint::PrePostProcess, context).await?;

        // an interceptor may have cleared the HTML; finish whatever is left
        let parsed = context.parsed_html.as_deref().unwrap_or_default();
        context.parsed_html = Some(transform(
            PipelineStage::PostProcessing,
            self.renderer.post_process(parsed),
        )?);

        self.intercept(HookPoint::PostPostProcess, context).await?;
        self.intercept(HookPoint::PreRenderCommentHtml, context)
            .await?;

        Ok(context.parsed_html.clone().unwrap_or_default())
    }

    async fn intercept(
        &self,
        point: HookPoint,
        context: &mut RenderContext,
    ) -> Result<(), PipelineError> {
        self.interceptors
            .process(point, context)
            .await
            .map_err(|source| PipelineError::Handler {
                stage: PipelineStage::Intercepting(point),
                source,
            })
    }

    fn spawn_trailing(&self, context: RenderContext) -> TrailingHandle {
        let interceptors = Arc::clone(&self.interceptors);
        let task = run_trailing(interceptors, context);

        let inner = match Handle::try_current() {
            Ok(handle) => TrailingInner::Spawned(handle.spawn(task)),
            Err(_) => detach_on_thread(task),
        };

        TrailingHandle { inner }
    }
}

/// Without a tokio runtime the trailing stage gets its own thread, so the
/// caller's executor is neither blocked nor re-entered.
fn detach_on_thread<F>(task: F) -> TrailingInner
where
    F: Future<Output = Result<(), PipelineError>> + Send + 'static,
{
    let (sender, receiver) = oneshot::channel();
    let spawned = thread::Builder::new()
        .name("comment-trailing".into())
        .spawn(move || {
            // nobody may be waiting; the outcome is already logged
            let _ = sender.send(block_on(task));
        });

    match spawned {
        Ok(_) => TrailingInner::Detached(receiver),
        Err(err) => {
            warn!(
                target = "application::render::pipeline",
                error = %err,
                "post-commit thread could not be started"
            );
            TrailingInner::Finished(Err(trailing_failure("trailing-thread", err.to_string())))
        }
    }
}

async fn run_trailing(
    interceptors: Arc<InterceptorManager>,
    mut context: RenderContext,
) -> Result<(), PipelineError> {
    let outcome = AssertUnwindSafe(
        interceptors.process(HookPoint::PostRenderCommentHtml, &mut context),
    )
    .catch_unwind()
    .await;

    let result = match outcome {
        Ok(result) => result.map_err(|source| PipelineError::TrailingFailure { source }),
        Err(payload) => Err(trailing_failure(
            "trailing-task",
            format!("interceptor panicked: {}", panic_message(payload.as_ref())),
        )),
    };

    if let Err(error) = &result {
        warn!(
            target = "application::render::pipeline",
            error = %error,
            "post-commit interceptor failed"
        );
    }
    result
}

fn trailing_failure(handler: &str, message: impl Into<String>) -> PipelineError {
    PipelineError::TrailingFailure {
        source: InterceptorError::handler(HookPoint::PostRenderCommentHtml, handler, message),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

fn transform(
    stage: PipelineStage,
    result: Result<String, RenderError>,
) -> Result<String, PipelineError> {
    result.map_err(|source| PipelineError::Transform { stage, source })
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::application::interceptor::{FnInterceptor, Interceptor};
    use crate::application::render::WatchDisplay;

    type TransformFn = fn(&str) -> Result<String, RenderError>;

    /// Renderer assembled from plain functions that also logs each call.
    struct StubRenderer {
        pre: TransformFn,
        process: TransformFn,
        post: TransformFn,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl StubRenderer {
        fn new(log: &Arc<Mutex<Vec<String>>>) -> Self {
            Self {
                pre: |s| Ok(s.to_string()),
                process: |s| Ok(s.to_string()),
                post: |s| Ok(s.to_string()),
                log: Arc::clone(log),
            }
        }
    }

    impl Renderer for StubRenderer {
        fn pre_process(&self, markdown: &str) -> Result<String, RenderError> {
            self.log.lock().unwrap().push("preProcess".into());
            (self.pre)(markdown)
        }

        fn process(&self, markdown: &str) -> Result<String, RenderError> {
            self.log.lock().unwrap().push("process".into());
            (self.process)(markdown)
        }

        fn post_process(&self, html: &str) -> Result<String, RenderError> {
            self.log.lock().unwrap().push("postProcess".into());
            (self.post)(html)
        }
    }

    struct RecordingInterceptor {
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Interceptor for RecordingInterceptor {
        fn name(&self) -> &str {
            "recording"
        }

        async fn process(
            &self,
            point: HookPoint,
            _context: &mut RenderContext,
        ) -> Result<(), InterceptorError> {
            tokio::task::yield_now().await;
            self.log.lock().unwrap().push(point.to_string());
            Ok(())
        }
    }

    fn failing(point: HookPoint) -> Arc<dyn Interceptor> {
        Arc::new(FnInterceptor::new("failing", move |_, _: &mut RenderContext| {
            Err(InterceptorError::handler(point, "failing", "nope"))
        }))
    }

    fn pipeline(manager: InterceptorManager, renderer: StubRenderer) -> RenderPipeline {
        RenderPipeline::new(Arc::new(manager), Arc::new(renderer))
    }

    #[tokio::test]
    async fn without_interceptors_output_is_composed_transforms() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut renderer = StubRenderer::new(&log);
        renderer.pre = |s| Ok(s.trim().to_string());
        renderer.process = |s| Ok(format!("<p>{s}</p>"));
        renderer.post = |s| Ok(s.replace("<p>", "<p class=\"c\">"));

        let display = WatchDisplay::new();
        let outcome = pipeline(InterceptorManager::new(), renderer)
            .run("  body  ", &display)
            .await
            .unwrap();

        assert_eq!(outcome.html, "<p class=\"c\">body</p>");
        assert_eq!(display.current(), outcome.html);
        assert_eq!(*log.lock().unwrap(), vec!["preProcess", "process", "postProcess"]);
    }

    #[tokio::test]
    async fn heading_scenario_commits_exact_html() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut renderer = StubRenderer::new(&log);
        renderer.process = |_| Ok("<h1>Title</h1>".to_string());

        let display = WatchDisplay::new();
        let outcome = pipeline(InterceptorManager::new(), renderer)
            .run("# Title", &display)
            .await
            .unwrap();

        assert_eq!(outcome.html, "<h1>Title</h1>");
        assert_eq!(display.current(), "<h1>Title</h1>");
    }

    #[tokio::test]
    async fn empty_markdown_reaches_committed() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let display = WatchDisplay::new();
        display.commit("<p>stale</p>".into());

        let outcome = pipeline(InterceptorManager::new(), StubRenderer::new(&log))
            .run("", &display)
            .await
            .expect("empty input renders");

        assert_eq!(outcome.stage, PipelineStage::Committed);
        assert_eq!(outcome.html, "");
        assert_eq!(display.current(), "");
        outcome.trailing.wait().await.unwrap();
    }

    #[tokio::test]
    async fn stages_interleave_in_fixed_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut manager = InterceptorManager::new();
        for point in HookPoint::ALL {
            manager.register(
                point,
                Arc::new(RecordingInterceptor {
                    log: Arc::clone(&log),
                }),
            );
        }

        let display = WatchDisplay::new();
        let outcome = pipeline(manager, StubRenderer::new(&log))
            .run("text", &display)
            .await
            .unwrap();
        outcome.trailing.wait().await.unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "preRenderComment",
                "prePreProcess",
                "preProcess",
                "postPreProcess",
                "process",
                "prePostProcess",
                "postProcess",
                "postPostProcess",
                "preRenderCommentHtml",
                "postRenderCommentHtml",
            ]
        );
    }

    #[tokio::test]
    async fn pre_post_process_failure_skips_post_process_and_commit() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut manager = InterceptorManager::new();
        manager.register(HookPoint::PrePostProcess, failing(HookPoint::PrePostProcess));

        let display = WatchDisplay::new();
        display.commit("<p>previous</p>".into());

        let err = pipeline(manager, StubRenderer::new(&log))
            .run("text", &display)
            .await
            .unwrap_err();

        assert_eq!(
            err.stage(),
            PipelineStage::Intercepting(HookPoint::PrePostProcess)
        );
        assert!(matches!(err, PipelineError::Handler { .. }));
        assert_eq!(*log.lock().unwrap(), vec!["preProcess", "process"]);
        assert_eq!(display.current(), "<p>previous</p>");
    }

    #[tokio::test]
    async fn transform_failure_aborts_before_commit() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut renderer = StubRenderer::new(&log);
        renderer.process = |_| Err(RenderError::markdown("bad input"));

        let display = WatchDisplay::new();
        display.commit("<p>kept</p>".into());

        let err = pipeline(InterceptorManager::new(), renderer)
            .run("text", &display)
            .await
            .unwrap_err();

        assert_eq!(err.stage(), PipelineStage::Processing);
        assert!(matches!(
            err,
            PipelineError::Transform {
                source: RenderError::Markdown { .. },
                ..
            }
        ));
        assert_eq!(display.current(), "<p>kept</p>");
    }

    #[tokio::test]
    async fn trailing_failure_does_not_undo_commit() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut manager = InterceptorManager::new();
        manager.register(
            HookPoint::PostRenderCommentHtml,
            failing(HookPoint::PostRenderCommentHtml),
        );

        let display = WatchDisplay::new();
        let outcome = pipeline(manager, StubRenderer::new(&log))
            .run("shown", &display)
            .await
            .expect("trailing failures never fail the run");

        assert_eq!(display.current(), "shown");
        let trailing = outcome.trailing.wait().await.unwrap_err();
        assert!(matches!(trailing, PipelineError::TrailingFailure { .. }));
    }

    #[tokio::test]
    async fn trailing_panic_is_contained() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut manager = InterceptorManager::new();
        manager.register(
            HookPoint::PostRenderCommentHtml,
            Arc::new(FnInterceptor::new("panicking", |_, _: &mut RenderContext| {
                panic!("observer bug")
            })),
        );

        let display = WatchDisplay::new();
        let outcome = pipeline(manager, StubRenderer::new(&log))
            .run("shown", &display)
            .await
            .unwrap();

        assert!(outcome.trailing.wait().await.is_err());
        assert_eq!(display.current(), "shown");
    }

    #[test]
    fn trailing_stage_runs_without_tokio_runtime() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let observed = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&observed);
        let mut manager = InterceptorManager::new();
        manager.register(
            HookPoint::PostRenderCommentHtml,
            Arc::new(FnInterceptor::new("observer", move |_, ctx: &mut RenderContext| {
                seen.lock().unwrap().push(ctx.parsed_html.clone().unwrap_or_default());
                Ok(())
            })),
        );

        let display = WatchDisplay::new();
        let pipeline = pipeline(manager, StubRenderer::new(&log));
        let outcome = block_on(pipeline.run("hi", &display)).unwrap();

        assert_eq!(display.current(), "hi");
        block_on(outcome.trailing.wait()).unwrap();
        assert_eq!(*observed.lock().unwrap(), vec!["hi".to_string()]);
    }

    #[test]
    fn trailing_panic_without_runtime_stays_inside_the_stage() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut manager = InterceptorManager::new();
        manager.register(
            HookPoint::PostRenderCommentHtml,
            Arc::new(FnInterceptor::new("panicking", |_, _: &mut RenderContext| {
                panic!("observer bug")
            })),
        );

        let display = WatchDisplay::new();
        let pipeline = pipeline(manager, StubRenderer::new(&log));
        let outcome = block_on(pipeline.run("shown", &display)).unwrap();

        assert_eq!(display.current(), "shown");
        let error = block_on(outcome.trailing.wait()).unwrap_err();
        match error {
            PipelineError::TrailingFailure { source } => {
                assert!(source.to_string().contains("observer bug"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn interceptor_mutations_flow_into_transforms() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut manager = InterceptorManager::new();
        manager.register(
            HookPoint::PostPreProcess,
            Arc::new(FnInterceptor::new("emoji", |_, ctx: &mut RenderContext| {
                ctx.markdown = ctx.markdown.replace(":smile:", "🙂");
                Ok(())
            })),
        );
        manager.register(
            HookPoint::PostPostProcess,
            Arc::new(FnInterceptor::new("wrap", |_, ctx: &mut RenderContext| {
                let html = ctx.parsed_html.take().unwrap_or_default();
                ctx.parsed_html = Some(format!("<div class=\"comment\">{html}</div>"));
                Ok(())
            })),
        );

        let display = WatchDisplay::new();
        let outcome = pipeline(manager, StubRenderer::new(&log))
            .run("hi :smile:", &display)
            .await
            .unwrap();

        assert_eq!(outcome.html, "<div class=\"comment\">hi 🙂</div>");
    }

    #[tokio::test]
    async fn each_run_gets_a_fresh_context() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::new(Mutex::new(Vec::<RenderContext>::new()));
        let mut manager = InterceptorManager::new();
        let recorder = Arc::clone(&seen);
        manager.register(
            HookPoint::PreRenderComment,
            Arc::new(FnInterceptor::new("snapshot", move |_, ctx: &mut RenderContext| {
                recorder.lock().unwrap().push(ctx.clone());
                ctx.insert("visited", true);
                Ok(())
            })),
        );

        let pipeline = pipeline(manager, StubRenderer::new(&log));
        let display = WatchDisplay::new();
        pipeline.run("first", &display).await.unwrap();
        pipeline.run("second", &display).await.unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], RenderContext::new("first"));
        assert_eq!(seen[1], RenderContext::new("second"));
        assert_eq!(display.current(), "second");
    }

    struct RefusingSink;

    impl DisplaySink for RefusingSink {
        fn commit(&self, _html: String) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn refused_commit_reports_superseded_and_skips_trailing() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut manager = InterceptorManager::new();
        manager.register(
            HookPoint::PostRenderCommentHtml,
            Arc::new(RecordingInterceptor {
                log: Arc::clone(&log),
            }),
        );

        let err = pipeline(manager, StubRenderer::new(&log))
            .run("text", &RefusingSink)
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Superseded));
        assert!(!log.lock().unwrap().contains(&"postRenderCommentHtml".to_string()));
    }
}
