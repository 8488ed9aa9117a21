//! Per-comment display state driven by the render pipeline.

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicU64, Ordering},
};

use tokio::sync::watch;

use crate::application::render::{
    DisplaySink, PipelineError, RenderOutcome, RenderPipeline, WatchDisplay,
};

/// Rendered body of one comment.
///
/// Every call to [`CommentView::render`] restarts the pipeline with a fresh
/// context. When renders overlap, only the most recently started one may
/// commit; older runs end with [`PipelineError::Superseded`].
#[derive(Clone)]
pub struct CommentView {
    pipeline: RenderPipeline,
    display: WatchDisplay,
    latest: Arc<AtomicU64>,
    commit_lock: Arc<Mutex<()>>,
}

impl CommentView {
    pub fn new(pipeline: RenderPipeline) -> Self {
        Self {
            pipeline,
            display: WatchDisplay::new(),
            latest: Arc::new(AtomicU64::new(0)),
            commit_lock: Arc::new(Mutex::new(())),
        }
    }

    pub async fn render(&self, markdown: impl Into<String>) -> Result<RenderOutcome, PipelineError> {
        let generation = self.latest.fetch_add(1, Ordering::SeqCst) + 1;
        let sink = GenerationSink {
            view: self,
            generation,
        };
        self.pipeline.run(markdown, &sink).await
    }

    /// HTML currently on display.
    pub fn html(&self) -> String {
        self.display.current()
    }

    pub fn subscribe(&self) -> watch::Receiver<String> {
        self.display.subscribe()
    }
}

struct GenerationSink<'a> {
    view: &'a CommentView,
    generation: u64,
}

impl DisplaySink for GenerationSink<'_> {
    fn commit(&self, html: String) -> bool {
        // check and publish under one lock so a newer commit cannot slip in between
        let _guard = self
            .view
            .commit_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if self.view.latest.load(Ordering::SeqCst) != self.generation {
            return false;
        }
        self.view.display.commit(html)
    }
}
