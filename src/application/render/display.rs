use std::sync::Arc;

use tokio::sync::watch;

/// Receives committed HTML from the render pipeline.
///
/// Returning `false` declines the commit; the pipeline then treats the run as
/// superseded and leaves the displayed value alone.
pub trait DisplaySink: Send + Sync {
    fn commit(&self, html: String) -> bool;
}

/// Display state backed by a `watch` channel: the latest committed HTML stays
/// visible until the next successful commit.
#[derive(Clone)]
pub struct WatchDisplay {
    sender: Arc<watch::Sender<String>>,
}

impl WatchDisplay {
    pub fn new() -> Self {
        let (sender, _receiver) = watch::channel(String::new());
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Currently displayed HTML.
    pub fn current(&self) -> String {
        self.sender.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<String> {
        self.sender.subscribe()
    }
}

impl Default for WatchDisplay {
    fn default() -> Self {
        Self::new()
    }
}

impl DisplaySink for WatchDisplay {
    fn commit(&self, html: String) -> bool {
        self.sender.send_replace(html);
        true
    }
}
