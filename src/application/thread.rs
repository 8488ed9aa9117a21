//! Comment thread presentation: class names, reply grouping and concurrent
//! rendering of every comment body.

use std::collections::HashMap;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::application::render::{RenderPipeline, WatchDisplay};
use crate::config::ThreadSettings;
use crate::domain::{
    comments::{Comment, PageRevision},
    error::DomainError,
};

const BALLOON_LAYOUTS: [&str; 3] = ["crowi-plus", "growi", "kibela"];

/// Order in which replies are listed under their parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyLayout {
    /// Chat-style layouts list replies oldest first.
    Balloon,
    /// Other layouts list the newest reply first.
    Flat,
}

impl ReplyLayout {
    pub fn from_layout_type(layout_type: &str) -> Self {
        if BALLOON_LAYOUTS
            .iter()
            .any(|name| layout_type.contains(name))
        {
            ReplyLayout::Balloon
        } else {
            ReplyLayout::Flat
        }
    }
}

/// Who is looking at the thread.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Viewer {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub is_admin: bool,
}

impl Viewer {
    fn is_author_of(&self, comment: &Comment) -> bool {
        self.username
            .as_deref()
            .is_some_and(|username| comment.is_authored_by(username))
    }

    /// Admins and authors may edit or delete a comment.
    pub fn can_control(&self, comment: &Comment) -> bool {
        self.is_admin || self.is_author_of(comment)
    }
}

/// CSS classes for a comment's root element relative to the displayed page
/// revision.
pub fn root_class_name(comment: &Comment, page: &PageRevision, viewer: &Viewer) -> String {
    let mut class_name = String::from("page-comment");

    if comment.revision == page.revision_id {
        class_name.push_str(" page-comment-current");
    } else if comment.created_at > page.revision_created_at {
        class_name.push_str(" page-comment-newer");
    } else {
        class_name.push_str(" page-comment-older");
    }

    if viewer.is_author_of(comment) {
        class_name.push_str(" page-comment-me");
    }

    class_name
}

pub fn revision_label_class(comment: &Comment, page: &PageRevision) -> &'static str {
    if comment.revision == page.revision_id {
        "page-comment-revision label label-primary"
    } else {
        "page-comment-revision label label-default"
    }
}

/// Escaped plain-text body for comments not written in markdown.
pub fn render_plain_text(body: &str) -> String {
    format!(
        "<span style=\"white-space: pre-wrap\">{}</span>",
        ammonia::clean_text(body)
    )
}

/// Replies split into the collapsed older part and the always-visible tail.
#[derive(Debug, PartialEq, Eq)]
pub struct ReplyPartition<'a, T> {
    pub hidden: Vec<&'a T>,
    pub shown: Vec<&'a T>,
}

/// Order replies for `layout` and keep the last `visible` of them shown.
pub fn partition_replies<T>(replies: &[T], layout: ReplyLayout, visible: usize) -> ReplyPartition<'_, T> {
    let mut ordered: Vec<&T> = replies.iter().collect();
    if layout == ReplyLayout::Flat {
        ordered.reverse();
    }

    let split = ordered.len().saturating_sub(visible);
    let shown = ordered.split_off(split);
    ReplyPartition {
        hidden: ordered,
        shown,
    }
}

/// Input for rendering a whole thread.
#[derive(Debug, Clone, Deserialize)]
pub struct ThreadDocument {
    pub page: PageRevision,
    #[serde(default)]
    pub viewer: Viewer,
    pub comments: Vec<Comment>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderedComment {
    pub id: Uuid,
    pub author: String,
    pub class_name: String,
    pub revision_label: String,
    pub revision_class: &'static str,
    pub revision_href: String,
    pub is_edited: bool,
    pub can_control: bool,
    pub html: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadEntry {
    pub comment: RenderedComment,
    pub hidden_replies: Vec<RenderedComment>,
    pub shown_replies: Vec<RenderedComment>,
}

/// Renders comment threads with a shared pipeline.
pub struct ThreadRenderer {
    pipeline: RenderPipeline,
    layout: ReplyLayout,
    visible_replies: usize,
}

impl ThreadRenderer {
    pub fn new(pipeline: RenderPipeline, settings: &ThreadSettings) -> Self {
        Self {
            pipeline,
            layout: ReplyLayout::from_layout_type(&settings.layout_type),
            visible_replies: settings.visible_replies,
        }
    }

    /// Render every comment of the thread concurrently and group replies under
    /// their parents. A comment whose render fails keeps an empty body and
    /// reports the error; other comments are unaffected.
    pub async fn render(&self, document: &ThreadDocument) -> Result<Vec<ThreadEntry>, DomainError> {
        let roots = resolve_roots(&document.comments)?;

        let rendered = join_all(
            document
                .comments
                .iter()
                .map(|comment| self.render_comment(comment, &document.page, &document.viewer)),
        )
        .await;

        let mut by_id: HashMap<Uuid, RenderedComment> =
            rendered.into_iter().map(|item| (item.id, item)).collect();

        let mut replies: HashMap<Uuid, Vec<&Comment>> = HashMap::new();
        for comment in &document.comments {
            if let Some(root) = roots.get(&comment.id) {
                replies.entry(*root).or_default().push(comment);
            }
        }

        let mut entries = Vec::new();
        for comment in document.comments.iter().filter(|c| c.reply_to.is_none()) {
            let mut children = replies.remove(&comment.id).unwrap_or_default();
            children.sort_by_key(|reply| reply.created_at);

            let partition = partition_replies(&children, self.layout, self.visible_replies);
            let mut take = |replies: Vec<&&Comment>| -> Vec<RenderedComment> {
                replies
                    .into_iter()
                    .filter_map(|reply| by_id.remove(&reply.id))
                    .collect()
            };
            let hidden_replies = take(partition.hidden);
            let shown_replies = take(partition.shown);

            if let Some(rendered) = by_id.remove(&comment.id) {
                entries.push(ThreadEntry {
                    comment: rendered,
                    hidden_replies,
                    shown_replies,
                });
            }
        }

        Ok(entries)
    }

    async fn render_comment(
        &self,
        comment: &Comment,
        page: &PageRevision,
        viewer: &Viewer,
    ) -> RenderedComment {
        let (html, error) = if comment.is_markdown {
            let display = WatchDisplay::new();
            match self.pipeline.run(comment.body.clone(), &display).await {
                Ok(outcome) => (outcome.html, None),
                Err(err) => {
                    warn!(
                        target = "application::thread",
                        comment_id = %comment.id,
                        error = %err,
                        "comment body failed to render"
                    );
                    (display.current(), Some(err.to_string()))
                }
            }
        } else {
            (render_plain_text(&comment.body), None)
        };

        RenderedComment {
            id: comment.id,
            author: comment.creator.display_name().to_string(),
            class_name: root_class_name(comment, page, viewer),
            revision_label: comment.revision_short().to_string(),
            revision_class: revision_label_class(comment, page),
            revision_href: comment.revision_href(),
            is_edited: comment.is_edited(),
            can_control: viewer.can_control(comment),
            html,
            error,
        }
    }
}

/// Validate the thread and map every reply to the top-level comment it
/// belongs under. Replies to replies are listed under that same comment.
fn resolve_roots(comments: &[Comment]) -> Result<HashMap<Uuid, Uuid>, DomainError> {
    let mut parents = HashMap::with_capacity(comments.len());
    for comment in comments {
        comment.validate()?;
        if parents.insert(comment.id, comment.reply_to).is_some() {
            return Err(DomainError::DuplicateComment { id: comment.id });
        }
    }

    let mut roots = HashMap::new();
    for comment in comments {
        let Some(mut ancestor) = comment.reply_to else {
            continue;
        };
        let mut hops = 0;
        loop {
            match parents.get(&ancestor) {
                None => {
                    return Err(DomainError::OrphanReply {
                        id: comment.id,
                        parent: ancestor,
                    });
                }
                Some(None) => break,
                Some(Some(next)) => {
                    hops += 1;
                    if hops > comments.len() {
                        return Err(DomainError::ReplyCycle { id: comment.id });
                    }
                    ancestor = *next;
                }
            }
        }
        roots.insert(comment.id, ancestor);
    }

    Ok(roots)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use time::{OffsetDateTime, macros::datetime};

    use super::*;
    use crate::application::interceptor::InterceptorManager;
    use crate::application::render::ComrakCommentRenderer;
    use crate::domain::comments::Creator;

    fn page() -> PageRevision {
        PageRevision {
            revision_id: "rev-current-0001".into(),
            revision_created_at: datetime!(2024-05-01 12:00 UTC),
        }
    }

    fn comment(author: &str, revision: &str, created_at: OffsetDateTime) -> Comment {
        Comment {
            id: Uuid::new_v4(),
            body: "body".into(),
            is_markdown: true,
            creator: Creator {
                username: author.into(),
                name: None,
            },
            revision: revision.into(),
            created_at,
            updated_at: created_at,
            reply_to: None,
        }
    }

    fn viewer(username: &str) -> Viewer {
        Viewer {
            username: Some(username.into()),
            is_admin: false,
        }
    }

    fn thread_renderer(layout_type: &str) -> ThreadRenderer {
        let pipeline = RenderPipeline::new(
            Arc::new(InterceptorManager::new()),
            Arc::new(ComrakCommentRenderer::default()),
        );
        ThreadRenderer::new(
            pipeline,
            &ThreadSettings {
                layout_type: layout_type.into(),
                visible_replies: 2,
            },
        )
    }

    #[test]
    fn class_name_reflects_revision_and_author() {
        let page = page();
        let current = comment("alice", "rev-current-0001", datetime!(2024-05-01 13:00 UTC));
        let newer = comment("bob", "rev-next", datetime!(2024-05-02 09:00 UTC));
        let older = comment("bob", "rev-prev", datetime!(2024-04-01 09:00 UTC));

        assert_eq!(
            root_class_name(&current, &page, &viewer("alice")),
            "page-comment page-comment-current page-comment-me"
        );
        assert_eq!(
            root_class_name(&newer, &page, &viewer("alice")),
            "page-comment page-comment-newer"
        );
        assert_eq!(
            root_class_name(&older, &page, &Viewer::default()),
            "page-comment page-comment-older"
        );
        assert_eq!(
            revision_label_class(&current, &page),
            "page-comment-revision label label-primary"
        );
        assert_eq!(
            revision_label_class(&older, &page),
            "page-comment-revision label label-default"
        );
    }

    #[test]
    fn admins_and_authors_can_control() {
        let c = comment("alice", "r", datetime!(2024-05-01 13:00 UTC));
        assert!(viewer("alice").can_control(&c));
        assert!(!viewer("bob").can_control(&c));
        let admin = Viewer {
            username: Some("root".into()),
            is_admin: true,
        };
        assert!(admin.can_control(&c));
    }

    #[test]
    fn layout_type_selects_reply_order() {
        assert_eq!(ReplyLayout::from_layout_type("growi"), ReplyLayout::Balloon);
        assert_eq!(ReplyLayout::from_layout_type("crowi-plus"), ReplyLayout::Balloon);
        assert_eq!(ReplyLayout::from_layout_type("crowi"), ReplyLayout::Flat);
    }

    #[test]
    fn partition_keeps_last_two_visible() {
        let replies = [1, 2, 3, 4];

        let balloon = partition_replies(&replies, ReplyLayout::Balloon, 2);
        assert_eq!(balloon.hidden, vec![&1, &2]);
        assert_eq!(balloon.shown, vec![&3, &4]);

        let flat = partition_replies(&replies, ReplyLayout::Flat, 2);
        assert_eq!(flat.hidden, vec![&4, &3]);
        assert_eq!(flat.shown, vec![&2, &1]);

        let few = partition_replies(&replies[..1], ReplyLayout::Balloon, 2);
        assert!(few.hidden.is_empty());
        assert_eq!(few.shown, vec![&1]);
    }

    #[test]
    fn plain_text_is_escaped() {
        let html = render_plain_text("<b>hi</b>");
        assert!(html.starts_with("<span style=\"white-space: pre-wrap\">"));
        assert!(html.contains("&lt;b&gt;hi"));
        assert!(!html.contains("<b>"));
    }

    #[tokio::test]
    async fn renders_thread_with_grouped_replies() {
        let page = page();
        let root = comment("alice", "rev-current-0001", datetime!(2024-05-01 13:00 UTC));
        let mut replies = Vec::new();
        for hour in 14..17 {
            let mut reply = comment("bob", "rev-current-0001", datetime!(2024-05-01 00:00 UTC));
            reply.created_at = datetime!(2024-05-01 00:00 UTC) + time::Duration::hours(hour);
            reply.updated_at = reply.created_at;
            reply.reply_to = Some(root.id);
            reply.body = format!("reply {hour}");
            replies.push(reply);
        }
        let mut plain = comment("carol", "rev-prev", datetime!(2024-04-01 09:00 UTC));
        plain.is_markdown = false;
        plain.body = "a < b".into();

        let mut comments = vec![root.clone(), plain.clone()];
        comments.extend(replies.iter().rev().cloned());

        let document = ThreadDocument {
            page,
            viewer: viewer("alice"),
            comments,
        };

        let entries = thread_renderer("growi").render(&document).await.unwrap();
        assert_eq!(entries.len(), 2);

        let first = &entries[0];
        assert_eq!(first.comment.id, root.id);
        assert_eq!(first.comment.html.trim_end(), "<p>body</p>");
        assert!(first.comment.can_control);
        assert_eq!(first.hidden_replies.len(), 1);
        assert_eq!(first.hidden_replies[0].html.trim_end(), "<p>reply 14</p>");
        let shown: Vec<&str> = first
            .shown_replies
            .iter()
            .map(|r| r.html.trim_end())
            .collect();
        assert_eq!(shown, vec!["<p>reply 15</p>", "<p>reply 16</p>"]);

        let second = &entries[1];
        assert_eq!(second.comment.id, plain.id);
        assert!(second.comment.html.contains("&lt;"));
        assert!(!second.comment.html.contains("a < b"));
        assert_eq!(second.comment.revision_class, "page-comment-revision label label-default");
    }

    #[tokio::test]
    async fn orphan_replies_are_rejected() {
        let mut reply = comment("bob", "r", datetime!(2024-05-01 13:00 UTC));
        let parent = Uuid::new_v4();
        reply.reply_to = Some(parent);
        let document = ThreadDocument {
            page: page(),
            viewer: Viewer::default(),
            comments: vec![reply.clone()],
        };

        let err = thread_renderer("growi").render(&document).await.unwrap_err();
        assert_eq!(
            err,
            DomainError::OrphanReply {
                id: reply.id,
                parent
            }
        );
    }

    #[tokio::test]
    async fn nested_replies_are_listed_under_their_top_level_comment() {
        let root = comment("alice", "rev-current-0001", datetime!(2024-05-01 13:00 UTC));
        let mut reply = comment("bob", "rev-current-0001", datetime!(2024-05-01 14:00 UTC));
        reply.reply_to = Some(root.id);
        reply.body = "first".into();
        let mut nested = comment("carol", "rev-current-0001", datetime!(2024-05-01 15:00 UTC));
        nested.reply_to = Some(reply.id);
        nested.body = "second".into();

        let document = ThreadDocument {
            page: page(),
            viewer: Viewer::default(),
            comments: vec![nested.clone(), root.clone(), reply.clone()],
        };

        let entries = thread_renderer("growi").render(&document).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].comment.id, root.id);
        let shown: Vec<Uuid> = entries[0].shown_replies.iter().map(|r| r.id).collect();
        assert_eq!(shown, vec![reply.id, nested.id]);
    }

    #[tokio::test]
    async fn duplicate_comment_ids_are_rejected() {
        let first = comment("alice", "r", datetime!(2024-05-01 13:00 UTC));
        let mut second = comment("bob", "r", datetime!(2024-05-01 14:00 UTC));
        second.id = first.id;
        let document = ThreadDocument {
            page: page(),
            viewer: Viewer::default(),
            comments: vec![first.clone(), second],
        };

        let err = thread_renderer("growi").render(&document).await.unwrap_err();
        assert_eq!(err, DomainError::DuplicateComment { id: first.id });
    }

    #[tokio::test]
    async fn reply_cycles_are_rejected() {
        let mut a = comment("alice", "r", datetime!(2024-05-01 13:00 UTC));
        let mut b = comment("bob", "r", datetime!(2024-05-01 14:00 UTC));
        a.reply_to = Some(b.id);
        b.reply_to = Some(a.id);
        let document = ThreadDocument {
            page: page(),
            viewer: Viewer::default(),
            comments: vec![a.clone(), b],
        };

        let err = thread_renderer("growi").render(&document).await.unwrap_err();
        assert_eq!(err, DomainError::ReplyCycle { id: a.id });
    }
}
