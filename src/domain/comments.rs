use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use super::error::DomainError;

/// Number of trailing characters of a revision id shown in comment metadata.
pub const REVISION_LABEL_LEN: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Creator {
    pub username: String,
    #[serde(default)]
    pub name: Option<String>,
}

impl Creator {
    /// Name shown next to the avatar; falls back to the username.
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or(&self.username)
    }
}

/// A page comment as delivered by the comments API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: Uuid,
    #[serde(rename = "comment")]
    pub body: String,
    #[serde(default = "default_is_markdown")]
    pub is_markdown: bool,
    pub creator: Creator,
    pub revision: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    #[serde(default)]
    pub reply_to: Option<Uuid>,
}

fn default_is_markdown() -> bool {
    true
}

impl Comment {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.revision.trim().is_empty() {
            return Err(DomainError::MissingRevision { id: self.id });
        }
        if self.updated_at < self.created_at {
            return Err(DomainError::Timestamps { id: self.id });
        }
        Ok(())
    }

    pub fn is_edited(&self) -> bool {
        self.created_at < self.updated_at
    }

    pub fn is_authored_by(&self, username: &str) -> bool {
        self.creator.username == username
    }

    /// Last [`REVISION_LABEL_LEN`] characters of the revision id.
    pub fn revision_short(&self) -> &str {
        let count = self.revision.chars().count();
        let skip = count.saturating_sub(REVISION_LABEL_LEN);
        match self.revision.char_indices().nth(skip) {
            Some((offset, _)) => &self.revision[offset..],
            None => "",
        }
    }

    pub fn revision_href(&self) -> String {
        format!("?revision={}", self.revision)
    }
}

/// The page revision the comments are displayed against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageRevision {
    pub revision_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub revision_created_at: OffsetDateTime,
}
