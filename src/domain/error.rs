use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("comment `{id}` replies to unknown comment `{parent}`")]
    OrphanReply { id: Uuid, parent: Uuid },
    #[error("comment `{id}` appears more than once in the thread")]
    DuplicateComment { id: Uuid },
    #[error("comment `{id}` is part of a reply cycle")]
    ReplyCycle { id: Uuid },
    #[error("comment `{id}` has an empty revision id")]
    MissingRevision { id: Uuid },
    #[error("comment `{id}` was updated before it was created")]
    Timestamps { id: Uuid },
}
