use thiserror::Error;

/// Typed failures surfaced by store operations. Validation and
/// authorization outcomes are ordinary values here, not panics; only
/// `Unavailable`/`Sqlite` represent infrastructure trouble.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("caller is not a participant of this chat")]
    NotParticipant,

    #[error("chat not found")]
    ChatNotFound,

    #[error("user not found")]
    UserNotFound,

    #[error("{0}")]
    InvalidArgument(&'static str),

    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}
