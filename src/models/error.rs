use thiserror::Error;

/// Failures of file-tree operations. Reported to the requesting user only,
/// via a `file-error` event; peers never see them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeError {
    #[error("'{0}' not found")]
    NotFound(String),

    #[error("'{0}' already exists")]
    AlreadyExists(String),

    #[error("cannot delete the last remaining file")]
    CannotDeleteLastFile,

    #[error("cannot move '{0}' into itself")]
    IntoSelf(String),

    #[error("'{0}' is not a file")]
    NotAFile(String),

    #[error("'{0}' is not a folder")]
    NotAFolder(String),
}

/// Failures of the room store (creation and join authorization).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("room not found")]
    RoomNotFound,

    #[error("invalid room password")]
    BadPassword,

    #[error("room code already taken")]
    CodeCollision,

    #[error("password hashing failed: {0}")]
    Hash(#[from] bcrypt::BcryptError),

    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
}

/// Failures of terminal session management.
#[derive(Debug, Error)]
pub enum PtyError {
    #[error("failed to spawn shell: {0}")]
    SpawnFailed(String),

    #[error("no terminal session for user {0}")]
    NoSession(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
