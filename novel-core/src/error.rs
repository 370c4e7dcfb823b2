//! Error taxonomy and surface classification (C9).
//!
//! `NovelError` is the one error type every crate above `novel-core`
//! returns. `Classifier` maps a `NovelError` to the logging level and
//! client-visibility policy fixed by spec §4.6/§7, so the story pipeline
//! and the game loop cannot disagree on how a given kind is surfaced.

use thiserror::Error;

pub type NovelResult<T> = Result<T, NovelError>;

#[derive(Error, Debug)]
pub enum NovelError {
    #[error("validation failed on field '{field}': {reason}")]
    BadRequest { field: String, reason: String },

    #[error("invalid choice: {0}")]
    InvalidChoice(String),

    #[error("forbidden")]
    Forbidden,

    #[error("story not found")]
    StoryNotFound,

    #[error("player game state not found")]
    PlayerGameStateNotFound,

    #[error("scene not found")]
    SceneNotFound,

    #[error("resource not found")]
    NotFound,

    #[error("a save slot already exists for this player and story")]
    SaveSlotExists,

    #[error("story is not ready to play")]
    StoryNotReady,

    #[error("cannot retry: {0}")]
    CannotRetry(String),

    #[error("scene needs generation")]
    SceneNeedsGeneration,

    #[error("game over is pending")]
    GameOverPending,

    #[error("game is already completed")]
    GameCompleted,

    #[error("player state is in error")]
    PlayerStateInError,

    #[error("repository error: {0}")]
    Repository(#[from] anyhow::Error),

    #[error("generation error: {0}")]
    Generation(String),

    #[error("retry precondition failed: {0}")]
    Retry(String),

    #[error("client notification failed: {0}")]
    ClientNotification(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl NovelError {
    pub fn bad_request(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::BadRequest { field: field.into(), reason: reason.into() }
    }
}

/// Maps a `sqlx::Error` to the taxonomy, folding `RowNotFound` into
/// `NotFound` at the repository boundary (spec §7 propagation policy).
impl From<sqlx::Error> for NovelError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => NovelError::NotFound,
            other => NovelError::Repository(anyhow::anyhow!(other)),
        }
    }
}

/// Surface a `NovelError` should take once it reaches a caller (§4.6/§7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Surface {
    /// Not logged as an error; never aborts the main flow.
    Warning,
    /// Returned to the client as a domain-specific 4xx/409 sentinel.
    ClientSentinel,
    /// Returned to the client as an opaque 500, logged with full cause.
    OpaqueInternal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Warn,
    Error,
}

pub struct Classification {
    pub surface: Surface,
    pub log_level: LogLevel,
}

/// Central error classifier (C9).
pub struct Classifier;

impl Classifier {
    pub fn classify(err: &NovelError) -> Classification {
        use NovelError::*;
        match err {
            BadRequest { .. } | InvalidChoice(_) | Forbidden | StoryNotFound
            | PlayerGameStateNotFound | SceneNotFound | NotFound | SaveSlotExists
            | StoryNotReady | CannotRetry(_) | SceneNeedsGeneration | GameOverPending
            | GameCompleted | PlayerStateInError => {
                Classification { surface: Surface::ClientSentinel, log_level: LogLevel::Debug }
            }
            ClientNotification(_) => {
                Classification { surface: Surface::Warning, log_level: LogLevel::Warn }
            }
            Repository(_) | Generation(_) | Retry(_) | Transaction(_) | Internal(_) => {
                Classification { surface: Surface::OpaqueInternal, log_level: LogLevel::Error }
            }
        }
    }

    /// `true` when the error must never abort the caller's main flow
    /// (spec §7: "ClientNotification failures are warnings only").
    pub fn is_recoverable(err: &NovelError) -> bool {
        matches!(err, NovelError::ClientNotification(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_notification_is_recoverable_and_warning_only() {
        let err = NovelError::ClientNotification("timeout".into());
        assert!(Classifier::is_recoverable(&err));
        let c = Classifier::classify(&err);
        assert_eq!(c.surface, Surface::Warning);
        assert_eq!(c.log_level, LogLevel::Warn);
    }

    #[test]
    fn row_not_found_maps_to_not_found() {
        let err: NovelError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, NovelError::NotFound));
    }

    #[test]
    fn domain_sentinels_are_client_facing_and_not_logged_as_errors() {
        let err = NovelError::StoryNotReady;
        let c = Classifier::classify(&err);
        assert_eq!(c.surface, Surface::ClientSentinel);
        assert_eq!(c.log_level, LogLevel::Debug);
    }
}
