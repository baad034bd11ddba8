use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("no signed-in user")]
    AuthRequired,

    #[error("invalid message: {0}")]
    Validation(#[from] ValidationError),

    /// The store refused the insert. Nothing was written; `content` is the
    /// caller's original text so it can be resubmitted.
    #[error("message could not be sent: {reason}")]
    SendFailed { content: String, reason: String },

    #[error("live updates unavailable: {0}")]
    Subscription(String),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("message is empty")]
    EmptyContent,

    #[error("cannot send a message to yourself")]
    SelfMessage,
}
