use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    /// Missing, expired, or forbidden credentials. Terminal to the current
    /// socket or request.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Input rejected before touching state. The message is user-visible.
    #[error("{0}")]
    Validation(String),

    /// An operation that does not apply to the current state. State is left
    /// unmodified.
    #[error("{0}")]
    State(String),

    /// The hot store is unreachable. Callers degrade rather than fail the
    /// socket.
    #[error("hot store error: {0}")]
    TransientStore(#[from] redis::RedisError),

    /// A durable write or read failed. Logged by write-behind callers; the
    /// live broadcast path is unaffected.
    #[error("durable store error: {0}")]
    DurableStore(#[from] sqlx::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;
