use thiserror::Error;

/// Failure categories and how they terminate: configuration errors are
/// fatal for the agent, resource/staging/runtime errors are terminal for
/// one task, transport errors are retried locally before escalating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Config,
    Resource,
    Bootstrap,
    Staging,
    Runtime,
    Cancellation,
    Transport,
}

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("allocation does not match platform config: {0}")]
    ConfigMismatch(String),

    #[error("allocation manifest unreadable: {0}")]
    AllocationUnreadable(String),

    #[error("bootstrap failed: {0}")]
    Bootstrap(String),

    #[error("task can never be scheduled: {0}")]
    Unschedulable(String),

    #[error("no usable launch method: {0}")]
    LmUnavailable(String),

    #[error("staging directive failed ({directive}): {reason}")]
    Staging { directive: String, reason: String },

    #[error("runtime error: {0}")]
    Runtime(String),

    #[error("canceled")]
    Canceled,

    #[error("transport error: {0}")]
    Transport(String),
}

impl CoreError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Config(_) => ErrorCategory::Config,
            Self::ConfigMismatch(_) | Self::AllocationUnreadable(_) => ErrorCategory::Resource,
            Self::Bootstrap(_) => ErrorCategory::Bootstrap,
            Self::Unschedulable(_) | Self::LmUnavailable(_) => ErrorCategory::Resource,
            Self::Staging { .. } => ErrorCategory::Staging,
            Self::Io(_) | Self::Runtime(_) => ErrorCategory::Runtime,
            Self::Canceled => ErrorCategory::Cancellation,
            Self::Serialization(_) | Self::Transport(_) => ErrorCategory::Transport,
        }
    }

    /// Agent exit code when this error is unrecoverable.
    pub fn exit_code(&self) -> i32 {
        match self.category() {
            ErrorCategory::Config => 1,
            ErrorCategory::Resource => 2,
            ErrorCategory::Bootstrap => 3,
            _ => 4,
        }
    }
}
