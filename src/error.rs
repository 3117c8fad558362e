use thiserror::Error;

/// Library error type for powerdown operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The callback is already present in the registry.
    #[error("shutdown hook is already registered")]
    DuplicateHook,

    /// The callback was never registered (or was already removed).
    #[error("shutdown hook is not registered")]
    NotRegistered,

    /// The registry holds its configured maximum number of hooks.
    #[error("shutdown hook registry is full ({limit} hooks)")]
    CapacityExceeded { limit: usize },

    /// The platform cannot perform the requested power operation.
    #[error("unsupported power operation: {0}")]
    UnsupportedOperation(&'static str),

    /// Underlying IO error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// YAML/serde configuration error.
    #[error(transparent)]
    Config(#[from] serde_yaml::Error),
}
