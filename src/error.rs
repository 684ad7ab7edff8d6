//! Error taxonomy shared by every layer of the parser.
//!
//! Every fallible operation in this crate returns [`Error`]. The variants are kinds, not
//! specific codes: callers are expected to match on the variant and ignore the message when
//! deciding how to react.

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// The error kinds a caller can match against.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Caller supplied a null/zero/out-of-range input (e.g. inode number 0).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A parsed value exceeds the volume's geometry.
    #[error("value out of range: {0}")]
    OutOfRange(String),

    /// An on-disk structure failed a structural invariant.
    #[error("corrupt on-disk structure: {0}")]
    CorruptFormat(String),

    /// A feature flag or on-disk construct the core does not implement.
    #[error("unsupported feature: {0}")]
    Unsupported(String),

    /// The underlying byte source returned an error or an incomplete read.
    #[error("I/O failure: {0}")]
    IoFailure(#[from] std::io::Error),

    /// A requested path component or inode-by-path lookup missed.
    #[error("not found: {0}")]
    NotFound(String),

    /// The shared abort flag was set while the operation was in flight.
    #[error("operation aborted")]
    Aborted,

    /// An internal invariant was broken. Always indicates a bug in this crate.
    #[error("internal error: {0}")]
    LogicError(String),
}

impl Error {
    pub(crate) fn corrupt(msg: impl Into<String>) -> Self {
        Error::CorruptFormat(msg.into())
    }

    pub(crate) fn unsupported(msg: impl Into<String>) -> Self {
        Error::Unsupported(msg.into())
    }

    pub(crate) fn out_of_range(msg: impl Into<String>) -> Self {
        Error::OutOfRange(msg.into())
    }

    pub(crate) fn invalid_argument(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }
}
