use thiserror::Error;

/// Errors raised while reading wire data.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SerdeError {
    /// The buffer ended before the requested read completed.
    #[error("Buffer truncated: needed {needed} more byte(s), {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },

    /// A variable-length integer ran past its maximum encoded width.
    #[error("Variable-length integer exceeds {max_bytes} bytes")]
    Overlong { max_bytes: usize },

    /// A length-prefixed string did not contain valid UTF-8.
    #[error("String payload of {len} byte(s) is not valid UTF-8")]
    InvalidUtf8 { len: usize },
}
