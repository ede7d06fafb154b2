use thiserror::Error;

/// The error type for fallible map operations.
///
/// Lookups and deletions of absent keys are not errors; they are reported as `None` or `false`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A construction parameter was outside its legal range.
    #[error("illegal parameter: {message}")]
    IllegalParameter {
        /// What was wrong with the parameter.
        message: String,
    },

    /// The key was rejected by [`Key::validate`](crate::Key::validate).
    #[error("invalid key: {reason}")]
    InvalidKey {
        /// Why the key was rejected.
        reason: &'static str,
    },
}

impl Error {
    pub(crate) fn illegal_parameter(message: impl Into<String>) -> Self {
        Error::IllegalParameter {
            message: message.into(),
        }
    }
}

/// A `Result` specialized to this crate's [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display() {
        let e = Error::illegal_parameter("concurrency is too small");
        assert_eq!(e.to_string(), "illegal parameter: concurrency is too small");

        let e = Error::InvalidKey {
            reason: "empty key",
        };
        assert_eq!(e.to_string(), "invalid key: empty key");
    }
}
