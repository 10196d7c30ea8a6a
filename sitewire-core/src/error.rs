//! Error taxonomy shared across the framework

/// Errors raised by framework preconditions and validation.
///
/// All precondition failures are raised synchronously at the call that
/// violates them. The only places errors are ever caught by the framework
/// itself are the two debug-mode seams: executable-unit execution and
/// per-controller mapping (see [`RunMode`](crate::config::RunMode)).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A required argument was missing or empty.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// An argument had the wrong runtime shape (e.g. non-object params).
    #[error("invalid type: {0}")]
    InvalidType(String),

    /// A name did not resolve to a registered controller implementation.
    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    /// A command name was not registered in the controller.
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// A site map entry or parameter value failed validation.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A default trait hook was invoked without a concrete implementation.
    #[error("not implemented: {0}")]
    NotImplemented(&'static str),
}

impl Error {
    /// Convenience constructor for missing/empty argument errors.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    /// Convenience constructor for validation errors.
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }
}

/// Crate-wide result alias.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Reject an empty or all-whitespace name with `InvalidArgument`.
pub(crate) fn require_name(value: &str, what: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::InvalidArgument(format!(
            "{what} must be a non-empty string"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_name_rejects_empty() {
        assert!(matches!(
            require_name("", "topic"),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            require_name("   ", "topic"),
            Err(Error::InvalidArgument(_))
        ));
        assert!(require_name("ok", "topic").is_ok());
    }

    #[test]
    fn test_error_display_carries_context() {
        let err = Error::UnknownCommand("Save".into());
        assert_eq!(err.to_string(), "unknown command: Save");
    }

    #[test]
    fn test_convenience_constructors_build_their_variants() {
        assert!(matches!(
            Error::invalid_argument("x"),
            Error::InvalidArgument(_)
        ));
        assert!(matches!(Error::validation("x"), Error::Validation(_)));
    }
}
