use crate::errors::types::Error;
use std::fmt;

/// Context information for an error
#[derive(Debug, Clone)]
pub struct ErrorContext {
    /// Component where the error occurred
    pub component: String,
    /// Operation that was being performed
    pub operation: String,
    /// Additional context information
    pub details: Option<String>,
}

impl ErrorContext {
    /// Create a new error context
    pub fn new<S: Into<String>, T: Into<String>>(component: S, operation: T) -> Self {
        ErrorContext {
            component: component.into(),
            operation: operation.into(),
            details: None,
        }
    }

    /// Add details to the context
    pub fn with_details<S: Into<String>>(mut self, details: S) -> Self {
        self.details = Some(details.into());
        self
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "in component '{}' during operation '{}'", self.component, self.operation)?;
        if let Some(details) = &self.details {
            write!(f, " ({})", details)?;
        }
        Ok(())
    }
}

/// Extension trait for adding context to errors
pub trait ErrorExt<T> {
    /// Attach context to the error of a failed result
    fn context(self, ctx: ErrorContext) -> Result<T, Error>;

    /// Attach a component/operation pair to the error of a failed result
    fn with_context<S: Into<String>, U: Into<String>>(self, component: S, operation: U) -> Result<T, Error>;
}

impl Error {
    /// Wrap this error with the given context, keeping the variant where it
    /// carries a message.
    pub fn in_context(self, ctx: &ErrorContext) -> Error {
        match self {
            Error::Config(msg) => Error::Config(format!("{} [{}]", msg, ctx)),
            Error::Custom(msg) => Error::Custom(format!("{} [{}]", msg, ctx)),
            Error::Internal(msg) => Error::Internal(format!("{} [{}]", msg, ctx)),
            other => Error::Custom(format!("{} [{}]", other, ctx)),
        }
    }
}

impl<T> ErrorExt<T> for Result<T, Error> {
    fn context(self, ctx: ErrorContext) -> Result<T, Error> {
        self.map_err(|e| e.in_context(&ctx))
    }

    fn with_context<S: Into<String>, U: Into<String>>(self, component: S, operation: U) -> Result<T, Error> {
        self.context(ErrorContext::new(component, operation))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_keeps_config_variant() {
        let result: Result<(), Error> = Err(Error::config("missing worker_count"));
        let err = result.with_context("scheduler", "load").unwrap_err();
        match err {
            Error::Config(msg) => {
                assert!(msg.contains("missing worker_count"));
                assert!(msg.contains("component 'scheduler'"));
                assert!(msg.contains("operation 'load'"));
            }
            other => panic!("unexpected variant: {:?}", other),
        }
    }

    #[test]
    fn test_context_details_rendered() {
        let ctx = ErrorContext::new("registry", "join").with_details("room r1");
        assert_eq!(
            ctx.to_string(),
            "in component 'registry' during operation 'join' (room r1)"
        );
    }

    #[test]
    fn test_ok_result_untouched() {
        let result: Result<u32, Error> = Ok(7);
        assert_eq!(result.with_context("mixer", "put").unwrap(), 7);
    }
}
