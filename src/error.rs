//! Error types for the component runtime core

use thiserror::Error;

/// Errors raised by the invocation-interception and lifecycle core
#[derive(Error, Debug, Clone)]
pub enum CoreError {
    /// A binding configuration was constructed without a name
    #[error("Binding configuration requires a name")]
    MissingBindingName,

    /// A binding configuration was constructed without a value source
    #[error("Binding '{name}' requires a value source")]
    MissingBindingSource { name: String },

    /// Applying a resolved value to an injection target failed
    #[error("Failed to inject into {target}: {reason}")]
    InjectionFailed { target: String, reason: String },

    /// Attempted to mutate instance data after construction completed
    #[error("Construction already complete - instance data is frozen")]
    ConstructionComplete,

    /// No interceptor is registered for the requested method
    #[error("No such method: {method}")]
    NoSuchMethod { method: String },

    /// The chain cannot continue (e.g. no component instance on the context)
    #[error("Cannot proceed: {reason}")]
    CannotProceed { reason: String },

    /// The component was invoked after it was stopped
    #[error("Component '{component}' is stopped")]
    ComponentStopped { component: String },

    /// A reference factory failed to construct the backing instance
    #[error("Failed to create instance for '{component}': {reason}")]
    CreationFailed { component: String, reason: String },

    /// Internal error
    #[error("Internal component-core error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Create a MissingBindingSource error
    #[inline]
    pub fn missing_source(name: impl Into<String>) -> Self {
        Self::MissingBindingSource { name: name.into() }
    }

    /// Create an InjectionFailed error
    #[inline]
    pub fn injection_failed(target: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InjectionFailed {
            target: target.into(),
            reason: reason.into(),
        }
    }

    /// Create a NoSuchMethod error
    #[inline]
    pub fn no_such_method(method: impl Into<String>) -> Self {
        Self::NoSuchMethod {
            method: method.into(),
        }
    }

    /// Create a CannotProceed error
    #[inline]
    pub fn cannot_proceed(reason: impl Into<String>) -> Self {
        Self::CannotProceed {
            reason: reason.into(),
        }
    }

    /// Create a ComponentStopped error
    #[inline]
    pub fn stopped(component: impl Into<String>) -> Self {
        Self::ComponentStopped {
            component: component.into(),
        }
    }

    /// Create a CreationFailed error
    #[inline]
    pub fn creation_failed(component: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::CreationFailed {
            component: component.into(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for component-core operations
pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CoreError::no_such_method("frobnicate");
        assert_eq!(err.to_string(), "No such method: frobnicate");

        let err = CoreError::stopped("payment");
        assert_eq!(err.to_string(), "Component 'payment' is stopped");
    }

    #[test]
    fn test_injection_failed_preserves_cause() {
        let err = CoreError::injection_failed("Widget::size", "setter panicked");
        assert!(err.to_string().contains("Widget::size"));
        assert!(err.to_string().contains("setter panicked"));
    }

    #[test]
    fn test_errors_are_cloneable() {
        let err = CoreError::cannot_proceed("no instance associated");
        let cloned = err.clone();
        assert_eq!(err.to_string(), cloned.to_string());
    }
}
