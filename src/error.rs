use std::fmt;
use thiserror::Error;

/// Classification of every failure `evaluate` can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The fragment is absent or cannot be embedded as a method body.
    InvalidFragment,
    /// Name or type resolution failed inside the fragment.
    SemanticError,
    /// The front-end broke its contract (wrong artifact count, panic).
    InternalCompilerFault,
    /// The artifact could not be registered in the loading scope.
    LoadFailure,
    /// The loaded type could not be constructed.
    InstantiationFailure,
    /// The fragment itself faulted while running.
    EvaluationFailure,
}

impl ErrorKind {
    /// Only an internal compiler fault signals a programming-contract violation.
    pub fn is_recoverable(self) -> bool {
        self != ErrorKind::InternalCompilerFault
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::InvalidFragment => "invalid fragment",
            ErrorKind::SemanticError => "semantic error",
            ErrorKind::InternalCompilerFault => "internal compiler fault",
            ErrorKind::LoadFailure => "load failure",
            ErrorKind::InstantiationFailure => "instantiation failure",
            ErrorKind::EvaluationFailure => "evaluation failure",
        };
        f.write_str(name)
    }
}

/// Location inside the fragment, relative to the start of its first node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub offset: usize,
    pub len: usize,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "offset {}", self.offset)
    }
}

pub type Cause = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug)]
#[error("{kind}: {message}{}", .position.map(|p| format!(" (at {})", p)).unwrap_or_default())]
pub struct EvalError {
    pub kind: ErrorKind,
    pub message: String,
    pub position: Option<Position>,
    #[source]
    pub cause: Option<Cause>,
}

impl EvalError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            position: None,
            cause: None,
        }
    }

    pub fn with_position(mut self, position: Position) -> Self {
        self.position = Some(position);
        self
    }

    pub fn with_cause(mut self, cause: impl Into<Cause>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    pub fn invalid_fragment(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidFragment, message)
    }

    pub fn semantic(message: impl Into<String>, position: Position) -> Self {
        Self::new(ErrorKind::SemanticError, message).with_position(position)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InternalCompilerFault, message)
    }

    pub fn load(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::LoadFailure, message)
    }

    pub fn instantiation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InstantiationFailure, message)
    }

    pub fn evaluation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::EvaluationFailure, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

pub type Result<T> = std::result::Result<T, EvalError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[derive(Error, Debug)]
    #[error("division by zero")]
    struct Boom;

    #[test]
    fn display_includes_kind_and_position() {
        let error = EvalError::semantic("Undefined variable: y", Position { offset: 5, len: 1 });
        assert_eq!(error.to_string(), "semantic error: Undefined variable: y (at offset 5)");
    }

    #[test]
    fn cause_is_exposed_as_source() {
        let error = EvalError::evaluation("fragment faulted").with_cause(Boom);
        assert_eq!(error.source().map(|s| s.to_string()), Some("division by zero".to_string()));
    }

    #[test]
    fn only_internal_faults_are_unrecoverable() {
        assert!(!ErrorKind::InternalCompilerFault.is_recoverable());
        assert!(ErrorKind::SemanticError.is_recoverable());
        assert!(ErrorKind::EvaluationFailure.is_recoverable());
    }
}
