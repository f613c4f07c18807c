/// Front-end capability interface
///
/// A front-end turns a synthetic unit into exactly one compiled artifact,
/// in three phases the pipeline driver runs one at a time:
/// - `Validation`: structural checks of the embedded fragment
/// - `Resolution`: name binding and type resolution
/// - `Generation`: code generation into an object container
///
/// Loading and invoking the artifact is shared runtime machinery, so a
/// front-end never has to provide it.
///
/// Current front-ends:
/// - `slisp`: SLisp S-expressions
pub mod slisp;

use crate::artifact::CompiledArtifact;
use crate::ast::Span;
use crate::fragment::SyntheticUnit;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Validation,
    Resolution,
    Generation,
}

impl Phase {
    pub const ALL: [Phase; 3] = [Phase::Validation, Phase::Resolution, Phase::Generation];

    /// Phase that must have completed before this one may run
    pub fn previous(self) -> Option<Phase> {
        match self {
            Phase::Validation => None,
            Phase::Resolution => Some(Phase::Validation),
            Phase::Generation => Some(Phase::Resolution),
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Validation => "validation",
            Phase::Resolution => "resolution",
            Phase::Generation => "generation",
        };
        f.write_str(name)
    }
}

/// Shape of a fragment as seen by its front-end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentShape {
    /// Nothing to evaluate.
    Empty,
    /// A single expression producing a value.
    Expression,
    /// A single statement producing no value.
    Statement,
    /// A sequence of statements.
    Block { statements: usize },
    /// A declaration that cannot live inside a method body.
    Declaration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentInfo {
    pub shape: FragmentShape,
    /// Source offset of the fragment's first node; diagnostics are reported
    /// relative to it.
    pub origin: usize,
    /// Deepest list or vector nesting; `wrap` refuses fragments deeper than
    /// `EvalOptions::max_nesting_depth`.
    pub depth: usize,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrontEndError {
    /// A problem in the fragment's own source, pointing at a node.
    #[error("{message}")]
    Diagnostic { message: String, span: Span },
    /// The front-end itself is in an unexpected state.
    #[error("{0}")]
    Internal(String),
}

impl FrontEndError {
    pub fn diagnostic(message: impl Into<String>, span: Span) -> Self {
        FrontEndError::Diagnostic {
            message: message.into(),
            span,
        }
    }
}

pub trait FrontEnd: Send + Sync {
    /// Parsed fragment as produced by this front-end's parser.
    type Fragment: ?Sized;
    /// Per-call compilation state. Never shared between calls.
    type Session;

    fn name(&self) -> &'static str;

    fn inspect(&self, fragment: &Self::Fragment) -> FragmentInfo;

    /// Construct an empty compilable unit for `unit`.
    fn open_session(&self, unit: &SyntheticUnit<'_, Self::Fragment>) -> Result<Self::Session, FrontEndError>;

    fn run_phase(&self, unit: &SyntheticUnit<'_, Self::Fragment>, session: &mut Self::Session, phase: Phase) -> Result<(), FrontEndError>;

    /// Every type generated by the session.
    fn take_artifacts(&self, session: Self::Session) -> Vec<CompiledArtifact>;
}
