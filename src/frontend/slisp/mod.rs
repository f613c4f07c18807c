/// SLisp front-end
///
/// This module is organized into:
/// - validate: structural checks (special-form arity, binding shapes)
/// - context: scopes and slot allocation used while resolving names
/// - resolve: name binding and kind inference into a resolved tree
/// - codegen: bytecode generation and object container emission
mod codegen;
mod context;
mod resolve;
mod validate;

pub use resolve::ValueKind;

use crate::artifact::CompiledArtifact;
use crate::ast::Node;
use crate::fragment::SyntheticUnit;
use crate::frontend::{FragmentInfo, FragmentShape, FrontEnd, FrontEndError, Phase};
use resolve::ResolvedBody;
use tracing::trace;

/// Literal symbols that can never be rebound
pub(crate) const RESERVED_NAMES: [&str; 3] = ["true", "false", "nil"];

#[derive(Debug, Clone, Copy, Default)]
pub struct SlispFrontEnd;

/// Compilation state of one synthetic unit
#[derive(Debug, Default)]
pub struct SlispSession {
    completed: Option<Phase>,
    body: Option<ResolvedBody>,
    artifacts: Vec<CompiledArtifact>,
}

/// Statements making up the method body: the children of a top-level
/// `(do ...)`, otherwise the top-level forms themselves.
pub(crate) fn statements(nodes: &[Node]) -> &[Node] {
    if let [single] = nodes {
        if single.head_symbol() == Some("do") {
            if let Node::List { root, .. } = single {
                return &root[1..];
            }
        }
    }
    nodes
}

fn is_declaration(node: &Node) -> bool {
    matches!(node.head_symbol(), Some("defn") | Some("defmacro") | Some("ns"))
}

impl FrontEnd for SlispFrontEnd {
    type Fragment = [Node];
    type Session = SlispSession;

    fn name(&self) -> &'static str {
        "slisp"
    }

    fn inspect(&self, fragment: &[Node]) -> FragmentInfo {
        let origin = fragment.first().map(|node| node.span().start).unwrap_or(0);
        let depth = fragment.iter().map(Node::depth).max().unwrap_or(0);
        let shape = match fragment {
            [] => FragmentShape::Empty,
            _ if statements(fragment).iter().any(is_declaration) => FragmentShape::Declaration,
            [single] if single.head_symbol() == Some("do") => FragmentShape::Block {
                statements: statements(fragment).len(),
            },
            [single] if single.head_symbol() == Some("def") => FragmentShape::Statement,
            [_] => FragmentShape::Expression,
            nodes => FragmentShape::Block { statements: nodes.len() },
        };
        FragmentInfo { shape, origin, depth }
    }

    fn open_session(&self, _unit: &SyntheticUnit<'_, [Node]>) -> Result<SlispSession, FrontEndError> {
        Ok(SlispSession::default())
    }

    fn run_phase(&self, unit: &SyntheticUnit<'_, [Node]>, session: &mut SlispSession, phase: Phase) -> Result<(), FrontEndError> {
        if session.completed != phase.previous() {
            return Err(FrontEndError::Internal(format!("{} phase requested out of order", phase)));
        }

        let body = statements(unit.body);
        match phase {
            Phase::Validation => validate::validate_fragment(body)?,
            Phase::Resolution => {
                let resolved = resolve::resolve_fragment(body, &unit.fields)?;
                trace!(locals = resolved.locals, statements = resolved.statements.len(), "resolved fragment");
                session.body = Some(resolved);
            }
            Phase::Generation => {
                let resolved = session
                    .body
                    .take()
                    .ok_or_else(|| FrontEndError::Internal("generation requested without a resolved body".to_string()))?;
                session.artifacts.push(codegen::generate(unit, &resolved)?);
            }
        }

        session.completed = Some(phase);
        Ok(())
    }

    fn take_artifacts(&self, session: SlispSession) -> Vec<CompiledArtifact> {
        session.artifacts
    }
}
