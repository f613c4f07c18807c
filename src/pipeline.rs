/// Pipeline driver
///
/// Runs a front-end's phases over a synthetic unit, up to and including
/// code generation, and collects the single artifact the unit must produce.
use crate::artifact::CompiledArtifact;
use crate::error::{EvalError, Position, Result};
use crate::fragment::SyntheticUnit;
use crate::frontend::{FrontEnd, FrontEndError, Phase};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use tracing::{debug, warn};

pub fn compile<F: FrontEnd>(front_end: &F, unit: &SyntheticUnit<'_, F::Fragment>) -> Result<CompiledArtifact> {
    let mut session = guarded(front_end, "session setup", || front_end.open_session(unit)).map_err(|e| classify(e, unit))?;

    for phase in Phase::ALL {
        debug!(front_end = front_end.name(), unit = %unit.type_name, %phase, "running phase");
        guarded(front_end, "compilation", || front_end.run_phase(unit, &mut session, phase)).map_err(|e| classify(e, unit))?;
    }

    let mut artifacts = guarded(front_end, "artifact collection", || Ok(front_end.take_artifacts(session))).map_err(|e| classify(e, unit))?;
    if artifacts.len() != 1 {
        return Err(EvalError::internal(format!(
            "expected exactly one generated type for {}, got {}",
            unit.type_name,
            artifacts.len()
        )));
    }

    let artifact = artifacts.remove(0);
    if artifact.name != unit.type_name {
        return Err(EvalError::internal(format!("generated type {} does not match {}", artifact.name, unit.type_name)));
    }
    debug!(unit = %unit.type_name, bytes = artifact.bytes.len(), "compiled");
    Ok(artifact)
}

/// Run one front-end step, turning a panic into an internal error
fn guarded<F: FrontEnd, T>(front_end: &F, step: &str, run: impl FnOnce() -> std::result::Result<T, FrontEndError>) -> std::result::Result<T, FrontEndError> {
    panic::catch_unwind(AssertUnwindSafe(run)).unwrap_or_else(|payload| {
        let message = panic_message(payload.as_ref());
        warn!(front_end = front_end.name(), step, %message, "front-end panicked");
        Err(FrontEndError::Internal(format!("front-end panicked during {}: {}", step, message)))
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Diagnostics become semantic errors positioned relative to the fragment
fn classify<F: ?Sized>(error: FrontEndError, unit: &SyntheticUnit<'_, F>) -> EvalError {
    match error {
        FrontEndError::Diagnostic { message, span } => EvalError::semantic(
            message,
            Position {
                offset: span.start.saturating_sub(unit.origin),
                len: span.len,
            },
        ),
        FrontEndError::Internal(message) => EvalError::internal(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::parse_fragment;
    use crate::config::EvalOptions;
    use crate::error::ErrorKind;
    use crate::fragment::{wrap, Bindings};
    use crate::frontend::slisp::SlispFrontEnd;

    fn compile_source(source: &str) -> Result<CompiledArtifact> {
        let nodes = parse_fragment(source).unwrap();
        let unit = wrap(&SlispFrontEnd, nodes.as_slice(), &Bindings::new(), &EvalOptions::default())?;
        compile(&SlispFrontEnd, &unit)
    }

    #[test]
    fn compiles_to_one_named_artifact() {
        let artifact = compile_source("(* 6 7)").unwrap();
        assert!(artifact.name.starts_with("Fragment$"));
        assert_eq!(&artifact.bytes[..4], b"\x7fELF");
    }

    #[test]
    fn diagnostics_are_relative_to_the_fragment() {
        let error = compile_source("  (+ 1 y)").unwrap_err();
        assert_eq!(error.kind(), ErrorKind::SemanticError);
        assert_eq!(error.position, Some(Position { offset: 5, len: 1 }));
    }

    #[test]
    fn validation_failures_are_semantic_errors() {
        let error = compile_source("(if 1 2)").unwrap_err();
        assert_eq!(error.kind(), ErrorKind::SemanticError);
        assert!(error.message.contains("Arity error"));
    }

    #[test]
    fn panic_payloads_are_described() {
        assert_eq!(panic_message(&"boom"), "boom");
        assert_eq!(panic_message(&"boom".to_string()), "boom");
        assert_eq!(panic_message(&3_u8), "unknown panic");
    }
}
