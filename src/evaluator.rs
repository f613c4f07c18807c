/// Fragment evaluation
///
/// Composes the four steps of an evaluation: wrap the fragment into a
/// synthetic unit, compile it through the front-end, define the artifact
/// in a loading scope, then instantiate and invoke it.
///
/// An `Evaluator` holds no mutable state. Every call gets a fresh unit,
/// a fresh front-end session and, unless the caller supplies one, a fresh
/// loading scope, so calls from different threads never interact.
use crate::ast::{parse_fragment_with_depth, Node};
use crate::config::EvalOptions;
use crate::error::{EvalError, Position, Result};
use crate::fragment::{wrap, Bindings};
use crate::frontend::slisp::SlispFrontEnd;
use crate::frontend::FrontEnd;
use crate::invoker::{instantiate, invoke, Evaluation};
use crate::loader::LoadingScope;
use crate::pipeline::compile;
use crate::runtime::Value;
use tracing::{debug_span, field, trace};

#[derive(Debug, Clone, Default)]
pub struct Evaluator<F: FrontEnd = SlispFrontEnd> {
    front_end: F,
    options: EvalOptions,
}

impl Evaluator<SlispFrontEnd> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: EvalOptions) -> Self {
        Self::with_front_end(SlispFrontEnd, options)
    }

    /// Parse `source` and evaluate it as one fragment.
    pub fn evaluate_source(&self, source: &str) -> Result<Evaluation> {
        self.evaluate_source_with(source, &Bindings::new())
    }

    pub fn evaluate_source_with(&self, source: &str, bindings: &Bindings) -> Result<Evaluation> {
        let nodes = parse_fragment_with_depth(source, self.options.max_nesting_depth).map_err(|e| {
            EvalError::invalid_fragment(e.message.clone())
                .with_position(Position { offset: e.offset, len: 0 })
                .with_cause(e)
        })?;
        self.evaluate_with(nodes.as_slice(), bindings)
    }
}

impl<F: FrontEnd> Evaluator<F> {
    pub fn with_front_end(front_end: F, options: EvalOptions) -> Self {
        Self { front_end, options }
    }

    pub fn options(&self) -> &EvalOptions {
        &self.options
    }

    /// Value of `fragment`, discarding anything it printed.
    pub fn evaluate(&self, fragment: &F::Fragment) -> Result<Value> {
        self.evaluate_with(fragment, &Bindings::new()).map(|evaluation| evaluation.value)
    }

    pub fn evaluate_with(&self, fragment: &F::Fragment, bindings: &Bindings) -> Result<Evaluation> {
        let mut scope = LoadingScope::new();
        self.evaluate_in(&mut scope, fragment, bindings)
    }

    /// Evaluate inside a caller-owned scope, which keeps the loaded type
    /// alive after the call returns.
    pub fn evaluate_in(&self, scope: &mut LoadingScope, fragment: &F::Fragment, bindings: &Bindings) -> Result<Evaluation> {
        let span = debug_span!("evaluate", front_end = self.front_end.name(), unit = field::Empty);
        let _enter = span.enter();

        let unit = wrap(&self.front_end, fragment, bindings, &self.options)?;
        span.record("unit", unit.type_name.as_str());

        let artifact = compile(&self.front_end, &unit)?;
        let loaded = scope.define(&artifact, &self.options)?;
        let instance = instantiate(loaded, &self.options)?;
        let evaluation = invoke(instance)?;

        trace!(value = %evaluation.value, "evaluated");
        Ok(evaluation)
    }
}

/// Evaluate a parsed SLisp fragment with default options.
pub fn evaluate(fragment: &[Node]) -> Result<Value> {
    Evaluator::new().evaluate(fragment)
}

/// Parse and evaluate SLisp source with default options.
pub fn evaluate_source(source: &str) -> Result<Value> {
    Evaluator::new().evaluate_source(source).map(|evaluation| evaluation.value)
}
