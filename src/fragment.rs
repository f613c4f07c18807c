/// Fragment wrapper
///
/// Embeds a fragment as the body of the single entry method of a fresh
/// synthetic type. Host bindings become fields of that type, initialised
/// by its zero-argument constructor.
use crate::artifact::CONSTRUCTOR;
use crate::config::EvalOptions;
use crate::error::{EvalError, Result};
use crate::frontend::{FragmentShape, FrontEnd};
use crate::runtime::Value;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_UNIT_ID: AtomicU64 = AtomicU64::new(1);

/// Named constants a fragment may reference as free names.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bindings {
    entries: Vec<(String, Value)>,
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    /// Insert or replace a binding.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(existing, _)| *existing == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub init: Value,
}

/// One declared type with one zero-argument entry method whose body is
/// the fragment. Lives for a single pipeline run.
#[derive(Debug)]
pub struct SyntheticUnit<'f, F: ?Sized> {
    pub type_name: String,
    pub entry_method: String,
    pub fields: Vec<Field>,
    pub body: &'f F,
    pub shape: FragmentShape,
    pub origin: usize,
}

/// Call-scoped type name, unique within the process.
pub fn next_type_name(prefix: &str) -> String {
    let id = NEXT_UNIT_ID.fetch_add(1, Ordering::Relaxed);
    format!("{}${}", prefix, id)
}

pub fn wrap<'f, F: FrontEnd>(front_end: &F, fragment: &'f F::Fragment, bindings: &Bindings, options: &EvalOptions) -> Result<SyntheticUnit<'f, F::Fragment>> {
    let info = front_end.inspect(fragment);
    match info.shape {
        FragmentShape::Empty => return Err(EvalError::invalid_fragment("fragment is empty")),
        FragmentShape::Declaration => return Err(EvalError::invalid_fragment("a declaration cannot be embedded as a method body")),
        FragmentShape::Block { statements } if !options.allow_blocks => {
            return Err(EvalError::invalid_fragment(format!(
                "fragment has {} statements but only a single expression or statement is accepted",
                statements
            )));
        }
        _ => {}
    }

    if info.depth > options.max_nesting_depth {
        return Err(EvalError::invalid_fragment(format!(
            "fragment nests {} levels deep, the limit is {}",
            info.depth, options.max_nesting_depth
        )));
    }

    if options.entry_method.is_empty() {
        return Err(EvalError::invalid_fragment("entry method name is empty"));
    }
    if options.entry_method == CONSTRUCTOR {
        return Err(EvalError::invalid_fragment(format!("entry method cannot be named {}", CONSTRUCTOR)));
    }

    let mut fields = Vec::with_capacity(bindings.len());
    for (name, value) in bindings.iter() {
        if *value == Value::Unit {
            return Err(EvalError::invalid_fragment(format!("binding '{}' has no value", name)));
        }
        fields.push(Field {
            name: name.to_string(),
            init: value.clone(),
        });
    }

    Ok(SyntheticUnit {
        type_name: next_type_name(&options.type_name_prefix),
        entry_method: options.entry_method.clone(),
        fields,
        body: fragment,
        shape: info.shape,
        origin: info.origin,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{parse_fragment, Node};
    use crate::error::ErrorKind;
    use crate::frontend::slisp::SlispFrontEnd;

    fn wrap_source(source: &str, options: &EvalOptions) -> Result<(FragmentShape, String, usize)> {
        let nodes = parse_fragment(source).unwrap();
        let unit = wrap(&SlispFrontEnd, nodes.as_slice(), &Bindings::new(), options)?;
        Ok((unit.shape, unit.type_name, unit.origin))
    }

    #[test]
    fn expression_gets_a_fresh_name() {
        let options = EvalOptions::default();
        let (shape, first, _) = wrap_source("(+ 1 2)", &options).unwrap();
        let (_, second, _) = wrap_source("(+ 1 2)", &options).unwrap();
        assert_eq!(shape, FragmentShape::Expression);
        assert!(first.starts_with("Fragment$"));
        assert_ne!(first, second);
    }

    #[test]
    fn origin_is_first_node_offset() {
        let (_, _, origin) = wrap_source("   (+ 1 2)", &EvalOptions::default()).unwrap();
        assert_eq!(origin, 3);
    }

    #[test]
    fn empty_fragment_is_invalid() {
        let error = wrap_source("", &EvalOptions::default()).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::InvalidFragment);
    }

    #[test]
    fn blocks_need_opt_in() {
        let error = wrap_source("(def x 1) (+ x 1)", &EvalOptions::default()).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::InvalidFragment);

        let (shape, _, _) = wrap_source("(def x 1) (+ x 1)", &EvalOptions::default().with_blocks(true)).unwrap();
        assert_eq!(shape, FragmentShape::Block { statements: 2 });
    }

    #[test]
    fn declarations_are_rejected() {
        let error = wrap_source("(defn f [x] x)", &EvalOptions::default()).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::InvalidFragment);
    }

    #[test]
    fn nesting_past_the_limit_is_rejected() {
        let nested = |depth: usize| vec![(0..depth).fold(Node::new_number(1), |inner, _| Node::new_list_from_raw(vec![Node::new_symbol("-"), inner]))];
        let options = EvalOptions::default().with_max_nesting_depth(8);

        let at_limit = nested(8);
        let unit = wrap(&SlispFrontEnd, at_limit.as_slice(), &Bindings::new(), &options).unwrap();
        assert_eq!(unit.shape, FragmentShape::Expression);

        let error = wrap(&SlispFrontEnd, nested(9).as_slice(), &Bindings::new(), &options).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::InvalidFragment);
        assert!(error.message.contains("9 levels"));
    }

    #[test]
    fn entry_method_cannot_be_the_constructor() {
        let options = EvalOptions::default().with_entry_method(CONSTRUCTOR);
        let error = wrap_source("(+ 1 2)", &options).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::InvalidFragment);

        let error = wrap_source("(+ 1 2)", &EvalOptions::default().with_entry_method("")).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::InvalidFragment);
    }

    #[test]
    fn bindings_become_fields_in_order() {
        let nodes = parse_fragment("(+ a b)").unwrap();
        let bindings = Bindings::new().with("a", 1).with("b", 2).with("a", 3);
        let unit = wrap(&SlispFrontEnd, nodes.as_slice(), &bindings, &EvalOptions::default()).unwrap();
        assert_eq!(
            unit.fields,
            vec![
                Field { name: "a".to_string(), init: Value::Int(3) },
                Field { name: "b".to_string(), init: Value::Int(2) },
            ]
        );
    }

    #[test]
    fn unit_binding_is_rejected() {
        let nodes = parse_fragment("a").unwrap();
        let bindings = Bindings::new().with("a", Value::Unit);
        let error = wrap(&SlispFrontEnd, nodes.as_slice(), &bindings, &EvalOptions::default()).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::InvalidFragment);
    }
}
