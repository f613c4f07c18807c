/// Instantiation and invocation of loaded types
use crate::artifact::CONSTRUCTOR;
use crate::config::EvalOptions;
use crate::error::{EvalError, Result};
use crate::loader::{LoadedMethod, LoadedType};
use crate::runtime::vm::{self, Frame};
use crate::runtime::Value;
use tracing::trace;

/// A constructed instance of a loaded type, ready to run its entry method.
#[derive(Debug)]
pub struct Instance<'t> {
    loaded: &'t LoadedType,
    entry: &'t LoadedMethod,
    fields: Vec<Value>,
    max_stack: usize,
    output: String,
}

impl Instance<'_> {
    pub fn fields(&self) -> &[Value] {
        &self.fields
    }
}

/// Result of running a fragment: its value and anything it printed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    pub value: Value,
    pub output: String,
    /// Synthetic type the fragment ran in; a caller-owned scope still holds it.
    pub type_name: String,
}

/// Construct an instance through the type's zero-argument constructor.
pub fn instantiate<'t>(loaded: &'t LoadedType, options: &EvalOptions) -> Result<Instance<'t>> {
    let constructor = zero_arg_method(loaded, CONSTRUCTOR)?;
    if constructor.returns_value {
        return Err(EvalError::instantiation(format!("constructor of {} returns a value", loaded.name())));
    }
    let entry = zero_arg_method(loaded, &options.entry_method)?;

    let mut fields = vec![Value::Nil; loaded.field_count()];
    let mut output = String::new();
    let frame = Frame {
        code: loaded.code(constructor),
        constants: loaded.constants(),
        fields: &mut fields,
        locals: constructor.locals as usize,
    };
    vm::execute(frame, options.max_operand_stack, &mut output)
        .map_err(|fault| EvalError::instantiation(format!("constructor of {} failed", loaded.name())).with_cause(fault))?;
    trace!(name = loaded.name(), fields = fields.len(), "instantiated");

    Ok(Instance {
        loaded,
        entry,
        fields,
        max_stack: options.max_operand_stack,
        output,
    })
}

fn zero_arg_method<'t>(loaded: &'t LoadedType, name: &str) -> Result<&'t LoadedMethod> {
    match loaded.method(name) {
        Some(method) if method.arity == 0 => Ok(method),
        Some(method) => Err(EvalError::instantiation(format!(
            "{}.{} takes {} arguments, expected none",
            loaded.name(),
            name,
            method.arity
        ))),
        None => Err(EvalError::instantiation(format!("{} has no zero-argument method {}", loaded.name(), name))),
    }
}

/// Run the entry method. A method without a value yields `Value::Unit`.
pub fn invoke(mut instance: Instance<'_>) -> Result<Evaluation> {
    let entry = instance.entry;
    let frame = Frame {
        code: instance.loaded.code(entry),
        constants: instance.loaded.constants(),
        fields: &mut instance.fields,
        locals: entry.locals as usize,
    };

    let value = vm::execute(frame, instance.max_stack, &mut instance.output)
        .map_err(|fault| EvalError::evaluation(fault.to_string()).with_cause(fault))?
        .unwrap_or(Value::Unit);

    Ok(Evaluation {
        value,
        output: instance.output,
        type_name: instance.loaded.name().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::{MethodDef, TypeDef};
    use crate::error::ErrorKind;
    use crate::ir::IRInstruction;
    use crate::loader::LoadingScope;
    use crate::runtime::VmFault;

    fn encode(instructions: &[IRInstruction]) -> Vec<u8> {
        let mut code = Vec::new();
        for instruction in instructions {
            instruction.encode(&mut code);
        }
        code
    }

    fn method(name: &str, arity: u8, returns_value: bool, body: &[IRInstruction]) -> MethodDef {
        MethodDef {
            name: name.to_string(),
            arity,
            locals: 0,
            max_stack: 8,
            returns_value,
            body: encode(body),
        }
    }

    fn load(scope: &mut LoadingScope, methods: Vec<MethodDef>) -> &LoadedType {
        let type_def = TypeDef {
            name: "Sample".to_string(),
            field_count: 1,
            constants: Vec::new(),
            methods,
        };
        scope.define(&type_def.write().unwrap(), &EvalOptions::default()).unwrap()
    }

    fn init_storing(value: i64) -> MethodDef {
        method(CONSTRUCTOR, 0, false, &[IRInstruction::PushInt(value), IRInstruction::StoreField(0), IRInstruction::ReturnVoid])
    }

    #[test]
    fn constructor_runs_before_entry() {
        let mut scope = LoadingScope::new();
        let loaded = load(
            &mut scope,
            vec![
                init_storing(20),
                method("run", 0, true, &[IRInstruction::LoadField(0), IRInstruction::PushInt(1), IRInstruction::Add, IRInstruction::Return]),
            ],
        );
        let instance = instantiate(loaded, &EvalOptions::default()).unwrap();
        assert_eq!(instance.fields(), &[Value::Int(20)]);
        let evaluation = invoke(instance).unwrap();
        assert_eq!(evaluation.value, Value::Int(21));
        assert_eq!(evaluation.type_name, "Sample");
    }

    #[test]
    fn void_entry_yields_unit() {
        let mut scope = LoadingScope::new();
        let loaded = load(&mut scope, vec![init_storing(1), method("run", 0, false, &[IRInstruction::ReturnVoid])]);
        let evaluation = invoke(instantiate(loaded, &EvalOptions::default()).unwrap()).unwrap();
        assert_eq!(evaluation.value, Value::Unit);
    }

    #[test]
    fn missing_constructor_is_an_instantiation_failure() {
        let mut scope = LoadingScope::new();
        let loaded = load(&mut scope, vec![method("run", 0, true, &[IRInstruction::PushNil, IRInstruction::Return])]);
        let error = instantiate(loaded, &EvalOptions::default()).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::InstantiationFailure);
    }

    #[test]
    fn constructor_with_arguments_is_rejected() {
        let mut scope = LoadingScope::new();
        let loaded = load(
            &mut scope,
            vec![
                method(CONSTRUCTOR, 1, false, &[IRInstruction::ReturnVoid]),
                method("run", 0, true, &[IRInstruction::PushNil, IRInstruction::Return]),
            ],
        );
        let error = instantiate(loaded, &EvalOptions::default()).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::InstantiationFailure);
    }

    #[test]
    fn faulting_constructor_is_an_instantiation_failure() {
        let mut scope = LoadingScope::new();
        let loaded = load(
            &mut scope,
            vec![
                method(CONSTRUCTOR, 0, false, &[IRInstruction::PushInt(1), IRInstruction::PushInt(0), IRInstruction::Div, IRInstruction::ReturnVoid]),
                method("run", 0, true, &[IRInstruction::PushNil, IRInstruction::Return]),
            ],
        );
        let error = instantiate(loaded, &EvalOptions::default()).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::InstantiationFailure);
    }

    #[test]
    fn missing_entry_method_is_an_instantiation_failure() {
        let mut scope = LoadingScope::new();
        let loaded = load(&mut scope, vec![init_storing(1), method("main", 0, true, &[IRInstruction::PushNil, IRInstruction::Return])]);
        let error = instantiate(loaded, &EvalOptions::default()).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::InstantiationFailure);

        let options = EvalOptions::default().with_entry_method("main");
        assert!(instantiate(loaded, &options).is_ok());
    }

    #[test]
    fn entry_fault_carries_the_vm_fault() {
        let mut scope = LoadingScope::new();
        let loaded = load(
            &mut scope,
            vec![
                init_storing(0),
                method("run", 0, true, &[IRInstruction::PushInt(1), IRInstruction::LoadField(0), IRInstruction::Div, IRInstruction::Return]),
            ],
        );
        let error = invoke(instantiate(loaded, &EvalOptions::default()).unwrap()).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::EvaluationFailure);
        let source = std::error::Error::source(&error).and_then(|s| s.downcast_ref::<VmFault>());
        assert_eq!(source, Some(&VmFault::DivisionByZero));
    }
}
