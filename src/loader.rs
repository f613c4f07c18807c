/// Artifact loader
///
/// A `LoadingScope` is an isolated namespace for types defined from
/// compiled artifacts. Each evaluation gets its own scope, so types from
/// different calls never see each other and are released together with
/// the scope.
///
/// Defining a type reads its object container, verifies every method body
/// and copies the code into a read-only anonymous mapping owned by the
/// loaded type. A method whose operand stack would outgrow the configured
/// limit is refused here, before any of its code runs.
use crate::artifact::{CompiledArtifact, MethodDef, TypeDef};
use crate::config::EvalOptions;
use crate::error::{EvalError, Result};
use crate::ir::{max_stack_depth, IRInstruction};
use memmap2::{Mmap, MmapMut};
use std::collections::HashMap;
use std::fmt;
use std::ops::Range;
use tracing::trace;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedMethod {
    pub name: String,
    pub arity: u8,
    pub locals: u16,
    pub max_stack: u32,
    pub returns_value: bool,
    code: Range<usize>,
}

pub struct LoadedType {
    name: String,
    field_count: u16,
    constants: Vec<String>,
    methods: Vec<LoadedMethod>,
    image: Mmap,
}

impl LoadedType {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn field_count(&self) -> usize {
        self.field_count as usize
    }

    pub fn constants(&self) -> &[String] {
        &self.constants
    }

    pub fn method(&self, name: &str) -> Option<&LoadedMethod> {
        self.methods.iter().find(|m| m.name == name)
    }

    /// Verified bytecode of `method`
    pub fn code(&self, method: &LoadedMethod) -> &[u8] {
        &self.image[method.code.clone()]
    }
}

impl fmt::Debug for LoadedType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedType")
            .field("name", &self.name)
            .field("field_count", &self.field_count)
            .field("methods", &self.methods)
            .field("image_len", &self.image.len())
            .finish()
    }
}

#[derive(Debug, Default)]
pub struct LoadingScope {
    types: HashMap<String, LoadedType>,
}

impl LoadingScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the type carried by `artifact`.
    ///
    /// Fails with `LoadFailure` when the container or its code is malformed,
    /// when the artifact's name disagrees with the type it carries, when a
    /// method needs a deeper operand stack than `options` allow, or when
    /// the scope already holds a type of that name.
    pub fn define(&mut self, artifact: &CompiledArtifact, options: &EvalOptions) -> Result<&LoadedType> {
        if self.get(&artifact.name).is_some() {
            return Err(EvalError::load(format!("type {} is already defined in this scope", artifact.name)));
        }

        let type_def = TypeDef::read(&artifact.bytes).map_err(|e| EvalError::load(format!("cannot read artifact {}", artifact.name)).with_cause(e))?;
        if type_def.name != artifact.name {
            return Err(EvalError::load(format!("artifact {} carries type {}", artifact.name, type_def.name)));
        }

        for method in &type_def.methods {
            verify_method(&type_def, method).map_err(|message| EvalError::load(format!("{}.{}: {}", type_def.name, method.name, message)))?;
            if method.max_stack as usize > options.max_operand_stack {
                return Err(EvalError::load(format!(
                    "{}.{} needs {} operand stack entries, the limit is {}",
                    type_def.name, method.name, method.max_stack, options.max_operand_stack
                )));
            }
        }

        let loaded = map_image(type_def)?;
        trace!(name = %loaded.name, methods = loaded.methods.len(), bytes = loaded.image.len(), "defined type");

        let name = loaded.name.clone();
        let loaded: &LoadedType = self.types.entry(name).or_insert(loaded);
        Ok(loaded)
    }

    pub fn get(&self, name: &str) -> Option<&LoadedType> {
        self.types.get(name)
    }
}

fn map_image(type_def: TypeDef) -> Result<LoadedType> {
    let total: usize = type_def.methods.iter().map(|m| m.body.len()).sum();
    if total == 0 {
        return Err(EvalError::load(format!("type {} has no code", type_def.name)));
    }

    let mut image = MmapMut::map_anon(total).map_err(|e| EvalError::load("cannot map code image").with_cause(e))?;
    let mut methods = Vec::with_capacity(type_def.methods.len());
    let mut offset = 0;
    for method in type_def.methods {
        let range = offset..offset + method.body.len();
        image[range.clone()].copy_from_slice(&method.body);
        offset = range.end;
        methods.push(LoadedMethod {
            name: method.name,
            arity: method.arity,
            locals: method.locals,
            max_stack: method.max_stack,
            returns_value: method.returns_value,
            code: range,
        });
    }
    let image = image.make_read_only().map_err(|e| EvalError::load("cannot protect code image").with_cause(e))?;

    Ok(LoadedType {
        name: type_def.name,
        field_count: type_def.field_count,
        constants: type_def.constants,
        methods,
        image,
    })
}

/// Check that the method's code decodes fully, every operand stays in range
/// and the stack never grows past the declared depth
fn verify_method(type_def: &TypeDef, method: &MethodDef) -> std::result::Result<(), String> {
    let MethodDef {
        name,
        locals,
        returns_value,
        body: code,
        ..
    } = method;
    let (locals, returns_value) = (*locals, *returns_value);
    if code.is_empty() {
        return Err("empty method body".to_string());
    }

    let mut boundaries = Vec::new();
    let mut jumps = Vec::new();
    let mut offset = 0;
    while offset < code.len() {
        let (instruction, len) = IRInstruction::decode(code, offset).map_err(|e| e.to_string())?;
        boundaries.push(offset);

        match instruction {
            IRInstruction::Jump(target) | IRInstruction::JumpIfFalse(target) => jumps.push(target as usize),
            IRInstruction::LoadLocal(slot) | IRInstruction::StoreLocal(slot) if slot >= locals => {
                return Err(format!("local slot {} out of range at offset {}", slot, offset));
            }
            IRInstruction::LoadField(index) | IRInstruction::StoreField(index) if index >= type_def.field_count => {
                return Err(format!("field {} out of range at offset {}", index, offset));
            }
            IRInstruction::PushConst(index) if index as usize >= type_def.constants.len() => {
                return Err(format!("constant {} out of range at offset {}", index, offset));
            }
            IRInstruction::Return if !returns_value => {
                return Err(format!("method {} is declared void but returns a value", name));
            }
            IRInstruction::ReturnVoid if returns_value => {
                return Err(format!("method {} must return a value", name));
            }
            _ => {}
        }
        offset += len;
    }

    if let Some(target) = jumps.into_iter().find(|target| boundaries.binary_search(target).is_err()) {
        return Err(format!("jump to {} does not land on an instruction", target));
    }

    let needed = max_stack_depth(code).map_err(|e| e.to_string())?;
    if needed > method.max_stack as usize {
        return Err(format!("needs {} operand stack entries but declares {}", needed, method.max_stack));
    }
    Ok(())
}
