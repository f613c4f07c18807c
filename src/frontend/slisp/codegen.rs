/// Bytecode generation
///
/// Lowers a resolved body into the two methods of the synthetic type:
/// the constructor, which stores every host binding into its field, and
/// the entry method, which runs the fragment.
use super::resolve::{ArithOp, CompareOp, Expr, ResolvedBody, Stmt};
use crate::artifact::{CompiledArtifact, MethodDef, TypeDef, CONSTRUCTOR};
use crate::ast::Node;
use crate::fragment::{Field, SyntheticUnit};
use crate::frontend::FrontEndError;
use crate::ir::{max_stack_depth, IRInstruction, MethodBody};
use crate::runtime::Value;
use std::collections::HashMap;

/// String constants shared by all methods of a type
#[derive(Debug, Default)]
struct ConstantPool {
    strings: Vec<String>,
    index: HashMap<String, u32>,
}

impl ConstantPool {
    fn add(&mut self, value: &str) -> u32 {
        if let Some(index) = self.index.get(value) {
            return *index;
        }
        let index = self.strings.len() as u32;
        self.strings.push(value.to_string());
        self.index.insert(value.to_string(), index);
        index
    }
}

pub fn generate(unit: &SyntheticUnit<'_, [Node]>, body: &ResolvedBody) -> Result<CompiledArtifact, FrontEndError> {
    let mut constants = ConstantPool::default();

    let constructor = generate_constructor(&unit.fields, &mut constants)?;
    let entry = generate_entry(body, &mut constants)?;
    let field_count = u16::try_from(unit.fields.len()).map_err(|_| FrontEndError::Internal("too many host bindings".to_string()))?;

    let type_def = TypeDef {
        name: unit.type_name.clone(),
        field_count,
        constants: constants.strings,
        methods: vec![
            method_def(CONSTRUCTOR, 0, false, &constructor)?,
            method_def(&unit.entry_method, body.locals, body.result.is_some(), &entry)?,
        ],
    };

    type_def.write().map_err(|e| FrontEndError::Internal(e.to_string()))
}

fn method_def(name: &str, locals: u16, returns_value: bool, method: &MethodBody) -> Result<MethodDef, FrontEndError> {
    let body = method.encode();
    let max_stack = max_stack_depth(&body).map_err(|e| FrontEndError::Internal(format!("method {}: {}", name, e)))?;
    Ok(MethodDef {
        name: name.to_string(),
        arity: 0,
        locals,
        max_stack: u32::try_from(max_stack).map_err(|_| FrontEndError::Internal(format!("method {} needs too deep a stack", name)))?,
        returns_value,
        body,
    })
}

fn generate_constructor(fields: &[Field], constants: &mut ConstantPool) -> Result<MethodBody, FrontEndError> {
    let mut method = MethodBody::new();
    for (index, field) in fields.iter().enumerate() {
        let push = match &field.init {
            Value::Int(n) => IRInstruction::PushInt(*n),
            Value::Bool(b) => IRInstruction::PushBool(*b),
            Value::Str(s) => IRInstruction::PushConst(constants.add(s)),
            Value::Nil => IRInstruction::PushNil,
            Value::Unit => return Err(FrontEndError::Internal(format!("field '{}' has no value", field.name))),
        };
        method.add_instruction(push);
        method.add_instruction(IRInstruction::StoreField(index as u16));
    }
    method.add_instruction(IRInstruction::ReturnVoid);
    Ok(method)
}

fn generate_entry(body: &ResolvedBody, constants: &mut ConstantPool) -> Result<MethodBody, FrontEndError> {
    let mut method = MethodBody::new();
    let last = body.statements.len().saturating_sub(1);

    for (index, statement) in body.statements.iter().enumerate() {
        match statement {
            Stmt::Def { slot, value } => {
                emit_expr(value, &mut method, constants)?;
                method.add_instruction(IRInstruction::StoreLocal(*slot));
            }
            Stmt::Expr(expr) => {
                emit_expr(expr, &mut method, constants)?;
                if index != last {
                    method.add_instruction(IRInstruction::Pop);
                }
            }
        }
    }

    match (body.result, body.statements.last()) {
        (None, _) => method.add_instruction(IRInstruction::ReturnVoid),
        (Some(_), Some(Stmt::Expr(_))) => method.add_instruction(IRInstruction::Return),
        (Some(_), None) => method.extend([IRInstruction::PushNil, IRInstruction::Return]),
        (Some(_), Some(Stmt::Def { .. })) => {
            return Err(FrontEndError::Internal("body ending in a definition claims a value".to_string()));
        }
    }
    Ok(method)
}

fn emit_expr(expr: &Expr, method: &mut MethodBody, constants: &mut ConstantPool) -> Result<(), FrontEndError> {
    match expr {
        Expr::Int(n) => method.add_instruction(IRInstruction::PushInt(*n)),
        Expr::Bool(b) => method.add_instruction(IRInstruction::PushBool(*b)),
        Expr::Nil => method.add_instruction(IRInstruction::PushNil),
        Expr::Str(s) => method.add_instruction(IRInstruction::PushConst(constants.add(s))),
        Expr::Local(slot) => method.add_instruction(IRInstruction::LoadLocal(*slot)),
        Expr::Field(index) => method.add_instruction(IRInstruction::LoadField(*index)),
        Expr::Arith { op, operands } => {
            let Some((first, rest)) = operands.split_first() else {
                return Err(FrontEndError::Internal("arithmetic without operands".to_string()));
            };
            let instruction = match op {
                ArithOp::Add => IRInstruction::Add,
                ArithOp::Sub => IRInstruction::Sub,
                ArithOp::Mul => IRInstruction::Mul,
                ArithOp::Div => IRInstruction::Div,
                ArithOp::Rem => IRInstruction::Rem,
            };
            emit_expr(first, method, constants)?;
            for operand in rest {
                emit_expr(operand, method, constants)?;
                method.add_instruction(instruction.clone());
            }
        }
        Expr::Neg(operand) => {
            emit_expr(operand, method, constants)?;
            method.add_instruction(IRInstruction::Neg);
        }
        Expr::Compare { op, lhs, rhs } => {
            emit_expr(lhs, method, constants)?;
            emit_expr(rhs, method, constants)?;
            method.add_instruction(match op {
                CompareOp::Equal => IRInstruction::Equal,
                CompareOp::Less => IRInstruction::Less,
                CompareOp::Greater => IRInstruction::Greater,
                CompareOp::LessEqual => IRInstruction::LessEqual,
                CompareOp::GreaterEqual => IRInstruction::GreaterEqual,
            });
        }
        Expr::Not(operand) => {
            emit_expr(operand, method, constants)?;
            method.add_instruction(IRInstruction::Not);
        }
        Expr::And(operands) => emit_short_circuit(operands, false, method, constants)?,
        Expr::Or(operands) => emit_short_circuit(operands, true, method, constants)?,
        Expr::If { cond, then, otherwise } => {
            emit_expr(cond, method, constants)?;
            let else_jump = method.next_index();
            method.add_instruction(IRInstruction::JumpIfFalse(0));

            emit_expr(then, method, constants)?;
            let end_jump = method.next_index();
            method.add_instruction(IRInstruction::Jump(0));

            let else_start = method.next_index();
            method.patch_jump(else_jump, else_start);
            emit_expr(otherwise, method, constants)?;

            let end = method.next_index();
            method.patch_jump(end_jump, end);
        }
        Expr::Let { bindings, body } => {
            for (slot, value) in bindings {
                emit_expr(value, method, constants)?;
                method.add_instruction(IRInstruction::StoreLocal(*slot));
            }
            if body.is_empty() {
                method.add_instruction(IRInstruction::PushNil);
            }
            for (index, expr) in body.iter().enumerate() {
                emit_expr(expr, method, constants)?;
                if index + 1 != body.len() {
                    method.add_instruction(IRInstruction::Pop);
                }
            }
        }
        Expr::Concat(parts) => {
            for part in parts {
                emit_expr(part, method, constants)?;
            }
            method.add_instruction(IRInstruction::Concat(operand_count(parts.len())?));
        }
        Expr::Count(operand) => {
            emit_expr(operand, method, constants)?;
            method.add_instruction(IRInstruction::Count);
        }
        Expr::Print { args, newline } => {
            // Arguments are printed separated by a single space
            let separator = constants.add(" ");
            for (index, arg) in args.iter().enumerate() {
                if index > 0 {
                    method.add_instruction(IRInstruction::PushConst(separator));
                }
                emit_expr(arg, method, constants)?;
            }
            let parts = (args.len() * 2).saturating_sub(1);
            method.add_instruction(IRInstruction::Concat(operand_count(parts)?));
            method.add_instruction(IRInstruction::Print { newline: *newline });
            method.add_instruction(IRInstruction::PushNil);
        }
    }
    Ok(())
}

/// `and` stops at the first falsey operand, `or` at the first truthy one.
/// Both produce a boolean.
fn emit_short_circuit(operands: &[Expr], stop_when_truthy: bool, method: &mut MethodBody, constants: &mut ConstantPool) -> Result<(), FrontEndError> {
    let mut exits = Vec::with_capacity(operands.len());
    for operand in operands {
        emit_expr(operand, method, constants)?;
        if stop_when_truthy {
            method.add_instruction(IRInstruction::Not);
        }
        exits.push(method.next_index());
        method.add_instruction(IRInstruction::JumpIfFalse(0));
    }

    // Every operand fell through: `and` is true, `or` is false
    method.add_instruction(IRInstruction::PushBool(!stop_when_truthy));
    let end_jump = method.next_index();
    method.add_instruction(IRInstruction::Jump(0));

    let short_circuit = method.next_index();
    for exit in exits {
        method.patch_jump(exit, short_circuit);
    }
    method.add_instruction(IRInstruction::PushBool(stop_when_truthy));

    let end = method.next_index();
    method.patch_jump(end_jump, end);
    Ok(())
}

fn operand_count(count: usize) -> Result<u16, FrontEndError> {
    u16::try_from(count).map_err(|_| FrontEndError::Internal("too many operands".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::parse_fragment;
    use crate::config::EvalOptions;
    use crate::fragment::{wrap, Bindings};
    use crate::frontend::slisp::{resolve, statements, SlispFrontEnd};

    fn compile(source: &str, bindings: &Bindings) -> TypeDef {
        let nodes = parse_fragment(source).unwrap();
        let options = EvalOptions::default().with_blocks(true);
        let unit = wrap(&SlispFrontEnd, nodes.as_slice(), bindings, &options).unwrap();
        let resolved = resolve::resolve_fragment(statements(unit.body), &unit.fields).unwrap();
        let artifact = generate(&unit, &resolved).unwrap();
        assert_eq!(artifact.name, unit.type_name);
        TypeDef::read(&artifact.bytes).unwrap()
    }

    fn decode_all(code: &[u8]) -> Vec<IRInstruction> {
        let mut offset = 0;
        let mut out = Vec::new();
        while offset < code.len() {
            let (instruction, len) = IRInstruction::decode(code, offset).unwrap();
            out.push(instruction);
            offset += len;
        }
        out
    }

    #[test]
    fn expression_returns_its_value() {
        let type_def = compile("(+ 1 2)", &Bindings::new());
        let run = type_def.method("run").unwrap();
        assert!(run.returns_value);
        assert_eq!(
            decode_all(&run.body),
            vec![IRInstruction::PushInt(1), IRInstruction::PushInt(2), IRInstruction::Add, IRInstruction::Return]
        );
    }

    #[test]
    fn constructor_initialises_fields() {
        let bindings = Bindings::new().with("name", "ada").with("n", 3);
        let type_def = compile("(str name n)", &bindings);
        assert_eq!(type_def.field_count, 2);
        assert_eq!(type_def.constants, vec!["ada".to_string()]);
        let init = type_def.method(CONSTRUCTOR).unwrap();
        assert_eq!(
            decode_all(&init.body),
            vec![
                IRInstruction::PushConst(0),
                IRInstruction::StoreField(0),
                IRInstruction::PushInt(3),
                IRInstruction::StoreField(1),
                IRInstruction::ReturnVoid,
            ]
        );
    }

    #[test]
    fn trailing_def_returns_void() {
        let type_def = compile("(def x 4)", &Bindings::new());
        let run = type_def.method("run").unwrap();
        assert!(!run.returns_value);
        assert_eq!(run.locals, 1);
        assert_eq!(decode_all(&run.body).last(), Some(&IRInstruction::ReturnVoid));
    }

    #[test]
    fn intermediate_values_are_popped() {
        let type_def = compile("1 2", &Bindings::new());
        let run = type_def.method("run").unwrap();
        assert_eq!(
            decode_all(&run.body),
            vec![IRInstruction::PushInt(1), IRInstruction::Pop, IRInstruction::PushInt(2), IRInstruction::Return]
        );
    }

    #[test]
    fn constants_are_deduplicated() {
        let type_def = compile("(str \"a\" \"b\" \"a\")", &Bindings::new());
        assert_eq!(type_def.constants, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn methods_record_their_stack_depth() {
        let type_def = compile("(+ 1 (* 2 (- 3 4)))", &Bindings::new().with("a", 1));
        assert_eq!(type_def.method(CONSTRUCTOR).unwrap().max_stack, 1);
        assert_eq!(type_def.method("run").unwrap().max_stack, 4);

        let wide = format!("(str {})", "1 ".repeat(2000));
        assert_eq!(compile(&wide, &Bindings::new()).method("run").unwrap().max_stack, 2000);
    }

    #[test]
    fn if_jumps_land_on_instruction_boundaries() {
        let type_def = compile("(if (< 1 2) 10 20)", &Bindings::new());
        let body = &type_def.method("run").unwrap().body;
        let instructions = decode_all(body);
        let boundaries: Vec<usize> = instructions
            .iter()
            .scan(0, |offset, instruction| {
                let start = *offset;
                *offset += instruction.encoded_len();
                Some(start)
            })
            .collect();
        for instruction in &instructions {
            if let IRInstruction::Jump(target) | IRInstruction::JumpIfFalse(target) = instruction {
                assert!(boundaries.contains(&(*target as usize)), "{:?}", instruction);
            }
        }
    }
}
