/// Stack machine for loaded method bodies
///
/// A method runs over a fresh operand stack and fresh locals (all `nil`).
/// Instance fields are borrowed mutably so the constructor can fill them.
/// Every arithmetic operation is checked; a fault stops the method and is
/// reported instead of being raised as a host panic.
use super::Value;
use crate::ir::{DecodeError, IRInstruction};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VmFault {
    #[error("division by zero")]
    DivisionByZero,
    #[error("integer overflow in {0}")]
    Overflow(&'static str),
    #[error("{operation} expects a {expected}, found {found}")]
    TypeMismatch {
        operation: &'static str,
        expected: &'static str,
        found: &'static str,
    },
    #[error("operand stack exceeded {limit} entries")]
    StackOverflow { limit: usize },
    #[error("operand stack underflow at offset {offset}")]
    StackUnderflow { offset: usize },
    #[error("local slot {0} out of range")]
    InvalidLocal(u16),
    #[error("field {0} out of range")]
    InvalidField(u16),
    #[error("constant {0} out of range")]
    InvalidConst(u32),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("execution ran past the end of the method")]
    FellOffEnd,
}

/// Everything a method body needs to run
pub struct Frame<'a> {
    pub code: &'a [u8],
    pub constants: &'a [String],
    pub fields: &'a mut [Value],
    pub locals: usize,
}

/// Run a method body to its `Return` (`Some`) or `ReturnVoid` (`None`).
///
/// Printed text is appended to `output`.
pub fn execute(frame: Frame<'_>, max_stack: usize, output: &mut String) -> Result<Option<Value>, VmFault> {
    let Frame {
        code,
        constants,
        fields,
        locals,
    } = frame;
    let mut locals = vec![Value::Nil; locals];
    let mut stack = OperandStack::new(max_stack);
    let mut pc = 0;

    while pc < code.len() {
        let (instruction, len) = IRInstruction::decode(code, pc)?;
        let offset = pc;
        pc += len;

        match instruction {
            IRInstruction::PushInt(n) => stack.push(Value::Int(n))?,
            IRInstruction::PushBool(b) => stack.push(Value::Bool(b))?,
            IRInstruction::PushNil => stack.push(Value::Nil)?,
            IRInstruction::PushConst(index) => {
                let constant = constants.get(index as usize).ok_or(VmFault::InvalidConst(index))?;
                stack.push(Value::Str(constant.clone()))?;
            }
            IRInstruction::Pop => {
                stack.pop(offset)?;
            }

            IRInstruction::Add => arithmetic(&mut stack, offset, "+", i64::checked_add)?,
            IRInstruction::Sub => arithmetic(&mut stack, offset, "-", i64::checked_sub)?,
            IRInstruction::Mul => arithmetic(&mut stack, offset, "*", i64::checked_mul)?,
            IRInstruction::Div => {
                let (a, b) = stack.pop_int_pair(offset, "/")?;
                if b == 0 {
                    return Err(VmFault::DivisionByZero);
                }
                stack.push(Value::Int(a.checked_div(b).ok_or(VmFault::Overflow("/"))?))?;
            }
            IRInstruction::Rem => {
                let (a, b) = stack.pop_int_pair(offset, "mod")?;
                stack.push(Value::Int(floored_mod(a, b)?))?;
            }
            IRInstruction::Neg => {
                let n = expect_int(stack.pop(offset)?, "-")?;
                stack.push(Value::Int(n.checked_neg().ok_or(VmFault::Overflow("-"))?))?;
            }

            IRInstruction::Equal => {
                let b = stack.pop(offset)?;
                let a = stack.pop(offset)?;
                stack.push(Value::Bool(a == b))?;
            }
            IRInstruction::Less => comparison(&mut stack, offset, "<", |a, b| a < b)?,
            IRInstruction::Greater => comparison(&mut stack, offset, ">", |a, b| a > b)?,
            IRInstruction::LessEqual => comparison(&mut stack, offset, "<=", |a, b| a <= b)?,
            IRInstruction::GreaterEqual => comparison(&mut stack, offset, ">=", |a, b| a >= b)?,
            IRInstruction::Not => {
                let value = stack.pop(offset)?;
                stack.push(Value::Bool(!value.is_truthy()))?;
            }

            IRInstruction::JumpIfFalse(target) => {
                if !stack.pop(offset)?.is_truthy() {
                    pc = target as usize;
                }
            }
            IRInstruction::Jump(target) => pc = target as usize,

            IRInstruction::StoreLocal(slot) => {
                let value = stack.pop(offset)?;
                *locals.get_mut(slot as usize).ok_or(VmFault::InvalidLocal(slot))? = value;
            }
            IRInstruction::LoadLocal(slot) => {
                let value = locals.get(slot as usize).ok_or(VmFault::InvalidLocal(slot))?.clone();
                stack.push(value)?;
            }
            IRInstruction::StoreField(index) => {
                let value = stack.pop(offset)?;
                *fields.get_mut(index as usize).ok_or(VmFault::InvalidField(index))? = value;
            }
            IRInstruction::LoadField(index) => {
                let value = fields.get(index as usize).ok_or(VmFault::InvalidField(index))?.clone();
                stack.push(value)?;
            }

            IRInstruction::Concat(count) => {
                let parts = stack.pop_n(count as usize, offset)?;
                let joined: String = parts.iter().map(Value::to_display_string).collect();
                stack.push(Value::Str(joined))?;
            }
            IRInstruction::Count => {
                let value = stack.pop(offset)?;
                let Value::Str(s) = &value else {
                    return Err(mismatch("count", "string", &value));
                };
                stack.push(Value::Int(s.chars().count() as i64))?;
            }
            IRInstruction::Print { newline } => {
                output.push_str(&stack.pop(offset)?.to_display_string());
                if newline {
                    output.push('\n');
                }
            }

            IRInstruction::Return => return Ok(Some(stack.pop(offset)?)),
            IRInstruction::ReturnVoid => return Ok(None),
        }
    }

    Err(VmFault::FellOffEnd)
}

struct OperandStack {
    values: Vec<Value>,
    limit: usize,
}

impl OperandStack {
    fn new(limit: usize) -> Self {
        Self {
            values: Vec::new(),
            limit,
        }
    }

    fn push(&mut self, value: Value) -> Result<(), VmFault> {
        if self.values.len() >= self.limit {
            return Err(VmFault::StackOverflow { limit: self.limit });
        }
        self.values.push(value);
        Ok(())
    }

    fn pop(&mut self, offset: usize) -> Result<Value, VmFault> {
        self.values.pop().ok_or(VmFault::StackUnderflow { offset })
    }

    /// Pop `count` values, returned in push order
    fn pop_n(&mut self, count: usize, offset: usize) -> Result<Vec<Value>, VmFault> {
        let start = self.values.len().checked_sub(count).ok_or(VmFault::StackUnderflow { offset })?;
        Ok(self.values.split_off(start))
    }

    /// Pop two integers; the first is the deeper one
    fn pop_int_pair(&mut self, offset: usize, operation: &'static str) -> Result<(i64, i64), VmFault> {
        let b = expect_int(self.pop(offset)?, operation)?;
        let a = expect_int(self.pop(offset)?, operation)?;
        Ok((a, b))
    }
}

fn mismatch(operation: &'static str, expected: &'static str, found: &Value) -> VmFault {
    VmFault::TypeMismatch {
        operation,
        expected,
        found: found.type_name(),
    }
}

fn expect_int(value: Value, operation: &'static str) -> Result<i64, VmFault> {
    match value {
        Value::Int(n) => Ok(n),
        other => Err(mismatch(operation, "number", &other)),
    }
}

fn arithmetic(stack: &mut OperandStack, offset: usize, operation: &'static str, op: fn(i64, i64) -> Option<i64>) -> Result<(), VmFault> {
    let (a, b) = stack.pop_int_pair(offset, operation)?;
    let result = op(a, b).ok_or(VmFault::Overflow(operation))?;
    stack.push(Value::Int(result))
}

fn comparison(stack: &mut OperandStack, offset: usize, operation: &'static str, op: fn(i64, i64) -> bool) -> Result<(), VmFault> {
    let (a, b) = stack.pop_int_pair(offset, operation)?;
    stack.push(Value::Bool(op(a, b)))
}

/// Remainder taking the sign of the divisor
fn floored_mod(a: i64, b: i64) -> Result<i64, VmFault> {
    if b == 0 {
        return Err(VmFault::DivisionByZero);
    }
    let r = a.checked_rem(b).ok_or(VmFault::Overflow("mod"))?;
    if r != 0 && (r < 0) != (b < 0) {
        Ok(r + b)
    } else {
        Ok(r)
    }
}
