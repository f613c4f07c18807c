use std::collections::HashMap;
use thiserror::Error;

/// Stack bytecode executed by the runtime.
///
/// Jump targets are byte offsets into the owning method body. Operand
/// order for binary operations: the second operand is on top of the stack.
#[derive(Debug, Clone, PartialEq)]
pub enum IRInstruction {
    // Stack operations
    PushInt(i64),    // Push immediate integer
    PushBool(bool),  // Push immediate boolean
    PushNil,         // Push nil
    PushConst(u32),  // Push string from the constant pool
    Pop,             // Discard top of stack

    // Arithmetic operations
    Add, // Pop two values, push sum
    Sub, // Pop two values, push difference (second - first)
    Mul, // Pop two values, push product
    Div, // Pop two values, push quotient (second / first)
    Rem, // Pop two values, push remainder (second mod first)
    Neg, // Pop one value, push its negation

    // Comparison operations
    Equal,        // Pop two values, push true if equal
    Less,         // Pop two values, push true if second < first
    Greater,      // Pop two values, push true if second > first
    LessEqual,    // Pop two values, push true if second <= first
    GreaterEqual, // Pop two values, push true if second >= first

    // Logical operations
    Not, // Pop one value, push its logical negation

    // Control flow
    JumpIfFalse(u32), // Pop; jump to byte offset if the value is falsey
    Jump(u32),        // Unconditional jump to byte offset

    // Variable operations
    StoreLocal(u16), // Pop value and store in local variable slot
    LoadLocal(u16),  // Push value from local variable slot
    StoreField(u16), // Pop value and store in instance field
    LoadField(u16),  // Push value from instance field

    // Runtime support
    Concat(u16),             // Pop N values, push their printed forms concatenated
    Count,                   // Pop a string, push its length in characters
    Print { newline: bool }, // Pop a value and write its printed form to the output

    // Method exit
    Return,     // Return top of stack
    ReturnVoid, // Return without a value
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unknown opcode {opcode:#04x} at offset {offset}")]
    UnknownOpcode { opcode: u8, offset: usize },
    #[error("truncated instruction at offset {offset}")]
    Truncated { offset: usize },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StackError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("operand stack underflow at offset {offset}")]
    Underflow { offset: usize },
    #[error("operand stack holds {expected} entries at offset {offset} on one path and {found} on another")]
    Inconsistent { offset: usize, expected: usize, found: usize },
    #[error("execution runs past the end of the method")]
    FallsOffEnd,
}

mod opcode {
    pub const PUSH_INT: u8 = 0x01;
    pub const PUSH_BOOL: u8 = 0x02;
    pub const PUSH_NIL: u8 = 0x03;
    pub const PUSH_CONST: u8 = 0x04;
    pub const POP: u8 = 0x05;
    pub const ADD: u8 = 0x10;
    pub const SUB: u8 = 0x11;
    pub const MUL: u8 = 0x12;
    pub const DIV: u8 = 0x13;
    pub const REM: u8 = 0x14;
    pub const NEG: u8 = 0x15;
    pub const EQUAL: u8 = 0x20;
    pub const LESS: u8 = 0x21;
    pub const GREATER: u8 = 0x22;
    pub const LESS_EQUAL: u8 = 0x23;
    pub const GREATER_EQUAL: u8 = 0x24;
    pub const NOT: u8 = 0x25;
    pub const JUMP_IF_FALSE: u8 = 0x30;
    pub const JUMP: u8 = 0x31;
    pub const STORE_LOCAL: u8 = 0x40;
    pub const LOAD_LOCAL: u8 = 0x41;
    pub const STORE_FIELD: u8 = 0x42;
    pub const LOAD_FIELD: u8 = 0x43;
    pub const CONCAT: u8 = 0x50;
    pub const COUNT: u8 = 0x51;
    pub const PRINT: u8 = 0x52;
    pub const PRINTLN: u8 = 0x53;
    pub const RETURN: u8 = 0x60;
    pub const RETURN_VOID: u8 = 0x61;
}

impl IRInstruction {
    /// Encoded size in bytes
    pub fn encoded_len(&self) -> usize {
        match self {
            IRInstruction::PushInt(_) => 9,
            IRInstruction::PushBool(_) => 2,
            IRInstruction::PushConst(_) | IRInstruction::JumpIfFalse(_) | IRInstruction::Jump(_) => 5,
            IRInstruction::StoreLocal(_)
            | IRInstruction::LoadLocal(_)
            | IRInstruction::StoreField(_)
            | IRInstruction::LoadField(_)
            | IRInstruction::Concat(_) => 3,
            _ => 1,
        }
    }

    /// Number of operands popped and pushed
    pub fn stack_effect(&self) -> (usize, usize) {
        match self {
            IRInstruction::PushInt(_) | IRInstruction::PushBool(_) | IRInstruction::PushNil | IRInstruction::PushConst(_) => (0, 1),
            IRInstruction::LoadLocal(_) | IRInstruction::LoadField(_) => (0, 1),
            IRInstruction::Add
            | IRInstruction::Sub
            | IRInstruction::Mul
            | IRInstruction::Div
            | IRInstruction::Rem
            | IRInstruction::Equal
            | IRInstruction::Less
            | IRInstruction::Greater
            | IRInstruction::LessEqual
            | IRInstruction::GreaterEqual => (2, 1),
            IRInstruction::Neg | IRInstruction::Not | IRInstruction::Count => (1, 1),
            IRInstruction::Pop
            | IRInstruction::JumpIfFalse(_)
            | IRInstruction::StoreLocal(_)
            | IRInstruction::StoreField(_)
            | IRInstruction::Print { .. }
            | IRInstruction::Return => (1, 0),
            IRInstruction::Jump(_) | IRInstruction::ReturnVoid => (0, 0),
            IRInstruction::Concat(count) => (*count as usize, 1),
        }
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        use opcode::*;
        match self {
            IRInstruction::PushInt(value) => {
                out.push(PUSH_INT);
                out.extend_from_slice(&value.to_le_bytes());
            }
            IRInstruction::PushBool(value) => {
                out.push(PUSH_BOOL);
                out.push(*value as u8);
            }
            IRInstruction::PushNil => out.push(PUSH_NIL),
            IRInstruction::PushConst(index) => {
                out.push(PUSH_CONST);
                out.extend_from_slice(&index.to_le_bytes());
            }
            IRInstruction::Pop => out.push(POP),
            IRInstruction::Add => out.push(ADD),
            IRInstruction::Sub => out.push(SUB),
            IRInstruction::Mul => out.push(MUL),
            IRInstruction::Div => out.push(DIV),
            IRInstruction::Rem => out.push(REM),
            IRInstruction::Neg => out.push(NEG),
            IRInstruction::Equal => out.push(EQUAL),
            IRInstruction::Less => out.push(LESS),
            IRInstruction::Greater => out.push(GREATER),
            IRInstruction::LessEqual => out.push(LESS_EQUAL),
            IRInstruction::GreaterEqual => out.push(GREATER_EQUAL),
            IRInstruction::Not => out.push(NOT),
            IRInstruction::JumpIfFalse(target) => {
                out.push(JUMP_IF_FALSE);
                out.extend_from_slice(&target.to_le_bytes());
            }
            IRInstruction::Jump(target) => {
                out.push(JUMP);
                out.extend_from_slice(&target.to_le_bytes());
            }
            IRInstruction::StoreLocal(slot) => {
                out.push(STORE_LOCAL);
                out.extend_from_slice(&slot.to_le_bytes());
            }
            IRInstruction::LoadLocal(slot) => {
                out.push(LOAD_LOCAL);
                out.extend_from_slice(&slot.to_le_bytes());
            }
            IRInstruction::StoreField(slot) => {
                out.push(STORE_FIELD);
                out.extend_from_slice(&slot.to_le_bytes());
            }
            IRInstruction::LoadField(slot) => {
                out.push(LOAD_FIELD);
                out.extend_from_slice(&slot.to_le_bytes());
            }
            IRInstruction::Concat(count) => {
                out.push(CONCAT);
                out.extend_from_slice(&count.to_le_bytes());
            }
            IRInstruction::Count => out.push(COUNT),
            IRInstruction::Print { newline: false } => out.push(PRINT),
            IRInstruction::Print { newline: true } => out.push(PRINTLN),
            IRInstruction::Return => out.push(RETURN),
            IRInstruction::ReturnVoid => out.push(RETURN_VOID),
        }
    }

    /// Decode the instruction starting at `offset`, returning it with its size.
    pub fn decode(code: &[u8], offset: usize) -> Result<(IRInstruction, usize), DecodeError> {
        use opcode::*;
        let opcode = *code.get(offset).ok_or(DecodeError::Truncated { offset })?;
        let u16_operand = || -> Result<u16, DecodeError> {
            let bytes = operand(code, offset, 2)?;
            Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
        };
        let u32_operand = || -> Result<u32, DecodeError> {
            let bytes = operand(code, offset, 4)?;
            Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
        };

        let instruction = match opcode {
            PUSH_INT => {
                let bytes = operand(code, offset, 8)?;
                let mut raw = [0u8; 8];
                raw.copy_from_slice(bytes);
                IRInstruction::PushInt(i64::from_le_bytes(raw))
            }
            PUSH_BOOL => match operand(code, offset, 1)?[0] {
                0 => IRInstruction::PushBool(false),
                1 => IRInstruction::PushBool(true),
                other => return Err(DecodeError::UnknownOpcode { opcode: other, offset: offset + 1 }),
            },
            PUSH_NIL => IRInstruction::PushNil,
            PUSH_CONST => IRInstruction::PushConst(u32_operand()?),
            POP => IRInstruction::Pop,
            ADD => IRInstruction::Add,
            SUB => IRInstruction::Sub,
            MUL => IRInstruction::Mul,
            DIV => IRInstruction::Div,
            REM => IRInstruction::Rem,
            NEG => IRInstruction::Neg,
            EQUAL => IRInstruction::Equal,
            LESS => IRInstruction::Less,
            GREATER => IRInstruction::Greater,
            LESS_EQUAL => IRInstruction::LessEqual,
            GREATER_EQUAL => IRInstruction::GreaterEqual,
            NOT => IRInstruction::Not,
            JUMP_IF_FALSE => IRInstruction::JumpIfFalse(u32_operand()?),
            JUMP => IRInstruction::Jump(u32_operand()?),
            STORE_LOCAL => IRInstruction::StoreLocal(u16_operand()?),
            LOAD_LOCAL => IRInstruction::LoadLocal(u16_operand()?),
            STORE_FIELD => IRInstruction::StoreField(u16_operand()?),
            LOAD_FIELD => IRInstruction::LoadField(u16_operand()?),
            CONCAT => IRInstruction::Concat(u16_operand()?),
            COUNT => IRInstruction::Count,
            PRINT => IRInstruction::Print { newline: false },
            PRINTLN => IRInstruction::Print { newline: true },
            RETURN => IRInstruction::Return,
            RETURN_VOID => IRInstruction::ReturnVoid,
            opcode => return Err(DecodeError::UnknownOpcode { opcode, offset }),
        };

        let len = instruction.encoded_len();
        Ok((instruction, len))
    }
}

fn operand(code: &[u8], offset: usize, len: usize) -> Result<&[u8], DecodeError> {
    code.get(offset + 1..offset + 1 + len).ok_or(DecodeError::Truncated { offset })
}

/// Largest operand stack a method body can reach on any path.
///
/// Follows both edges of every branch. Each instruction must be reached
/// with the same stack height on every path, and no path may pop an empty
/// stack or run past the last instruction.
pub fn max_stack_depth(code: &[u8]) -> Result<usize, StackError> {
    let mut heights: HashMap<usize, usize> = HashMap::new();
    let mut pending = vec![(0usize, 0usize)];
    let mut max = 0;

    while let Some((offset, height)) = pending.pop() {
        if offset >= code.len() {
            return Err(StackError::FallsOffEnd);
        }
        match heights.get(&offset) {
            Some(&expected) if expected == height => continue,
            Some(&expected) => return Err(StackError::Inconsistent { offset, expected, found: height }),
            None => {
                heights.insert(offset, height);
            }
        }

        let (instruction, len) = IRInstruction::decode(code, offset)?;
        let (pops, pushes) = instruction.stack_effect();
        let after = height.checked_sub(pops).ok_or(StackError::Underflow { offset })? + pushes;
        max = max.max(after);

        match instruction {
            IRInstruction::Return | IRInstruction::ReturnVoid => {}
            IRInstruction::Jump(target) => pending.push((target as usize, after)),
            IRInstruction::JumpIfFalse(target) => {
                pending.push((target as usize, after));
                pending.push((offset + len, after));
            }
            _ => pending.push((offset + len, after)),
        }
    }
    Ok(max)
}

/// A method body under construction.
///
/// Instructions are buffered so that forward jumps can be patched before
/// the body is encoded; `byte_offset` maps an instruction index to the
/// byte offset it will have once encoded.
#[derive(Debug, Clone, Default)]
pub struct MethodBody {
    pub instructions: Vec<IRInstruction>,
}

impl MethodBody {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_instruction(&mut self, instruction: IRInstruction) {
        self.instructions.push(instruction);
    }

    pub fn extend(&mut self, instructions: impl IntoIterator<Item = IRInstruction>) {
        self.instructions.extend(instructions);
    }

    /// Index the next added instruction will get
    pub fn next_index(&self) -> usize {
        self.instructions.len()
    }

    /// Replace the jump at `index` so it targets instruction `target`.
    pub fn patch_jump(&mut self, index: usize, target: usize) {
        let target = self.byte_offset(target) as u32;
        match &mut self.instructions[index] {
            IRInstruction::Jump(t) | IRInstruction::JumpIfFalse(t) => *t = target,
            other => debug_assert!(false, "patching non-jump instruction {:?}", other),
        }
    }

    pub fn byte_offset(&self, index: usize) -> usize {
        self.instructions[..index].iter().map(IRInstruction::encoded_len).sum()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.byte_offset(self.instructions.len()));
        for instruction in &self.instructions {
            instruction.encode(&mut out);
        }
        out
    }
}
