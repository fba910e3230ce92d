use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    ops::{Deref, DerefMut},
};

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Constant,
    Add,
    Sub,
    Mul,
    Div,
    Pop,
    True,
    False,
    Equal,
    NotEqual,
    GreaterThan,
    Minus,
    Bang,
    JumpNotTruthy,
    Jump,
    Null,
    GetGlobal,
    SetGlobal,
    Array,
    Hash,
    Index,
    Call,
    ReturnValue,
    Return,
    GetLocal,
    SetLocal,
    GetBuiltin,
    Closure,
    GetFree,
    CurrentClosure,
}

#[derive(Debug, PartialEq)]
pub struct Definition {
    pub name: &'static str,
    pub operand_widths: &'static [usize],
}

impl Definition {
    const fn new(name: &'static str, operand_widths: &'static [usize]) -> Self {
        Self {
            name,
            operand_widths,
        }
    }

    /// Number of operand bytes following the opcode.
    pub fn width(&self) -> usize {
        self.operand_widths.iter().sum()
    }
}

// Indexed by opcode byte, so the order must follow the `Opcode` variants.
static DEFINITIONS: [Definition; 30] = [
    Definition::new("OpConstant", &[2]),
    Definition::new("OpAdd", &[]),
    Definition::new("OpSub", &[]),
    Definition::new("OpMul", &[]),
    Definition::new("OpDiv", &[]),
    Definition::new("OpPop", &[]),
    Definition::new("OpTrue", &[]),
    Definition::new("OpFalse", &[]),
    Definition::new("OpEqual", &[]),
    Definition::new("OpNotEqual", &[]),
    Definition::new("OpGreaterThan", &[]),
    Definition::new("OpMinus", &[]),
    Definition::new("OpBang", &[]),
    Definition::new("OpJumpNotTruthy", &[2]),
    Definition::new("OpJump", &[2]),
    Definition::new("OpNull", &[]),
    Definition::new("OpGetGlobal", &[2]),
    Definition::new("OpSetGlobal", &[2]),
    Definition::new("OpArray", &[2]),
    Definition::new("OpHash", &[2]),
    Definition::new("OpIndex", &[]),
    Definition::new("OpCall", &[1]),
    Definition::new("OpReturnValue", &[]),
    Definition::new("OpReturn", &[]),
    Definition::new("OpGetLocal", &[1]),
    Definition::new("OpSetLocal", &[1]),
    Definition::new("OpGetBuiltin", &[1]),
    Definition::new("OpClosure", &[2, 1]),
    Definition::new("OpGetFree", &[1]),
    Definition::new("OpCurrentClosure", &[]),
];

impl Opcode {
    pub fn from_byte(byte: u8) -> Option<Self> {
        let opcode = match byte {
            0 => Self::Constant,
            1 => Self::Add,
            2 => Self::Sub,
            3 => Self::Mul,
            4 => Self::Div,
            5 => Self::Pop,
            6 => Self::True,
            7 => Self::False,
            8 => Self::Equal,
            9 => Self::NotEqual,
            10 => Self::GreaterThan,
            11 => Self::Minus,
            12 => Self::Bang,
            13 => Self::JumpNotTruthy,
            14 => Self::Jump,
            15 => Self::Null,
            16 => Self::GetGlobal,
            17 => Self::SetGlobal,
            18 => Self::Array,
            19 => Self::Hash,
            20 => Self::Index,
            21 => Self::Call,
            22 => Self::ReturnValue,
            23 => Self::Return,
            24 => Self::GetLocal,
            25 => Self::SetLocal,
            26 => Self::GetBuiltin,
            27 => Self::Closure,
            28 => Self::GetFree,
            29 => Self::CurrentClosure,
            _ => return None,
        };
        Some(opcode)
    }

    pub fn definition(self) -> &'static Definition {
        &DEFINITIONS[self as usize]
    }
}

pub fn lookup(byte: u8) -> Option<&'static Definition> {
    DEFINITIONS.get(byte as usize)
}

/// Encodes an instruction from a raw opcode byte.
///
/// Undefined opcodes produce an empty sequence. Operands wider than their
/// declared width are truncated to the low-order bytes.
pub fn encode(opcode: u8, operands: &[usize]) -> Vec<u8> {
    let definition = match lookup(opcode) {
        Some(definition) => definition,
        None => return Vec::new(),
    };

    let mut instruction = Vec::with_capacity(1 + definition.width());
    instruction.push(opcode);
    for (operand, width) in operands.iter().zip(definition.operand_widths) {
        match width {
            2 => instruction.extend_from_slice(&(*operand as u16).to_be_bytes()),
            1 => instruction.push(*operand as u8),
            _ => {}
        }
    }
    instruction
}

pub fn make(opcode: Opcode, operands: &[usize]) -> Vec<u8> {
    encode(opcode as u8, operands)
}

pub fn read_u16(bytes: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([bytes[offset], bytes[offset + 1]])
}

pub fn read_u8(bytes: &[u8], offset: usize) -> u8 {
    bytes[offset]
}

/// Decodes the operands that follow an opcode, returning them with the number
/// of bytes consumed.
pub fn read_operands(definition: &Definition, bytes: &[u8]) -> (Vec<usize>, usize) {
    let mut operands = Vec::with_capacity(definition.operand_widths.len());
    let mut offset = 0;
    for width in definition.operand_widths {
        match width {
            2 => operands.push(read_u16(bytes, offset) as usize),
            1 => operands.push(read_u8(bytes, offset) as usize),
            _ => {}
        }
        offset += width;
    }
    (operands, offset)
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Instructions(pub Vec<u8>);

impl Instructions {
    pub fn concat(parts: Vec<Vec<u8>>) -> Self {
        Self(parts.concat())
    }
}

impl Deref for Instructions {
    type Target = Vec<u8>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for Instructions {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl From<Vec<u8>> for Instructions {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl Display for Instructions {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        let mut offset = 0;
        let mut lines = Vec::new();
        while offset < self.0.len() {
            let definition = match lookup(self.0[offset]) {
                Some(definition) => definition,
                None => {
                    lines.push(format!("{:0>4} ERROR: undefined opcode {}", offset, self.0[offset]));
                    offset += 1;
                    continue;
                }
            };
            let (operands, read) = read_operands(definition, &self.0[offset + 1..]);
            let line = match operands.len() {
                0 => definition.name.to_string(),
                _ => format!("{} {}", definition.name, crate::flatten(&operands, " ")),
            };
            lines.push(format!("{:0>4} {}", offset, line));
            offset += 1 + read;
        }
        write!(f, "{}", lines.join("\n"))
    }
}
