//! Flat instruction representation.
//!
//! These types describe an instruction the way it is encoded in a method body: an opcode, an
//! operand in its raw shape (branch targets are *relative byte offsets*, not labels) and the
//! number of bytes the instruction occupies. The tree model replaces raw branch operands with
//! labels; everything else is carried through unchanged.

use std::fmt::{self, UpperHex};

use crate::{assembly::OpCode, token::Token, Error, Result};

/// Types of operands that CIL instructions can have.
///
/// Every opcode has exactly one operand type, fixed by ECMA-335 Partition III. The two branch
/// operand types are distinguished so that encoded sizes can be computed from the opcode alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandType {
    /// No operand present
    None,
    /// Signed 8-bit integer (`ldc.i4.s`)
    Int8,
    /// Unsigned 8-bit integer (short-form argument/local indices, `unaligned.`, `no.`)
    UInt8,
    /// Unsigned 16-bit integer (long-form argument/local indices)
    UInt16,
    /// Signed 32-bit integer (`ldc.i4`)
    Int32,
    /// Signed 64-bit integer (`ldc.i8`)
    Int64,
    /// 32-bit floating point (`ldc.r4`)
    Float32,
    /// 64-bit floating point (`ldc.r8`)
    Float64,
    /// Metadata token reference
    Token,
    /// Signed 8-bit relative branch offset
    ShortBranch,
    /// Signed 32-bit relative branch offset
    Branch,
    /// Switch table operand: a 4-byte count followed by 4-byte relative offsets
    Switch,
}

impl OperandType {
    /// Returns the size in bytes of this operand type.
    ///
    /// Returns `None` for `Switch`, whose size depends on its number of targets.
    #[must_use]
    pub fn size(&self) -> Option<u32> {
        match self {
            OperandType::None => Some(0),
            OperandType::Int8 | OperandType::UInt8 | OperandType::ShortBranch => Some(1),
            OperandType::UInt16 => Some(2),
            OperandType::Int32
            | OperandType::Float32
            | OperandType::Token
            | OperandType::Branch => Some(4),
            OperandType::Int64 | OperandType::Float64 => Some(8),
            OperandType::Switch => None,
        }
    }
}

/// Immediate operand values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Immediate {
    /// Signed 8-bit immediate value
    Int8(i8),
    /// Unsigned 8-bit immediate value
    UInt8(u8),
    /// Unsigned 16-bit immediate value
    UInt16(u16),
    /// Signed 32-bit immediate value
    Int32(i32),
    /// Signed 64-bit immediate value
    Int64(i64),
    /// 32-bit floating point immediate value
    Float32(f32),
    /// 64-bit floating point immediate value
    Float64(f64),
}

impl Immediate {
    /// The operand type this immediate encodes as.
    #[must_use]
    pub fn operand_type(&self) -> OperandType {
        match self {
            Immediate::Int8(_) => OperandType::Int8,
            Immediate::UInt8(_) => OperandType::UInt8,
            Immediate::UInt16(_) => OperandType::UInt16,
            Immediate::Int32(_) => OperandType::Int32,
            Immediate::Int64(_) => OperandType::Int64,
            Immediate::Float32(_) => OperandType::Float32,
            Immediate::Float64(_) => OperandType::Float64,
        }
    }
}

impl UpperHex for Immediate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Immediate::Int8(value) => write!(f, "{value:02X}"),
            Immediate::UInt8(value) => write!(f, "{value:02X}"),
            Immediate::UInt16(value) => write!(f, "{value:04X}"),
            Immediate::Int32(value) => write!(f, "{value:08X}"),
            Immediate::Int64(value) => write!(f, "{value:016X}"),
            Immediate::Float32(value) => write!(f, "{:08X}", value.to_bits()),
            Immediate::Float64(value) => write!(f, "{:016X}", value.to_bits()),
        }
    }
}

impl fmt::Display for Immediate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Immediate::Int8(value) => write!(f, "{value}"),
            Immediate::UInt8(value) => write!(f, "{value}"),
            Immediate::UInt16(value) => write!(f, "{value}"),
            Immediate::Int32(value) => write!(f, "{value}"),
            Immediate::Int64(value) => write!(f, "{value}"),
            Immediate::Float32(value) => write!(f, "{value}"),
            Immediate::Float64(value) => write!(f, "{value}"),
        }
    }
}

/// A raw operand as stored in the flat instruction stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// No operand present
    None,
    /// Immediate value (constant embedded in instruction)
    Immediate(Immediate),
    /// Metadata token reference
    Token(Token),
    /// Branch offset relative to the end of the instruction
    Branch(i32),
    /// Switch offsets, each relative to the end of the switch instruction
    Switch(Vec<i32>),
}

impl Operand {
    /// Returns true if this operand is compatible with the given operand type.
    #[must_use]
    pub fn fits(&self, op_type: OperandType) -> bool {
        match (self, op_type) {
            (Operand::None, OperandType::None)
            | (Operand::Token(_), OperandType::Token)
            | (Operand::Branch(_), OperandType::ShortBranch | OperandType::Branch)
            | (Operand::Switch(_), OperandType::Switch) => true,
            (Operand::Immediate(imm), expected) => imm.operand_type() == expected,
            _ => false,
        }
    }
}

/// Flow control behaviour of an opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowType {
    /// Normal execution continues to next instruction
    Sequential,
    /// Conditional branch to another location
    ConditionalBranch,
    /// Always branches to another location (unconditional jump)
    UnconditionalBranch,
    /// Call to another method
    Call,
    /// Returns from current method (`ret`, `jmp`)
    Return,
    /// Multi-way branch (switch statement)
    Switch,
    /// Exception throwing (`throw`, `rethrow`)
    Throw,
    /// End of finally or fault block
    EndFinally,
    /// End of filter block
    EndFilter,
    /// Leave protected region (try/catch/finally)
    Leave,
    /// Instruction prefix (`volatile.`, `tail.`, ...)
    Prefix,
}

impl FlowType {
    /// Returns true if control never falls through to the physically next instruction.
    #[must_use]
    pub fn ends_block(&self) -> bool {
        matches!(
            self,
            FlowType::UnconditionalBranch
                | FlowType::Return
                | FlowType::Throw
                | FlowType::EndFinally
                | FlowType::EndFilter
                | FlowType::Leave
        )
    }
}

/// A decoded instruction in flat form.
///
/// # Examples
///
/// ```rust
/// use ciltree::assembly::{Instruction, OpCode, Operand};
///
/// let branch = Instruction::new(OpCode::from_mnemonic("brtrue.s")?, Operand::Branch(1))?;
/// assert_eq!(branch.size, 2);
///
/// let switch = Instruction::new(OpCode::SWITCH, Operand::Switch(vec![0, 4, 8]))?;
/// assert_eq!(switch.size, 1 + 4 + 3 * 4);
/// # Ok::<(), ciltree::Error>(())
/// ```
#[derive(Clone, PartialEq)]
pub struct Instruction {
    /// The opcode
    pub opcode: OpCode,
    /// The raw operand
    pub operand: Operand,
    /// Encoded size in bytes, opcode included
    pub size: u32,
}

impl Instruction {
    /// Creates an instruction, validating the operand against the opcode and computing its
    /// encoded size.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::UnsupportedOperand`] if the operand shape does not match the
    /// opcode's operand type.
    pub fn new(opcode: OpCode, operand: Operand) -> Result<Self> {
        let size = Self::encoded_size(opcode, &operand)?;
        Ok(Instruction {
            opcode,
            operand,
            size,
        })
    }

    /// Creates an instruction without operand.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::UnsupportedOperand`] if the opcode expects an operand.
    pub fn simple(opcode: OpCode) -> Result<Self> {
        Self::new(opcode, Operand::None)
    }

    /// Computes the encoded size of `opcode` carrying `operand`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::UnsupportedOperand`] if the operand shape does not match the
    /// opcode's operand type, or a switch has more targets than the encoding allows.
    pub fn encoded_size(opcode: OpCode, operand: &Operand) -> Result<u32> {
        let op_type = opcode.operand_type();
        if !operand.fits(op_type) {
            return Err(Error::UnsupportedOperand(format!(
                "{opcode} expects {op_type:?}, got {operand:?}"
            )));
        }

        let operand_size = match (op_type.size(), operand) {
            (Some(size), _) => size,
            (None, Operand::Switch(targets)) => u32::try_from(targets.len())
                .ok()
                .and_then(|count| count.checked_mul(4))
                .and_then(|bytes| bytes.checked_add(4))
                .ok_or_else(|| {
                    Error::UnsupportedOperand(format!("switch with {} targets", targets.len()))
                })?,
            (None, _) => {
                return Err(Error::UnsupportedOperand(format!(
                    "{opcode} has no fixed operand size"
                )))
            }
        };

        Ok(opcode.size() + operand_size)
    }

    /// Returns the relative branch offset, if this is a branch instruction.
    #[must_use]
    pub fn branch_offset(&self) -> Option<i32> {
        match self.operand {
            Operand::Branch(offset) => Some(offset),
            _ => None,
        }
    }
}

impl fmt::Debug for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.opcode.mnemonic())?;
        match &self.operand {
            Operand::None => {}
            Operand::Immediate(imm) => write!(f, " {imm}")?,
            Operand::Token(token) => write!(f, " {token}")?,
            Operand::Branch(offset) => write!(f, " {offset:+}")?,
            Operand::Switch(offsets) => {
                write!(f, " (")?;
                for (i, offset) in offsets.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{offset:+}")?;
                }
                write!(f, ")")?;
            }
        }
        write!(f, " [{} bytes]", self.size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sizes() {
        let nop = Instruction::simple(OpCode::NOP).unwrap();
        assert_eq!(nop.size, 1);

        let ldc = Instruction::new(
            OpCode::from_mnemonic("ldc.i8").unwrap(),
            Operand::Immediate(Immediate::Int64(-1)),
        )
        .unwrap();
        assert_eq!(ldc.size, 9);

        let ceq = Instruction::simple(OpCode::from_mnemonic("ceq").unwrap()).unwrap();
        assert_eq!(ceq.size, 2);

        let ldloc = Instruction::new(
            OpCode::from_mnemonic("ldloc").unwrap(),
            Operand::Immediate(Immediate::UInt16(300)),
        )
        .unwrap();
        assert_eq!(ldloc.size, 4);

        let br = Instruction::new(OpCode::BR, Operand::Branch(-200)).unwrap();
        assert_eq!(br.size, 5);

        let empty_switch = Instruction::new(OpCode::SWITCH, Operand::Switch(vec![])).unwrap();
        assert_eq!(empty_switch.size, 5);
    }

    #[test]
    fn test_mismatched_operand() {
        assert!(matches!(
            Instruction::new(OpCode::NOP, Operand::Branch(0)),
            Err(Error::UnsupportedOperand(_))
        ));
        assert!(Instruction::new(
            OpCode::from_mnemonic("ldc.i4.s").unwrap(),
            Operand::Immediate(Immediate::Int32(1))
        )
        .is_err());
        assert!(Instruction::simple(OpCode::RET).is_ok());
        assert!(Instruction::simple(OpCode::SWITCH).is_err());
    }

    #[test]
    fn test_debug_format() {
        let br = Instruction::new(OpCode::BR_S, Operand::Branch(-3)).unwrap();
        assert_eq!(format!("{br:?}"), "br.s -3 [2 bytes]");

        let switch = Instruction::new(OpCode::SWITCH, Operand::Switch(vec![0, 5])).unwrap();
        assert_eq!(format!("{switch:?}"), "switch (+0, +5) [13 bytes]");
    }

    #[test]
    fn test_immediate_hex() {
        assert_eq!(format!("{:X}", Immediate::Int8(-1)), "FF");
        assert_eq!(format!("{:X}", Immediate::UInt16(0x1234)), "1234");
        assert_eq!(format!("{:X}", Immediate::Float32(1.0)), "3F800000");
    }
}
