//! CIL instruction encoding.
//!
//! The reverse of [`crate::assembly::decoder`]: flat instructions back into bytes. Branch
//! operands must already hold their final relative offsets, which is what the lowerer
//! produces.

use crate::{
    assembly::{
        instruction::{Immediate, Instruction, Operand, OperandType},
        opcode::FE_PREFIX,
    },
    io::push_le,
    Error, Result,
};

/// Appends the encoding of `instruction` to `out`.
///
/// # Errors
///
/// Returns [`crate::Error::UnsupportedOperand`] if the operand does not match the opcode, a
/// short branch offset does not fit a signed byte, or the recorded size disagrees with the
/// encoding.
pub fn encode_instruction(instruction: &Instruction, out: &mut Vec<u8>) -> Result<()> {
    let start = out.len();
    let opcode = instruction.opcode;

    if opcode.prefix() == FE_PREFIX {
        out.push(FE_PREFIX);
    }
    out.push(opcode.code());

    match (opcode.operand_type(), &instruction.operand) {
        (OperandType::None, Operand::None) => {}
        (OperandType::ShortBranch, Operand::Branch(offset)) => {
            let offset = i8::try_from(*offset).map_err(|_| {
                Error::UnsupportedOperand(format!("{opcode} offset {offset} does not fit a byte"))
            })?;
            push_le(out, offset);
        }
        (OperandType::Branch, Operand::Branch(offset)) => push_le(out, *offset),
        (OperandType::Token, Operand::Token(token)) => push_le(out, token.value()),
        (OperandType::Switch, Operand::Switch(targets)) => {
            let count = u32::try_from(targets.len())
                .map_err(|_| Error::UnsupportedOperand("Too many switch targets".to_string()))?;
            push_le(out, count);
            for target in targets {
                push_le(out, *target);
            }
        }
        (expected, Operand::Immediate(imm)) if imm.operand_type() == expected => match *imm {
            Immediate::Int8(value) => push_le(out, value),
            Immediate::UInt8(value) => push_le(out, value),
            Immediate::UInt16(value) => push_le(out, value),
            Immediate::Int32(value) => push_le(out, value),
            Immediate::Int64(value) => push_le(out, value),
            Immediate::Float32(value) => push_le(out, value),
            Immediate::Float64(value) => push_le(out, value),
        },
        (expected, operand) => {
            return Err(Error::UnsupportedOperand(format!(
                "{opcode} expects {expected:?}, got {operand:?}"
            )))
        }
    }

    let written = out.len() - start;
    if written != instruction.size as usize {
        return Err(Error::UnsupportedOperand(format!(
            "{opcode} encodes to {written} bytes but records {}",
            instruction.size
        )));
    }

    Ok(())
}

/// Encodes a complete instruction stream.
///
/// # Errors
///
/// Fails on the first instruction [`encode_instruction`] rejects.
pub fn encode_stream(instructions: &[Instruction]) -> Result<Vec<u8>> {
    let capacity = instructions.iter().map(|i| i.size as usize).sum();
    let mut out = Vec::with_capacity(capacity);

    for instruction in instructions {
        encode_instruction(instruction, &mut out)?;
    }

    Ok(out)
}
