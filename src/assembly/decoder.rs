//! CIL bytecode decoding into flat instructions.
//!
//! Decoding is linear: instructions are read back to back from the start of the code stream
//! without following control flow. Branch operands stay relative; turning them into labels is
//! the lifter's job.

use crate::{
    assembly::{
        instruction::{Immediate, Instruction, Operand, OperandType},
        opcode::{OpCode, FE_PREFIX},
    },
    io::Parser,
    token::Token,
    Result,
};

/// Decodes a single CIL instruction from the current parser position.
///
/// # Errors
///
/// Returns [`crate::Error::InvalidOpcode`] for reserved or unknown opcodes and
/// [`crate::Error::OutOfBounds`] if the operand is truncated.
///
/// # Examples
///
/// ```rust
/// use ciltree::{assembly::{decode_instruction, Operand}, io::Parser};
///
/// let bytecode = [0x2D, 0xFE];
/// let mut parser = Parser::new(&bytecode);
///
/// let instruction = decode_instruction(&mut parser)?;
/// assert_eq!(instruction.opcode.mnemonic(), "brtrue.s");
/// assert_eq!(instruction.operand, Operand::Branch(-2));
/// assert_eq!(instruction.size, 2);
/// # Ok::<(), ciltree::Error>(())
/// ```
pub fn decode_instruction(parser: &mut Parser) -> Result<Instruction> {
    let start = parser.pos();
    let first_byte = parser.read_le::<u8>()?;

    let opcode = match first_byte {
        FE_PREFIX => OpCode::new(FE_PREFIX, parser.read_le::<u8>()?)?,
        _ => OpCode::new(0, first_byte)?,
    };

    let operand = match opcode.operand_type() {
        OperandType::None => Operand::None,
        OperandType::Int8 => Operand::Immediate(Immediate::Int8(parser.read_le::<i8>()?)),
        OperandType::UInt8 => Operand::Immediate(Immediate::UInt8(parser.read_le::<u8>()?)),
        OperandType::UInt16 => Operand::Immediate(Immediate::UInt16(parser.read_le::<u16>()?)),
        OperandType::Int32 => Operand::Immediate(Immediate::Int32(parser.read_le::<i32>()?)),
        OperandType::Int64 => Operand::Immediate(Immediate::Int64(parser.read_le::<i64>()?)),
        OperandType::Float32 => Operand::Immediate(Immediate::Float32(parser.read_le::<f32>()?)),
        OperandType::Float64 => Operand::Immediate(Immediate::Float64(parser.read_le::<f64>()?)),
        OperandType::Token => Operand::Token(Token::new(parser.read_le::<u32>()?)),
        OperandType::ShortBranch => Operand::Branch(i32::from(parser.read_le::<i8>()?)),
        OperandType::Branch => Operand::Branch(parser.read_le::<i32>()?),
        OperandType::Switch => {
            let case_count = parser.read_le::<u32>()? as usize;
            // Each target takes four bytes; reject counts the stream cannot hold before allocating
            if case_count > parser.remaining() / 4 {
                return Err(crate::Error::OutOfBounds);
            }

            let mut targets = Vec::with_capacity(case_count);
            for _ in 0..case_count {
                targets.push(parser.read_le::<i32>()?);
            }

            Operand::Switch(targets)
        }
    };

    let size = u32::try_from(parser.pos() - start)
        .map_err(|_| malformed_error!("Instruction at {} is too large", start))?;

    Ok(Instruction {
        opcode,
        operand,
        size,
    })
}

/// Decodes a complete code stream into instructions.
///
/// # Errors
///
/// Fails on the first invalid opcode or truncated operand; no partial result is returned.
pub fn decode_stream(code: &[u8]) -> Result<Vec<Instruction>> {
    let mut parser = Parser::new(code);
    let mut instructions = Vec::new();

    while parser.has_more_data() {
        instructions.push(decode_instruction(&mut parser)?);
    }

    Ok(instructions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn test_decode_instruction_basic() {
        let bytecode = [0x06];
        let mut parser = Parser::new(&bytecode);

        let instruction = decode_instruction(&mut parser).unwrap();
        assert_eq!(instruction.opcode.mnemonic(), "ldloc.0");
        assert_eq!(instruction.size, 1);
        assert_eq!(instruction.operand, Operand::None);
    }

    #[test]
    fn test_decode_instruction_two_byte() {
        let bytecode = [0xFE, 0x0C, 0x2C, 0x01];
        let mut parser = Parser::new(&bytecode);

        let instruction = decode_instruction(&mut parser).unwrap();
        assert_eq!(instruction.opcode.mnemonic(), "ldloc");
        assert_eq!(instruction.size, 4);
        assert_eq!(
            instruction.operand,
            Operand::Immediate(Immediate::UInt16(300))
        );
    }

    #[test]
    fn test_decode_instruction_branch() {
        let bytecode = [0x38, 0x00, 0x01, 0x00, 0x00];
        let mut parser = Parser::new(&bytecode);

        let instruction = decode_instruction(&mut parser).unwrap();
        assert_eq!(instruction.opcode, OpCode::BR);
        assert_eq!(instruction.operand, Operand::Branch(256));
        assert_eq!(instruction.size, 5);
    }

    #[test]
    fn test_decode_instruction_switch() {
        let bytecode = [
            0x45, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xFB, 0xFF, 0xFF, 0xFF,
        ];
        let mut parser = Parser::new(&bytecode);

        let instruction = decode_instruction(&mut parser).unwrap();
        assert_eq!(instruction.operand, Operand::Switch(vec![0, -5]));
        assert_eq!(instruction.size, 13);
    }

    #[test]
    fn test_decode_instruction_token() {
        let bytecode = [0x28, 0x01, 0x00, 0x00, 0x0A];
        let mut parser = Parser::new(&bytecode);

        let instruction = decode_instruction(&mut parser).unwrap();
        assert_eq!(instruction.opcode, OpCode::CALL);
        assert_eq!(instruction.operand, Operand::Token(Token::new(0x0A00_0001)));
    }

    #[test]
    fn test_decode_invalid_opcodes() {
        assert!(matches!(
            decode_stream(&[0x00, 0x24]),
            Err(Error::InvalidOpcode {
                prefix: 0,
                opcode: 0x24
            })
        ));
        assert!(matches!(
            decode_stream(&[0xFE, 0x1B]),
            Err(Error::InvalidOpcode {
                prefix: 0xFE,
                opcode: 0x1B
            })
        ));
    }

    #[test]
    fn test_decode_truncated() {
        assert!(matches!(decode_stream(&[0x20, 0x01]), Err(Error::OutOfBounds)));
        assert!(matches!(decode_stream(&[0xFE]), Err(Error::OutOfBounds)));
        // Switch claiming more targets than bytes available
        assert!(matches!(
            decode_stream(&[0x45, 0xFF, 0xFF, 0xFF, 0x0F]),
            Err(Error::OutOfBounds)
        ));
    }

    #[test]
    fn test_decode_stream_complex() {
        // ldarg.0; ldc.i4.s 10; bge.s +2; ldc.i4.1; ret; ldc.i4.0; ret
        let bytecode = [0x02, 0x1F, 0x0A, 0x2F, 0x02, 0x17, 0x2A, 0x16, 0x2A];
        let instructions = decode_stream(&bytecode).unwrap();

        let mnemonics: Vec<_> = instructions.iter().map(|i| i.opcode.mnemonic()).collect();
        assert_eq!(
            mnemonics,
            ["ldarg.0", "ldc.i4.s", "bge.s", "ldc.i4.1", "ret", "ldc.i4.0", "ret"]
        );
        let total: u32 = instructions.iter().map(|i| i.size).sum();
        assert_eq!(total as usize, bytecode.len());
    }

    #[test]
    fn test_decode_empty() {
        assert!(decode_stream(&[]).unwrap().is_empty());
    }
}
