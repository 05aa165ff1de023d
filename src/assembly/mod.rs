//! CIL opcode metadata and the flat instruction codec.
//!
//! This module is the byte-level side of the crate. It knows every ECMA-335 opcode, its operand
//! type, its stack behaviour and its flow control class, and converts between raw code streams
//! and [`Instruction`] values whose branch operands are relative byte offsets.
//!
//! # Key Components
//!
//! - [`OpCode`] - A validated opcode with metadata lookup and branch form conversion
//! - [`Instruction`] / [`Operand`] - Flat instructions as stored in a method body
//! - [`decode_stream`] / [`decode_instruction`] - Bytes to instructions
//! - [`encode_stream`] / [`encode_instruction`] - Instructions to bytes
//! - [`INSTRUCTIONS`] / [`INSTRUCTIONS_FE`] - The static opcode tables
//!
//! # Examples
//!
//! ```rust
//! use ciltree::assembly::{decode_stream, encode_stream};
//!
//! // ldc.i4.1; brtrue.s +1; ldc.i4.2; ret
//! let code = [0x17, 0x2D, 0x01, 0x18, 0x2A];
//! let instructions = decode_stream(&code)?;
//! assert_eq!(instructions.len(), 4);
//! assert_eq!(encode_stream(&instructions)?, code);
//! # Ok::<(), ciltree::Error>(())
//! ```

mod decoder;
mod encoder;
mod instruction;
mod instructions;
mod opcode;

pub use decoder::{decode_instruction, decode_stream};
pub use encoder::{encode_instruction, encode_stream};
pub use instruction::{FlowType, Immediate, Instruction, Operand, OperandType};
pub use instructions::{CilInstruction, INSTRUCTIONS, INSTRUCTIONS_FE, VARIABLE};
pub use opcode::{OpCode, FE_PREFIX};
