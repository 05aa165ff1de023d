//! # ciltree Prelude
//!
//! Re-exports of the types most rewriting passes need. Import this module to lift, edit,
//! analyse and lower method bodies without spelling out the module paths.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all ciltree operations
pub use crate::Error;

/// The result type used throughout ciltree
pub use crate::Result;

/// Metadata token referenced by instruction operands and catch clauses
pub use crate::token::Token;

/// Switches for the lift / analyse / lower pipeline
pub use crate::config::PipelineConfig;

// ================================================================================================
// Flat Instructions and Method Bodies
// ================================================================================================

/// Opcodes, flat instructions and their operands
pub use crate::assembly::{FlowType, Immediate, Instruction, OpCode, Operand, OperandType};

/// Method body records and exception clauses
pub use crate::method::{ExceptionHandler, ExceptionHandlerFlags, HandlerKind, MethodBody};

// ================================================================================================
// Instruction Tree
// ================================================================================================

/// The instruction tree and its node types
pub use crate::tree::{
    BlockKind, BodyInfo, InstructionTree, Node, NodeId, NodeKind, TreeInstruction, TreeOperand,
};

// ================================================================================================
// Analysis and Pipeline
// ================================================================================================

/// Stack depth analysis and signature lookup
pub use crate::analysis::{CallSite, SignatureResolver, SignatureTable, StackAnalysis};

/// Single body and batch transformation
pub use crate::pipeline::{roundtrip_bytes, transform_batch, transform_body, BatchReport};
