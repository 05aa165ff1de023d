//! Program analysis over instruction trees.
//!
//! # Architecture
//!
//! - [`stack`] - Evaluation stack depth analysis, producing the `max_stack` header value and
//!   the entry stack height of every instruction
//! - [`resolver`] - The [`SignatureResolver`] interface supplying call-site arities, plus a
//!   map-backed implementation
//!
//! # Usage
//!
//! ```rust
//! use ciltree::analysis::{SignatureTable, StackAnalysis};
//! use ciltree::{method::MethodBody, tree::InstructionTree};
//!
//! // ldc.i4.1; brtrue.s +1; ldc.i4.2; ret
//! let body = MethodBody::parse(&[0x16, 0x17, 0x2D, 0x01, 0x18, 0x2A])?;
//! let mut tree = InstructionTree::lift(&body)?;
//!
//! let analysis = StackAnalysis::compute(&tree, &SignatureTable::new(true))?;
//! assert_eq!(analysis.max_stack, 1);
//!
//! analysis.apply(&mut tree, false);
//! assert_eq!(tree.lower()?.max_stack, 1);
//! # Ok::<(), ciltree::Error>(())
//! ```

pub mod resolver;
pub mod stack;

pub use resolver::{CallSite, SignatureResolver, SignatureTable};
pub use stack::StackAnalysis;
