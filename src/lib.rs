// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![allow(clippy::too_many_arguments)]

//! # ciltree
//!
//! Structured rewriting of CIL method bodies.
//!
//! `ciltree` turns the flat instruction stream of a .NET method body into an ordered
//! instruction tree, where protected regions, handlers and filters are nested blocks and
//! branch targets are label nodes instead of byte offsets. Rewriting passes insert, move and
//! delete nodes freely; lowering the tree produces a flat body again, choosing the smallest
//! legal branch encodings and rebuilding the exception clause table.
//!
//! ## Features
//!
//! - **🌳 Instruction trees** - Arena-backed ordered tree with cheap O(1) relinking
//! - **🏷️ Offset-free branches** - Labels owned by branch instructions survive any edit
//! - **📐 Branch relaxation** - Short forms wherever the distance allows, long forms elsewhere
//! - **📊 Stack depth analysis** - Computes `max_stack` and per-instruction entry heights
//! - **⚡ Batch processing** - Transform many bodies in parallel, faults stay per body
//!
//! ## Quick Start
//!
//! ```rust
//! use ciltree::prelude::*;
//!
//! // ldc.i4.1; brtrue.s +1; ldc.i4.2; ret
//! let body = MethodBody::parse(&[0x16, 0x17, 0x2D, 0x01, 0x18, 0x2A])?;
//! let tree = InstructionTree::lift(&body)?;
//!
//! let analysis = StackAnalysis::compute(&tree, &SignatureTable::new(true))?;
//! assert_eq!(analysis.max_stack, 1);
//!
//! assert_eq!(tree.lower()?.to_bytes()?, [0x16, 0x17, 0x2D, 0x01, 0x18, 0x2A]);
//! # Ok::<(), ciltree::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`assembly`] - Opcode tables, flat instructions and the instruction stream codec
//! - [`io`] - Little-endian readers and writers and the byte [`io::Parser`]
//! - [`method`] - Method body records, exception clauses and the body header codec
//! - [`tree`] - The instruction tree: editing, lifting from and lowering to flat bodies
//! - [`analysis`] - Stack depth analysis and the signature resolver interface
//! - [`pipeline`] - Lift, edit, analyse and lower single bodies or whole batches
//! - [`config`] - Pipeline switches
//! - [`prelude`] - Re-exports of the commonly used types
//! - [`Error`] and [`Result`] - Error handling
//!
//! ## Error Handling
//!
//! Every fallible operation returns [`Result<T>`]. A fault aborts the current call without a
//! partial result; trees passed to a failing lift or lower call are left untouched.

#[macro_use]
pub(crate) mod error;

pub mod analysis;
pub mod assembly;
pub mod config;
pub mod io;
pub mod method;
pub mod pipeline;
pub mod prelude;
pub mod token;
pub mod tree;

/// `ciltree` Result type
///
/// A type alias for `std::result::Result<T, Error>` where the error type is always [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `ciltree` Error type
///
/// The main error type for all operations in this crate. See [`Error`] for the variants.
pub use error::Error;
