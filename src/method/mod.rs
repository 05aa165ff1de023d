//! Method body records: header values, exception clauses and their binary encoding.
//!
//! A [`MethodBody`] is the flat form of a method: what the lifter consumes and the lowerer
//! produces. [`MethodBody::parse`] and [`MethodBody::to_bytes`] convert it from and to the tiny
//! or fat body format of ECMA-335 II.25.4, including the exception handling sections.

mod body;
mod exceptions;
mod types;

pub use body::MethodBody;
pub use exceptions::{ExceptionHandler, ExceptionHandlerFlags, HandlerKind};
pub use types::{LocalVariable, MethodBodyFlags, SectionFlags};
