use thiserror::Error;

use crate::token::Token;

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// Every fault aborts the lift, analyze or lower call that raised it. None of the operations
/// hand out partially built trees or partially flattened instruction streams, so a caller that
/// receives an `Err` can drop the method body (or keep the original bytes) and move on to the
/// next one.
///
/// # Error Categories
///
/// ## Structural integrity
/// - [`Error::Malformed`] - Offsets that miss instruction boundaries, unresolvable handler
///   ranges, handler descriptors reused across regions
/// - [`Error::OutOfBounds`] - Truncated method body or instruction stream
/// - [`Error::Structure`] - Broken tree linkage, `group` level mismatches, foreign nodes
/// - [`Error::Layout`] - Regions that cannot be laid out when lowering (empty regions, a filter
///   that does not end where its handler begins)
///
/// ## Stack bound
/// - [`Error::StackBound`] - A computed stack height outside the representable range
///
/// ## Unsupported input
/// - [`Error::InvalidOpcode`] - Byte sequence that is not a CIL opcode
/// - [`Error::UnsupportedOperand`] - Operand shape that does not fit the opcode
/// - [`Error::InvalidMnemonic`] - Unknown mnemonic passed to the opcode lookup
///
/// ## Metadata interface
/// - [`Error::TokenNotFound`] - The signature resolver knows nothing about a call-site token
///
/// # Examples
///
/// ```rust
/// use ciltree::{Error, method::MethodBody};
///
/// match MethodBody::parse(&[0x0A, 0x17]) {
///     Ok(body) => println!("{} instructions", body.instructions.len()),
///     Err(Error::OutOfBounds) => eprintln!("body is truncated"),
///     Err(Error::Malformed { message, file, line }) => {
///         eprintln!("Malformed body: {} ({}:{})", message, file, line);
///     }
///     Err(e) => eprintln!("Other error: {}", e),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// The bytecode is damaged and could not be processed.
    ///
    /// The error includes the source location where the malformation was detected for
    /// debugging purposes.
    ///
    /// # Fields
    ///
    /// * `message` - Detailed description of what was malformed
    /// * `file` - Source file where the error was detected
    /// * `line` - Source line where the error was detected
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// An out of bound access was attempted while reading the method body.
    #[error("Out of Bound read would have occurred!")]
    OutOfBounds,

    /// A tree operation would violate the linkage invariants.
    ///
    /// Raised by the tree model when asked to relink a node that does not belong where the
    /// caller claims, when `group` cannot find a common parent for its endpoints, or when an
    /// endpoint would have to be split to satisfy the request.
    #[error("Tree structure violation - {0}")]
    Structure(String),

    /// The tree cannot be flattened into a valid handler table.
    #[error("Layout fault - {0}")]
    Layout(String),

    /// A computed stack height left the representable range.
    ///
    /// # Fields
    ///
    /// * `height` - The offending height
    /// * `node` - Arena index of the instruction at which it was computed
    #[error("Stack height {height} out of range at node n{node}")]
    StackBound {
        /// The offending height
        height: i64,
        /// Arena index of the instruction where the height was computed
        node: usize,
    },

    /// The opcode byte sequence does not name a CIL instruction.
    #[error("Invalid opcode {prefix:02X}:{opcode:02X}")]
    InvalidOpcode {
        /// Prefix byte (0 for single byte opcodes)
        prefix: u8,
        /// Opcode byte
        opcode: u8,
    },

    /// The operand does not match the operand kind of its opcode.
    #[error("Unsupported operand - {0}")]
    UnsupportedOperand(String),

    /// Unknown instruction mnemonic.
    #[error("Invalid mnemonic - {0}")]
    InvalidMnemonic(String),

    /// The signature resolver could not describe a call-site token.
    #[error("No call-site signature for token - {0}")]
    TokenNotFound(Token),
}
