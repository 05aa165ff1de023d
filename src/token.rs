//! Metadata tokens as they appear in CIL operands and exception-handler clauses.
//!
//! The tree engine never interprets a token; it only carries it from the flat instruction
//! stream into the tree and back. Resolution of what a token points to is the business of the
//! metadata layer (see [`crate::analysis::SignatureResolver`]).

use std::fmt;

/// A metadata token referencing a row of a metadata table or a heap entry.
///
/// Tokens consist of a 32-bit value where:
/// - The high byte (bits 24-31) identifies the table (or `0x70` for the user-string heap)
/// - The low 24 bits (bits 0-23) are the row index (or heap offset)
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Token(pub u32);

impl Token {
    /// Table id of `MethodDef` tokens.
    pub const METHOD_DEF: u8 = 0x06;
    /// Table id of `MemberRef` tokens.
    pub const MEMBER_REF: u8 = 0x0A;
    /// Table id of `StandAloneSig` tokens (used by `calli` and local signatures).
    pub const STANDALONE_SIG: u8 = 0x11;
    /// Table id of `MethodSpec` tokens.
    pub const METHOD_SPEC: u8 = 0x2B;
    /// Pseudo table id of user-string heap references (`ldstr`).
    pub const USER_STRING: u8 = 0x70;

    /// Creates a new token from a raw 32-bit value
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Token(value)
    }

    /// Returns the raw token value
    #[must_use]
    pub const fn value(&self) -> u32 {
        self.0
    }

    /// Extracts the table type from the token (high byte)
    #[must_use]
    pub const fn table(&self) -> u8 {
        (self.0 >> 24) as u8
    }

    /// Extracts the row index from the token (low 24 bits)
    #[must_use]
    pub const fn row(&self) -> u32 {
        self.0 & 0x00FF_FFFF
    }

    /// Returns true if this is a null token (value 0)
    #[must_use]
    pub const fn is_null(&self) -> bool {
        self.0 == 0
    }

    /// Returns true if the token can name a callee (`MethodDef`, `MemberRef` or `MethodSpec`).
    #[must_use]
    pub const fn is_method_like(&self) -> bool {
        matches!(
            self.table(),
            Self::METHOD_DEF | Self::MEMBER_REF | Self::METHOD_SPEC
        )
    }
}

impl From<u32> for Token {
    fn from(value: u32) -> Self {
        Token(value)
    }
}

impl From<Token> for u32 {
    fn from(token: Token) -> Self {
        token.0
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Token(0x{:08x}, table: 0x{:02x}, row: {})",
            self.0,
            self.table(),
            self.row()
        )
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_and_row() {
        let token = Token::new(0x0A00_0011);
        assert_eq!(token.table(), Token::MEMBER_REF);
        assert_eq!(token.row(), 0x11);
        assert!(token.is_method_like());

        let sig = Token::new(0x1100_0002);
        assert_eq!(sig.table(), Token::STANDALONE_SIG);
        assert!(!sig.is_method_like());
    }

    #[test]
    fn test_null_token() {
        assert!(Token::new(0).is_null());
        assert!(!Token::new(0x7000_0001).is_null());
    }

    #[test]
    fn test_formatting() {
        let token = Token(0x0600_0001);
        assert_eq!(format!("{token}"), "0x06000001");
        let debug = format!("{token:?}");
        assert!(debug.contains("table: 0x06"));
        assert!(debug.contains("row: 1"));
    }
}
