use bitflags::bitflags;
use strum::{Display, EnumIter};

use crate::token::Token;

bitflags! {
    /// Exception handler flags defining the type of exception handling clause.
    ///
    /// These flags determine how the exception handler processes exceptions and
    /// control flow within try/catch/finally blocks.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ExceptionHandlerFlags: u16 {
        /// A typed exception clause.
        ///
        /// The `catch_type` field contains the metadata token of the exception type
        /// that this handler catches. This is the most common exception handler type.
        const EXCEPTION = 0x0000;

        /// An exception filter and handler clause.
        ///
        /// Uses a filter expression to determine whether to handle the exception.
        /// The filter code is executed before the handler to test the exception.
        const FILTER = 0x0001;

        /// A finally clause.
        ///
        /// Code that executes regardless of whether an exception occurs.
        const FINALLY = 0x0002;

        /// A fault clause (finally that executes only on exception).
        const FAULT = 0x0004;
    }
}

/// The four kinds of handler clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum HandlerKind {
    /// Typed catch clause
    Catch,
    /// Filtered catch clause
    Filter,
    /// Finally clause
    Finally,
    /// Fault clause
    Fault,
}

impl HandlerKind {
    /// Returns true for the kinds that receive the exception object on the stack.
    #[must_use]
    pub fn receives_exception(&self) -> bool {
        matches!(self, HandlerKind::Catch | HandlerKind::Filter)
    }

    /// The clause flags encoding this kind.
    #[must_use]
    pub fn flags(&self) -> ExceptionHandlerFlags {
        match self {
            HandlerKind::Catch => ExceptionHandlerFlags::EXCEPTION,
            HandlerKind::Filter => ExceptionHandlerFlags::FILTER,
            HandlerKind::Finally => ExceptionHandlerFlags::FINALLY,
            HandlerKind::Fault => ExceptionHandlerFlags::FAULT,
        }
    }
}

impl From<ExceptionHandlerFlags> for HandlerKind {
    fn from(flags: ExceptionHandlerFlags) -> Self {
        if flags.contains(ExceptionHandlerFlags::FILTER) {
            HandlerKind::Filter
        } else if flags.contains(ExceptionHandlerFlags::FINALLY) {
            HandlerKind::Finally
        } else if flags.contains(ExceptionHandlerFlags::FAULT) {
            HandlerKind::Fault
        } else {
            HandlerKind::Catch
        }
    }
}

/// One exception handling clause of a method body (ECMA-335 II.25.4.6).
///
/// Offsets and lengths are byte counts relative to the start of the code stream. The last field
/// of the encoded clause is either a class token (catch) or a filter offset (filter); it is split
/// into `catch_type` and `filter_offset` here, and is zero for finally and fault clauses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionHandler {
    /// Flags describing the type of exception handler (catch, filter, finally, fault).
    pub flags: ExceptionHandlerFlags,
    /// Offset in bytes of try block from start of method body.
    pub try_offset: u32,
    /// Length in bytes of the try block.
    pub try_length: u32,
    /// Location of the handler for this try block.
    pub handler_offset: u32,
    /// Size of the handler code in bytes.
    pub handler_length: u32,
    /// Start of the filter block, for filter clauses.
    pub filter_offset: Option<u32>,
    /// Exception type caught, for catch clauses.
    pub catch_type: Option<Token>,
}

impl ExceptionHandler {
    /// The clause kind.
    #[must_use]
    pub fn kind(&self) -> HandlerKind {
        HandlerKind::from(self.flags)
    }

    /// The raw value of the class-token-or-filter-offset field.
    #[must_use]
    pub fn class_or_filter(&self) -> u32 {
        match self.kind() {
            HandlerKind::Catch => self.catch_type.map_or(0, |token| token.value()),
            HandlerKind::Filter => self.filter_offset.unwrap_or(0),
            HandlerKind::Finally | HandlerKind::Fault => 0,
        }
    }

    /// Builds a clause from its encoded fields, splitting the class-token-or-filter-offset
    /// field by kind.
    #[must_use]
    pub fn from_raw(
        flags: ExceptionHandlerFlags,
        try_offset: u32,
        try_length: u32,
        handler_offset: u32,
        handler_length: u32,
        class_or_filter: u32,
    ) -> Self {
        let kind = HandlerKind::from(flags);
        ExceptionHandler {
            flags,
            try_offset,
            try_length,
            handler_offset,
            handler_length,
            filter_offset: (kind == HandlerKind::Filter).then_some(class_or_filter),
            catch_type: (kind == HandlerKind::Catch).then_some(Token::new(class_or_filter)),
        }
    }

    /// Returns true if the clause fits the 12-byte small encoding.
    #[must_use]
    pub fn fits_small(&self) -> bool {
        self.try_offset <= u32::from(u16::MAX)
            && self.try_length <= u32::from(u8::MAX)
            && self.handler_offset <= u32::from(u16::MAX)
            && self.handler_length <= u32::from(u8::MAX)
    }
}

#[cfg(test)]
mod tests {
    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn test_kinds_round_trip_through_flags() {
        for kind in HandlerKind::iter() {
            assert_eq!(HandlerKind::from(kind.flags()), kind);
        }
        assert_eq!(HandlerKind::Finally.to_string(), "finally");
    }

    #[test]
    fn test_raw_field_split() {
        let catch = ExceptionHandler::from_raw(ExceptionHandlerFlags::EXCEPTION, 0, 4, 4, 2, 0x0100_0001);
        assert_eq!(catch.catch_type, Some(Token::new(0x0100_0001)));
        assert_eq!(catch.filter_offset, None);
        assert_eq!(catch.class_or_filter(), 0x0100_0001);

        let filter = ExceptionHandler::from_raw(ExceptionHandlerFlags::FILTER, 0, 4, 8, 2, 4);
        assert_eq!(filter.kind(), HandlerKind::Filter);
        assert_eq!(filter.filter_offset, Some(4));
        assert_eq!(filter.catch_type, None);

        let finally = ExceptionHandler::from_raw(ExceptionHandlerFlags::FINALLY, 0, 4, 4, 2, 0xDEAD);
        assert_eq!(finally.class_or_filter(), 0);
        assert!(finally.fits_small());
        assert!(!HandlerKind::Fault.receives_exception());
    }
}
