//! Method body header and exception section codec (ECMA-335 II.25.4).

use crate::{
    assembly::{decode_stream, encode_stream, Instruction},
    io::{push_le, Parser},
    method::{ExceptionHandler, ExceptionHandlerFlags, LocalVariable, MethodBodyFlags, SectionFlags},
    token::Token,
    Error, Result,
};

/// Size of a fat method header in bytes.
const FAT_HEADER_SIZE: usize = 12;
/// Header size of both small and fat data sections.
const SECTION_HEADER_SIZE: usize = 4;
/// Size of one small exception clause.
const SMALL_CLAUSE_SIZE: usize = 12;
/// Size of one fat exception clause.
const FAT_CLAUSE_SIZE: usize = 24;
/// Largest code size a tiny header can describe.
const TINY_MAX_CODE_SIZE: usize = 63;
/// Implied max stack of tiny headers.
const TINY_MAX_STACK: u16 = 8;

/// A decoded method body: header values, flat instructions and exception clauses.
///
/// This is the record the lifter consumes and the lowerer produces. `locals` is opaque to the
/// codec; [`MethodBody::parse`] leaves it empty since the slot types live in the standalone
/// signature named by `local_var_sig_token`, and callers that resolved it may fill it in.
///
/// # Examples
///
/// ```rust
/// use ciltree::method::MethodBody;
///
/// // Tiny header: code size 2, `ldc.i4.1; ret`
/// let body = MethodBody::parse(&[0x0A, 0x17, 0x2A])?;
/// assert_eq!(body.instructions.len(), 2);
/// assert_eq!(body.max_stack, 8);
/// assert_eq!(body.to_bytes()?, [0x0A, 0x17, 0x2A]);
/// # Ok::<(), ciltree::Error>(())
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MethodBody {
    /// Declared maximum evaluation stack depth
    pub max_stack: u16,
    /// Zero-initialise locals on entry
    pub init_locals: bool,
    /// Token of the local variable signature, null if the method has none
    pub local_var_sig_token: Token,
    /// Local variable slots
    pub locals: Vec<LocalVariable>,
    /// Instructions in code order
    pub instructions: Vec<Instruction>,
    /// Exception clauses in table order
    pub exception_handlers: Vec<ExceptionHandler>,
}

impl MethodBody {
    /// Parses a method body starting at its header.
    ///
    /// Bytes following the last exception section are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OutOfBounds`] for truncated input, [`crate::Error::Malformed`]
    /// for an unknown header format, and any error of [`crate::assembly::decode_stream`].
    pub fn parse(data: &[u8]) -> Result<MethodBody> {
        if data.is_empty() {
            return Err(malformed_error!("Provided data for body parsing is empty"));
        }

        let mut parser = Parser::new(data);
        let first_byte = parser.peek_byte()?;
        match MethodBodyFlags::from_bits_truncate(u16::from(first_byte & 0b_0000_0011_u8)) {
            MethodBodyFlags::TINY_FORMAT => {
                parser.advance_by(1)?;
                let code = parser.read_bytes(usize::from(first_byte >> 2))?;

                Ok(MethodBody {
                    max_stack: TINY_MAX_STACK,
                    instructions: decode_stream(code)?,
                    ..MethodBody::default()
                })
            }
            MethodBodyFlags::FAT_FORMAT => {
                let first_duo = parser.read_le::<u16>()?;
                let size_header = usize::from(first_duo >> 12) * 4;
                if size_header < FAT_HEADER_SIZE {
                    return Err(malformed_error!("Fat header size {} is too small", size_header));
                }

                let flags_header = MethodBodyFlags::from_bits_truncate(first_duo & 0x0FFF);
                let max_stack = parser.read_le::<u16>()?;
                let size_code = parser.read_le::<u32>()? as usize;
                let local_var_sig_token = Token::new(parser.read_le::<u32>()?);

                parser.seek(size_header)?;
                let code = parser.read_bytes(size_code)?;
                let instructions = decode_stream(code)?;

                let exception_handlers = if flags_header.contains(MethodBodyFlags::MORE_SECTS) {
                    read_sections(&mut parser)?
                } else {
                    Vec::new()
                };

                Ok(MethodBody {
                    max_stack,
                    init_locals: flags_header.contains(MethodBodyFlags::INIT_LOCALS),
                    local_var_sig_token,
                    locals: Vec::new(),
                    instructions,
                    exception_handlers,
                })
            }
            _ => Err(malformed_error!(
                "MethodHeader is neither FAT nor TINY - {}",
                first_byte
            )),
        }
    }

    /// Size of the code stream in bytes.
    #[must_use]
    pub fn code_size(&self) -> usize {
        self.instructions.iter().map(|i| i.size as usize).sum()
    }

    /// Returns true if the body can be written with a tiny header.
    #[must_use]
    pub fn is_tiny(&self) -> bool {
        self.code_size() <= TINY_MAX_CODE_SIZE
            && self.max_stack <= TINY_MAX_STACK
            && self.local_var_sig_token.is_null()
            && self.exception_handlers.is_empty()
            && !self.init_locals
    }

    /// Encodes header, code and exception sections.
    ///
    /// A tiny header is written whenever it is legal, which makes the runtime assume a max stack
    /// of 8 for small bodies declaring less. Exception clauses go into one small section when
    /// every clause fits the small encoding, and into one fat section otherwise.
    ///
    /// # Errors
    ///
    /// Fails if an instruction cannot be encoded (see [`crate::assembly::encode_stream`]) or the
    /// body exceeds the limits of the fat encoding.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let code = encode_stream(&self.instructions)?;

        if self.is_tiny() {
            let mut out = Vec::with_capacity(code.len() + 1);
            // Code size is at most 63, so the shifted value fits a byte
            #[allow(clippy::cast_possible_truncation)]
            out.push(((code.len() as u8) << 2) | 0x2);
            out.extend_from_slice(&code);
            return Ok(out);
        }

        let mut flags = MethodBodyFlags::FAT_FORMAT;
        if !self.exception_handlers.is_empty() {
            flags |= MethodBodyFlags::MORE_SECTS;
        }
        if self.init_locals {
            flags |= MethodBodyFlags::INIT_LOCALS;
        }

        let code_size = u32::try_from(code.len())
            .map_err(|_| malformed_error!("Code size {} exceeds u32", code.len()))?;

        let mut out = Vec::with_capacity(FAT_HEADER_SIZE + code.len());
        push_le(&mut out, flags.bits() | (3 << 12));
        push_le(&mut out, self.max_stack);
        push_le(&mut out, code_size);
        push_le(&mut out, self.local_var_sig_token.value());
        out.extend_from_slice(&code);

        if !self.exception_handlers.is_empty() {
            while out.len() % 4 != 0 {
                out.push(0);
            }
            write_section(&mut out, &self.exception_handlers)?;
        }

        Ok(out)
    }
}

fn read_sections(parser: &mut Parser) -> Result<Vec<ExceptionHandler>> {
    let mut exception_handlers = Vec::new();

    loop {
        parser.align(4)?;
        let section_start = parser.pos();
        let section_flags = SectionFlags::from_bits_truncate(parser.read_le::<u8>()?);

        let section_size = if section_flags.contains(SectionFlags::FAT_FORMAT) {
            let low = u32::from(parser.read_le::<u16>()?);
            let high = u32::from(parser.read_le::<u8>()?);
            (low | (high << 16)) as usize
        } else {
            let size = usize::from(parser.read_le::<u8>()?);
            parser.advance_by(2)?;
            size
        };

        if section_size < SECTION_HEADER_SIZE {
            return Err(malformed_error!(
                "Data section at {} has size {}",
                section_start,
                section_size
            ));
        }
        let section_end = section_start + section_size;
        if section_end > parser.len() {
            return Err(Error::OutOfBounds);
        }

        if section_flags.contains(SectionFlags::EHTABLE) {
            if section_flags.contains(SectionFlags::FAT_FORMAT) {
                for _ in 0..(section_size - SECTION_HEADER_SIZE) / FAT_CLAUSE_SIZE {
                    // Only the low 16 bits of the fat flags field are defined
                    #[allow(clippy::cast_possible_truncation)]
                    let flags =
                        ExceptionHandlerFlags::from_bits_truncate(parser.read_le::<u32>()? as u16);
                    exception_handlers.push(ExceptionHandler::from_raw(
                        flags,
                        parser.read_le::<u32>()?,
                        parser.read_le::<u32>()?,
                        parser.read_le::<u32>()?,
                        parser.read_le::<u32>()?,
                        parser.read_le::<u32>()?,
                    ));
                }
            } else {
                for _ in 0..(section_size - SECTION_HEADER_SIZE) / SMALL_CLAUSE_SIZE {
                    let flags = ExceptionHandlerFlags::from_bits_truncate(parser.read_le::<u16>()?);
                    exception_handlers.push(ExceptionHandler::from_raw(
                        flags,
                        u32::from(parser.read_le::<u16>()?),
                        u32::from(parser.read_le::<u8>()?),
                        u32::from(parser.read_le::<u16>()?),
                        u32::from(parser.read_le::<u8>()?),
                        parser.read_le::<u32>()?,
                    ));
                }
            }
        }

        parser.seek(section_end)?;
        if !section_flags.contains(SectionFlags::MORE_SECTS) {
            break;
        }
    }

    Ok(exception_handlers)
}

fn write_section(out: &mut Vec<u8>, handlers: &[ExceptionHandler]) -> Result<()> {
    let small_size = SECTION_HEADER_SIZE + handlers.len() * SMALL_CLAUSE_SIZE;
    let small = small_size <= usize::from(u8::MAX) && handlers.iter().all(ExceptionHandler::fits_small);

    if small {
        out.push(SectionFlags::EHTABLE.bits());
        // Checked against u8::MAX above
        #[allow(clippy::cast_possible_truncation)]
        out.push(small_size as u8);
        push_le(out, 0_u16);

        for handler in handlers {
            // Ranges checked by fits_small
            #[allow(clippy::cast_possible_truncation)]
            {
                push_le(out, handler.flags.bits());
                push_le(out, handler.try_offset as u16);
                push_le(out, handler.try_length as u8);
                push_le(out, handler.handler_offset as u16);
                push_le(out, handler.handler_length as u8);
            }
            push_le(out, handler.class_or_filter());
        }
    } else {
        let fat_size = SECTION_HEADER_SIZE + handlers.len() * FAT_CLAUSE_SIZE;
        if fat_size > 0x00FF_FFFF {
            return Err(malformed_error!(
                "{} exception clauses exceed the fat section size",
                handlers.len()
            ));
        }

        out.push((SectionFlags::EHTABLE | SectionFlags::FAT_FORMAT).bits());
        // Three byte size, checked above
        #[allow(clippy::cast_possible_truncation)]
        {
            push_le(out, fat_size as u16);
            push_le(out, (fat_size >> 16) as u8);
        }

        for handler in handlers {
            push_le(out, u32::from(handler.flags.bits()));
            push_le(out, handler.try_offset);
            push_le(out, handler.try_length);
            push_le(out, handler.handler_offset);
            push_le(out, handler.handler_length);
            push_le(out, handler.class_or_filter());
        }
    }

    Ok(())
}
