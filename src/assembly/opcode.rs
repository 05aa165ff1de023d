use std::{collections::HashMap, fmt, sync::OnceLock};

use crate::{
    assembly::{
        instruction::{FlowType, OperandType},
        instructions::{CilInstruction, INSTRUCTIONS, INSTRUCTIONS_FE, RESERVED, VARIABLE},
    },
    Error, Result,
};

/// Prefix byte of two-byte opcodes.
pub const FE_PREFIX: u8 = 0xFE;

/// Distance between a short branch opcode and its long form (`br.s` 0x2B, `br` 0x38).
const BRANCH_FORM_DISTANCE: u8 = 0x38 - 0x2B;

static MNEMONIC_TO_OPCODE: OnceLock<HashMap<&'static str, OpCode>> = OnceLock::new();

fn get_mnemonic_lookup() -> &'static HashMap<&'static str, OpCode> {
    MNEMONIC_TO_OPCODE.get_or_init(|| {
        let mut map = HashMap::new();

        for (code, instr) in (0_u8..).zip(INSTRUCTIONS.iter()) {
            if !instr.is_reserved() {
                map.insert(instr.mnemonic, OpCode::single(code));
            }
        }

        for (code, instr) in (0_u8..).zip(INSTRUCTIONS_FE.iter()) {
            if !instr.is_reserved() {
                map.insert(instr.mnemonic, OpCode::extended(code));
            }
        }

        map
    })
}

/// A CIL opcode: one byte, or two bytes when prefixed with `0xFE`.
///
/// An `OpCode` always names an assigned instruction; the constructors reject reserved slots.
///
/// # Examples
///
/// ```rust
/// use ciltree::assembly::OpCode;
///
/// let brtrue = OpCode::from_mnemonic("brtrue")?;
/// assert_eq!(brtrue.short_form(), Some(OpCode::from_mnemonic("brtrue.s")?));
///
/// let ceq = OpCode::new(0xFE, 0x01)?;
/// assert_eq!(ceq.mnemonic(), "ceq");
/// assert_eq!(ceq.size(), 2);
/// # Ok::<(), ciltree::Error>(())
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct OpCode {
    prefix: u8,
    code: u8,
}

impl OpCode {
    /// `nop`
    pub const NOP: OpCode = OpCode::single(0x00);
    /// `ldc.i4`
    pub const LDC_I4: OpCode = OpCode::single(0x20);
    /// `pop`
    pub const POP: OpCode = OpCode::single(0x26);
    /// `call`
    pub const CALL: OpCode = OpCode::single(0x28);
    /// `calli`
    pub const CALLI: OpCode = OpCode::single(0x29);
    /// `ret`
    pub const RET: OpCode = OpCode::single(0x2A);
    /// `br.s`
    pub const BR_S: OpCode = OpCode::single(0x2B);
    /// `br`
    pub const BR: OpCode = OpCode::single(0x38);
    /// `switch`
    pub const SWITCH: OpCode = OpCode::single(0x45);
    /// `callvirt`
    pub const CALLVIRT: OpCode = OpCode::single(0x6F);
    /// `newobj`
    pub const NEWOBJ: OpCode = OpCode::single(0x73);
    /// `throw`
    pub const THROW: OpCode = OpCode::single(0x7A);
    /// `endfinally`
    pub const ENDFINALLY: OpCode = OpCode::single(0xDC);
    /// `leave`
    pub const LEAVE: OpCode = OpCode::single(0xDD);
    /// `leave.s`
    pub const LEAVE_S: OpCode = OpCode::single(0xDE);
    /// `endfilter`
    pub const ENDFILTER: OpCode = OpCode::extended(0x11);

    const fn single(code: u8) -> Self {
        OpCode { prefix: 0, code }
    }

    const fn extended(code: u8) -> Self {
        OpCode {
            prefix: FE_PREFIX,
            code,
        }
    }

    /// Creates an opcode from its prefix (`0` or `0xFE`) and opcode byte.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidOpcode`] for unknown prefixes and reserved opcodes.
    pub fn new(prefix: u8, code: u8) -> Result<Self> {
        let table: &[CilInstruction] = match prefix {
            0 => &INSTRUCTIONS,
            FE_PREFIX => &INSTRUCTIONS_FE,
            _ => return Err(Error::InvalidOpcode { prefix, opcode: code }),
        };

        match table.get(usize::from(code)) {
            Some(instr) if !instr.is_reserved() => Ok(OpCode { prefix, code }),
            _ => Err(Error::InvalidOpcode { prefix, opcode: code }),
        }
    }

    /// Looks up an opcode by its mnemonic (`"ldc.i4.s"`, `"ceq"`, ...).
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidMnemonic`] if no opcode has that mnemonic.
    pub fn from_mnemonic(mnemonic: &str) -> Result<Self> {
        get_mnemonic_lookup()
            .get(mnemonic)
            .copied()
            .ok_or_else(|| Error::InvalidMnemonic(mnemonic.to_string()))
    }

    /// The prefix byte, `0` for single byte opcodes.
    #[must_use]
    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    /// The opcode byte following the optional prefix.
    #[must_use]
    pub fn code(&self) -> u8 {
        self.code
    }

    /// Static metadata of this opcode.
    #[must_use]
    pub fn metadata(&self) -> &'static CilInstruction {
        let table: &'static [CilInstruction] = if self.prefix == FE_PREFIX {
            &INSTRUCTIONS_FE
        } else {
            &INSTRUCTIONS
        };
        table.get(usize::from(self.code)).unwrap_or(&RESERVED)
    }

    /// The mnemonic.
    #[must_use]
    pub fn mnemonic(&self) -> &'static str {
        self.metadata().mnemonic
    }

    /// The operand type.
    #[must_use]
    pub fn operand_type(&self) -> OperandType {
        self.metadata().op_type
    }

    /// The flow control behaviour.
    #[must_use]
    pub fn flow(&self) -> FlowType {
        self.metadata().flow
    }

    /// Encoded size of the opcode itself (1 or 2 bytes).
    #[must_use]
    pub fn size(&self) -> u32 {
        if self.prefix == FE_PREFIX {
            2
        } else {
            1
        }
    }

    /// Fixed number of popped values, `None` if it depends on the call site or method.
    #[must_use]
    pub fn pops(&self) -> Option<u8> {
        Some(self.metadata().stack_pops).filter(|&pops| pops != VARIABLE)
    }

    /// Fixed number of pushed values, `None` if it depends on the call site.
    #[must_use]
    pub fn pushes(&self) -> Option<u8> {
        Some(self.metadata().stack_pushes).filter(|&pushes| pushes != VARIABLE)
    }

    /// Returns true for branches with a single label operand (including `leave`).
    #[must_use]
    pub fn is_branch(&self) -> bool {
        matches!(
            self.operand_type(),
            OperandType::ShortBranch | OperandType::Branch
        )
    }

    /// Returns true for the 1-byte offset branch forms.
    #[must_use]
    pub fn is_short_branch(&self) -> bool {
        self.operand_type() == OperandType::ShortBranch
    }

    /// Returns true for `switch`.
    #[must_use]
    pub fn is_switch(&self) -> bool {
        self.operand_type() == OperandType::Switch
    }

    /// Returns true for `leave` and `leave.s`.
    #[must_use]
    pub fn is_leave(&self) -> bool {
        *self == Self::LEAVE || *self == Self::LEAVE_S
    }

    /// Returns true for `call`, `callvirt`, `calli` and `newobj`.
    #[must_use]
    pub fn is_call_family(&self) -> bool {
        matches!(
            *self,
            Self::CALL | Self::CALLVIRT | Self::CALLI | Self::NEWOBJ
        )
    }

    /// The 1-byte offset form of a branch opcode, or `None` if this is not a branch.
    #[must_use]
    pub fn short_form(&self) -> Option<OpCode> {
        match self.operand_type() {
            OperandType::ShortBranch => Some(*self),
            OperandType::Branch if *self == Self::LEAVE => Some(Self::LEAVE_S),
            OperandType::Branch => Some(OpCode::single(self.code - BRANCH_FORM_DISTANCE)),
            _ => None,
        }
    }

    /// The 4-byte offset form of a branch opcode, or `None` if this is not a branch.
    #[must_use]
    pub fn long_form(&self) -> Option<OpCode> {
        match self.operand_type() {
            OperandType::Branch => Some(*self),
            OperandType::ShortBranch if *self == Self::LEAVE_S => Some(Self::LEAVE),
            OperandType::ShortBranch => Some(OpCode::single(self.code + BRANCH_FORM_DISTANCE)),
            _ => None,
        }
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

impl fmt::Debug for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.prefix == FE_PREFIX {
            write!(f, "OpCode(FE {:02X} {})", self.code, self.mnemonic())
        } else {
            write!(f, "OpCode({:02X} {})", self.code, self.mnemonic())
        }
    }
}
