//! Static CIL instruction metadata tables (ECMA-335 Partition III).
//!
//! [`INSTRUCTIONS`] is indexed by the single opcode byte (`0x00` - `0xE0`), [`INSTRUCTIONS_FE`]
//! by the second byte of `0xFE`-prefixed opcodes (`0x00` - `0x1E`). Reserved slots carry an
//! empty mnemonic.
//!
//! Stack counts marked [`VARIABLE`] depend on the call site (`call`, `callvirt`, `calli`,
//! `newobj`), on the owning method's signature (`ret`) or on the current stack (`leave` and
//! `leave.s` empty it).

use crate::assembly::instruction::{FlowType, OperandType};

/// Marker for a stack pop or push count that is not fixed by the opcode.
pub const VARIABLE: u8 = u8::MAX;

/// Static properties of one CIL opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CilInstruction {
    /// Mnemonic as printed by ILDasm, empty for reserved opcodes
    pub mnemonic: &'static str,
    /// Operand type
    pub op_type: OperandType,
    /// Values popped from the evaluation stack, or [`VARIABLE`]
    pub stack_pops: u8,
    /// Values pushed onto the evaluation stack, or [`VARIABLE`]
    pub stack_pushes: u8,
    /// Flow control behaviour
    pub flow: FlowType,
}

impl CilInstruction {
    /// Returns true for unassigned opcode slots.
    #[must_use]
    pub fn is_reserved(&self) -> bool {
        self.mnemonic.is_empty()
    }
}

const VAR: u8 = VARIABLE;

macro_rules! op {
    ($mnemonic:expr, $op_type:ident, $pops:expr, $pushes:expr, $flow:ident) => {
        CilInstruction {
            mnemonic: $mnemonic,
            op_type: OperandType::$op_type,
            stack_pops: $pops,
            stack_pushes: $pushes,
            flow: FlowType::$flow,
        }
    };
}

/// Placeholder for unassigned opcodes.
pub const RESERVED: CilInstruction = op!("", None, 0, 0, Sequential);

/// Single byte opcodes.
pub static INSTRUCTIONS: [CilInstruction; 0xE1] = [
    /* 00 */ op!("nop", None, 0, 0, Sequential),
    /* 01 */ op!("break", None, 0, 0, Sequential),
    /* 02 */ op!("ldarg.0", None, 0, 1, Sequential),
    /* 03 */ op!("ldarg.1", None, 0, 1, Sequential),
    /* 04 */ op!("ldarg.2", None, 0, 1, Sequential),
    /* 05 */ op!("ldarg.3", None, 0, 1, Sequential),
    /* 06 */ op!("ldloc.0", None, 0, 1, Sequential),
    /* 07 */ op!("ldloc.1", None, 0, 1, Sequential),
    /* 08 */ op!("ldloc.2", None, 0, 1, Sequential),
    /* 09 */ op!("ldloc.3", None, 0, 1, Sequential),
    /* 0A */ op!("stloc.0", None, 1, 0, Sequential),
    /* 0B */ op!("stloc.1", None, 1, 0, Sequential),
    /* 0C */ op!("stloc.2", None, 1, 0, Sequential),
    /* 0D */ op!("stloc.3", None, 1, 0, Sequential),
    /* 0E */ op!("ldarg.s", UInt8, 0, 1, Sequential),
    /* 0F */ op!("ldarga.s", UInt8, 0, 1, Sequential),
    /* 10 */ op!("starg.s", UInt8, 1, 0, Sequential),
    /* 11 */ op!("ldloc.s", UInt8, 0, 1, Sequential),
    /* 12 */ op!("ldloca.s", UInt8, 0, 1, Sequential),
    /* 13 */ op!("stloc.s", UInt8, 1, 0, Sequential),
    /* 14 */ op!("ldnull", None, 0, 1, Sequential),
    /* 15 */ op!("ldc.i4.m1", None, 0, 1, Sequential),
    /* 16 */ op!("ldc.i4.0", None, 0, 1, Sequential),
    /* 17 */ op!("ldc.i4.1", None, 0, 1, Sequential),
    /* 18 */ op!("ldc.i4.2", None, 0, 1, Sequential),
    /* 19 */ op!("ldc.i4.3", None, 0, 1, Sequential),
    /* 1A */ op!("ldc.i4.4", None, 0, 1, Sequential),
    /* 1B */ op!("ldc.i4.5", None, 0, 1, Sequential),
    /* 1C */ op!("ldc.i4.6", None, 0, 1, Sequential),
    /* 1D */ op!("ldc.i4.7", None, 0, 1, Sequential),
    /* 1E */ op!("ldc.i4.8", None, 0, 1, Sequential),
    /* 1F */ op!("ldc.i4.s", Int8, 0, 1, Sequential),
    /* 20 */ op!("ldc.i4", Int32, 0, 1, Sequential),
    /* 21 */ op!("ldc.i8", Int64, 0, 1, Sequential),
    /* 22 */ op!("ldc.r4", Float32, 0, 1, Sequential),
    /* 23 */ op!("ldc.r8", Float64, 0, 1, Sequential),
    /* 24 */ RESERVED,
    /* 25 */ op!("dup", None, 1, 2, Sequential),
    /* 26 */ op!("pop", None, 1, 0, Sequential),
    /* 27 */ op!("jmp", Token, 0, 0, Return),
    /* 28 */ op!("call", Token, VAR, VAR, Call),
    /* 29 */ op!("calli", Token, VAR, VAR, Call),
    /* 2A */ op!("ret", None, VAR, 0, Return),
    /* 2B */ op!("br.s", ShortBranch, 0, 0, UnconditionalBranch),
    /* 2C */ op!("brfalse.s", ShortBranch, 1, 0, ConditionalBranch),
    /* 2D */ op!("brtrue.s", ShortBranch, 1, 0, ConditionalBranch),
    /* 2E */ op!("beq.s", ShortBranch, 2, 0, ConditionalBranch),
    /* 2F */ op!("bge.s", ShortBranch, 2, 0, ConditionalBranch),
    /* 30 */ op!("bgt.s", ShortBranch, 2, 0, ConditionalBranch),
    /* 31 */ op!("ble.s", ShortBranch, 2, 0, ConditionalBranch),
    /* 32 */ op!("blt.s", ShortBranch, 2, 0, ConditionalBranch),
    /* 33 */ op!("bne.un.s", ShortBranch, 2, 0, ConditionalBranch),
    /* 34 */ op!("bge.un.s", ShortBranch, 2, 0, ConditionalBranch),
    /* 35 */ op!("bgt.un.s", ShortBranch, 2, 0, ConditionalBranch),
    /* 36 */ op!("ble.un.s", ShortBranch, 2, 0, ConditionalBranch),
    /* 37 */ op!("blt.un.s", ShortBranch, 2, 0, ConditionalBranch),
    /* 38 */ op!("br", Branch, 0, 0, UnconditionalBranch),
    /* 39 */ op!("brfalse", Branch, 1, 0, ConditionalBranch),
    /* 3A */ op!("brtrue", Branch, 1, 0, ConditionalBranch),
    /* 3B */ op!("beq", Branch, 2, 0, ConditionalBranch),
    /* 3C */ op!("bge", Branch, 2, 0, ConditionalBranch),
    /* 3D */ op!("bgt", Branch, 2, 0, ConditionalBranch),
    /* 3E */ op!("ble", Branch, 2, 0, ConditionalBranch),
    /* 3F */ op!("blt", Branch, 2, 0, ConditionalBranch),
    /* 40 */ op!("bne.un", Branch, 2, 0, ConditionalBranch),
    /* 41 */ op!("bge.un", Branch, 2, 0, ConditionalBranch),
    /* 42 */ op!("bgt.un", Branch, 2, 0, ConditionalBranch),
    /* 43 */ op!("ble.un", Branch, 2, 0, ConditionalBranch),
    /* 44 */ op!("blt.un", Branch, 2, 0, ConditionalBranch),
    /* 45 */ op!("switch", Switch, 1, 0, Switch),
    /* 46 */ op!("ldind.i1", None, 1, 1, Sequential),
    /* 47 */ op!("ldind.u1", None, 1, 1, Sequential),
    /* 48 */ op!("ldind.i2", None, 1, 1, Sequential),
    /* 49 */ op!("ldind.u2", None, 1, 1, Sequential),
    /* 4A */ op!("ldind.i4", None, 1, 1, Sequential),
    /* 4B */ op!("ldind.u4", None, 1, 1, Sequential),
    /* 4C */ op!("ldind.i8", None, 1, 1, Sequential),
    /* 4D */ op!("ldind.i", None, 1, 1, Sequential),
    /* 4E */ op!("ldind.r4", None, 1, 1, Sequential),
    /* 4F */ op!("ldind.r8", None, 1, 1, Sequential),
    /* 50 */ op!("ldind.ref", None, 1, 1, Sequential),
    /* 51 */ op!("stind.ref", None, 2, 0, Sequential),
    /* 52 */ op!("stind.i1", None, 2, 0, Sequential),
    /* 53 */ op!("stind.i2", None, 2, 0, Sequential),
    /* 54 */ op!("stind.i4", None, 2, 0, Sequential),
    /* 55 */ op!("stind.i8", None, 2, 0, Sequential),
    /* 56 */ op!("stind.r4", None, 2, 0, Sequential),
    /* 57 */ op!("stind.r8", None, 2, 0, Sequential),
    /* 58 */ op!("add", None, 2, 1, Sequential),
    /* 59 */ op!("sub", None, 2, 1, Sequential),
    /* 5A */ op!("mul", None, 2, 1, Sequential),
    /* 5B */ op!("div", None, 2, 1, Sequential),
    /* 5C */ op!("div.un", None, 2, 1, Sequential),
    /* 5D */ op!("rem", None, 2, 1, Sequential),
    /* 5E */ op!("rem.un", None, 2, 1, Sequential),
    /* 5F */ op!("and", None, 2, 1, Sequential),
    /* 60 */ op!("or", None, 2, 1, Sequential),
    /* 61 */ op!("xor", None, 2, 1, Sequential),
    /* 62 */ op!("shl", None, 2, 1, Sequential),
    /* 63 */ op!("shr", None, 2, 1, Sequential),
    /* 64 */ op!("shr.un", None, 2, 1, Sequential),
    /* 65 */ op!("neg", None, 1, 1, Sequential),
    /* 66 */ op!("not", None, 1, 1, Sequential),
    /* 67 */ op!("conv.i1", None, 1, 1, Sequential),
    /* 68 */ op!("conv.i2", None, 1, 1, Sequential),
    /* 69 */ op!("conv.i4", None, 1, 1, Sequential),
    /* 6A */ op!("conv.i8", None, 1, 1, Sequential),
    /* 6B */ op!("conv.r4", None, 1, 1, Sequential),
    /* 6C */ op!("conv.r8", None, 1, 1, Sequential),
    /* 6D */ op!("conv.u4", None, 1, 1, Sequential),
    /* 6E */ op!("conv.u8", None, 1, 1, Sequential),
    /* 6F */ op!("callvirt", Token, VAR, VAR, Call),
    /* 70 */ op!("cpobj", Token, 2, 0, Sequential),
    /* 71 */ op!("ldobj", Token, 1, 1, Sequential),
    /* 72 */ op!("ldstr", Token, 0, 1, Sequential),
    /* 73 */ op!("newobj", Token, VAR, 1, Call),
    /* 74 */ op!("castclass", Token, 1, 1, Sequential),
    /* 75 */ op!("isinst", Token, 1, 1, Sequential),
    /* 76 */ op!("conv.r.un", None, 1, 1, Sequential),
    /* 77 */ RESERVED,
    /* 78 */ RESERVED,
    /* 79 */ op!("unbox", Token, 1, 1, Sequential),
    /* 7A */ op!("throw", None, 1, 0, Throw),
    /* 7B */ op!("ldfld", Token, 1, 1, Sequential),
    /* 7C */ op!("ldflda", Token, 1, 1, Sequential),
    /* 7D */ op!("stfld", Token, 2, 0, Sequential),
    /* 7E */ op!("ldsfld", Token, 0, 1, Sequential),
    /* 7F */ op!("ldsflda", Token, 0, 1, Sequential),
    /* 80 */ op!("stsfld", Token, 1, 0, Sequential),
    /* 81 */ op!("stobj", Token, 2, 0, Sequential),
    /* 82 */ op!("conv.ovf.i1.un", None, 1, 1, Sequential),
    /* 83 */ op!("conv.ovf.i2.un", None, 1, 1, Sequential),
    /* 84 */ op!("conv.ovf.i4.un", None, 1, 1, Sequential),
    /* 85 */ op!("conv.ovf.i8.un", None, 1, 1, Sequential),
    /* 86 */ op!("conv.ovf.u1.un", None, 1, 1, Sequential),
    /* 87 */ op!("conv.ovf.u2.un", None, 1, 1, Sequential),
    /* 88 */ op!("conv.ovf.u4.un", None, 1, 1, Sequential),
    /* 89 */ op!("conv.ovf.u8.un", None, 1, 1, Sequential),
    /* 8A */ op!("conv.ovf.i.un", None, 1, 1, Sequential),
    /* 8B */ op!("conv.ovf.u.un", None, 1, 1, Sequential),
    /* 8C */ op!("box", Token, 1, 1, Sequential),
    /* 8D */ op!("newarr", Token, 1, 1, Sequential),
    /* 8E */ op!("ldlen", None, 1, 1, Sequential),
    /* 8F */ op!("ldelema", Token, 2, 1, Sequential),
    /* 90 */ op!("ldelem.i1", None, 2, 1, Sequential),
    /* 91 */ op!("ldelem.u1", None, 2, 1, Sequential),
    /* 92 */ op!("ldelem.i2", None, 2, 1, Sequential),
    /* 93 */ op!("ldelem.u2", None, 2, 1, Sequential),
    /* 94 */ op!("ldelem.i4", None, 2, 1, Sequential),
    /* 95 */ op!("ldelem.u4", None, 2, 1, Sequential),
    /* 96 */ op!("ldelem.i8", None, 2, 1, Sequential),
    /* 97 */ op!("ldelem.i", None, 2, 1, Sequential),
    /* 98 */ op!("ldelem.r4", None, 2, 1, Sequential),
    /* 99 */ op!("ldelem.r8", None, 2, 1, Sequential),
    /* 9A */ op!("ldelem.ref", None, 2, 1, Sequential),
    /* 9B */ op!("stelem.i", None, 3, 0, Sequential),
    /* 9C */ op!("stelem.i1", None, 3, 0, Sequential),
    /* 9D */ op!("stelem.i2", None, 3, 0, Sequential),
    /* 9E */ op!("stelem.i4", None, 3, 0, Sequential),
    /* 9F */ op!("stelem.i8", None, 3, 0, Sequential),
    /* A0 */ op!("stelem.r4", None, 3, 0, Sequential),
    /* A1 */ op!("stelem.r8", None, 3, 0, Sequential),
    /* A2 */ op!("stelem.ref", None, 3, 0, Sequential),
    /* A3 */ op!("ldelem", Token, 2, 1, Sequential),
    /* A4 */ op!("stelem", Token, 3, 0, Sequential),
    /* A5 */ op!("unbox.any", Token, 1, 1, Sequential),
    /* A6 */ RESERVED,
    /* A7 */ RESERVED,
    /* A8 */ RESERVED,
    /* A9 */ RESERVED,
    /* AA */ RESERVED,
    /* AB */ RESERVED,
    /* AC */ RESERVED,
    /* AD */ RESERVED,
    /* AE */ RESERVED,
    /* AF */ RESERVED,
    /* B0 */ RESERVED,
    /* B1 */ RESERVED,
    /* B2 */ RESERVED,
    /* B3 */ op!("conv.ovf.i1", None, 1, 1, Sequential),
    /* B4 */ op!("conv.ovf.u1", None, 1, 1, Sequential),
    /* B5 */ op!("conv.ovf.i2", None, 1, 1, Sequential),
    /* B6 */ op!("conv.ovf.u2", None, 1, 1, Sequential),
    /* B7 */ op!("conv.ovf.i4", None, 1, 1, Sequential),
    /* B8 */ op!("conv.ovf.u4", None, 1, 1, Sequential),
    /* B9 */ op!("conv.ovf.i8", None, 1, 1, Sequential),
    /* BA */ op!("conv.ovf.u8", None, 1, 1, Sequential),
    /* BB */ RESERVED,
    /* BC */ RESERVED,
    /* BD */ RESERVED,
    /* BE */ RESERVED,
    /* BF */ RESERVED,
    /* C0 */ RESERVED,
    /* C1 */ RESERVED,
    /* C2 */ op!("refanyval", Token, 1, 1, Sequential),
    /* C3 */ op!("ckfinite", None, 1, 1, Sequential),
    /* C4 */ RESERVED,
    /* C5 */ RESERVED,
    /* C6 */ op!("mkrefany", Token, 1, 1, Sequential),
    /* C7 */ RESERVED,
    /* C8 */ RESERVED,
    /* C9 */ RESERVED,
    /* CA */ RESERVED,
    /* CB */ RESERVED,
    /* CC */ RESERVED,
    /* CD */ RESERVED,
    /* CE */ RESERVED,
    /* CF */ RESERVED,
    /* D0 */ op!("ldtoken", Token, 0, 1, Sequential),
    /* D1 */ op!("conv.u2", None, 1, 1, Sequential),
    /* D2 */ op!("conv.u1", None, 1, 1, Sequential),
    /* D3 */ op!("conv.i", None, 1, 1, Sequential),
    /* D4 */ op!("conv.ovf.i", None, 1, 1, Sequential),
    /* D5 */ op!("conv.ovf.u", None, 1, 1, Sequential),
    /* D6 */ op!("add.ovf", None, 2, 1, Sequential),
    /* D7 */ op!("add.ovf.un", None, 2, 1, Sequential),
    /* D8 */ op!("mul.ovf", None, 2, 1, Sequential),
    /* D9 */ op!("mul.ovf.un", None, 2, 1, Sequential),
    /* DA */ op!("sub.ovf", None, 2, 1, Sequential),
    /* DB */ op!("sub.ovf.un", None, 2, 1, Sequential),
    /* DC */ op!("endfinally", None, 0, 0, EndFinally),
    /* DD */ op!("leave", Branch, VAR, 0, Leave),
    /* DE */ op!("leave.s", ShortBranch, VAR, 0, Leave),
    /* DF */ op!("stind.i", None, 2, 0, Sequential),
    /* E0 */ op!("conv.u", None, 1, 1, Sequential),];

/// Opcodes behind the `0xFE` prefix.
pub static INSTRUCTIONS_FE: [CilInstruction; 0x1F] = [
    /* 00 */ op!("arglist", None, 0, 1, Sequential),
    /* 01 */ op!("ceq", None, 2, 1, Sequential),
    /* 02 */ op!("cgt", None, 2, 1, Sequential),
    /* 03 */ op!("cgt.un", None, 2, 1, Sequential),
    /* 04 */ op!("clt", None, 2, 1, Sequential),
    /* 05 */ op!("clt.un", None, 2, 1, Sequential),
    /* 06 */ op!("ldftn", Token, 0, 1, Sequential),
    /* 07 */ op!("ldvirtftn", Token, 1, 1, Sequential),
    /* 08 */ RESERVED,
    /* 09 */ op!("ldarg", UInt16, 0, 1, Sequential),
    /* 0A */ op!("ldarga", UInt16, 0, 1, Sequential),
    /* 0B */ op!("starg", UInt16, 1, 0, Sequential),
    /* 0C */ op!("ldloc", UInt16, 0, 1, Sequential),
    /* 0D */ op!("ldloca", UInt16, 0, 1, Sequential),
    /* 0E */ op!("stloc", UInt16, 1, 0, Sequential),
    /* 0F */ op!("localloc", None, 1, 1, Sequential),
    /* 10 */ RESERVED,
    /* 11 */ op!("endfilter", None, 1, 0, EndFilter),
    /* 12 */ op!("unaligned.", UInt8, 0, 0, Prefix),
    /* 13 */ op!("volatile.", None, 0, 0, Prefix),
    /* 14 */ op!("tail.", None, 0, 0, Prefix),
    /* 15 */ op!("initobj", Token, 1, 0, Sequential),
    /* 16 */ op!("constrained.", Token, 0, 0, Prefix),
    /* 17 */ op!("cpblk", None, 3, 0, Sequential),
    /* 18 */ op!("initblk", None, 3, 0, Sequential),
    /* 19 */ op!("no.", UInt8, 0, 0, Prefix),
    /* 1A */ op!("rethrow", None, 0, 0, Throw),
    /* 1B */ RESERVED,
    /* 1C */ op!("sizeof", Token, 0, 1, Sequential),
    /* 1D */ op!("refanytype", None, 1, 1, Sequential),
    /* 1E */ op!("readonly.", None, 0, 0, Prefix),];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_shape() {
        let assigned = INSTRUCTIONS.iter().filter(|i| !i.is_reserved()).count();
        assert_eq!(assigned, 191);
        let assigned_fe = INSTRUCTIONS_FE.iter().filter(|i| !i.is_reserved()).count();
        assert_eq!(assigned_fe, 28);

        assert_eq!(INSTRUCTIONS[0x2A].mnemonic, "ret");
        assert_eq!(INSTRUCTIONS[0x45].op_type, OperandType::Switch);
        assert_eq!(INSTRUCTIONS[0xDE].mnemonic, "leave.s");
        assert_eq!(INSTRUCTIONS_FE[0x01].mnemonic, "ceq");
        assert!(INSTRUCTIONS[0x24].is_reserved());
    }

    #[test]
    fn test_branch_pairs_are_thirteen_apart() {
        for short in 0x2B..=0x37 {
            let s = &INSTRUCTIONS[short];
            let l = &INSTRUCTIONS[short + 13];
            assert_eq!(s.op_type, OperandType::ShortBranch);
            assert_eq!(l.op_type, OperandType::Branch);
            assert_eq!(s.mnemonic.trim_end_matches(".s"), l.mnemonic);
            assert_eq!(s.stack_pops, l.stack_pops);
        }
    }

    #[test]
    fn test_mnemonics_are_unique() {
        let mut seen = std::collections::HashSet::new();
        for instr in INSTRUCTIONS.iter().chain(INSTRUCTIONS_FE.iter()) {
            if !instr.is_reserved() {
                assert!(seen.insert(instr.mnemonic), "{}", instr.mnemonic);
            }
        }
    }
}
