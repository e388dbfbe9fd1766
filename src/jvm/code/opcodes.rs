//! Raw opcodes and instruction lengths
//!
//! Editing existing code means working on the encoded bytes directly: every instruction the
//! method already has must survive an edit unchanged (apart from branch offsets). This module
//! knows just enough about the encoding to walk from one instruction to the next.
//!
//! [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-6.html

use crate::jvm::Error;

pub const NOP: u8 = 0x00;
pub const ACONST_NULL: u8 = 0x01;
pub const ICONST_M1: u8 = 0x02;
pub const ICONST_0: u8 = 0x03;
pub const ICONST_1: u8 = 0x04;
pub const ICONST_2: u8 = 0x05;
pub const ICONST_3: u8 = 0x06;
pub const ICONST_4: u8 = 0x07;
pub const ICONST_5: u8 = 0x08;
pub const LCONST_0: u8 = 0x09;
pub const LCONST_1: u8 = 0x0a;
pub const FCONST_0: u8 = 0x0b;
pub const FCONST_1: u8 = 0x0c;
pub const FCONST_2: u8 = 0x0d;
pub const DCONST_0: u8 = 0x0e;
pub const DCONST_1: u8 = 0x0f;
pub const BIPUSH: u8 = 0x10;
pub const SIPUSH: u8 = 0x11;
pub const LDC: u8 = 0x12;
pub const LDC_W: u8 = 0x13;
pub const LDC2_W: u8 = 0x14;
pub const ILOAD: u8 = 0x15;
pub const LLOAD: u8 = 0x16;
pub const FLOAD: u8 = 0x17;
pub const DLOAD: u8 = 0x18;
pub const ALOAD: u8 = 0x19;
pub const ILOAD_0: u8 = 0x1a;
pub const ILOAD_3: u8 = 0x1d;
pub const LLOAD_0: u8 = 0x1e;
pub const LLOAD_3: u8 = 0x21;
pub const FLOAD_0: u8 = 0x22;
pub const DLOAD_0: u8 = 0x26;
pub const ALOAD_0: u8 = 0x2a;
pub const ALOAD_3: u8 = 0x2d;
pub const IALOAD: u8 = 0x2e;
pub const SALOAD: u8 = 0x35;
pub const ISTORE: u8 = 0x36;
pub const LSTORE: u8 = 0x37;
pub const FSTORE: u8 = 0x38;
pub const DSTORE: u8 = 0x39;
pub const ASTORE: u8 = 0x3a;
pub const ISTORE_0: u8 = 0x3b;
pub const LSTORE_0: u8 = 0x3f;
pub const FSTORE_0: u8 = 0x43;
pub const DSTORE_0: u8 = 0x47;
pub const ASTORE_0: u8 = 0x4b;
pub const ASTORE_3: u8 = 0x4e;
pub const IASTORE: u8 = 0x4f;
pub const SASTORE: u8 = 0x56;
pub const POP: u8 = 0x57;
pub const POP2: u8 = 0x58;
pub const DUP: u8 = 0x59;
pub const DUP_X1: u8 = 0x5a;
pub const DUP_X2: u8 = 0x5b;
pub const DUP2: u8 = 0x5c;
pub const DUP2_X1: u8 = 0x5d;
pub const DUP2_X2: u8 = 0x5e;
pub const SWAP: u8 = 0x5f;
pub const IADD: u8 = 0x60;
pub const LADD: u8 = 0x61;
pub const ISUB: u8 = 0x64;
pub const IMUL: u8 = 0x68;
pub const IDIV: u8 = 0x6c;
pub const IREM: u8 = 0x70;
pub const INEG: u8 = 0x74;
pub const LNEG: u8 = 0x75;
pub const FNEG: u8 = 0x76;
pub const DNEG: u8 = 0x77;
pub const ISHL: u8 = 0x78;
pub const IAND: u8 = 0x7e;
pub const IOR: u8 = 0x80;
pub const IXOR: u8 = 0x82;
pub const LXOR: u8 = 0x83;
pub const IINC: u8 = 0x84;
pub const I2L: u8 = 0x85;
pub const I2S: u8 = 0x93;
pub const LCMP: u8 = 0x94;
pub const FCMPL: u8 = 0x95;
pub const FCMPG: u8 = 0x96;
pub const DCMPL: u8 = 0x97;
pub const DCMPG: u8 = 0x98;
pub const IFEQ: u8 = 0x99;
pub const IFNE: u8 = 0x9a;
pub const IFLT: u8 = 0x9b;
pub const IFGE: u8 = 0x9c;
pub const IFGT: u8 = 0x9d;
pub const IFLE: u8 = 0x9e;
pub const IF_ICMPEQ: u8 = 0x9f;
pub const IF_ICMPNE: u8 = 0xa0;
pub const IF_ICMPLT: u8 = 0xa1;
pub const IF_ICMPGE: u8 = 0xa2;
pub const IF_ICMPGT: u8 = 0xa3;
pub const IF_ICMPLE: u8 = 0xa4;
pub const IF_ACMPEQ: u8 = 0xa5;
pub const IF_ACMPNE: u8 = 0xa6;
pub const GOTO: u8 = 0xa7;
pub const JSR: u8 = 0xa8;
pub const RET: u8 = 0xa9;
pub const TABLESWITCH: u8 = 0xaa;
pub const LOOKUPSWITCH: u8 = 0xab;
pub const IRETURN: u8 = 0xac;
pub const LRETURN: u8 = 0xad;
pub const FRETURN: u8 = 0xae;
pub const DRETURN: u8 = 0xaf;
pub const ARETURN: u8 = 0xb0;
pub const RETURN: u8 = 0xb1;
pub const GETSTATIC: u8 = 0xb2;
pub const PUTSTATIC: u8 = 0xb3;
pub const GETFIELD: u8 = 0xb4;
pub const PUTFIELD: u8 = 0xb5;
pub const INVOKEVIRTUAL: u8 = 0xb6;
pub const INVOKESPECIAL: u8 = 0xb7;
pub const INVOKESTATIC: u8 = 0xb8;
pub const INVOKEINTERFACE: u8 = 0xb9;
pub const INVOKEDYNAMIC: u8 = 0xba;
pub const NEW: u8 = 0xbb;
pub const NEWARRAY: u8 = 0xbc;
pub const ANEWARRAY: u8 = 0xbd;
pub const ARRAYLENGTH: u8 = 0xbe;
pub const ATHROW: u8 = 0xbf;
pub const CHECKCAST: u8 = 0xc0;
pub const INSTANCEOF: u8 = 0xc1;
pub const MONITORENTER: u8 = 0xc2;
pub const MONITOREXIT: u8 = 0xc3;
pub const WIDE: u8 = 0xc4;
pub const MULTIANEWARRAY: u8 = 0xc5;
pub const IFNULL: u8 = 0xc6;
pub const IFNONNULL: u8 = 0xc7;
pub const GOTO_W: u8 = 0xc8;
pub const JSR_W: u8 = 0xc9;

/// Opcodes of the return instructions (`ireturn` through `return`)
pub const fn is_return(opcode: u8) -> bool {
    matches!(opcode, IRETURN..=RETURN)
}

pub const fn is_switch(opcode: u8) -> bool {
    matches!(opcode, TABLESWITCH | LOOKUPSWITCH)
}

/// Conditional branches with a 16-bit offset
pub const fn is_conditional_branch(opcode: u8) -> bool {
    matches!(opcode, IFEQ..=IF_ACMPNE | IFNULL | IFNONNULL)
}

/// Conditional branch testing the opposite condition
///
/// Conditions come in pairs of adjacent opcodes (`ifeq`/`ifne`, `iflt`/`ifge`, ...) with the
/// exception of `ifnull`/`ifnonnull` which are also adjacent but start on an even opcode.
pub const fn invert_branch(opcode: u8) -> Option<u8> {
    match opcode {
        IFEQ..=IF_ACMPNE => {
            if (opcode - IFEQ) % 2 == 0 {
                Some(opcode + 1)
            } else {
                Some(opcode - 1)
            }
        }
        IFNULL => Some(IFNONNULL),
        IFNONNULL => Some(IFNULL),
        _ => None,
    }
}

/// Number of bytes of padding after a switch opcode at `offset`
///
/// The operands of `tableswitch` and `lookupswitch` start on the next multiple of 4 (relative to
/// the start of the code).
pub const fn switch_padding(offset: usize) -> usize {
    (4 - (offset + 1) % 4) % 4
}

/// Read a big-endian `i32` out of code, checking that the instruction at `start` is not truncated
pub fn read_i32(code: &[u8], at: usize, start: usize) -> Result<i32, Error> {
    match code.get(at..at + 4) {
        Some(bytes) => Ok(i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])),
        None => Err(Error::TruncatedInstruction(start)),
    }
}

/// Read a big-endian `i16` out of code, checking that the instruction at `start` is not truncated
pub fn read_i16(code: &[u8], at: usize, start: usize) -> Result<i16, Error> {
    match code.get(at..at + 2) {
        Some(bytes) => Ok(i16::from_be_bytes([bytes[0], bytes[1]])),
        None => Err(Error::TruncatedInstruction(start)),
    }
}

/// Length in bytes of the instruction starting at `offset`
pub fn instruction_width(code: &[u8], offset: usize) -> Result<usize, Error> {
    let opcode = *code
        .get(offset)
        .ok_or(Error::InvalidInstructionBoundary(offset))?;
    let width = match opcode {
        BIPUSH | LDC | ILOAD..=ALOAD | ISTORE..=ASTORE | RET | NEWARRAY => 2,
        SIPUSH | LDC_W | LDC2_W | IINC | IFEQ..=JSR | IFNULL | IFNONNULL => 3,
        GETSTATIC..=INVOKESTATIC | NEW | ANEWARRAY | CHECKCAST | INSTANCEOF => 3,
        MULTIANEWARRAY => 4,
        INVOKEINTERFACE | INVOKEDYNAMIC | GOTO_W | JSR_W => 5,
        WIDE => match code.get(offset + 1) {
            Some(&IINC) => 6,
            Some(&(ILOAD..=ALOAD | ISTORE..=ASTORE | RET)) => 4,
            Some(&modified) => {
                return Err(Error::UnknownOpcode {
                    offset: offset + 1,
                    opcode: modified,
                })
            }
            None => return Err(Error::TruncatedInstruction(offset)),
        },
        TABLESWITCH => {
            let operands = offset + 1 + switch_padding(offset);
            let low = read_i32(code, operands + 4, offset)? as i64;
            let high = read_i32(code, operands + 8, offset)? as i64;
            if high < low {
                return Err(Error::TruncatedInstruction(offset));
            }
            operands + 12 + 4 * (high - low + 1) as usize - offset
        }
        LOOKUPSWITCH => {
            let operands = offset + 1 + switch_padding(offset);
            let npairs = read_i32(code, operands + 4, offset)?;
            if npairs < 0 {
                return Err(Error::TruncatedInstruction(offset));
            }
            operands + 8 + 8 * npairs as usize - offset
        }
        NOP..=DCONST_1 | ILOAD_0..=SALOAD | ISTORE_0..=DCMPG | IRETURN..=RETURN => 1,
        ARRAYLENGTH | ATHROW | MONITORENTER | MONITOREXIT => 1,
        _ => return Err(Error::UnknownOpcode { offset, opcode }),
    };
    if offset + width > code.len() {
        return Err(Error::TruncatedInstruction(offset));
    }
    Ok(width)
}

/// Offsets at which every instruction in the code starts
pub fn instruction_starts(code: &[u8]) -> Result<Vec<usize>, Error> {
    let mut starts = vec![];
    let mut offset = 0;
    while offset < code.len() {
        starts.push(offset);
        offset += instruction_width(code, offset)?;
    }
    Ok(starts)
}

/// Whether the code has a `tableswitch` or `lookupswitch`, whose padding depends on alignment
pub fn contains_switch(code: &[u8]) -> Result<bool, Error> {
    Ok(instruction_starts(code)?
        .into_iter()
        .any(|offset| is_switch(code[offset])))
}
