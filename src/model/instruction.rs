//! The decoded instruction representation (spec §3.3) and its prefix state.

use super::operand::{Immediate, IndirectOperand};
use super::opcode::Opcode;
use super::register::{Register, SegReg};

/// Which opcode map an instruction's mnemonic came from. Only `Primary`
/// and `Secondary` are populated by this decoder; the 3-byte escape maps
/// are recognized only far enough to raise `ReservedOpcode`/`UnknownOpcode`
/// (spec §4.3: "reserved but not required for core coverage").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpcodeMap {
    Primary,
    Secondary,
}

/// Legacy + REX prefix state recorded during decode, needed again by the
/// encoder to reproduce the same byte sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Prefixes {
    pub lock: bool,
    pub repne: bool,
    pub rep: bool,
    pub segment_override: Option<SegRegOverride>,
    pub operand_size_override: bool,
    pub address_size_override: bool,
    /// `None` when no REX byte was present; `Some(rex)` stores the raw byte
    /// (low nibble `0..=0xF`, high nibble always `0b0100`).
    pub rex: Option<u8>,
}

/// Newtype so `SegReg` (already `Copy`) can implement `Default` for the
/// prefix struct without implying "ES by default" semantics anywhere else.
pub type SegRegOverride = SegReg;

impl Prefixes {
    pub fn rex_w(&self) -> bool {
        self.rex.map(|r| r & 0x8 != 0).unwrap_or(false)
    }
    pub fn rex_r(&self) -> bool {
        self.rex.map(|r| r & 0x4 != 0).unwrap_or(false)
    }
    pub fn rex_x(&self) -> bool {
        self.rex.map(|r| r & 0x2 != 0).unwrap_or(false)
    }
    pub fn rex_b(&self) -> bool {
        self.rex.map(|r| r & 0x1 != 0).unwrap_or(false)
    }
    pub fn has_rex(&self) -> bool {
        self.rex.is_some()
    }
}

/// One decoded instruction operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    Register(Register),
    Memory(IndirectOperand),
    Immediate(Immediate),
    /// A rip-relative branch target, already resolved to an absolute
    /// address at decode time (`rip_after_instruction + displacement`).
    RelativeTarget(u64),
}

/// A fully decoded x86-64 instruction: an opcode plus up to four operands
/// and the prefix state needed to re-encode it byte-for-byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub opcode: Opcode,
    pub opcode_map: OpcodeMap,
    pub operands: Vec<Operand>,
    pub prefixes: Prefixes,
    /// Length of the encoded form, in bytes. Filled in by the decoder;
    /// required by the encoder only for round-trip verification.
    pub length: u8,
}

impl Instruction {
    pub fn new(opcode: Opcode, opcode_map: OpcodeMap) -> Self {
        Instruction { opcode, opcode_map, operands: Vec::new(), prefixes: Prefixes::default(), length: 0 }
    }

    pub fn with_operands(mut self, operands: Vec<Operand>) -> Self {
        self.operands = operands;
        self
    }

    pub fn with_prefixes(mut self, prefixes: Prefixes) -> Self {
        self.prefixes = prefixes;
        self
    }

    pub fn with_length(mut self, length: u8) -> Self {
        self.length = length;
        self
    }

    pub fn operand(&self, index: usize) -> Option<&Operand> {
        self.operands.get(index)
    }
}
