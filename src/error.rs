//! Crate-wide error taxonomy (spec §7): decode faults, memory faults, and
//! the CPU's terminating events, each a `thiserror`-derived enum in the
//! hosted style (the teacher's `no_std` build hand-rolls `Display`
//! because it has no `alloc`-backed derive macros available; this crate
//! is hosted, so it uses the derive like every other crate in the pack).

use thiserror::Error;

pub use crate::bitbuffer::BufferError;
pub use crate::memory::MemoryError;

/// Faults raised while turning bytes into an `Instruction` (spec §4.3,
/// §7). The decoder never panics on untrusted bytes — every one of
/// these is a `Result::Err`, not a panic.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// No table entry maps this opcode byte — the instruction is outside
    /// the ~80-opcode subset this crate understands.
    #[error("unknown opcode: {0:02x?}")]
    UnknownOpcode(Vec<u8>),
    /// The opcode slot is explicitly reserved by the table (e.g. the
    /// `0F 0F` 3DNow! escape).
    #[error("reserved opcode: {0:02x?}")]
    ReservedOpcode(Vec<u8>),
    /// The buffer ran out of bytes mid-instruction, or the instruction
    /// exceeded the 15-byte x86-64 length limit.
    #[error("instruction decode ran out of bounds")]
    OutOfBounds,
}

impl From<BufferError> for DecodeError {
    fn from(_: BufferError) -> Self {
        DecodeError::OutOfBounds
    }
}

/// The terminating events `Cpu::execute`/`execute_one` can surface (spec
/// §4.7, §7). `Halted` is the only one that is not itself an error — HLT
/// is normal program termination.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TerminatingEvent {
    /// HLT executed — normal termination.
    #[error("cpu halted")]
    Halted,
    /// A PUSH (or CALL's implicit push) would drive RSP below the
    /// configured stack window.
    #[error("stack overflow")]
    StackOverflow,
    /// A POP (or RET's implicit pop) was attempted with RSP already at
    /// the top of the configured stack window.
    #[error("stack underflow")]
    StackUnderflow,
    /// A read, write, or instruction fetch violated the `MemoryController`'s
    /// permission or initialization checks.
    #[error("illegal memory access: {0}")]
    IllegalMemoryAccess(#[from] MemoryError),
    /// The decoder hit an opcode byte with no table entry.
    #[error("unknown opcode: {0:02x?}")]
    UnknownOpcode(Vec<u8>),
    /// The decoder hit an opcode byte explicitly marked reserved.
    #[error("reserved opcode: {0:02x?}")]
    ReservedOpcode(Vec<u8>),
    /// A pre-step hook (spec §6's debugger seam) requested a pause
    /// before the instruction at the current RIP dispatches.
    #[error("breakpoint")]
    Breakpoint,
}

impl From<DecodeError> for TerminatingEvent {
    fn from(e: DecodeError) -> Self {
        match e {
            DecodeError::UnknownOpcode(bytes) => TerminatingEvent::UnknownOpcode(bytes),
            DecodeError::ReservedOpcode(bytes) => TerminatingEvent::ReservedOpcode(bytes),
            DecodeError::OutOfBounds => TerminatingEvent::UnknownOpcode(Vec::new()),
        }
    }
}

pub type Result<T> = std::result::Result<T, DecodeError>;
