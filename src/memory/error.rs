//! Memory-access error taxonomy (spec §7).

use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum MemoryError {
    #[error("illegal read at 0x{0:016x}")]
    IllegalRead(u64),
    #[error("illegal write of 0x{1:x} at 0x{0:016x}")]
    IllegalWrite(u64, u64),
    #[error("illegal execution at 0x{0:016x}")]
    IllegalExecution(u64),
    #[error("read of uninitialized memory at 0x{0:016x}")]
    AccessToUninitialized(u64),
}
