//! `MemoryController` — permission-checked access to a `PagedMemory`
//! (spec §3.4, §4.6).
//!
//! Three `IntervalSet`s (readable, writable, executable) gate every
//! checked access. `initialize` bypasses them entirely — it exists only
//! for the loader (spec §6) to place segment bytes before permissions are
//! even set.

use log::{debug, trace, warn};

use super::error::MemoryError;
use super::interval::IntervalSet;
use super::paged::{Initializer, PagedMemory};

type Result<T> = std::result::Result<T, MemoryError>;

/// Wraps a `PagedMemory` with R/W/X permission tracking and optional
/// enforcement toggles (spec §4.6's `setBreakOnWrongPermissions` /
/// `setBreakOnUninitializedRead`).
pub struct MemoryController {
    memory: PagedMemory,
    readable: IntervalSet,
    writable: IntervalSet,
    executable: IntervalSet,
    check_permissions: bool,
    check_uninitialized_read: bool,
}

impl MemoryController {
    pub fn new() -> Self {
        MemoryController {
            memory: PagedMemory::new(),
            readable: IntervalSet::new(),
            writable: IntervalSet::new(),
            executable: IntervalSet::new(),
            check_permissions: true,
            check_uninitialized_read: false,
        }
    }

    pub fn with_initializer(initializer: Box<dyn Initializer>) -> Self {
        MemoryController { memory: PagedMemory::with_initializer(initializer), ..Self::new() }
    }

    /// When `false`, every permission check becomes a no-op (spec §4.6:
    /// used by the non-checking debugger memory view).
    pub fn set_break_on_wrong_permissions(&mut self, enforce: bool) {
        self.check_permissions = enforce;
    }

    /// When `true`, `read`/`read2/4/8` additionally fail
    /// `AccessToUninitialized` for bytes never written.
    pub fn set_break_on_uninitialized_read(&mut self, enforce: bool) {
        self.check_uninitialized_read = enforce;
    }

    /// Sets or clears all three permission bits over `[start, start+size)`
    /// in one call (spec §4.6, the loader's per-segment entry point).
    pub fn set_permissions(&mut self, start: u64, size: u64, r: bool, w: bool, x: bool) {
        let end = start.saturating_add(size);
        trace!("set_permissions [{start:#x}, {end:#x}) r={r} w={w} x={x}");
        for (set, flag) in [(&mut self.readable, r), (&mut self.writable, w), (&mut self.executable, x)] {
            if flag {
                set.set(start, end);
            } else {
                set.reset(start, end);
            }
        }
    }

    /// Writes bytes without consulting or updating any permission set —
    /// the loader's exclusive entry point for populating segment content.
    pub fn initialize(&mut self, start: u64, bytes: &[u8]) {
        debug!("initialize {} bytes at {:#x}", bytes.len(), start);
        for (i, &b) in bytes.iter().enumerate() {
            self.memory.write(start + i as u64, b);
        }
    }

    /// `initialize` variant that fills `len` bytes with a single value.
    pub fn initialize_fill(&mut self, start: u64, len: u64, byte: u8) {
        for i in 0..len {
            self.memory.write(start + i, byte);
        }
    }

    fn check_read(&self, addr: u64) -> Result<()> {
        if self.check_permissions && !self.readable.contains(addr) {
            warn!("illegal read at {addr:#x}");
            return Err(MemoryError::IllegalRead(addr));
        }
        if self.check_uninitialized_read && !self.memory.is_initialized(addr) {
            return Err(MemoryError::AccessToUninitialized(addr));
        }
        Ok(())
    }

    fn check_write(&self, addr: u64) -> Result<()> {
        if self.check_permissions && !self.writable.contains(addr) {
            return Err(MemoryError::IllegalWrite(addr, 0));
        }
        Ok(())
    }

    fn check_execute(&self, addr: u64) -> Result<()> {
        if self.check_permissions && !self.executable.contains(addr) {
            return Err(MemoryError::IllegalExecution(addr));
        }
        Ok(())
    }

    pub fn read(&mut self, addr: u64) -> Result<u8> {
        self.check_read(addr)?;
        Ok(self.memory.read(addr))
    }

    pub fn read2(&mut self, addr: u64) -> Result<u16> {
        for i in 0..2 {
            self.check_read(addr + i)?;
        }
        Ok(self.memory.read2(addr))
    }

    pub fn read4(&mut self, addr: u64) -> Result<u32> {
        for i in 0..4 {
            self.check_read(addr + i)?;
        }
        Ok(self.memory.read4(addr))
    }

    pub fn read8(&mut self, addr: u64) -> Result<u64> {
        for i in 0..8 {
            self.check_read(addr + i)?;
        }
        Ok(self.memory.read8(addr))
    }

    /// Fetches an instruction byte — checks `X`, not `R` (spec §4.6
    /// `readCode`).
    pub fn read_code(&mut self, addr: u64) -> Result<u8> {
        self.check_execute(addr)?;
        Ok(self.memory.read(addr))
    }

    pub fn write(&mut self, addr: u64, value: u8) -> Result<()> {
        if self.check_permissions && !self.writable.contains(addr) {
            return Err(MemoryError::IllegalWrite(addr, value as u64));
        }
        self.memory.write(addr, value);
        Ok(())
    }

    pub fn write2(&mut self, addr: u64, value: u16) -> Result<()> {
        for i in 0..2 {
            if self.check_permissions && !self.writable.contains(addr + i) {
                return Err(MemoryError::IllegalWrite(addr, value as u64));
            }
        }
        self.memory.write2(addr, value);
        Ok(())
    }

    pub fn write4(&mut self, addr: u64, value: u32) -> Result<()> {
        for i in 0..4 {
            if self.check_permissions && !self.writable.contains(addr + i) {
                return Err(MemoryError::IllegalWrite(addr, value as u64));
            }
        }
        self.memory.write4(addr, value);
        Ok(())
    }

    pub fn write8(&mut self, addr: u64, value: u64) -> Result<()> {
        for i in 0..8 {
            if self.check_permissions && !self.writable.contains(addr + i) {
                return Err(MemoryError::IllegalWrite(addr, value));
            }
        }
        self.memory.write8(addr, value);
        Ok(())
    }

    pub fn is_initialized(&self, addr: u64) -> bool {
        self.memory.is_initialized(addr)
    }

    pub fn is_readable(&self, addr: u64) -> bool {
        self.readable.contains(addr)
    }
    pub fn is_writable(&self, addr: u64) -> bool {
        self.writable.contains(addr)
    }
    pub fn is_executable(&self, addr: u64) -> bool {
        self.executable.contains(addr)
    }
}

impl Default for MemoryController {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryController")
            .field("check_permissions", &self.check_permissions)
            .field("check_uninitialized_read", &self.check_uninitialized_read)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn read_only_region_rejects_write_and_execute() {
        let mut mem = MemoryController::new();
        mem.set_permissions(0x1000, 0x10, true, false, false);
        assert!(mem.read(0x1000).is_ok());
        assert_eq!(mem.write(0x1000, 1).unwrap_err(), MemoryError::IllegalWrite(0x1000, 1));
        assert_eq!(mem.read_code(0x1000).unwrap_err(), MemoryError::IllegalExecution(0x1000));
    }

    #[test]
    fn initialize_bypasses_permissions() {
        let mut mem = MemoryController::new();
        mem.initialize(0x2000, &[1, 2, 3, 4]);
        // No permissions granted yet, but the loader's initialize still worked.
        assert!(!mem.is_readable(0x2000));
        mem.set_permissions(0x2000, 4, true, true, false);
        assert_eq!(mem.read4(0x2000).unwrap(), 0x0403_0201);
    }

    #[test]
    fn uninitialized_read_flagged_only_when_enforced() {
        let mut mem = MemoryController::new();
        mem.set_permissions(0, 0x10, true, true, false);
        assert!(mem.read(0).is_ok());
        mem.set_break_on_uninitialized_read(true);
        assert_eq!(mem.read(0).unwrap_err(), MemoryError::AccessToUninitialized(0));
        mem.write(0, 5).unwrap();
        assert_eq!(mem.read(0).unwrap(), 5);
    }

    #[test]
    fn disabling_permission_checks_makes_everything_a_no_op() {
        let mut mem = MemoryController::new();
        mem.set_break_on_wrong_permissions(false);
        assert!(mem.write(0x5000, 9).is_ok());
        assert_eq!(mem.read(0x5000).unwrap(), 9);
    }

    #[test]
    fn multi_byte_write_checks_every_byte() {
        let mut mem = MemoryController::new();
        mem.set_permissions(0, 3, true, true, false);
        // Only 3 of 4 bytes are writable.
        assert!(mem.write4(0, 0xdead_beef).is_err());
    }

    proptest! {
        /// Mirrors `aero-mem`'s property module: a sequence of single-byte
        /// writes and reads over an always-permitted region agrees with a
        /// `HashMap<u64, u8>` reference model byte-for-byte.
        #[test]
        fn read_write_agrees_with_hashmap_model(
            ops in proptest::collection::vec((0u64..64, 0u8..=255u8), 0..128)
        ) {
            let mut mem = MemoryController::new();
            mem.set_permissions(0, 64, true, true, false);
            let mut model = std::collections::HashMap::new();
            for (addr, value) in ops {
                mem.write(addr, value).unwrap();
                model.insert(addr, value);
            }
            for addr in 0u64..64 {
                if let Some(&expected) = model.get(&addr) {
                    prop_assert_eq!(mem.read(addr).unwrap(), expected);
                }
            }
        }
    }
}
