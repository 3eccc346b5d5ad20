//! The CPU driver (spec §4.7): fetch/decode/execute loop, stack-window
//! enforcement, and the pre-step hook seam (spec §4.7a).
//!
//! The teacher's `Cpu` carried real/protected/long mode switching, GDT
//! descriptor loads, and interrupt delivery because `anyOS` boots real
//! hardware. This crate only ever runs flat 64-bit user code reached by a
//! loader that has already placed segments and set permissions, so none of
//! that machinery has a counterpart here — `EmulatorConfig` replaces the
//! teacher's process-wide globals (spec §9), and `execute_one` replaces the
//! teacher's mode-aware `run` loop with a single always-long-mode path.

use log::{trace, warn};

use crate::bitbuffer::BitBuffer;
use crate::decoder::decode_one;
use crate::decoder::MAX_INSTRUCTION_LEN;
use crate::error::{DecodeError, TerminatingEvent};
use crate::executor;
use crate::memory::{Initializer, MemoryController, ZeroInitializer};
use crate::model::Instruction;
use crate::registers::RegisterFile;

/// What a pre-step hook (spec §4.7a/§6's debugger seam) asks the driver to
/// do before the instruction at the current RIP dispatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookAction {
    Continue,
    Break,
}

/// Explicit configuration threaded through the `Cpu` builder instead of the
/// teacher's process-wide globals (spec §9's "Global mutable state" note):
/// the stack window and the two `MemoryController` enforcement toggles.
pub struct EmulatorConfig {
    pub stack_top: u64,
    pub stack_size: u64,
    pub initializer: Box<dyn Initializer>,
    pub check_permissions: bool,
    pub check_uninitialized_read: bool,
}

impl EmulatorConfig {
    /// A stack window of `stack_size` bytes ending at `stack_top`, with a
    /// zero-fill initializer and permission checks on, matching spec §4.7's
    /// stack policy and §4.6's default checked posture.
    pub fn new(stack_top: u64, stack_size: u64) -> Self {
        EmulatorConfig {
            stack_top,
            stack_size,
            initializer: Box::new(ZeroInitializer),
            check_permissions: true,
            check_uninitialized_read: false,
        }
    }

    pub fn with_initializer(mut self, initializer: Box<dyn Initializer>) -> Self {
        self.initializer = initializer;
        self
    }

    pub fn with_uninitialized_read_checks(mut self, enforce: bool) -> Self {
        self.check_uninitialized_read = enforce;
        self
    }
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        // An 8 MiB window ending just below the canonical top of
        // user-space in a typical Linux x86-64 layout.
        Self::new(0x7fff_ffff_e000, 0x0080_0000)
    }
}

/// Drives one `RegisterFile` against one `MemoryController`: fetches at
/// RIP, decodes via [`decode_one`], dispatches through [`executor`], and
/// enforces the stack window spec §4.7 names.
pub struct Cpu {
    pub registers: RegisterFile,
    pub memory: MemoryController,
    stack_top: u64,
    stack_size: u64,
    pre_step_hook: Option<Box<dyn FnMut(&RegisterFile) -> HookAction>>,
}

impl Cpu {
    pub fn new(config: EmulatorConfig) -> Self {
        let mut memory = MemoryController::with_initializer(config.initializer);
        memory.set_break_on_wrong_permissions(config.check_permissions);
        memory.set_break_on_uninitialized_read(config.check_uninitialized_read);
        Cpu {
            registers: RegisterFile::new(),
            memory,
            stack_top: config.stack_top,
            stack_size: config.stack_size,
            pre_step_hook: None,
        }
    }

    pub fn set_instruction_pointer(&mut self, rip: u64) {
        self.registers.set_rip(rip);
    }

    pub fn get_registers(&self) -> &RegisterFile {
        &self.registers
    }

    pub fn get_registers_mut(&mut self) -> &mut RegisterFile {
        &mut self.registers
    }

    /// Installs (or clears, with `None`) the debugger pre-step hook (spec
    /// §4.7a). `execute()` calls it before every dispatch.
    pub fn set_pre_step_hook(&mut self, hook: Option<Box<dyn FnMut(&RegisterFile) -> HookAction>>) {
        self.pre_step_hook = hook;
    }

    /// Inclusive low end of the configured stack window.
    pub fn stack_floor(&self) -> u64 {
        self.stack_top.saturating_sub(self.stack_size)
    }

    pub fn stack_top(&self) -> u64 {
        self.stack_top
    }

    pub fn stack_size(&self) -> u64 {
        self.stack_size
    }

    /// A PUSH that would land below the window's floor is a `StackOverflow`
    /// (spec §4.7: "before any write").
    pub(crate) fn check_push(&self, new_rsp: u64) -> Result<(), TerminatingEvent> {
        if new_rsp < self.stack_floor() {
            return Err(TerminatingEvent::StackOverflow);
        }
        Ok(())
    }

    /// A POP with RSP already at the top of the window is a
    /// `StackUnderflow` (spec §4.7).
    pub(crate) fn check_pop(&self, rsp: u64) -> Result<(), TerminatingEvent> {
        if rsp >= self.stack_top {
            return Err(TerminatingEvent::StackUnderflow);
        }
        Ok(())
    }

    /// Fetches up to the x86-64 instruction length limit starting at
    /// `rip`, tolerating a short read once at least one byte has come back
    /// — the decoder only consumes as many of these bytes as the
    /// instruction template calls for, so bytes past the mapped region are
    /// fine as long as the instruction doesn't reach them.
    fn fetch(&mut self, rip: u64) -> Result<Vec<u8>, TerminatingEvent> {
        let mut bytes = Vec::with_capacity(MAX_INSTRUCTION_LEN as usize);
        for i in 0..MAX_INSTRUCTION_LEN {
            match self.memory.read_code(rip + i) {
                Ok(b) => bytes.push(b),
                Err(e) => {
                    if bytes.is_empty() {
                        warn!("fetch fault at {rip:#x}: {e}");
                        return Err(TerminatingEvent::IllegalMemoryAccess(e));
                    }
                    break;
                }
            }
        }
        Ok(bytes)
    }

    fn fetch_decode(&mut self, rip: u64) -> Result<Instruction, TerminatingEvent> {
        let bytes = self.fetch(rip)?;
        let mut buf = BitBuffer::new(&bytes);
        decode_one(&mut buf, rip).map_err(TerminatingEvent::from)
    }

    /// Decodes and executes the instruction at the current RIP, advancing
    /// RIP by its length unless the instruction itself redirected control
    /// flow (spec §4.7: "unless the opcode wrote RIP").
    ///
    /// Returns `Ok(Some(event))` once a terminating event has occurred,
    /// `Ok(None)` to keep running.
    pub fn execute_one(&mut self) -> Result<Option<TerminatingEvent>, DecodeError> {
        if let Some(hook) = self.pre_step_hook.as_mut() {
            if hook(&self.registers) == HookAction::Break {
                return Ok(Some(TerminatingEvent::Breakpoint));
            }
        }

        let rip = self.registers.rip();
        let inst = match self.fetch_decode(rip) {
            Ok(inst) => inst,
            Err(event) => return Ok(Some(event)),
        };
        trace!("{rip:#x}: {} ({} bytes)", inst.opcode, inst.length);

        match executor::dispatch(self, &inst) {
            Ok(()) => Ok(None),
            Err(event) => Ok(Some(event)),
        }
    }

    /// Loops `execute_one` until a terminating event surfaces (spec §4.7).
    pub fn execute(&mut self) -> TerminatingEvent {
        loop {
            match self.execute_one() {
                Ok(Some(event)) => return event,
                Ok(None) => continue,
                Err(e) => return TerminatingEvent::from(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MemoryError;
    use crate::model::{Register, Width};

    fn cpu_with_code(code: &[u8], entry: u64) -> Cpu {
        let mut cpu = Cpu::new(EmulatorConfig::new(0x2000, 0x1000));
        cpu.memory.initialize(entry, code);
        cpu.memory.set_permissions(entry, code.len() as u64, true, false, true);
        cpu.memory.set_permissions(cpu.stack_floor(), cpu.stack_size(), true, true, false);
        cpu.set_instruction_pointer(entry);
        cpu
    }

    #[test]
    fn xor_eax_eax_zeroes_register_and_sets_zf() {
        // xor eax, eax ; hlt
        let mut cpu = cpu_with_code(&[0x31, 0xC0, 0xF4], 0x1000);
        let event = cpu.execute();
        assert_eq!(event, TerminatingEvent::Halted);
        assert_eq!(cpu.registers.get64(Register::gpr(0, Width::Qword)), 0);
        assert!(cpu.registers.is_set(crate::flags::ZF));
    }

    #[test]
    fn unmapped_fetch_is_illegal_memory_access() {
        let mut cpu = Cpu::new(EmulatorConfig::new(0x2000, 0x1000));
        cpu.set_instruction_pointer(0x9999);
        let event = cpu.execute();
        assert_eq!(event, TerminatingEvent::IllegalMemoryAccess(MemoryError::IllegalExecution(0x9999)));
    }

    #[test]
    fn push_pop_round_trip_restores_stack_and_value() {
        // mov rax, 0x2a ; push rax ; pop rcx ; hlt
        let code = [0x48, 0xC7, 0xC0, 0x2A, 0x00, 0x00, 0x00, 0x50, 0x59, 0xF4];
        let mut cpu = cpu_with_code(&code, 0x1000);
        cpu.registers.set_rsp(cpu.stack_top());
        let event = cpu.execute();
        assert_eq!(event, TerminatingEvent::Halted);
        assert_eq!(cpu.registers.rsp(), cpu.stack_top());
        assert_eq!(cpu.registers.get64(Register::gpr(1, Width::Qword)), 0x2a);
    }

    #[test]
    fn push_past_stack_floor_overflows() {
        let mut cpu = cpu_with_code(&[0x50, 0xF4], 0x1000); // push rax ; hlt
        cpu.registers.set_rsp(cpu.stack_floor());
        let event = cpu.execute();
        assert_eq!(event, TerminatingEvent::StackOverflow);
    }

    #[test]
    fn pop_at_stack_top_underflows() {
        let mut cpu = cpu_with_code(&[0x58, 0xF4], 0x1000); // pop rax ; hlt
        cpu.registers.set_rsp(cpu.stack_top());
        let event = cpu.execute();
        assert_eq!(event, TerminatingEvent::StackUnderflow);
    }

    #[test]
    fn breakpoint_hook_stops_before_dispatch() {
        let mut cpu = cpu_with_code(&[0x90, 0x90, 0xF4], 0x1000); // nop ; nop ; hlt
        let mut steps = 0;
        cpu.set_pre_step_hook(Some(Box::new(move |_| {
            steps += 1;
            if steps == 2 { HookAction::Break } else { HookAction::Continue }
        })));
        let event = cpu.execute();
        assert_eq!(event, TerminatingEvent::Breakpoint);
        assert_eq!(cpu.registers.rip(), 0x1001);
    }
}
