//! Stack instruction handlers (spec §4.7, §4.7a): PUSH, POP.
//!
//! Both funnel through `Cpu::check_push`/`check_pop` *before* touching
//! memory or RSP — the stack window's enforcement point (spec §4.7:
//! "before any write").

use crate::cpu::Cpu;
use crate::error::TerminatingEvent;
use crate::model::Instruction;

use super::{advance, operand_width, read_memory, read_operand, write_memory, write_operand};

/// PUSH `src`: `RSP -= width; mem[RSP] = src`.
pub fn exec_push(cpu: &mut Cpu, inst: &Instruction) -> Result<(), TerminatingEvent> {
    let src = &inst.operands[0];
    let width = operand_width(src);
    let val = read_operand(cpu, inst, src, width)?;
    let new_rsp = cpu.registers.rsp().wrapping_sub(width.bytes() as u64);
    cpu.check_push(new_rsp)?;
    write_memory(cpu, new_rsp, width, val)?;
    cpu.registers.set_rsp(new_rsp);
    advance(cpu, inst);
    Ok(())
}

/// POP `dst`: `dst = mem[RSP]; RSP += width`.
pub fn exec_pop(cpu: &mut Cpu, inst: &Instruction) -> Result<(), TerminatingEvent> {
    let dst = &inst.operands[0];
    let width = operand_width(dst);
    let rsp = cpu.registers.rsp();
    cpu.check_pop(rsp)?;
    let val = read_memory(cpu, rsp, width)?;
    write_operand(cpu, inst, dst, width, val)?;
    cpu.registers.set_rsp(rsp.wrapping_add(width.bytes() as u64));
    advance(cpu, inst);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::EmulatorConfig;
    use crate::model::{Register, Width};

    fn cpu_with_code(code: &[u8]) -> Cpu {
        let mut cpu = Cpu::new(EmulatorConfig::new(0x2000, 0x1000));
        cpu.memory.initialize(0x1000, code);
        cpu.memory.set_permissions(0x1000, code.len() as u64, true, false, true);
        cpu.memory.set_permissions(cpu.stack_floor(), cpu.stack_size(), true, true, false);
        cpu.set_instruction_pointer(0x1000);
        cpu.registers.set_rsp(cpu.stack_top());
        cpu
    }

    #[test]
    fn push_pop_round_trips_through_memory() {
        // mov rax, 0x2a ; push rax ; pop rcx ; hlt
        let mut cpu = cpu_with_code(&[0x48, 0xC7, 0xC0, 0x2A, 0x00, 0x00, 0x00, 0x50, 0x59, 0xF4]);
        cpu.execute();
        assert_eq!(cpu.registers.rsp(), cpu.stack_top());
        assert_eq!(cpu.registers.get64(Register::gpr(1, Width::Qword)), 0x2a);
    }

    #[test]
    fn push_checks_window_before_writing_memory() {
        let mut cpu = cpu_with_code(&[0x50, 0xF4]); // push rax ; hlt
        cpu.registers.set_rsp(cpu.stack_floor());
        let event = cpu.execute();
        assert_eq!(event, TerminatingEvent::StackOverflow);
        // RSP itself must not have moved once the check rejected the write.
        assert_eq!(cpu.registers.rsp(), cpu.stack_floor());
    }
}
