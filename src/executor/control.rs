//! Control-flow instruction handlers (spec §4.7): CALL, RET, JMP, Jcc,
//! HLT, INT.
//!
//! None of these call [`super::advance`] on the taken path — they set RIP
//! directly, which is exactly the case `advance` exists to be skipped for
//! (spec §4.7: "advance RIP... unless the instruction modifies RIP").

use crate::cpu::Cpu;
use crate::error::TerminatingEvent;
use crate::flags;
use crate::model::{ConditionCode, Instruction, Operand, Width};

use super::{advance, read_memory, read_operand, write_memory};

/// CALL `target`: pushes the return address (the address right after this
/// CALL, computed from its decoded length rather than a hardcoded 5 —
/// spec §9's open question on variable-length CALL encodings) and jumps.
pub fn exec_call(cpu: &mut Cpu, inst: &Instruction) -> Result<(), TerminatingEvent> {
    let target = resolve_target(cpu, inst, &inst.operands[0])?;
    let return_addr = cpu.registers.rip().wrapping_add(inst.length as u64);
    let new_rsp = cpu.registers.rsp().wrapping_sub(8);
    cpu.check_push(new_rsp)?;
    write_memory(cpu, new_rsp, Width::Qword, return_addr)?;
    cpu.registers.set_rsp(new_rsp);
    cpu.registers.set_rip(target);
    Ok(())
}

/// RET (optionally `RET imm16`): pops the return address and jumps, then
/// discards `imm16` additional bytes of argument space off the stack.
pub fn exec_ret(cpu: &mut Cpu, inst: &Instruction) -> Result<(), TerminatingEvent> {
    let rsp = cpu.registers.rsp();
    cpu.check_pop(rsp)?;
    let target = read_memory(cpu, rsp, Width::Qword)?;
    let mut new_rsp = rsp.wrapping_add(8);
    if let Some(Operand::Immediate(imm)) = inst.operands.first() {
        new_rsp = new_rsp.wrapping_add(imm.value);
    }
    cpu.registers.set_rsp(new_rsp);
    cpu.registers.set_rip(target);
    Ok(())
}

/// JMP `target`: unconditional.
pub fn exec_jmp(cpu: &mut Cpu, inst: &Instruction) -> Result<(), TerminatingEvent> {
    let target = resolve_target(cpu, inst, &inst.operands[0])?;
    cpu.registers.set_rip(target);
    Ok(())
}

/// Jcc `rel8/rel32`: taken only when `cc` holds against the current
/// RFLAGS; otherwise falls through like any other instruction.
pub fn exec_jcc(cpu: &mut Cpu, inst: &Instruction, cc: ConditionCode) -> Result<(), TerminatingEvent> {
    if flags::eval_condition(cc, cpu.registers.rflags()) {
        let target = match &inst.operands[0] {
            Operand::RelativeTarget(t) => *t,
            other => panic!("Jcc target must be a relative target, got {other:?}"),
        };
        cpu.registers.set_rip(target);
    } else {
        advance(cpu, inst);
    }
    Ok(())
}

/// HLT: advances past itself (so RIP lands where a resumed CPU should
/// refetch) and then reports termination.
pub fn exec_hlt(cpu: &mut Cpu, inst: &Instruction) -> Result<(), TerminatingEvent> {
    advance(cpu, inst);
    Err(TerminatingEvent::Halted)
}

/// INT `imm8`: decodes and advances RIP, but otherwise executes as a
/// no-op. Interrupt delivery — an IDT, a privilege-level transition, a
/// vectored handler — is out of scope (spec §1's Non-goals); this crate
/// has no controller behind the vector to hand the trap to.
pub fn exec_int(cpu: &mut Cpu, inst: &Instruction) -> Result<(), TerminatingEvent> {
    advance(cpu, inst);
    Ok(())
}

/// A CALL/JMP target is either an already-resolved `RelativeTarget` or an
/// indirect `r/m64` operand that must be read like any other source.
fn resolve_target(cpu: &mut Cpu, inst: &Instruction, op: &Operand) -> Result<u64, TerminatingEvent> {
    match op {
        Operand::RelativeTarget(t) => Ok(*t),
        _ => read_operand(cpu, inst, op, Width::Qword),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::EmulatorConfig;
    use crate::model::Register;

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
    fn call_pushes_address_after_call_and_ret_restores_it() {
        // 0x1000: call +5 (to 0x1007) ; 0x1005: hlt
        // 0x1007: nop ; ret
        let mut cpu = cpu_with_code(&[0xE8, 0x02, 0x00, 0x00, 0x00, 0xF4, 0x90, 0xC3]);
        let event = cpu.execute();
        assert_eq!(event, TerminatingEvent::Halted);
        assert_eq!(cpu.registers.rip(), 0x1006);
        assert_eq!(cpu.registers.rsp(), cpu.stack_top());
    }

    #[test]
    fn jcc_not_taken_falls_through() {
        // xor eax, eax ; jne +10 ; mov ecx, 1 ; hlt
        let mut cpu = cpu_with_code(&[0x31, 0xC0, 0x0F, 0x85, 0x0A, 0x00, 0x00, 0x00, 0xB9, 1, 0, 0, 0, 0xF4]);
        cpu.execute();
        assert_eq!(cpu.registers.get32(Register::gpr(1, crate::model::Width::Dword)), 1);
    }

    #[test]
    fn hlt_advances_rip_before_halting() {
        let mut cpu = cpu_with_code(&[0xF4]); // hlt
        let event = cpu.execute();
        assert_eq!(event, TerminatingEvent::Halted);
        assert_eq!(cpu.registers.rip(), 0x1001);
    }
}
