//! Bitwise instruction handlers (spec §4.7): AND, OR, XOR, TEST, NOT.
//!
//! `exec_alu` covers AND/OR/XOR, which share the `flags_logic` shape
//! (CF/OF always cleared). TEST is AND without the write-back. NOT
//! touches no flags at all, per the ISA.

use crate::cpu::Cpu;
use crate::error::TerminatingEvent;
use crate::flags;
use crate::model::{Instruction, Opcode};

use super::{advance, operand_width, read_operand, write_operand};

/// AND/OR/XOR `dst, src` (spec §4.7's logic row).
pub fn exec_alu(cpu: &mut Cpu, inst: &Instruction, opcode: Opcode) -> Result<(), TerminatingEvent> {
    let dst = &inst.operands[0];
    let src = &inst.operands[1];
    let width = operand_width(dst);
    let dst_val = read_operand(cpu, inst, dst, width)?;
    let src_val = read_operand(cpu, inst, src, width)?;

    let result = match opcode {
        Opcode::And => dst_val & src_val,
        Opcode::Or => dst_val | src_val,
        Opcode::Xor => dst_val ^ src_val,
        other => unreachable!("logic::exec_alu dispatched with non-logic opcode {other:?}"),
    };

    let flag_bits = flags::flags_logic(result, width);
    cpu.registers.update_flags(flags::ARITH_MASK, flag_bits);
    write_operand(cpu, inst, dst, width, result)?;
    advance(cpu, inst);
    Ok(())
}

/// TEST `a, b`: computes `a & b` for the flags only, never writes back.
pub fn exec_test(cpu: &mut Cpu, inst: &Instruction) -> Result<(), TerminatingEvent> {
    let a = &inst.operands[0];
    let b = &inst.operands[1];
    let width = operand_width(a);
    let a_val = read_operand(cpu, inst, a, width)?;
    let b_val = read_operand(cpu, inst, b, width)?;
    let flag_bits = flags::flags_logic(a_val & b_val, width);
    cpu.registers.update_flags(flags::ARITH_MASK, flag_bits);
    advance(cpu, inst);
    Ok(())
}

/// NOT `r/m`: one's-complement, no flags affected.
pub fn exec_not(cpu: &mut Cpu, inst: &Instruction) -> Result<(), TerminatingEvent> {
    let dst = &inst.operands[0];
    let width = operand_width(dst);
    let val = read_operand(cpu, inst, dst, width)?;
    let result = !val & width.mask();
    write_operand(cpu, inst, dst, width, result)?;
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
        cpu.memory.set_permissions(0x1000, code.len() as u64, true, true, true);
        cpu.set_instruction_pointer(0x1000);
        cpu
    }

    #[test]
    fn and_clears_overflow_and_carry() {
        // mov eax, 0xff ; and eax, 0x0f ; hlt
        let mut cpu = cpu_with_code(&[0xB8, 0xFF, 0, 0, 0, 0x25, 0x0F, 0, 0, 0, 0xF4]);
        cpu.registers.set_flag(flags::CF, true);
        cpu.registers.set_flag(flags::OF, true);
        cpu.execute();
        assert_eq!(cpu.registers.get32(Register::gpr(0, Width::Dword)), 0x0f);
        assert!(!cpu.registers.is_set(flags::CF));
        assert!(!cpu.registers.is_set(flags::OF));
    }

    #[test]
    fn test_does_not_write_back() {
        // mov eax, 0x0f ; test eax, 0xff ; hlt
        let mut cpu = cpu_with_code(&[0xB8, 0x0F, 0, 0, 0, 0xA9, 0xFF, 0, 0, 0, 0xF4]);
        cpu.execute();
        assert_eq!(cpu.registers.get32(Register::gpr(0, Width::Dword)), 0x0f);
        assert!(!cpu.registers.is_set(flags::ZF));
    }

    #[test]
    fn not_leaves_flags_untouched() {
        // xor eax, eax ; not eax ; hlt
        let mut cpu = cpu_with_code(&[0x31, 0xC0, 0xF7, 0xD0, 0xF4]);
        cpu.execute();
        assert_eq!(cpu.registers.get32(Register::gpr(0, Width::Dword)), 0xffff_ffff);
        assert!(cpu.registers.is_set(flags::ZF));
    }
}
