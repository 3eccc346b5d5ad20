//! Arithmetic instruction handlers (spec §4.7): ADD, ADC, SUB, SBB, CMP,
//! INC, DEC, NEG.
//!
//! `exec_alu` covers the two-operand family sharing one flags shape
//! (`flags_add`/`flags_sub`); CMP is the same as SUB except it discards
//! the result. INC/DEC/NEG get their own entry points because each has a
//! different flags mask or operand count.

use crate::cpu::Cpu;
use crate::error::TerminatingEvent;
use crate::flags;
use crate::model::{Instruction, Opcode};

use super::{advance, operand_width, read_operand, write_operand};

/// ADD/ADC/SUB/SBB/CMP `dst, src` (spec §4.7's ALU row). CMP computes the
/// same result as SUB but never writes it back.
pub fn exec_alu(cpu: &mut Cpu, inst: &Instruction, opcode: Opcode) -> Result<(), TerminatingEvent> {
    let dst = &inst.operands[0];
    let src = &inst.operands[1];
    let width = operand_width(dst);
    let dst_val = read_operand(cpu, inst, dst, width)?;
    let src_val = read_operand(cpu, inst, src, width)?;
    let carry_in = u64::from(cpu.registers.is_set(flags::CF));

    let (result, flag_bits) = match opcode {
        Opcode::Add => {
            let r = dst_val.wrapping_add(src_val);
            (r, flags::flags_add(dst_val, src_val, r, width))
        }
        Opcode::Adc => {
            let r = dst_val.wrapping_add(src_val).wrapping_add(carry_in);
            (r, flags::flags_add(dst_val, src_val.wrapping_add(carry_in), r, width))
        }
        Opcode::Sub | Opcode::Cmp => {
            let r = dst_val.wrapping_sub(src_val);
            (r, flags::flags_sub(dst_val, src_val, r, width))
        }
        Opcode::Sbb => {
            let r = dst_val.wrapping_sub(src_val).wrapping_sub(carry_in);
            (r, flags::flags_sub(dst_val, src_val.wrapping_add(carry_in), r, width))
        }
        other => unreachable!("exec_alu dispatched with non-ALU opcode {other:?}"),
    };

    cpu.registers.update_flags(flags::ARITH_MASK, flag_bits);
    if !matches!(opcode, Opcode::Cmp) {
        write_operand(cpu, inst, dst, width, result)?;
    }
    advance(cpu, inst);
    Ok(())
}

/// INC `r/m`: `+1`, every arithmetic flag but CF (spec §4.7 table).
pub fn exec_inc(cpu: &mut Cpu, inst: &Instruction) -> Result<(), TerminatingEvent> {
    let dst = &inst.operands[0];
    let width = operand_width(dst);
    let val = read_operand(cpu, inst, dst, width)?;
    let result = val.wrapping_add(1);
    let flag_bits = flags::flags_inc(val, result, width);
    cpu.registers.update_flags(flags::ARITH_MASK & !flags::CF, flag_bits);
    write_operand(cpu, inst, dst, width, result)?;
    advance(cpu, inst);
    Ok(())
}

/// DEC `r/m`: `-1`, every arithmetic flag but CF (spec §4.7 table).
pub fn exec_dec(cpu: &mut Cpu, inst: &Instruction) -> Result<(), TerminatingEvent> {
    let dst = &inst.operands[0];
    let width = operand_width(dst);
    let val = read_operand(cpu, inst, dst, width)?;
    let result = val.wrapping_sub(1);
    let flag_bits = flags::flags_dec(val, result, width);
    cpu.registers.update_flags(flags::ARITH_MASK & !flags::CF, flag_bits);
    write_operand(cpu, inst, dst, width, result)?;
    advance(cpu, inst);
    Ok(())
}

/// NEG `r/m`: two's-complement negation, `dst = 0 - dst`. `flags_sub(0,
/// dst, result, width)` sets CF exactly when the operand was non-zero,
/// which matches NEG's "CF = 0 unless source is zero" rule for free.
pub fn exec_neg(cpu: &mut Cpu, inst: &Instruction) -> Result<(), TerminatingEvent> {
    let dst = &inst.operands[0];
    let width = operand_width(dst);
    let val = read_operand(cpu, inst, dst, width)?;
    let result = 0u64.wrapping_sub(val);
    let flag_bits = flags::flags_sub(0, val, result, width);
    cpu.registers.update_flags(flags::ARITH_MASK, flag_bits);
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
    fn add_immediate_sets_zero_flag_on_zero_result() {
        // mov eax, 1 ; add eax, -1 ; hlt
        let mut cpu = cpu_with_code(&[0xB8, 1, 0, 0, 0, 0x83, 0xC0, 0xFF, 0xF4]);
        cpu.execute();
        assert_eq!(cpu.registers.get32(Register::gpr(0, Width::Dword)), 0);
        assert!(cpu.registers.is_set(flags::ZF));
    }

    #[test]
    fn cmp_does_not_write_back() {
        // mov eax, 5 ; cmp eax, 5 ; hlt
        let mut cpu = cpu_with_code(&[0xB8, 5, 0, 0, 0, 0x83, 0xF8, 0x05, 0xF4]);
        cpu.execute();
        assert_eq!(cpu.registers.get32(Register::gpr(0, Width::Dword)), 5);
        assert!(cpu.registers.is_set(flags::ZF));
    }

    #[test]
    fn inc_does_not_touch_carry_flag() {
        // mov eax, -1 ; inc eax ; hlt
        let mut cpu = cpu_with_code(&[0xB8, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xC0, 0xF4]);
        cpu.registers.set_flag(flags::CF, true);
        cpu.execute();
        assert_eq!(cpu.registers.get32(Register::gpr(0, Width::Dword)), 0);
        assert!(cpu.registers.is_set(flags::ZF));
        assert!(cpu.registers.is_set(flags::CF));
    }

    #[test]
    fn neg_of_zero_clears_carry() {
        // xor eax, eax ; neg eax ; hlt
        let mut cpu = cpu_with_code(&[0x31, 0xC0, 0xF7, 0xD8, 0xF4]);
        cpu.execute();
        assert_eq!(cpu.registers.get32(Register::gpr(0, Width::Dword)), 0);
        assert!(!cpu.registers.is_set(flags::CF));
    }
}
