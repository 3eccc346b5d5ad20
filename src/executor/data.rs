//! Data movement instruction handlers (spec §4.7): MOV/MOVABS, MOVSXD,
//! MOVZX, MOVSX, LEA, CMOVcc. None of these touch RFLAGS.

use crate::cpu::Cpu;
use crate::error::TerminatingEvent;
use crate::flags;
use crate::model::{ConditionCode, Instruction, Operand, Width};

use super::{advance, effective_address, operand_width, read_operand, write_operand};

/// MOV/MOVABS `dst, src`: a plain copy at the destination's width.
pub fn exec_mov(cpu: &mut Cpu, inst: &Instruction) -> Result<(), TerminatingEvent> {
    let dst = &inst.operands[0];
    let src = &inst.operands[1];
    let width = operand_width(dst);
    let val = read_operand(cpu, inst, src, width)?;
    write_operand(cpu, inst, dst, width, val)?;
    advance(cpu, inst);
    Ok(())
}

/// MOVSXD `r64, r/m32`: sign-extends a 32-bit source into a 64-bit
/// destination.
pub fn exec_movsxd(cpu: &mut Cpu, inst: &Instruction) -> Result<(), TerminatingEvent> {
    let dst = &inst.operands[0];
    let src = &inst.operands[1];
    let src_val = read_operand(cpu, inst, src, Width::Dword)?;
    let extended = sign_extend(src_val, Width::Dword);
    write_operand(cpu, inst, dst, Width::Qword, extended)?;
    advance(cpu, inst);
    Ok(())
}

/// MOVZX `r, r/m`: zero-extends a narrower source into a wider
/// destination. `read_operand` already returns a zero-extended u64, so
/// this only needs to re-mask to the source width before widening.
pub fn exec_movzx(cpu: &mut Cpu, inst: &Instruction) -> Result<(), TerminatingEvent> {
    let dst = &inst.operands[0];
    let src = &inst.operands[1];
    let src_width = operand_width(src);
    let dst_width = operand_width(dst);
    let src_val = read_operand(cpu, inst, src, src_width)? & src_width.mask();
    write_operand(cpu, inst, dst, dst_width, src_val)?;
    advance(cpu, inst);
    Ok(())
}

/// MOVSX `r, r/m`: sign-extends a narrower source into a wider
/// destination.
pub fn exec_movsx(cpu: &mut Cpu, inst: &Instruction) -> Result<(), TerminatingEvent> {
    let dst = &inst.operands[0];
    let src = &inst.operands[1];
    let src_width = operand_width(src);
    let dst_width = operand_width(dst);
    let src_val = read_operand(cpu, inst, src, src_width)?;
    let extended = sign_extend(src_val, src_width) & dst_width.mask();
    write_operand(cpu, inst, dst, dst_width, extended)?;
    advance(cpu, inst);
    Ok(())
}

/// LEA `r, m`: writes the memory operand's effective address, never
/// touching memory itself.
pub fn exec_lea(cpu: &mut Cpu, inst: &Instruction) -> Result<(), TerminatingEvent> {
    let dst = &inst.operands[0];
    let src = &inst.operands[1];
    let width = operand_width(dst);
    let addr = match src {
        Operand::Memory(mem) => effective_address(cpu, mem, inst),
        other => panic!("LEA source must be a memory operand, got {other:?}"),
    };
    write_operand(cpu, inst, dst, width, addr & width.mask())?;
    advance(cpu, inst);
    Ok(())
}

/// CMOVcc `r, r/m`: the source is always read (matching real hardware,
/// which fetches unconditionally and only makes the writeback
/// conditional), but only written back when `cc` holds.
pub fn exec_cmovcc(cpu: &mut Cpu, inst: &Instruction, cc: ConditionCode) -> Result<(), TerminatingEvent> {
    let dst = &inst.operands[0];
    let src = &inst.operands[1];
    let width = operand_width(dst);
    let val = read_operand(cpu, inst, src, width)?;
    if flags::eval_condition(cc, cpu.registers.rflags()) {
        write_operand(cpu, inst, dst, width, val)?;
    }
    advance(cpu, inst);
    Ok(())
}

fn sign_extend(value: u64, from: Width) -> u64 {
    let bits = from.bits();
    if bits == 64 {
        return value;
    }
    let shift = 64 - bits;
    (((value << shift) as i64) >> shift) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::EmulatorConfig;
    use crate::model::Register;

    fn cpu_with_code(code: &[u8]) -> Cpu {
        let mut cpu = Cpu::new(EmulatorConfig::new(0x2000, 0x1000));
        cpu.memory.initialize(0x1000, code);
        cpu.memory.set_permissions(0x1000, code.len() as u64, true, true, true);
        cpu.set_instruction_pointer(0x1000);
        cpu
    }

    #[test]
    fn mov_does_not_touch_flags() {
        // mov eax, 1 ; hlt
        let mut cpu = cpu_with_code(&[0xB8, 1, 0, 0, 0, 0xF4]);
        cpu.registers.set_flag(flags::ZF, true);
        cpu.execute();
        assert_eq!(cpu.registers.get32(Register::gpr(0, Width::Dword)), 1);
        assert!(cpu.registers.is_set(flags::ZF));
    }

    #[test]
    fn movsxd_sign_extends_negative_dword() {
        // mov eax, -1 ; movsxd rcx, eax ; hlt
        let mut cpu = cpu_with_code(&[0xB8, 0xFF, 0xFF, 0xFF, 0xFF, 0x48, 0x63, 0xC8, 0xF4]);
        cpu.execute();
        assert_eq!(cpu.registers.get64(Register::gpr(1, Width::Qword)), u64::MAX);
    }

    #[test]
    fn movzx_zero_extends_byte() {
        // mov al, -1 ; movzx ecx, al ; hlt
        let mut cpu = cpu_with_code(&[0xB0, 0xFF, 0x0F, 0xB6, 0xC8, 0xF4]);
        cpu.execute();
        assert_eq!(cpu.registers.get32(Register::gpr(1, Width::Dword)), 0xff);
    }

    #[test]
    fn cmovcc_skips_writeback_when_condition_false() {
        // mov eax, 1 ; mov ecx, 2 ; cmp eax, eax ; cmovne eax, ecx ; hlt
        let mut cpu = cpu_with_code(&[
            0xB8, 1, 0, 0, 0, 0xB9, 2, 0, 0, 0, 0x39, 0xC0, 0x0F, 0x45, 0xC1, 0xF4,
        ]);
        cpu.execute();
        assert_eq!(cpu.registers.get32(Register::gpr(0, Width::Dword)), 1);
    }
}
