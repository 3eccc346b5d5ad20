//! SETcc instruction handler (spec §4.7): writes a byte operand to 0 or 1
//! depending on whether `cc` holds against the current RFLAGS. Touches no
//! flags itself.

use crate::cpu::Cpu;
use crate::error::TerminatingEvent;
use crate::flags;
use crate::model::{ConditionCode, Instruction, Width};

use super::{advance, write_operand};

pub fn exec_setcc(cpu: &mut Cpu, inst: &Instruction, cc: ConditionCode) -> Result<(), TerminatingEvent> {
    let dst = &inst.operands[0];
    let value = u64::from(flags::eval_condition(cc, cpu.registers.rflags()));
    write_operand(cpu, inst, dst, Width::Byte, value)?;
    advance(cpu, inst);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::EmulatorConfig;
    use crate::model::Register;

    #[test]
    fn sete_writes_one_when_zero_flag_set() {
        let mut cpu = Cpu::new(EmulatorConfig::new(0x2000, 0x1000));
        // xor eax, eax ; sete cl ; hlt
        let code = [0x31, 0xC0, 0x0F, 0x94, 0xC1, 0xF4];
        cpu.memory.initialize(0x1000, &code);
        cpu.memory.set_permissions(0x1000, code.len() as u64, true, true, true);
        cpu.set_instruction_pointer(0x1000);
        cpu.execute();
        assert_eq!(cpu.registers.get8(Register::gpr(1, crate::model::Width::Byte)), 1);
    }
}
