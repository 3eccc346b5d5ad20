//! The Codec decoder (spec §4.3): a pure, stateless function from bytes to
//! one `Instruction`. No CPU mode switch — this crate only ever decodes
//! 64-bit long-mode code, so default operand size is 32 bits, REX.W
//! promotes to 64, and `0x66` demotes to 16, exactly as on real silicon.
//!
//! Decoding proceeds in the four phases spec §4.3 names: legacy prefixes,
//! optional REX, the one- or two-byte opcode, then ModR/M/SIB/displacement/
//! immediate as the opcode's template calls for.

use crate::bitbuffer::BitBuffer;
use crate::error::{DecodeError, Result};
use crate::model::{
    ConditionCode, Displacement, GprIndex, Immediate, IndirectOperandBuilder, Instruction,
    Opcode, OpcodeMap, Operand, PointerSize, Prefixes, Register, SegReg, Width,
};

/// x86-64 caps every instruction encoding at 15 bytes, prefixes included.
pub const MAX_INSTRUCTION_LEN: u64 = 15;

/// Decodes one instruction starting at the buffer's current position.
///
/// `rip` is the address of the first byte `buf` will read — the decoder
/// needs it only to resolve rip-relative branch targets into the absolute
/// addresses `Operand::RelativeTarget` carries (spec §3.3). Memory operands
/// stay symbolic (`IndirectOperand::rip_relative`); only control-transfer
/// targets are pre-resolved here, because encoding them back requires the
/// same address to recompute the displacement.
pub fn decode_one(buf: &mut BitBuffer, rip: u64) -> Result<Instruction> {
    let start = buf.position();
    let prefixes = read_prefixes(buf)?;
    let op1 = buf.read1()?;

    let (opcode, opcode_map, operands) = if op1 == 0x0F {
        let op2 = buf.read1()?;
        decode_secondary(buf, op2, &prefixes, rip, start)?
    } else {
        decode_primary(buf, op1, &prefixes, rip, start)?
    };

    let length = buf.position() - start;
    if length > MAX_INSTRUCTION_LEN {
        return Err(DecodeError::OutOfBounds);
    }

    Ok(Instruction::new(opcode, opcode_map)
        .with_operands(operands)
        .with_prefixes(prefixes)
        .with_length(length as u8))
}

// ── Phase 1 + 2: legacy prefixes and REX ──

fn read_prefixes(buf: &mut BitBuffer) -> Result<Prefixes> {
    let mut p = Prefixes::default();
    loop {
        let b = buf.peek1()?;
        match b {
            0xF0 => p.lock = true,
            0xF2 => {
                p.repne = true;
                p.rep = false;
            }
            0xF3 => {
                p.rep = true;
                p.repne = false;
            }
            0x2E | 0x36 | 0x3E | 0x26 | 0x64 | 0x65 => {
                p.segment_override = SegReg::from_override_prefix(b);
            }
            0x66 => p.operand_size_override = true,
            0x67 => p.address_size_override = true,
            _ => break,
        }
        buf.read1()?;
    }
    if buf.peek1()? & 0xF0 == 0x40 {
        p.rex = Some(buf.read1()?);
    }
    Ok(p)
}

/// Resolves the effective operand width from REX.W / `0x66` (spec §9's
/// "REX.W wins over `0x66` when both are present" open question).
/// `default_wide` is true for the handful of opcodes (PUSH/POP/CALL/RET/JMP
/// near) that default to 64-bit operands in long mode regardless of REX.W.
fn operand_width(prefixes: &Prefixes, default_wide: bool) -> Width {
    if prefixes.rex_w() {
        Width::Qword
    } else if prefixes.operand_size_override {
        Width::Word
    } else if default_wide {
        Width::Qword
    } else {
        Width::Dword
    }
}

/// Immediates paired with a 64-bit destination are `imm32` sign-extended,
/// never a full `imm64` — the one opcode family that reads a true imm64 is
/// MOVABS, handled separately.
fn alu_immediate_width(op_width: Width) -> Width {
    if op_width == Width::Qword {
        Width::Dword
    } else {
        op_width
    }
}

fn read_immediate(buf: &mut BitBuffer, width: Width) -> Result<Immediate> {
    let value = match width {
        Width::Byte => buf.read1()? as u64,
        Width::Word => buf.read2()? as u64,
        Width::Dword => buf.read4()? as u64,
        Width::Qword => buf.read8()?,
    };
    Ok(Immediate::new(value, width))
}

fn gpr_register(index: u8, width: Width, has_rex: bool) -> Register {
    if width == Width::Byte && !has_rex && (4..=7).contains(&index) {
        Register::gpr_high_byte(index)
    } else {
        Register::gpr(index, width)
    }
}

// ── ModR/M / SIB / displacement ──

struct ModRm {
    md: u8,
    reg_raw: u8,
    rm_raw: u8,
}

fn read_modrm(buf: &mut BitBuffer) -> Result<ModRm> {
    let b = buf.read1()?;
    Ok(ModRm { md: b >> 6, reg_raw: (b >> 3) & 7, rm_raw: b & 7 })
}

impl ModRm {
    fn reg_index(&self, prefixes: &Prefixes) -> u8 {
        self.reg_raw | ((prefixes.rex_r() as u8) << 3)
    }
}

/// Decodes the `r/m` side of a ModR/M byte into either a register (mod=11)
/// or a memory operand, per spec §4.3b's mod/rm/SIB table.
fn decode_rm_operand(
    buf: &mut BitBuffer,
    modrm: &ModRm,
    prefixes: &Prefixes,
    operand_width: Width,
    pointer_size: PointerSize,
) -> Result<Operand> {
    if modrm.md == 0b11 {
        let index = modrm.rm_raw | ((prefixes.rex_b() as u8) << 3);
        return Ok(Operand::Register(gpr_register(index, operand_width, prefixes.has_rex())));
    }

    let address_width = if prefixes.address_size_override { Width::Dword } else { Width::Qword };
    let mut base = None;
    let mut index = None;
    let mut scale = 1u8;
    let mut rip_relative = false;
    let mut disp_required = false;

    if modrm.rm_raw == 0b100 {
        let sib = buf.read1()?;
        let sib_scale = sib >> 6;
        let sib_index_raw = (sib >> 3) & 7;
        let sib_base_raw = sib & 7;
        scale = 1u8 << sib_scale;

        if !(sib_index_raw == 0b100 && !prefixes.rex_x()) {
            index = Some(GprIndex::new(sib_index_raw | ((prefixes.rex_x() as u8) << 3)));
        }
        if modrm.md == 0 && sib_base_raw == 0b101 {
            disp_required = true;
        } else {
            base = Some(GprIndex::new(sib_base_raw | ((prefixes.rex_b() as u8) << 3)));
        }
    } else if modrm.md == 0 && modrm.rm_raw == 0b101 {
        disp_required = true;
        rip_relative = address_width == Width::Qword;
    } else {
        base = Some(GprIndex::new(modrm.rm_raw | ((prefixes.rex_b() as u8) << 3)));
    }

    let displacement = match modrm.md {
        0b01 => Displacement::new(buf.read1_signed()? as i64, Width::Byte),
        0b10 => Displacement::new(buf.read4_signed()? as i64, Width::Dword),
        0b00 if disp_required => Displacement::new(buf.read4_signed()? as i64, Width::Dword),
        _ => Displacement::zero(),
    };

    let mut builder = IndirectOperandBuilder::new();
    if let Some(b) = base {
        builder = builder.base(b).map_err(|_| DecodeError::OutOfBounds)?;
    }
    if let Some(ix) = index {
        builder = builder.index(ix, scale).map_err(|_| DecodeError::OutOfBounds)?;
    }
    builder = builder.displacement(displacement).map_err(|_| DecodeError::OutOfBounds)?;
    builder = builder.pointer_size(pointer_size).map_err(|_| DecodeError::OutOfBounds)?;
    builder = builder.address_width(address_width).map_err(|_| DecodeError::OutOfBounds)?;
    builder = builder.rip_relative(rip_relative).map_err(|_| DecodeError::OutOfBounds)?;
    let operand = builder.build().map_err(|_| DecodeError::OutOfBounds)?;
    Ok(Operand::Memory(operand))
}

fn relative_target(buf: &BitBuffer, rip: u64, start: u64, rel: i64) -> u64 {
    (rip as i64 + (buf.position() - start) as i64 + rel) as u64
}

// ── Primary (one-byte) opcode map ──

fn alu_base_opcode(base: u8) -> Opcode {
    match base {
        0x00 => Opcode::Add,
        0x08 => Opcode::Or,
        0x10 => Opcode::Adc,
        0x18 => Opcode::Sbb,
        0x20 => Opcode::And,
        0x28 => Opcode::Sub,
        0x30 => Opcode::Xor,
        0x38 => Opcode::Cmp,
        _ => unreachable!("caller only passes alu group bases"),
    }
}

fn group1_opcode(reg: u8) -> Opcode {
    match reg {
        0 => Opcode::Add,
        1 => Opcode::Or,
        2 => Opcode::Adc,
        3 => Opcode::Sbb,
        4 => Opcode::And,
        5 => Opcode::Sub,
        6 => Opcode::Xor,
        _ => Opcode::Cmp,
    }
}

fn decode_primary(
    buf: &mut BitBuffer,
    op1: u8,
    prefixes: &Prefixes,
    rip: u64,
    start: u64,
) -> Result<(Opcode, OpcodeMap, Vec<Operand>)> {
    let map = OpcodeMap::Primary;

    // ALU register/memory forms: 0x00-0x3D in groups of 8, low 3 bits select
    // the direction/width/immediate variant.
    let alu_base = op1 & 0xF8;
    if matches!(alu_base, 0x00 | 0x08 | 0x10 | 0x18 | 0x20 | 0x28 | 0x30 | 0x38) && (op1 & 0x07) <= 5
    {
        let opcode = alu_base_opcode(alu_base);
        let variant = op1 & 0x07;
        return Ok((opcode, map, decode_alu_variant(buf, variant, prefixes)?));
    }

    match op1 {
        0x50..=0x57 => {
            let idx = (op1 - 0x50) | ((prefixes.rex_b() as u8) << 3);
            let w = operand_width(prefixes, true);
            let reg = gpr_register(idx, w, prefixes.has_rex());
            Ok((Opcode::Push, map, vec![Operand::Register(reg)]))
        }
        0x58..=0x5F => {
            let idx = (op1 - 0x58) | ((prefixes.rex_b() as u8) << 3);
            let w = operand_width(prefixes, true);
            let reg = gpr_register(idx, w, prefixes.has_rex());
            Ok((Opcode::Pop, map, vec![Operand::Register(reg)]))
        }
        0x63 => {
            // MOVSXD r64, r/m32
            let modrm = read_modrm(buf)?;
            let reg = gpr_register(modrm.reg_index(prefixes), Width::Qword, prefixes.has_rex());
            let rm = decode_rm_operand(buf, &modrm, prefixes, Width::Dword, PointerSize::Dword)?;
            Ok((Opcode::Movsxd, map, vec![Operand::Register(reg), rm]))
        }
        0x68 => {
            let w = operand_width(prefixes, true);
            let imm = read_immediate(buf, Width::Dword)?;
            Ok((Opcode::Push, map, vec![Operand::Immediate(Immediate::new(imm.value, w))]))
        }
        0x6A => {
            let imm = read_immediate(buf, Width::Byte)?;
            Ok((Opcode::Push, map, vec![Operand::Immediate(imm)]))
        }
        0x70..=0x7F => {
            let cc = ConditionCode::from_nibble(op1);
            let rel = buf.read1_signed()? as i64;
            let target = relative_target(buf, rip, start, rel);
            Ok((Opcode::Jcc(cc), map, vec![Operand::RelativeTarget(target)]))
        }
        0x80 => group1_imm(buf, prefixes, Width::Byte, Width::Byte),
        0x81 => {
            let w = operand_width(prefixes, false);
            group1_imm(buf, prefixes, w, alu_immediate_width(w))
        }
        0x83 => {
            let w = operand_width(prefixes, false);
            group1_imm(buf, prefixes, w, Width::Byte)
        }
        0x84 => test_rm_reg(buf, prefixes, Width::Byte),
        0x85 => test_rm_reg(buf, prefixes, operand_width(prefixes, false)),
        0x88 => mov_rm_reg(buf, prefixes, Width::Byte, true),
        0x89 => mov_rm_reg(buf, prefixes, operand_width(prefixes, false), true),
        0x8A => mov_rm_reg(buf, prefixes, Width::Byte, false),
        0x8B => mov_rm_reg(buf, prefixes, operand_width(prefixes, false), false),
        0x8D => {
            let modrm = read_modrm(buf)?;
            let w = operand_width(prefixes, false);
            let reg = gpr_register(modrm.reg_index(prefixes), w, prefixes.has_rex());
            let rm = decode_rm_operand(buf, &modrm, prefixes, w, PointerSize::from_width(w))?;
            if !matches!(rm, Operand::Memory(_)) {
                return Err(DecodeError::UnknownOpcode(vec![op1]));
            }
            Ok((Opcode::Lea, map, vec![Operand::Register(reg), rm]))
        }
        0x8F => {
            let modrm = read_modrm(buf)?;
            if modrm.reg_raw != 0 {
                return Err(DecodeError::ReservedOpcode(vec![op1, modrm_byte(&modrm)]));
            }
            let w = operand_width(prefixes, true);
            let rm = decode_rm_operand(buf, &modrm, prefixes, w, PointerSize::from_width(w))?;
            Ok((Opcode::Pop, map, vec![rm]))
        }
        0x90 => Ok((Opcode::Nop, map, Vec::new())),
        0xA8 => {
            let imm = read_immediate(buf, Width::Byte)?;
            let al = gpr_register(0, Width::Byte, prefixes.has_rex());
            Ok((Opcode::Test, map, vec![Operand::Register(al), Operand::Immediate(imm)]))
        }
        0xA9 => {
            let w = operand_width(prefixes, false);
            let imm = read_immediate(buf, alu_immediate_width(w))?;
            let ax = gpr_register(0, w, prefixes.has_rex());
            Ok((Opcode::Test, map, vec![Operand::Register(ax), Operand::Immediate(imm)]))
        }
        0xB0..=0xB7 => {
            let idx = (op1 - 0xB0) | ((prefixes.rex_b() as u8) << 3);
            let reg = gpr_register(idx, Width::Byte, prefixes.has_rex());
            let imm = read_immediate(buf, Width::Byte)?;
            Ok((Opcode::Mov, map, vec![Operand::Register(reg), Operand::Immediate(imm)]))
        }
        0xB8..=0xBF => {
            let idx = (op1 - 0xB8) | ((prefixes.rex_b() as u8) << 3);
            if prefixes.rex_w() {
                let reg = gpr_register(idx, Width::Qword, true);
                let imm = read_immediate(buf, Width::Qword)?;
                Ok((Opcode::Movabs, map, vec![Operand::Register(reg), Operand::Immediate(imm)]))
            } else {
                let w = operand_width(prefixes, false);
                let reg = gpr_register(idx, w, prefixes.has_rex());
                let imm = read_immediate(buf, w)?;
                Ok((Opcode::Mov, map, vec![Operand::Register(reg), Operand::Immediate(imm)]))
            }
        }
        0xC2 => {
            let imm = read_immediate(buf, Width::Word)?;
            Ok((Opcode::Ret, map, vec![Operand::Immediate(imm)]))
        }
        0xC3 => Ok((Opcode::Ret, map, Vec::new())),
        0xC6 => {
            let modrm = read_modrm(buf)?;
            if modrm.reg_raw != 0 {
                return Err(DecodeError::ReservedOpcode(vec![op1, modrm_byte(&modrm)]));
            }
            let rm = decode_rm_operand(buf, &modrm, prefixes, Width::Byte, PointerSize::Byte)?;
            let imm = read_immediate(buf, Width::Byte)?;
            Ok((Opcode::Mov, map, vec![rm, Operand::Immediate(imm)]))
        }
        0xC7 => {
            let modrm = read_modrm(buf)?;
            if modrm.reg_raw != 0 {
                return Err(DecodeError::ReservedOpcode(vec![op1, modrm_byte(&modrm)]));
            }
            let w = operand_width(prefixes, false);
            let rm = decode_rm_operand(buf, &modrm, prefixes, w, PointerSize::from_width(w))?;
            let imm = read_immediate(buf, alu_immediate_width(w))?;
            Ok((Opcode::Mov, map, vec![rm, Operand::Immediate(imm)]))
        }
        0xCD => {
            let imm = read_immediate(buf, Width::Byte)?;
            Ok((Opcode::Int, map, vec![Operand::Immediate(imm)]))
        }
        0xE8 => {
            let rel = buf.read4_signed()? as i64;
            let target = relative_target(buf, rip, start, rel);
            Ok((Opcode::Call, map, vec![Operand::RelativeTarget(target)]))
        }
        0xE9 => {
            let rel = buf.read4_signed()? as i64;
            let target = relative_target(buf, rip, start, rel);
            Ok((Opcode::Jmp, map, vec![Operand::RelativeTarget(target)]))
        }
        0xEB => {
            let rel = buf.read1_signed()? as i64;
            let target = relative_target(buf, rip, start, rel);
            Ok((Opcode::Jmp, map, vec![Operand::RelativeTarget(target)]))
        }
        0xF4 => Ok((Opcode::Hlt, map, Vec::new())),
        0xF6 => group3(buf, prefixes, Width::Byte),
        0xF7 => group3(buf, prefixes, operand_width(prefixes, false)),
        0xFE => {
            let modrm = read_modrm(buf)?;
            let rm = decode_rm_operand(buf, &modrm, prefixes, Width::Byte, PointerSize::Byte)?;
            match modrm.reg_raw {
                0 => Ok((Opcode::Inc, map, vec![rm])),
                1 => Ok((Opcode::Dec, map, vec![rm])),
                _ => Err(DecodeError::ReservedOpcode(vec![op1, modrm_byte(&modrm)])),
            }
        }
        0xFF => group5(buf, prefixes, op1),
        _ => Err(DecodeError::UnknownOpcode(vec![op1])),
    }
}

fn modrm_byte(modrm: &ModRm) -> u8 {
    (modrm.md << 6) | (modrm.reg_raw << 3) | modrm.rm_raw
}

fn decode_alu_variant(buf: &mut BitBuffer, variant: u8, prefixes: &Prefixes) -> Result<Vec<Operand>> {
    match variant {
        0 => rm_reg_operands(buf, prefixes, Width::Byte, true),
        1 => rm_reg_operands(buf, prefixes, operand_width(prefixes, false), true),
        2 => rm_reg_operands(buf, prefixes, Width::Byte, false),
        3 => rm_reg_operands(buf, prefixes, operand_width(prefixes, false), false),
        4 => {
            let imm = read_immediate(buf, Width::Byte)?;
            let al = gpr_register(0, Width::Byte, prefixes.has_rex());
            Ok(vec![Operand::Register(al), Operand::Immediate(imm)])
        }
        _ => {
            let w = operand_width(prefixes, false);
            let imm = read_immediate(buf, alu_immediate_width(w))?;
            let ax = gpr_register(0, w, prefixes.has_rex());
            Ok(vec![Operand::Register(ax), Operand::Immediate(imm)])
        }
    }
}

/// Shared by the MOV and ALU `r/m, reg` family: reads a ModR/M byte and
/// produces `[dst, src]` in the order the instruction template names them.
/// `rm_is_dst` distinguishes `op+0/1` (r/m is destination) from `op+2/3`
/// (register is destination).
fn rm_reg_operands(
    buf: &mut BitBuffer,
    prefixes: &Prefixes,
    width: Width,
    rm_is_dst: bool,
) -> Result<Vec<Operand>> {
    let modrm = read_modrm(buf)?;
    let reg = gpr_register(modrm.reg_index(prefixes), width, prefixes.has_rex());
    let rm = decode_rm_operand(buf, &modrm, prefixes, width, PointerSize::from_width(width))?;
    if rm_is_dst {
        Ok(vec![rm, Operand::Register(reg)])
    } else {
        Ok(vec![Operand::Register(reg), rm])
    }
}

fn mov_rm_reg(
    buf: &mut BitBuffer,
    prefixes: &Prefixes,
    width: Width,
    rm_is_dst: bool,
) -> Result<(Opcode, OpcodeMap, Vec<Operand>)> {
    Ok((Opcode::Mov, OpcodeMap::Primary, rm_reg_operands(buf, prefixes, width, rm_is_dst)?))
}

fn test_rm_reg(
    buf: &mut BitBuffer,
    prefixes: &Prefixes,
    width: Width,
) -> Result<(Opcode, OpcodeMap, Vec<Operand>)> {
    Ok((Opcode::Test, OpcodeMap::Primary, rm_reg_operands(buf, prefixes, width, true)?))
}

fn group1_imm(
    buf: &mut BitBuffer,
    prefixes: &Prefixes,
    width: Width,
    imm_width: Width,
) -> Result<(Opcode, OpcodeMap, Vec<Operand>)> {
    let modrm = read_modrm(buf)?;
    let opcode = group1_opcode(modrm.reg_raw);
    let rm = decode_rm_operand(buf, &modrm, prefixes, width, PointerSize::from_width(width))?;
    let imm = read_immediate(buf, imm_width)?;
    Ok((opcode, OpcodeMap::Primary, vec![rm, Operand::Immediate(imm)]))
}

/// Group 3 (`0xF6`/`0xF7`): only `TEST`/`NOT`/`NEG` (reg 0/2/3) are in this
/// crate's closed opcode set; `MUL`/`IMUL`/`DIV`/`IDIV` (reg 4-7) are valid
/// x86 but outside it, so they fall through to `UnknownOpcode`.
fn group3(buf: &mut BitBuffer, prefixes: &Prefixes, width: Width) -> Result<(Opcode, OpcodeMap, Vec<Operand>)> {
    let modrm = read_modrm(buf)?;
    let rm = decode_rm_operand(buf, &modrm, prefixes, width, PointerSize::from_width(width))?;
    match modrm.reg_raw {
        0 | 1 => {
            let imm_width = if width == Width::Byte { Width::Byte } else { alu_immediate_width(width) };
            let imm = read_immediate(buf, imm_width)?;
            Ok((Opcode::Test, OpcodeMap::Primary, vec![rm, Operand::Immediate(imm)]))
        }
        2 => Ok((Opcode::Not, OpcodeMap::Primary, vec![rm])),
        3 => Ok((Opcode::Neg, OpcodeMap::Primary, vec![rm])),
        _ => Err(DecodeError::UnknownOpcode(vec![modrm_byte(&modrm)])),
    }
}

/// Group 5 (`0xFF`): INC/DEC/CALL/JMP/PUSH share this one opcode byte,
/// selected by ModR/M.reg. Far CALL/JMP (reg 3/5) and the reg=7 slot are
/// outside this crate's scope.
fn group5(buf: &mut BitBuffer, prefixes: &Prefixes, op1: u8) -> Result<(Opcode, OpcodeMap, Vec<Operand>)> {
    let modrm = read_modrm(buf)?;
    match modrm.reg_raw {
        0 | 1 => {
            let w = operand_width(prefixes, false);
            let rm = decode_rm_operand(buf, &modrm, prefixes, w, PointerSize::from_width(w))?;
            let opcode = if modrm.reg_raw == 0 { Opcode::Inc } else { Opcode::Dec };
            Ok((opcode, OpcodeMap::Primary, vec![rm]))
        }
        2 => {
            let rm = decode_rm_operand(buf, &modrm, prefixes, Width::Qword, PointerSize::Qword)?;
            Ok((Opcode::Call, OpcodeMap::Primary, vec![rm]))
        }
        4 => {
            let rm = decode_rm_operand(buf, &modrm, prefixes, Width::Qword, PointerSize::Qword)?;
            Ok((Opcode::Jmp, OpcodeMap::Primary, vec![rm]))
        }
        6 => {
            let w = operand_width(prefixes, true);
            let rm = decode_rm_operand(buf, &modrm, prefixes, w, PointerSize::from_width(w))?;
            Ok((Opcode::Push, OpcodeMap::Primary, vec![rm]))
        }
        _ => Err(DecodeError::UnknownOpcode(vec![op1, modrm_byte(&modrm)])),
    }
}

// ── Secondary (`0x0F`-prefixed) opcode map ──

fn decode_secondary(
    buf: &mut BitBuffer,
    op2: u8,
    prefixes: &Prefixes,
    rip: u64,
    start: u64,
) -> Result<(Opcode, OpcodeMap, Vec<Operand>)> {
    let map = OpcodeMap::Secondary;
    match op2 {
        0x0B => Err(DecodeError::ReservedOpcode(vec![0x0F, op2])), // UD2
        0x0F => Err(DecodeError::ReservedOpcode(vec![0x0F, op2])), // 3DNow! escape
        0x40..=0x4F => {
            let cc = ConditionCode::from_nibble(op2);
            let modrm = read_modrm(buf)?;
            let w = operand_width(prefixes, false);
            let reg = gpr_register(modrm.reg_index(prefixes), w, prefixes.has_rex());
            let rm = decode_rm_operand(buf, &modrm, prefixes, w, PointerSize::from_width(w))?;
            Ok((Opcode::Cmovcc(cc), map, vec![Operand::Register(reg), rm]))
        }
        0x80..=0x8F => {
            let cc = ConditionCode::from_nibble(op2);
            let rel = buf.read4_signed()? as i64;
            let target = relative_target(buf, rip, start, rel);
            Ok((Opcode::Jcc(cc), map, vec![Operand::RelativeTarget(target)]))
        }
        0x90..=0x9F => {
            let cc = ConditionCode::from_nibble(op2);
            let modrm = read_modrm(buf)?;
            let rm = decode_rm_operand(buf, &modrm, prefixes, Width::Byte, PointerSize::Byte)?;
            Ok((Opcode::Setcc(cc), map, vec![rm]))
        }
        0xB6 => movx(buf, prefixes, Width::Byte, Opcode::Movzx),
        0xB7 => movx(buf, prefixes, Width::Word, Opcode::Movzx),
        0xBE => movx(buf, prefixes, Width::Byte, Opcode::Movsx),
        0xBF => movx(buf, prefixes, Width::Word, Opcode::Movsx),
        0xFF => Err(DecodeError::ReservedOpcode(vec![0x0F, op2])),
        _ => Err(DecodeError::UnknownOpcode(vec![0x0F, op2])),
    }
}

fn movx(
    buf: &mut BitBuffer,
    prefixes: &Prefixes,
    src_width: Width,
    opcode: Opcode,
) -> Result<(Opcode, OpcodeMap, Vec<Operand>)> {
    let modrm = read_modrm(buf)?;
    let dst_width = operand_width(prefixes, false);
    let reg = gpr_register(modrm.reg_index(prefixes), dst_width, prefixes.has_rex());
    let rm = decode_rm_operand(buf, &modrm, prefixes, src_width, PointerSize::from_width(src_width))?;
    Ok((opcode, OpcodeMap::Secondary, vec![Operand::Register(reg), rm]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(bytes: &[u8]) -> Instruction {
        let mut buf = BitBuffer::new(bytes);
        decode_one(&mut buf, 0).expect("decode should succeed")
    }

    #[test]
    fn decodes_mov_reg_imm32() {
        let inst = decode(&[0xB8, 0x12, 0x34, 0x56, 0x78]);
        assert_eq!(inst.opcode, Opcode::Mov);
        assert_eq!(inst.length, 5);
        assert_eq!(inst.operands[0], Operand::Register(Register::gpr(0, Width::Dword)));
        assert_eq!(inst.operands[1], Operand::Immediate(Immediate::new(0x78563412, Width::Dword)));
    }

    #[test]
    fn decodes_movabs_with_rex_w() {
        let inst = decode(&[0x48, 0xB8, 1, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(inst.opcode, Opcode::Movabs);
        assert_eq!(inst.length, 10);
        assert_eq!(inst.operands[0], Operand::Register(Register::gpr(0, Width::Qword)));
    }

    #[test]
    fn decodes_rip_relative_memory_operand() {
        // mov rax, [rip+0x10] : 48 8b 05 10 00 00 00
        let inst = decode(&[0x48, 0x8B, 0x05, 0x10, 0x00, 0x00, 0x00]);
        match inst.operands[1] {
            Operand::Memory(m) => {
                assert!(m.rip_relative);
                assert_eq!(m.displacement.value, 0x10);
                assert!(m.base.is_none());
            }
            other => panic!("expected memory operand, got {other:?}"),
        }
    }

    #[test]
    fn decodes_sib_with_scaled_index() {
        // add eax, [rax+rcx*4] : 03 04 88
        let inst = decode(&[0x03, 0x04, 0x88]);
        match inst.operands[1] {
            Operand::Memory(m) => {
                assert_eq!(m.base, Some(GprIndex::RAX));
                assert_eq!(m.index, Some(GprIndex::RCX));
                assert_eq!(m.scale, 4);
            }
            other => panic!("expected memory operand, got {other:?}"),
        }
    }

    #[test]
    fn decodes_jmp_rel32_with_rip_context() {
        let mut buf = BitBuffer::new(&[0xE9, 0xFC, 0xE2, 0x02, 0x00]);
        let inst = decode_one(&mut buf, 0x5).unwrap();
        assert_eq!(inst.operands[0], Operand::RelativeTarget(0x2e306));
    }

    #[test]
    fn byte_registers_use_high_byte_names_without_rex() {
        // mov ah, 0x5 : b4 05 (reg index 4 maps to ah without REX)
        let inst = decode(&[0xB4, 0x05]);
        assert_eq!(inst.operands[0], Operand::Register(Register::gpr_high_byte(4)));
    }

    #[test]
    fn byte_registers_use_spl_family_with_rex() {
        // mov spl, 0x5 : 40 b4 05
        let inst = decode(&[0x40, 0xB4, 0x05]);
        assert_eq!(inst.operands[0], Operand::Register(Register::gpr(4, Width::Byte)));
    }

    #[test]
    fn unknown_opcode_reports_the_byte() {
        let mut buf = BitBuffer::new(&[0x0F, 0x05]); // syscall, out of scope
        let err = decode_one(&mut buf, 0).unwrap_err();
        assert_eq!(err, DecodeError::UnknownOpcode(vec![0x0F, 0x05]));
    }

    #[test]
    fn reserved_opcode_ud2() {
        let mut buf = BitBuffer::new(&[0x0F, 0x0B]);
        let err = decode_one(&mut buf, 0).unwrap_err();
        assert_eq!(err, DecodeError::ReservedOpcode(vec![0x0F, 0x0B]));
    }

    #[test]
    fn truncated_instruction_is_out_of_bounds() {
        let mut buf = BitBuffer::new(&[0xB8, 0x12]);
        assert_eq!(decode_one(&mut buf, 0).unwrap_err(), DecodeError::OutOfBounds);
    }
}
