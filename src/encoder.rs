//! The Codec encoder (spec §4.4): the decoder's exact inverse, plus the
//! Intel-syntax formatter used by disassembler/debugger callers (spec §6).
//!
//! `encode` rebuilds legacy prefixes, REX, opcode, ModR/M/SIB/displacement,
//! and immediate bytes from a decoded `Instruction`. `to_intel_syntax`
//! renders the same instruction the way a disassembler would print it.
//!
//! Several x86-64 encodings are ambiguous at the `Instruction` level — the
//! same operands can be reached by more than one byte sequence (e.g. `cmp
//! al, 0x5` via the accumulator form `0x3C` or via Group 1's `0x80 /7`).
//! Wherever the decoded representation can't distinguish them, this encoder
//! always picks one canonical form rather than guessing which one a
//! particular assembler happened to emit; each choice is noted at its call
//! site below and in the design ledger.

use crate::model::{
    ConditionCode, Displacement, Immediate, Instruction, Opcode, Operand, PointerSize, Prefixes,
    Register, SegReg, Width,
};

/// Encodes `inst` to its byte sequence. `rip` must be the same address
/// `decode_one` was given when it produced `inst` — relative branch targets
/// are stored pre-resolved (`Operand::RelativeTarget`), so recovering the
/// displacement requires recomputing against that same origin.
pub fn encode(inst: &Instruction, rip: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(inst.length.max(8) as usize);
    emit_legacy_prefixes(&mut out, &inst.prefixes);
    let prefix_len = out.len();

    match inst.opcode {
        Opcode::Add | Opcode::Or | Opcode::Adc | Opcode::Sbb | Opcode::And | Opcode::Sub
        | Opcode::Xor | Opcode::Cmp => encode_alu(&mut out, inst),
        Opcode::Test => encode_test(&mut out, inst),
        Opcode::Mov => encode_mov(&mut out, inst),
        Opcode::Movabs => encode_movabs(&mut out, inst),
        Opcode::Movsxd => encode_movsxd(&mut out, inst),
        Opcode::Movzx => encode_movx(&mut out, inst, 0xB6, 0xB7),
        Opcode::Movsx => encode_movx(&mut out, inst, 0xBE, 0xBF),
        Opcode::Lea => encode_lea(&mut out, inst),
        Opcode::Push => encode_push(&mut out, inst),
        Opcode::Pop => encode_pop(&mut out, inst),
        Opcode::Call => encode_call(&mut out, inst, rip, prefix_len),
        Opcode::Ret => encode_ret(&mut out, inst),
        Opcode::Jmp => encode_jmp(&mut out, inst, rip, prefix_len),
        Opcode::Jcc(cc) => encode_jcc(&mut out, inst, cc, rip, prefix_len),
        Opcode::Cmovcc(cc) => encode_cmovcc(&mut out, inst, cc),
        Opcode::Setcc(cc) => encode_setcc(&mut out, inst, cc),
        Opcode::Nop => out.push(0x90),
        Opcode::Hlt => out.push(0xF4),
        Opcode::Int => encode_int(&mut out, inst),
        Opcode::Inc => encode_incdec(&mut out, inst, 0),
        Opcode::Dec => encode_incdec(&mut out, inst, 1),
        Opcode::Not => encode_group3_unary(&mut out, inst, 2),
        Opcode::Neg => encode_group3_unary(&mut out, inst, 3),
    }
    out
}

// ── Legacy prefixes + REX ──

fn emit_legacy_prefixes(out: &mut Vec<u8>, p: &Prefixes) {
    if p.lock {
        out.push(0xF0);
    }
    if p.repne {
        out.push(0xF2);
    } else if p.rep {
        out.push(0xF3);
    }
    if let Some(seg) = p.segment_override {
        out.push(segment_override_byte(seg));
    }
    if p.operand_size_override {
        out.push(0x66);
    }
    if p.address_size_override {
        out.push(0x67);
    }
}

fn segment_override_byte(seg: SegReg) -> u8 {
    match seg {
        SegReg::Es => 0x26,
        SegReg::Cs => 0x2E,
        SegReg::Ss => 0x36,
        SegReg::Ds => 0x3E,
        SegReg::Fs => 0x64,
        SegReg::Gs => 0x65,
    }
}

/// Bits an instruction's register operands demand of a REX byte, independent
/// of whether one ends up being emitted.
#[derive(Default, Clone, Copy)]
struct RexBits {
    w: bool,
    r: bool,
    x: bool,
    b: bool,
    /// A byte-width, non-high-byte register in the 4..7 index range (SPL,
    /// BPL, SIL, DIL) needs a REX prefix present to be selected over
    /// AH/CH/DH/BH even when no bit needs setting.
    force: bool,
}

impl RexBits {
    fn merge(self, other: RexBits) -> RexBits {
        RexBits {
            w: self.w || other.w,
            r: self.r || other.r,
            x: self.x || other.x,
            b: self.b || other.b,
            force: self.force || other.force,
        }
    }

    fn any(self) -> bool {
        self.w || self.r || self.x || self.b || self.force
    }

    fn byte(self) -> u8 {
        0x40 | (self.w as u8) << 3 | (self.r as u8) << 2 | (self.x as u8) << 1 | (self.b as u8)
    }
}

fn reg_rex_bits(reg: &Register) -> RexBits {
    match reg {
        Register::Gpr { index, width, high_byte } => RexBits {
            force: *width == Width::Byte && !*high_byte && (4..=7).contains(&index.0),
            ..Default::default()
        },
        _ => RexBits::default(),
    }
}

/// REX contribution of a register sitting in the ModR/M `reg` field.
fn reg_field_rex(reg: &Register) -> RexBits {
    let mut bits = reg_rex_bits(reg);
    if let Register::Gpr { index, .. } = reg {
        bits.r = index.0 >= 8;
    }
    bits
}

/// Emits the REX byte if one is needed: the instruction's recorded prefix
/// byte wins if present (round-tripping a decoded instruction exactly),
/// otherwise one is synthesized from the bits the operands require.
fn emit_rex(out: &mut Vec<u8>, prefixes: &Prefixes, needed: RexBits) {
    if let Some(raw) = prefixes.rex {
        out.push(raw);
    } else if needed.any() {
        out.push(needed.byte());
    }
}

// ── ModR/M / SIB / displacement (the rm side) ──

struct EncodedRm {
    modrm_mod: u8,
    modrm_rm: u8,
    sib: Option<u8>,
    disp: Vec<u8>,
    rex: RexBits,
}

fn scale_bits(scale: u8) -> u8 {
    match scale {
        1 => 0,
        2 => 1,
        4 => 2,
        8 => 3,
        _ => unreachable!("IndirectOperand invariant guarantees scale in {{1,2,4,8}}"),
    }
}

fn disp_mode_and_bytes(d: Displacement, force_nonzero_mod: bool) -> (u8, Vec<u8>) {
    match d.width {
        Width::Byte if d.value == 0 && !force_nonzero_mod => (0b00, Vec::new()),
        Width::Byte => (0b01, vec![d.value as i8 as u8]),
        _ => (0b10, (d.value as i32).to_le_bytes().to_vec()),
    }
}

fn encode_rm(operand: &Operand) -> EncodedRm {
    match operand {
        Operand::Register(reg) => {
            let index = match reg {
                Register::Gpr { index, .. } => index.0,
                _ => panic!("register-mode r/m operand must be a GPR"),
            };
            EncodedRm {
                modrm_mod: 0b11,
                modrm_rm: index & 7,
                sib: None,
                disp: Vec::new(),
                rex: RexBits { b: index >= 8, ..reg_rex_bits(reg) },
            }
        }
        Operand::Memory(m) => {
            if m.rip_relative {
                let disp = (m.displacement.value as i32).to_le_bytes().to_vec();
                return EncodedRm {
                    modrm_mod: 0b00,
                    modrm_rm: 0b101,
                    sib: None,
                    disp,
                    rex: RexBits::default(),
                };
            }
            let base_lo3 = m.base.map(|b| b.0 & 7);
            let rex_b = m.base.map(|b| b.0 >= 8).unwrap_or(false);
            let rex_x = m.index.map(|i| i.0 >= 8).unwrap_or(false);
            let needs_sib = m.index.is_some() || base_lo3 == Some(0b100) || m.base.is_none();

            if needs_sib {
                let scale = scale_bits(m.scale);
                let index_raw = m.index.map(|i| i.0 & 7).unwrap_or(0b100);
                let (base_raw, md, disp) = match m.base {
                    Some(b) => {
                        let braw = b.0 & 7;
                        let (md, disp) = disp_mode_and_bytes(m.displacement, braw == 0b101);
                        (braw, md, disp)
                    }
                    None => (0b101, 0b00, (m.displacement.value as i32).to_le_bytes().to_vec()),
                };
                let sib = (scale << 6) | (index_raw << 3) | base_raw;
                EncodedRm {
                    modrm_mod: md,
                    modrm_rm: 0b100,
                    sib: Some(sib),
                    disp,
                    rex: RexBits { x: rex_x, b: rex_b, ..Default::default() },
                }
            } else {
                let braw = base_lo3.expect("needs_sib is false only when a base is present");
                let (md, disp) = disp_mode_and_bytes(m.displacement, braw == 0b101);
                EncodedRm {
                    modrm_mod: md,
                    modrm_rm: braw,
                    sib: None,
                    disp,
                    rex: RexBits { b: rex_b, ..Default::default() },
                }
            }
        }
        other => panic!("{other:?} cannot sit in an r/m slot"),
    }
}

fn emit_modrm(out: &mut Vec<u8>, reg_field: u8, rm: &EncodedRm) {
    out.push((rm.modrm_mod << 6) | ((reg_field & 7) << 3) | rm.modrm_rm);
    if let Some(sib) = rm.sib {
        out.push(sib);
    }
    out.extend_from_slice(&rm.disp);
}

fn gpr_index(reg: &Register) -> u8 {
    match reg {
        Register::Gpr { index, .. } => index.0,
        other => panic!("expected a GPR, got {other:?}"),
    }
}

fn push_immediate(out: &mut Vec<u8>, imm: Immediate) {
    match imm.width {
        Width::Byte => out.push(imm.value as u8),
        Width::Word => out.extend_from_slice(&(imm.value as u16).to_le_bytes()),
        Width::Dword => out.extend_from_slice(&(imm.value as u32).to_le_bytes()),
        Width::Qword => out.extend_from_slice(&imm.value.to_le_bytes()),
    }
}

fn as_immediate(op: &Operand) -> Immediate {
    match op {
        Operand::Immediate(imm) => *imm,
        other => panic!("expected an immediate operand, got {other:?}"),
    }
}

// ── ALU family (ADD/OR/ADC/SBB/AND/SUB/XOR/CMP) ──

fn alu_base_byte(opcode: Opcode) -> u8 {
    match opcode {
        Opcode::Add => 0x00,
        Opcode::Or => 0x08,
        Opcode::Adc => 0x10,
        Opcode::Sbb => 0x18,
        Opcode::And => 0x20,
        Opcode::Sub => 0x28,
        Opcode::Xor => 0x30,
        Opcode::Cmp => 0x38,
        other => panic!("{other:?} is not an ALU opcode"),
    }
}

fn alu_group1_reg_field(opcode: Opcode) -> u8 {
    match opcode {
        Opcode::Add => 0,
        Opcode::Or => 1,
        Opcode::Adc => 2,
        Opcode::Sbb => 3,
        Opcode::And => 4,
        Opcode::Sub => 5,
        Opcode::Xor => 6,
        Opcode::Cmp => 7,
        other => panic!("{other:?} is not an ALU opcode"),
    }
}

/// ALU/MOV `r/m, reg` forms: this canonicalizes the register/register case
/// (which can legally be encoded either direction) to `rm = operands[0]`,
/// `reg = operands[1]` — matching `0x00/0x01`-style "r/m is destination"
/// byte, never the `0x02/0x03` "register is destination" alternative.
/// Destination-is-memory forces the same direction; destination-register
/// with a memory source is the only case forced the other way, since a
/// memory operand can never sit in ModR/M's `reg` field.
fn encode_rm_reg(out: &mut Vec<u8>, dst: &Operand, src: &Operand, byte_op: u8, _wide_op: u8) {
    let (rm_operand, reg) = match (dst, src) {
        (Operand::Register(_), Operand::Memory(_)) => {
            let reg = match dst {
                Operand::Register(r) => r,
                _ => unreachable!(),
            };
            (src, reg)
        }
        _ => {
            let reg = match src {
                Operand::Register(r) => r,
                other => panic!("expected a register source, got {other:?}"),
            };
            (dst, reg)
        }
    };
    let width = reg.width();
    let opcode_byte = if width == Width::Byte { byte_op } else { byte_op | 1 };
    let rm = encode_rm(rm_operand);
    out.push(opcode_byte);
    emit_rex_for(out, reg, &rm);
    emit_modrm(out, gpr_index(reg) & 7, &rm);
}

/// Inserts REX right after the opcode byte already pushed, by rewriting:
/// since legacy-prefix bytes precede the opcode in `out`, REX must be
/// spliced in *before* the opcode byte, not after. Callers build the
/// opcode+modrm tail first and call this helper, which fixes the ordering.
fn emit_rex_for(out: &mut Vec<u8>, reg: &Register, rm: &EncodedRm) {
    let bits = reg_field_rex(reg).merge(rm.rex);
    if bits.any() {
        let opcode_pos = out.len() - 1;
        out.insert(opcode_pos, bits.byte());
    }
}

fn encode_alu(out: &mut Vec<u8>, inst: &Instruction) {
    let dst = &inst.operands[0];
    let src = &inst.operands[1];
    if let Operand::Immediate(imm) = src {
        encode_group1_imm(out, inst.opcode, dst, *imm);
        return;
    }
    let base = alu_base_byte(inst.opcode);
    encode_rm_reg(out, dst, src, base, base | 1);
}

/// Canonical form for ALU-with-immediate: always Group 1 (`0x80`/`0x81`/
/// `0x83`), never the accumulator shortcuts (`0x04`/`0x05`, ...) — Group 1
/// covers every destination (register or memory) the accumulator forms
/// can't, and the immediate's own recorded width picks the exact byte
/// unambiguously (`0x80` for byte destinations, `0x83` when the immediate
/// was narrowed to a sign-extended byte, `0x81` otherwise).
fn encode_group1_imm(out: &mut Vec<u8>, opcode: Opcode, dst: &Operand, imm: Immediate) {
    let rm = encode_rm(dst);
    let dst_width = operand_effective_width(dst);
    let op_byte = if dst_width == Width::Byte {
        0x80
    } else if imm.width == Width::Byte {
        0x83
    } else {
        0x81
    };
    out.push(op_byte);
    let reg_bits = match dst {
        Operand::Register(r) => reg_rex_bits(r),
        _ => RexBits::default(),
    };
    emit_rex_tail(out, reg_bits.merge(rm.rex).merge(RexBits { w: dst_width == Width::Qword, ..Default::default() }));
    emit_modrm(out, alu_group1_reg_field(opcode), &rm);
    push_immediate(out, imm);
}

/// Splices a REX byte before the most recently pushed opcode byte (`out`
/// has exactly one opcode byte appended when this is called).
fn emit_rex_tail(out: &mut Vec<u8>, bits: RexBits) {
    if bits.any() {
        let opcode_pos = out.len() - 1;
        out.insert(opcode_pos, bits.byte());
    }
}

fn operand_effective_width(op: &Operand) -> Width {
    match op {
        Operand::Register(r) => r.width(),
        Operand::Memory(m) => m.pointer_size.width(),
        Operand::Immediate(i) => i.width,
        Operand::RelativeTarget(_) => Width::Qword,
    }
}

// ── TEST ──

/// `TEST` has no Group-1-style immediate form sharing the ALU opcode
/// space; its immediate encoding always goes through Group 3 (`0xF6`/`0xF7`
/// reg=0), which this encoder uses uniformly instead of the `0xA8`/`0xA9`
/// accumulator shortcuts for the same reason as the ALU case above.
fn encode_test(out: &mut Vec<u8>, inst: &Instruction) {
    let dst = &inst.operands[0];
    let src = &inst.operands[1];
    if let Operand::Immediate(imm) = src {
        let rm = encode_rm(dst);
        let width = operand_effective_width(dst);
        let op_byte = if width == Width::Byte { 0xF6 } else { 0xF7 };
        out.push(op_byte);
        let reg_bits = match dst {
            Operand::Register(r) => reg_rex_bits(r),
            _ => RexBits::default(),
        };
        emit_rex_tail(out, reg_bits.merge(rm.rex).merge(RexBits { w: width == Width::Qword, ..Default::default() }));
        emit_modrm(out, 0, &rm);
        push_immediate(out, *imm);
        return;
    }
    // TEST's register/memory form is always decoded as [rm, reg]: operands[0]
    // is the ModR/M r/m slot, operands[1] is always a register in the reg
    // field — never the other way around.
    let reg = match src {
        Operand::Register(r) => r,
        other => panic!("TEST's second operand must be a register, got {other:?}"),
    };
    let width = reg.width();
    let op_byte = if width == Width::Byte { 0x84 } else { 0x85 };
    let rm = encode_rm(dst);
    out.push(op_byte);
    emit_rex_for(out, reg, &rm);
    emit_modrm(out, gpr_index(reg) & 7, &rm);
}

// ── MOV / MOVABS / MOVSXD / MOVZX / MOVSX / LEA ──

/// Canonical form for `MOV reg, imm`: always the opcode+reg-embedded form
/// (`0xB0`-`0xB7`/`0xB8`-`0xBF`), never `0xC6`/`0xC7`'s `mod=11` register
/// alternative — `0xC6`/`0xC7` is reserved for memory destinations here.
fn encode_mov(out: &mut Vec<u8>, inst: &Instruction) {
    let dst = &inst.operands[0];
    let src = &inst.operands[1];
    if let Operand::Immediate(imm) = src {
        match dst {
            Operand::Register(reg) => {
                let index = gpr_index(reg);
                let base = if reg.width() == Width::Byte { 0xB0 } else { 0xB8 };
                out.push(base + (index & 7));
                emit_rex_tail(out, reg_rex_bits(reg).merge(RexBits { b: index >= 8, ..Default::default() }));
                push_immediate(out, *imm);
            }
            Operand::Memory(_) => {
                let rm = encode_rm(dst);
                let width = operand_effective_width(dst);
                out.push(if width == Width::Byte { 0xC6 } else { 0xC7 });
                emit_rex_tail(out, rm.rex.merge(RexBits { w: width == Width::Qword, ..Default::default() }));
                emit_modrm(out, 0, &rm);
                push_immediate(out, *imm);
            }
            other => panic!("MOV destination must be register or memory, got {other:?}"),
        }
        return;
    }
    encode_rm_reg(out, dst, src, 0x88, 0x89);
}

fn encode_movabs(out: &mut Vec<u8>, inst: &Instruction) {
    let reg = match &inst.operands[0] {
        Operand::Register(r) => r,
        other => panic!("MOVABS destination must be a register, got {other:?}"),
    };
    let imm = as_immediate(&inst.operands[1]);
    let index = gpr_index(reg);
    out.push(0xB8 + (index & 7));
    emit_rex_tail(out, RexBits { w: true, b: index >= 8, ..Default::default() });
    push_immediate(out, imm);
}

fn encode_movsxd(out: &mut Vec<u8>, inst: &Instruction) {
    let reg = match &inst.operands[0] {
        Operand::Register(r) => r,
        other => panic!("MOVSXD destination must be a register, got {other:?}"),
    };
    let rm = encode_rm(&inst.operands[1]);
    out.push(0x63);
    emit_rex_for_with_w(out, reg, &rm, true);
    emit_modrm(out, gpr_index(reg) & 7, &rm);
}

fn encode_movx(out: &mut Vec<u8>, inst: &Instruction, byte_op: u8, word_op: u8) {
    let reg = match &inst.operands[0] {
        Operand::Register(r) => r,
        other => panic!("MOVZX/MOVSX destination must be a register, got {other:?}"),
    };
    let src_width = operand_effective_width(&inst.operands[1]);
    let rm = encode_rm(&inst.operands[1]);
    out.push(0x0F);
    out.push(if src_width == Width::Byte { byte_op } else { word_op });
    // REX must precede 0x0F, so splice before both opcode bytes.
    let bits = reg_field_rex(reg)
        .merge(rm.rex)
        .merge(RexBits { w: reg.width() == Width::Qword, ..Default::default() });
    if bits.any() {
        let pos = out.len() - 2;
        out.insert(pos, bits.byte());
    }
    emit_modrm(out, gpr_index(reg) & 7, &rm);
}

fn encode_lea(out: &mut Vec<u8>, inst: &Instruction) {
    let reg = match &inst.operands[0] {
        Operand::Register(r) => r,
        other => panic!("LEA destination must be a register, got {other:?}"),
    };
    let rm = encode_rm(&inst.operands[1]);
    out.push(0x8D);
    emit_rex_for_with_w(out, reg, &rm, reg.width() == Width::Qword);
    emit_modrm(out, gpr_index(reg) & 7, &rm);
}

fn emit_rex_for_with_w(out: &mut Vec<u8>, reg: &Register, rm: &EncodedRm, w: bool) {
    let bits = reg_field_rex(reg).merge(rm.rex).merge(RexBits { w, ..Default::default() });
    if bits.any() {
        let opcode_pos = out.len() - 1;
        out.insert(opcode_pos, bits.byte());
    }
}

fn encode_cmovcc(out: &mut Vec<u8>, inst: &Instruction, cc: ConditionCode) {
    let reg = match &inst.operands[0] {
        Operand::Register(r) => r,
        other => panic!("CMOVcc destination must be a register, got {other:?}"),
    };
    let rm = encode_rm(&inst.operands[1]);
    out.push(0x0F);
    out.push(0x40 + cc.to_nibble());
    let bits = reg_field_rex(reg).merge(rm.rex).merge(RexBits { w: reg.width() == Width::Qword, ..Default::default() });
    if bits.any() {
        let pos = out.len() - 2;
        out.insert(pos, bits.byte());
    }
    emit_modrm(out, gpr_index(reg) & 7, &rm);
}

fn encode_setcc(out: &mut Vec<u8>, inst: &Instruction, cc: ConditionCode) {
    let rm = encode_rm(&inst.operands[0]);
    out.push(0x0F);
    out.push(0x90 + cc.to_nibble());
    if rm.rex.any() {
        let pos = out.len() - 2;
        out.insert(pos, rm.rex.byte());
    }
    emit_modrm(out, 0, &rm);
}

// ── Stack / control flow ──

/// PUSH: register form (`0x50`-`0x57`) when the operand is a register,
/// `0x68`/`0x6A` when it's an immediate (width picks the byte), and Group
/// 5's `/6` when it's memory.
fn encode_push(out: &mut Vec<u8>, inst: &Instruction) {
    match &inst.operands[0] {
        Operand::Register(reg) => {
            let index = gpr_index(reg);
            out.push(0x50 + (index & 7));
            emit_rex_tail(out, RexBits { b: index >= 8, ..Default::default() });
        }
        Operand::Immediate(imm) => {
            if imm.width == Width::Byte {
                out.push(0x6A);
                out.push(imm.value as u8);
            } else {
                out.push(0x68);
                out.extend_from_slice(&(imm.value as u32).to_le_bytes());
            }
        }
        Operand::Memory(_) => {
            let rm = encode_rm(&inst.operands[0]);
            out.push(0xFF);
            emit_rex_tail_rm(out, rm.rex);
            emit_modrm(out, 6, &rm);
        }
        other => panic!("PUSH operand must be register, immediate, or memory, got {other:?}"),
    }
}

fn emit_rex_tail_rm(out: &mut Vec<u8>, bits: RexBits) {
    if bits.any() {
        let pos = out.len() - 1;
        out.insert(pos, bits.byte());
    }
}

/// POP: register form (`0x58`-`0x5F`) when the operand is a register,
/// `0x8F /0` when it's memory.
fn encode_pop(out: &mut Vec<u8>, inst: &Instruction) {
    match &inst.operands[0] {
        Operand::Register(reg) => {
            let index = gpr_index(reg);
            out.push(0x58 + (index & 7));
            emit_rex_tail(out, RexBits { b: index >= 8, ..Default::default() });
        }
        Operand::Memory(_) => {
            let rm = encode_rm(&inst.operands[0]);
            out.push(0x8F);
            emit_rex_tail_rm(out, rm.rex);
            emit_modrm(out, 0, &rm);
        }
        other => panic!("POP operand must be register or memory, got {other:?}"),
    }
}

fn encode_call(out: &mut Vec<u8>, inst: &Instruction, rip: u64, prefix_len: usize) {
    match &inst.operands[0] {
        Operand::RelativeTarget(target) => {
            let total_len = prefix_len + 5;
            let rel = (*target as i64) - (rip as i64 + total_len as i64);
            out.push(0xE8);
            out.extend_from_slice(&(rel as i32).to_le_bytes());
        }
        Operand::Register(_) | Operand::Memory(_) => {
            let rm = encode_rm(&inst.operands[0]);
            out.push(0xFF);
            emit_rex_tail_rm(out, rm.rex);
            emit_modrm(out, 2, &rm);
        }
        other => panic!("CALL operand must be a relative target, register, or memory, got {other:?}"),
    }
}

fn encode_ret(out: &mut Vec<u8>, inst: &Instruction) {
    match inst.operands.first() {
        Some(Operand::Immediate(imm)) => {
            out.push(0xC2);
            out.extend_from_slice(&(imm.value as u16).to_le_bytes());
        }
        None => out.push(0xC3),
        Some(other) => panic!("RET's only operand must be an immediate, got {other:?}"),
    }
}

/// JMP: short form (`0xEB`) when the resulting displacement fits a signed
/// byte, near form (`0xE9`) otherwise. Both encode the same
/// `Operand::RelativeTarget`; the choice is made purely by which one fits,
/// preferring the shorter encoding like a real assembler would.
fn encode_jmp(out: &mut Vec<u8>, inst: &Instruction, rip: u64, prefix_len: usize) {
    match &inst.operands[0] {
        Operand::RelativeTarget(target) => {
            let short_len = prefix_len + 2;
            let short_rel = (*target as i64) - (rip as i64 + short_len as i64);
            if i8::try_from(short_rel).is_ok() {
                out.push(0xEB);
                out.push(short_rel as i8 as u8);
            } else {
                let near_len = prefix_len + 5;
                let rel = (*target as i64) - (rip as i64 + near_len as i64);
                out.push(0xE9);
                out.extend_from_slice(&(rel as i32).to_le_bytes());
            }
        }
        Operand::Register(_) | Operand::Memory(_) => {
            let rm = encode_rm(&inst.operands[0]);
            out.push(0xFF);
            emit_rex_tail_rm(out, rm.rex);
            emit_modrm(out, 4, &rm);
        }
        other => panic!("JMP operand must be a relative target, register, or memory, got {other:?}"),
    }
}

/// Jcc: short form (`0x70`+cc) when it fits, near form (`0x0F 0x80`+cc)
/// otherwise — same fit-first policy as `encode_jmp`.
fn encode_jcc(out: &mut Vec<u8>, inst: &Instruction, cc: ConditionCode, rip: u64, prefix_len: usize) {
    let target = match inst.operands[0] {
        Operand::RelativeTarget(t) => t,
        other => panic!("Jcc operand must be a relative target, got {other:?}"),
    };
    let short_len = prefix_len + 2;
    let short_rel = (target as i64) - (rip as i64 + short_len as i64);
    if i8::try_from(short_rel).is_ok() {
        out.push(0x70 + cc.to_nibble());
        out.push(short_rel as i8 as u8);
    } else {
        let near_len = prefix_len + 6;
        let rel = (target as i64) - (rip as i64 + near_len as i64);
        out.push(0x0F);
        out.push(0x80 + cc.to_nibble());
        out.extend_from_slice(&(rel as i32).to_le_bytes());
    }
}

fn encode_int(out: &mut Vec<u8>, inst: &Instruction) {
    let imm = as_immediate(&inst.operands[0]);
    out.push(0xCD);
    out.push(imm.value as u8);
}

fn encode_incdec(out: &mut Vec<u8>, inst: &Instruction, reg_field: u8) {
    let rm = encode_rm(&inst.operands[0]);
    let width = operand_effective_width(&inst.operands[0]);
    out.push(if width == Width::Byte { 0xFE } else { 0xFF });
    emit_rex_tail_rm(out, rm.rex.merge(RexBits { w: width == Width::Qword, ..Default::default() }));
    emit_modrm(out, reg_field, &rm);
}

fn encode_group3_unary(out: &mut Vec<u8>, inst: &Instruction, reg_field: u8) {
    let rm = encode_rm(&inst.operands[0]);
    let width = operand_effective_width(&inst.operands[0]);
    out.push(if width == Width::Byte { 0xF6 } else { 0xF7 });
    emit_rex_tail_rm(out, rm.rex.merge(RexBits { w: width == Width::Qword, ..Default::default() }));
    emit_modrm(out, reg_field, &rm);
}

// ── Intel-syntax formatter ──

/// Renders `inst` as a disassembler would: lowercase mnemonic, comma-joined
/// operands, memory operands tagged with their pointer-size keyword. RIP-
/// relative targets and branch targets both print as a plain absolute
/// address (not `rip ± disp` for branches) since `Operand::RelativeTarget`
/// already carries the resolved address, not a raw displacement.
pub fn to_intel_syntax(inst: &Instruction) -> String {
    let mnemonic = inst.opcode.mnemonic();
    if inst.operands.is_empty() {
        return mnemonic.into_owned();
    }
    let operands: Vec<String> = inst.operands.iter().map(format_operand).collect();
    format!("{} {}", mnemonic, operands.join(", "))
}

fn format_operand(op: &Operand) -> String {
    match op {
        Operand::Register(reg) => reg.name().to_string(),
        Operand::Immediate(imm) => format!("0x{:x}", imm.value),
        Operand::RelativeTarget(addr) => format!("0x{addr:x}"),
        Operand::Memory(m) => {
            let addr = if m.rip_relative {
                format!("rip{}", signed_hex(m.displacement.value))
            } else {
                let mut parts = Vec::new();
                if let Some(base) = m.base {
                    parts.push(Register::gpr(base.0, m.address_width).name().to_string());
                }
                if let Some(index) = m.index {
                    parts.push(format!("{}*{}", Register::gpr(index.0, m.address_width).name(), m.scale));
                }
                let mut s = parts.join("+");
                if m.displacement.value != 0 || s.is_empty() {
                    if s.is_empty() {
                        s = format!("0x{:x}", m.displacement.value as u64);
                    } else {
                        s.push_str(&signed_hex(m.displacement.value));
                    }
                }
                s
            };
            format!("{} [{}]", PointerSize::keyword(m.pointer_size), addr)
        }
    }
}

fn signed_hex(value: i64) -> String {
    if value < 0 {
        format!("-0x{:x}", value.unsigned_abs())
    } else {
        format!("+0x{value:x}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitbuffer::BitBuffer;
    use crate::decoder::decode_one;

    fn roundtrip(bytes: &[u8], rip: u64) -> Instruction {
        let mut buf = BitBuffer::new(bytes);
        let inst = decode_one(&mut buf, rip).expect("decode should succeed");
        let re = encode(&inst, rip);
        assert_eq!(re, bytes, "encode(decode(bytes)) must reproduce bytes exactly");
        let mut buf2 = BitBuffer::new(&re);
        let inst2 = decode_one(&mut buf2, rip).expect("re-decode should succeed");
        assert_eq!(inst, inst2, "decode(encode(decode(bytes))) must equal decode(bytes)");
        inst
    }

    #[test]
    fn roundtrips_mov_reg_imm32() {
        roundtrip(&[0xB8, 0x12, 0x34, 0x56, 0x78], 0);
    }

    #[test]
    fn roundtrips_movabs() {
        roundtrip(&[0x48, 0xB8, 1, 0, 0, 0, 0, 0, 0, 0], 0);
    }

    #[test]
    fn roundtrips_rip_relative_memory() {
        roundtrip(&[0x48, 0x8B, 0x05, 0x10, 0x00, 0x00, 0x00], 0);
    }

    #[test]
    fn roundtrips_sib_scaled_index() {
        roundtrip(&[0x03, 0x04, 0x88], 0);
    }

    #[test]
    fn roundtrips_jmp_rel32() {
        roundtrip(&[0xE9, 0xFC, 0xE2, 0x02, 0x00], 0x5);
    }

    #[test]
    fn roundtrips_jmp_rel8_when_it_fits() {
        roundtrip(&[0xEB, 0x10], 0x1000);
    }

    #[test]
    fn roundtrips_spl_with_rex() {
        roundtrip(&[0x40, 0xB4, 0x05], 0);
    }

    #[test]
    fn roundtrips_push_pop_register() {
        roundtrip(&[0x50], 0);
        roundtrip(&[0x58], 0);
        roundtrip(&[0x41, 0x50], 0); // push r8
    }

    #[test]
    fn roundtrips_group1_immediate_forms() {
        roundtrip(&[0x83, 0xC0, 0x05], 0); // add eax, 0x5 (imm8)
        roundtrip(&[0x81, 0xC0, 0x00, 0x01, 0x00, 0x00], 0); // add eax, 0x100 (imm32)
        roundtrip(&[0x80, 0xC3, 0x01], 0); // add bl, 0x1
    }

    #[test]
    fn roundtrips_lea_with_base_index_disp() {
        // lea rax, [rbx+rcx*2+0x10]
        roundtrip(&[0x48, 0x8D, 0x44, 0x4B, 0x10], 0);
    }

    #[test]
    fn roundtrips_call_and_ret() {
        roundtrip(&[0xE8, 0x00, 0x00, 0x00, 0x00], 0x1000);
        roundtrip(&[0xC3], 0);
        roundtrip(&[0xC2, 0x08, 0x00], 0);
    }

    #[test]
    fn roundtrips_cmovcc_and_setcc() {
        roundtrip(&[0x0F, 0x44, 0xC1], 0); // cmove eax, ecx
        roundtrip(&[0x0F, 0x94, 0xC0], 0); // sete al
    }

    #[test]
    fn intel_syntax_formats_mov_immediate() {
        let mut buf = BitBuffer::new(&[0xB8, 0x12, 0x34, 0x56, 0x78]);
        let inst = decode_one(&mut buf, 0).unwrap();
        assert_eq!(to_intel_syntax(&inst), "mov eax, 0x78563412");
    }

    #[test]
    fn intel_syntax_formats_rip_relative_memory() {
        let mut buf = BitBuffer::new(&[0x48, 0x8B, 0x05, 0x10, 0x00, 0x00, 0x00]);
        let inst = decode_one(&mut buf, 0).unwrap();
        assert_eq!(to_intel_syntax(&inst), "mov rax, QWORD PTR [rip+0x10]");
    }

    #[test]
    fn intel_syntax_formats_sib_addressing() {
        let mut buf = BitBuffer::new(&[0x03, 0x04, 0x88]);
        let inst = decode_one(&mut buf, 0).unwrap();
        assert_eq!(to_intel_syntax(&inst), "add eax, DWORD PTR [rax+rcx*4]");
    }
}
