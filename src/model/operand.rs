//! Indirect (memory) operands (spec §3.2) and the immediate operand kind.

use thiserror::Error;

use super::register::{GprIndex, Width};

/// A signed displacement with the width tag that fixes its sign-extension
/// and printed width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Displacement {
    pub value: i64,
    pub width: Width,
}

impl Displacement {
    pub fn new(value: i64, width: Width) -> Self {
        Displacement { value, width }
    }

    pub fn zero() -> Self {
        Displacement { value: 0, width: Width::Byte }
    }
}

/// The access width an instruction applies through a memory operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerSize {
    Byte,
    Word,
    Dword,
    Qword,
}

impl PointerSize {
    pub fn from_width(w: Width) -> Self {
        match w {
            Width::Byte => PointerSize::Byte,
            Width::Word => PointerSize::Word,
            Width::Dword => PointerSize::Dword,
            Width::Qword => PointerSize::Qword,
        }
    }

    pub fn width(self) -> Width {
        match self {
            PointerSize::Byte => Width::Byte,
            PointerSize::Word => Width::Word,
            PointerSize::Dword => Width::Dword,
            PointerSize::Qword => Width::Qword,
        }
    }

    pub fn keyword(self) -> &'static str {
        match self {
            PointerSize::Byte => "BYTE PTR",
            PointerSize::Word => "WORD PTR",
            PointerSize::Dword => "DWORD PTR",
            PointerSize::Qword => "QWORD PTR",
        }
    }
}

/// `[base + index*scale + displacement]`, optionally RIP-relative.
///
/// Invariants (enforced by the builder, not re-checked on every field
/// access): if `index` is present, `scale` is present and is a power of
/// two in `{1,2,4,8}`; if neither `base` nor `index` is present, a
/// displacement is mandatory; `rip_relative` implies no base/index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndirectOperand {
    pub base: Option<GprIndex>,
    pub index: Option<GprIndex>,
    pub scale: u8,
    pub displacement: Displacement,
    pub pointer_size: PointerSize,
    /// Address-computation width: 32-bit (EIP-relative/zero-extended) or
    /// 64-bit (RIP-relative/sign-extended base/index).
    pub address_width: Width,
    pub rip_relative: bool,
}

/// Errors building an `IndirectOperand` — these guard invariant violations,
/// which spec §7 classes as programming errors rather than emulated-data
/// errors, so the builder rejects them at construction time instead of
/// propagating a decode fault.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum OperandBuildError {
    #[error("scale must be 1, 2, 4, or 8")]
    InvalidScale,
    #[error("index present without a scale")]
    IndexWithoutScale,
    #[error("memory operand with neither base nor index must carry a displacement")]
    MissingDisplacement,
    #[error("this builder field was already set")]
    AlreadySet,
    #[error("rip-relative operand cannot also carry a base or index register")]
    RipRelativeWithBaseOrIndex,
}

/// A one-shot, value-consuming builder: each setter may be called at most
/// once, and `build()` consumes the builder (spec §9's "Builder
/// duplication / mutability" note).
#[derive(Debug, Default)]
pub struct IndirectOperandBuilder {
    base: Option<GprIndex>,
    index: Option<GprIndex>,
    scale: Option<u8>,
    displacement: Option<Displacement>,
    pointer_size: Option<PointerSize>,
    address_width: Option<Width>,
    rip_relative: bool,
    rip_relative_set: bool,
}

impl IndirectOperandBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn base(mut self, reg: GprIndex) -> Result<Self, OperandBuildError> {
        if self.base.is_some() {
            return Err(OperandBuildError::AlreadySet);
        }
        self.base = Some(reg);
        Ok(self)
    }

    pub fn index(mut self, reg: GprIndex, scale: u8) -> Result<Self, OperandBuildError> {
        if self.index.is_some() || self.scale.is_some() {
            return Err(OperandBuildError::AlreadySet);
        }
        if !matches!(scale, 1 | 2 | 4 | 8) {
            return Err(OperandBuildError::InvalidScale);
        }
        self.index = Some(reg);
        self.scale = Some(scale);
        Ok(self)
    }

    pub fn displacement(mut self, disp: Displacement) -> Result<Self, OperandBuildError> {
        if self.displacement.is_some() {
            return Err(OperandBuildError::AlreadySet);
        }
        self.displacement = Some(disp);
        Ok(self)
    }

    pub fn pointer_size(mut self, size: PointerSize) -> Result<Self, OperandBuildError> {
        if self.pointer_size.is_some() {
            return Err(OperandBuildError::AlreadySet);
        }
        self.pointer_size = Some(size);
        Ok(self)
    }

    pub fn address_width(mut self, width: Width) -> Result<Self, OperandBuildError> {
        if self.address_width.is_some() {
            return Err(OperandBuildError::AlreadySet);
        }
        self.address_width = Some(width);
        Ok(self)
    }

    pub fn rip_relative(mut self, value: bool) -> Result<Self, OperandBuildError> {
        if self.rip_relative_set {
            return Err(OperandBuildError::AlreadySet);
        }
        self.rip_relative = value;
        self.rip_relative_set = true;
        Ok(self)
    }

    pub fn build(self) -> Result<IndirectOperand, OperandBuildError> {
        if self.rip_relative && (self.base.is_some() || self.index.is_some()) {
            return Err(OperandBuildError::RipRelativeWithBaseOrIndex);
        }
        if self.index.is_some() && self.scale.is_none() {
            return Err(OperandBuildError::IndexWithoutScale);
        }
        if self.base.is_none() && self.index.is_none() && !self.rip_relative && self.displacement.is_none()
        {
            return Err(OperandBuildError::MissingDisplacement);
        }
        Ok(IndirectOperand {
            base: self.base,
            index: self.index,
            scale: self.scale.unwrap_or(1),
            displacement: self.displacement.unwrap_or_else(Displacement::zero),
            pointer_size: self.pointer_size.unwrap_or(PointerSize::Qword),
            address_width: self.address_width.unwrap_or(Width::Qword),
            rip_relative: self.rip_relative,
        })
    }
}

/// An immediate operand value. Stored as a 64-bit bit pattern; its
/// effective width and signedness come from the instruction template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Immediate {
    pub value: u64,
    pub width: Width,
}

impl Immediate {
    pub fn new(value: u64, width: Width) -> Self {
        Immediate { value, width }
    }

    /// The value sign-extended from `width` to a full i64.
    pub fn sign_extended(&self) -> i64 {
        let bits = self.width.bits();
        if bits == 64 {
            return self.value as i64;
        }
        let shift = 64 - bits;
        ((self.value << shift) as i64) >> shift
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_rejects_missing_displacement() {
        let result = IndirectOperandBuilder::new().build();
        assert_eq!(result.unwrap_err(), OperandBuildError::MissingDisplacement);
    }

    #[test]
    fn builder_rejects_index_without_valid_scale() {
        let err = IndirectOperandBuilder::new().index(GprIndex::RAX, 3);
        assert_eq!(err.unwrap_err(), OperandBuildError::InvalidScale);
    }

    #[test]
    fn builder_rejects_double_set() {
        let b = IndirectOperandBuilder::new().base(GprIndex::RAX).unwrap();
        assert_eq!(b.base(GprIndex::RBX).unwrap_err(), OperandBuildError::AlreadySet);
    }

    #[test]
    fn builder_succeeds_with_base_and_index() {
        let op = IndirectOperandBuilder::new()
            .base(GprIndex::RAX)
            .unwrap()
            .index(GprIndex::RCX, 4)
            .unwrap()
            .displacement(Displacement::new(-8, Width::Byte))
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(op.base, Some(GprIndex::RAX));
        assert_eq!(op.index, Some(GprIndex::RCX));
        assert_eq!(op.scale, 4);
        assert_eq!(op.displacement.value, -8);
    }

    #[test]
    fn immediate_sign_extends() {
        let imm = Immediate::new(0xff, Width::Byte);
        assert_eq!(imm.sign_extended(), -1);
        let imm = Immediate::new(0x7f, Width::Byte);
        assert_eq!(imm.sign_extended(), 0x7f);
    }
}
