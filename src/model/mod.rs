//! Instruction data model (spec §3): registers, operands, opcodes, and the
//! decoded `Instruction` type itself. This module is pure data — no
//! decoding, encoding, or execution logic lives here.

pub mod instruction;
pub mod opcode;
pub mod operand;
pub mod register;

pub use instruction::{Instruction, Operand, OpcodeMap, Prefixes};
pub use opcode::{ConditionCode, Opcode};
pub use operand::{Displacement, Immediate, IndirectOperand, IndirectOperandBuilder, OperandBuildError, PointerSize};
pub use register::{GprIndex, Register, SegReg, Width};
