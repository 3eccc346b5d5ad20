//! corevm — a user-space x86-64 instruction-set emulator.
//!
//! Given a flat region of loaded bytes and an entry point, `Cpu` fetches,
//! decodes, and executes one instruction at a time against a
//! `RegisterFile` and a permission-checked `MemoryController`, until a
//! `TerminatingEvent` (HLT, a stack-window violation, an illegal access,
//! or a debugger breakpoint) stops it.
//!
//! This crate decodes and executes a closed subset of the ISA — integer
//! ALU, data movement, stack, and control-flow instructions — rather than
//! the full instruction set. Floating point, SIMD, segmentation beyond
//! flat addressing, system calls, and privilege-level transitions are out
//! of scope; see `DESIGN.md` for the full list.
//!
//! # Layers
//! - **BitBuffer** (`bitbuffer.rs`) — the cursor the decoder reads through
//! - **Model** (`model/`) — registers, operands, opcodes, the decoded
//!   `Instruction` type
//! - **Decoder** (`decoder.rs`) / **Encoder** (`encoder.rs`) — bytes to
//!   `Instruction` and back, plus an Intel-syntax formatter
//! - **Memory** (`memory/`) — lazily paged guest memory with R/W/X
//!   permission tracking
//! - **Registers** (`registers.rs`) / **Flags** (`flags.rs`) — the
//!   register file and RFLAGS computation
//! - **Executor** (`executor/`) — opcode dispatch and per-instruction
//!   semantics
//! - **CPU** (`cpu.rs`) — the fetch/decode/execute driver and its
//!   `EmulatorConfig`

pub mod bitbuffer;
pub mod cpu;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod executor;
pub mod flags;
pub mod memory;
pub mod model;
pub mod registers;

pub use bitbuffer::{BitBuffer, BufferError};
pub use cpu::{Cpu, EmulatorConfig, HookAction};
pub use decoder::{decode_one, MAX_INSTRUCTION_LEN};
pub use encoder::{encode, to_intel_syntax};
pub use error::{DecodeError, TerminatingEvent};
pub use memory::{Initializer, MemoryController, MemoryError, RandomInitializer, ZeroInitializer};
pub use model::{Instruction, Opcode, Operand, Register};
pub use registers::RegisterFile;
