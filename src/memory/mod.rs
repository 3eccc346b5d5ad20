//! Permission-checked paged virtual memory (spec §3.4, §4.5, §4.6).
//!
//! `PagedMemory` is the leaf: lazily allocated 4 KiB pages with per-byte
//! initialization tracking, no notion of permissions. `MemoryController`
//! wraps it with three `IntervalSet`s (R/W/X) and the loader-only
//! `initialize` bypass.

pub mod controller;
pub mod error;
pub mod interval;
pub mod paged;

pub use controller::MemoryController;
pub use error::MemoryError;
pub use interval::IntervalSet;
pub use paged::{Initializer, PagedMemory, RandomInitializer, ZeroInitializer, PAGE_SIZE};
