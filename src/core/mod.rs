// This module serves as the central hub for shellcraft's architecture-independent pieces,
// the building blocks every primitive and every target family shares. It organizes the
// architecture identifiers (Arch and its families), static register files with alias
// tracking and the canonical-register bitset, the operand model (immediates, registers and
// memory references with construction-time validation), abstract instructions and immutable
// fragments, the Target description with the per-family Lowering seam, named primitive
// arguments, the Program composition driver and ELF object output. Nothing in here keeps
// mutable global state: register files build their name index once and are read-only
// afterwards, and every generation request owns its operands, arguments and fragments.

//! Core shellcraft infrastructure
//!
//! # Key Components
//!
//! ## Targets (`arch`, `target`, `register_file`)
//! - Supported architectures and their aliases
//! - Static register tables with sub-register aliasing
//! - The [`Lowering`] trait each architecture family implements
//!
//! ## Values and output (`operand`, `fragment`)
//! - Immediates, registers and memory references
//! - Instructions, local labels and immutable fragments
//!
//! ## Composition (`args`, `program`, `elf`)
//! - Named arguments for invoking primitives by name
//! - Programs of concatenated fragments, rendered as assembly text
//! - ELF relocatable objects for encoded x86 programs

pub mod arch;
pub mod args;
pub mod elf;
pub mod error;
pub mod fragment;
pub mod operand;
pub mod program;
pub mod register_file;
pub mod target;

pub use arch::{Arch, Family};
pub use args::{ArgValue, Args};
pub use error::{ShellResult, ShellcraftError};
pub use fragment::{Fragment, FragmentBuilder, InsnOperand, Instruction, Item, LabelRef};
pub use operand::{Immediate, MemoryRef, Operand};
pub use program::Program;
pub use register_file::{RegSet, Register, RegisterDef, RegisterFile};
pub use target::{Lowering, SyscallAbi, Target};
