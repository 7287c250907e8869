//! shellcraft - composable multi-architecture shellcode primitives.
//!
//! shellcraft generates short, self-contained machine-code fragments for
//! i386, amd64, ARM, AArch64 and RISC-V 64 from a catalog of parameterized
//! primitives. Primitives are written once per architecture family and
//! composed into programs without hand-writing instruction sequences.
//!
//! # Primary Usage
//!
//! ```
//! use shellcraft::{Args, Arch, Program};
//!
//! let mut program = Program::new(Arch::Amd64);
//! program.invoke("setregs", &Args::new().with("rdi", "rsi").with("rsi", "rdi"))?;
//! program.invoke("syscall", &Args::new().with("name", "exit").with("arg0", 0))?;
//! println!("{}", program.to_asm());
//! # Ok::<(), shellcraft::ShellcraftError>(())
//! ```
//!
//! # Architecture
//!
//! - [`core`] - Targets, operands, fragments, programs
//! - [`setregs`] - Simultaneous register assignment
//! - [`primitives`] - The primitive catalog
//! - [`syscalls`] - Syscall number tables
//! - [`gadgets`] - Return-oriented gadget search in x86 binaries
//! - [`x86`], [`arm`], [`aarch64`], [`riscv`] - Per-family tables and lowering

pub mod core;
pub mod setregs;
pub mod primitives;
pub mod syscalls;
pub mod gadgets;

pub mod x86;
pub mod arm;
pub mod aarch64;
pub mod riscv;

pub use crate::core::{
    ArgValue, Args, Arch, Fragment, Operand, Program, Register, ShellResult, ShellcraftError, Target,
};
pub use primitives::{Context, Primitive, CATALOG};
pub use gadgets::{Gadget, GadgetFinder};
pub use setregs::{resolve, AssignmentRequest, Resolution, Step};
pub use syscalls::{LinuxSyscalls, SyscallTable, LINUX};
