//! AArch64 architecture components.
//!
//! Register file and Linux syscall convention for ARMv8-A in the A64
//! instruction set, plus the lowering to GNU assembler syntax.

pub mod lowering;

pub use lowering::Aarch64Lowering;

use crate::core::arch::Arch;
use crate::core::register_file::{RegisterDef, RegisterFile};
use crate::core::target::{SyscallAbi, Target};

/// A64 general-purpose registers. `xzr`/`wzr` read as zero and discard
/// writes; `sp` is its own register rather than an alias of x31.
static AARCH64_REGISTERS: [RegisterDef; 65] = [
    RegisterDef::full("x0", 64),
    RegisterDef::full("x1", 64),
    RegisterDef::full("x2", 64),
    RegisterDef::full("x3", 64),
    RegisterDef::full("x4", 64),
    RegisterDef::full("x5", 64),
    RegisterDef::full("x6", 64),
    RegisterDef::full("x7", 64),
    RegisterDef::full("x8", 64),
    RegisterDef::full("x9", 64),
    RegisterDef::full("x10", 64),
    RegisterDef::full("x11", 64),
    RegisterDef::full("x12", 64),
    RegisterDef::full("x13", 64),
    RegisterDef::full("x14", 64),
    RegisterDef::full("x15", 64),
    RegisterDef::full("x16", 64),
    RegisterDef::full("x17", 64),
    RegisterDef::full("x18", 64),
    RegisterDef::full("x19", 64),
    RegisterDef::full("x20", 64),
    RegisterDef::full("x21", 64),
    RegisterDef::full("x22", 64),
    RegisterDef::full("x23", 64),
    RegisterDef::full("x24", 64),
    RegisterDef::full("x25", 64),
    RegisterDef::full("x26", 64),
    RegisterDef::full("x27", 64),
    RegisterDef::full("x28", 64),
    RegisterDef::full("x29", 64),
    RegisterDef::full("x30", 64),
    RegisterDef::full("sp", 64),
    RegisterDef::read_only("xzr", 64),
    RegisterDef::sub("w0", "x0", 32, 0),
    RegisterDef::sub("w1", "x1", 32, 0),
    RegisterDef::sub("w2", "x2", 32, 0),
    RegisterDef::sub("w3", "x3", 32, 0),
    RegisterDef::sub("w4", "x4", 32, 0),
    RegisterDef::sub("w5", "x5", 32, 0),
    RegisterDef::sub("w6", "x6", 32, 0),
    RegisterDef::sub("w7", "x7", 32, 0),
    RegisterDef::sub("w8", "x8", 32, 0),
    RegisterDef::sub("w9", "x9", 32, 0),
    RegisterDef::sub("w10", "x10", 32, 0),
    RegisterDef::sub("w11", "x11", 32, 0),
    RegisterDef::sub("w12", "x12", 32, 0),
    RegisterDef::sub("w13", "x13", 32, 0),
    RegisterDef::sub("w14", "x14", 32, 0),
    RegisterDef::sub("w15", "x15", 32, 0),
    RegisterDef::sub("w16", "x16", 32, 0),
    RegisterDef::sub("w17", "x17", 32, 0),
    RegisterDef::sub("w18", "x18", 32, 0),
    RegisterDef::sub("w19", "x19", 32, 0),
    RegisterDef::sub("w20", "x20", 32, 0),
    RegisterDef::sub("w21", "x21", 32, 0),
    RegisterDef::sub("w22", "x22", 32, 0),
    RegisterDef::sub("w23", "x23", 32, 0),
    RegisterDef::sub("w24", "x24", 32, 0),
    RegisterDef::sub("w25", "x25", 32, 0),
    RegisterDef::sub("w26", "x26", 32, 0),
    RegisterDef::sub("w27", "x27", 32, 0),
    RegisterDef::sub("w28", "x28", 32, 0),
    RegisterDef::sub("w29", "x29", 32, 0),
    RegisterDef::sub("w30", "x30", 32, 0),
    RegisterDef::read_only_sub("wzr", "xzr", 32),
];

/// Linux AArch64: `svc #0` with the number in x8.
pub static AARCH64: Target = Target {
    arch: Arch::Aarch64,
    registers: RegisterFile::new(Arch::Aarch64, &AARCH64_REGISTERS),
    stack_pointer: "sp",
    return_register: "x0",
    temporary: "x16",
    scratch: &[
        "x16", "x17", "x15", "x14", "x13", "x12", "x11", "x10", "x9", "x19", "x20", "x21", "x22",
        "x23", "x24", "x25", "x26", "x27", "x28", "x8", "x7", "x6", "x5", "x4", "x3", "x2", "x1",
        "x0",
    ],
    has_exchange: false,
    stack_align: 16,
    syscall: SyscallAbi {
        number: "x8",
        args: &["x0", "x1", "x2", "x3", "x4", "x5"],
    },
    lowering: &Aarch64Lowering,
};
