//! RISC-V 64-bit architecture components.
//!
//! Register file (ABI names) and Linux syscall convention for RV64, plus the
//! lowering to GNU assembler syntax.

pub mod lowering;

pub use lowering::RiscvLowering;

use crate::core::arch::Arch;
use crate::core::register_file::{RegisterDef, RegisterFile};
use crate::core::target::{SyscallAbi, Target};

/// RV64 integer registers by ABI name, in encoding order (x0..x31). `fp` is
/// the conventional alias of `s0`.
static RISCV64_REGISTERS: [RegisterDef; 33] = [
    RegisterDef::read_only("zero", 64),
    RegisterDef::full("ra", 64),
    RegisterDef::full("sp", 64),
    RegisterDef::full("gp", 64),
    RegisterDef::full("tp", 64),
    RegisterDef::full("t0", 64),
    RegisterDef::full("t1", 64),
    RegisterDef::full("t2", 64),
    RegisterDef::full("s0", 64),
    RegisterDef::full("s1", 64),
    RegisterDef::full("a0", 64),
    RegisterDef::full("a1", 64),
    RegisterDef::full("a2", 64),
    RegisterDef::full("a3", 64),
    RegisterDef::full("a4", 64),
    RegisterDef::full("a5", 64),
    RegisterDef::full("a6", 64),
    RegisterDef::full("a7", 64),
    RegisterDef::full("s2", 64),
    RegisterDef::full("s3", 64),
    RegisterDef::full("s4", 64),
    RegisterDef::full("s5", 64),
    RegisterDef::full("s6", 64),
    RegisterDef::full("s7", 64),
    RegisterDef::full("s8", 64),
    RegisterDef::full("s9", 64),
    RegisterDef::full("s10", 64),
    RegisterDef::full("s11", 64),
    RegisterDef::full("t3", 64),
    RegisterDef::full("t4", 64),
    RegisterDef::full("t5", 64),
    RegisterDef::full("t6", 64),
    RegisterDef::sub("fp", "s0", 64, 0),
];

/// Linux RV64: `ecall` with the number in a7.
pub static RISCV64: Target = Target {
    arch: Arch::Riscv64,
    registers: RegisterFile::new(Arch::Riscv64, &RISCV64_REGISTERS),
    stack_pointer: "sp",
    return_register: "a0",
    temporary: "t0",
    scratch: &[
        "t6", "t5", "t4", "t3", "t2", "t1", "t0", "s11", "s10", "s9", "s8", "s7", "s6", "s5", "s4",
        "s3", "s2", "s1", "a7", "a6", "a5", "a4", "a3", "a2", "a1", "a0",
    ],
    has_exchange: false,
    stack_align: 8,
    syscall: SyscallAbi {
        number: "a7",
        args: &["a0", "a1", "a2", "a3", "a4", "a5"],
    },
    lowering: &RiscvLowering,
};
