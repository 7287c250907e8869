//! 32-bit ARM (A32) architecture components.
//!
//! Register file and Linux EABI syscall convention for ARM, plus the
//! instruction lowering to unified-syntax assembly.

pub mod lowering;

pub use lowering::ArmLowering;

use crate::core::arch::Arch;
use crate::core::register_file::{RegisterDef, RegisterFile};
use crate::core::target::{SyscallAbi, Target};

/// ARM core registers in encoding order. `pc` is read-only: writing it is a
/// branch, not a register assignment.
static ARM_REGISTERS: [RegisterDef; 16] = [
    RegisterDef::full("r0", 32),
    RegisterDef::full("r1", 32),
    RegisterDef::full("r2", 32),
    RegisterDef::full("r3", 32),
    RegisterDef::full("r4", 32),
    RegisterDef::full("r5", 32),
    RegisterDef::full("r6", 32),
    RegisterDef::full("r7", 32),
    RegisterDef::full("r8", 32),
    RegisterDef::full("r9", 32),
    RegisterDef::full("r10", 32),
    RegisterDef::full("r11", 32),
    RegisterDef::full("r12", 32),
    RegisterDef::full("sp", 32),
    RegisterDef::full("lr", 32),
    RegisterDef::read_only("pc", 32),
];

/// Linux ARM EABI: `svc #0` with the number in r7.
pub static ARM: Target = Target {
    arch: Arch::Arm,
    registers: RegisterFile::new(Arch::Arm, &ARM_REGISTERS),
    stack_pointer: "sp",
    return_register: "r0",
    temporary: "r12",
    scratch: &[
        "r12", "r11", "r10", "r9", "r8", "r7", "r6", "r5", "r4", "r3", "r2", "r1", "r0",
    ],
    has_exchange: false,
    stack_align: 4,
    syscall: SyscallAbi {
        number: "r7",
        args: &["r0", "r1", "r2", "r3", "r4", "r5", "r6"],
    },
    lowering: &ArmLowering,
};
