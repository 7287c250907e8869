//! x86 and x86-64 architecture components.
//!
//! This module contains all x86 specific code:
//! - Register files and syscall conventions for i386 and amd64
//! - Instruction lowering to Intel-syntax assembly
//! - In-process encoding using iced-x86

pub mod encoder;
pub mod lowering;

pub use encoder::X86Encoder;
pub use lowering::X86Lowering;

use crate::core::arch::Arch;
use crate::core::register_file::{RegisterDef, RegisterFile};
use crate::core::target::{SyscallAbi, Target};

/// amd64 registers. Full-width registers come first, in hardware encoding
/// order, so a canonical register's id is its encoding number.
static AMD64_REGISTERS: [RegisterDef; 68] = [
    RegisterDef::full("rax", 64),
    RegisterDef::full("rcx", 64),
    RegisterDef::full("rdx", 64),
    RegisterDef::full("rbx", 64),
    RegisterDef::full("rsp", 64),
    RegisterDef::full("rbp", 64),
    RegisterDef::full("rsi", 64),
    RegisterDef::full("rdi", 64),
    RegisterDef::full("r8", 64),
    RegisterDef::full("r9", 64),
    RegisterDef::full("r10", 64),
    RegisterDef::full("r11", 64),
    RegisterDef::full("r12", 64),
    RegisterDef::full("r13", 64),
    RegisterDef::full("r14", 64),
    RegisterDef::full("r15", 64),
    RegisterDef::sub("eax", "rax", 32, 0),
    RegisterDef::sub("ecx", "rcx", 32, 0),
    RegisterDef::sub("edx", "rdx", 32, 0),
    RegisterDef::sub("ebx", "rbx", 32, 0),
    RegisterDef::sub("esp", "rsp", 32, 0),
    RegisterDef::sub("ebp", "rbp", 32, 0),
    RegisterDef::sub("esi", "rsi", 32, 0),
    RegisterDef::sub("edi", "rdi", 32, 0),
    RegisterDef::sub("r8d", "r8", 32, 0),
    RegisterDef::sub("r9d", "r9", 32, 0),
    RegisterDef::sub("r10d", "r10", 32, 0),
    RegisterDef::sub("r11d", "r11", 32, 0),
    RegisterDef::sub("r12d", "r12", 32, 0),
    RegisterDef::sub("r13d", "r13", 32, 0),
    RegisterDef::sub("r14d", "r14", 32, 0),
    RegisterDef::sub("r15d", "r15", 32, 0),
    RegisterDef::sub("ax", "rax", 16, 0),
    RegisterDef::sub("cx", "rcx", 16, 0),
    RegisterDef::sub("dx", "rdx", 16, 0),
    RegisterDef::sub("bx", "rbx", 16, 0),
    RegisterDef::sub("sp", "rsp", 16, 0),
    RegisterDef::sub("bp", "rbp", 16, 0),
    RegisterDef::sub("si", "rsi", 16, 0),
    RegisterDef::sub("di", "rdi", 16, 0),
    RegisterDef::sub("r8w", "r8", 16, 0),
    RegisterDef::sub("r9w", "r9", 16, 0),
    RegisterDef::sub("r10w", "r10", 16, 0),
    RegisterDef::sub("r11w", "r11", 16, 0),
    RegisterDef::sub("r12w", "r12", 16, 0),
    RegisterDef::sub("r13w", "r13", 16, 0),
    RegisterDef::sub("r14w", "r14", 16, 0),
    RegisterDef::sub("r15w", "r15", 16, 0),
    RegisterDef::sub("al", "rax", 8, 0),
    RegisterDef::sub("cl", "rcx", 8, 0),
    RegisterDef::sub("dl", "rdx", 8, 0),
    RegisterDef::sub("bl", "rbx", 8, 0),
    RegisterDef::sub("spl", "rsp", 8, 0),
    RegisterDef::sub("bpl", "rbp", 8, 0),
    RegisterDef::sub("sil", "rsi", 8, 0),
    RegisterDef::sub("dil", "rdi", 8, 0),
    RegisterDef::sub("r8b", "r8", 8, 0),
    RegisterDef::sub("r9b", "r9", 8, 0),
    RegisterDef::sub("r10b", "r10", 8, 0),
    RegisterDef::sub("r11b", "r11", 8, 0),
    RegisterDef::sub("r12b", "r12", 8, 0),
    RegisterDef::sub("r13b", "r13", 8, 0),
    RegisterDef::sub("r14b", "r14", 8, 0),
    RegisterDef::sub("r15b", "r15", 8, 0),
    RegisterDef::sub("ah", "rax", 8, 8),
    RegisterDef::sub("ch", "rcx", 8, 8),
    RegisterDef::sub("dh", "rdx", 8, 8),
    RegisterDef::sub("bh", "rbx", 8, 8),
];

/// i386 registers, same layout rules as [`AMD64_REGISTERS`].
static I386_REGISTERS: [RegisterDef; 24] = [
    RegisterDef::full("eax", 32),
    RegisterDef::full("ecx", 32),
    RegisterDef::full("edx", 32),
    RegisterDef::full("ebx", 32),
    RegisterDef::full("esp", 32),
    RegisterDef::full("ebp", 32),
    RegisterDef::full("esi", 32),
    RegisterDef::full("edi", 32),
    RegisterDef::sub("ax", "eax", 16, 0),
    RegisterDef::sub("cx", "ecx", 16, 0),
    RegisterDef::sub("dx", "edx", 16, 0),
    RegisterDef::sub("bx", "ebx", 16, 0),
    RegisterDef::sub("sp", "esp", 16, 0),
    RegisterDef::sub("bp", "ebp", 16, 0),
    RegisterDef::sub("si", "esi", 16, 0),
    RegisterDef::sub("di", "edi", 16, 0),
    RegisterDef::sub("al", "eax", 8, 0),
    RegisterDef::sub("cl", "ecx", 8, 0),
    RegisterDef::sub("dl", "edx", 8, 0),
    RegisterDef::sub("bl", "ebx", 8, 0),
    RegisterDef::sub("ah", "eax", 8, 8),
    RegisterDef::sub("ch", "ecx", 8, 8),
    RegisterDef::sub("dh", "edx", 8, 8),
    RegisterDef::sub("bh", "ebx", 8, 8),
];

/// Linux x86-64: `syscall` with the number in rax.
pub static AMD64: Target = Target {
    arch: Arch::Amd64,
    registers: RegisterFile::new(Arch::Amd64, &AMD64_REGISTERS),
    stack_pointer: "rsp",
    return_register: "rax",
    temporary: "rax",
    scratch: &[
        "r11", "r10", "r9", "r8", "rbx", "rbp", "r12", "r13", "r14", "r15", "rcx", "rdx", "rsi",
        "rdi", "rax",
    ],
    has_exchange: true,
    stack_align: 8,
    syscall: SyscallAbi {
        number: "rax",
        args: &["rdi", "rsi", "rdx", "r10", "r8", "r9"],
    },
    lowering: &X86Lowering,
};

/// Linux i386: `int 0x80` with the number in eax.
pub static I386: Target = Target {
    arch: Arch::I386,
    registers: RegisterFile::new(Arch::I386, &I386_REGISTERS),
    stack_pointer: "esp",
    return_register: "eax",
    temporary: "eax",
    scratch: &["ebp", "edi", "esi", "edx", "ecx", "ebx", "eax"],
    has_exchange: true,
    stack_align: 4,
    syscall: SyscallAbi {
        number: "eax",
        args: &["ebx", "ecx", "edx", "esi", "edi", "ebp"],
    },
    lowering: &X86Lowering,
};
