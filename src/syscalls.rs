//! Syscall number tables.
//!
//! Primitives never hard-code syscall numbers; they ask a [`SyscallTable`].
//! [`LinuxSyscalls`] is the built-in table covering the calls shellcode
//! typically needs. Callers with other needs (another kernel, a newer call)
//! can hand their own table to [`crate::Program::with_syscalls`].

use crate::core::arch::Arch;

/// Maps syscall names to numbers per architecture.
pub trait SyscallTable: Sync {
    /// Number of syscall `name` on `arch`, if known.
    fn number(&self, arch: Arch, name: &str) -> Option<u64>;
}

/// Built-in Linux syscall numbers.
#[derive(Debug, Default, Clone, Copy)]
pub struct LinuxSyscalls;

/// The process-wide Linux table.
pub static LINUX: LinuxSyscalls = LinuxSyscalls;

const AMD64: &[(&str, u64)] = &[
    ("read", 0),
    ("write", 1),
    ("open", 2),
    ("close", 3),
    ("mmap", 9),
    ("mprotect", 10),
    ("munmap", 11),
    ("pipe", 22),
    ("dup", 32),
    ("dup2", 33),
    ("nanosleep", 35),
    ("getpid", 39),
    ("sendfile", 40),
    ("socket", 41),
    ("connect", 42),
    ("accept", 43),
    ("bind", 49),
    ("listen", 50),
    ("fork", 57),
    ("execve", 59),
    ("exit", 60),
    ("kill", 62),
    ("chdir", 80),
    ("getuid", 102),
    ("setuid", 105),
    ("getppid", 110),
    ("exit_group", 231),
    ("openat", 257),
];

const I386: &[(&str, u64)] = &[
    ("exit", 1),
    ("fork", 2),
    ("read", 3),
    ("write", 4),
    ("open", 5),
    ("close", 6),
    ("execve", 11),
    ("chdir", 12),
    ("getpid", 20),
    ("setuid", 23),
    ("getuid", 24),
    ("kill", 37),
    ("dup", 41),
    ("pipe", 42),
    ("dup2", 63),
    ("getppid", 64),
    ("mmap", 90),
    ("munmap", 91),
    ("socketcall", 102),
    ("mprotect", 125),
    ("nanosleep", 162),
    ("sendfile", 187),
    ("mmap2", 192),
    ("exit_group", 252),
    ("openat", 295),
    ("socket", 359),
    ("bind", 361),
    ("connect", 362),
    ("listen", 363),
    ("accept4", 364),
];

const ARM: &[(&str, u64)] = &[
    ("exit", 1),
    ("fork", 2),
    ("read", 3),
    ("write", 4),
    ("open", 5),
    ("close", 6),
    ("execve", 11),
    ("chdir", 12),
    ("getpid", 20),
    ("setuid", 23),
    ("getuid", 24),
    ("kill", 37),
    ("dup", 41),
    ("pipe", 42),
    ("dup2", 63),
    ("getppid", 64),
    ("munmap", 91),
    ("mprotect", 125),
    ("nanosleep", 162),
    ("sendfile", 187),
    ("mmap2", 192),
    ("exit_group", 248),
    ("socket", 281),
    ("bind", 282),
    ("connect", 283),
    ("listen", 284),
    ("accept", 285),
    ("openat", 322),
];

/// asm-generic numbering, shared by aarch64 and riscv64.
const GENERIC: &[(&str, u64)] = &[
    ("dup", 23),
    ("dup3", 24),
    ("chdir", 49),
    ("openat", 56),
    ("close", 57),
    ("pipe2", 59),
    ("read", 63),
    ("write", 64),
    ("sendfile", 71),
    ("exit", 93),
    ("exit_group", 94),
    ("nanosleep", 101),
    ("kill", 129),
    ("setuid", 146),
    ("getpid", 172),
    ("getppid", 173),
    ("getuid", 174),
    ("socket", 198),
    ("bind", 200),
    ("listen", 201),
    ("accept", 202),
    ("connect", 203),
    ("munmap", 215),
    ("clone", 220),
    ("execve", 221),
    ("mmap", 222),
    ("mprotect", 226),
];

impl LinuxSyscalls {
    /// Every `(name, number)` pair known for `arch`.
    pub fn table(arch: Arch) -> &'static [(&'static str, u64)] {
        match arch {
            Arch::I386 => I386,
            Arch::Amd64 => AMD64,
            Arch::Arm => ARM,
            Arch::Aarch64 | Arch::Riscv64 => GENERIC,
        }
    }
}

impl SyscallTable for LinuxSyscalls {
    fn number(&self, arch: Arch, name: &str) -> Option<u64> {
        let name = name.trim();
        let name = name.strip_prefix("SYS_").unwrap_or(name);
        Self::table(arch)
            .iter()
            .find(|(known, _)| known.eq_ignore_ascii_case(name))
            .map(|&(_, number)| number)
    }
}
