//! Target architecture identifiers.
//!
//! [`Arch`] is the only architecture switch in the crate. Everything that
//! differs between targets hangs off [`Arch::target`], which hands out the
//! static description (register file, syscall ABI, lowering) of that target.

use std::fmt;
use std::str::FromStr;

use super::error::ShellcraftError;
use super::target::Target;

/// Supported instruction-set architectures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Arch {
    /// 32-bit x86.
    I386,
    /// 64-bit x86.
    Amd64,
    /// 32-bit ARM (A32, EABI).
    Arm,
    /// ARMv8-A 64-bit.
    Aarch64,
    /// RISC-V 64-bit.
    Riscv64,
}

/// Architectures that share an instruction lowering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    X86,
    Arm,
    Aarch64,
    Riscv,
}

impl Arch {
    /// Every supported architecture, in display order.
    pub const ALL: [Arch; 5] = [Arch::I386, Arch::Amd64, Arch::Arm, Arch::Aarch64, Arch::Riscv64];

    /// Canonical lowercase name.
    pub const fn name(self) -> &'static str {
        match self {
            Arch::I386 => "i386",
            Arch::Amd64 => "amd64",
            Arch::Arm => "arm",
            Arch::Aarch64 => "aarch64",
            Arch::Riscv64 => "riscv64",
        }
    }

    /// Native word size in bits.
    pub const fn bits(self) -> u32 {
        match self {
            Arch::I386 | Arch::Arm => 32,
            Arch::Amd64 | Arch::Aarch64 | Arch::Riscv64 => 64,
        }
    }

    /// Native word size in bytes.
    pub const fn word_bytes(self) -> usize {
        (self.bits() / 8) as usize
    }

    pub const fn family(self) -> Family {
        match self {
            Arch::I386 | Arch::Amd64 => Family::X86,
            Arch::Arm => Family::Arm,
            Arch::Aarch64 => Family::Aarch64,
            Arch::Riscv64 => Family::Riscv,
        }
    }

    /// Static description of this architecture.
    pub fn target(self) -> &'static Target {
        Target::get(self)
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Arch {
    type Err = ShellcraftError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "i386" | "x86" | "i686" | "ia32" => Ok(Arch::I386),
            "amd64" | "x86_64" | "x86-64" | "x64" => Ok(Arch::Amd64),
            "arm" | "armv7" | "armel" => Ok(Arch::Arm),
            "aarch64" | "arm64" => Ok(Arch::Aarch64),
            "riscv64" | "rv64" | "riscv" => Ok(Arch::Riscv64),
            _ => Err(ShellcraftError::UnknownArch { name: s.to_string() }),
        }
    }
}
