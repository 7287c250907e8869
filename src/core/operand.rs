// This module implements the operand model shared by every primitive. An Operand is an
// immediate constant with an explicit bit width, a register of one architecture, or a memory
// reference built from a base register, an optional scaled index register and a
// displacement. Construction validates everything that can be validated without knowing the
// use site: register names must exist in the architecture's register file, immediates must
// fit their declared width (either as a signed or an unsigned number), memory base and index
// registers must be full-width, and scales must be 1, 2, 4 or 8. Operand::parse accepts the
// textual forms used on the command line ("rax", "-0x10", "[rsp+rcx*8+16]"). Operands also
// know which registers they read, which is what the register assignment resolver builds its
// dependency graph from, and can be relocated when a value moves to another register.

//! Operand model: immediates, registers and memory references.

use std::fmt;

use super::arch::Arch;
use super::error::{ShellResult, ShellcraftError};
use super::register_file::Register;

/// An integer constant with a declared width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Immediate {
    value: i128,
    bits: u32,
}

impl Immediate {
    /// Create an immediate, checking that `value` fits in `bits`.
    pub fn new(arch: Arch, value: i128, bits: u32) -> ShellResult<Self> {
        if bits == 0 || bits > 64 {
            return Err(ShellcraftError::invalid_operand(
                arch,
                format_imm(value),
                format!("unsupported immediate width {bits}"),
            ));
        }
        if !Self::fits(value, bits) {
            return Err(ShellcraftError::invalid_operand(
                arch,
                format_imm(value),
                format!("does not fit in {bits} bits"),
            ));
        }
        Ok(Self { value, bits })
    }

    /// An 8-bit immediate; always valid.
    pub const fn byte(value: u8) -> Self {
        Self { value: value as i128, bits: 8 }
    }

    /// Whether `value` is representable in `bits`, signed or unsigned.
    pub fn fits(value: i128, bits: u32) -> bool {
        let min = -(1i128 << (bits - 1));
        let max = (1i128 << bits) - 1;
        (min..=max).contains(&value)
    }

    pub fn value(self) -> i128 {
        self.value
    }

    pub fn bits(self) -> u32 {
        self.bits
    }

    /// Two's complement reading of the value truncated to `bits`.
    pub fn as_signed(self, bits: u32) -> i128 {
        let mask = (1i128 << bits) - 1;
        let raw = self.value & mask;
        if raw >> (bits - 1) & 1 == 1 {
            raw - (1i128 << bits)
        } else {
            raw
        }
    }
}

/// A memory reference `[base + index*scale + disp]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemoryRef {
    base: Register,
    index: Option<(Register, u8)>,
    disp: i64,
}

impl MemoryRef {
    /// `[base + disp]`.
    pub fn new(base: Register, disp: i64) -> ShellResult<Self> {
        Self::check_address_register(base)?;
        Ok(Self { base, index: None, disp })
    }

    /// `[base + index*scale + disp]`.
    pub fn indexed(base: Register, index: Register, scale: u8, disp: i64) -> ShellResult<Self> {
        Self::check_address_register(base)?;
        Self::check_address_register(index)?;
        if base.arch() != index.arch() {
            return Err(ShellcraftError::invalid_operand(
                base.arch(),
                index.name(),
                format!("index register belongs to {}", index.arch()),
            ));
        }
        if !matches!(scale, 1 | 2 | 4 | 8) {
            return Err(ShellcraftError::invalid_operand(
                base.arch(),
                format!("{index}*{scale}"),
                "scale must be 1, 2, 4 or 8",
            ));
        }
        Ok(Self { base, index: Some((index, scale)), disp })
    }

    fn check_address_register(reg: Register) -> ShellResult<()> {
        if !reg.is_canonical() {
            return Err(ShellcraftError::invalid_operand(
                reg.arch(),
                reg.name(),
                "address registers must be full width",
            ));
        }
        Ok(())
    }

    pub fn base(&self) -> Register {
        self.base
    }

    pub fn index(&self) -> Option<(Register, u8)> {
        self.index
    }

    pub fn disp(&self) -> i64 {
        self.disp
    }

    pub fn arch(&self) -> Arch {
        self.base.arch()
    }

    /// Same reference shifted by `delta` bytes.
    pub fn offset_by(&self, delta: i64) -> Self {
        Self { disp: self.disp + delta, ..*self }
    }
}

/// A value a primitive can consume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operand {
    Immediate(Immediate),
    Register(Register),
    Memory(MemoryRef),
}

impl Operand {
    /// A word-sized immediate.
    pub fn imm(arch: Arch, value: i128) -> ShellResult<Self> {
        Immediate::new(arch, value, arch.bits()).map(Operand::Immediate)
    }

    /// An immediate of an explicit width.
    pub fn imm_sized(arch: Arch, value: i128, bits: u32) -> ShellResult<Self> {
        Immediate::new(arch, value, bits).map(Operand::Immediate)
    }

    /// A register by name.
    pub fn reg(arch: Arch, name: &str) -> ShellResult<Self> {
        arch.target().registers.get(name).map(Operand::Register)
    }

    /// Parse a register name, an integer or a `[...]` memory reference.
    pub fn parse(arch: Arch, text: &str) -> ShellResult<Self> {
        let text = text.trim();
        if let Some(inner) = text.strip_prefix('[').and_then(|t| t.strip_suffix(']')) {
            return parse_memory(arch, text, inner).map(Operand::Memory);
        }
        if let Some(value) = parse_int(text) {
            return Self::imm(arch, value);
        }
        if let Some(reg) = arch.target().registers.lookup(text) {
            return Ok(Operand::Register(reg));
        }
        Err(ShellcraftError::invalid_operand(
            arch,
            text,
            "not a register, integer or memory reference",
        ))
    }

    /// Architecture the operand is bound to; immediates are not bound.
    pub fn arch(&self) -> Option<Arch> {
        match self {
            Operand::Immediate(_) => None,
            Operand::Register(reg) => Some(reg.arch()),
            Operand::Memory(mem) => Some(mem.arch()),
        }
    }

    /// Fail unless the operand can be used on `arch`.
    pub fn check_arch(&self, arch: Arch) -> ShellResult<()> {
        match self.arch() {
            Some(other) if other != arch => Err(ShellcraftError::invalid_operand(
                arch,
                self.to_string(),
                format!("operand was built for {other}"),
            )),
            _ => Ok(()),
        }
    }

    pub fn as_register(&self) -> Option<Register> {
        match self {
            Operand::Register(reg) => Some(*reg),
            _ => None,
        }
    }

    /// Registers whose current value this operand reads.
    pub fn reads(&self) -> impl Iterator<Item = Register> {
        let (first, second) = match self {
            Operand::Immediate(_) => (None, None),
            Operand::Register(reg) => (Some(*reg), None),
            Operand::Memory(mem) => (Some(mem.base), mem.index.map(|(r, _)| r)),
        };
        first.into_iter().chain(second)
    }

    /// Whether this operand reads any part of `reg`'s canonical register.
    pub fn reads_register(&self, reg: Register) -> bool {
        self.reads().any(|r| r.overlaps(reg))
    }

    /// Rewrite every register this operand reads through `f`.
    pub fn map_reads(&self, mut f: impl FnMut(Register) -> Option<Register>) -> Option<Operand> {
        Some(match self {
            Operand::Immediate(imm) => Operand::Immediate(*imm),
            Operand::Register(reg) => Operand::Register(f(*reg)?),
            Operand::Memory(mem) => Operand::Memory(MemoryRef {
                base: f(mem.base)?,
                index: match mem.index {
                    Some((reg, scale)) => Some((f(reg)?, scale)),
                    None => None,
                },
                disp: mem.disp,
            }),
        })
    }

    /// Rewrite reads of `from` (any alias) to the matching part of `to`.
    ///
    /// Returns `None` when `to` has no register matching a sub-register read.
    pub fn relocate(&self, from: Register, to: Register) -> Option<Operand> {
        let file = &to.arch().target().registers;
        self.map_reads(|reg| if reg.overlaps(from) { file.relocate(reg, to) } else { Some(reg) })
    }
}

impl From<Register> for Operand {
    fn from(reg: Register) -> Self {
        Operand::Register(reg)
    }
}

impl From<Immediate> for Operand {
    fn from(imm: Immediate) -> Self {
        Operand::Immediate(imm)
    }
}

impl From<MemoryRef> for Operand {
    fn from(mem: MemoryRef) -> Self {
        Operand::Memory(mem)
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Immediate(imm) => f.write_str(&format_imm(imm.value)),
            Operand::Register(reg) => write!(f, "{reg}"),
            Operand::Memory(mem) => {
                write!(f, "[{}", mem.base)?;
                if let Some((index, scale)) = mem.index {
                    write!(f, "+{index}*{scale}")?;
                }
                match mem.disp {
                    0 => {}
                    d if d < 0 => write!(f, "-{:#x}", d.unsigned_abs())?,
                    d => write!(f, "+{d:#x}")?,
                }
                f.write_str("]")
            }
        }
    }
}

/// Assembler-friendly spelling of an integer: small values in decimal,
/// everything else in hex with an explicit sign.
pub fn format_imm(value: i128) -> String {
    if (0..10).contains(&value) {
        value.to_string()
    } else if value < 0 {
        format!("-{:#x}", value.unsigned_abs())
    } else {
        format!("{value:#x}")
    }
}

/// Parse a decimal, `0x`, `0o` or `0b` integer with an optional sign.
pub fn parse_int(text: &str) -> Option<i128> {
    let text = text.trim().replace('_', "");
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest.to_string()),
        None => (false, text.strip_prefix('+').unwrap_or(&text).to_string()),
    };
    let lowered = digits.to_ascii_lowercase();
    let magnitude = if let Some(hex) = lowered.strip_prefix("0x") {
        i128::from_str_radix(hex, 16).ok()?
    } else if let Some(oct) = lowered.strip_prefix("0o") {
        i128::from_str_radix(oct, 8).ok()?
    } else if let Some(bin) = lowered.strip_prefix("0b") {
        i128::from_str_radix(bin, 2).ok()?
    } else if !lowered.is_empty() && lowered.bytes().all(|b| b.is_ascii_digit()) {
        lowered.parse::<i128>().ok()?
    } else {
        return None;
    };
    Some(if negative { -magnitude } else { magnitude })
}

fn parse_memory(arch: Arch, text: &str, inner: &str) -> ShellResult<MemoryRef> {
    let file = &arch.target().registers;
    let invalid = |reason: &str| ShellcraftError::invalid_operand(arch, text, reason);

    let mut terms = Vec::new();
    let mut current = String::new();
    let mut negative = false;
    for ch in inner.chars().filter(|c| !c.is_whitespace()) {
        if (ch == '+' || ch == '-') && !current.is_empty() {
            terms.push((negative, std::mem::take(&mut current)));
            negative = ch == '-';
        } else if ch == '-' {
            negative = !negative;
        } else if ch != '+' {
            current.push(ch);
        }
    }
    if current.is_empty() {
        return Err(invalid("empty term in memory reference"));
    }
    terms.push((negative, current));

    let mut base = None;
    let mut index = None;
    let mut disp: i64 = 0;
    for (negative, term) in terms {
        if let Some((left, right)) = term.split_once('*') {
            let (reg, scale) = match (file.lookup(left), parse_int(right)) {
                (Some(reg), Some(scale)) => (reg, scale),
                _ => match (parse_int(left), file.lookup(right)) {
                    (Some(scale), Some(reg)) => (reg, scale),
                    _ => return Err(invalid("expected `register*scale`")),
                },
            };
            if negative || index.is_some() {
                return Err(invalid("at most one positive scaled index"));
            }
            let scale = u8::try_from(scale).map_err(|_| invalid("scale must be 1, 2, 4 or 8"))?;
            index = Some((reg, scale));
        } else if let Some(reg) = file.lookup(&term) {
            if negative {
                return Err(invalid("registers cannot be subtracted"));
            }
            if base.is_none() {
                base = Some(reg);
            } else if index.is_none() {
                index = Some((reg, 1));
            } else {
                return Err(invalid("too many registers"));
            }
        } else if let Some(value) = parse_int(&term) {
            let value = i64::try_from(value).map_err(|_| invalid("displacement out of range"))?;
            let value = if negative { -value } else { value };
            disp = disp.checked_add(value).ok_or_else(|| invalid("displacement out of range"))?;
        } else {
            return Err(invalid("unknown term in memory reference"));
        }
    }

    let base = base.ok_or_else(|| invalid("memory reference needs a base register"))?;
    match index {
        Some((reg, scale)) => MemoryRef::indexed(base, reg, scale, disp),
        None => MemoryRef::new(base, disp),
    }
}
