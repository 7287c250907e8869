//! Per-architecture register files.
//!
//! A [`RegisterFile`] is a static table of register names, their widths and
//! how they alias each other (`eax` is the low 32 bits of `rax`, `ah` is bits
//! 8..16 of `rax`, `w3` is the low half of `x3`). Tables are plain data; the
//! only derived state is a name index which is built once, on first use, and
//! never mutated afterwards, so a register file can be shared by any number
//! of concurrent generation requests.
//!
//! Every register aliases exactly one *canonical* (full-width) register. The
//! resolver reasons about canonical registers only, which is what [`RegSet`]
//! tracks.

use std::fmt;
use std::sync::OnceLock;

use hashbrown::HashMap;

use super::arch::Arch;
use super::error::{ShellResult, ShellcraftError};

/// Maximum number of canonical registers in one file.
pub const MAX_CANONICAL_REGISTERS: usize = 64;

/// Static description of one register name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterDef {
    pub name: &'static str,
    /// Name of the full-width register this one is part of.
    pub canonical: &'static str,
    /// Width in bits.
    pub width: u32,
    /// Bit offset inside the canonical register.
    pub offset: u32,
    pub writable: bool,
}

impl RegisterDef {
    /// A full-width, writable register.
    pub const fn full(name: &'static str, width: u32) -> Self {
        Self { name, canonical: name, width, offset: 0, writable: true }
    }

    /// A sub-register of `canonical`.
    pub const fn sub(name: &'static str, canonical: &'static str, width: u32, offset: u32) -> Self {
        Self { name, canonical, width, offset, writable: true }
    }

    /// A full-width register that reads as a constant and ignores writes.
    pub const fn read_only(name: &'static str, width: u32) -> Self {
        Self { name, canonical: name, width, offset: 0, writable: false }
    }

    /// A sub-register of a read-only register.
    pub const fn read_only_sub(name: &'static str, canonical: &'static str, width: u32) -> Self {
        Self { name, canonical, width, offset: 0, writable: false }
    }
}

/// Lazily built lookup tables.
struct Index {
    by_name: HashMap<&'static str, u16>,
    canonical: Vec<u16>,
}

/// Register table of one architecture.
pub struct RegisterFile {
    arch: Arch,
    defs: &'static [RegisterDef],
    index: OnceLock<Index>,
}

impl RegisterFile {
    /// Create a register file over a static table.
    ///
    /// Full-width registers must be listed before their sub-registers, and at
    /// most [`MAX_CANONICAL_REGISTERS`] of them may exist.
    pub const fn new(arch: Arch, defs: &'static [RegisterDef]) -> Self {
        Self { arch, defs, index: OnceLock::new() }
    }

    fn index(&self) -> &Index {
        self.index.get_or_init(|| {
            let by_name: HashMap<&'static str, u16> = self
                .defs
                .iter()
                .enumerate()
                .map(|(id, def)| (def.name, id as u16))
                .collect();
            let canonical = self
                .defs
                .iter()
                .enumerate()
                .map(|(id, def)| by_name.get(def.canonical).copied().unwrap_or(id as u16))
                .collect::<Vec<_>>();
            debug_assert!(canonical.iter().all(|&c| (c as usize) < MAX_CANONICAL_REGISTERS));
            log::debug!("{} register file: {} names", self.arch, self.defs.len());
            Index { by_name, canonical }
        })
    }

    pub fn arch(&self) -> Arch {
        self.arch
    }

    /// Number of register names in the table.
    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }

    /// Look up a register by name (case-insensitive).
    pub fn lookup(&self, name: &str) -> Option<Register> {
        let lowered = name.trim().to_ascii_lowercase();
        self.index()
            .by_name
            .get(lowered.as_str())
            .map(|&id| Register { arch: self.arch, id })
    }

    /// Look up a register by name, failing with `InvalidOperand`.
    pub fn get(&self, name: &str) -> ShellResult<Register> {
        self.lookup(name).ok_or_else(|| {
            ShellcraftError::invalid_operand(self.arch, name, format!("no such register on {}", self.arch))
        })
    }

    /// Static description of register `id`.
    pub fn def(&self, id: u16) -> &'static RegisterDef {
        &self.defs[id as usize]
    }

    /// Id of the canonical register containing register `id`.
    pub fn canonical_id(&self, id: u16) -> u16 {
        self.index().canonical[id as usize]
    }

    /// The register of `to`'s family that sits where `reg` sits in its own.
    ///
    /// `relocate(eax, rbx)` is `ebx`; `relocate(ah, r8)` is `None` because
    /// `r8` has no high-byte register.
    pub fn relocate(&self, reg: Register, to: Register) -> Option<Register> {
        let def = reg.def();
        let target = to.canonical();
        if reg.is_canonical() {
            return Some(target);
        }
        self.registers().find(|r| {
            r.canonical() == target && r.width() == def.width && r.offset() == def.offset
        })
    }

    /// All registers in table order.
    pub fn registers(&self) -> impl Iterator<Item = Register> + '_ {
        (0..self.defs.len()).map(move |id| Register { arch: self.arch, id: id as u16 })
    }
}

impl fmt::Debug for RegisterFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisterFile")
            .field("arch", &self.arch)
            .field("registers", &self.defs.len())
            .finish()
    }
}

/// A register of a specific architecture.
///
/// Cheap to copy; the name, width and aliasing information live in the
/// static register file.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Register {
    arch: Arch,
    id: u16,
}

impl Register {
    pub fn arch(self) -> Arch {
        self.arch
    }

    pub fn id(self) -> u16 {
        self.id
    }

    fn file(self) -> &'static RegisterFile {
        &self.arch.target().registers
    }

    fn def(self) -> &'static RegisterDef {
        self.file().def(self.id)
    }

    pub fn name(self) -> &'static str {
        self.def().name
    }

    /// Width in bits.
    pub fn width(self) -> u32 {
        self.def().width
    }

    /// Bit offset inside the canonical register.
    pub fn offset(self) -> u32 {
        self.def().offset
    }

    pub fn is_writable(self) -> bool {
        self.def().writable
    }

    /// The full-width register this one is part of.
    pub fn canonical(self) -> Register {
        Register { arch: self.arch, id: self.file().canonical_id(self.id) }
    }

    pub fn is_canonical(self) -> bool {
        self.canonical() == self
    }

    /// Whether writing one of the registers can change the other.
    pub fn overlaps(self, other: Register) -> bool {
        self.arch == other.arch && self.canonical() == other.canonical()
    }
}

impl fmt::Debug for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Bit set of canonical registers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegSet {
    bits: u64,
}

impl RegSet {
    /// Create empty register set.
    pub const fn new() -> Self {
        Self { bits: 0 }
    }

    fn bit(reg: Register) -> u64 {
        1u64 << reg.canonical().id()
    }

    /// Check if the canonical register of `reg` is set.
    pub fn contains(&self, reg: Register) -> bool {
        self.bits & Self::bit(reg) != 0
    }

    /// Set the canonical register of `reg`.
    pub fn insert(&mut self, reg: Register) {
        self.bits |= Self::bit(reg);
    }

    /// Clear the canonical register of `reg`.
    pub fn remove(&mut self, reg: Register) {
        self.bits &= !Self::bit(reg);
    }

    /// Set union with another set.
    pub fn union(&mut self, other: &RegSet) {
        self.bits |= other.bits;
    }

    pub fn is_empty(&self) -> bool {
        self.bits == 0
    }

    pub fn len(&self) -> u32 {
        self.bits.count_ones()
    }
}

impl FromIterator<Register> for RegSet {
    fn from_iter<I: IntoIterator<Item = Register>>(iter: I) -> Self {
        let mut set = RegSet::new();
        for reg in iter {
            set.insert(reg);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn amd64(name: &str) -> Register {
        Arch::Amd64.target().registers.lookup(name).unwrap()
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let file = &Arch::Amd64.target().registers;
        assert_eq!(file.lookup("RAX"), file.lookup("rax"));
        assert!(file.lookup("xmm0").is_none());
        assert!(file.get("rzz").is_err());
    }

    #[test]
    fn test_aliasing() {
        let eax = amd64("eax");
        assert_eq!(eax.width(), 32);
        assert_eq!(eax.canonical(), amd64("rax"));
        assert!(eax.overlaps(amd64("ah")));
        assert!(!eax.overlaps(amd64("rbx")));
        assert_eq!(amd64("ah").offset(), 8);
    }

    #[test]
    fn test_relocate() {
        let file = &Arch::Amd64.target().registers;
        assert_eq!(file.relocate(amd64("eax"), amd64("rbx")), Some(amd64("ebx")));
        assert_eq!(file.relocate(amd64("al"), amd64("r11")), Some(amd64("r11b")));
        assert_eq!(file.relocate(amd64("ah"), amd64("rcx")), Some(amd64("ch")));
        assert_eq!(file.relocate(amd64("ah"), amd64("r8")), None);
        assert_eq!(file.relocate(amd64("rdx"), amd64("esi")), Some(amd64("rsi")));
    }

    #[test]
    fn test_regset_operations() {
        let mut set = RegSet::new();
        assert!(set.is_empty());
        set.insert(amd64("eax"));
        assert!(set.contains(amd64("rax")));
        assert!(set.contains(amd64("al")));
        assert!(!set.contains(amd64("rbx")));

        let other: RegSet = [amd64("rbx"), amd64("bl")].into_iter().collect();
        assert_eq!(other.len(), 1);
        set.union(&other);
        assert_eq!(set.len(), 2);
        set.remove(amd64("ax"));
        assert!(!set.contains(amd64("rax")));
    }

    #[test]
    fn test_canonical_registers_fit_regset() {
        for arch in Arch::ALL {
            let file = &arch.target().registers;
            for reg in file.registers() {
                assert!((reg.canonical().id() as usize) < MAX_CANONICAL_REGISTERS, "{arch} {reg}");
                assert!(reg.canonical().is_canonical());
            }
        }
    }
}
