// This module defines the output side of a primitive: abstract instructions and the
// immutable fragments that carry them. An Instruction is a mnemonic plus an operand list; its
// operands reuse the operand model and add local label references (GAS numeric labels such as
// `1b`) and register lists (ARM `push {r0, r1}`). A Fragment is the ordered sequence of items
// (instructions, label definitions and raw data bytes) produced by one primitive invocation,
// tagged with the primitive's name and the registers it documents as clobbered beyond the
// ones it was asked to set. Fragments are built through FragmentBuilder and have no mutating
// API once finished, so they can only be composed by concatenation.

//! Instructions, items and immutable fragments.

use std::fmt;

use super::arch::Arch;
use super::operand::Operand;
use super::register_file::{RegSet, Register};

/// Reference to a GAS numeric local label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LabelRef {
    pub id: u32,
    /// `1f` when true, `1b` otherwise.
    pub forward: bool,
}

impl LabelRef {
    pub const fn backward(id: u32) -> Self {
        Self { id, forward: false }
    }

    pub const fn forward(id: u32) -> Self {
        Self { id, forward: true }
    }
}

impl fmt::Display for LabelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.id, if self.forward { 'f' } else { 'b' })
    }
}

/// An instruction operand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsnOperand {
    Value(Operand),
    Label(LabelRef),
    RegList(Vec<Register>),
}

impl From<Operand> for InsnOperand {
    fn from(op: Operand) -> Self {
        InsnOperand::Value(op)
    }
}

impl From<Register> for InsnOperand {
    fn from(reg: Register) -> Self {
        InsnOperand::Value(Operand::Register(reg))
    }
}

impl From<LabelRef> for InsnOperand {
    fn from(label: LabelRef) -> Self {
        InsnOperand::Label(label)
    }
}

impl InsnOperand {
    pub fn as_register(&self) -> Option<Register> {
        match self {
            InsnOperand::Value(op) => op.as_register(),
            _ => None,
        }
    }
}

/// One abstract instruction: mnemonic plus operands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub mnemonic: &'static str,
    pub operands: Vec<InsnOperand>,
}

impl Instruction {
    pub fn new(mnemonic: &'static str, operands: Vec<InsnOperand>) -> Self {
        Self { mnemonic, operands }
    }

    /// An instruction without operands.
    pub fn bare(mnemonic: &'static str) -> Self {
        Self { mnemonic, operands: Vec::new() }
    }
}

/// Element of a fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Item {
    Instruction(Instruction),
    /// Definition of numeric local label `id`.
    Label(u32),
    /// Raw bytes emitted inline.
    Data(Vec<u8>),
}

/// Output of one primitive invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    primitive: &'static str,
    arch: Arch,
    items: Vec<Item>,
    clobbers: Vec<Register>,
}

impl Fragment {
    /// Name of the primitive that produced this fragment.
    pub fn primitive(&self) -> &'static str {
        self.primitive
    }

    pub fn arch(&self) -> Arch {
        self.arch
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }

    /// Instructions only, in order.
    pub fn instructions(&self) -> impl Iterator<Item = &Instruction> {
        self.items.iter().filter_map(|item| match item {
            Item::Instruction(insn) => Some(insn),
            _ => None,
        })
    }

    /// Registers changed by this fragment besides the ones it was asked to set.
    pub fn clobbers(&self) -> &[Register] {
        &self.clobbers
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Accumulates items for a fragment under construction.
#[derive(Debug)]
pub struct FragmentBuilder {
    primitive: &'static str,
    arch: Arch,
    items: Vec<Item>,
    clobbers: Vec<Register>,
    clobbered: RegSet,
}

impl FragmentBuilder {
    pub fn new(primitive: &'static str, arch: Arch) -> Self {
        Self {
            primitive,
            arch,
            items: Vec::new(),
            clobbers: Vec::new(),
            clobbered: RegSet::new(),
        }
    }

    pub fn arch(&self) -> Arch {
        self.arch
    }

    pub fn emit(&mut self, insn: Instruction) -> &mut Self {
        self.items.push(Item::Instruction(insn));
        self
    }

    pub fn label(&mut self, id: u32) -> &mut Self {
        self.items.push(Item::Label(id));
        self
    }

    pub fn data(&mut self, bytes: &[u8]) -> &mut Self {
        if !bytes.is_empty() {
            self.items.push(Item::Data(bytes.to_vec()));
        }
        self
    }

    /// Record `reg` (by canonical register) as clobbered.
    pub fn clobber(&mut self, reg: Register) -> &mut Self {
        if !self.clobbered.contains(reg) {
            self.clobbered.insert(reg);
            self.clobbers.push(reg.canonical());
        }
        self
    }

    /// Append a finished fragment, including its clobbers.
    pub fn append(&mut self, fragment: &Fragment) -> &mut Self {
        self.items.extend(fragment.items.iter().cloned());
        for &reg in &fragment.clobbers {
            self.clobber(reg);
        }
        self
    }

    pub fn finish(self) -> Fragment {
        log::debug!(
            "{} fragment for {}: {} items, clobbers {:?}",
            self.primitive,
            self.arch,
            self.items.len(),
            self.clobbers
        );
        Fragment {
            primitive: self.primitive,
            arch: self.arch,
            items: self.items,
            clobbers: self.clobbers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_dedups_clobbers() {
        let file = &Arch::Amd64.target().registers;
        let mut builder = FragmentBuilder::new("test", Arch::Amd64);
        builder
            .emit(Instruction::bare("nop"))
            .clobber(file.lookup("eax").unwrap())
            .clobber(file.lookup("rax").unwrap())
            .data(&[])
            .data(&[0x90]);
        let fragment = builder.finish();
        assert_eq!(fragment.items().len(), 2);
        assert_eq!(fragment.clobbers().len(), 1);
        assert_eq!(fragment.clobbers()[0].name(), "rax");
        assert_eq!(fragment.instructions().count(), 1);
    }

    #[test]
    fn test_append_keeps_order() {
        let mut first = FragmentBuilder::new("first", Arch::Arm);
        first.emit(Instruction::bare("nop")).label(1);
        let first = first.finish();

        let mut second = FragmentBuilder::new("second", Arch::Arm);
        second.append(&first).emit(Instruction::new("b", vec![LabelRef::backward(1).into()]));
        let second = second.finish();
        assert_eq!(second.items().len(), 3);
        assert_eq!(second.items()[1], Item::Label(1));
        assert_eq!(LabelRef::backward(1).to_string(), "1b");
    }
}
