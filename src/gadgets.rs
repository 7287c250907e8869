// This module finds return-oriented gadgets in x86 code. A gadget is a short run of
// instructions ending in a control transfer (ret, syscall or int 0x80) that an exploit
// can chain by placing addresses on the stack. The finder looks for terminator byte
// patterns in executable sections, decodes backwards a bounded number of bytes from each
// one with the iced-x86 decoder, and keeps sequences whose body only pops registers,
// adjusts the stack pointer or copies between registers. Popped registers are reported
// as shellcraft registers so callers can match gadgets against an assignment. Sections
// come from an ELF image parsed with the object crate.

//! Gadget discovery for i386 and amd64.
//!
//! - [`GadgetFinder`] - scans raw code or the executable sections of an ELF image
//! - [`Gadget`] - one decoded sequence, its popped registers and stack effect
//! - [`elf_arch`] - architecture of an ELF image

use std::fmt;

use hashbrown::HashSet;
use iced_x86::{
    Decoder, DecoderOptions, Formatter, Instruction, IntelFormatter, Mnemonic, OpKind,
    Register as IcedRegister,
};
use object::{Object, ObjectSection, SectionKind};

use crate::core::arch::{Arch, Family};
use crate::core::error::{ShellResult, ShellcraftError};
use crate::core::register_file::Register;
use crate::core::target::Target;

/// Bytes decoded backwards from each terminator when no depth is given.
pub const DEFAULT_DEPTH: usize = 10;

/// Instruction ending a gadget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Terminator {
    /// `ret` or `ret imm16`.
    Ret,
    Syscall,
    /// `int 0x80`.
    Int80,
}

impl Terminator {
    const ALL: [Terminator; 3] = [Terminator::Ret, Terminator::Syscall, Terminator::Int80];

    /// Length of the terminator encoded at the start of `code`, if any.
    fn match_at(self, code: &[u8]) -> Option<usize> {
        match (self, code) {
            (Terminator::Ret, [0xc3, ..]) => Some(1),
            (Terminator::Ret, [0xc2, _, _, ..]) => Some(3),
            (Terminator::Syscall, [0x0f, 0x05, ..]) => Some(2),
            (Terminator::Int80, [0xcd, 0x80, ..]) => Some(2),
            _ => None,
        }
    }

    fn is(self, insn: &Instruction) -> bool {
        match self {
            Terminator::Ret => insn.mnemonic() == Mnemonic::Ret,
            Terminator::Syscall => insn.mnemonic() == Mnemonic::Syscall,
            Terminator::Int80 => insn.mnemonic() == Mnemonic::Int && insn.try_immediate(0).ok() == Some(0x80),
        }
    }
}

/// A decoded gadget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Gadget {
    pub address: u64,
    pub bytes: Vec<u8>,
    /// Intel-syntax text of each instruction, terminator last.
    pub instructions: Vec<String>,
    /// Registers loaded from the stack, in pop order.
    pub pops: Vec<Register>,
    /// How far the stack pointer moves, return included. `None` after `leave`.
    pub stack_delta: Option<i64>,
    pub terminator: Terminator,
}

impl Gadget {
    pub fn text(&self) -> String {
        self.instructions.join("; ")
    }
}

impl fmt::Display for Gadget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}: {}", self.address, self.text())
    }
}

/// Architecture of the ELF image in `data`.
pub fn elf_arch(data: &[u8]) -> ShellResult<Arch> {
    let file = object::File::parse(data).map_err(search_error)?;
    match file.architecture() {
        object::Architecture::I386 => Ok(Arch::I386),
        object::Architecture::X86_64 => Ok(Arch::Amd64),
        object::Architecture::Arm => Ok(Arch::Arm),
        object::Architecture::Aarch64 => Ok(Arch::Aarch64),
        object::Architecture::Riscv64 => Ok(Arch::Riscv64),
        other => Err(search_error(format!("unsupported architecture {other:?}"))),
    }
}

fn search_error(reason: impl ToString) -> ShellcraftError {
    ShellcraftError::Gadgets { reason: reason.to_string() }
}

/// Searches x86 code for gadgets.
#[derive(Debug, Clone)]
pub struct GadgetFinder {
    target: &'static Target,
    depth: usize,
    only: Option<Terminator>,
}

impl GadgetFinder {
    pub fn new(arch: Arch) -> ShellResult<Self> {
        if arch.family() != Family::X86 {
            return Err(search_error(format!("gadget search is not supported on {arch}")));
        }
        Ok(Self { target: arch.target(), depth: DEFAULT_DEPTH, only: None })
    }

    /// Decode up to `depth` bytes before each terminator.
    pub fn with_depth(mut self, depth: usize) -> Self {
        self.depth = depth;
        self
    }

    /// Keep only gadgets ending in `terminator`.
    pub fn only(mut self, terminator: Terminator) -> Self {
        self.only = Some(terminator);
        self
    }

    pub fn arch(&self) -> Arch {
        self.target.arch
    }

    /// Gadgets in `code` loaded at `address`, sorted by address.
    pub fn find_in_code(&self, code: &[u8], address: u64) -> Vec<Gadget> {
        let mut seen = HashSet::new();
        let mut gadgets = Vec::new();
        self.scan(code, address, &mut seen, &mut gadgets);
        gadgets.sort_by_key(|g| g.address);
        gadgets
    }

    /// Gadgets in every executable section of an ELF image.
    ///
    /// Identical instruction sequences are reported once, at the lowest
    /// address found in the first section holding them.
    pub fn find_in_elf(&self, data: &[u8]) -> ShellResult<Vec<Gadget>> {
        let file = object::File::parse(data).map_err(search_error)?;
        let arch = elf_arch(data)?;
        if arch != self.arch() {
            return Err(search_error(format!("image is {arch}, finder is for {}", self.arch())));
        }
        let mut seen = HashSet::new();
        let mut gadgets = Vec::new();
        for section in file.sections().filter(|s| s.kind() == SectionKind::Text) {
            let code = section.data().map_err(search_error)?;
            log::debug!(
                "{}: scanning {} ({} bytes at {:#x})",
                arch,
                section.name().unwrap_or("?"),
                code.len(),
                section.address()
            );
            self.scan(code, section.address(), &mut seen, &mut gadgets);
        }
        gadgets.sort_by_key(|g| g.address);
        Ok(gadgets)
    }

    fn terminators(&self) -> impl Iterator<Item = Terminator> + '_ {
        Terminator::ALL.into_iter().filter(|t| self.only.is_none_or(|only| only == *t))
    }

    fn scan(&self, code: &[u8], address: u64, seen: &mut HashSet<String>, out: &mut Vec<Gadget>) {
        let mut formatter = IntelFormatter::new();
        formatter.options_mut().set_space_after_operand_separator(true);
        formatter.options_mut().set_hex_prefix("0x");
        formatter.options_mut().set_hex_suffix("");

        for end in 0..code.len() {
            for terminator in self.terminators() {
                let Some(size) = terminator.match_at(&code[end..]) else {
                    continue;
                };
                for back in 0..self.depth.min(end + 1) {
                    let start = end - back;
                    let window = &code[start..end + size];
                    let Some(gadget) = self.decode(window, address + start as u64, terminator, &mut formatter) else {
                        continue;
                    };
                    if seen.insert(gadget.text()) {
                        log::trace!("{gadget}");
                        out.push(gadget);
                    }
                }
            }
        }
    }

    /// Decode `window` as one gadget ending in `terminator`.
    fn decode(
        &self,
        window: &[u8],
        address: u64,
        terminator: Terminator,
        formatter: &mut IntelFormatter,
    ) -> Option<Gadget> {
        let mut decoder = Decoder::with_ip(self.arch().bits(), window, address, DecoderOptions::NONE);
        let mut insns = Vec::new();
        while decoder.can_decode() {
            let insn = decoder.decode();
            if insn.is_invalid() {
                return None;
            }
            insns.push(insn);
        }
        let (last, body) = insns.split_last()?;
        if !terminator.is(last) {
            return None;
        }

        let word = self.arch().word_bytes() as i64;
        let mut pops = Vec::new();
        let mut delta = Some(word);
        if last.mnemonic() == Mnemonic::Ret && last.op_count() == 1 {
            delta = delta.map(|d| d + i64::from(last.immediate16()));
        }
        for insn in body {
            match insn.mnemonic() {
                Mnemonic::Pop if insn.op0_kind() == OpKind::Register => {
                    let reg = self.register(insn.op0_register())?;
                    if reg == self.stack_pointer()? || reg.width() != self.arch().bits() {
                        return None;
                    }
                    pops.push(reg);
                    delta = delta.map(|d| d + word);
                }
                Mnemonic::Add if insn.op0_kind() == OpKind::Register && is_immediate(insn.op1_kind()) => {
                    if self.register(insn.op0_register())? != self.stack_pointer()? {
                        return None;
                    }
                    delta = delta.map(|d| d + insn.immediate(1) as i64);
                }
                Mnemonic::Mov | Mnemonic::Xchg
                    if insn.op0_kind() == OpKind::Register && insn.op1_kind() == OpKind::Register =>
                {
                    let sp = self.stack_pointer()?;
                    for reg in [insn.op0_register(), insn.op1_register()] {
                        if self.register(reg)?.overlaps(sp) {
                            return None;
                        }
                    }
                }
                Mnemonic::Leave => delta = None,
                _ => return None,
            }
        }

        let instructions = insns
            .iter()
            .map(|insn| {
                let mut text = String::new();
                formatter.format(insn, &mut text);
                text
            })
            .collect();
        Some(Gadget {
            address,
            bytes: window.to_vec(),
            instructions,
            pops,
            stack_delta: delta,
            terminator,
        })
    }

    /// The general-purpose register `reg` names, if it is one.
    fn register(&self, reg: IcedRegister) -> Option<Register> {
        if !(reg.is_gpr64() || reg.is_gpr32() || reg.is_gpr16() || reg.is_gpr8()) {
            return None;
        }
        self.target.registers.lookup(&format!("{reg:?}").to_ascii_lowercase())
    }

    fn stack_pointer(&self) -> Option<Register> {
        self.target.stack_pointer().ok()
    }
}

fn is_immediate(kind: OpKind) -> bool {
    matches!(
        kind,
        OpKind::Immediate8 | OpKind::Immediate8to32 | OpKind::Immediate8to64 | OpKind::Immediate32 | OpKind::Immediate32to64
    )
}
