// This module implements instruction lowering for the x86 family (i386 and amd64). Register
// loads become a single `mov` (or `xor reg, reg` for zero), memory loads a sized `mov` from an
// Intel-syntax memory reference, and register swaps use `xchg`, which is what lets the
// resolver break two-register cycles without a scratch register. Pushes use the native
// `push` instruction; on amd64 an immediate that does not survive sign extension from 32 bits
// is first materialized in the temporary register. Rendering produces Intel syntax suitable
// for GAS after `.intel_syntax noprefix`, with operand sizes inferred from the register
// operand of the instruction (or the word size when there is none).

//! x86 instruction lowering and Intel-syntax rendering.

use crate::core::arch::Arch;
use crate::core::error::{ShellResult, ShellcraftError};
use crate::core::fragment::{FragmentBuilder, InsnOperand, Instruction, LabelRef};
use crate::core::operand::{format_imm, Immediate, MemoryRef, Operand};
use crate::core::register_file::Register;
use crate::core::target::{check_load, render_reg_list, Lowering, Target};

/// Lowering shared by i386 and amd64.
#[derive(Debug, Default, Clone, Copy)]
pub struct X86Lowering;

impl X86Lowering {
    fn word_register(target: &Target, reg: Register) -> ShellResult<Register> {
        if reg.width() != target.arch.bits() {
            return Err(ShellcraftError::invalid_operand(
                target.arch,
                reg.name(),
                format!("expected a {}-bit register", target.arch.bits()),
            ));
        }
        Ok(reg)
    }

    fn check_stack_delta(target: &Target, delta: i64) -> ShellResult<i128> {
        if i32::try_from(delta).is_err() {
            return Err(ShellcraftError::invalid_operand(
                target.arch,
                delta.to_string(),
                "stack adjustment out of range",
            ));
        }
        Ok(i128::from(delta.unsigned_abs()))
    }

    /// Fail when `regs` mix a high-byte register with one that needs a REX prefix.
    fn check_rex(target: &Target, regs: &[Register]) -> ShellResult<()> {
        let high = regs.iter().find(|reg| is_high_byte(**reg));
        let rex = regs.iter().find(|reg| needs_rex(**reg));
        if let (Some(high), Some(rex)) = (high, rex) {
            return Err(ShellcraftError::invalid_operand(
                target.arch,
                format!("{high}, {rex}"),
                format!("{high} cannot be encoded in the same instruction as {rex}"),
            ));
        }
        Ok(())
    }
}

/// `ah`, `ch`, `dh` or `bh`.
pub fn is_high_byte(reg: Register) -> bool {
    reg.width() == 8 && reg.offset() == 8
}

/// Whether `reg` can only be encoded with a REX prefix (`r8`..`r15` and
/// their parts, `spl`, `bpl`, `sil`, `dil`).
pub fn needs_rex(reg: Register) -> bool {
    if reg.arch() != Arch::Amd64 {
        return false;
    }
    let number = reg.canonical().id();
    number >= 8 || (reg.width() == 8 && reg.offset() == 0 && (4..8).contains(&number))
}

/// `byte`, `word`, `dword` or `qword`.
pub fn ptr_size(bits: u32) -> &'static str {
    match bits {
        8 => "byte",
        16 => "word",
        32 => "dword",
        _ => "qword",
    }
}

impl Lowering for X86Lowering {
    fn load(&self, target: &Target, dst: Register, value: &Operand) -> ShellResult<Instruction> {
        check_load(dst, value)?;
        let regs: Vec<Register> = std::iter::once(dst).chain(value.reads()).collect();
        Self::check_rex(target, &regs)?;
        let insn = match value {
            Operand::Immediate(imm) if imm.value() == 0 => {
                Instruction::new("xor", vec![dst.into(), dst.into()])
            }
            _ => Instruction::new("mov", vec![dst.into(), (*value).into()]),
        };
        Ok(insn)
    }

    fn exchange(&self, target: &Target, a: Register, b: Register) -> ShellResult<Instruction> {
        if a.width() != b.width() {
            return Err(ShellcraftError::invalid_operand(
                target.arch,
                format!("{a}, {b}"),
                "exchange needs registers of the same width",
            ));
        }
        Self::check_rex(target, &[a, b])?;
        Ok(Instruction::new("xchg", vec![a.into(), b.into()]))
    }

    fn address(&self, target: &Target, dst: Register, mem: &MemoryRef) -> ShellResult<Instruction> {
        let dst = Self::word_register(target, dst)?;
        Ok(Instruction::new("lea", vec![dst.into(), Operand::Memory(*mem).into()]))
    }

    fn store(&self, target: &Target, src: Register, mem: &MemoryRef) -> ShellResult<Instruction> {
        let src = Self::word_register(target, src)?;
        Ok(Instruction::new("mov", vec![Operand::Memory(*mem).into(), src.into()]))
    }

    fn adjust_stack(&self, target: &Target, delta: i64) -> ShellResult<Instruction> {
        let sp = target.stack_pointer()?;
        let amount = Self::check_stack_delta(target, delta)?;
        let mnemonic = if delta < 0 { "sub" } else { "add" };
        let imm = Operand::imm_sized(target.arch, amount, 32)?;
        Ok(Instruction::new(mnemonic, vec![sp.into(), imm.into()]))
    }

    fn push(&self, target: &Target, value: &Operand, out: &mut FragmentBuilder) -> ShellResult<()> {
        value.check_arch(target.arch)?;
        let sp = target.stack_pointer()?;
        match value {
            Operand::Register(reg) => {
                let reg = Self::word_register(target, *reg)?;
                out.emit(Instruction::new("push", vec![reg.into()]));
            }
            Operand::Immediate(imm) => {
                let word = target.arch.bits();
                if !Immediate::fits(imm.value(), word) {
                    return Err(ShellcraftError::invalid_operand(
                        target.arch,
                        value.to_string(),
                        format!("does not fit in a {word}-bit word"),
                    ));
                }
                let signed = imm.as_signed(word);
                if i32::try_from(signed).is_ok() {
                    let narrow = Operand::imm_sized(target.arch, signed, 32)?;
                    out.emit(Instruction::new("push", vec![narrow.into()]));
                } else {
                    let tmp = target.temporary()?;
                    out.emit(self.load(target, tmp, value)?);
                    out.emit(Instruction::new("push", vec![tmp.into()]));
                    out.clobber(tmp);
                }
            }
            Operand::Memory(_) => {
                out.emit(Instruction::new("push", vec![(*value).into()]));
            }
        }
        out.clobber(sp);
        Ok(())
    }

    fn syscall_trap(&self, target: &Target) -> Instruction {
        match target.arch {
            Arch::I386 => {
                Instruction::new("int", vec![Operand::Immediate(Immediate::byte(0x80)).into()])
            }
            _ => Instruction::bare("syscall"),
        }
    }

    fn breakpoint(&self, _target: &Target) -> Instruction {
        Instruction::bare("int3")
    }

    fn jump(&self, label: LabelRef) -> Instruction {
        Instruction::new("jmp", vec![label.into()])
    }

    fn ret(&self, _target: &Target) -> Instruction {
        Instruction::bare("ret")
    }

    fn preamble(&self, _target: &Target) -> Option<&'static str> {
        Some(".intel_syntax noprefix")
    }

    fn render_operand(&self, target: &Target, insn: &Instruction, op: &InsnOperand) -> String {
        match op {
            InsnOperand::Value(Operand::Memory(_)) if insn.mnemonic == "lea" => op_text(op),
            InsnOperand::Value(Operand::Memory(_)) => {
                let bits = insn
                    .operands
                    .iter()
                    .find_map(InsnOperand::as_register)
                    .map(Register::width)
                    .unwrap_or_else(|| target.arch.bits());
                format!("{} ptr {}", ptr_size(bits), op_text(op))
            }
            other => op_text(other),
        }
    }
}

fn op_text(op: &InsnOperand) -> String {
    match op {
        InsnOperand::Value(Operand::Immediate(imm)) => format_imm(imm.value()),
        InsnOperand::Value(value) => value.to_string(),
        InsnOperand::Label(label) => label.to_string(),
        InsnOperand::RegList(list) => render_reg_list(list),
    }
}
