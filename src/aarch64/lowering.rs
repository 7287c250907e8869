// Instruction lowering for AArch64. Constants that a single MOVZ or MOVN can produce (one
// 16-bit chunk at a 16-bit aligned position, or the complement of one) are loaded with the
// `mov` alias, everything else with the `ldr xd, =value` literal pool pseudo instruction.
// Memory operands use `[base, #disp]` with the scaled unsigned or unscaled signed offset
// ranges of LDR/LDUR, or `[base, index, lsl #n]` with a shift matching the access size.
// The stack pointer must stay 16-byte aligned whenever it is used as a base register, so
// pushes never move sp by a single word: push_words reserves the whole padded block with one
// `sub sp, sp, #n` and fills it with `str`, reading operands that were relative to the old
// stack pointer at their adjusted offset. Values that are not already in a register pass
// through x16 (IP0), which is reported as clobbered.

//! AArch64 instruction lowering and rendering.

use crate::arm::lowering::render_memory;
use crate::core::error::{ShellResult, ShellcraftError};
use crate::core::fragment::{FragmentBuilder, InsnOperand, Instruction, LabelRef};
use crate::core::operand::{format_imm, Immediate, MemoryRef, Operand};
use crate::core::register_file::Register;
use crate::core::target::{check_load, render_reg_list, Lowering, Target};

/// Largest unshifted ADD/SUB immediate.
const MAX_ADD_IMMEDIATE: u64 = 0xfff;

#[derive(Debug, Default, Clone, Copy)]
pub struct Aarch64Lowering;

/// Whether a single MOVZ of `width` bits can produce `value`.
fn is_movz_immediate(value: u64, width: u32) -> bool {
    (0..width / 16).any(|chunk| value & !(0xffff << (chunk * 16)) == 0)
}

fn mask(width: u32) -> u64 {
    if width >= 64 {
        u64::MAX
    } else {
        (1u64 << width) - 1
    }
}

impl Aarch64Lowering {
    fn check_memory(&self, target: &Target, mem: &MemoryRef, access_bytes: i64) -> ShellResult<()> {
        let invalid = |reason: &str| {
            ShellcraftError::invalid_operand(target.arch, Operand::Memory(*mem).to_string(), reason)
        };
        match mem.index() {
            Some(_) if mem.disp() != 0 => Err(invalid("cannot combine an index register with a displacement")),
            Some((_, scale)) if i64::from(scale) != 1 && i64::from(scale) != access_bytes => {
                Err(invalid("index scale must be 1 or the access size"))
            }
            Some(_) => Ok(()),
            None => {
                let disp = mem.disp();
                let unscaled = (-256..=255).contains(&disp);
                let scaled = disp >= 0 && disp % access_bytes == 0 && disp / access_bytes <= 4095;
                if unscaled || scaled {
                    Ok(())
                } else {
                    Err(invalid("displacement out of range"))
                }
            }
        }
    }

    /// `dst <- base +/- imm`.
    fn add_immediate(&self, target: &Target, dst: Register, base: Register, delta: i64) -> ShellResult<Instruction> {
        let amount = delta.unsigned_abs();
        let shifted = amount & MAX_ADD_IMMEDIATE == 0 && amount >> 12 <= MAX_ADD_IMMEDIATE;
        if amount > MAX_ADD_IMMEDIATE && !shifted {
            return Err(ShellcraftError::invalid_operand(
                target.arch,
                delta.to_string(),
                "offset is not an encodable add/sub immediate",
            ));
        }
        let mnemonic = if delta < 0 { "sub" } else { "add" };
        let imm = Operand::imm(target.arch, i128::from(amount))?;
        Ok(Instruction::new(mnemonic, vec![dst.into(), base.into(), imm.into()]))
    }

    fn zero_register(target: &Target) -> ShellResult<Register> {
        target.register("xzr")
    }

    fn word_register(target: &Target, reg: Register) -> ShellResult<Register> {
        if reg.width() != 64 {
            return Err(ShellcraftError::invalid_operand(target.arch, reg.name(), "expected a 64-bit register"));
        }
        Ok(reg)
    }
}

impl Lowering for Aarch64Lowering {
    fn load(&self, target: &Target, dst: Register, value: &Operand) -> ShellResult<Instruction> {
        check_load(dst, value)?;
        let width = dst.width();
        let insn = match value {
            Operand::Immediate(imm) => {
                let bits = (imm.as_signed(width) as u64) & mask(width);
                if is_movz_immediate(bits, width) {
                    let imm = Operand::imm_sized(target.arch, i128::from(bits), width)?;
                    Instruction::new("mov", vec![dst.into(), imm.into()])
                } else if is_movz_immediate(!bits & mask(width), width) {
                    let imm = Operand::imm_sized(target.arch, imm.as_signed(width), width)?;
                    Instruction::new("mov", vec![dst.into(), imm.into()])
                } else {
                    let imm = Operand::imm_sized(target.arch, i128::from(bits), width)?;
                    Instruction::new("ldr", vec![dst.into(), imm.into()])
                }
            }
            Operand::Register(_) => Instruction::new("mov", vec![dst.into(), (*value).into()]),
            Operand::Memory(mem) => {
                self.check_memory(target, mem, i64::from(width / 8))?;
                Instruction::new("ldr", vec![dst.into(), (*value).into()])
            }
        };
        Ok(insn)
    }

    fn address(&self, target: &Target, dst: Register, mem: &MemoryRef) -> ShellResult<Instruction> {
        let dst = Self::word_register(target, dst)?;
        match mem.index() {
            Some(_) if mem.disp() != 0 => Err(ShellcraftError::invalid_operand(
                target.arch,
                Operand::Memory(*mem).to_string(),
                "cannot combine an index register with a displacement",
            )),
            Some((index, scale)) => {
                let mut operands: Vec<InsnOperand> = vec![dst.into(), mem.base().into(), index.into()];
                if scale > 1 {
                    let shift = Operand::imm_sized(target.arch, i128::from(scale.trailing_zeros()), 8)?;
                    operands.push(shift.into());
                }
                Ok(Instruction::new("add", operands))
            }
            None => self.add_immediate(target, dst, mem.base(), mem.disp()),
        }
    }

    fn store(&self, target: &Target, src: Register, mem: &MemoryRef) -> ShellResult<Instruction> {
        let src = Self::word_register(target, src)?;
        self.check_memory(target, mem, 8)?;
        Ok(Instruction::new("str", vec![src.into(), Operand::Memory(*mem).into()]))
    }

    fn adjust_stack(&self, target: &Target, delta: i64) -> ShellResult<Instruction> {
        let sp = target.stack_pointer()?;
        self.add_immediate(target, sp, sp, delta)
    }

    fn push(&self, target: &Target, value: &Operand, out: &mut FragmentBuilder) -> ShellResult<()> {
        self.push_words(target, std::slice::from_ref(value), out)
    }

    fn push_words(&self, target: &Target, words: &[Operand], out: &mut FragmentBuilder) -> ShellResult<()> {
        if words.is_empty() {
            return Ok(());
        }
        let sp = target.stack_pointer()?;
        let tmp = target.temporary()?;
        let zero = Self::zero_register(target)?;
        let size = (words.len() * 8).next_multiple_of(target.stack_align) as i64;

        out.emit(self.adjust_stack(target, -size)?);
        for (slot, word) in words.iter().enumerate() {
            word.check_arch(target.arch)?;
            let src = match word {
                Operand::Immediate(imm) if imm.value() == 0 => zero,
                Operand::Register(reg) if reg.overlaps(sp) => {
                    out.emit(self.add_immediate(target, tmp, sp, size)?);
                    out.clobber(tmp);
                    tmp
                }
                Operand::Register(reg) => Self::word_register(target, *reg)?,
                Operand::Memory(mem) => {
                    // Operands relative to sp still mean the pre-push stack.
                    let mem = if mem.base().overlaps(sp) { mem.offset_by(size) } else { *mem };
                    out.emit(self.load(target, tmp, &Operand::Memory(mem))?);
                    out.clobber(tmp);
                    tmp
                }
                Operand::Immediate(_) => {
                    out.emit(self.load(target, tmp, word)?);
                    out.clobber(tmp);
                    tmp
                }
            };
            let mem = MemoryRef::new(sp, (slot * 8) as i64)?;
            out.emit(self.store(target, src, &mem)?);
        }
        out.clobber(sp);
        Ok(())
    }

    fn syscall_trap(&self, _target: &Target) -> Instruction {
        Instruction::new("svc", vec![Operand::Immediate(Immediate::byte(0)).into()])
    }

    fn breakpoint(&self, _target: &Target) -> Instruction {
        Instruction::new("brk", vec![Operand::Immediate(Immediate::byte(0)).into()])
    }

    fn jump(&self, label: LabelRef) -> Instruction {
        Instruction::new("b", vec![label.into()])
    }

    fn ret(&self, _target: &Target) -> Instruction {
        Instruction::bare("ret")
    }

    fn render_operand(&self, _target: &Target, insn: &Instruction, op: &InsnOperand) -> String {
        match op {
            InsnOperand::Value(Operand::Immediate(imm)) if insn.mnemonic == "ldr" => {
                format!("={}", format_imm(imm.value()))
            }
            InsnOperand::Value(Operand::Immediate(imm)) if insn.operands.len() == 4 => {
                format!("lsl #{}", imm.value())
            }
            InsnOperand::Value(Operand::Immediate(imm)) => format!("#{}", format_imm(imm.value())),
            InsnOperand::Value(Operand::Register(reg)) => reg.to_string(),
            InsnOperand::Value(Operand::Memory(mem)) => render_memory(mem),
            InsnOperand::Label(label) => label.to_string(),
            InsnOperand::RegList(list) => render_reg_list(list),
        }
    }
}
