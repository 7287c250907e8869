// Instruction lowering for RV64. Constants are loaded with the `li` pseudo instruction, which
// the assembler expands into the shortest lui/addi(w)/slli sequence, register copies with `mv`
// and memory loads with `ld rd, disp(base)`. RISC-V addressing is base plus a signed 12-bit
// displacement only, so indexed memory operands are rejected. There is no exchange
// instruction and no push: the default push (reserve a word, store into it) applies, with t0
// as the temporary for anything that is not already in a register.

//! RISC-V instruction lowering and rendering.

use crate::core::error::{ShellResult, ShellcraftError};
use crate::core::fragment::{InsnOperand, Instruction, LabelRef};
use crate::core::operand::{format_imm, MemoryRef, Operand};
use crate::core::register_file::Register;
use crate::core::target::{check_load, render_reg_list, Lowering, Target};

/// Signed 12-bit immediate range of I- and S-type instructions.
const IMM12: std::ops::RangeInclusive<i64> = -2048..=2047;

#[derive(Debug, Default, Clone, Copy)]
pub struct RiscvLowering;

impl RiscvLowering {
    fn check_memory(&self, target: &Target, mem: &MemoryRef) -> ShellResult<()> {
        let invalid = |reason: &str| {
            ShellcraftError::invalid_operand(target.arch, Operand::Memory(*mem).to_string(), reason)
        };
        if mem.index().is_some() {
            return Err(invalid("risc-v has no indexed addressing"));
        }
        if !IMM12.contains(&mem.disp()) {
            return Err(invalid("displacement out of range"));
        }
        Ok(())
    }

    fn addi(&self, target: &Target, dst: Register, base: Register, delta: i64) -> ShellResult<Instruction> {
        if !IMM12.contains(&delta) {
            return Err(ShellcraftError::invalid_operand(
                target.arch,
                delta.to_string(),
                "offset does not fit a 12-bit immediate",
            ));
        }
        let imm = Operand::imm(target.arch, i128::from(delta))?;
        Ok(Instruction::new("addi", vec![dst.into(), base.into(), imm.into()]))
    }
}

impl Lowering for RiscvLowering {
    fn load(&self, target: &Target, dst: Register, value: &Operand) -> ShellResult<Instruction> {
        check_load(dst, value)?;
        let insn = match value {
            Operand::Immediate(imm) => {
                let imm = Operand::imm(target.arch, imm.as_signed(64))?;
                Instruction::new("li", vec![dst.into(), imm.into()])
            }
            Operand::Register(_) => Instruction::new("mv", vec![dst.into(), (*value).into()]),
            Operand::Memory(mem) => {
                self.check_memory(target, mem)?;
                Instruction::new("ld", vec![dst.into(), (*value).into()])
            }
        };
        Ok(insn)
    }

    fn address(&self, target: &Target, dst: Register, mem: &MemoryRef) -> ShellResult<Instruction> {
        self.check_memory(target, mem)?;
        self.addi(target, dst, mem.base(), mem.disp())
    }

    fn store(&self, target: &Target, src: Register, mem: &MemoryRef) -> ShellResult<Instruction> {
        self.check_memory(target, mem)?;
        Ok(Instruction::new("sd", vec![src.into(), Operand::Memory(*mem).into()]))
    }

    fn adjust_stack(&self, target: &Target, delta: i64) -> ShellResult<Instruction> {
        let sp = target.stack_pointer()?;
        self.addi(target, sp, sp, delta)
    }

    fn syscall_trap(&self, _target: &Target) -> Instruction {
        Instruction::bare("ecall")
    }

    fn breakpoint(&self, _target: &Target) -> Instruction {
        Instruction::bare("ebreak")
    }

    fn jump(&self, label: LabelRef) -> Instruction {
        Instruction::new("j", vec![label.into()])
    }

    fn ret(&self, _target: &Target) -> Instruction {
        Instruction::bare("ret")
    }

    fn render_operand(&self, _target: &Target, _insn: &Instruction, op: &InsnOperand) -> String {
        match op {
            InsnOperand::Value(Operand::Immediate(imm)) => format_imm(imm.value()),
            InsnOperand::Value(Operand::Register(reg)) => reg.to_string(),
            InsnOperand::Value(Operand::Memory(mem)) => {
                format!("{}({})", format_imm(i128::from(mem.disp())), mem.base())
            }
            InsnOperand::Label(label) => label.to_string(),
            InsnOperand::RegList(list) => render_reg_list(list),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::arch::Arch;
    use crate::core::fragment::FragmentBuilder;

    fn reg(name: &str) -> Register {
        Arch::Riscv64.target().register(name).unwrap()
    }

    #[test]
    fn test_load_forms() {
        let target = Arch::Riscv64.target();
        let render = |value: &str| {
            let op = Operand::parse(Arch::Riscv64, value).unwrap();
            target.lowering.render(target, &RiscvLowering.load(target, reg("a0"), &op).unwrap())
        };
        assert_eq!(render("0x68732f6e69622f"), "li a0, 0x68732f6e69622f");
        assert_eq!(render("0xffffffffffffffff"), "li a0, -0x1");
        assert_eq!(render("s0"), "mv a0, s0");
        assert_eq!(render("[sp+16]"), "ld a0, 0x10(sp)");
        let indexed = Operand::parse(Arch::Riscv64, "[sp+a1]").unwrap();
        assert!(RiscvLowering.load(target, reg("a0"), &indexed).is_err());
    }

    #[test]
    fn test_default_push_goes_through_t0() {
        let target = Arch::Riscv64.target();
        let mut out = FragmentBuilder::new("push", Arch::Riscv64);
        RiscvLowering.push(target, &Operand::imm(Arch::Riscv64, 5).unwrap(), &mut out).unwrap();
        RiscvLowering.push(target, &Operand::Register(reg("a1")), &mut out).unwrap();
        let fragment = out.finish();
        let lines: Vec<_> = fragment.instructions().map(|i| target.lowering.render(target, i)).collect();
        assert_eq!(
            lines,
            vec!["li t0, 5", "addi sp, sp, -0x8", "sd t0, 0(sp)", "addi sp, sp, -0x8", "sd a1, 0(sp)"]
        );
        let clobbers: Vec<_> = fragment.clobbers().iter().map(|r| r.name()).collect();
        assert_eq!(clobbers, vec!["t0", "sp"]);
    }

    #[test]
    fn test_zero_register_is_read_only() {
        let target = Arch::Riscv64.target();
        let one = Operand::imm(Arch::Riscv64, 1).unwrap();
        assert!(RiscvLowering.load(target, reg("zero"), &one).is_err());
        assert_eq!(reg("fp").canonical(), reg("s0"));
        assert_eq!(target.lowering.render(target, &RiscvLowering.syscall_trap(target)), "ecall");
        assert!(RiscvLowering.adjust_stack(target, -4096).is_err());
    }
}
