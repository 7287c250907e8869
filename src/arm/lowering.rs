// Instruction lowering for 32-bit ARM. Constants that fit an A32 modified immediate (an 8-bit
// value rotated right by an even amount) are loaded with `mov`, constants whose complement
// fits with `mvn`, and everything else with the `ldr rd, =value` literal-pool pseudo
// instruction. Memory operands use `[base, #disp]` or `[base, index, lsl #n]`; A32 has no form
// with both an index and a displacement. ARM has no register exchange instruction, so cyclic
// register assignments always go through a scratch register. Pushes of registers use
// `push {reg}`; anything else is first materialized in r12 (the intra-procedure scratch
// register), which is reported as clobbered.

//! ARM instruction lowering and unified-syntax rendering.

use crate::core::error::{ShellResult, ShellcraftError};
use crate::core::fragment::{FragmentBuilder, InsnOperand, Instruction, LabelRef};
use crate::core::operand::{format_imm, Immediate, MemoryRef, Operand};
use crate::core::register_file::Register;
use crate::core::target::{check_load, render_reg_list, Lowering, Target};

/// Largest displacement `ldr`/`str` accept.
const MAX_LDR_OFFSET: i64 = 4095;

#[derive(Debug, Default, Clone, Copy)]
pub struct ArmLowering;

/// Whether `value` is an A32 modified immediate.
pub fn is_modified_immediate(value: u32) -> bool {
    (0..16).any(|rot| value.rotate_left(rot * 2) <= 0xff)
}

impl ArmLowering {
    fn check_memory(&self, target: &Target, mem: &MemoryRef) -> ShellResult<()> {
        let invalid = |reason: &str| {
            ShellcraftError::invalid_operand(target.arch, Operand::Memory(*mem).to_string(), reason)
        };
        if mem.index().is_some() && mem.disp() != 0 {
            return Err(invalid("arm cannot combine an index register with a displacement"));
        }
        if mem.disp().abs() > MAX_LDR_OFFSET {
            return Err(invalid("displacement out of range"));
        }
        Ok(())
    }

    /// `dst <- base +/- imm` with an encodable immediate.
    fn add_immediate(&self, target: &Target, dst: Register, base: Register, delta: i64) -> ShellResult<Instruction> {
        let amount = delta.unsigned_abs();
        let encodable = u32::try_from(amount).map(is_modified_immediate).unwrap_or(false);
        if !encodable {
            return Err(ShellcraftError::invalid_operand(
                target.arch,
                delta.to_string(),
                "offset is not an encodable immediate",
            ));
        }
        let mnemonic = if delta < 0 { "sub" } else { "add" };
        let imm = Operand::imm(target.arch, i128::from(amount))?;
        Ok(Instruction::new(mnemonic, vec![dst.into(), base.into(), imm.into()]))
    }
}

/// Bracketed memory syntax shared by ARM and AArch64.
pub fn render_memory(mem: &MemoryRef) -> String {
    match (mem.index(), mem.disp()) {
        (Some((index, 1)), _) => format!("[{}, {}]", mem.base(), index),
        (Some((index, scale)), _) => format!("[{}, {}, lsl #{}]", mem.base(), index, scale.trailing_zeros()),
        (None, 0) => format!("[{}]", mem.base()),
        (None, disp) => format!("[{}, #{}]", mem.base(), format_imm(i128::from(disp))),
    }
}

impl Lowering for ArmLowering {
    fn load(&self, target: &Target, dst: Register, value: &Operand) -> ShellResult<Instruction> {
        check_load(dst, value)?;
        let insn = match value {
            Operand::Immediate(imm) => {
                let bits = imm.as_signed(32) as u32;
                if is_modified_immediate(bits) {
                    let imm = Operand::imm_sized(target.arch, i128::from(bits), 32)?;
                    Instruction::new("mov", vec![dst.into(), imm.into()])
                } else if is_modified_immediate(!bits) {
                    let imm = Operand::imm_sized(target.arch, i128::from(!bits), 32)?;
                    Instruction::new("mvn", vec![dst.into(), imm.into()])
                } else {
                    let imm = Operand::imm_sized(target.arch, i128::from(bits), 32)?;
                    Instruction::new("ldr", vec![dst.into(), imm.into()])
                }
            }
            Operand::Register(_) => Instruction::new("mov", vec![dst.into(), (*value).into()]),
            Operand::Memory(mem) => {
                self.check_memory(target, mem)?;
                Instruction::new("ldr", vec![dst.into(), (*value).into()])
            }
        };
        Ok(insn)
    }

    fn address(&self, target: &Target, dst: Register, mem: &MemoryRef) -> ShellResult<Instruction> {
        self.check_memory(target, mem)?;
        match mem.index() {
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
        self.check_memory(target, mem)?;
        Ok(Instruction::new("str", vec![src.into(), Operand::Memory(*mem).into()]))
    }

    fn adjust_stack(&self, target: &Target, delta: i64) -> ShellResult<Instruction> {
        let sp = target.stack_pointer()?;
        self.add_immediate(target, sp, sp, delta)
    }

    fn push(&self, target: &Target, value: &Operand, out: &mut FragmentBuilder) -> ShellResult<()> {
        value.check_arch(target.arch)?;
        let sp = target.stack_pointer()?;
        let src = match value.as_register() {
            Some(reg) if !reg.overlaps(sp) && reg.is_writable() => reg,
            _ => {
                let tmp = target.temporary()?;
                if value.as_register().is_some_and(|reg| reg.overlaps(sp)) {
                    out.emit(Instruction::new("mov", vec![tmp.into(), sp.into()]));
                } else {
                    out.emit(self.load(target, tmp, value)?);
                }
                out.clobber(tmp);
                tmp
            }
        };
        out.emit(Instruction::new("push", vec![InsnOperand::RegList(vec![src])]));
        out.clobber(sp);
        Ok(())
    }

    fn syscall_trap(&self, _target: &Target) -> Instruction {
        Instruction::new("svc", vec![Operand::Immediate(Immediate::byte(0)).into()])
    }

    fn breakpoint(&self, _target: &Target) -> Instruction {
        Instruction::bare("bkpt")
    }

    fn jump(&self, label: LabelRef) -> Instruction {
        Instruction::new("b", vec![label.into()])
    }

    fn ret(&self, target: &Target) -> Instruction {
        match target.register("lr") {
            Ok(lr) => Instruction::new("bx", vec![lr.into()]),
            Err(_) => Instruction::bare("bx lr"),
        }
    }

    fn preamble(&self, _target: &Target) -> Option<&'static str> {
        Some(".syntax unified\n.arm")
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::arch::Arch;

    fn arm(name: &str) -> Register {
        Arch::Arm.target().register(name).unwrap()
    }

    fn lines(target: &Target, out: FragmentBuilder) -> Vec<String> {
        let fragment = out.finish();
        fragment.instructions().map(|i| target.lowering.render(target, i)).collect()
    }

    #[test]
    fn test_modified_immediates() {
        assert!(is_modified_immediate(0xff));
        assert!(is_modified_immediate(0xff00_0000));
        assert!(is_modified_immediate(0x0000_03fc));
        assert!(!is_modified_immediate(0x101));
        assert!(!is_modified_immediate(0x1234_5678));
    }

    #[test]
    fn test_load_forms() {
        let target = Arch::Arm.target();
        let render = |value: &str| {
            let op = Operand::parse(Arch::Arm, value).unwrap();
            target.lowering.render(target, &ArmLowering.load(target, arm("r0"), &op).unwrap())
        };
        assert_eq!(render("1"), "mov r0, #1");
        assert_eq!(render("-1"), "mvn r0, #0");
        assert_eq!(render("0x12345678"), "ldr r0, =0x12345678");
        assert_eq!(render("r1"), "mov r0, r1");
        assert_eq!(render("[sp+8]"), "ldr r0, [sp, #8]");
        assert_eq!(render("[r1+r2*4]"), "ldr r0, [r1, r2, lsl #2]");
        let bad = Operand::parse(Arch::Arm, "[r1+r2+4]").unwrap();
        assert!(ArmLowering.load(target, arm("r0"), &bad).is_err());
        let pc = Operand::parse(Arch::Arm, "1").unwrap();
        assert!(ArmLowering.load(target, arm("pc"), &pc).is_err());
    }

    #[test]
    fn test_push_forms() {
        let target = Arch::Arm.target();
        let mut out = FragmentBuilder::new("push", Arch::Arm);
        ArmLowering.push(target, &Operand::Register(arm("r4")), &mut out).unwrap();
        ArmLowering.push(target, &Operand::imm(Arch::Arm, 0x6e69622f).unwrap(), &mut out).unwrap();
        ArmLowering.push(target, &Operand::Register(arm("sp")), &mut out).unwrap();
        assert_eq!(
            lines(target, out),
            vec!["push {r4}", "ldr r12, =0x6e69622f", "push {r12}", "mov r12, sp", "push {r12}"]
        );
    }

    #[test]
    fn test_stack_and_trap() {
        let target = Arch::Arm.target();
        let sp = arm("sp");
        let render = |insn: Instruction| target.lowering.render(target, &insn);
        assert_eq!(render(ArmLowering.adjust_stack(target, -16).unwrap()), "sub sp, sp, #0x10");
        assert_eq!(render(ArmLowering.adjust_stack(target, 8).unwrap()), "add sp, sp, #8");
        assert!(ArmLowering.adjust_stack(target, -0x1234).is_err());
        let mem = MemoryRef::new(sp, 4).unwrap();
        assert_eq!(render(ArmLowering.address(target, arm("r12"), &mem).unwrap()), "add r12, sp, #4");
        assert_eq!(render(ArmLowering.store(target, arm("r12"), &mem).unwrap()), "str r12, [sp, #4]");
        assert_eq!(render(ArmLowering.syscall_trap(target)), "svc #0");
        assert_eq!(render(ArmLowering.ret(target)), "bx lr");
        assert!(ArmLowering.exchange(target, arm("r0"), arm("r1")).is_err());
    }
}
