// This module ties the per-architecture data together. A Target is the static description
// of one architecture: its register file, the registers the kernel syscall ABI uses (number
// register, ordered argument registers), the stack pointer, the return-value register, the
// temporary register instruction lowering may clobber, the ordered scratch-register
// candidates the resolver may use to break cyclic assignments, and whether the architecture
// has a register exchange instruction. The Lowering trait is the only per-family code: it
// turns the handful of abstract operations primitives need (load a value into a register,
// exchange two registers, store, adjust the stack, push, trap, ...) into instructions and
// renders instructions as assembly text. Generic primitive and resolver logic only ever talks
// to these two seams, so adding an architecture means adding a table and a lowering.

//! Static target descriptions and the instruction lowering seam.

use super::arch::{Arch, Family};
use super::error::{ShellResult, ShellcraftError};
use super::fragment::{FragmentBuilder, InsnOperand, Instruction, LabelRef};
use super::operand::{Immediate, MemoryRef, Operand};
use super::register_file::{RegisterFile, Register};

/// Kernel system call convention.
#[derive(Debug, Clone, Copy)]
pub struct SyscallAbi {
    /// Register holding the syscall number.
    pub number: &'static str,
    /// Argument registers, in argument order.
    pub args: &'static [&'static str],
}

/// Static description of one architecture.
pub struct Target {
    pub arch: Arch,
    pub registers: RegisterFile,
    pub stack_pointer: &'static str,
    pub return_register: &'static str,
    /// Register lowering may use to materialize values (documented as clobbered).
    pub temporary: &'static str,
    /// Scratch candidates for cycle breaking, most preferred first.
    pub scratch: &'static [&'static str],
    pub has_exchange: bool,
    /// Required stack pointer alignment for pushes, in bytes.
    pub stack_align: usize,
    pub syscall: SyscallAbi,
    pub lowering: &'static dyn Lowering,
}

impl Target {
    /// Static description of `arch`.
    pub fn get(arch: Arch) -> &'static Target {
        match arch {
            Arch::I386 => &crate::x86::I386,
            Arch::Amd64 => &crate::x86::AMD64,
            Arch::Arm => &crate::arm::ARM,
            Arch::Aarch64 => &crate::aarch64::AARCH64,
            Arch::Riscv64 => &crate::riscv::RISCV64,
        }
    }

    pub fn family(&self) -> Family {
        self.arch.family()
    }

    /// Look up a register by name.
    pub fn register(&self, name: &str) -> ShellResult<Register> {
        self.registers.get(name)
    }

    pub fn stack_pointer(&self) -> ShellResult<Register> {
        self.register(self.stack_pointer)
    }

    pub fn return_register(&self) -> ShellResult<Register> {
        self.register(self.return_register)
    }

    pub fn temporary(&self) -> ShellResult<Register> {
        self.register(self.temporary)
    }

    pub fn syscall_number_register(&self) -> ShellResult<Register> {
        self.register(self.syscall.number)
    }

    pub fn syscall_arg_registers(&self) -> ShellResult<Vec<Register>> {
        self.syscall.args.iter().map(|name| self.register(name)).collect()
    }

    pub fn scratch_candidates(&self) -> impl Iterator<Item = Register> + '_ {
        self.scratch.iter().filter_map(|name| self.registers.lookup(name))
    }

    /// A word-sized immediate.
    pub fn word(&self, value: i128) -> ShellResult<Operand> {
        Operand::imm(self.arch, value)
    }
}

impl std::fmt::Debug for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Target")
            .field("arch", &self.arch)
            .field("registers", &self.registers)
            .field("has_exchange", &self.has_exchange)
            .finish()
    }
}

/// Fail unless `value` can be loaded into `dst` by a single move.
pub fn check_load(dst: Register, value: &Operand) -> ShellResult<()> {
    let arch = dst.arch();
    value.check_arch(arch)?;
    if !dst.is_writable() {
        return Err(ShellcraftError::invalid_operand(arch, dst.name(), "register is read-only"));
    }
    match value {
        Operand::Immediate(imm) if !Immediate::fits(imm.value(), dst.width()) => {
            Err(ShellcraftError::invalid_operand(
                arch,
                value.to_string(),
                format!("does not fit in {}-bit register {}", dst.width(), dst),
            ))
        }
        Operand::Register(src) if src.width() != dst.width() => Err(ShellcraftError::invalid_operand(
            arch,
            src.name(),
            format!("{}-bit source for {}-bit register {}", src.width(), dst.width(), dst),
        )),
        _ => Ok(()),
    }
}

/// Per-family instruction selection and rendering.
///
/// Every method producing a single [`Instruction`] must produce exactly one
/// machine instruction (or one assembler pseudo-instruction); the resolver's
/// instruction-count guarantees rely on it.
pub trait Lowering: Sync {
    /// `dst <- value` as one instruction.
    fn load(&self, target: &Target, dst: Register, value: &Operand) -> ShellResult<Instruction>;

    /// Swap two registers, if the family has an exchange instruction.
    fn exchange(&self, target: &Target, a: Register, _b: Register) -> ShellResult<Instruction> {
        Err(ShellcraftError::invalid_operand(
            target.arch,
            a.name(),
            format!("{} has no exchange instruction", target.arch),
        ))
    }

    /// `dst <- base + disp` (address computation, no memory access).
    fn address(&self, target: &Target, dst: Register, mem: &MemoryRef) -> ShellResult<Instruction>;

    /// `[mem] <- src`, word sized.
    fn store(&self, target: &Target, src: Register, mem: &MemoryRef) -> ShellResult<Instruction>;

    /// `sp <- sp + delta`.
    fn adjust_stack(&self, target: &Target, delta: i64) -> ShellResult<Instruction>;

    /// Push one word.
    ///
    /// The default reserves a word and stores into it, materializing the
    /// value in the temporary register first unless it is a plain register
    /// other than the stack pointer.
    fn push(&self, target: &Target, value: &Operand, out: &mut FragmentBuilder) -> ShellResult<()> {
        let sp = target.stack_pointer()?;
        let word = target.arch.word_bytes() as i64;
        let src = match value.as_register() {
            Some(reg) if !reg.overlaps(sp) => reg,
            _ => {
                let tmp = target.temporary()?;
                out.emit(self.load(target, tmp, value)?).clobber(tmp);
                tmp
            }
        };
        out.emit(self.adjust_stack(target, -word)?);
        out.emit(self.store(target, src, &MemoryRef::new(sp, 0)?)?);
        out.clobber(sp);
        Ok(())
    }

    /// Push `words` so that `words[0]` ends up at the new stack pointer.
    fn push_words(&self, target: &Target, words: &[Operand], out: &mut FragmentBuilder) -> ShellResult<()> {
        for word in words.iter().rev() {
            self.push(target, word, out)?;
        }
        Ok(())
    }

    /// Trap into the kernel.
    fn syscall_trap(&self, target: &Target) -> Instruction;

    /// Debugger breakpoint.
    fn breakpoint(&self, target: &Target) -> Instruction;

    fn nop(&self) -> Instruction {
        Instruction::bare("nop")
    }

    fn jump(&self, label: LabelRef) -> Instruction;

    fn ret(&self, target: &Target) -> Instruction;

    /// Directive placed before the first rendered instruction, if any.
    fn preamble(&self, _target: &Target) -> Option<&'static str> {
        None
    }

    /// Render one operand of `insn`.
    fn render_operand(&self, target: &Target, insn: &Instruction, op: &InsnOperand) -> String;

    /// Render `insn` as one line of assembly.
    fn render(&self, target: &Target, insn: &Instruction) -> String {
        if insn.operands.is_empty() {
            return insn.mnemonic.to_string();
        }
        let operands = insn
            .operands
            .iter()
            .map(|op| self.render_operand(target, insn, op))
            .collect::<Vec<_>>()
            .join(", ");
        format!("{} {}", insn.mnemonic, operands)
    }
}

/// Render a register list as `{r0, r1}`.
pub fn render_reg_list(list: &[Register]) -> String {
    let names = list.iter().map(|r| r.name()).collect::<Vec<_>>().join(", ");
    format!("{{{names}}}")
}
