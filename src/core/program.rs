// This module is the composition driver. A Program is an architecture plus the ordered list
// of fragments appended to it; it never reorders or rewrites them. Fragments are appended
// either directly (push, which rejects fragments generated for another architecture) or by
// invoking a catalog primitive by name with named arguments (invoke, which validates the
// arguments, generates and appends atomically: a failed invocation leaves the program as it
// was). The program renders to assembly text with one instruction per line, GAS numeric
// labels, `.byte` data lines and a comment marking where each fragment starts, and x86
// programs can additionally be encoded in process and wrapped into an ELF object.

//! Composition of fragments into programs.

use std::fmt::Write as _;

use super::arch::{Arch, Family};
use super::args::Args;
use super::elf;
use super::error::{ShellResult, ShellcraftError};
use super::fragment::{Fragment, Item};
use super::register_file::{RegSet, Register};
use super::target::Target;
use crate::primitives::{self, Context};
use crate::syscalls::{SyscallTable, LINUX};

/// Ordered fragments for one architecture.
pub struct Program<'s> {
    target: &'static Target,
    syscalls: &'s dyn SyscallTable,
    fragments: Vec<Fragment>,
}

impl Program<'static> {
    /// An empty program using the built-in Linux syscall table.
    pub fn new(arch: Arch) -> Self {
        Self::with_syscalls(arch, &LINUX)
    }
}

impl<'s> Program<'s> {
    /// An empty program resolving syscall names through `syscalls`.
    pub fn with_syscalls(arch: Arch, syscalls: &'s dyn SyscallTable) -> Self {
        Self { target: arch.target(), syscalls, fragments: Vec::new() }
    }

    pub fn arch(&self) -> Arch {
        self.target.arch
    }

    pub fn target(&self) -> &'static Target {
        self.target
    }

    /// Generation context for calling primitives directly.
    pub fn context(&self) -> Context<'s> {
        Context::new(self.target, self.syscalls)
    }

    /// Append a fragment generated for this program's architecture.
    pub fn push(&mut self, fragment: Fragment) -> ShellResult<&mut Self> {
        if fragment.arch() != self.arch() {
            return Err(ShellcraftError::invalid_operand(
                self.arch(),
                fragment.primitive(),
                format!("fragment was generated for {}", fragment.arch()),
            ));
        }
        self.fragments.push(fragment);
        Ok(self)
    }

    /// Invoke catalog primitive `name` and append its fragment.
    pub fn invoke(&mut self, name: &str, args: &Args) -> ShellResult<&mut Self> {
        let fragment = primitives::invoke(&self.context(), name, args)?;
        self.push(fragment)
    }

    pub fn fragments(&self) -> &[Fragment] {
        &self.fragments
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    /// Union of every fragment's clobbers, in first-seen order.
    pub fn clobbers(&self) -> Vec<Register> {
        let mut seen = RegSet::new();
        let mut clobbers = Vec::new();
        for &reg in self.fragments.iter().flat_map(|f| f.clobbers()) {
            if !seen.contains(reg) {
                seen.insert(reg);
                clobbers.push(reg);
            }
        }
        clobbers
    }

    pub fn instruction_count(&self) -> usize {
        self.fragments.iter().map(|f| f.instructions().count()).sum()
    }

    /// Render the program as assembly text.
    pub fn to_asm(&self) -> String {
        let target = self.target;
        let mut out = String::new();
        if let Some(preamble) = target.lowering.preamble(target) {
            let _ = writeln!(out, "{preamble}");
        }
        for fragment in &self.fragments {
            let _ = writeln!(out, "/* {} */", fragment.primitive());
            for item in fragment.items() {
                match item {
                    Item::Instruction(insn) => {
                        let _ = writeln!(out, "    {}", target.lowering.render(target, insn));
                    }
                    Item::Label(id) => {
                        let _ = writeln!(out, "{id}:");
                    }
                    Item::Data(bytes) => {
                        for chunk in bytes.chunks(16) {
                            let bytes = chunk.iter().map(|b| format!("{b:#04x}")).collect::<Vec<_>>();
                            let _ = writeln!(out, "    .byte {}", bytes.join(", "));
                        }
                    }
                }
            }
        }
        out
    }

    /// Encode the program to machine code loaded at `base`.
    ///
    /// Only x86 programs can be encoded in process; other families fail
    /// with `Encoding` and must go through an external assembler.
    pub fn assemble(&self, base: u64) -> ShellResult<Vec<u8>> {
        match self.target.family() {
            Family::X86 => crate::x86::encoder::encode(self.arch(), &self.fragments, base),
            _ => Err(ShellcraftError::Encoding {
                arch: self.arch(),
                reason: "no in-process encoder for this architecture".to_string(),
            }),
        }
    }

    /// Encode the program into an ELF relocatable object.
    pub fn to_elf(&self) -> ShellResult<Vec<u8>> {
        let code = self.assemble(0)?;
        elf::write_object(self.arch(), &code)
    }
}

impl std::fmt::Debug for Program<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Program")
            .field("arch", &self.arch())
            .field("fragments", &self.fragments.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::control;

    #[test]
    fn test_to_asm_layout() {
        let mut program = Program::new(Arch::Amd64);
        program
            .invoke("mov", &Args::new().with("dst", "rdi").with("src", "rsp"))
            .unwrap()
            .invoke("infloop", &Args::new())
            .unwrap()
            .invoke("raw", &Args::new().with("bytes", "\\xcc"))
            .unwrap();
        let expected = "\
.intel_syntax noprefix
/* mov */
    mov rdi, rsp
/* infloop */
1:
    jmp 1b
/* raw */
    .byte 0xcc
";
        assert_eq!(program.to_asm(), expected);
        assert_eq!(program.instruction_count(), 2);
    }

    #[test]
    fn test_failed_invoke_leaves_program_unchanged() {
        let mut program = Program::new(Arch::Arm);
        program.invoke("trap", &Args::new()).unwrap();
        let before = program.to_asm();
        assert!(program.invoke("syscall", &Args::new().with("name", "nosuchcall")).is_err());
        assert!(program.invoke("mov", &Args::new().with("dst", "r0")).is_err());
        assert_eq!(program.len(), 1);
        assert_eq!(program.to_asm(), before);
    }

    #[test]
    fn test_push_rejects_foreign_fragment() {
        let mut program = Program::new(Arch::Riscv64);
        let fragment = control::trap(Arch::Aarch64.target());
        assert!(matches!(
            program.push(fragment),
            Err(ShellcraftError::InvalidOperand { .. })
        ));
        assert!(program.is_empty());
    }

    #[test]
    fn test_clobbers_are_merged() {
        let mut program = Program::new(Arch::Aarch64);
        program
            .invoke("push", &Args::new().with("value", 1))
            .unwrap()
            .invoke("push", &Args::new().with("value", 2))
            .unwrap();
        let clobbers: Vec<_> = program.clobbers().iter().map(|r| r.name()).collect();
        assert_eq!(clobbers, vec!["x16", "sp"]);
    }

    #[test]
    fn test_assemble_needs_x86() {
        let program = Program::new(Arch::Riscv64);
        assert!(matches!(program.assemble(0), Err(ShellcraftError::Encoding { .. })));
    }
}
