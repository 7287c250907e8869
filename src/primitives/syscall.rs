// The syscall adapter. A system call is identified by name (looked up in the caller's
// SyscallTable for the target architecture) or directly by number. The number and the
// arguments are mapped onto the kernel ABI registers of the target (amd64 rax; rdi rsi rdx
// r10 r8 r9, i386 eax; ebx ecx edx esi edi ebp, arm r7; r0..r6, aarch64 x8; x0..x5, riscv64
// a7; a0..a5) as one simultaneous assignment, so arguments that read ABI registers (for
// example passing the current rax as the first argument) are ordered correctly by the
// resolver. The trap instruction follows the last move.

//! Syscall invocation: `syscall name=<name> arg0=... argN=...`.

use std::fmt;

use crate::core::args::Args;
use crate::core::error::{ShellResult, ShellcraftError};
use crate::core::fragment::{Fragment, FragmentBuilder};
use crate::core::operand::{parse_int, Operand};
use crate::setregs::{resolve, AssignmentRequest};

use super::{required, Context, Param, ParamKind, Primitive, Signature};

/// Most argument registers any supported ABI has.
pub const MAX_ARGS: usize = 7;

/// How a system call is named.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallId<'a> {
    Name(&'a str),
    Number(u64),
}

impl<'a> SyscallId<'a> {
    /// A name, or a number when `text` is an integer.
    pub fn parse(text: &'a str) -> Self {
        match parse_int(text).and_then(|n| u64::try_from(n).ok()) {
            Some(number) => SyscallId::Number(number),
            None => SyscallId::Name(text),
        }
    }

    fn number(&self, ctx: &Context<'_>) -> ShellResult<u64> {
        match *self {
            SyscallId::Number(number) => Ok(number),
            SyscallId::Name(name) => ctx.syscalls.number(ctx.target.arch, name).ok_or_else(|| {
                ShellcraftError::UnknownSyscall { arch: ctx.target.arch, name: name.to_string() }
            }),
        }
    }
}

impl fmt::Display for SyscallId<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyscallId::Name(name) => f.write_str(name),
            SyscallId::Number(number) => write!(f, "#{number}"),
        }
    }
}

/// Set the syscall number and `args` in the ABI registers, then trap.
pub fn syscall(ctx: &Context<'_>, id: SyscallId<'_>, args: &[Operand]) -> ShellResult<Fragment> {
    build(ctx, id, args).map_err(|e| e.in_primitive("syscall"))
}

fn build(ctx: &Context<'_>, id: SyscallId<'_>, args: &[Operand]) -> ShellResult<Fragment> {
    let target = ctx.target;
    let arch = target.arch;
    let number = id.number(ctx)?;
    let registers = target.syscall_arg_registers()?;
    if args.len() > registers.len() {
        return Err(ShellcraftError::arity(
            arch,
            format!("{id} takes at most {} arguments on {arch}, got {}", registers.len(), args.len()),
        ));
    }
    log::debug!("{arch}: syscall {id} = {number} with {} args", args.len());

    let mut request = AssignmentRequest::new(arch);
    request.insert(target.syscall_number_register()?, target.word(i128::from(number))?)?;
    for (reg, value) in registers.iter().zip(args) {
        request.insert(*reg, *value)?;
    }
    let resolution = resolve(&request, target)?;

    let mut out = FragmentBuilder::new("syscall", arch);
    resolution.emit(target, &mut out)?;
    out.emit(target.lowering.syscall_trap(target));
    Ok(out.finish())
}

const ARG_NAMES: [&str; MAX_ARGS] = ["arg0", "arg1", "arg2", "arg3", "arg4", "arg5", "arg6"];

/// Collect `arg0`, `arg1`, ... which must be given without gaps.
fn positional(ctx: &Context<'_>, args: &Args) -> ShellResult<Vec<Operand>> {
    let arch = ctx.target.arch;
    let given = ARG_NAMES.iter().rposition(|name| args.contains(name)).map_or(0, |last| last + 1);
    ARG_NAMES[..given]
        .iter()
        .map(|name| {
            args.operand(arch, name)?
                .ok_or_else(|| ShellcraftError::arity(arch, format!("`{name}` is missing but later arguments are given")))
        })
        .collect()
}

#[derive(Debug)]
pub struct Syscall;

impl Primitive for Syscall {
    fn name(&self) -> &'static str {
        "syscall"
    }

    fn summary(&self) -> &'static str {
        "invoke a system call by name or number"
    }

    fn signature(&self) -> Signature {
        const PARAMS: &[Param] = &[
            Param::required("name", ParamKind::Symbol),
            Param::optional("arg0", ParamKind::Operand),
            Param::optional("arg1", ParamKind::Operand),
            Param::optional("arg2", ParamKind::Operand),
            Param::optional("arg3", ParamKind::Operand),
            Param::optional("arg4", ParamKind::Operand),
            Param::optional("arg5", ParamKind::Operand),
            Param::optional("arg6", ParamKind::Operand),
        ];
        Signature::Fixed(PARAMS)
    }

    fn generate(&self, ctx: &Context<'_>, args: &Args) -> ShellResult<Fragment> {
        let name = required(ctx, "name", || args.symbol(ctx.target.arch, "name"))?;
        let operands = positional(ctx, args)?;
        syscall(ctx, SyscallId::parse(&name), &operands)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::arch::Arch;
    use crate::syscalls::LINUX;

    fn lines(ctx: &Context<'_>, fragment: &Fragment) -> Vec<String> {
        fragment.instructions().map(|i| ctx.target.lowering.render(ctx.target, i)).collect()
    }

    fn ops(arch: Arch, texts: &[&str]) -> Vec<Operand> {
        texts.iter().map(|t| Operand::parse(arch, t).unwrap()).collect()
    }

    #[test]
    fn test_exit_on_every_arch() {
        let expected = [
            (Arch::I386, vec!["mov eax, 1", "xor ebx, ebx", "int 0x80"]),
            (Arch::Amd64, vec!["mov rax, 0x3c", "xor rdi, rdi", "syscall"]),
            (Arch::Arm, vec!["mov r7, #1", "mov r0, #0", "svc #0"]),
            (Arch::Aarch64, vec!["mov x8, #0x5d", "mov x0, #0", "svc #0"]),
            (Arch::Riscv64, vec!["li a7, 0x5d", "li a0, 0", "ecall"]),
        ];
        for (arch, lines_expected) in expected {
            let ctx = Context::new(arch.target(), &LINUX);
            let fragment = syscall(&ctx, SyscallId::Name("exit"), &ops(arch, &["0"])).unwrap();
            assert_eq!(lines(&ctx, &fragment), lines_expected, "{arch}");
        }
    }

    #[test]
    fn test_argument_reading_number_register() {
        let ctx = Context::new(Arch::Amd64.target(), &LINUX);
        let fragment = syscall(&ctx, SyscallId::Name("write"), &ops(Arch::Amd64, &["1", "rax", "8"])).unwrap();
        assert_eq!(
            lines(&ctx, &fragment),
            vec!["mov rdi, 1", "mov rsi, rax", "mov rax, 1", "mov rdx, 8", "syscall"]
        );
    }

    #[test]
    fn test_unknown_syscall_and_too_many_args() {
        let ctx = Context::new(Arch::Riscv64.target(), &LINUX);
        let err = syscall(&ctx, SyscallId::Name("frobnicate"), &[]).unwrap_err();
        assert_eq!(err, ShellcraftError::UnknownSyscall { arch: Arch::Riscv64, name: "frobnicate".into() });

        let args = ops(Arch::Riscv64, &["1", "2", "3", "4", "5", "6", "7"]);
        let err = syscall(&ctx, SyscallId::Number(64), &args).unwrap_err();
        assert!(matches!(err, ShellcraftError::ArityError { primitive: Some("syscall"), .. }), "{err}");
    }

    #[test]
    fn test_arguments_must_be_contiguous() {
        let ctx = Context::new(Arch::Amd64.target(), &LINUX);
        let args = Args::new().with("name", "exit").with("arg1", 3);
        let err = Syscall.generate(&ctx, &args).unwrap_err();
        assert!(matches!(err, ShellcraftError::ArityError { .. }), "{err}");
    }

    #[test]
    fn test_numeric_name() {
        assert_eq!(SyscallId::parse("60"), SyscallId::Number(60));
        assert_eq!(SyscallId::parse("exit"), SyscallId::Name("exit"));
        let ctx = Context::new(Arch::Amd64.target(), &LINUX);
        let fragment = Syscall.generate(&ctx, &Args::new().with("name", 60)).unwrap();
        assert_eq!(lines(&ctx, &fragment), vec!["mov rax, 0x3c", "syscall"]);
    }
}
