// Linux convenience primitives composed from the library: `exit` is a single exit syscall,
// `echo` pushes a string (without terminator) and writes it from the stack to a file
// descriptor, and `sh` pushes "/bin///sh" and execs it with empty argv and envp. The
// extra slashes make the path a whole number of 32-bit words including its terminator.
// Each one builds its sub-fragments through the typed entry points and concatenates them
// into a single fragment under its own name, so clobbers of the parts carry over.

//! Linux compositions: `exit`, `echo` and `sh`.

use crate::core::args::Args;
use crate::core::error::{ShellResult, ShellcraftError};
use crate::core::fragment::{Fragment, FragmentBuilder};
use crate::core::operand::Operand;

use super::registers::mov;
use super::stack::pushstr;
use super::syscall::{syscall, SyscallId};
use super::{required, Context, Param, ParamKind, Primitive, Signature};

/// `exit(status)`.
pub fn exit(ctx: &Context<'_>, status: Operand) -> ShellResult<Fragment> {
    let mut out = FragmentBuilder::new("exit", ctx.target.arch);
    out.append(&syscall(ctx, SyscallId::Name("exit"), &[status])?);
    Ok(out.finish())
}

/// Write `string` to `fd`.
///
/// An `fd` reading a register the push clobbers (the temporary or the stack
/// pointer) is moved into the first syscall argument register first.
pub fn echo(ctx: &Context<'_>, string: &[u8], fd: Operand) -> ShellResult<Fragment> {
    let target = ctx.target;
    let sp = Operand::Register(target.stack_pointer()?);
    let len = target.word(string.len() as i128)?;
    let pushed = pushstr(target, string, false)?;
    let mut out = FragmentBuilder::new("echo", target.arch);

    let fd = if pushed.clobbers().iter().any(|&reg| fd.reads_register(reg)) {
        let first = target.syscall_arg_registers()?.into_iter().next();
        let Some(first) = first.filter(|first| !pushed.clobbers().iter().any(|reg| reg.overlaps(*first))) else {
            return Err(ShellcraftError::invalid_operand(
                target.arch,
                fd.to_string(),
                "fd is overwritten by pushing the string",
            ));
        };
        log::debug!("{}: settling fd {} in {} before the push", target.arch, fd, first);
        out.append(&mov(target, first, fd)?);
        Operand::Register(first)
    } else {
        fd
    };
    out.append(&pushed);
    out.append(&syscall(ctx, SyscallId::Name("write"), &[fd, sp, len])?);
    Ok(out.finish())
}

/// `execve("/bin///sh", NULL, NULL)`.
pub fn sh(ctx: &Context<'_>) -> ShellResult<Fragment> {
    let target = ctx.target;
    let sp = Operand::Register(target.stack_pointer()?);
    let null = target.word(0)?;
    let mut out = FragmentBuilder::new("sh", target.arch);
    out.append(&pushstr(target, b"/bin///sh", true)?);
    out.append(&syscall(ctx, SyscallId::Name("execve"), &[sp, null, null])?);
    Ok(out.finish())
}

#[derive(Debug)]
pub struct Exit;

impl Primitive for Exit {
    fn name(&self) -> &'static str {
        "exit"
    }

    fn summary(&self) -> &'static str {
        "exit the process"
    }

    fn signature(&self) -> Signature {
        const PARAMS: &[Param] = &[Param::optional("status", ParamKind::Operand)];
        Signature::Fixed(PARAMS)
    }

    fn generate(&self, ctx: &Context<'_>, args: &Args) -> ShellResult<Fragment> {
        let status = match args.operand(ctx.target.arch, "status")? {
            Some(status) => status,
            None => ctx.target.word(0)?,
        };
        exit(ctx, status)
    }
}

#[derive(Debug)]
pub struct Echo;

impl Primitive for Echo {
    fn name(&self) -> &'static str {
        "echo"
    }

    fn summary(&self) -> &'static str {
        "write a string to a file descriptor"
    }

    fn signature(&self) -> Signature {
        const PARAMS: &[Param] = &[
            Param::required("string", ParamKind::Bytes),
            Param::optional("fd", ParamKind::Operand),
        ];
        Signature::Fixed(PARAMS)
    }

    fn generate(&self, ctx: &Context<'_>, args: &Args) -> ShellResult<Fragment> {
        let arch = ctx.target.arch;
        let string = required(ctx, "string", || args.bytes(arch, "string"))?;
        if string.is_empty() {
            return Err(ShellcraftError::invalid_operand(arch, "string=", "nothing to write"));
        }
        let fd = match args.operand(arch, "fd")? {
            Some(fd) => fd,
            None => ctx.target.word(1)?,
        };
        echo(ctx, &string, fd)
    }
}

#[derive(Debug)]
pub struct Sh;

impl Primitive for Sh {
    fn name(&self) -> &'static str {
        "sh"
    }

    fn summary(&self) -> &'static str {
        "execve /bin/sh"
    }

    fn signature(&self) -> Signature {
        Signature::Fixed(&[])
    }

    fn generate(&self, ctx: &Context<'_>, _args: &Args) -> ShellResult<Fragment> {
        sh(ctx)
    }
}
