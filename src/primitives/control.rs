//! Control primitives: `nop`, `trap`, `infloop`, `ret` and `raw`.

use crate::core::args::Args;
use crate::core::error::{ShellResult, ShellcraftError};
use crate::core::fragment::{Fragment, FragmentBuilder, LabelRef};
use crate::core::operand::Operand;
use crate::core::target::Target;
use crate::setregs::AssignmentRequest;

use super::registers::assign;
use super::{required, Context, Param, ParamKind, Primitive, Signature};

/// Upper bound on `nop count=...`.
const MAX_NOPS: i128 = 1 << 16;

/// `count` no-op instructions.
pub fn nop(target: &Target, count: usize) -> Fragment {
    let mut out = FragmentBuilder::new("nop", target.arch);
    for _ in 0..count {
        out.emit(target.lowering.nop());
    }
    out.finish()
}

/// Debugger breakpoint.
pub fn trap(target: &Target) -> Fragment {
    let mut out = FragmentBuilder::new("trap", target.arch);
    out.emit(target.lowering.breakpoint(target));
    out.finish()
}

/// Jump to self forever.
pub fn infloop(target: &Target) -> Fragment {
    let mut out = FragmentBuilder::new("infloop", target.arch);
    out.label(1).emit(target.lowering.jump(LabelRef::backward(1)));
    out.finish()
}

/// Return, optionally setting the return register first.
pub fn ret(target: &Target, value: Option<Operand>) -> ShellResult<Fragment> {
    let mut out = FragmentBuilder::new("ret", target.arch);
    if let Some(value) = value {
        let request = AssignmentRequest::new(target.arch)
            .with(target.return_register()?, value)
            .map_err(|e| e.in_primitive("ret"))?;
        out.append(&assign("ret", target, &request).map_err(|e| e.in_primitive("ret"))?);
    }
    out.emit(target.lowering.ret(target));
    Ok(out.finish())
}

/// Raw bytes, emitted as data.
pub fn raw(target: &Target, bytes: &[u8]) -> Fragment {
    let mut out = FragmentBuilder::new("raw", target.arch);
    out.data(bytes);
    out.finish()
}

#[derive(Debug)]
pub struct Nop;

impl Primitive for Nop {
    fn name(&self) -> &'static str {
        "nop"
    }

    fn summary(&self) -> &'static str {
        "no-op instructions"
    }

    fn signature(&self) -> Signature {
        const PARAMS: &[Param] = &[Param::optional("count", ParamKind::Integer)];
        Signature::Fixed(PARAMS)
    }

    fn generate(&self, ctx: &Context<'_>, args: &Args) -> ShellResult<Fragment> {
        let arch = ctx.target.arch;
        let count = args.integer(arch, "count")?.unwrap_or(1);
        if !(0..=MAX_NOPS).contains(&count) {
            return Err(ShellcraftError::invalid_operand(
                arch,
                format!("count={count}"),
                format!("expected 0..={MAX_NOPS}"),
            ));
        }
        Ok(nop(ctx.target, count as usize))
    }
}

#[derive(Debug)]
pub struct Trap;

impl Primitive for Trap {
    fn name(&self) -> &'static str {
        "trap"
    }

    fn summary(&self) -> &'static str {
        "debugger breakpoint"
    }

    fn signature(&self) -> Signature {
        Signature::Fixed(&[])
    }

    fn generate(&self, ctx: &Context<'_>, _args: &Args) -> ShellResult<Fragment> {
        Ok(trap(ctx.target))
    }
}

#[derive(Debug)]
pub struct InfLoop;

impl Primitive for InfLoop {
    fn name(&self) -> &'static str {
        "infloop"
    }

    fn summary(&self) -> &'static str {
        "loop forever"
    }

    fn signature(&self) -> Signature {
        Signature::Fixed(&[])
    }

    fn generate(&self, ctx: &Context<'_>, _args: &Args) -> ShellResult<Fragment> {
        Ok(infloop(ctx.target))
    }
}

#[derive(Debug)]
pub struct Ret;

impl Primitive for Ret {
    fn name(&self) -> &'static str {
        "ret"
    }

    fn summary(&self) -> &'static str {
        "return, optionally with a value"
    }

    fn signature(&self) -> Signature {
        const PARAMS: &[Param] = &[Param::optional("value", ParamKind::Operand)];
        Signature::Fixed(PARAMS)
    }

    fn generate(&self, ctx: &Context<'_>, args: &Args) -> ShellResult<Fragment> {
        let value = args.operand(ctx.target.arch, "value")?;
        ret(ctx.target, value)
    }
}

#[derive(Debug)]
pub struct Raw;

impl Primitive for Raw {
    fn name(&self) -> &'static str {
        "raw"
    }

    fn summary(&self) -> &'static str {
        "raw bytes emitted inline"
    }

    fn signature(&self) -> Signature {
        const PARAMS: &[Param] = &[Param::required("bytes", ParamKind::Bytes)];
        Signature::Fixed(PARAMS)
    }

    fn generate(&self, ctx: &Context<'_>, args: &Args) -> ShellResult<Fragment> {
        let bytes = required(ctx, "bytes", || args.bytes(ctx.target.arch, "bytes"))?;
        Ok(raw(ctx.target, &bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::arch::Arch;
    use crate::core::fragment::Item;
    use crate::syscalls::LINUX;

    fn lines(target: &Target, fragment: &Fragment) -> Vec<String> {
        fragment.instructions().map(|i| target.lowering.render(target, i)).collect()
    }

    #[test]
    fn test_breakpoints() {
        let expected = [
            (Arch::I386, "int3"),
            (Arch::Amd64, "int3"),
            (Arch::Arm, "bkpt"),
            (Arch::Aarch64, "brk #0"),
            (Arch::Riscv64, "ebreak"),
        ];
        for (arch, line) in expected {
            let target = arch.target();
            assert_eq!(lines(target, &trap(target)), vec![line], "{arch}");
        }
    }

    #[test]
    fn test_infloop_jumps_to_its_label() {
        let target = Arch::Aarch64.target();
        let fragment = infloop(target);
        assert_eq!(fragment.items()[0], Item::Label(1));
        assert_eq!(lines(target, &fragment), vec!["b 1b"]);
    }

    #[test]
    fn test_ret_with_value() {
        let target = Arch::Riscv64.target();
        let fragment = ret(target, Some(Operand::imm(Arch::Riscv64, 7).unwrap())).unwrap();
        assert_eq!(lines(target, &fragment), vec!["li a0, 7", "ret"]);
        assert_eq!(fragment.primitive(), "ret");

        let target = Arch::Arm.target();
        assert_eq!(lines(target, &ret(target, None).unwrap()), vec!["bx lr"]);
    }

    #[test]
    fn test_nop_count_bounds() {
        let ctx = Context::new(Arch::Amd64.target(), &LINUX);
        let fragment = Nop.generate(&ctx, &Args::new().with("count", 3)).unwrap();
        assert_eq!(fragment.instructions().count(), 3);
        assert!(Nop.generate(&ctx, &Args::new().with("count", -1)).is_err());
        assert_eq!(Nop.generate(&ctx, &Args::new()).unwrap().instructions().count(), 1);
    }

    #[test]
    fn test_raw_bytes() {
        let ctx = Context::new(Arch::Arm.target(), &LINUX);
        let fragment = Raw.generate(&ctx, &Args::new().with("bytes", "\\xcc\\x90")).unwrap();
        assert_eq!(fragment.items(), &[Item::Data(vec![0xcc, 0x90])]);
    }
}
