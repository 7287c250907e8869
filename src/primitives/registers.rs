//! Register primitives: `mov`, `setregs` and `xchg`.
//!
//! All three are thin front ends of the resolver, so `mov rax, rax` is empty
//! and `xchg` lowers to an exchange instruction where one exists.

use crate::core::args::Args;
use crate::core::error::ShellResult;
use crate::core::fragment::{Fragment, FragmentBuilder};
use crate::core::operand::Operand;
use crate::core::register_file::Register;
use crate::core::target::Target;
use crate::setregs::{resolve, AssignmentRequest};

use super::{required, Context, Param, ParamKind, Primitive, Signature};

/// Lower a resolved request into a fragment named `name`.
pub(crate) fn assign(name: &'static str, target: &Target, request: &AssignmentRequest) -> ShellResult<Fragment> {
    let resolution = resolve(request, target)?;
    let mut out = FragmentBuilder::new(name, target.arch);
    resolution.emit(target, &mut out)?;
    Ok(out.finish())
}

/// `dst <- src`.
pub fn mov(target: &Target, dst: Register, src: Operand) -> ShellResult<Fragment> {
    let request = AssignmentRequest::new(target.arch).with(dst, src)?;
    assign("mov", target, &request).map_err(|e| e.in_primitive("mov"))
}

/// Set every register of `request` at once.
pub fn setregs(target: &Target, request: &AssignmentRequest) -> ShellResult<Fragment> {
    assign("setregs", target, request).map_err(|e| e.in_primitive("setregs"))
}

/// Swap two registers of equal width.
pub fn xchg(target: &Target, a: Register, b: Register) -> ShellResult<Fragment> {
    let request = AssignmentRequest::new(target.arch)
        .with(a, Operand::Register(b))
        .and_then(|r| r.with(b, Operand::Register(a)))
        .map_err(|e| e.in_primitive("xchg"))?;
    assign("xchg", target, &request).map_err(|e| e.in_primitive("xchg"))
}

#[derive(Debug)]
pub struct Mov;

impl Primitive for Mov {
    fn name(&self) -> &'static str {
        "mov"
    }

    fn summary(&self) -> &'static str {
        "move a value into a register"
    }

    fn signature(&self) -> Signature {
        const PARAMS: &[Param] = &[
            Param::required("dst", ParamKind::Register),
            Param::required("src", ParamKind::Operand),
        ];
        Signature::Fixed(PARAMS)
    }

    fn generate(&self, ctx: &Context<'_>, args: &Args) -> ShellResult<Fragment> {
        let arch = ctx.target.arch;
        let dst = required(ctx, "dst", || args.register(arch, "dst"))?;
        let src = required(ctx, "src", || args.operand(arch, "src"))?;
        mov(ctx.target, dst, src)
    }
}

#[derive(Debug)]
pub struct SetRegs;

impl Primitive for SetRegs {
    fn name(&self) -> &'static str {
        "setregs"
    }

    fn summary(&self) -> &'static str {
        "set several registers at once, ordering the moves"
    }

    fn signature(&self) -> Signature {
        Signature::RegisterMap
    }

    fn generate(&self, ctx: &Context<'_>, args: &Args) -> ShellResult<Fragment> {
        let arch = ctx.target.arch;
        let mut request = AssignmentRequest::new(arch);
        for key in args.keys() {
            let dst = ctx.target.register(key)?;
            let value = required(ctx, key, || args.operand(arch, key))?;
            request.insert(dst, value)?;
        }
        setregs(ctx.target, &request)
    }
}

#[derive(Debug)]
pub struct Xchg;

impl Primitive for Xchg {
    fn name(&self) -> &'static str {
        "xchg"
    }

    fn summary(&self) -> &'static str {
        "swap two registers"
    }

    fn signature(&self) -> Signature {
        const PARAMS: &[Param] = &[
            Param::required("a", ParamKind::Register),
            Param::required("b", ParamKind::Register),
        ];
        Signature::Fixed(PARAMS)
    }

    fn generate(&self, ctx: &Context<'_>, args: &Args) -> ShellResult<Fragment> {
        let arch = ctx.target.arch;
        let a = required(ctx, "a", || args.register(arch, "a"))?;
        let b = required(ctx, "b", || args.register(arch, "b"))?;
        xchg(ctx.target, a, b)
    }
}
