// This module is the primitive library: the catalog of fragment generators callers compose
// into programs. Every primitive is a pure function of the target description and its named
// arguments. The typed entry points (registers::mov, stack::pushstr, syscall::syscall, ...)
// take already-built operands and are what library code calls directly; the Primitive trait
// objects in CATALOG wrap them for invocation by name, converting Args into typed values
// first. Argument names are checked against the primitive's signature before anything is
// converted, so a missing or unexpected argument fails with ArityError and no instruction is
// ever generated from a half-validated invocation. Primitives that set several registers at
// once build an AssignmentRequest and let the resolver order the moves.

//! Catalog of composable primitives.

pub mod control;
pub mod linux;
pub mod registers;
pub mod stack;
pub mod syscall;

use crate::core::args::Args;
use crate::core::error::{ShellResult, ShellcraftError};
use crate::core::fragment::Fragment;
use crate::core::target::Target;
use crate::syscalls::SyscallTable;

/// Kind of value a parameter accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Register,
    /// Register, immediate or memory reference.
    Operand,
    Integer,
    Bytes,
    /// A name such as a syscall name.
    Symbol,
    StringList,
    Flag,
}

/// One named parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Param {
    pub name: &'static str,
    pub kind: ParamKind,
    pub required: bool,
}

impl Param {
    pub const fn required(name: &'static str, kind: ParamKind) -> Self {
        Self { name, kind, required: true }
    }

    pub const fn optional(name: &'static str, kind: ParamKind) -> Self {
        Self { name, kind, required: false }
    }
}

/// Accepted argument names of a primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signature {
    Fixed(&'static [Param]),
    /// Every argument name is a register, every value an operand.
    RegisterMap,
}

impl Signature {
    /// Check argument names: no unknown ones, no missing required ones.
    pub fn check(&self, target: &Target, args: &Args) -> ShellResult<()> {
        let arch = target.arch;
        match self {
            Signature::Fixed(params) => {
                if let Some(key) = args.keys().find(|key| params.iter().all(|p| p.name != *key)) {
                    return Err(ShellcraftError::arity(arch, format!("unexpected argument `{key}`")));
                }
                if let Some(param) = params.iter().find(|p| p.required && !args.contains(p.name)) {
                    return Err(ShellcraftError::arity(arch, format!("missing argument `{}`", param.name)));
                }
                Ok(())
            }
            Signature::RegisterMap => {
                for key in args.keys() {
                    if target.registers.lookup(key).is_none() {
                        return Err(ShellcraftError::arity(arch, format!("`{key}` is not a register on {arch}")));
                    }
                }
                Ok(())
            }
        }
    }

    /// Short usage string, e.g. `dst=<register> src=<operand>`.
    pub fn usage(&self) -> String {
        match self {
            Signature::Fixed(params) => params
                .iter()
                .map(|p| {
                    let kind = format!("{:?}", p.kind).to_ascii_lowercase();
                    if p.required {
                        format!("{}=<{kind}>", p.name)
                    } else {
                        format!("[{}=<{kind}>]", p.name)
                    }
                })
                .collect::<Vec<_>>()
                .join(" "),
            Signature::RegisterMap => "<register>=<operand> ...".to_string(),
        }
    }
}

/// What a primitive generates against.
#[derive(Clone, Copy)]
pub struct Context<'a> {
    pub target: &'static Target,
    pub syscalls: &'a dyn SyscallTable,
}

impl<'a> Context<'a> {
    pub fn new(target: &'static Target, syscalls: &'a dyn SyscallTable) -> Self {
        Self { target, syscalls }
    }
}

impl std::fmt::Debug for Context<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context").field("arch", &self.target.arch).finish()
    }
}

/// A named fragment generator.
pub trait Primitive: Sync {
    fn name(&self) -> &'static str;

    /// One-line description for listings.
    fn summary(&self) -> &'static str;

    fn signature(&self) -> Signature;

    /// Generate a fragment from arguments whose names already passed
    /// [`Signature::check`].
    fn generate(&self, ctx: &Context<'_>, args: &Args) -> ShellResult<Fragment>;
}

/// Every primitive, in listing order.
pub static CATALOG: &[&dyn Primitive] = &[
    &registers::Mov,
    &registers::SetRegs,
    &registers::Xchg,
    &stack::Push,
    &stack::PushStr,
    &stack::PushStrArray,
    &syscall::Syscall,
    &control::Nop,
    &control::Trap,
    &control::InfLoop,
    &control::Ret,
    &control::Raw,
    &linux::Exit,
    &linux::Echo,
    &linux::Sh,
];

/// Look a primitive up by name.
pub fn find(name: &str) -> ShellResult<&'static dyn Primitive> {
    CATALOG
        .iter()
        .copied()
        .find(|p| p.name().eq_ignore_ascii_case(name.trim()))
        .ok_or_else(|| ShellcraftError::UnknownPrimitive { name: name.to_string() })
}

/// Validate `args` against primitive `name` and generate its fragment.
pub fn invoke(ctx: &Context<'_>, name: &str, args: &Args) -> ShellResult<Fragment> {
    let primitive = find(name)?;
    log::debug!("invoking {} on {} with {} args", primitive.name(), ctx.target.arch, args.len());
    primitive
        .signature()
        .check(ctx.target, args)
        .and_then(|()| primitive.generate(ctx, args))
        .map_err(|err| err.in_primitive(primitive.name()))
}

/// Fetch a required argument converted by `get`.
pub(crate) fn required<T>(
    ctx: &Context<'_>,
    key: &str,
    get: impl FnOnce() -> ShellResult<Option<T>>,
) -> ShellResult<T> {
    get()?.ok_or_else(|| ShellcraftError::arity(ctx.target.arch, format!("missing argument `{key}`")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::arch::Arch;
    use crate::syscalls::LINUX;

    fn ctx(arch: Arch) -> Context<'static> {
        Context::new(arch.target(), &LINUX)
    }

    #[test]
    fn test_catalog_names_are_unique() {
        for (i, p) in CATALOG.iter().enumerate() {
            assert!(CATALOG[i + 1..].iter().all(|q| q.name() != p.name()), "{}", p.name());
            assert!(!p.summary().is_empty());
        }
    }

    #[test]
    fn test_unknown_primitive() {
        let err = invoke(&ctx(Arch::Amd64), "frobnicate", &Args::new()).unwrap_err();
        assert_eq!(err, ShellcraftError::UnknownPrimitive { name: "frobnicate".into() });
    }

    #[test]
    fn test_arity_is_checked_before_generation() {
        let err = invoke(&ctx(Arch::Amd64), "mov", &Args::new().with("dst", "rax")).unwrap_err();
        assert!(matches!(err, ShellcraftError::ArityError { primitive: Some("mov"), .. }), "{err}");

        let args = Args::new().with("dst", "rax").with("src", 1).with("bogus", 2);
        let err = invoke(&ctx(Arch::Amd64), "mov", &args).unwrap_err();
        assert!(err.to_string().contains("unexpected argument `bogus`"), "{err}");

        let err = invoke(&ctx(Arch::Amd64), "setregs", &Args::new().with("r0", 1)).unwrap_err();
        assert!(matches!(err, ShellcraftError::ArityError { .. }));
    }

    #[test]
    fn test_usage_strings() {
        assert_eq!(find("mov").unwrap().signature().usage(), "dst=<register> src=<operand>");
        assert_eq!(find("SETREGS").unwrap().signature().usage(), "<register>=<operand> ...");
    }
}
