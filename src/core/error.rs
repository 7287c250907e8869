// This module defines error types for shellcraft using the thiserror crate for idiomatic
// Rust error handling. ShellcraftError is the main error enum covering every failure a
// fragment generation can hit: malformed or out-of-range operands, wrong argument counts,
// cyclic register assignments that cannot be broken on the target, unknown syscall names,
// unknown primitives or architectures, in-process encoding failures and unreadable
// binaries handed to the gadget finder. Each variant
// carries the architecture, the primitive and the offending argument so that a caller can
// fix the invocation. The module also provides ShellResult<T> as a convenience type alias
// for Result<T, ShellcraftError>. None of these errors are transient: generation is pure,
// so an error always means the invocation or the architecture table is wrong.

//! Error types for shellcraft.
//!
//! Using thiserror for more idiomatic error handling.

use thiserror::Error;

use super::arch::Arch;

/// Main error type for fragment generation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShellcraftError {
    #[error("{}invalid operand `{argument}` on {arch}: {reason}", context(.primitive))]
    InvalidOperand {
        arch: Arch,
        primitive: Option<&'static str>,
        argument: String,
        reason: String,
    },

    #[error("{}wrong arguments on {arch}: {reason}", context(.primitive))]
    ArityError {
        arch: Arch,
        primitive: Option<&'static str>,
        reason: String,
    },

    #[error("cannot resolve cyclic assignment of {} on {arch}: no exchange instruction and no spare register", .registers.join(", "))]
    UnresolvableAssignment {
        arch: Arch,
        registers: Vec<String>,
    },

    #[error("unknown syscall `{name}` on {arch}")]
    UnknownSyscall {
        arch: Arch,
        name: String,
    },

    #[error("unknown primitive `{name}`")]
    UnknownPrimitive {
        name: String,
    },

    #[error("unknown architecture `{name}`")]
    UnknownArch {
        name: String,
    },

    #[error("encoding failed on {arch}: {reason}")]
    Encoding {
        arch: Arch,
        reason: String,
    },

    #[error("gadget search failed: {reason}")]
    Gadgets {
        reason: String,
    },
}

fn context(primitive: &Option<&'static str>) -> String {
    match primitive {
        Some(name) => format!("{name}: "),
        None => String::new(),
    }
}

impl ShellcraftError {
    /// Build an [`ShellcraftError::InvalidOperand`] without primitive context.
    pub fn invalid_operand(arch: Arch, argument: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidOperand {
            arch,
            primitive: None,
            argument: argument.into(),
            reason: reason.into(),
        }
    }

    /// Build an [`ShellcraftError::ArityError`] without primitive context.
    pub fn arity(arch: Arch, reason: impl Into<String>) -> Self {
        Self::ArityError {
            arch,
            primitive: None,
            reason: reason.into(),
        }
    }

    /// Attach the name of the primitive being generated, unless a nested
    /// primitive already claimed the error.
    pub fn in_primitive(self, name: &'static str) -> Self {
        match self {
            Self::InvalidOperand { arch, primitive: None, argument, reason } => Self::InvalidOperand {
                arch,
                primitive: Some(name),
                argument,
                reason,
            },
            Self::ArityError { arch, primitive: None, reason } => Self::ArityError {
                arch,
                primitive: Some(name),
                reason,
            },
            other => other,
        }
    }
}

/// Result type alias for generation operations.
pub type ShellResult<T> = Result<T, ShellcraftError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primitive_context_in_message() {
        let err = ShellcraftError::invalid_operand(Arch::Amd64, "rzz", "unknown register");
        assert_eq!(err.to_string(), "invalid operand `rzz` on amd64: unknown register");

        let err = err.in_primitive("mov");
        assert_eq!(err.to_string(), "mov: invalid operand `rzz` on amd64: unknown register");
    }

    #[test]
    fn test_inner_primitive_wins() {
        let err = ShellcraftError::arity(Arch::Arm, "missing `name`")
            .in_primitive("syscall")
            .in_primitive("exit");
        assert!(matches!(err, ShellcraftError::ArityError { primitive: Some("syscall"), .. }));
    }

    #[test]
    fn test_unresolvable_lists_registers() {
        let err = ShellcraftError::UnresolvableAssignment {
            arch: Arch::Riscv64,
            registers: vec!["a0".into(), "a1".into()],
        };
        assert!(err.to_string().contains("a0, a1"));
    }
}
