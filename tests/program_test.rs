//! End-to-end composition through `Program`.

use shellcraft::{Arch, Args, Fragment, Program, ShellcraftError, Target, CATALOG};

fn lines(target: &Target, fragment: &Fragment) -> Vec<String> {
    fragment
        .instructions()
        .map(|insn| target.lowering.render(target, insn))
        .collect()
}

#[test]
fn setregs_then_write_syscall() {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut program = Program::new(Arch::Amd64);
    program
        .invoke("setregs", &Args::new().with("rax", 0).with("rdi", 1).with("rsi", "rsp"))
        .unwrap();
    let target = program.target();
    assert_eq!(
        lines(target, &program.fragments()[0]),
        vec!["xor rax, rax", "mov rdi, 1", "mov rsi, rsp"]
    );

    program
        .invoke(
            "syscall",
            &Args::new().with("name", "write").with("arg0", 1).with("arg1", "rsp").with("arg2", 8),
        )
        .unwrap();
    let body = lines(target, &program.fragments()[1]);
    assert_eq!(body.iter().filter(|l| *l == "syscall").count(), 1);
    assert_eq!(body.last().map(String::as_str), Some("syscall"));
    let number = body.iter().position(|l| l.starts_with("mov rax")).unwrap();
    assert!(number < body.len() - 1);
    assert_eq!(program.len(), 2);
}

#[test]
fn unknown_syscall_leaves_program_unchanged() {
    let mut program = Program::new(Arch::Riscv64);
    program.invoke("trap", &Args::new()).unwrap();
    let before = program.to_asm();

    let err = program
        .invoke("syscall", &Args::new().with("name", "frobnicate"))
        .unwrap_err();
    assert!(matches!(err, ShellcraftError::UnknownSyscall { arch: Arch::Riscv64, .. }));
    assert_eq!(program.len(), 1);
    assert_eq!(program.to_asm(), before);
}

/// Arguments exercising every catalog entry on `arch`.
fn sample_args(arch: Arch, name: &str) -> Args {
    let target = arch.target();
    let regs = target.syscall.args;
    match name {
        "mov" => Args::new().with("dst", regs[0]).with("src", 2),
        "setregs" => Args::new().with(regs[0], regs[1]).with(regs[1], 5),
        "xchg" => Args::new().with("a", regs[0]).with("b", regs[1]),
        "push" => Args::new().with("value", 1),
        "pushstr" => Args::new().with("string", "abc"),
        "pushstr_array" => Args::new().with("reg", regs[1]).with("array", vec!["sh", "-c"]),
        "syscall" => Args::new().with("name", "getpid"),
        "nop" => Args::new().with("count", 2),
        "ret" => Args::new().with("value", 0),
        "raw" => Args::new().with("bytes", vec![0x00u8, 0x01]),
        "echo" => Args::new().with("string", "hi\n"),
        _ => Args::new(),
    }
}

#[test]
fn every_primitive_runs_on_every_arch() {
    let _ = env_logger::builder().is_test(true).try_init();
    for arch in Arch::ALL {
        let mut program = Program::new(arch);
        for primitive in CATALOG {
            let args = sample_args(arch, primitive.name());
            if let Err(e) = program.invoke(primitive.name(), &args) {
                panic!("{arch}: {} failed: {e}", primitive.name());
            }
        }
        assert_eq!(program.len(), CATALOG.len());
        let asm = program.to_asm();
        for primitive in CATALOG {
            assert!(asm.contains(&format!("/* {} */", primitive.name())), "{arch}\n{asm}");
        }
        assert!(asm.contains("    .byte 0x00, 0x01"), "{arch}\n{asm}");
        let sp = arch.target().stack_pointer().unwrap();
        assert!(program.clobbers().contains(&sp), "{arch}");
    }
}

#[test]
fn failed_arguments_name_the_primitive() {
    let mut program = Program::new(Arch::Aarch64);
    let err = program
        .invoke("mov", &Args::new().with("dst", "x0"))
        .unwrap_err();
    assert!(matches!(err, ShellcraftError::ArityError { primitive: Some("mov"), .. }));

    let err = program
        .invoke("push", &Args::new().with("value", "rax"))
        .unwrap_err();
    assert!(matches!(err, ShellcraftError::InvalidOperand { .. }), "{err}");
    assert!(program.is_empty());
}

#[test]
fn unknown_names_are_rejected() {
    let mut program = Program::new(Arch::Arm);
    assert!(matches!(
        program.invoke("frobnicate", &Args::new()),
        Err(ShellcraftError::UnknownPrimitive { .. })
    ));
    assert!(matches!(
        "vax".parse::<Arch>(),
        Err(ShellcraftError::UnknownArch { .. })
    ));
}
