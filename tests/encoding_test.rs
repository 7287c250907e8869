//! In-process x86 encoding and ELF object output.

use object::{Object, ObjectSection, ObjectSymbol};
use shellcraft::{Arch, Args, Program, ShellcraftError};

#[test]
fn i386_exit_bytes() {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut program = Program::new(Arch::I386);
    program.invoke("exit", &Args::new()).unwrap();
    // mov eax, 1; xor ebx, ebx; int 0x80
    assert_eq!(
        program.assemble(0).unwrap(),
        vec![0xb8, 0x01, 0x00, 0x00, 0x00, 0x31, 0xdb, 0xcd, 0x80]
    );
}

#[test]
fn amd64_sh_carries_the_path() {
    let mut program = Program::new(Arch::Amd64);
    program.invoke("sh", &Args::new()).unwrap();
    let code = program.assemble(0x40_0000).unwrap();
    assert!(code.windows(8).any(|w| w == b"/bin///s"), "{code:02x?}");
    assert_eq!(&code[code.len() - 2..], &[0x0f, 0x05]);
}

#[test]
fn composed_program_encodes_in_order() {
    let mut program = Program::new(Arch::Amd64);
    program
        .invoke("trap", &Args::new())
        .unwrap()
        .invoke("nop", &Args::new().with("count", 2))
        .unwrap()
        .invoke("raw", &Args::new().with("bytes", "\\xc3"))
        .unwrap()
        .invoke("infloop", &Args::new())
        .unwrap();
    assert_eq!(program.assemble(0).unwrap(), vec![0xcc, 0x90, 0x90, 0xc3, 0xeb, 0xfe]);
}

#[test]
fn elf_object_holds_the_code() {
    let mut program = Program::new(Arch::I386);
    program.invoke("sh", &Args::new()).unwrap();
    let code = program.assemble(0).unwrap();
    let bytes = program.to_elf().unwrap();

    let file = object::File::parse(&*bytes).unwrap();
    assert_eq!(file.architecture(), object::Architecture::I386);
    assert!(!file.is_64());
    let text = file.section_by_name(".text").unwrap();
    assert_eq!(text.data().unwrap(), code.as_slice());
    let symbol = file.symbol_by_name("shellcode").unwrap();
    assert_eq!(symbol.size(), code.len() as u64);
    assert!(symbol.is_global());
}

#[test]
fn other_families_need_an_external_assembler() {
    for arch in [Arch::Arm, Arch::Aarch64, Arch::Riscv64] {
        let mut program = Program::new(arch);
        program.invoke("exit", &Args::new()).unwrap();
        assert!(matches!(program.assemble(0), Err(ShellcraftError::Encoding { .. })), "{arch}");
        assert!(matches!(program.to_elf(), Err(ShellcraftError::Encoding { .. })), "{arch}");
    }
}

#[test]
fn high_byte_swap_encodes_without_rex() {
    let mut program = Program::new(Arch::Amd64);
    program
        .invoke("setregs", &Args::new().with("al", "bh").with("bh", "al"))
        .unwrap();
    let asm = program.to_asm();
    assert!(asm.contains("mov bh, cl"), "{asm}");
    assert!(!asm.contains("r11b"), "{asm}");
    // mov rcx, rax; mov al, bh; mov bh, cl
    assert_eq!(
        program.assemble(0).unwrap(),
        vec![0x48, 0x89, 0xc1, 0x88, 0xf8, 0x88, 0xcf]
    );
}
