// This module turns x86 fragments into machine code in-process using the iced-x86 code
// assembler, so that amd64 and i386 shellcode can be produced as raw bytes or wrapped in an
// ELF object without an external toolchain. X86Encoder walks the items of one or more
// fragments: instructions are matched on mnemonic and operand shape and handed to the
// matching CodeAssembler method, label definitions and references follow GAS numeric label
// rules (`1b` is the closest preceding `1:`, `1f` the next following one), and data items are
// emitted verbatim with `db`. Only the instruction shapes the x86 lowering produces are
// supported; anything else is reported as an encoding error rather than silently dropped.

//! x86 machine code encoding using iced-x86.

use hashbrown::HashMap;
use iced_x86::code_asm::*;

use crate::core::arch::{Arch, Family};
use crate::core::error::{ShellResult, ShellcraftError};
use crate::core::fragment::{Fragment, InsnOperand, Instruction, Item, LabelRef};
use crate::core::operand::{Immediate, MemoryRef, Operand};
use crate::core::register_file::Register;

/// A general-purpose register at its encoded width.
#[derive(Debug, Clone, Copy)]
enum Gp {
    R64(AsmRegister64),
    R32(AsmRegister32),
    R16(AsmRegister16),
    R8(AsmRegister8),
}

const GP64_REGS: [AsmRegister64; 16] = [
    rax, rcx, rdx, rbx, rsp, rbp, rsi, rdi, r8, r9, r10, r11, r12, r13, r14, r15,
];

const GP32_REGS: [AsmRegister32; 16] = [
    eax, ecx, edx, ebx, esp, ebp, esi, edi, r8d, r9d, r10d, r11d, r12d, r13d, r14d, r15d,
];

const GP16_REGS: [AsmRegister16; 16] = [
    ax, cx, dx, bx, sp, bp, si, di, r8w, r9w, r10w, r11w, r12w, r13w, r14w, r15w,
];

const GP8_REGS: [AsmRegister8; 16] = [
    al, cl, dl, bl, spl, bpl, sil, dil, r8b, r9b, r10b, r11b, r12b, r13b, r14b, r15b,
];

const GP8_HIGH_REGS: [AsmRegister8; 4] = [ah, ch, dh, bh];

/// Register-register forms that exist at every width.
macro_rules! reg_reg {
    ($encoder:expr, $method:ident, $dst:expr, $src:expr) => {{
        let result = match ($dst, $src) {
            (Gp::R64(d), Gp::R64(s)) => $encoder.assembler.$method(d, s),
            (Gp::R32(d), Gp::R32(s)) => $encoder.assembler.$method(d, s),
            (Gp::R16(d), Gp::R16(s)) => $encoder.assembler.$method(d, s),
            (Gp::R8(d), Gp::R8(s)) => $encoder.assembler.$method(d, s),
            _ => return Err($encoder.error(concat!(stringify!($method), " with mixed widths"))),
        };
        result.map_err(|e| $encoder.error(e.to_string()))
    }};
}

/// x86 machine code encoder for one architecture.
pub struct X86Encoder {
    arch: Arch,
    assembler: CodeAssembler,
    /// Address the code is assembled for.
    base: u64,
    /// Most recent definition of each numeric label.
    backward: HashMap<u32, CodeLabel>,
    /// Labels referenced forward but not defined yet.
    forward: HashMap<u32, CodeLabel>,
}

impl X86Encoder {
    /// Create an encoder for `arch`, assembling at address `base`.
    pub fn new(arch: Arch, base: u64) -> ShellResult<Self> {
        if arch.family() != Family::X86 {
            return Err(ShellcraftError::Encoding {
                arch,
                reason: "in-process encoding is only available for i386 and amd64".to_string(),
            });
        }
        let assembler = CodeAssembler::new(arch.bits()).map_err(|e| ShellcraftError::Encoding {
            arch,
            reason: e.to_string(),
        })?;
        Ok(Self {
            arch,
            assembler,
            base,
            backward: HashMap::new(),
            forward: HashMap::new(),
        })
    }

    fn error(&self, reason: impl Into<String>) -> ShellcraftError {
        ShellcraftError::Encoding { arch: self.arch, reason: reason.into() }
    }

    /// Convert a register of this architecture to its iced-x86 counterpart.
    fn gp(&self, reg: Register) -> ShellResult<Gp> {
        if reg.arch() != self.arch {
            return Err(self.error(format!("register {reg} belongs to {}", reg.arch())));
        }
        let id = reg.canonical().id() as usize;
        let found = match (reg.width(), reg.offset()) {
            (64, 0) => GP64_REGS.get(id).copied().map(Gp::R64),
            (32, 0) => GP32_REGS.get(id).copied().map(Gp::R32),
            (16, 0) => GP16_REGS.get(id).copied().map(Gp::R16),
            (8, 0) => GP8_REGS.get(id).copied().map(Gp::R8),
            (8, 8) => GP8_HIGH_REGS.get(id).copied().map(Gp::R8),
            _ => None,
        };
        found.ok_or_else(|| self.error(format!("cannot encode register {reg}")))
    }

    /// Address expression of `mem`, without an operand size.
    fn address(&self, mem: &MemoryRef) -> ShellResult<AsmMemoryOperand> {
        let disp = i32::try_from(mem.disp())
            .map_err(|_| self.error(format!("displacement {} out of range", mem.disp())))?;
        let base = self.gp(mem.base())?;
        let index = match mem.index() {
            Some((reg, scale)) => Some((self.gp(reg)?, scale)),
            None => None,
        };
        let operand = match (base, index) {
            (Gp::R64(b), None) => b + disp,
            (Gp::R64(b), Some((Gp::R64(i), scale))) => match scale {
                1 => b + i + disp,
                2 => b + i * 2 + disp,
                4 => b + i * 4 + disp,
                8 => b + i * 8 + disp,
                _ => return Err(self.error(format!("invalid scale {scale}"))),
            },
            (Gp::R32(b), None) => b + disp,
            (Gp::R32(b), Some((Gp::R32(i), scale))) => match scale {
                1 => b + i + disp,
                2 => b + i * 2 + disp,
                4 => b + i * 4 + disp,
                8 => b + i * 8 + disp,
                _ => return Err(self.error(format!("invalid scale {scale}"))),
            },
            _ => return Err(self.error(format!("unsupported address registers in {}", Operand::Memory(*mem)))),
        };
        Ok(operand)
    }

    /// Sized memory operand for an access of `bits` bits.
    fn memory(&self, mem: &MemoryRef, bits: u32) -> ShellResult<AsmMemoryOperand> {
        let address = self.address(mem)?;
        Ok(match bits {
            8 => byte_ptr(address),
            16 => word_ptr(address),
            32 => dword_ptr(address),
            _ => qword_ptr(address),
        })
    }

    /// Encode every item of `fragment`.
    pub fn encode_fragment(&mut self, fragment: &Fragment) -> ShellResult<()> {
        if fragment.arch() != self.arch {
            return Err(self.error(format!(
                "{} fragment built for {}",
                fragment.primitive(),
                fragment.arch()
            )));
        }
        for item in fragment.items() {
            match item {
                Item::Instruction(insn) => self.encode_instruction(insn)?,
                Item::Label(id) => self.define_label(*id)?,
                Item::Data(bytes) => self.assembler.db(bytes).map_err(|e| self.error(e.to_string()))?,
            }
        }
        Ok(())
    }

    fn define_label(&mut self, id: u32) -> ShellResult<()> {
        let mut label = match self.forward.remove(&id) {
            Some(label) => label,
            None => self.assembler.create_label(),
        };
        self.assembler
            .set_label(&mut label)
            .map_err(|e| self.error(e.to_string()))?;
        self.backward.insert(id, label);
        Ok(())
    }

    fn label(&mut self, label: LabelRef) -> ShellResult<CodeLabel> {
        if label.forward {
            let assembler = &mut self.assembler;
            return Ok(*self.forward.entry(label.id).or_insert_with(|| assembler.create_label()));
        }
        self.backward
            .get(&label.id)
            .copied()
            .ok_or_else(|| self.error(format!("label {label} is not defined")))
    }

    fn encode_instruction(&mut self, insn: &Instruction) -> ShellResult<()> {
        use InsnOperand::Value;
        use Operand::{Immediate as Imm, Memory as Mem, Register as Reg};

        log::trace!("encode {} {:?}", insn.mnemonic, insn.operands);

        match (insn.mnemonic, insn.operands.as_slice()) {
            ("mov", [Value(Reg(dst)), Value(Reg(src))]) => {
                let (d, s) = (self.gp(*dst)?, self.gp(*src)?);
                reg_reg!(self, mov, d, s)
            }
            ("mov", [Value(Reg(dst)), Value(Imm(imm))]) => self.mov_imm(*dst, *imm),
            ("mov", [Value(Reg(dst)), Value(Mem(mem))]) => {
                let m = self.memory(mem, dst.width())?;
                let result = match self.gp(*dst)? {
                    Gp::R64(d) => self.assembler.mov(d, m),
                    Gp::R32(d) => self.assembler.mov(d, m),
                    Gp::R16(d) => self.assembler.mov(d, m),
                    Gp::R8(d) => self.assembler.mov(d, m),
                };
                result.map_err(|e| self.error(e.to_string()))
            }
            ("mov", [Value(Mem(mem)), Value(Reg(src))]) => {
                let m = self.memory(mem, src.width())?;
                let result = match self.gp(*src)? {
                    Gp::R64(s) => self.assembler.mov(m, s),
                    Gp::R32(s) => self.assembler.mov(m, s),
                    Gp::R16(s) => self.assembler.mov(m, s),
                    Gp::R8(s) => self.assembler.mov(m, s),
                };
                result.map_err(|e| self.error(e.to_string()))
            }
            ("xor", [Value(Reg(dst)), Value(Reg(src))]) => {
                let (d, s) = (self.gp(*dst)?, self.gp(*src)?);
                reg_reg!(self, xor, d, s)
            }
            ("xchg", [Value(Reg(a)), Value(Reg(b))]) => {
                let (a, b) = (self.gp(*a)?, self.gp(*b)?);
                reg_reg!(self, xchg, a, b)
            }
            ("lea", [Value(Reg(dst)), Value(Mem(mem))]) => {
                let m = self.address(mem)?;
                let result = match self.gp(*dst)? {
                    Gp::R64(d) => self.assembler.lea(d, m),
                    Gp::R32(d) => self.assembler.lea(d, m),
                    _ => return Err(self.error("lea needs a word register")),
                };
                result.map_err(|e| self.error(e.to_string()))
            }
            (op @ ("add" | "sub"), [Value(Reg(dst)), Value(Imm(imm))]) => {
                let value = i32::try_from(imm.value())
                    .map_err(|_| self.error(format!("{op} immediate {} out of range", imm.value())))?;
                let result = match (op, self.gp(*dst)?) {
                    ("add", Gp::R64(d)) => self.assembler.add(d, value),
                    ("add", Gp::R32(d)) => self.assembler.add(d, value),
                    ("sub", Gp::R64(d)) => self.assembler.sub(d, value),
                    ("sub", Gp::R32(d)) => self.assembler.sub(d, value),
                    _ => return Err(self.error(format!("{op} needs a word register"))),
                };
                result.map_err(|e| self.error(e.to_string()))
            }
            ("push", [Value(Reg(src))]) => {
                let result = match self.gp(*src)? {
                    Gp::R64(s) => self.assembler.push(s),
                    Gp::R32(s) => self.assembler.push(s),
                    _ => return Err(self.error("push needs a word register")),
                };
                result.map_err(|e| self.error(e.to_string()))
            }
            ("push", [Value(Imm(imm))]) => {
                let value = i32::try_from(imm.as_signed(32))
                    .map_err(|_| self.error("push immediate out of range"))?;
                self.assembler.push(value).map_err(|e| self.error(e.to_string()))
            }
            ("push", [Value(Mem(mem))]) => {
                let m = self.memory(mem, self.arch.bits())?;
                self.assembler.push(m).map_err(|e| self.error(e.to_string()))
            }
            ("int", [Value(Imm(imm))]) => {
                let vector = i32::try_from(imm.value())
                    .map_err(|_| self.error("interrupt vector out of range"))?;
                self.assembler.int(vector).map_err(|e| self.error(e.to_string()))
            }
            ("jmp", [InsnOperand::Label(label)]) => {
                let target = self.label(*label)?;
                self.assembler.jmp(target).map_err(|e| self.error(e.to_string()))
            }
            ("syscall", []) => self.assembler.syscall().map_err(|e| self.error(e.to_string())),
            ("int3", []) => self.assembler.int3().map_err(|e| self.error(e.to_string())),
            ("nop", []) => self.assembler.nop().map_err(|e| self.error(e.to_string())),
            ("ret", []) => self.assembler.ret().map_err(|e| self.error(e.to_string())),
            _ => Err(self.error(format!(
                "unsupported instruction `{}` with {} operand(s)",
                insn.mnemonic,
                insn.operands.len()
            ))),
        }
    }

    fn mov_imm(&mut self, dst: Register, imm: Immediate) -> ShellResult<()> {
        let result = match self.gp(dst)? {
            Gp::R64(d) => self.assembler.mov(d, imm.as_signed(64) as i64),
            Gp::R32(d) => self.assembler.mov(d, imm.as_signed(32) as i32),
            Gp::R16(d) => self.assembler.mov(d, imm.as_signed(16) as i32),
            Gp::R8(d) => self.assembler.mov(d, imm.as_signed(8) as i32),
        };
        result.map_err(|e| self.error(e.to_string()))
    }

    /// Generate the final machine code bytes.
    pub fn finalize(&mut self) -> ShellResult<Vec<u8>> {
        if let Some(id) = self.forward.keys().min() {
            return Err(self.error(format!("label {id}f is never defined")));
        }
        let bytes = self
            .assembler
            .assemble(self.base)
            .map_err(|e| self.error(e.to_string()))?;
        log::debug!("encoded {} bytes for {} at {:#x}", bytes.len(), self.arch, self.base);
        Ok(bytes)
    }
}

/// Encode `fragments` in order for `arch`, assembled at address `base`.
pub fn encode(arch: Arch, fragments: &[Fragment], base: u64) -> ShellResult<Vec<u8>> {
    let mut encoder = X86Encoder::new(arch, base)?;
    for fragment in fragments {
        encoder.encode_fragment(fragment)?;
    }
    encoder.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fragment::FragmentBuilder;

    fn amd64(name: &str) -> Register {
        Arch::Amd64.target().register(name).unwrap()
    }

    #[test]
    fn test_basic_instructions() {
        let target = Arch::Amd64.target();
        let lowering = target.lowering;
        let mut builder = FragmentBuilder::new("test", Arch::Amd64);
        builder
            .emit(lowering.load(target, amd64("rax"), &Operand::Register(amd64("rcx"))).unwrap())
            .emit(lowering.load(target, amd64("edi"), &Operand::imm(Arch::Amd64, 0).unwrap()).unwrap())
            .emit(lowering.syscall_trap(target));
        let code = encode(Arch::Amd64, &[builder.finish()], 0).unwrap();
        // mov rax, rcx; xor edi, edi; syscall
        assert_eq!(code, vec![0x48, 0x89, 0xc8, 0x31, 0xff, 0x0f, 0x05]);
    }

    #[test]
    fn test_backward_label() {
        let target = Arch::Amd64.target();
        let mut builder = FragmentBuilder::new("infloop", Arch::Amd64);
        builder.label(1).emit(target.lowering.jump(LabelRef::backward(1)));
        let code = encode(Arch::Amd64, &[builder.finish()], 0x1000).unwrap();
        assert_eq!(code, vec![0xeb, 0xfe]);
    }

    #[test]
    fn test_undefined_labels() {
        let target = Arch::Amd64.target();
        let mut builder = FragmentBuilder::new("test", Arch::Amd64);
        builder.emit(target.lowering.jump(LabelRef::backward(3)));
        assert!(matches!(
            encode(Arch::Amd64, &[builder.finish()], 0),
            Err(ShellcraftError::Encoding { .. })
        ));

        let mut builder = FragmentBuilder::new("test", Arch::Amd64);
        builder.emit(target.lowering.jump(LabelRef::forward(2))).emit(Instruction::bare("nop"));
        assert!(encode(Arch::Amd64, &[builder.finish()], 0).is_err());
    }

    #[test]
    fn test_i386_trap() {
        let target = Arch::I386.target();
        let mut builder = FragmentBuilder::new("trap", Arch::I386);
        builder.emit(target.lowering.syscall_trap(target));
        assert_eq!(encode(Arch::I386, &[builder.finish()], 0).unwrap(), vec![0xcd, 0x80]);
    }

    #[test]
    fn test_other_families_are_rejected() {
        assert!(matches!(
            X86Encoder::new(Arch::Aarch64, 0),
            Err(ShellcraftError::Encoding { arch: Arch::Aarch64, .. })
        ));
    }
}
