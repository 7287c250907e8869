//! ELF relocatable object output.
//!
//! Wraps encoded shellcode into a `.text` section with a global
//! `shellcode` function symbol covering all of it, ready to be linked or
//! inspected with the usual binutils.

use object::write::{Object, StandardSection, Symbol, SymbolSection};
use object::{Architecture, BinaryFormat, Endianness, SymbolFlags, SymbolKind, SymbolScope};

use super::arch::Arch;
use super::error::{ShellResult, ShellcraftError};

/// Name of the symbol marking the code.
pub const SYMBOL: &str = "shellcode";

fn architecture(arch: Arch) -> Architecture {
    match arch {
        Arch::I386 => Architecture::I386,
        Arch::Amd64 => Architecture::X86_64,
        Arch::Arm => Architecture::Arm,
        Arch::Aarch64 => Architecture::Aarch64,
        Arch::Riscv64 => Architecture::Riscv64,
    }
}

/// Build an ELF object holding `code`.
pub fn write_object(arch: Arch, code: &[u8]) -> ShellResult<Vec<u8>> {
    let mut obj = Object::new(BinaryFormat::Elf, architecture(arch), Endianness::Little);
    let text = obj.section_id(StandardSection::Text);
    let offset = obj.append_section_data(text, code, 16);
    obj.add_symbol(Symbol {
        name: SYMBOL.as_bytes().to_vec(),
        value: offset,
        size: code.len() as u64,
        kind: SymbolKind::Text,
        scope: SymbolScope::Linkage,
        weak: false,
        section: SymbolSection::Section(text),
        flags: SymbolFlags::None,
    });
    log::debug!("{arch}: wrote {} code bytes into an ELF object", code.len());
    obj.write().map_err(|e| ShellcraftError::Encoding { arch, reason: e.to_string() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use object::{Object as _, ObjectSection as _, ObjectSymbol as _};

    #[test]
    fn test_symbol_covers_code() {
        let code = [0x31, 0xc0, 0xc3];
        let bytes = write_object(Arch::Amd64, &code).unwrap();
        let file = object::File::parse(&*bytes).unwrap();
        assert_eq!(file.architecture(), Architecture::X86_64);
        let text = file.section_by_name(".text").unwrap();
        assert_eq!(text.data().unwrap(), &code);
        let symbol = file.symbol_by_name(SYMBOL).unwrap();
        assert_eq!(symbol.size(), 3);
        assert_eq!(symbol.address(), 0);
    }
}
