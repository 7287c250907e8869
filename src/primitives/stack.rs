// Stack primitives. `push` pushes one word. `pushstr` lays a byte string out on the stack
// so that the stack pointer ends up pointing at its first byte: the string (plus its NUL
// terminator unless told otherwise) is zero padded to a whole number of words, cut into
// little-endian words and pushed highest word first through the family's push_words, which
// is also where AArch64 keeps the stack 16-byte aligned. `pushstr_array` builds an argv
// style array: it pushes all strings as one NUL separated blob, reserves a NULL terminated
// array of word pointers below it, fills each slot with the address of its string and
// finally points the requested register at the array.

//! Stack primitives: `push`, `pushstr` and `pushstr_array`.

use crate::core::args::Args;
use crate::core::error::{ShellResult, ShellcraftError};
use crate::core::fragment::{Fragment, FragmentBuilder};
use crate::core::operand::{MemoryRef, Operand};
use crate::core::register_file::Register;
use crate::core::target::Target;

use super::{required, Context, Param, ParamKind, Primitive, Signature};

/// Push one word.
pub fn push(target: &Target, value: Operand) -> ShellResult<Fragment> {
    let mut out = FragmentBuilder::new("push", target.arch);
    target
        .lowering
        .push(target, &value, &mut out)
        .map_err(|e| e.in_primitive("push"))?;
    Ok(out.finish())
}

/// Cut `bytes` into word immediates, zero padding the last one.
fn words(target: &Target, bytes: &[u8]) -> ShellResult<Vec<Operand>> {
    let word = target.arch.word_bytes();
    bytes
        .chunks(word)
        .map(|chunk| {
            let mut raw = [0u8; 8];
            raw[..chunk.len()].copy_from_slice(chunk);
            let value = u64::from_le_bytes(raw) & (u64::MAX >> (64 - 8 * word as u32));
            target.word(i128::from(value))
        })
        .collect()
}

fn push_bytes(target: &Target, bytes: &[u8], out: &mut FragmentBuilder) -> ShellResult<()> {
    let words = words(target, bytes)?;
    if words.is_empty() {
        return Ok(());
    }
    log::trace!("{}: pushing {} bytes as {} words", target.arch, bytes.len(), words.len());
    target.lowering.push_words(target, &words, out)
}

/// Push `string` so that the stack pointer points at its first byte.
pub fn pushstr(target: &Target, string: &[u8], append_null: bool) -> ShellResult<Fragment> {
    let mut out = FragmentBuilder::new("pushstr", target.arch);
    let mut data = string.to_vec();
    if append_null {
        data.push(0);
    }
    push_bytes(target, &data, &mut out).map_err(|e| e.in_primitive("pushstr"))?;
    Ok(out.finish())
}

/// Push `strings` and a NULL terminated array of pointers to them, leaving
/// `reg` pointing at the array.
pub fn pushstr_array(target: &Target, reg: Register, strings: &[Vec<u8>]) -> ShellResult<Fragment> {
    build_array(target, reg, strings).map_err(|e| e.in_primitive("pushstr_array"))
}

fn build_array(target: &Target, reg: Register, strings: &[Vec<u8>]) -> ShellResult<Fragment> {
    let arch = target.arch;
    if reg.arch() != arch || !reg.is_canonical() {
        return Err(ShellcraftError::invalid_operand(arch, reg.name(), "expected a full-width register"));
    }
    let mut out = FragmentBuilder::new("pushstr_array", arch);
    let sp = target.stack_pointer()?;
    let tmp = target.temporary()?;
    let word = arch.word_bytes();

    let mut blob = Vec::new();
    let mut offsets = Vec::with_capacity(strings.len());
    for string in strings {
        if string.contains(&0) {
            return Err(ShellcraftError::invalid_operand(
                arch,
                crate::core::args::escape(string),
                "array strings cannot contain NUL bytes",
            ));
        }
        offsets.push(blob.len() as i64);
        blob.extend_from_slice(string);
        blob.push(0);
    }
    push_bytes(target, &blob, &mut out)?;

    let slots = strings.len() + 1;
    let reserved = (slots * word).next_multiple_of(target.stack_align.max(word)) as i64;
    out.emit(target.lowering.adjust_stack(target, -reserved)?).clobber(sp);
    for (slot, &offset) in offsets.iter().enumerate() {
        let string = MemoryRef::new(sp, reserved + offset)?;
        out.emit(target.lowering.address(target, tmp, &string)?);
        out.emit(target.lowering.store(target, tmp, &MemoryRef::new(sp, (slot * word) as i64)?)?);
    }
    out.emit(target.lowering.load(target, tmp, &target.word(0)?)?);
    out.emit(target.lowering.store(target, tmp, &MemoryRef::new(sp, (strings.len() * word) as i64)?)?);
    out.clobber(tmp);
    if !reg.overlaps(sp) {
        out.emit(target.lowering.load(target, reg, &Operand::Register(sp))?);
    }
    Ok(out.finish())
}

#[derive(Debug)]
pub struct Push;

impl Primitive for Push {
    fn name(&self) -> &'static str {
        "push"
    }

    fn summary(&self) -> &'static str {
        "push one word (immediate, register or memory)"
    }

    fn signature(&self) -> Signature {
        const PARAMS: &[Param] = &[Param::required("value", ParamKind::Operand)];
        Signature::Fixed(PARAMS)
    }

    fn generate(&self, ctx: &Context<'_>, args: &Args) -> ShellResult<Fragment> {
        let value = required(ctx, "value", || args.operand(ctx.target.arch, "value"))?;
        push(ctx.target, value)
    }
}

#[derive(Debug)]
pub struct PushStr;

impl Primitive for PushStr {
    fn name(&self) -> &'static str {
        "pushstr"
    }

    fn summary(&self) -> &'static str {
        "push a string; the stack pointer ends up pointing at it"
    }

    fn signature(&self) -> Signature {
        const PARAMS: &[Param] = &[
            Param::required("string", ParamKind::Bytes),
            Param::optional("append_null", ParamKind::Flag),
        ];
        Signature::Fixed(PARAMS)
    }

    fn generate(&self, ctx: &Context<'_>, args: &Args) -> ShellResult<Fragment> {
        let arch = ctx.target.arch;
        let string = required(ctx, "string", || args.bytes(arch, "string"))?;
        let append_null = args.flag(arch, "append_null")?.unwrap_or(true);
        pushstr(ctx.target, &string, append_null)
    }
}

#[derive(Debug)]
pub struct PushStrArray;

impl Primitive for PushStrArray {
    fn name(&self) -> &'static str {
        "pushstr_array"
    }

    fn summary(&self) -> &'static str {
        "push strings and a NULL terminated pointer array to them"
    }

    fn signature(&self) -> Signature {
        const PARAMS: &[Param] = &[
            Param::required("reg", ParamKind::Register),
            Param::required("array", ParamKind::StringList),
        ];
        Signature::Fixed(PARAMS)
    }

    fn generate(&self, ctx: &Context<'_>, args: &Args) -> ShellResult<Fragment> {
        let arch = ctx.target.arch;
        let reg = required(ctx, "reg", || args.register(arch, "reg"))?;
        let array = required(ctx, "array", || args.strings(arch, "array"))?;
        pushstr_array(ctx.target, reg, &array)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::arch::Arch;

    fn lines(target: &Target, fragment: &Fragment) -> Vec<String> {
        fragment.instructions().map(|i| target.lowering.render(target, i)).collect()
    }

    #[test]
    fn test_pushstr_amd64() {
        let target = Arch::Amd64.target();
        let fragment = pushstr(target, b"/bin///sh", true).unwrap();
        assert_eq!(
            lines(target, &fragment),
            vec!["push 0x68", "mov rax, 0x732f2f2f6e69622f", "push rax"]
        );
        let clobbers: Vec<_> = fragment.clobbers().iter().map(|r| r.name()).collect();
        assert_eq!(clobbers, vec!["rsp", "rax"]);
    }

    #[test]
    fn test_pushstr_i386_highest_word_first() {
        let target = Arch::I386.target();
        let fragment = pushstr(target, b"/bin///sh", true).unwrap();
        assert_eq!(
            lines(target, &fragment),
            vec!["push 0x68", "push 0x732f2f2f", "push 0x6e69622f"]
        );
    }

    #[test]
    fn test_pushstr_without_terminator() {
        let target = Arch::I386.target();
        let fragment = pushstr(target, b"abcd", false).unwrap();
        assert_eq!(lines(target, &fragment), vec!["push 0x64636261"]);
        assert!(pushstr(target, b"", false).unwrap().is_empty());
    }

    #[test]
    fn test_pushstr_array_amd64() {
        let target = Arch::Amd64.target();
        let rsi = target.register("rsi").unwrap();
        let fragment = pushstr_array(target, rsi, &[b"sh".to_vec(), b"-c".to_vec()]).unwrap();
        assert_eq!(
            lines(target, &fragment),
            vec![
                "mov rax, 0x632d006873",
                "push rax",
                "sub rsp, 0x18",
                "lea rax, [rsp+0x18]",
                "mov qword ptr [rsp], rax",
                "lea rax, [rsp+0x1b]",
                "mov qword ptr [rsp+0x8], rax",
                "xor rax, rax",
                "mov qword ptr [rsp+0x10], rax",
                "mov rsi, rsp",
            ]
        );
    }

    #[test]
    fn test_pushstr_array_rejects_embedded_nul() {
        let target = Arch::Riscv64.target();
        let a1 = target.register("a1").unwrap();
        assert!(pushstr_array(target, a1, &[b"a\0b".to_vec()]).is_err());
    }
}
