// This module holds the named arguments of a primitive invocation. Arguments arrive either
// from library callers, who can hand over typed values (integers, byte strings, operands that
// were already built against a register file), or from the command line as `key=value` text.
// Args keeps them in insertion order and the typed accessors convert lazily, at the point a
// primitive asks for a register, an operand, an integer, a byte string, a symbol or a list of
// strings, so a value is validated against the architecture the primitive is generating for.
// Text byte strings understand the usual escapes (\n, \t, \\, \0, \xNN). Every conversion
// failure is an InvalidOperand naming the key and the offending text.

//! Named primitive arguments.

use std::fmt;

use super::arch::Arch;
use super::error::{ShellResult, ShellcraftError};
use super::operand::{parse_int, Operand};
use super::register_file::Register;

/// One argument value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgValue {
    Int(i128),
    /// Unparsed text, as given on a command line.
    Text(String),
    Bytes(Vec<u8>),
    List(Vec<ArgValue>),
    Operand(Operand),
}

macro_rules! int_arg {
    ($($ty:ty),*) => {
        $(impl From<$ty> for ArgValue {
            fn from(value: $ty) -> Self {
                ArgValue::Int(value as i128)
            }
        })*
    };
}

int_arg!(i32, i64, u32, u64, usize, i128);

impl From<&str> for ArgValue {
    fn from(text: &str) -> Self {
        ArgValue::Text(text.to_string())
    }
}

impl From<String> for ArgValue {
    fn from(text: String) -> Self {
        ArgValue::Text(text)
    }
}

impl From<&[u8]> for ArgValue {
    fn from(bytes: &[u8]) -> Self {
        ArgValue::Bytes(bytes.to_vec())
    }
}

impl From<Vec<u8>> for ArgValue {
    fn from(bytes: Vec<u8>) -> Self {
        ArgValue::Bytes(bytes)
    }
}

impl From<Operand> for ArgValue {
    fn from(op: Operand) -> Self {
        ArgValue::Operand(op)
    }
}

impl From<Register> for ArgValue {
    fn from(reg: Register) -> Self {
        ArgValue::Operand(Operand::Register(reg))
    }
}

impl From<Vec<&str>> for ArgValue {
    fn from(items: Vec<&str>) -> Self {
        ArgValue::List(items.into_iter().map(ArgValue::from).collect())
    }
}

impl From<Vec<String>> for ArgValue {
    fn from(items: Vec<String>) -> Self {
        ArgValue::List(items.into_iter().map(ArgValue::Text).collect())
    }
}

impl fmt::Display for ArgValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgValue::Int(value) => write!(f, "{value}"),
            ArgValue::Text(text) => f.write_str(text),
            ArgValue::Bytes(bytes) => write!(f, "{}", escape(bytes)),
            ArgValue::List(items) => {
                let items = items.iter().map(ToString::to_string).collect::<Vec<_>>();
                f.write_str(&items.join(","))
            }
            ArgValue::Operand(op) => write!(f, "{op}"),
        }
    }
}

/// Ordered named arguments of one invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Args {
    entries: Vec<(String, ArgValue)>,
}

impl Args {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`Args::insert`].
    pub fn with(mut self, key: &str, value: impl Into<ArgValue>) -> Self {
        self.insert(key, value);
        self
    }

    /// Set `key`, replacing an earlier value.
    pub fn insert(&mut self, key: &str, value: impl Into<ArgValue>) -> &mut Self {
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key.to_string(), value)),
        }
        self
    }

    /// Parse `key=value` tokens. A repeated key or a token without `=` is an
    /// `ArityError`.
    pub fn parse<I, S>(arch: Arch, tokens: I) -> ShellResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut args = Args::new();
        for token in tokens {
            let token = token.as_ref();
            let Some((key, value)) = token.split_once('=') else {
                return Err(ShellcraftError::arity(arch, format!("expected key=value, got `{token}`")));
            };
            let key = key.trim();
            if key.is_empty() {
                return Err(ShellcraftError::arity(arch, format!("empty argument name in `{token}`")));
            }
            if args.contains(key) {
                return Err(ShellcraftError::arity(arch, format!("argument `{key}` given twice")));
            }
            args.insert(key, value);
        }
        Ok(args)
    }

    pub fn get(&self, key: &str) -> Option<&ArgValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ArgValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Argument `key` as an operand of `arch`.
    pub fn operand(&self, arch: Arch, key: &str) -> ShellResult<Option<Operand>> {
        self.get(key).map(|value| value.to_operand(arch, key)).transpose()
    }

    /// Argument `key` as a register of `arch`.
    pub fn register(&self, arch: Arch, key: &str) -> ShellResult<Option<Register>> {
        self.get(key).map(|value| value.to_register(arch, key)).transpose()
    }

    /// Argument `key` as an integer.
    pub fn integer(&self, arch: Arch, key: &str) -> ShellResult<Option<i128>> {
        self.get(key).map(|value| value.to_integer(arch, key)).transpose()
    }

    /// Argument `key` as a byte string; text is unescaped.
    pub fn bytes(&self, arch: Arch, key: &str) -> ShellResult<Option<Vec<u8>>> {
        self.get(key).map(|value| value.to_bytes(arch, key)).transpose()
    }

    /// Argument `key` as a bare symbol (a name, or a number in text form).
    pub fn symbol(&self, arch: Arch, key: &str) -> ShellResult<Option<String>> {
        self.get(key)
            .map(|value| match value {
                ArgValue::Text(text) if !text.trim().is_empty() => Ok(text.trim().to_string()),
                ArgValue::Int(value) => Ok(value.to_string()),
                other => Err(mismatch(arch, key, other, "expected a name")),
            })
            .transpose()
    }

    /// Argument `key` as a boolean flag (`true`/`false`, `yes`/`no`, `1`/`0`).
    pub fn flag(&self, arch: Arch, key: &str) -> ShellResult<Option<bool>> {
        self.get(key)
            .map(|value| match value {
                ArgValue::Int(0) => Ok(false),
                ArgValue::Int(1) => Ok(true),
                ArgValue::Text(text) => match text.trim().to_ascii_lowercase().as_str() {
                    "true" | "yes" | "1" => Ok(true),
                    "false" | "no" | "0" => Ok(false),
                    _ => Err(mismatch(arch, key, value, "expected true or false")),
                },
                other => Err(mismatch(arch, key, other, "expected true or false")),
            })
            .transpose()
    }

    /// Argument `key` as a list of byte strings. Text is split on commas.
    pub fn strings(&self, arch: Arch, key: &str) -> ShellResult<Option<Vec<Vec<u8>>>> {
        self.get(key)
            .map(|value| match value {
                ArgValue::List(items) => items.iter().map(|item| item.to_bytes(arch, key)).collect(),
                ArgValue::Text(text) if text.is_empty() => Ok(Vec::new()),
                ArgValue::Text(text) => text.split(',').map(|part| unescape(arch, key, part)).collect(),
                ArgValue::Bytes(bytes) => Ok(vec![bytes.clone()]),
                other => Err(mismatch(arch, key, other, "expected a list of strings")),
            })
            .transpose()
    }
}

impl ArgValue {
    fn to_operand(&self, arch: Arch, key: &str) -> ShellResult<Operand> {
        let op = match self {
            ArgValue::Int(value) => Operand::imm(arch, *value),
            ArgValue::Text(text) => Operand::parse(arch, text),
            ArgValue::Operand(op) => op.check_arch(arch).map(|()| *op),
            other => return Err(mismatch(arch, key, other, "expected a register, integer or memory reference")),
        };
        op.map_err(|err| with_key(err, key))
    }

    fn to_register(&self, arch: Arch, key: &str) -> ShellResult<Register> {
        match self.to_operand(arch, key)? {
            Operand::Register(reg) => Ok(reg),
            _ => Err(mismatch(arch, key, self, "expected a register")),
        }
    }

    fn to_integer(&self, arch: Arch, key: &str) -> ShellResult<i128> {
        match self {
            ArgValue::Int(value) => Ok(*value),
            ArgValue::Text(text) => parse_int(text).ok_or_else(|| mismatch(arch, key, self, "expected an integer")),
            other => Err(mismatch(arch, key, other, "expected an integer")),
        }
    }

    fn to_bytes(&self, arch: Arch, key: &str) -> ShellResult<Vec<u8>> {
        match self {
            ArgValue::Bytes(bytes) => Ok(bytes.clone()),
            ArgValue::Text(text) => unescape(arch, key, text),
            other => Err(mismatch(arch, key, other, "expected a string")),
        }
    }
}

fn mismatch(arch: Arch, key: &str, value: &ArgValue, reason: &str) -> ShellcraftError {
    ShellcraftError::invalid_operand(arch, format!("{key}={value}"), reason)
}

fn with_key(err: ShellcraftError, key: &str) -> ShellcraftError {
    match err {
        ShellcraftError::InvalidOperand { arch, primitive, argument, reason } => ShellcraftError::InvalidOperand {
            arch,
            primitive,
            argument: format!("{key}={argument}"),
            reason,
        },
        other => other,
    }
}

/// Decode `\n`, `\t`, `\r`, `\0`, `\\` and `\xNN` escapes.
pub fn unescape(arch: Arch, key: &str, text: &str) -> ShellResult<Vec<u8>> {
    let bad = |reason: &str| ShellcraftError::invalid_operand(arch, format!("{key}={text}"), reason);
    let mut out = Vec::with_capacity(text.len());
    let mut bytes = text.bytes();
    while let Some(b) = bytes.next() {
        if b != b'\\' {
            out.push(b);
            continue;
        }
        match bytes.next() {
            Some(b'n') => out.push(b'\n'),
            Some(b't') => out.push(b'\t'),
            Some(b'r') => out.push(b'\r'),
            Some(b'0') => out.push(0),
            Some(b'\\') => out.push(b'\\'),
            Some(b'x') => {
                let hex = [bytes.next(), bytes.next()];
                let [Some(hi), Some(lo)] = hex else {
                    return Err(bad("truncated \\x escape"));
                };
                let digits = [hi, lo];
                let digits = std::str::from_utf8(&digits).map_err(|_| bad("bad \\x escape"))?;
                out.push(u8::from_str_radix(digits, 16).map_err(|_| bad("bad \\x escape"))?);
            }
            Some(other) => return Err(bad(&format!("unknown escape \\{}", other as char))),
            None => return Err(bad("trailing backslash")),
        }
    }
    Ok(out)
}

/// Inverse of [`unescape`] for display.
pub fn escape(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    for &b in bytes {
        match b {
            b'\n' => out.push_str("\\n"),
            b'\t' => out.push_str("\\t"),
            b'\r' => out.push_str("\\r"),
            b'\\' => out.push_str("\\\\"),
            0x20..=0x7e => out.push(b as char),
            _ => out.push_str(&format!("\\x{b:02x}")),
        }
    }
    out
}
