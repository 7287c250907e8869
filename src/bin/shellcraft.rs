//! shellcraft command line front end.
//!
//! ```text
//! shellcraft amd64 setregs rdi=rsi rsi=rdi then syscall name=exit arg0=0
//! shellcraft i386 sh --format hex
//! shellcraft list
//! shellcraft gadgets /bin/true --depth 6
//! ```

use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use shellcraft::gadgets::{elf_arch, DEFAULT_DEPTH};
use shellcraft::{Arch, Args, GadgetFinder, LinuxSyscalls, Program, CATALOG};

/// Word separating chained primitive invocations.
const CHAIN: &str = "then";

#[derive(Parser)]
#[command(name = "shellcraft")]
#[command(about = "Generate shellcode from composable primitives")]
#[command(version, args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Target architecture (i386, amd64, arm, aarch64, riscv64)
    arch: Option<String>,

    /// Primitive name followed by key=value arguments; chain more with `then`
    invocation: Vec<String>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = Format::Asm)]
    format: Format,

    /// Write output to a file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Load address used when encoding
    #[arg(long, default_value_t = 0)]
    base: u64,

    /// More logging (-v info, -vv debug, -vvv trace); RUST_LOG overrides
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// List the primitive catalog, and the syscall table of an architecture
    List {
        arch: Option<String>,
    },
    /// List the ret, syscall and int 0x80 gadgets of an x86 ELF binary
    Gadgets {
        path: PathBuf,

        /// Bytes decoded backwards from each terminator
        #[arg(long, default_value_t = DEFAULT_DEPTH)]
        depth: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    /// Assembly text
    Asm,
    /// Encoded bytes as hex (x86 only)
    Hex,
    /// ELF relocatable object (x86 only)
    Elf,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).try_init();
}

fn list(arch: Option<&str>) -> Result<String, Box<dyn std::error::Error>> {
    let mut out = String::new();
    for primitive in CATALOG {
        out.push_str(&format!("{:<14} {}\n", primitive.name(), primitive.signature().usage()));
        out.push_str(&format!("{:<14} {}\n", "", primitive.summary()));
    }
    if let Some(arch) = arch {
        let arch: Arch = arch.parse()?;
        out.push_str(&format!("\nsyscalls on {arch}:\n"));
        for (name, number) in LinuxSyscalls::table(arch) {
            out.push_str(&format!("{number:>5} {name}\n"));
        }
    }
    Ok(out)
}

fn gadgets(data: &[u8], depth: usize) -> Result<String, Box<dyn std::error::Error>> {
    let finder = GadgetFinder::new(elf_arch(data)?)?.with_depth(depth);
    let found = finder.find_in_elf(data)?;
    log::info!("{} gadget(s) on {}", found.len(), finder.arch());
    let mut out = String::new();
    for gadget in &found {
        out.push_str(&format!("{:#010x}: {}\n", gadget.address, gadget.text()));
    }
    Ok(out)
}

/// Split `words` into invocations at each `then`.
fn invocations(words: &[String]) -> impl Iterator<Item = &[String]> {
    words.split(|word| word == CHAIN)
}

fn generate(cli: &Cli) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    let Some(arch) = cli.arch.as_deref() else {
        return Err("missing architecture (try `shellcraft list`)".into());
    };
    let arch: Arch = arch.parse()?;
    let mut program = Program::new(arch);
    for words in invocations(&cli.invocation) {
        let Some((name, tokens)) = words.split_first() else {
            return Err("missing primitive name".into());
        };
        let args = Args::parse(arch, tokens)?;
        program.invoke(name, &args)?;
    }
    log::info!(
        "{} fragment(s), {} instruction(s), clobbers {:?}",
        program.len(),
        program.instruction_count(),
        program.clobbers()
    );

    Ok(match cli.format {
        Format::Asm => program.to_asm().into_bytes(),
        Format::Hex => {
            let code = program.assemble(cli.base)?;
            let mut hex = code.iter().map(|b| format!("{b:02x}")).collect::<String>();
            hex.push('\n');
            hex.into_bytes()
        }
        Format::Elf => program.to_elf()?,
    })
}

fn run(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    let bytes = match &cli.command {
        Some(Command::List { arch }) => list(arch.as_deref())?.into_bytes(),
        Some(Command::Gadgets { path, depth }) => gadgets(&fs::read(path)?, *depth)?.into_bytes(),
        None => generate(cli)?,
    };
    match &cli.output {
        Some(path) => fs::write(path, &bytes)?,
        None => io::stdout().write_all(&bytes)?,
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chained_invocations() {
        let cli = Cli::try_parse_from([
            "shellcraft", "amd64", "setregs", "rdi=rsi", "then", "syscall", "name=exit", "--format", "hex",
        ])
        .unwrap();
        assert_eq!(cli.arch.as_deref(), Some("amd64"));
        assert_eq!(cli.format, Format::Hex);
        let groups: Vec<Vec<&str>> = invocations(&cli.invocation)
            .map(|group| group.iter().map(String::as_str).collect())
            .collect();
        assert_eq!(groups, vec![vec!["setregs", "rdi=rsi"], vec!["syscall", "name=exit"]]);

        let bytes = generate(&cli).unwrap();
        assert!(String::from_utf8(bytes).unwrap().ends_with("0f05\n"));
    }

    #[test]
    fn test_empty_invocation_is_an_error() {
        let cli = Cli::try_parse_from(["shellcraft", "i386", "trap", "then"]).unwrap();
        assert!(generate(&cli).is_err());
    }

    #[test]
    fn test_list_subcommand() {
        let cli = Cli::try_parse_from(["shellcraft", "list", "riscv64"]).unwrap();
        let Some(Command::List { arch }) = &cli.command else {
            panic!("expected the list subcommand");
        };
        let text = list(arch.as_deref()).unwrap();
        assert!(text.contains("pushstr_array"));
        assert!(text.contains("   93 exit"));
    }

    #[test]
    fn test_gadgets_listing() {
        let data = shellcraft::core::elf::write_object(Arch::Amd64, &[0x5f, 0xc3]).unwrap();
        let text = gadgets(&data, DEFAULT_DEPTH).unwrap();
        assert_eq!(text, "0x00000000: pop rdi; ret\n0x00000001: ret\n");

        let cli = Cli::try_parse_from(["shellcraft", "gadgets", "a.out", "--depth", "4"]).unwrap();
        assert!(matches!(cli.command, Some(Command::Gadgets { depth: 4, .. })));
    }
}
