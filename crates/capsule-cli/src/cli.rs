use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "capsule",
    about = "Inspect and edit the capsule container of a flash image",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Flash image file to operate on
    #[arg(short, long, global = true, default_value = "capsules.img")]
    pub image: PathBuf,

    /// TOML file with `[store]` and `[layout]` tables
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create an image with an empty capsule container
    Init(InitArgs),
    /// List stored capsules
    List,
    /// Look a capsule up by header
    Find(FindArgs),
    /// Append a capsule from a file of machine code
    Append(AppendArgs),
    /// Show where a capsule's code lives
    Address(AddressArgs),
    /// Run a capsule on the simulator
    Invoke(InvokeArgs),
    /// Logically empty the container
    Erase,
}

#[derive(Args)]
pub struct InitArgs {
    /// Container size in bytes (overrides the layout)
    #[arg(long)]
    pub capacity: Option<u32>,
    /// Archive origin address (overrides the layout)
    #[arg(long, value_parser = parse_u32)]
    pub origin: Option<u32>,
    /// Place the container at an odd address
    #[arg(long)]
    pub odd_base: bool,
    /// Replace an existing image
    #[arg(long)]
    pub force: bool,
}

#[derive(Args)]
pub struct FindArgs {
    /// Length field: header plus code bytes
    #[arg(short, long)]
    pub length: u16,
    /// Four-byte hash as hex
    #[arg(long)]
    pub hash: String,
}

#[derive(Args)]
pub struct AppendArgs {
    /// Raw machine code
    pub code: PathBuf,
    /// Four-byte hash as hex; computed from the code when omitted
    #[arg(long)]
    pub hash: Option<String>,
}

#[derive(Args)]
pub struct AddressArgs {
    #[arg(short, long)]
    pub offset: u16,
}

#[derive(Args)]
pub struct InvokeArgs {
    #[arg(short, long)]
    pub offset: u16,
    /// Result bytes to collect: 1, 2 or 4 (defaults to the configured width)
    #[arg(short, long)]
    pub width: Option<usize>,
}

fn parse_u32(s: &str) -> Result<u32, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid address '{s}': {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_init() {
        let cli = Cli::try_parse_from([
            "capsule", "init", "--capacity", "512", "--origin", "0x2000", "--odd-base",
        ])
        .unwrap();
        if let Command::Init(args) = cli.command {
            assert_eq!(args.capacity, Some(512));
            assert_eq!(args.origin, Some(0x2000));
            assert!(args.odd_base);
            assert!(!args.force);
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn parse_find() {
        let cli =
            Cli::try_parse_from(["capsule", "find", "--length", "8", "--hash", "01020304"]).unwrap();
        if let Command::Find(args) = cli.command {
            assert_eq!(args.length, 8);
            assert_eq!(args.hash, "01020304");
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn parse_append_without_hash() {
        let cli = Cli::try_parse_from(["capsule", "append", "stub.bin"]).unwrap();
        if let Command::Append(args) = cli.command {
            assert_eq!(args.code, PathBuf::from("stub.bin"));
            assert!(args.hash.is_none());
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn parse_invoke_with_width() {
        let cli = Cli::try_parse_from(["capsule", "invoke", "-o", "10", "-w", "2"]).unwrap();
        if let Command::Invoke(args) = cli.command {
            assert_eq!(args.offset, 10);
            assert_eq!(args.width, Some(2));
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn parse_global_options_after_subcommand() {
        let cli = Cli::try_parse_from([
            "capsule", "list", "--image", "fw.img", "--format", "json", "-v",
        ])
        .unwrap();
        assert!(matches!(cli.command, Command::List));
        assert_eq!(cli.image, PathBuf::from("fw.img"));
        assert_eq!(cli.format, OutputFormat::Json);
        assert!(cli.verbose);
    }

    #[test]
    fn default_image_path() {
        let cli = Cli::try_parse_from(["capsule", "erase"]).unwrap();
        assert_eq!(cli.image, PathBuf::from("capsules.img"));
        assert!(cli.config.is_none());
    }

    #[test]
    fn offset_must_fit_sixteen_bits() {
        assert!(Cli::try_parse_from(["capsule", "address", "--offset", "70000"]).is_err());
    }

    #[test]
    fn origin_accepts_decimal_and_hex() {
        assert_eq!(parse_u32("4096"), Ok(4096));
        assert_eq!(parse_u32("0x1000"), Ok(4096));
        assert!(parse_u32("0xZZ").is_err());
    }
}
