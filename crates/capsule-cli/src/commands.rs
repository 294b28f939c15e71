use std::path::Path;

use anyhow::{bail, Context};
use colored::Colorize;
use serde_json::json;

use capsule_flash::FlashImage;
use capsule_store::{CapsuleStore, Lookup};
use capsule_types::{CapsuleHash, CapsuleHasher, CapsuleOffset, ReturnWidth};

use crate::cli::*;
use crate::config::CliConfig;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = CliConfig::load(cli.config.as_deref())?;
    let ctx = ImageCtx {
        image: &cli.image,
        format: cli.format,
        config,
    };
    match cli.command {
        Command::Init(args) => cmd_init(&ctx, args),
        Command::List => cmd_list(&ctx),
        Command::Find(args) => cmd_find(&ctx, args),
        Command::Append(args) => cmd_append(&ctx, args),
        Command::Address(args) => cmd_address(&ctx, args),
        Command::Invoke(args) => cmd_invoke(&ctx, args),
        Command::Erase => cmd_erase(&ctx),
    }
}

struct ImageCtx<'a> {
    image: &'a Path,
    format: OutputFormat,
    config: CliConfig,
}

impl ImageCtx<'_> {
    fn open(&self) -> anyhow::Result<CapsuleStore<FlashImage>> {
        let image = FlashImage::load(self.image)
            .with_context(|| format!("loading image {}", self.image.display()))?;
        Ok(CapsuleStore::open(image, self.config.store.clone())?)
    }

    fn save(&self, store: &CapsuleStore<FlashImage>) -> anyhow::Result<()> {
        store
            .flash()
            .save(self.image)
            .with_context(|| format!("saving image {}", self.image.display()))
    }

    fn json(&self) -> bool {
        self.format == OutputFormat::Json
    }
}

fn print_json(value: serde_json::Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

fn cmd_init(ctx: &ImageCtx<'_>, args: InitArgs) -> anyhow::Result<()> {
    if ctx.image.exists() && !args.force {
        bail!("{} already exists (use --force to replace it)", ctx.image.display());
    }
    let mut layout = ctx.config.layout.clone();
    if let Some(capacity) = args.capacity {
        layout.capsule_capacity = capacity;
    }
    if let Some(origin) = args.origin {
        layout.origin = origin;
    }
    layout.capsule_odd_base |= args.odd_base;
    layout.capsule_file_type = ctx.config.store.container_file_type;

    let mut store = CapsuleStore::open(layout.build()?, ctx.config.store.clone())?;
    store.erase()?;
    ctx.save(&store)?;

    let container = store.container();
    if ctx.json() {
        return print_json(json!({
            "image": ctx.image.display().to_string(),
            "container_index": container.index(),
            "base": container.base().get(),
            "capacity": container.capacity(),
        }));
    }
    println!(
        "{} Initialized capsule image {}",
        "✓".green().bold(),
        ctx.image.display().to_string().bold()
    );
    println!("  Container: file #{} at {}", container.index(), container.base().to_string().cyan());
    println!("  Capacity:  {} bytes", container.capacity());
    Ok(())
}

fn cmd_list(ctx: &ImageCtx<'_>) -> anyhow::Result<()> {
    let store = ctx.open()?;
    let records = store.list()?;
    let used = store.used_bytes()?;
    let free = store.free_bytes()?;

    if ctx.json() {
        let entries: Vec<_> = records
            .iter()
            .map(|r| {
                json!({
                    "offset": r.offset.get(),
                    "length": r.length(),
                    "hash": r.hash().to_hex(),
                    "code_address": store.resolve_code_address(r.offset).get(),
                })
            })
            .collect();
        return print_json(json!({ "records": entries, "used": used, "free": free }));
    }

    if records.is_empty() {
        println!("No capsules stored.");
    }
    for r in &records {
        println!(
            "{:>6}  {}  {:>5} bytes  code at {}",
            r.offset.to_string().yellow(),
            r.hash().to_hex().cyan(),
            r.length(),
            store.resolve_code_address(r.offset)
        );
    }
    println!("{} used, {} free", used.to_string().bold(), free.to_string().bold());
    Ok(())
}

fn cmd_find(ctx: &ImageCtx<'_>, args: FindArgs) -> anyhow::Result<()> {
    let hash = CapsuleHash::from_hex(&args.hash)?;
    let store = ctx.open()?;
    let lookup = store.lookup(args.length, &hash)?;

    if ctx.json() {
        return print_json(json!({
            "found": lookup.is_found(),
            "offset": lookup.offset().get(),
        }));
    }
    match lookup {
        Lookup::Found { handle } => println!(
            "{} {} found at {}",
            "✓".green().bold(),
            hash.to_hex().cyan(),
            handle.offset.to_string().yellow()
        ),
        Lookup::Free { offset } => println!(
            "{} not stored; free space at {}",
            hash.to_hex().cyan(),
            offset.to_string().yellow()
        ),
    }
    Ok(())
}

fn cmd_append(ctx: &ImageCtx<'_>, args: AppendArgs) -> anyhow::Result<()> {
    let code = std::fs::read(&args.code)
        .with_context(|| format!("reading code {}", args.code.display()))?;
    let hash = match &args.hash {
        Some(hex) => CapsuleHash::from_hex(hex)?,
        None => CapsuleHasher::CODE.hash(&code),
    };

    let mut store = ctx.open()?;
    let appended = store.append_code(hash, &code)?;
    if appended.stored {
        ctx.save(&store)?;
    }

    if ctx.json() {
        return print_json(json!({
            "offset": appended.offset.get(),
            "stored": appended.stored,
            "hash": hash.to_hex(),
        }));
    }
    if appended.stored {
        println!(
            "{} Appended {} ({} code bytes) at {}",
            "✓".green().bold(),
            hash.to_hex().cyan(),
            code.len(),
            appended.offset.to_string().yellow()
        );
    } else {
        println!(
            "{} already stored at {}",
            hash.to_hex().cyan(),
            appended.offset.to_string().yellow()
        );
    }
    Ok(())
}

fn cmd_address(ctx: &ImageCtx<'_>, args: AddressArgs) -> anyhow::Result<()> {
    let store = ctx.open()?;
    let offset = CapsuleOffset::new(args.offset);
    let code = store.resolve_code_address(offset);
    let entry = code.to_instruction();

    if ctx.json() {
        return print_json(json!({
            "offset": offset.get(),
            "code_address": code.get(),
            "instruction_address": entry.get(),
            "word_aligned": code.is_word_aligned(),
        }));
    }
    println!("Code address:        {}", code.to_string().cyan());
    println!("Instruction address: {}", entry.to_string().cyan());
    if !code.is_word_aligned() {
        println!("{} code is not word aligned", "warning:".yellow().bold());
    }
    Ok(())
}

fn cmd_invoke(ctx: &ImageCtx<'_>, args: InvokeArgs) -> anyhow::Result<()> {
    let store = ctx.open()?;
    let width = match args.width {
        Some(len) => ReturnWidth::from_len(len)?,
        None => store.config().default_return_width,
    };
    let offset = CapsuleOffset::new(args.offset);

    let mut sim = store.simulator();
    let mut ret = vec![0u8; width.len()];
    // The simulator only interprets the image; nothing runs natively.
    unsafe { store.invoke_with_width(&mut sim, offset, width, &mut ret) }?;

    if ctx.json() {
        return print_json(json!({
            "offset": offset.get(),
            "width": width,
            "result": ret,
            "steps": sim.steps(),
        }));
    }
    let hex: Vec<String> = ret.iter().map(|b| format!("{b:02x}")).collect();
    println!(
        "{} Capsule at {} returned {} ({} steps)",
        "✓".green().bold(),
        offset.to_string().yellow(),
        hex.join(" ").cyan(),
        sim.steps()
    );
    Ok(())
}

fn cmd_erase(ctx: &ImageCtx<'_>) -> anyhow::Result<()> {
    let mut store = ctx.open()?;
    store.erase()?;
    ctx.save(&store)?;

    if ctx.json() {
        return print_json(json!({ "erased": true }));
    }
    println!("{} Capsule container erased", "✓".green().bold());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use capsule_flash::Archive;
    use capsule_store::sim::opcodes::{assemble, ldi, st_y, RET};
    use clap::Parser;
    use std::path::PathBuf;

    fn run(image: &Path, args: &[&str]) -> anyhow::Result<()> {
        let mut argv = vec!["capsule", "--image", image.to_str().unwrap()];
        argv.extend_from_slice(args);
        run_command(Cli::try_parse_from(argv).unwrap())
    }

    fn load(image: &Path) -> CapsuleStore<FlashImage> {
        CapsuleStore::open(FlashImage::load(image).unwrap(), Default::default()).unwrap()
    }

    fn code_file(dir: &Path, words: &[u16]) -> PathBuf {
        let path = dir.join("stub.bin");
        std::fs::write(&path, assemble(words)).unwrap();
        path
    }

    #[test]
    fn init_append_find_invoke() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("fw.img");
        run(&image, &["init", "--capacity", "64", "--odd-base"]).unwrap();

        let code = code_file(dir.path(), &[ldi(24, 0x5A), st_y(24), RET]);
        run(&image, &["append", code.to_str().unwrap(), "--hash", "01020304"]).unwrap();

        let store = load(&image);
        assert_eq!(
            store
                .find_or_free_offset(12, &CapsuleHash::new([1, 2, 3, 4]))
                .unwrap(),
            (true, CapsuleOffset::new(1))
        );

        run(&image, &["find", "--length", "12", "--hash", "01020304"]).unwrap();
        run(&image, &["invoke", "--offset", "1", "--format", "json"]).unwrap();
        run(&image, &["address", "--offset", "1"]).unwrap();
        run(&image, &["list"]).unwrap();
    }

    #[test]
    fn init_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("fw.img");
        run(&image, &["init"]).unwrap();
        assert!(run(&image, &["init"]).is_err());
        run(&image, &["init", "--force", "--capacity", "32"]).unwrap();
        assert_eq!(load(&image).container().capacity(), 32);
    }

    #[test]
    fn append_hashes_code_when_no_hash_given() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("fw.img");
        run(&image, &["init"]).unwrap();
        let code = code_file(dir.path(), &[RET]);
        run(&image, &["append", code.to_str().unwrap()]).unwrap();

        let expected = CapsuleHasher::CODE.hash(&assemble(&[RET]));
        let records = load(&image).list().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].hash(), expected);
    }

    #[test]
    fn erase_empties_the_image() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("fw.img");
        run(&image, &["init"]).unwrap();
        let code = code_file(dir.path(), &[RET]);
        run(&image, &["append", code.to_str().unwrap()]).unwrap();
        run(&image, &["erase"]).unwrap();
        assert!(load(&image).list().unwrap().is_empty());
    }

    #[test]
    fn invoke_rejects_bad_width() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("fw.img");
        run(&image, &["init"]).unwrap();
        assert!(run(&image, &["invoke", "--offset", "0", "--width", "3"]).is_err());
    }

    #[test]
    fn config_file_selects_layout() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("fw.img");
        let config = dir.path().join("capsule.toml");
        std::fs::write(
            &config,
            "[layout]\norigin = 512\ncapsule_capacity = 40\n",
        )
        .unwrap();
        run(&image, &["--config", config.to_str().unwrap(), "init"]).unwrap();

        let store = load(&image);
        assert_eq!(store.container().base().get(), 512);
        assert_eq!(store.container().capacity(), 40);
    }

    #[test]
    fn missing_image_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        assert!(run(&dir.path().join("absent.img"), &["list"]).is_err());
    }

    #[test]
    fn init_tags_container_with_configured_type() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("fw.img");
        let config = dir.path().join("capsule.toml");
        std::fs::write(&config, "[store]\ncontainer_file_type = 9\n").unwrap();
        let config = config.to_str().unwrap();
        run(&image, &["--config", config, "init", "--capacity", "32"]).unwrap();

        let flash = FlashImage::load(&image).unwrap();
        assert_eq!(flash.file(0).unwrap().file_type, capsule_types::FileType(9));
        run(&image, &["--config", config, "list"]).unwrap();
        let code = code_file(dir.path(), &[RET]);
        run(&image, &["--config", config, "append", code.to_str().unwrap()]).unwrap();
    }
}
