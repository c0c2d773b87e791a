use std::io::Read;
use std::path::PathBuf;

use console::Console;
use vm::{Fault, Vm, VmRam};

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

/// Bytecode image runner
#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Image to load and execute
    rom: PathBuf,
}

fn main() -> Result<()> {
    let env = env_logger::Env::default()
        .filter_or("GRACKLE_LOG", "info")
        .write_style_or("GRACKLE_LOG", "always");
    env_logger::init_from_env(env);

    let args = Args::parse();
    let mut f = std::fs::File::open(&args.rom)
        .with_context(|| format!("failed to open {:?}", args.rom))?;

    let mut rom = vec![];
    f.read_to_end(&mut rom).context("failed to read file")?;

    let mut ram = VmRam::new();
    let mut vm = Vm::new(&rom, &mut ram);
    let mut dev = Console::new();

    let start = std::time::Instant::now();
    vm.run(&mut dev);
    dev.flush().context("failed to write program output")?;
    info!("finished in {:?}", start.elapsed());

    let code = vm.error();
    if code != 0 {
        match Fault::from_code(code) {
            Some(f) => anyhow::bail!("program faulted: {f:?} (code {code})"),
            None => anyhow::bail!("program faulted with code {code}"),
        }
    }

    Ok(())
}
