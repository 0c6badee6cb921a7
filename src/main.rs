//! maeri-emu: assembler and cycle-level emulator for the MAERI control core

use std::env;
use std::path::Path;

use anyhow::{bail, Context};
use maeri_emu::assembler::{assemble, ProgramFile, ProgramImage};
use maeri_emu::config::Config;
use maeri_emu::emu::{Engine, StopReason};
use maeri_emu::isa::encoding::Terminator;
use maeri_emu::isa::{InstructionStream, IsaConfig};

const USAGE: &str = "\
Usage: maeri-emu <command> [args]

Commands:
  assemble <program.toml> <image.bin>   Assemble a program file into an image
  disasm <image.bin>                    Disassemble an image
  run <image.bin> [--max-cycles N] [--dump-state]
                                        Execute an image on the emulator
  config                                Print a sample configuration file";

fn main() -> anyhow::Result<()> {
    // Initialize logging
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let Some(command) = args.get(1) else {
        println!("{}", USAGE);
        return Ok(());
    };
    let rest = &args[2..];

    match command.as_str() {
        "assemble" => match rest {
            [program, image, ..] => cmd_assemble(Path::new(program), Path::new(image)),
            _ => bail!("assemble needs <program.toml> <image.bin>\n\n{}", USAGE),
        },
        "disasm" => match rest.first() {
            Some(image) => cmd_disasm(Path::new(image)),
            None => bail!("disasm needs <image.bin>\n\n{}", USAGE),
        },
        "run" => cmd_run(rest),
        "config" => {
            if let Some(path) = Config::user_config_path() {
                println!("# User config path: {}", path.display());
            }
            print!("{}", Config::sample_config());
            Ok(())
        }
        "-h" | "--help" | "help" => {
            println!("{}", USAGE);
            Ok(())
        }
        other => bail!("unknown command '{}'\n\n{}", other, USAGE),
    }
}

/// Assemble a TOML program into a raw image file.
fn cmd_assemble(program_path: &Path, image_path: &Path) -> anyhow::Result<()> {
    let isa = IsaConfig::default();
    let program = ProgramFile::load(program_path)?;
    let ops = program.operations()?;
    let image = assemble(&ops, &isa)?;
    image
        .save(image_path)
        .with_context(|| format!("writing {}", image_path.display()))?;

    println!("Assembled {} operations -> {} ({} bytes)", ops.len(), image_path.display(), image.len());
    Ok(())
}

/// Print the instruction stream and the start of the configuration region.
fn cmd_disasm(image_path: &Path) -> anyhow::Result<()> {
    let isa = IsaConfig::default();
    let image = ProgramImage::load(image_path, isa)?;
    let stream = InstructionStream::parse(image.instruction_region(), &isa)?;

    println!("Instructions");
    println!("============");
    for (pc, inst) in stream.instructions() {
        let bytes: Vec<String> = inst.encode(&isa).iter().map(|b| format!("{:02X}", b)).collect();
        println!("  0x{:06X}: {:18} {}", pc, bytes.join(" "), inst.disassemble());
    }
    match stream.terminator() {
        Terminator::Reset { .. } => {}
        Terminator::Unknown { opcode, pc } => {
            println!("  0x{:06X}: {:02X}                 <unknown opcode>", pc, opcode);
        }
        Terminator::EndOfRegion => println!("  (no terminator before end of region)"),
    }

    println!();
    println!("Configuration region (first 32 lines)");
    println!("=====================================");
    for row in image.hex_dump(isa.config_base_line(), 32).lines() {
        println!("  {}", row);
    }
    Ok(())
}

/// Load an image into the emulator and run it to completion.
fn cmd_run(args: &[String]) -> anyhow::Result<()> {
    let config = Config::get();
    let mut max_cycles = config.max_cycles();
    let mut dump_state = false;
    let mut path = None;

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--dump-state" => dump_state = true,
            "--max-cycles" => {
                let value = iter.next().context("--max-cycles needs a value")?;
                max_cycles = value
                    .parse()
                    .with_context(|| format!("invalid --max-cycles value '{}'", value))?;
            }
            a if !a.starts_with('-') => path = Some(a),
            a => bail!("unknown option '{}'", a),
        }
    }
    let Some(path) = path else {
        bail!("run needs <image.bin>\n\n{}", USAGE);
    };

    let isa = IsaConfig::default();
    let image = ProgramImage::load(Path::new(path), isa)?;
    let mut engine = Engine::new(isa, config.device_timing())?;
    engine.load_image(&image)?;

    println!("Running: {}", path);
    println!();
    let outcome = engine.run(max_cycles);
    engine.print_status();
    if dump_state {
        println!();
        engine.print_nodes();
    }

    match outcome.reason {
        StopReason::Completed => Ok(()),
        StopReason::Fault(fault) => bail!("program stopped after {} cycles: {}", outcome.cycles, fault),
        StopReason::CycleLimit => bail!("no terminating reset within {} cycles", max_cycles),
    }
}
