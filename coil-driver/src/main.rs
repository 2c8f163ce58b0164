//! COIL Driver
//!
//! Command-line front for the binary codec: inspect headers, dump and
//! verify object files, and write the built-in sample modules.

mod samples;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use coil_binary::{decode_with, encode_with, read_header, DecoderOptions, EncoderOptions, HeaderFlags, SectionKind};
use coil_common::Diagnostics;
use log::info;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "coil")]
#[command(about = "COIL object file tool")]
#[command(version = "0.1.0")]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the header and section table
    Inspect {
        input: PathBuf,
    },

    /// Decode a file and print its module
    Dump {
        input: PathBuf,

        /// Print the module as JSON instead of a listing
        #[arg(long)]
        json: bool,
    },

    /// Decode a file and report every diagnostic
    Verify {
        input: PathBuf,

        /// Skip the content hash comparison
        #[arg(long)]
        no_hash_check: bool,

        /// Parse function bodies on the calling thread
        #[arg(long)]
        serial: bool,
    },

    /// Encode one of the built-in sample modules
    Sample {
        /// Which sample to write
        #[arg(short, long, default_value = "add")]
        name: String,

        /// Output file
        #[arg(short, long)]
        output: PathBuf,

        /// Header flags, e.g. `executable,relocatable`
        #[arg(long, value_delimiter = ',')]
        flags: Vec<String>,
    },
}

fn main() {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let result = match cli.command {
        Commands::Inspect { input } => inspect(&input),
        Commands::Dump { input, json } => dump(&input, json),
        Commands::Verify { input, no_hash_check, serial } => verify(&input, !no_hash_check, !serial),
        Commands::Sample { name, output, flags } => write_sample(&name, &output, &flags),
    };
    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn read_input(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).with_context(|| format!("cannot read {}", path.display()))
}

fn inspect(path: &Path) -> Result<()> {
    let bytes = read_input(path)?;
    let header = read_header(&bytes)?;

    println!("{}: {} bytes", path.display(), bytes.len());
    println!("  version    {}.{}", header.major, header.minor);
    println!("  flags      0x{:08X} {}", header.flags.bits(), flag_names(header.flags));
    println!("  timestamp  {}", header.timestamp);
    println!("  hash       {}", hex(&header.hash));
    println!();
    println!("  {:<18} {:>10} {:>10}", "section", "offset", "size");
    for kind in SectionKind::ALL {
        let entry = header.section(kind);
        if entry.is_present() {
            println!("  {:<18} {:>10} {:>10}", kind.name(), entry.offset, entry.size);
        } else {
            println!("  {:<18} {:>10} {:>10}", kind.name(), "-", "-");
        }
    }
    Ok(())
}

fn dump(path: &Path, json: bool) -> Result<()> {
    let bytes = read_input(path)?;
    let mut diagnostics = Diagnostics::new();
    let module = decode_with(&bytes, &DecoderOptions::default(), &mut diagnostics)?;
    for diagnostic in diagnostics.diagnostics() {
        eprintln!("{}", diagnostic);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&module)?);
    } else {
        print!("{}", module);
    }
    Ok(())
}

fn verify(path: &Path, verify_hash: bool, parallel: bool) -> Result<()> {
    let bytes = read_input(path)?;
    let options = DecoderOptions { verify_hash, parallel };
    let mut diagnostics = Diagnostics::new();
    let module = decode_with(&bytes, &options, &mut diagnostics)?;

    for diagnostic in diagnostics.diagnostics() {
        println!("{}", diagnostic);
    }
    println!(
        "{}: ok, module '{}' with {} globals, {} functions and {} instructions ({})",
        path.display(),
        module.name(),
        module.globals().len(),
        module.functions().len(),
        module.functions().iter().map(|f| f.instruction_count()).sum::<usize>(),
        diagnostics.summary()
    );
    Ok(())
}

fn write_sample(name: &str, output: &Path, flag_args: &[String]) -> Result<()> {
    let Some(module) = samples::create_sample(name) else {
        bail!("unknown sample '{}', expected one of: {}", name, samples::SAMPLES.join(", "));
    };
    let module = module?;
    let flags = parse_flags(flag_args)?;

    let bytes = encode_with(&module, &EncoderOptions { flags, ..EncoderOptions::default() })?;
    fs::write(output, &bytes).with_context(|| format!("cannot write {}", output.display()))?;
    info!("wrote sample '{}' ({} bytes)", name, bytes.len());
    println!("Sample '{}' written to: {}", name, output.display());
    Ok(())
}

fn parse_flags(names: &[String]) -> Result<HeaderFlags> {
    let mut flags = HeaderFlags::empty();
    for name in names {
        let name = name.trim();
        if name.is_empty() {
            continue;
        }
        match HeaderFlags::from_name(&name.to_uppercase()) {
            Some(flag) => flags |= flag,
            None => bail!("unknown header flag '{}'", name),
        }
    }
    Ok(flags)
}

fn flag_names(flags: HeaderFlags) -> String {
    let names: Vec<String> = flags.iter_names().map(|(name, _)| name.to_lowercase()).collect();
    if flags.unknown_bits() != 0 {
        format!("[{}] +0x{:X}", names.join(", "), flags.unknown_bits())
    } else {
        format!("[{}]", names.join(", "))
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_flags() {
        let names = vec!["executable".to_string(), " Relocatable".to_string(), String::new()];
        assert_eq!(parse_flags(&names).unwrap(), HeaderFlags::EXECUTABLE | HeaderFlags::RELOCATABLE);
        assert!(parse_flags(&["shiny".to_string()]).is_err());
    }

    #[test]
    fn test_flag_names() {
        let flags = HeaderFlags::from_bits_retain(0x8000_0028);
        assert_eq!(flag_names(flags), "[executable, debug_info] +0x80000000");
        assert_eq!(flag_names(HeaderFlags::empty()), "[]");
    }

    #[test]
    fn test_sample_roundtrip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hello.coil");
        let flags = vec!["executable".to_string(), "relocatable".to_string()];
        write_sample("hello", &path, &flags).unwrap();

        verify(&path, true, false).unwrap();
        let module = coil_binary::decode(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(module, samples::create_hello_world_module().unwrap());
    }

    #[test]
    fn test_unknown_sample() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.coil");
        assert!(write_sample("missing", &path, &[]).is_err());
        assert!(!path.exists());
    }
}
