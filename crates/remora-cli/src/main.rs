//! remora command-line shell
//!
//! Thin wrapper over the host runtime: probe a device, inspect its heap,
//! build images, and load-and-call simple functions. The serial device is
//! treated as an ordered byte pipe; any path that opens read/write works
//! (a CDC-ACM device node, a PTY, a socket wrapper).

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use remora_host::{LoadOptions, Session, Value};
use remora_proto::link::StreamLink;
use remora_toolchain::config::ToolchainConfig;
use remora_toolchain::signature::{ParamKind, ScalarType};
use remora_toolchain::{BuildOptions, Builder};
use std::fs::{File, OpenOptions};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "remora")]
#[command(about = "Remote dynamic native-code loader", long_about = None)]
#[command(version)]
struct Cli {
    /// Toolchain config file (TOML); defaults are used when absent
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Echo test bytes through the device
    Ping {
        /// Serial device path
        #[arg(short, long)]
        port: PathBuf,
    },

    /// Protocol and firmware information
    Info {
        #[arg(short, long)]
        port: PathBuf,
    },

    /// Heap statistics for both device memory regions
    Heap {
        #[arg(short, long)]
        port: PathBuf,
    },

    /// Build a function image without a device (probe addresses)
    Build {
        /// Entry source file
        source: PathBuf,
        /// Function to wrap
        function: String,
        /// Base address to link for
        #[arg(long, default_value = "0x48000000", value_parser = parse_address)]
        base: u32,
        /// Argument frame address
        #[arg(long, default_value = "0x48008000", value_parser = parse_address)]
        args: u32,
        /// Resolve symbols against the configured firmware ELF
        #[arg(long)]
        firmware: bool,
    },

    /// Load a function and call it with scalar arguments
    Run {
        source: PathBuf,
        function: String,
        #[arg(short, long)]
        port: PathBuf,
        /// Scalar arguments in signature order
        args: Vec<String>,
        /// Resolve symbols against the configured firmware ELF
        #[arg(long)]
        firmware: bool,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => {
            ToolchainConfig::load(path).with_context(|| format!("loading {}", path.display()))?
        }
        None => ToolchainConfig::default(),
    };

    match cli.command {
        Commands::Ping { port } => {
            let mut session = open_session(&port, config)?;
            let echoed = session.client_mut().ping(&[0xCA, 0xFE, 0xBA, 0xBE])?;
            if echoed == [0xCA, 0xFE, 0xBA, 0xBE] {
                println!("Device at {} is alive.", port.display());
            } else {
                bail!("ping returned {:02X?}", echoed);
            }
        }

        Commands::Info { port } => {
            let mut session = open_session(&port, config)?;
            let info = session.connect()?;
            println!("Firmware:        {}", info.firmware_version);
            println!(
                "Protocol:        {}.{}",
                info.protocol_major, info.protocol_minor
            );
            println!("Max payload:     {} bytes", info.max_payload);
            println!("Cache line:      {} bytes", info.cache_line);
            println!("Max allocations: {}", info.max_allocations);
        }

        Commands::Heap { port } => {
            let mut session = open_session(&port, config)?;
            session.connect()?;
            let heap = session.heap_stats()?;
            println!(
                "external: {:>10} free / {:>10} total",
                heap.free_external, heap.total_external
            );
            println!(
                "internal: {:>10} free / {:>10} total",
                heap.free_internal, heap.total_internal
            );
        }

        Commands::Build {
            source,
            function,
            base,
            args,
            firmware,
        } => {
            let builder = Builder::new(config)?;
            let opts = BuildOptions {
                optimization: None,
                resolve_firmware: firmware,
            };
            let image = builder.build(&source, &function, base, args, &opts)?;
            println!(
                "image: {} bytes at 0x{:08x}, entry 0x{:08x}",
                image.artifact.total_size(),
                image.artifact.base_address,
                image.artifact.entry_address
            );
            for (name, section) in &image.artifact.sections {
                println!(
                    "  {:<8} 0x{:08x} {:>6} bytes{}",
                    name,
                    section.address,
                    section.size,
                    if section.zero_fill { " (zero-fill)" } else { "" }
                );
            }
            println!("signature: {:?}", image.signature.name);
            for (i, param) in image.signature.params.iter().enumerate() {
                println!("  [{}] {} {}", i, param.ty.render(), param.name);
            }
        }

        Commands::Run {
            source,
            function,
            port,
            args,
            firmware,
        } => {
            let mut session = open_session(&port, config)?;
            session.connect()?;

            let opts = LoadOptions {
                resolve_firmware: firmware,
                ..LoadOptions::default()
            };
            let mut func = session.load(&source, &function, &opts)?;

            let params = func.signature().params.clone();
            if args.len() != params.len() {
                bail!(
                    "'{}' takes {} argument(s), {} given",
                    function,
                    params.len(),
                    args.len()
                );
            }
            let mut values = Vec::new();
            for (param, text) in params.iter().zip(&args) {
                values.push(parse_value(param, text)?);
            }

            let result = func.call(session.client_mut(), &mut values);
            let freed = func.free(session.client_mut());
            println!("{} -> {:?}", function, result?);
            freed?;
        }
    }

    Ok(())
}

fn open_session(port: &PathBuf, config: ToolchainConfig) -> Result<Session<StreamLink<File>>> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(port)
        .with_context(|| format!("opening {}", port.display()))?;
    let builder = Builder::new(config)?;
    Ok(Session::new(StreamLink::new(file), builder))
}

fn parse_address(text: &str) -> Result<u32, String> {
    let parsed = if let Some(hex) = text.strip_prefix("0x") {
        u32::from_str_radix(hex, 16)
    } else {
        text.parse()
    };
    parsed.map_err(|_| format!("invalid address: {}", text))
}

/// Parse a command-line scalar against its declared parameter type.
/// Pointer parameters need array data and are out of reach from here.
fn parse_value(param: &remora_toolchain::signature::Param, text: &str) -> Result<Value> {
    if param.kind() == ParamKind::Pointer {
        bail!(
            "parameter '{}' is a pointer; array arguments are not supported from the CLI",
            param.name
        );
    }
    let scalar = param
        .ty
        .scalar
        .expect("value parameters always have a scalar type");
    let value = match scalar {
        ScalarType::I8 => Value::I8(text.parse()?),
        ScalarType::U8 => Value::U8(text.parse()?),
        ScalarType::I16 => Value::I16(text.parse()?),
        ScalarType::U16 => Value::U16(text.parse()?),
        ScalarType::I32 => Value::I32(text.parse()?),
        ScalarType::U32 => Value::U32(text.parse()?),
        ScalarType::F32 => Value::F32(text.parse()?),
        other => bail!("unsupported parameter type {:?}", other),
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_address_accepts_hex_and_decimal() {
        assert_eq!(parse_address("0x48000000").unwrap(), 0x4800_0000);
        assert_eq!(parse_address("4096").unwrap(), 4096);
        assert!(parse_address("0xZZ").is_err());
        assert!(parse_address("forty").is_err());
    }

    #[test]
    fn test_parse_value_respects_declared_width() {
        use remora_toolchain::signature::{parse_signature, TypeTable};
        let sig = parse_signature(
            "int f(int a, float b, uint8_t c) { return 0; }",
            "f",
            &TypeTable::builtin(),
        )
        .unwrap();

        assert_eq!(parse_value(&sig.params[0], "-7").unwrap(), Value::I32(-7));
        assert_eq!(parse_value(&sig.params[1], "2.5").unwrap(), Value::F32(2.5));
        assert_eq!(parse_value(&sig.params[2], "200").unwrap(), Value::U8(200));
        assert!(parse_value(&sig.params[2], "300").is_err());
    }
}
