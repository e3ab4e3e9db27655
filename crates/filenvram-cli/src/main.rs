//! filenvram - inspect and edit a file-backed NVRAM store.
//!
//! Usage:
//!   filenvram [--file PATH] [--config PATH] list [--json]
//!   filenvram get boot-args
//!   filenvram set boot-args "-v keepsyms=1"
//!   filenvram set --type bytes 7C436110-AB2A-4BBB-A880-FE41995C9F82:csr-active-config 67000000
//!   filenvram delete boot-args
//!   filenvram import tree.json
//!   filenvram export [PATH]

use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use filenvram_core::config::load_config;
use filenvram_core::host::{AllowAll, StdFileSystem};
use filenvram_core::import::OwnedTree;
use filenvram_core::{NvramService, SyncDecision, TreeNode, Value};

#[derive(Parser)]
#[command(name = "filenvram", about = "File-backed NVRAM store")]
struct Cli {
    /// Backing file (overrides the config file).
    #[arg(long, short = 'f')]
    file: Option<PathBuf>,

    /// JSON config file.
    #[arg(long, default_value = "filenvram.json")]
    config: PathBuf,

    /// Never write the backing file.
    #[arg(long)]
    read_only: bool,

    /// Serial number used for MLB generation.
    #[arg(long)]
    serial: Option<String>,

    /// Log every property access.
    #[arg(long, short = 'v')]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print one variable.
    Get { key: String },
    /// Set a variable (or send a command key).
    Set {
        key: String,
        value: String,
        #[arg(long = "type", short = 't', value_enum, default_value_t = Kind::String)]
        kind: Kind,
    },
    /// Remove a variable.
    Delete { key: String },
    /// Print all variables.
    List {
        #[arg(long)]
        json: bool,
    },
    /// Ask for a write of the backing file.
    Sync {
        /// Skip redundant-write suppression.
        #[arg(long)]
        force: bool,
    },
    /// Seed the store from a JSON tree and write it out.
    Import { tree: PathBuf },
    /// Write the document to PATH, or print it.
    Export { path: Option<PathBuf> },
}

#[derive(Clone, Copy, ValueEnum)]
enum Kind {
    String,
    /// Hex digits, e.g. `67000000`.
    Bytes,
    Integer,
    Bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("filenvram: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    let mut config = load_config(&cli.config)?;
    if let Some(file) = cli.file {
        config.file_path = Some(file);
    }
    config.read_only |= cli.read_only;
    config.enable_logging |= cli.verbose;
    if cli.serial.is_some() {
        config.device_serial = cli.serial;
    }

    let service = NvramService::builder()
        .config(config)
        .file_system(Arc::new(StdFileSystem))
        .privilege(Arc::new(AllowAll))
        .build();

    if let Command::Import { tree } = &cli.command {
        return import(&service, tree);
    }

    let outcome = service.load();
    log::debug!("load: {outcome:?}");

    match cli.command {
        Command::Get { key } => match service.get(&key) {
            Some(value) => println!("{key}\t{}", format_value(&value)),
            None => return Err(format!("{key}: not found").into()),
        },
        Command::Set { key, value, kind } => {
            service.set(&key, parse_value(kind, &value)?)?;
        }
        Command::Delete { key } => service.remove(&key)?,
        Command::List { json } => {
            let entries = service.entries();
            if json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else {
                for (key, value) in entries {
                    println!("{key}\t{}", format_value(&value));
                }
            }
        }
        Command::Sync { force } => {
            let decision = if force {
                service.force_sync()
            } else {
                service.sync_now()
            };
            if let SyncDecision::Skipped(reason) = decision {
                log::warn!("sync skipped: {reason:?}");
            }
        }
        Command::Export { path: Some(path) } => service.export_to(&path)?,
        Command::Export { path: None } => print!("{}", service.render_document()),
        Command::Import { .. } => {}
    }

    service.flush();
    Ok(())
}

fn import(service: &NvramService, tree: &Path) -> Result<(), Box<dyn Error>> {
    let root: TreeNode = serde_json::from_str(&fs::read_to_string(tree)?)?;
    let count = service.seed_from_tree(&OwnedTree, &root);
    service.load();
    if let SyncDecision::Skipped(reason) = service.force_sync() {
        return Err(format!("imported {count} entries but could not write: {reason:?}").into());
    }
    service.flush();
    println!("imported {count} entries");
    Ok(())
}

fn parse_value(kind: Kind, raw: &str) -> Result<Value, Box<dyn Error>> {
    Ok(match kind {
        Kind::String => Value::from(raw),
        Kind::Bytes => Value::Bytes(parse_hex(raw)?),
        Kind::Integer => Value::Integer(raw.parse()?),
        Kind::Bool => Value::Boolean(raw.parse()?),
    })
}

fn parse_hex(raw: &str) -> Result<Vec<u8>, Box<dyn Error>> {
    let digits: Vec<char> = raw.chars().filter(|c| !c.is_whitespace()).collect();
    if digits.len() % 2 != 0 {
        return Err("hex value needs an even number of digits".into());
    }
    digits
        .chunks(2)
        .map(|pair| {
            let text: String = pair.iter().collect();
            u8::from_str_radix(&text, 16).map_err(|e| Box::new(e) as Box<dyn Error>)
        })
        .collect()
}

/// Printable bytes as-is, everything else as `%xx`.
fn format_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bytes(bytes) => bytes
            .iter()
            .map(|b| {
                if b.is_ascii_graphic() && *b != b'%' {
                    (*b as char).to_string()
                } else {
                    format!("%{b:02x}")
                }
            })
            .collect(),
        Value::Integer(n) => n.to_string(),
        Value::Boolean(b) => b.to_string(),
        Value::Dictionary(dict) => format!("<dictionary of {}>", dict.len()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hex_bytes() {
        assert_eq!(parse_hex("67000000").unwrap(), vec![0x67, 0, 0, 0]);
        assert_eq!(parse_hex("de ad").unwrap(), vec![0xde, 0xad]);
        assert!(parse_hex("abc").is_err());
        assert!(parse_hex("zz").is_err());
    }

    #[test]
    fn parses_typed_values() {
        assert_eq!(parse_value(Kind::Integer, "42").unwrap(), Value::Integer(42));
        assert_eq!(parse_value(Kind::Bool, "true").unwrap(), Value::Boolean(true));
        assert!(parse_value(Kind::Bool, "yes").is_err());
    }

    #[test]
    fn formats_bytes_like_nvram() {
        assert_eq!(format_value(&Value::Bytes(b"en\0".to_vec())), "en%00");
        assert_eq!(format_value(&Value::Bytes(vec![0x67, 0x25])), "g%25");
    }

    #[test]
    fn cli_parses_set_with_type() {
        let cli = Cli::try_parse_from([
            "filenvram", "--file", "/tmp/n.plist", "set", "--type", "bytes", "k", "00ff",
        ])
        .unwrap();
        assert_eq!(cli.file, Some(PathBuf::from("/tmp/n.plist")));
        assert!(matches!(
            cli.command,
            Command::Set { kind: Kind::Bytes, .. }
        ));
    }

    #[test]
    fn import_writes_backing_file() {
        let dir = tempfile::tempdir().unwrap();
        let plist = dir.path().join("nvram.plist");
        let tree = dir.path().join("tree.json");
        fs::write(
            &tree,
            r#"{"name":"options","properties":[["boot-args",{"type":"string","value":"-v"}]]}"#,
        )
        .unwrap();

        let service = NvramService::builder()
            .config(filenvram_core::NvramConfig {
                file_path: Some(plist.clone()),
                ..Default::default()
            })
            .file_system(Arc::new(StdFileSystem))
            .build();
        import(&service, &tree).unwrap();

        assert!(fs::read_to_string(&plist)
            .unwrap()
            .contains("<key>boot-args</key><string>-v</string>"));
    }
}
