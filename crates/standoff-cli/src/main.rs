//! `standoff` command-line tool
//!
//! Offline access to the codec (flatten, round-trip, field mapping), the
//! blob store, and a throwaway annotation store for trial ingestion.

use anyhow::{anyhow, bail, Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use serde_json::json;
use standoff_blob::{BlobStore, ReplaceOutcome};
use standoff_codec::{flatten, parse, reconstruct, OffsetUnit};
use standoff_store::{AnnotationStore, StoreConfig};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

fn cli() -> Command {
    let file = || {
        Arg::new("file")
            .required(true)
            .value_parser(value_parser!(PathBuf))
            .help("XML file")
    };
    let unit = || {
        Arg::new("unit")
            .long("unit")
            .value_parser(|s: &str| s.parse::<OffsetUnit>())
            .help("Offset unit: byte, utf16 or codepoint [default: from config]")
    };
    let id = || Arg::new("id").required(true).help("Blob id");

    Command::new("standoff")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Stand-off annotation tools")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("TOML configuration file"),
        )
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Log as JSON lines"),
        )
        .subcommand(
            Command::new("flatten")
                .about("Print the mapped fields, text and tags of an XML file as JSON")
                .arg(file())
                .arg(unit()),
        )
        .subcommand(
            Command::new("roundtrip")
                .about("Flatten and reconstruct an XML file, printing the result")
                .arg(file())
                .arg(unit()),
        )
        .subcommand(Command::new("schema").about("Print the index schema of the configured mapping"))
        .subcommand(
            Command::new("ingest")
                .about("Ingest XML files into an in-memory store and report the results")
                .arg(
                    Arg::new("files")
                        .required(true)
                        .num_args(1..)
                        .value_parser(value_parser!(PathBuf))
                        .help("XML files; each file's stem is its document id"),
                )
                .arg(
                    Arg::new("annotations")
                        .long("annotations")
                        .action(ArgAction::SetTrue)
                        .help("Also print each document with its annotations"),
                ),
        )
        .subcommand(
            Command::new("blob")
                .about("Manage stored originals")
                .subcommand_required(true)
                .arg(
                    Arg::new("root")
                        .long("root")
                        .global(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Store directory [default: blob_root from config]"),
                )
                .subcommand(
                    Command::new("put")
                        .about("Store a file under an id")
                        .arg(id())
                        .arg(
                            Arg::new("file")
                                .required(true)
                                .value_parser(value_parser!(PathBuf)),
                        )
                        .arg(
                            Arg::new("replace")
                                .long("replace")
                                .action(ArgAction::SetTrue)
                                .help("Overwrite an existing blob"),
                        ),
                )
                .subcommand(Command::new("get").about("Write a blob to stdout").arg(id()))
                .subcommand(Command::new("delete").about("Remove a blob").arg(id()))
                .subcommand(Command::new("path").about("Print the path of a blob").arg(id())),
        )
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn main() -> Result<()> {
    let matches = cli().get_matches();
    init_logging(matches.get_flag("log-json"));

    let config = match matches.get_one::<PathBuf>("config") {
        Some(path) => StoreConfig::load(path)?,
        None => StoreConfig::default(),
    };

    match matches.subcommand() {
        Some(("flatten", args)) => flatten_file(&config, args),
        Some(("roundtrip", args)) => roundtrip_file(&config, args),
        Some(("schema", _)) => {
            println!("{}", serde_json::to_string_pretty(&config.validate()?.schema())?);
            Ok(())
        }
        Some(("ingest", args)) => ingest(&config, args),
        Some(("blob", args)) => blob(&config, args),
        _ => Err(anyhow!("no command given")),
    }
}

fn required<'a, T: Clone + Send + Sync + 'static>(args: &'a ArgMatches, name: &str) -> Result<&'a T> {
    args.get_one::<T>(name)
        .ok_or_else(|| anyhow!("missing argument <{name}>"))
}

fn read(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("cannot read {}", path.display()))
}

fn unit_of(config: &StoreConfig, args: &ArgMatches) -> OffsetUnit {
    args.get_one::<OffsetUnit>("unit")
        .copied()
        .unwrap_or(config.offset_unit)
}

fn flatten_file(config: &StoreConfig, args: &ArgMatches) -> Result<()> {
    let path = required::<PathBuf>(args, "file")?;
    let root = parse(&read(path)?).with_context(|| format!("{} is not well-formed", path.display()))?;
    let mapped = config.validate()?.apply(&root)?;
    let flat = flatten(mapped.body, unit_of(config, args));
    let out = json!({
        "fields": mapped.fields,
        "text": flat.text,
        "unit": flat.unit,
        "tags": flat.tags,
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

fn roundtrip_file(config: &StoreConfig, args: &ArgMatches) -> Result<()> {
    let path = required::<PathBuf>(args, "file")?;
    let root = parse(&read(path)?).with_context(|| format!("{} is not well-formed", path.display()))?;
    let mapped = config.validate()?.apply(&root)?;
    let flat = flatten(mapped.body, unit_of(config, args));
    let back = reconstruct(&flat.text, &flat.tags, flat.unit)?;
    println!("{}", back.to_xml());
    if back != mapped.body.without_comments() {
        bail!("reconstruction of {} differs from the input", path.display());
    }
    tracing::info!(tags = flat.tags.len(), unit = %flat.unit, "round trip matches");
    Ok(())
}

fn ingest(config: &StoreConfig, args: &ArgMatches) -> Result<()> {
    let store = AnnotationStore::in_memory(config)?;
    let show = args.get_flag("annotations");
    let files: Vec<&PathBuf> = args
        .get_many::<PathBuf>("files")
        .map(Iterator::collect)
        .unwrap_or_default();

    let mut failed = 0;
    for path in &files {
        let id = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| anyhow!("{} has no usable file name", path.display()))?;
        let result = store.put_xml(Some(id), &read(path)?);
        if !result.is_success() {
            failed += 1;
            tracing::warn!(file = %path.display(), %result, "ingestion failed");
        }
        println!("{}", serde_json::to_string(&result)?);
        if show {
            if let Some(doc) = store.get_with_annotations(id, true)? {
                println!("{}", serde_json::to_string_pretty(&doc)?);
            }
        }
    }

    if failed > 0 {
        bail!("{failed} of {} documents failed", files.len());
    }
    Ok(())
}

fn blob(config: &StoreConfig, args: &ArgMatches) -> Result<()> {
    let root = args
        .get_one::<PathBuf>("root")
        .or(config.blob_root.as_ref())
        .ok_or_else(|| anyhow!("no blob store: pass --root or set blob_root"))?;
    let store = BlobStore::open(root, config.lock_timeout())?;

    match args.subcommand() {
        Some(("put", sub)) => {
            let id = required::<String>(sub, "id")?;
            let path = required::<PathBuf>(sub, "file")?;
            let content =
                std::fs::read(path).with_context(|| format!("cannot read {}", path.display()))?;
            if sub.get_flag("replace") {
                if store.replace(id, content)? == ReplaceOutcome::Unchanged {
                    tracing::info!(%id, "content unchanged");
                }
            } else {
                store.put(id, content)?;
            }
            Ok(())
        }
        Some(("get", sub)) => {
            let content = store.get(required::<String>(sub, "id")?)?;
            std::io::stdout().write_all(&content)?;
            Ok(())
        }
        Some(("delete", sub)) => Ok(store.delete(required::<String>(sub, "id")?)?),
        Some(("path", sub)) => {
            println!("{}", store.path_for(required::<String>(sub, "id")?)?.display());
            Ok(())
        }
        _ => Err(anyhow!("no blob command given")),
    }
}
