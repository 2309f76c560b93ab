use crate::{
    classify,
    config::{self, AppConfig},
    error::{summarize_error, SyncError},
    manifest::Manifest,
    update::{self, BundleSource, SyncMode, SyncProgress, UpdateReport, UpdateRequest},
};
use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::{
    io::{self, Write},
    path::PathBuf,
    sync::Arc,
};

#[derive(Clone, Copy, PartialEq, Eq)]
enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "json" => Some(OutputFormat::Json),
            "text" => Some(OutputFormat::Text),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CliVerbosity {
    Quiet,
    Normal,
    Verbose,
    Debug,
}

impl CliVerbosity {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "quiet" => Some(CliVerbosity::Quiet),
            "normal" => Some(CliVerbosity::Normal),
            "verbose" => Some(CliVerbosity::Verbose),
            "debug" => Some(CliVerbosity::Debug),
            _ => None,
        }
    }

    pub fn filter(self) -> &'static str {
        match self {
            CliVerbosity::Quiet => "error",
            CliVerbosity::Normal => "warn",
            CliVerbosity::Verbose => "info",
            CliVerbosity::Debug => "debug",
        }
    }
}

struct GlobalOptions {
    format: OutputFormat,
    verbosity: CliVerbosity,
}

enum CliCommand {
    Update {
        instance_dir: PathBuf,
        mode: Option<SyncMode>,
        url: Option<String>,
        archive: Option<PathBuf>,
    },
    Apply {
        target_dir: PathBuf,
        source_dir: PathBuf,
        mode: Option<SyncMode>,
    },
    ServerPack {
        source_dir: PathBuf,
        server_dir: Option<PathBuf>,
    },
    Classify {
        dir: PathBuf,
    },
    Manifest {
        dir: PathBuf,
    },
    Config,
    Help,
    Version,
}

#[derive(Serialize)]
struct ErrorOutput<'a> {
    error: &'a str,
    message: String,
}

#[derive(Serialize)]
struct ServerPackOutput<'a> {
    server_dir: &'a PathBuf,
    included: &'a [String],
    excluded: &'a [String],
}

#[derive(Serialize)]
struct ManifestOutput<'a> {
    path: &'a PathBuf,
    entries: Vec<String>,
}

#[derive(Serialize)]
struct ConfigOutput<'a> {
    path: &'a PathBuf,
    config: &'a AppConfig,
}

pub struct ParsedArgs {
    command: CliCommand,
    global: GlobalOptions,
}

impl ParsedArgs {
    pub fn verbosity(&self) -> CliVerbosity {
        self.global.verbosity
    }
}

pub fn parse_args(args: &[String]) -> Result<ParsedArgs> {
    let (global, tokens) = parse_global_options(args)?;
    let command = parse_command(&tokens)?;
    Ok(ParsedArgs { command, global })
}

pub fn run(parsed: ParsedArgs) -> Result<()> {
    let ParsedArgs { command, global } = parsed;
    match command {
        CliCommand::Help => {
            print_help();
            Ok(())
        }
        CliCommand::Version => {
            println!("packsync v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        CliCommand::Config => {
            let path = config::config_path()?;
            let config = AppConfig::load_or_create_at(&path)?;
            match global.format {
                OutputFormat::Json => print_json(&ConfigOutput {
                    path: &path,
                    config: &config,
                }),
                OutputFormat::Text => {
                    println!("Config: {}", path.display());
                    let raw = serde_json::to_string_pretty(&config).context("serialize config")?;
                    println!("{raw}");
                    Ok(())
                }
            }
        }
        command => {
            let config = AppConfig::load_or_create()?;
            run_command(command, &config, &global)
        }
    }
}

fn run_command(command: CliCommand, config: &AppConfig, global: &GlobalOptions) -> Result<()> {
    match command {
        CliCommand::Update {
            instance_dir,
            mode,
            url,
            archive,
        } => {
            let source = match (archive, url) {
                (Some(path), _) => BundleSource::LocalArchive(path),
                (None, Some(url)) => BundleSource::Remote(url),
                (None, None) => BundleSource::Remote(config.bundle_source()?),
            };
            let request = UpdateRequest {
                instance_dir,
                source,
                mode: mode.unwrap_or(config.default_mode),
            };
            let progress = progress_enabled(global).then(progress_printer);
            let result = update::run_update(&request, config, progress);
            if progress_enabled(global) {
                eprintln!();
            }
            let report = result.or_else(|err| fail(global, "Failed to update mods", err))?;
            match global.format {
                OutputFormat::Json => print_json(&report),
                OutputFormat::Text => {
                    print_update_report(&report);
                    Ok(())
                }
            }
        }
        CliCommand::Apply {
            target_dir,
            source_dir,
            mode,
        } => {
            let mode = mode.unwrap_or(config.default_mode);
            let report = update::apply_bundle(&target_dir, &source_dir, mode, config)
                .or_else(|err| fail(global, "Failed to apply mods", err))?;
            match global.format {
                OutputFormat::Json => print_json(&report),
                OutputFormat::Text => {
                    print_update_report(&report);
                    Ok(())
                }
            }
        }
        CliCommand::ServerPack {
            source_dir,
            server_dir,
        } => {
            let server_dir = server_dir.unwrap_or_else(|| {
                source_dir
                    .parent()
                    .map(|parent| parent.join(&config.server_folder))
                    .unwrap_or_else(|| PathBuf::from(&config.server_folder))
            });
            let classification = classify::build_server_pack(
                &source_dir,
                &server_dir,
                &config.client_fragments,
                &config.reconcile_options(),
            )
            .or_else(|err| fail(global, "Failed to build server pack", err))?;
            match global.format {
                OutputFormat::Json => print_json(&ServerPackOutput {
                    server_dir: &server_dir,
                    included: &classification.included,
                    excluded: &classification.excluded,
                }),
                OutputFormat::Text => {
                    println!(
                        "Server mods generated at {} with {} mods.",
                        server_dir.display(),
                        classification.included.len()
                    );
                    print_excluded(&classification.excluded);
                    Ok(())
                }
            }
        }
        CliCommand::Classify { dir } => {
            let candidates = Manifest::synthesize(&dir, &config.mod_extension)
                .or_else(|err| fail(global, "Failed to list mods", err))?;
            let classification = classify::classify(candidates.iter(), &config.client_fragments);
            match global.format {
                OutputFormat::Json => print_json(&classification),
                OutputFormat::Text => {
                    println!("Server-safe ({}):", classification.included.len());
                    for name in &classification.included {
                        println!("  {name}");
                    }
                    print_excluded(&classification.excluded);
                    Ok(())
                }
            }
        }
        CliCommand::Manifest { dir } => {
            let manifest = Manifest::synthesize(&dir, &config.mod_extension)
                .or_else(|err| fail(global, "Failed to list mods", err))?;
            let path = dir.join(&config.manifest_name);
            manifest
                .write(&path)
                .or_else(|err| fail(global, "Failed to write manifest", err))?;
            match global.format {
                OutputFormat::Json => print_json(&ManifestOutput {
                    path: &path,
                    entries: manifest.names(),
                }),
                OutputFormat::Text => {
                    if manifest.is_empty() {
                        println!("No .{} files found in {}.", config.mod_extension, dir.display());
                    }
                    println!("Wrote {} with {} mods.", path.display(), manifest.len());
                    Ok(())
                }
            }
        }
        CliCommand::Config | CliCommand::Help | CliCommand::Version => Ok(()),
    }
}

/// Prints a JSON error record when requested and returns the summarized error.
fn fail<T>(global: &GlobalOptions, action: &str, err: SyncError) -> Result<T> {
    let message = summarize_error(&err.to_string());
    if global.format == OutputFormat::Json {
        print_json(&ErrorOutput {
            error: err.kind_label(),
            message: message.clone(),
        })?;
    }
    bail!("{action}: {message}")
}

fn progress_enabled(global: &GlobalOptions) -> bool {
    global.format == OutputFormat::Text && global.verbosity != CliVerbosity::Quiet
}

fn progress_printer() -> update::ProgressCallback {
    Arc::new(|progress: SyncProgress| {
        let percent = (progress.overall_progress * 100.0).round() as u32;
        let detail = match (progress.total, progress.current) {
            (Some(total), current) if total > 0 => {
                format!(" {}/{} KiB", current / 1024, total / 1024)
            }
            (None, current) if current > 0 => format!(" {} KiB", current / 1024),
            _ => progress
                .detail
                .map(|detail| format!(" ({detail})"))
                .unwrap_or_default(),
        };
        let mut stderr = io::stderr().lock();
        let _ = write!(stderr, "\r\x1b[2K[{percent:>3}%] {}{detail}", progress.stage.label());
        let _ = stderr.flush();
    })
}

fn print_update_report(report: &UpdateReport) {
    println!(
        "Mods folder updated successfully ({} mode): {}",
        report.mode.label(),
        report.target_dir.display()
    );
    if report.synthesized_manifest {
        println!("Bundle had no manifest; used its folder listing.");
    }
    println!("  installed: {}", report.added.len());
    for name in &report.added {
        println!("    + {name}");
    }
    println!("  removed: {}", report.removed.len());
    for name in &report.removed {
        println!("    - {name}");
    }
    if report.mode == SyncMode::Server {
        println!("  server mods: {}", report.included.len());
        print_excluded(&report.excluded);
    }
}

fn print_excluded(excluded: &[String]) {
    if excluded.is_empty() {
        return;
    }
    println!("Excluded {} client-side mods:", excluded.len());
    for name in excluded {
        println!("  - {name}");
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let raw = serde_json::to_string_pretty(value).context("serialize output")?;
    println!("{raw}");
    Ok(())
}

fn parse_global_options(args: &[String]) -> Result<(GlobalOptions, Vec<String>)> {
    let mut format = OutputFormat::Text;
    let mut verbosity = CliVerbosity::Normal;
    let mut tokens = Vec::new();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        let (flag, inline) = match arg.split_once('=') {
            Some((flag, value)) if flag.starts_with("--") => (flag, Some(value.to_string())),
            _ => (arg.as_str(), None),
        };
        match flag {
            "--format" => {
                let value = inline.or_else(|| iter.next().cloned());
                let Some(value) = value else {
                    bail!("--format requires text or json");
                };
                let Some(parsed) = OutputFormat::parse(&value) else {
                    bail!("Unknown format: {value}");
                };
                format = parsed;
            }
            "--verbosity" => {
                let value = inline.or_else(|| iter.next().cloned());
                let Some(value) = value else {
                    bail!("--verbosity requires a level");
                };
                let Some(parsed) = CliVerbosity::parse(&value) else {
                    bail!("Unknown verbosity: {value}");
                };
                verbosity = parsed;
            }
            "-q" | "--quiet" => verbosity = CliVerbosity::Quiet,
            "-v" | "--verbose" => verbosity = CliVerbosity::Verbose,
            _ => tokens.push(arg.to_string()),
        }
    }
    Ok((GlobalOptions { format, verbosity }, tokens))
}

fn parse_command(tokens: &[String]) -> Result<CliCommand> {
    let Some(head) = tokens.first() else {
        return Ok(CliCommand::Help);
    };
    let rest = tokens.get(1..).unwrap_or(&[]);
    match head.as_str() {
        "update" => parse_update(rest),
        "apply" => parse_apply(rest),
        "server-pack" => {
            let Some(source) = rest.first() else {
                bail!("server-pack requires a mods folder");
            };
            Ok(CliCommand::ServerPack {
                source_dir: PathBuf::from(source),
                server_dir: rest.get(1).map(PathBuf::from),
            })
        }
        "classify" => {
            let Some(dir) = rest.first() else {
                bail!("classify requires a mods folder");
            };
            Ok(CliCommand::Classify {
                dir: PathBuf::from(dir),
            })
        }
        "manifest" => {
            let Some(dir) = rest.first() else {
                bail!("manifest requires a mods folder");
            };
            Ok(CliCommand::Manifest {
                dir: PathBuf::from(dir),
            })
        }
        "config" => Ok(CliCommand::Config),
        "help" | "--help" | "-h" => Ok(CliCommand::Help),
        "version" | "--version" | "-V" => Ok(CliCommand::Version),
        other => bail!("Unknown command: {other} (see `packsync help`)"),
    }
}

fn parse_update(tokens: &[String]) -> Result<CliCommand> {
    let mut instance_dir = None;
    let mut mode = None;
    let mut url = None;
    let mut archive = None;
    let mut iter = tokens.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--server" => mode = Some(SyncMode::Server),
            "--client" => mode = Some(SyncMode::Client),
            "--mode" => {
                let Some(value) = iter.next() else {
                    bail!("--mode requires client or server");
                };
                let Some(parsed) = SyncMode::parse(value) else {
                    bail!("Unknown mode: {value}");
                };
                mode = Some(parsed);
            }
            "--url" => {
                let Some(value) = iter.next() else {
                    bail!("--url requires a bundle URL");
                };
                url = Some(value.to_string());
            }
            "--archive" => {
                let Some(value) = iter.next() else {
                    bail!("--archive requires a zip path");
                };
                archive = Some(PathBuf::from(value));
            }
            value if value.starts_with('-') => bail!("Unknown update option: {value}"),
            value => {
                if instance_dir.is_some() {
                    bail!("update takes a single instance folder");
                }
                instance_dir = Some(PathBuf::from(value));
            }
        }
    }
    let Some(instance_dir) = instance_dir else {
        bail!("update requires an instance folder");
    };
    Ok(CliCommand::Update {
        instance_dir,
        mode,
        url,
        archive,
    })
}

fn parse_apply(tokens: &[String]) -> Result<CliCommand> {
    let mut dirs = Vec::new();
    let mut mode = None;
    for arg in tokens {
        match arg.as_str() {
            "--server" => mode = Some(SyncMode::Server),
            "--client" => mode = Some(SyncMode::Client),
            value if value.starts_with('-') => bail!("Unknown apply option: {value}"),
            value => dirs.push(PathBuf::from(value)),
        }
    }
    let [target_dir, source_dir]: [PathBuf; 2] = match dirs.try_into() {
        Ok(dirs) => dirs,
        Err(_) => bail!("apply requires <mods-dir> <bundle-mods-dir>"),
    };
    Ok(CliCommand::Apply {
        target_dir,
        source_dir,
        mode,
    })
}

fn print_help() {
    println!("packsync v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Usage:");
    println!("  packsync update <instance-dir> [--server|--client|--mode <mode>]");
    println!("                  [--url <bundle-url>] [--archive <bundle.zip>]");
    println!("  packsync apply <mods-dir> <bundle-mods-dir> [--server|--client]");
    println!("  packsync server-pack <mods-dir> [<server-dir>]");
    println!("  packsync classify <mods-dir>");
    println!("  packsync manifest <mods-dir>");
    println!("  packsync config");
    println!("  packsync help | version");
    println!();
    println!("Options:");
    println!("  --format text|json");
    println!("  --verbosity quiet|normal|verbose|debug   (-q, -v)");
    println!();
    println!("RUST_LOG overrides the log filter.");
}
