//! `wbsync` command line: simulator and signature inspection

use anyhow::Context;
use clap::{value_parser, Arg, ArgAction, Command};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use wbsync_backend::LocalBackend;
use wbsync_cache::SignatureService;
use wbsync_core::simulator::{run_simulator, SimulatorConfig};
use wbsync_core::SyncConfig;
use wbsync_model::WorkbookDescriptor;

fn cli() -> Command {
    Command::new("wbsync")
        .version(wbsync_core::VERSION)
        .about("Workbook synchronization core")
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .global(true)
                .help("Log filter (overrides RUST_LOG), e.g. debug or wbsync_core=trace"),
        )
        .subcommand(
            Command::new("simulate")
                .about("Run the sync simulator against a local backend")
                .arg(
                    Arg::new("operations")
                        .long("ops")
                        .default_value("1000")
                        .value_parser(value_parser!(u64))
                        .help("Number of operations to simulate"),
                )
                .arg(
                    Arg::new("seed")
                        .long("seed")
                        .default_value("42")
                        .value_parser(value_parser!(u64))
                        .help("Random seed for reproducibility"),
                )
                .arg(
                    Arg::new("dir")
                        .long("dir")
                        .value_parser(value_parser!(PathBuf))
                        .help("Directory for saved workbooks (default: a temp dir)"),
                )
                .arg(
                    Arg::new("config")
                        .long("config")
                        .value_parser(value_parser!(PathBuf))
                        .help("TOML sync configuration"),
                )
                .arg(
                    Arg::new("stop-on-violation")
                        .long("stop-on-violation")
                        .action(ArgAction::SetTrue)
                        .help("Stop simulation on first violation"),
                ),
        )
        .subcommand(
            Command::new("signature")
                .about("Print the cache signature a workbook file would get")
                .arg(Arg::new("path").required(true).help("Workbook file")),
        )
}

fn init_tracing(level: Option<&String>) {
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = cli().get_matches();
    init_tracing(matches.get_one::<String>("log-level"));

    match matches.subcommand() {
        Some(("simulate", args)) => {
            let sync = match args.get_one::<PathBuf>("config") {
                Some(path) => SyncConfig::from_file(path)
                    .with_context(|| format!("loading {}", path.display()))?,
                None => SyncConfig::default(),
            };
            let mut config = SimulatorConfig {
                seed: *args.get_one::<u64>("seed").unwrap_or(&42),
                total_operations: *args.get_one::<u64>("operations").unwrap_or(&1000),
                stop_on_first_violation: args.get_flag("stop-on-violation"),
                sync,
                ..Default::default()
            };
            let scratch = match args.get_one::<PathBuf>("dir") {
                Some(dir) => {
                    config.work_dir = dir.clone();
                    None
                }
                None => {
                    let dir = tempfile::tempdir().context("creating scratch directory")?;
                    config.work_dir = dir.path().to_path_buf();
                    Some(dir)
                }
            };

            println!("Running wbsync simulator...");
            println!("Operations: {}", config.total_operations);
            println!("Seed: {}", config.seed);
            println!();

            let report = run_simulator(config).await.context("simulation setup failed")?;
            println!("{}", report.generate_text());

            drop(scratch);
            std::process::exit(if report.passed() { 0 } else { 1 });
        }
        Some(("signature", args)) => {
            let path = args
                .get_one::<String>("path")
                .context("missing workbook path")?;
            let service = SignatureService::new(Arc::new(LocalBackend::new()));
            let descriptor = WorkbookDescriptor::unsaved(Vec::new()).with_path(path.as_str());
            println!("{}", service.compute(&descriptor).await);
        }
        _ => {
            cli().print_help()?;
            println!();
        }
    }
    Ok(())
}
