use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context as _;
use clap::Parser;
use directories::BaseDirs;
use tracing_subscriber::EnvFilter;

use nuqql::backend;
use nuqql::tui;
use nuqql_core::config::ConfigFile;
use nuqql_core::paths::{compute_paths, NuqqlPaths, PathInputs};

#[derive(Parser, Debug)]
#[command(
    name = "nuqql",
    version,
    about = "Terminal instant messenger driving nuqql backend subprocesses"
)]
struct Cli {
    #[arg(long, value_name = "DIR", env = "NUQQL_DIR")]
    nuqql_dir: Option<PathBuf>,

    #[arg(long, env = "NUQQL_LOG", value_name = "LEVEL")]
    log_level: Option<String>,

    /// Start only the named backends (repeatable).
    #[arg(long = "backend", value_name = "NAME")]
    backends: Vec<String>,

    /// List discovered backend executables and exit.
    #[arg(long)]
    list_backends: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("nuqql: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let base = BaseDirs::new().context("home directory not found")?;
    let paths = compute_paths(PathInputs {
        home_dir: base.home_dir().to_owned(),
        xdg_config_home: std::env::var_os("XDG_CONFIG_HOME").map(PathBuf::from),
        nuqql_dir_override: cli.nuqql_dir,
    });

    let config = ConfigFile::load(&paths.config_file)
        .with_context(|| format!("load config: {}", paths.config_file.display()))?;

    let mut discovered = backend::discover(config.backend_dir.as_deref());
    if !cli.backends.is_empty() {
        discovered.retain(|(name, _)| cli.backends.contains(name));
    }

    if cli.list_backends {
        if discovered.is_empty() {
            println!("no backends found");
        } else {
            for (name, path) in &discovered {
                println!("{name}\t{}", path.display());
            }
        }
        return Ok(());
    }

    init_logging(&paths, cli.log_level.as_deref().or(config.log_level.as_deref()))?;
    tracing::info!(backends = discovered.len(), "starting");

    tui::runtime::run(&paths, config, discovered).await
}

/// Diagnostics go to a file; the terminal belongs to the UI.
fn init_logging(paths: &NuqqlPaths, level: Option<&str>) -> anyhow::Result<()> {
    std::fs::create_dir_all(&paths.nuqql_dir)
        .with_context(|| format!("create {}", paths.nuqql_dir.display()))?;

    let filter = match level {
        Some(level) => EnvFilter::try_new(level).context("parse log level")?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    let appender = tracing_appender::rolling::never(&paths.nuqql_dir, "nuqql.log");
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(appender)
        .with_ansi(false)
        .init();
    Ok(())
}
