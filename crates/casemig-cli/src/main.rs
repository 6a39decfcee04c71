use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result};
use casemig_pipeline::{run_from_config_file, RunOptions};
use clap::{ArgAction, Parser};
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "casemig")]
#[command(about = "Migrate legacy ticket records into a case-management instance")]
struct Cli {
    /// Import configuration file (JSON, or YAML by extension).
    #[arg(long, default_value = "conf.json")]
    file: PathBuf,
    /// Hosting zone of the target instance.
    #[arg(long, default_value = "eur")]
    zone: String,
    /// Log the payloads that would be sent instead of creating anything.
    #[arg(long)]
    dryrun: bool,
    #[arg(long)]
    debug: bool,
    /// Rows processed at once in every stage (1-10).
    #[arg(long, default_value_t = 1)]
    concurrent: usize,
    /// Process attachments after the primary import.
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    attachments: bool,
    #[arg(long, default_value_t = 150)]
    call_delay_ms: u64,
    #[arg(long, default_value = "log")]
    log_dir: PathBuf,
}

impl Cli {
    fn run_options(&self) -> RunOptions {
        RunOptions {
            config_path: self.file.clone(),
            zone: self.zone.clone(),
            dry_run: self.dryrun,
            concurrency: self.concurrent,
            attachments: self.attachments,
            call_delay: Duration::from_millis(self.call_delay_ms),
        }
    }
}

fn init_logging(log_dir: &Path, debug: bool) -> Result<PathBuf> {
    fs::create_dir_all(log_dir).with_context(|| format!("creating {}", log_dir.display()))?;
    let path = log_dir.join(format!(
        "casemig_{}.log",
        chrono::Local::now().format("%Y%m%d%H%M%S")
    ));
    let file = fs::File::create(&path).with_context(|| format!("creating {}", path.display()))?;

    let level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().compact())
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(file)),
        )
        .try_init()
        .context("installing log subscriber")?;
    Ok(path)
}

async fn run(cli: Cli) -> Result<()> {
    let options = cli.run_options();
    options.validate()?;
    let log_path = init_logging(&cli.log_dir, cli.debug)?;
    info!(log = %log_path.display(), version = env!("CARGO_PKG_VERSION"), "casemig starting");

    let summary = run_from_config_file(options).await?;
    println!(
        "{}",
        serde_json::to_string_pretty(&summary).context("serializing run summary")?
    );
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = format!("{err:#}"), "migration aborted");
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}
