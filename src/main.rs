use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use sftp_relay::hooks::{SendmailNotifier, email};
use sftp_relay::{RelayConfig, RunLog, logging};

/// Relay new and changed files between SFTP servers and local directories.
#[derive(Parser, Debug)]
#[command(name = "sftp-relay", version, about)]
struct Cli {
    /// Relay job configuration (TOML)
    config: PathBuf,

    /// Directory for rolling log files; overrides `log_to` in the config
    #[arg(long, env = "SFTP_RELAY_LOG_DIR")]
    log_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env early; ignore if missing.
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let log = RunLog::new();
    let prefix = logging::file_prefix(&cli.config);

    let config = match RelayConfig::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            let _guard = logging::init(cli.log_dir.as_deref(), &prefix).ok().flatten();
            return fail(&cli.config, &log, &anyhow::Error::new(e)).await;
        }
    };

    let log_dir = cli.log_dir.clone().or_else(|| config.log_to.clone());
    let _guard = match logging::init(log_dir.as_deref(), &prefix) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("warning: {e:#}");
            None
        }
    };

    match sftp_relay::run(&config, &cli.config, &log).await {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => fail(&cli.config, &log, &e).await,
    }
}

async fn fail(config_path: &Path, log: &RunLog, error: &anyhow::Error) -> ExitCode {
    log.error(format!("{error:#}"));
    eprintln!("error: {error:#}");

    match email::send_error_report(config_path, log, &SendmailNotifier::default()).await {
        Ok(true) => tracing::info!("error report sent"),
        Ok(false) => {}
        Err(e) => tracing::warn!("could not send error report: {e:#}"),
    }
    ExitCode::from(1)
}
