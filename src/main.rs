use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::error;

mod main_runtime;

#[derive(Parser, Debug)]
#[command(name = "warden")]
#[command(version)]
#[command(about = "Risk-gated position lifecycle engine for Binance spot", long_about = None)]
struct Cli {
    /// Directory holding default.toml and <WARDEN_ENV>.toml
    #[arg(long, env = "WARDEN_CONFIG_DIR", default_value = "config")]
    config_dir: PathBuf,

    /// Force paper trading regardless of configuration
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match main_runtime::load_config(&cli.config_dir, cli.dry_run) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("\x1b[31m✗ {e:#}\x1b[0m");
            return ExitCode::FAILURE;
        }
    };
    main_runtime::init_logging(&config.logging);

    match main_runtime::run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %format!("{e:#}"), "fatal");
            eprintln!("\x1b[31m✗ {e:#}\x1b[0m");
            ExitCode::FAILURE
        }
    }
}
