mod error;

use std::io;
use std::path::PathBuf;

use catalog::PostgresCatalog;
use clap::Parser;
use common::config::TargetConfig;
use engine::Dispatcher;

use crate::error::TargetError;

/// A Singer-protocol target that loads SCHEMA/RECORD/STATE messages from
/// stdin into Postgres, denormalizing nested records into linked tables and
/// reconciling the remote schema on every run.
#[derive(Parser)]
#[command(name = "target-postgres")]
struct Cli {
    /// Path to the target's JSON config file.
    #[arg(long = "config", short = 'c')]
    config_path: PathBuf,
    /// Raise the log filter floor from info to debug.
    #[arg(long, short = 'v')]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let runtime = tokio::runtime::Runtime::new().expect("failed to start the tokio runtime");
    if let Err(e) = runtime.block_on(run(cli.config_path)) {
        tracing::error!("{e}");
        std::process::exit(1);
    }
}

async fn run(config_path: PathBuf) -> Result<(), TargetError> {
    let config = TargetConfig::load(&config_path)?;

    let catalog = logging::timeit!("connect to postgres", {
        PostgresCatalog::connect(
            &config.postgres_host,
            config.postgres_port,
            &config.postgres_database,
            config.postgres_username.as_deref().unwrap_or(""),
            config.postgres_password.as_deref().unwrap_or(""),
        )
        .await
    })?;

    let mut dispatcher = Dispatcher::new(
        catalog,
        config.postgres_schema,
        config.batch_limits,
        config.invalid_records_detect,
        config.invalid_records_threshold,
    );

    let stdin = io::stdin();
    let stdout = io::stdout();
    dispatcher.run(stdin.lock(), stdout.lock()).await?;

    Ok(())
}
