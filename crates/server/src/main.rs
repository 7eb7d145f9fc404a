use clap::Parser;
use server::cli::{Cli, Commands, ExitCode};
use server::config::AppConfig;
use server::{factory, router, subsystems};
use tokio::sync::broadcast;
use tracing::{error, info};

async fn run(cli: Cli) -> Result<(), shared::error::CommonError> {
    let Commands::Serve = cli.command;

    let config = AppConfig::load()?;
    let state = factory::build_app_state(config.clone()).await?;
    let app = router::build_router(&state);

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let http_handle = subsystems::spawn_http_server(app, config.listen_addr.parse()?, shutdown_tx.subscribe());
    let janitor_handle = subsystems::spawn_rate_limiter_janitor(&state, shutdown_tx.subscribe());

    tokio::signal::ctrl_c().await.map_err(shared::error::CommonError::from)?;
    info!("shutdown signal received, draining in-flight requests");
    let _ = shutdown_tx.send(());

    http_handle.wait_for_shutdown().await;
    janitor_handle.wait_for_shutdown().await;

    Ok(())
}

#[tokio::main]
async fn main() {
    shared::env::configure_env().expect("failed to load environment");
    shared::logging::configure_logging().expect("failed to configure logging");
    shared::crypto::configure_crypto_provider().expect("failed to configure crypto provider");

    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => std::process::exit(ExitCode::Success.as_i32()),
        Err(err) => {
            error!(error = ?err, "ambassador exited with error");
            std::process::exit(ExitCode::for_error(&err).as_i32());
        }
    }
}
