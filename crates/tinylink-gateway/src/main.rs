mod app;
mod cli;
mod error;
mod handlers;
mod model;
mod state;

use crate::app::App;
use crate::cli::{Cli, StorageBackend};
use crate::state::AppState;
use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use tinylink_core::{ClickRecorder, CodePool, Repository, Shortener};
use tinylink_generator::RandomGenerator;
use tinylink_redirector::{Redirector, RedirectorService};
use tinylink_shortener::{CodeAllocator, Replenisher, ShortenerService};
use tinylink_storage::{
    InMemoryCodePool, InMemoryRepository, MySqlCodePool, MySqlRepository, PostgresCodePool,
    PostgresRepository,
};
use tracing::info;

struct Services {
    shortener: Arc<dyn Shortener>,
    redirector: Arc<dyn Redirector>,
    replenisher: Arc<Replenisher>,
}

fn assemble<R, P>(cli: &Cli, repository: Arc<R>, pool: P) -> anyhow::Result<Services>
where
    R: Repository + ClickRecorder,
    P: CodePool,
{
    let generator = RandomGenerator::new(cli.alphabet.clone(), cli.code_length)?;
    let allocator = Arc::new(CodeAllocator::new(
        pool,
        generator,
        cli.allocator_settings(),
    ));

    let replenisher = Arc::new(Replenisher::spawn(
        Arc::clone(&allocator),
        cli.replenisher_settings(),
    ));
    let shortener = ShortenerService::new(Arc::clone(&repository), allocator)
        .with_replenisher(Arc::clone(&replenisher));
    let redirector = RedirectorService::new(repository, cli.batcher_settings());

    Ok(Services {
        shortener: Arc::new(shortener),
        redirector: Arc::new(redirector),
        replenisher,
    })
}

fn dsns(cli: &Cli) -> anyhow::Result<(&str, &str)> {
    let pool_dsn = cli.pool_dsn.as_deref().context("--pool-dsn is required")?;
    let mapping_dsn = cli
        .mapping_dsn
        .as_deref()
        .context("--mapping-dsn is required")?;
    Ok((pool_dsn, mapping_dsn))
}

async fn build_services(cli: &Cli) -> anyhow::Result<Services> {
    match cli.storage {
        StorageBackend::InMemory => assemble(
            cli,
            Arc::new(InMemoryRepository::new()),
            InMemoryCodePool::new(),
        ),
        StorageBackend::Mysql => {
            let (pool_dsn, mapping_dsn) = dsns(cli)?;
            let repository = MySqlRepository::connect(mapping_dsn, cli.db_max_connections)
                .await
                .context("failed to connect to the mapping database")?;
            repository.migrate().await?;
            let pool = MySqlCodePool::connect(pool_dsn, cli.db_max_connections)
                .await
                .context("failed to connect to the code pool database")?;
            pool.migrate().await?;
            assemble(cli, Arc::new(repository), pool)
        }
        StorageBackend::Postgres => {
            let (pool_dsn, mapping_dsn) = dsns(cli)?;
            let repository = PostgresRepository::connect(mapping_dsn, cli.db_max_connections)
                .await
                .context("failed to connect to the mapping database")?;
            repository.migrate().await?;
            let pool = PostgresCodePool::connect(pool_dsn, cli.db_max_connections)
                .await
                .context("failed to connect to the code pool database")?;
            pool.migrate().await?;
            assemble(cli, Arc::new(repository), pool)
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
    }
    info!("shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _telemetry = tinylink_telemetry::init(cli.telemetry_config())?;

    let services = build_services(&cli).await?;
    let state = AppState::new(
        Arc::clone(&services.shortener),
        Arc::clone(&services.redirector),
        cli.base_url.trim_end_matches('/'),
    );

    let listener = tokio::net::TcpListener::bind(cli.listen_addr).await?;
    info!(
        listen_addr = %listener.local_addr()?,
        storage = ?cli.storage,
        "starting gateway server"
    );

    axum::serve(listener, App::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    services.replenisher.shutdown().await;
    services.redirector.shutdown().await;
    info!("gateway stopped");

    Ok(())
}
