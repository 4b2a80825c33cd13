//! Grantor - identity-and-access token service
//!
//! Host runner: load configuration, assemble the service, probe the
//! key-value store, then park until shutdown. Exit codes: 0 on normal
//! shutdown, 1 on invalid configuration, 2 when the store is unreachable
//! at startup.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use grantor::admin::AdminService;
use grantor::cli::Cli;
use grantor::config::{Config, StoreBackend};
use grantor::pipeline::{AudienceMap, IdentityCallerBinding, TokenPipeline};
use grantor::rbac::{AccessEvaluator, RbacRepository, TableRbacRepository};
use grantor::setup_tracing;
use grantor::store::{InMemoryTable, KvAdapter, OpContext};
use grantor::token::{SystemClock, TokenProvider};

const EXIT_CONFIG_INVALID: u8 = 1;
const EXIT_STORE_UNREACHABLE: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::from(EXIT_CONFIG_INVALID);
    }

    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {e}");
            return ExitCode::from(EXIT_CONFIG_INVALID);
        }
    };

    let identities = match config.signing_identities() {
        Ok(identities) => identities,
        Err(e) => {
            error!("Failed to load signing identities: {e}");
            return ExitCode::from(EXIT_CONFIG_INVALID);
        }
    };

    let provider = match TokenProvider::new(identities, Arc::new(SystemClock)) {
        Ok(provider) => Arc::new(provider),
        Err(e) => {
            error!("Failed to build token provider: {e}");
            return ExitCode::from(EXIT_CONFIG_INVALID);
        }
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        region = %config.rbac.region,
        table = %config.rbac.table_name,
        identities = provider.verification_keys().len(),
        "Starting grantor"
    );

    let table = match config.rbac.store {
        StoreBackend::Memory => Arc::new(InMemoryTable::new()),
    };
    let adapter = KvAdapter::new(table)
        .with_retry(config.retry.policy())
        .with_call_overhead(config.deadline.call_overhead);

    // Fail fast when the table is unreachable rather than on the first
    // request.
    if let Err(e) = adapter.probe(&OpContext::detached()).await {
        error!("Key-value store unreachable: {e}");
        return ExitCode::from(EXIT_STORE_UNREACHABLE);
    }

    let repository: Arc<dyn RbacRepository> = Arc::new(TableRbacRepository::new(adapter));
    let admin = AdminService::new(repository.clone());
    let pipeline = TokenPipeline::new(
        Arc::new(IdentityCallerBinding),
        AccessEvaluator::new(repository),
        provider,
        AudienceMap::new(config.audiences.clone()),
    );
    // The transport host mounts these two surfaces; the runner keeps them
    // alive until shutdown.
    let _surfaces = (admin, pipeline);

    info!("Grantor ready; waiting for shutdown signal");

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {e}");
        return ExitCode::from(EXIT_CONFIG_INVALID);
    }

    info!("Grantor shutdown complete");
    ExitCode::SUCCESS
}
