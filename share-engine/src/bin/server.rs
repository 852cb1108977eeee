//! Share engine service binary
//!
//! Usage: `share-engine [config.toml]`

use prometheus::{Encoder, TextEncoder};
use share_engine::{catalog, AllocationEngine, Config, Tier};
use share_engine::metrics::Metrics;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    // Load configuration
    let config = match std::env::args().nth(1) {
        Some(path) => Config::from_file(&path)?,
        None => Config::default(),
    }
    .with_env_overrides()?;

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        "Starting share engine"
    );

    let engine = AllocationEngine::new(&config)?.with_metrics(Metrics::new()?);

    // A durable store keeps its catalog; seed only an empty one
    match &config.catalog_path {
        Some(path) if engine.catalog_len() == 0 => {
            let items = catalog::load_catalog(path)?;
            engine.seed_catalog(items)?;
        }
        _ => tracing::info!(
            items = engine.catalog_len(),
            ledger_entries = engine.ledger_entries()?.len(),
            "Catalog restored"
        ),
    }

    for tier in Tier::ALL {
        tracing::info!(
            tier = %tier,
            available = engine.available_count(Some(tier)),
            "Inventory"
        );
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down share engine");

    let reconciliations = engine.reconcile_all()?;
    let inconsistent = reconciliations
        .iter()
        .filter(|r| !r.is_consistent())
        .count();
    tracing::info!(
        accounts = reconciliations.len(),
        inconsistent,
        report = %serde_json::to_string(&reconciliations)?,
        "Reconciliation complete"
    );

    if let Some(metrics) = engine.metrics() {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&metrics.registry().gather(), &mut buffer)?;
        tracing::info!(metrics = %String::from_utf8_lossy(&buffer), "Final metrics");
    }

    Ok(())
}
