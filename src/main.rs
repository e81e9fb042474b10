//! Escrow service entry point.
//!
//! Loads the YAML config for the selected environment, wires the escrow
//! service to an in-memory listing directory and serves the webhook and
//! progress endpoints.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

use escrow_core::config::AppConfig;
use escrow_core::error::EscrowError;
use escrow_core::payment::webhook;
use escrow_core::service::{EscrowService, ListingDirectory, ListingPrice};

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

/// Get port override from command line (--port argument)
fn get_port_override() -> Option<u16> {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if args[i] == "--port" && i + 1 < args.len() {
            return args[i + 1].parse().ok();
        }
    }
    None
}

/// Standalone-mode listing directory. A real deployment implements
/// [`ListingDirectory`] against the marketplace service.
struct InMemoryDirectory {
    listings: DashMap<u64, ListingPrice>,
    locked: DashMap<u64, ()>,
}

impl InMemoryDirectory {
    fn new() -> Self {
        Self {
            listings: DashMap::new(),
            locked: DashMap::new(),
        }
    }
}

#[async_trait]
impl ListingDirectory for InMemoryDirectory {
    async fn get_listing_price(&self, listing_id: u64) -> Result<ListingPrice, EscrowError> {
        self.listings
            .get(&listing_id)
            .map(|p| p.clone())
            .ok_or_else(|| EscrowError::Validation(format!("unknown listing {}", listing_id)))
    }

    async fn get_registered_legal_name(&self, user_id: u64) -> Result<String, EscrowError> {
        Err(EscrowError::Validation(format!(
            "no registered legal name for user {}",
            user_id
        )))
    }

    async fn lock_listing(&self, listing_id: u64) -> Result<(), EscrowError> {
        self.locked.insert(listing_id, ());
        Ok(())
    }

    async fn unlock_listing(&self, listing_id: u64) -> Result<(), EscrowError> {
        self.locked.remove(&listing_id);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let app_config = AppConfig::load(&env);
    let _log_guard = escrow_core::logging::init_logging(&app_config);

    tracing::info!("Starting escrow service in {} mode", env);

    let directory = Arc::new(InMemoryDirectory::new());
    let service = Arc::new(EscrowService::new(app_config.escrow.clone(), directory)?);

    let port = get_port_override().unwrap_or(app_config.gateway.port);
    let addr = format!("{}:{}", app_config.gateway.host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, webhook::router(service)).await?;
    Ok(())
}
