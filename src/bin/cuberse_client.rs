//! Cuberse headless client
//!
//! Joins a space, synchronises its scene, optionally seeds edits from
//! `CUBERSE_CLIENT_ADD` and logs the resulting zone summary.

use std::env;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use cuberse::client::{self, parse_cube_specs, SyncState};
use cuberse::config::ClientConfig;
use cuberse::VERSION;

/// How long to wait for the initial sync
const SYNC_TIMEOUT: Duration = Duration::from_secs(30);

/// Time for relayed edits to come back before the summary
const SETTLE_TIME: Duration = Duration::from_millis(500);

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_logging();

    info!("Cuberse client v{}", VERSION);

    let config = ClientConfig::from_env()?;
    let seed = match env::var("CUBERSE_CLIENT_ADD") {
        Ok(specs) => parse_cube_specs(&specs, cuberse::zone::ZoneCoord::ORIGIN)?,
        Err(_) => Vec::new(),
    };

    info!(
        server_url = %config.server_url,
        user_id = %config.user_id,
        space_id = %config.space_id,
        "Connecting"
    );

    let (mut handle, task) = client::connect(&config).await?;

    let status = tokio::time::timeout(
        SYNC_TIMEOUT,
        handle.wait_for(|status| status.state == SyncState::Synced),
    )
    .await
    .context("Timed out waiting for the scene to sync")??;

    info!(
        is_owner = status.is_owner,
        members = status.members,
        voxels = status.voxels,
        "Scene synchronised"
    );

    if !seed.is_empty() {
        info!(cubes = seed.len(), "Placing seeded cubes");
        if let Err(e) = handle.place_model(seed).await {
            warn!(error = %e, "Seeded edit rejected");
        }
        tokio::time::sleep(SETTLE_TIME).await;
    }

    let snapshot = handle.snapshot().await?;
    let final_status = handle.status();
    info!(
        current_zone = %final_status.current_zone,
        zones = snapshot.zones.len(),
        voxels = snapshot.voxel_count(),
        members = final_status.members,
        "Zone summary"
    );
    for (zone, cubes) in &snapshot.zones {
        info!(zone = %zone, cubes = cubes.len(), "Zone");
    }

    handle.shutdown().await;
    task.await??;

    info!("Disconnected");
    Ok(())
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,cuberse=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_level(true)
        .init();
}
