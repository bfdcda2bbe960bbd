//! Development server: in-memory collaborators and the token-is-identity
//! authenticator.
//!
//! Environment:
//! - `TEAMUP_BIND` (default `0.0.0.0:8080`)
//! - `TEAMUP_QUEUE_BROADCAST_SECS` (default 10)
//! - `TEAMUP_LISTENER_BUFFER` (default 256)
//! - `TEAMUP_MAX_MESSAGE_LEN` (default 2000)
//! - `RUST_LOG` (default `info,teamup=debug`)

use std::str::FromStr;
use std::time::Duration;

use teamup::prelude::*;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Reads and parses an environment variable, falling back to `default`
/// when it is unset. A value that doesn't parse is an error.
fn env_or<T: FromStr>(key: &str, default: T) -> Result<T, String>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| format!("{key}={raw:?} is invalid: {e}")),
        Err(_) => Ok(default),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,teamup=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let bind = env_or("TEAMUP_BIND", "0.0.0.0:8080".to_string())?;

    let defaults = MatchmakingConfig::default();
    let matchmaking = MatchmakingConfig {
        queue_broadcast_interval: Duration::from_secs(env_or(
            "TEAMUP_QUEUE_BROADCAST_SECS",
            defaults.queue_broadcast_interval.as_secs(),
        )?
        .max(1)),
        max_message_len: env_or("TEAMUP_MAX_MESSAGE_LEN", defaults.max_message_len)?,
        ..defaults
    };
    let bus = BusConfig {
        listener_buffer: env_or("TEAMUP_LISTENER_BUFFER", BusConfig::default().listener_buffer)?,
    };

    tracing::info!(%bind, ?matchmaking, ?bus, "starting teamup server");

    let server = TeamupServerBuilder::new()
        .bind(&bind)
        .matchmaking_config(matchmaking)
        .bus_config(bus)
        .build(
            DevAuthenticator,
            MemoryStore::new(),
            MemoryBlockList::new(),
            MemoryVoice::new(),
        )
        .await?;

    server.run().await?;
    Ok(())
}
