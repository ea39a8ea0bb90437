//! List every light on the account, optionally switching some of them.
//!
//! ```text
//! RING_LIGHTING_REFRESH_TOKEN=... cargo run --example lights
//! RING_LIGHTING_REFRESH_TOKEN=... cargo run --example lights -- "Porch,Driveway" on
//! ```
//!
//! Settings come from `lighting.toml` in the working directory when present,
//! then from `RING_LIGHTING_*` environment variables.

use ring_lighting::{CommandQueue, LightingConfig, PowerState};
use std::path::Path;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ring_lighting=info".into()),
        )
        .init();

    let file = Path::new("lighting.toml");
    let config = LightingConfig::load(file.exists().then_some(file))?;
    let queue = CommandQueue::start(&config)?;

    let mut args = std::env::args().skip(1);
    let outcome = match (args.next(), args.next()) {
        (Some(names), Some(state)) => switch(&queue, &names, state.parse()?).await,
        _ => list(&queue).await,
    };

    queue.shutdown().await;
    outcome
}

async fn list(queue: &CommandQueue) -> Result<(), Box<dyn std::error::Error>> {
    let lights = queue.discover().await?;
    if lights.is_empty() {
        println!("No lights found");
    }
    for light in lights {
        println!("{:<24} {:<16} {}", light.name, light.location_name, light.id);
    }
    Ok(())
}

async fn switch(
    queue: &CommandQueue,
    names: &str,
    state: PowerState,
) -> Result<(), Box<dyn std::error::Error>> {
    let report = queue.switch(names, state).await?;
    for result in &report.results {
        let status = if result.is_success() { "ok" } else { result.kind.as_str() };
        println!("{} -> {}: {}", result.device.name, state, status);
    }
    for name in &report.unmatched {
        println!("{name}: no such light");
    }
    Ok(())
}
