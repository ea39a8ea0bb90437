//! Rust library for controlling Ring smart lighting
//!
//! Ring lights are only reachable through a bridge that speaks an
//! asynchronous, message-tagged websocket protocol. This library provides an
//! async API that:
//!
//! - Refreshes the OAuth session and persists the rotating refresh token
//! - Resolves the account's locations to bridge channels
//! - Opens one channel per bridge and correlates each response to its request
//! - Runs every discover / switch task through a single ordered queue
//!
//! # Quick Start
//!
//! ```no_run
//! use ring_lighting::{CommandQueue, LightingConfig, PowerState};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = LightingConfig::load(None)?.with_refresh_token("YOUR_REFRESH_TOKEN");
//!     let queue = CommandQueue::start(&config)?;
//!
//!     for light in queue.discover().await? {
//!         println!("Found light: {} at {}", light.name, light.location_name);
//!     }
//!
//!     let report = queue.switch("Porch,Driveway", PowerState::On).await?;
//!     if !report.is_success() {
//!         println!("Not everything switched: {:?}", report.unmatched);
//!     }
//!
//!     queue.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - **Queue**: FIFO of tasks drained by one worker
//! - **Controller**: authenticate → resolve topology → open channels → dispatch → close
//! - **Token**: session refresh and persistence
//! - **Topology**: locations and bridge tickets
//! - **Registry / Channel**: one websocket per bridge URL
//! - **Correlation**: matches responses to requests, with deadlines
//! - **Directory**: light filtering and name matching
//! - **Protocol**: envelopes and Engine.IO framing

mod channel;
mod config;
mod controller;
mod correlation;
mod directory;
mod error;
pub mod protocol;
mod queue;
mod registry;
mod token;
mod topology;
mod types;

// Public exports
pub use channel::Channel;
pub use config::LightingConfig;
pub use controller::{LightController, Stage};
pub use correlation::{CorrelationBroker, Waiter};
pub use directory::{lights_from_response, parse_names, DeviceDirectory, Selection, LIGHT_CATEGORY};
pub use error::{LightingError, Result};
pub use queue::{CommandQueue, Task, TaskOutput, TaskRunner, TaskTicket};
pub use registry::ChannelRegistry;
pub use token::{Session, StoredSession, TokenManager};
pub use topology::TopologyResolver;
pub use types::{
    Bridge, Device, DeviceId, Location, LocationId, PowerState, SwitchReport, SwitchResult,
};
