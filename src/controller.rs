use crate::config::LightingConfig;
use crate::correlation::CorrelationBroker;
use crate::directory::DeviceDirectory;
use crate::error::{LightingError, Result};
use crate::registry::ChannelRegistry;
use crate::token::TokenManager;
use crate::topology::TopologyResolver;
use crate::types::{Device, PowerState, SwitchReport, SwitchResult};
use futures_util::future::try_join_all;
use std::sync::Arc;

/// Pipeline stage of the task currently being run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    Authenticating,
    ResolvingTopology,
    OpeningChannels,
    Dispatching,
    Closing,
    Done,
    Failed,
}

/// Runs the authenticate → resolve → open → dispatch → close pipeline
///
/// Owns the session, the channel table and the correlation table. Methods
/// take `&mut self`, so one controller runs one task at a time; the
/// [`CommandQueue`](crate::CommandQueue) is the intended owner.
pub struct LightController {
    tokens: TokenManager,
    topology: TopologyResolver,
    registry: ChannelRegistry,
    broker: Arc<CorrelationBroker>,
    stage: Stage,
}

impl LightController {
    /// Build a controller from configuration, seeding the session from storage
    pub fn new(config: &LightingConfig) -> Result<Self> {
        let http = config.http_client()?;
        let broker = Arc::new(CorrelationBroker::new());

        Ok(Self {
            tokens: TokenManager::load(config, http.clone())?,
            topology: TopologyResolver::new(config, http),
            registry: ChannelRegistry::new(
                broker.clone(),
                config.connect_timeout(),
                config.request_timeout(),
            ),
            broker,
            stage: Stage::Idle,
        })
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn tokens(&self) -> &TokenManager {
        &self.tokens
    }

    pub fn registry(&self) -> &ChannelRegistry {
        &self.registry
    }

    /// Discover every light on the account
    pub async fn discover_devices(&mut self) -> Result<Vec<Device>> {
        let outcome = self
            .collect_devices()
            .await
            .map(DeviceDirectory::into_devices);
        self.finish(outcome).await
    }

    /// Switch the named light(s) on or off
    ///
    /// `names` is a single name or a comma-separated list, matched without
    /// regard to case. Names that match nothing are listed in the report;
    /// the task fails with `NotFound` only when no name matches.
    pub async fn switch(&mut self, names: &str, state: PowerState) -> Result<SwitchReport> {
        let outcome = self.switch_pipeline(names, state).await;
        self.finish(outcome).await
    }

    /// Close every channel; used when the owning queue shuts down
    pub async fn shutdown(&mut self) {
        self.registry.close_all().await;
        self.broker.cancel_all().await;
        self.stage = Stage::Idle;
    }

    async fn switch_pipeline(&mut self, names: &str, state: PowerState) -> Result<SwitchReport> {
        let directory = self.collect_devices().await?;
        let selection = directory.select(names)?;
        if !selection.unmatched.is_empty() {
            tracing::warn!(
                "No light or group named {}; switching the rest",
                selection.unmatched.join(", ")
            );
        }

        self.enter(Stage::Dispatching);

        // One DeviceInfoSet in flight per channel: the correlation key cannot
        // tell two of them apart.
        let mut per_channel: Vec<(&str, Vec<&Device>)> = Vec::new();
        for device in &selection.devices {
            match per_channel
                .iter_mut()
                .find(|(url, _)| *url == device.channel_url)
            {
                Some((_, devices)) => devices.push(device),
                None => per_channel.push((device.channel_url.as_str(), vec![device])),
            }
        }

        let registry = &self.registry;
        let batches = try_join_all(per_channel.into_iter().map(|(_, devices)| async move {
            let mut results: Vec<SwitchResult> = Vec::with_capacity(devices.len());
            for device in devices {
                results.push(registry.switch(device, state).await?);
            }
            Ok::<_, LightingError>(results)
        }))
        .await?;

        Ok(SwitchReport {
            results: batches.into_iter().flatten().collect(),
            unmatched: selection.unmatched,
        })
    }

    async fn collect_devices(&mut self) -> Result<DeviceDirectory> {
        self.enter(Stage::Authenticating);
        let access_token = self.tokens.ensure_token().await?;

        self.enter(Stage::ResolvingTopology);
        let bridges = self.topology.resolve(&access_token).await?;

        self.enter(Stage::OpeningChannels);
        try_join_all(
            bridges
                .iter()
                .map(|bridge| self.registry.open_channel(&bridge.channel_url)),
        )
        .await?;

        self.enter(Stage::Dispatching);
        let per_bridge =
            try_join_all(bridges.iter().map(|bridge| self.registry.discover(bridge))).await?;

        let directory = DeviceDirectory::from_bridges(per_bridge);
        tracing::info!("Discovered {} light(s)", directory.devices().len());
        Ok(directory)
    }

    async fn finish<T>(&mut self, outcome: Result<T>) -> Result<T> {
        self.enter(Stage::Closing);
        self.registry.close_all().await;

        match &outcome {
            Ok(_) => self.enter(Stage::Done),
            Err(e) => {
                tracing::warn!("Task failed: {}", e);
                self.enter(Stage::Failed);
            }
        }
        outcome
    }

    fn enter(&mut self, stage: Stage) {
        tracing::info!("{:?} -> {:?}", self.stage, stage);
        self.stage = stage;
    }
}
