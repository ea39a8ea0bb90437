use crate::channel::Channel;
use crate::correlation::CorrelationBroker;
use crate::directory;
use crate::error::Result;
use crate::protocol::Envelope;
use crate::types::{Bridge, Device, PowerState, SwitchResult};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OnceCell};

type Slot = Arc<OnceCell<Arc<Channel>>>;

/// Owns at most one open channel per bridge URL
pub struct ChannelRegistry {
    broker: Arc<CorrelationBroker>,
    channels: Mutex<HashMap<String, Slot>>,
    connect_timeout: Duration,
    request_timeout: Duration,
}

impl ChannelRegistry {
    pub fn new(
        broker: Arc<CorrelationBroker>,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Self {
        Self {
            broker,
            channels: Mutex::new(HashMap::new()),
            connect_timeout,
            request_timeout,
        }
    }

    /// Open the channel for `url`, or share the one already open or opening
    ///
    /// Concurrent callers for the same URL wait on a single connect. A failed
    /// connect leaves the slot empty, so a later call tries again.
    pub async fn open_channel(&self, url: &str) -> Result<Arc<Channel>> {
        let slot = {
            let mut channels = self.channels.lock().await;
            channels.entry(url.to_string()).or_default().clone()
        };

        let channel = slot
            .get_or_try_init(|| async {
                Channel::connect(url, self.broker.clone(), self.connect_timeout)
                    .await
                    .map(Arc::new)
            })
            .await?;
        Ok(channel.clone())
    }

    /// List the lights behind one bridge
    pub async fn discover(&self, bridge: &Bridge) -> Result<Vec<Device>> {
        let channel = self.open_channel(&bridge.channel_url).await?;
        tracing::info!(
            "Sending \"discover devices\" message for location {}",
            bridge.location_name
        );
        let response = self
            .broker
            .send(
                &channel,
                Envelope::device_list(bridge.primary_id()),
                self.request_timeout,
            )
            .await?;

        let lights = directory::lights_from_response(bridge, &response);
        if lights.is_empty() {
            tracing::info!(
                "No smart lighting products found connected to the bridge at {}",
                bridge.location_name
            );
        }
        Ok(lights)
    }

    /// Send one switch command and return the bridge's answer
    pub async fn switch(&self, device: &Device, state: PowerState) -> Result<SwitchResult> {
        let channel = self.open_channel(&device.channel_url).await?;
        tracing::info!(
            "Sending \"turn {}\" payload to light/group \"{}\" id {}",
            state,
            device.name,
            device.id
        );
        let response = self
            .broker
            .send(
                &channel,
                Envelope::switch(&device.bridge_id, &device.id, state),
                self.request_timeout,
            )
            .await?;

        Ok(SwitchResult {
            device: device.clone(),
            kind: response.msg.clone(),
            response,
        })
    }

    /// Close and forget every channel, including slots that never finished opening
    pub async fn close_all(&self) {
        let slots: Vec<(String, Slot)> = self.channels.lock().await.drain().collect();
        let mut closed = 0;
        for (url, slot) in slots {
            match slot.get() {
                Some(channel) => {
                    channel.close();
                    self.broker.fail_channel(&url).await;
                    closed += 1;
                }
                None => tracing::debug!("Channel {} never opened, discarding", url),
            }
        }
        if closed > 0 {
            tracing::debug!("Closed {} channel(s)", closed);
        }
    }

    /// Number of tracked channel slots
    pub async fn len(&self) -> usize {
        self.channels.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
