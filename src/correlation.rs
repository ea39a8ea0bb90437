use crate::channel::Channel;
use crate::error::{LightingError, Result};
use crate::protocol::{CorrelationKey, Envelope};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;

/// A request waiting for its response
struct PendingRequest {
    /// Distinguishes successive registrations of the same key
    generation: u64,
    waiter: oneshot::Sender<Result<Envelope>>,
    deadline: JoinHandle<()>,
}

#[derive(Default)]
struct BrokerState {
    pending: HashMap<CorrelationKey, PendingRequest>,
    next_generation: u64,
}

/// Matches inbound channel messages to the outbound request that caused them
///
/// Each registration is settled exactly once: by the first matching
/// [`resolve`](Self::resolve), by its deadline, or by the channel going away.
/// Whoever removes the entry from the table under the lock owns delivery.
#[derive(Default)]
pub struct CorrelationBroker {
    state: Arc<Mutex<BrokerState>>,
}

/// Receiving half of a registration
#[derive(Debug)]
pub struct Waiter {
    key: CorrelationKey,
    generation: u64,
    rx: oneshot::Receiver<Result<Envelope>>,
}

impl Waiter {
    pub fn key(&self) -> &CorrelationKey {
        &self.key
    }

    /// Wait for the response, the deadline, or the channel closing
    pub async fn wait(self) -> Result<Envelope> {
        self.rx.await.unwrap_or(Err(LightingError::ConnectionClosed))
    }
}

impl CorrelationBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register interest in the response to `key`, failing after `timeout`
    ///
    /// Only one request per key may be outstanding at a time.
    pub async fn register(&self, key: CorrelationKey, timeout: Duration) -> Result<Waiter> {
        let mut state = self.state.lock().await;
        if state.pending.contains_key(&key) {
            return Err(LightingError::AlreadyPending(key.to_string()));
        }

        let generation = state.next_generation;
        state.next_generation += 1;

        let (tx, rx) = oneshot::channel();
        let deadline = tokio::spawn(expire(self.state.clone(), key.clone(), generation, timeout));
        state.pending.insert(
            key.clone(),
            PendingRequest {
                generation,
                waiter: tx,
                deadline,
            },
        );
        tracing::trace!("Registered {} (generation {})", key, generation);

        Ok(Waiter {
            key,
            generation,
            rx,
        })
    }

    /// Deliver an inbound message to the request registered under `key`
    ///
    /// Returns `false` when nothing is waiting; the message is dropped.
    pub async fn resolve(&self, key: &CorrelationKey, payload: Envelope) -> bool {
        let entry = self.state.lock().await.pending.remove(key);
        match entry {
            Some(pending) => {
                pending.deadline.abort();
                if pending.waiter.send(Ok(payload)).is_err() {
                    tracing::debug!("Waiter for {} was dropped before its response", key);
                }
                true
            }
            None => {
                tracing::warn!("No pending request registered for {}, dropping message", key);
                false
            }
        }
    }

    /// Write `envelope` on `channel` and wait for the correlated response
    ///
    /// The key is registered before writing so a fast reply cannot slip past.
    pub async fn send(
        &self,
        channel: &Channel,
        envelope: Envelope,
        timeout: Duration,
    ) -> Result<Envelope> {
        let key = CorrelationKey::new(channel.url(), envelope.msg.clone());
        let waiter = self.register(key, timeout).await?;

        if let Err(e) = channel.write(&envelope) {
            self.withdraw(&waiter).await;
            return Err(e);
        }

        waiter.wait().await
    }

    /// Fail every request outstanding on one channel
    pub async fn fail_channel(&self, channel_url: &str) {
        let mut state = self.state.lock().await;
        let keys: Vec<CorrelationKey> = state
            .pending
            .keys()
            .filter(|key| key.channel() == channel_url)
            .cloned()
            .collect();

        for key in keys {
            if let Some(pending) = state.pending.remove(&key) {
                tracing::debug!("Channel closed with {} still pending", key);
                pending.deadline.abort();
                let _ = pending.waiter.send(Err(LightingError::ConnectionClosed));
            }
        }
    }

    /// Fail every outstanding request
    pub async fn cancel_all(&self) {
        let drained: Vec<PendingRequest> = {
            let mut state = self.state.lock().await;
            state.pending.drain().map(|(_, pending)| pending).collect()
        };
        for pending in drained {
            pending.deadline.abort();
            let _ = pending.waiter.send(Err(LightingError::ConnectionClosed));
        }
    }

    /// Number of requests still waiting
    pub async fn pending(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    async fn withdraw(&self, waiter: &Waiter) {
        let mut state = self.state.lock().await;
        if state
            .pending
            .get(&waiter.key)
            .is_some_and(|p| p.generation == waiter.generation)
        {
            if let Some(pending) = state.pending.remove(&waiter.key) {
                pending.deadline.abort();
            }
        }
    }
}

async fn expire(
    state: Arc<Mutex<BrokerState>>,
    key: CorrelationKey,
    generation: u64,
    timeout: Duration,
) {
    tokio::time::sleep(timeout).await;

    let mut state = state.lock().await;
    let owned = state
        .pending
        .get(&key)
        .is_some_and(|p| p.generation == generation);
    if !owned {
        return;
    }

    if let Some(pending) = state.pending.remove(&key) {
        tracing::warn!("Timeout - no response received for {} within {:?}", key, timeout);
        let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        let _ = pending.waiter.send(Err(LightingError::Timeout { timeout_ms }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{DEVICE_LIST, DEVICE_SET};

    fn key(kind: &str) -> CorrelationKey {
        CorrelationKey::new("wss://bridge/?authcode=t", kind)
    }

    fn reply(kind: &str, seq: u64) -> Envelope {
        Envelope::new(kind, "bridge", seq)
    }

    #[tokio::test(start_paused = true)]
    async fn resolve_delivers_exactly_once() {
        let broker = CorrelationBroker::new();
        let waiter = broker
            .register(key(DEVICE_LIST), Duration::from_secs(5))
            .await
            .unwrap();

        assert!(broker.resolve(&key(DEVICE_LIST), reply(DEVICE_LIST, 1)).await);
        assert!(!broker.resolve(&key(DEVICE_LIST), reply(DEVICE_LIST, 2)).await);

        let response = waiter.wait().await.unwrap();
        assert_eq!(response.seq, Some(1));
        assert_eq!(broker.pending().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_fires_timeout_and_forgets_the_key() {
        let broker = CorrelationBroker::new();
        let waiter = broker
            .register(key(DEVICE_SET), Duration::from_millis(5000))
            .await
            .unwrap();

        let err = waiter.wait().await.unwrap_err();
        assert!(matches!(err, LightingError::Timeout { timeout_ms: 5000 }));
        assert_eq!(broker.pending().await, 0);

        // A late reply to the expired request goes nowhere
        assert!(!broker.resolve(&key(DEVICE_SET), reply(DEVICE_SET, 1)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_deadline_does_not_touch_a_newer_registration() {
        let broker = CorrelationBroker::new();
        let first = broker
            .register(key(DEVICE_SET), Duration::from_millis(100))
            .await
            .unwrap();
        assert!(first.wait().await.unwrap_err().is_timeout());

        let second = broker
            .register(key(DEVICE_SET), Duration::from_secs(60))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(broker.pending().await, 1);

        assert!(broker.resolve(&key(DEVICE_SET), reply(DEVICE_SET, 7)).await);
        assert_eq!(second.wait().await.unwrap().seq, Some(7));
    }

    #[tokio::test(start_paused = true)]
    async fn resolved_request_never_sees_its_deadline() {
        let broker = CorrelationBroker::new();
        let waiter = broker
            .register(key(DEVICE_LIST), Duration::from_millis(50))
            .await
            .unwrap();
        broker.resolve(&key(DEVICE_LIST), reply(DEVICE_LIST, 2)).await;

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(waiter.wait().await.is_ok());
    }

    #[tokio::test]
    async fn second_registration_for_a_live_key_is_rejected() {
        let broker = CorrelationBroker::new();
        let _waiter = broker
            .register(key(DEVICE_SET), Duration::from_secs(5))
            .await
            .unwrap();

        let err = broker
            .register(key(DEVICE_SET), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, LightingError::AlreadyPending(_)));

        // Other kinds on the same channel are independent
        assert!(broker
            .register(key(DEVICE_LIST), Duration::from_secs(5))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn failing_a_channel_only_affects_its_own_requests() {
        let broker = CorrelationBroker::new();
        let doomed = broker
            .register(key(DEVICE_LIST), Duration::from_secs(5))
            .await
            .unwrap();
        let other_key = CorrelationKey::new("wss://other/", DEVICE_LIST);
        let _survivor = broker
            .register(other_key, Duration::from_secs(5))
            .await
            .unwrap();

        broker.fail_channel("wss://bridge/?authcode=t").await;

        assert!(matches!(
            doomed.wait().await,
            Err(LightingError::ConnectionClosed)
        ));
        assert_eq!(broker.pending().await, 1);

        broker.cancel_all().await;
        assert_eq!(broker.pending().await, 0);
    }
}
