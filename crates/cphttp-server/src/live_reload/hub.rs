//! Notification hub.
//!
//! A single actor task owns the subscriber set. Subscribe, unsubscribe and
//! broadcast requests arrive as messages, so a broadcast never races a
//! concurrent subscribe and no lock is held while delivering.

use std::collections::HashMap;
use std::time::Duration;

use cphttp_watch::ChangeSignal;
use tokio::sync::mpsc::error::{SendTimeoutError, TrySendError};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Unique subscriber identifier.
pub type SubscriberId = Uuid;

/// Hub tuning.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HubConfig {
    /// Signals buffered per subscriber before delivery has to wait.
    pub queue_capacity: usize,
    /// How long a broadcast waits on a full queue before dropping the
    /// subscriber.
    pub delivery_timeout: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 16,
            delivery_timeout: Duration::from_secs(1),
        }
    }
}

/// The hub task has stopped.
#[derive(Debug, thiserror::Error)]
#[error("Notification hub is closed")]
pub struct HubClosed;

/// Why a subscriber was dropped during broadcast.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub(crate) enum DeliveryError {
    #[error("subscriber disconnected")]
    Disconnected,
    #[error("subscriber queue stayed full past the delivery timeout")]
    Timeout,
}

enum Command {
    Subscribe {
        reply: oneshot::Sender<(SubscriberId, mpsc::Receiver<ChangeSignal>)>,
    },
    Unsubscribe(SubscriberId),
    Broadcast(ChangeSignal),
    Count(oneshot::Sender<usize>),
}

/// Cloneable handle to the hub actor.
#[derive(Clone, Debug)]
pub struct NotificationHub {
    commands: mpsc::UnboundedSender<Command>,
}

impl NotificationHub {
    /// Spawn the hub actor on the current runtime.
    ///
    /// The actor stops when `cancel` fires or every hub handle is dropped.
    /// Stopping drops every subscriber queue, which ends their streams.
    pub fn spawn(config: HubConfig, cancel: CancellationToken) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let actor = HubActor {
            config,
            commands: rx,
            subscribers: HashMap::new(),
        };
        let task = tokio::spawn(actor.run(cancel));
        (Self { commands: tx }, task)
    }

    /// Register a new subscriber.
    ///
    /// Dropping the returned handle unsubscribes it.
    ///
    /// # Errors
    ///
    /// Returns [`HubClosed`] if the hub has stopped.
    pub async fn subscribe(&self) -> Result<SubscriberHandle, HubClosed> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Subscribe { reply })
            .map_err(|_| HubClosed)?;
        let (id, signals) = response.await.map_err(|_| HubClosed)?;
        Ok(SubscriberHandle {
            id,
            signals,
            hub: self.clone(),
        })
    }

    /// Remove a subscriber. Unknown or already removed ids are ignored.
    pub fn unsubscribe(&self, id: SubscriberId) {
        let _ = self.commands.send(Command::Unsubscribe(id));
    }

    /// Deliver `signal` to every current subscriber.
    ///
    /// Returns immediately; delivery happens on the hub task.
    pub fn broadcast(&self, signal: ChangeSignal) {
        if self.commands.send(Command::Broadcast(signal)).is_err() {
            tracing::debug!("Dropping change signal, hub is closed");
        }
    }

    /// Number of connected subscribers (0 once the hub has stopped).
    pub async fn subscriber_count(&self) -> usize {
        let (reply, response) = oneshot::channel();
        if self.commands.send(Command::Count(reply)).is_err() {
            return 0;
        }
        response.await.unwrap_or(0)
    }
}

/// One connected subscriber's end of the hub.
#[derive(Debug)]
pub struct SubscriberHandle {
    id: SubscriberId,
    signals: mpsc::Receiver<ChangeSignal>,
    hub: NotificationHub,
}

impl SubscriberHandle {
    /// Subscriber identifier.
    #[must_use]
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Wait for the next signal.
    ///
    /// Returns `None` once the hub has dropped this subscriber (delivery
    /// failure or shutdown).
    pub async fn recv(&mut self) -> Option<ChangeSignal> {
        self.signals.recv().await
    }
}

impl Drop for SubscriberHandle {
    fn drop(&mut self) {
        self.hub.unsubscribe(self.id);
    }
}

struct Subscriber {
    tx: mpsc::Sender<ChangeSignal>,
    delivered: u64,
}

struct HubActor {
    config: HubConfig,
    commands: mpsc::UnboundedReceiver<Command>,
    subscribers: HashMap<SubscriberId, Subscriber>,
}

impl HubActor {
    async fn run(mut self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                biased;

                () = cancel.cancelled() => break,

                command = self.commands.recv() => {
                    let Some(command) = command else { break };
                    self.handle(command).await;
                }
            }
        }

        tracing::debug!(
            subscribers = self.subscribers.len(),
            "Notification hub stopped, disconnecting subscribers"
        );
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Subscribe { reply } => {
                let id = Uuid::new_v4();
                let (tx, rx) = mpsc::channel(self.config.queue_capacity);
                // Caller gave up waiting: nothing to register
                if reply.send((id, rx)).is_ok() {
                    self.subscribers.insert(id, Subscriber { tx, delivered: 0 });
                    tracing::debug!(
                        subscriber = %id,
                        subscribers = self.subscribers.len(),
                        "Subscriber connected"
                    );
                }
            }
            Command::Unsubscribe(id) => {
                if let Some(subscriber) = self.subscribers.remove(&id) {
                    tracing::debug!(
                        subscriber = %id,
                        delivered = subscriber.delivered,
                        subscribers = self.subscribers.len(),
                        "Subscriber disconnected"
                    );
                }
            }
            Command::Broadcast(signal) => self.broadcast(&signal).await,
            Command::Count(reply) => {
                let _ = reply.send(self.subscribers.len());
            }
        }
    }

    async fn broadcast(&mut self, signal: &ChangeSignal) {
        let timeout = self.config.delivery_timeout;

        // Stalled subscribers wait out their timeouts together
        let deliveries = self.subscribers.iter().map(|(id, subscriber)| async move {
            (*id, deliver(&subscriber.tx, signal, timeout).await)
        });
        let results = futures::future::join_all(deliveries).await;

        let mut dropped = Vec::new();
        for (id, result) in results {
            match result {
                Ok(()) => {
                    if let Some(subscriber) = self.subscribers.get_mut(&id) {
                        subscriber.delivered += 1;
                    }
                }
                Err(e) => dropped.push((id, e)),
            }
        }

        for (id, reason) in &dropped {
            self.subscribers.remove(id);
            match reason {
                DeliveryError::Disconnected => {
                    tracing::debug!(subscriber = %id, "Subscriber gone, removing");
                }
                DeliveryError::Timeout => {
                    tracing::warn!(subscriber = %id, error = %reason, "Dropping stalled subscriber");
                }
            }
        }

        tracing::info!(
            paths = signal.changes().len(),
            delivered = self.subscribers.len(),
            dropped = dropped.len(),
            "Broadcast reload"
        );
    }
}

/// Deliver one signal, waiting at most `timeout` on a full queue.
async fn deliver(
    tx: &mpsc::Sender<ChangeSignal>,
    signal: &ChangeSignal,
    timeout: Duration,
) -> Result<(), DeliveryError> {
    match tx.try_send(signal.clone()) {
        Ok(()) => Ok(()),
        Err(TrySendError::Closed(_)) => Err(DeliveryError::Disconnected),
        Err(TrySendError::Full(signal)) => {
            tx.send_timeout(signal, timeout).await.map_err(|e| match e {
                SendTimeoutError::Timeout(_) => DeliveryError::Timeout,
                SendTimeoutError::Closed(_) => DeliveryError::Disconnected,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cphttp_watch::ChangeKind;
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    fn signal(path: &str) -> ChangeSignal {
        let mut changes = BTreeMap::new();
        changes.insert(PathBuf::from(path), ChangeKind::Modified);
        ChangeSignal::new(changes, 1)
    }

    fn spawn_hub(queue_capacity: usize) -> (NotificationHub, CancellationToken) {
        let cancel = CancellationToken::new();
        let (hub, _task) = NotificationHub::spawn(
            HubConfig {
                queue_capacity,
                delivery_timeout: Duration::from_millis(50),
            },
            cancel.clone(),
        );
        (hub, cancel)
    }

    async fn recv_now(handle: &mut SubscriberHandle) -> Option<ChangeSignal> {
        tokio::time::timeout(Duration::from_secs(1), handle.recv())
            .await
            .expect("timed out waiting for signal")
    }

    #[tokio::test]
    async fn test_broadcast_reaches_all_subscribers() {
        let (hub, _cancel) = spawn_hub(4);
        let mut a = hub.subscribe().await.unwrap();
        let mut b = hub.subscribe().await.unwrap();

        hub.broadcast(signal("/site/index.html"));

        assert_eq!(recv_now(&mut a).await, Some(signal("/site/index.html")));
        assert_eq!(recv_now(&mut b).await, Some(signal("/site/index.html")));
        assert_ne!(a.id(), b.id());
    }

    #[tokio::test]
    async fn test_signals_arrive_in_order() {
        let (hub, _cancel) = spawn_hub(4);
        let mut a = hub.subscribe().await.unwrap();

        hub.broadcast(signal("/site/1.html"));
        hub.broadcast(signal("/site/2.html"));

        assert_eq!(recv_now(&mut a).await, Some(signal("/site/1.html")));
        assert_eq!(recv_now(&mut a).await, Some(signal("/site/2.html")));
    }

    #[tokio::test]
    async fn test_stalled_subscriber_is_isolated() {
        let (hub, _cancel) = spawn_hub(1);
        let mut a = hub.subscribe().await.unwrap();
        let mut b = hub.subscribe().await.unwrap();
        let mut c = hub.subscribe().await.unwrap();

        // Fill every queue; only A and C drain theirs
        hub.broadcast(signal("/site/first.html"));
        assert!(recv_now(&mut a).await.is_some());
        assert!(recv_now(&mut c).await.is_some());

        // B's queue is still full, so this delivery to B times out
        hub.broadcast(signal("/site/second.html"));

        assert_eq!(recv_now(&mut a).await, Some(signal("/site/second.html")));
        assert_eq!(recv_now(&mut c).await, Some(signal("/site/second.html")));
        assert_eq!(hub.subscriber_count().await, 2);

        // B keeps what was queued, then sees the disconnect
        assert_eq!(recv_now(&mut b).await, Some(signal("/site/first.html")));
        assert_eq!(recv_now(&mut b).await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_subscribers_time_out_together() {
        let (hub, _cancel) = spawn_hub(1);
        let stalled = [
            hub.subscribe().await.unwrap(),
            hub.subscribe().await.unwrap(),
            hub.subscribe().await.unwrap(),
        ];
        hub.broadcast(signal("/site/first.html"));
        assert_eq!(hub.subscriber_count().await, 3);

        let start = tokio::time::Instant::now();
        hub.broadcast(signal("/site/second.html"));

        assert_eq!(hub.subscriber_count().await, 0);
        assert!(start.elapsed() < Duration::from_millis(100));
        drop(stalled);
    }

    #[tokio::test]
    async fn test_deliver_reports_disconnect() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);

        let result = deliver(&tx, &signal("/site/index.html"), Duration::from_millis(10)).await;

        assert_eq!(result, Err(DeliveryError::Disconnected));
    }

    #[tokio::test]
    async fn test_deliver_times_out_on_full_queue() {
        let (tx, _rx) = mpsc::channel(1);
        deliver(&tx, &signal("/site/a.html"), Duration::from_millis(10))
            .await
            .unwrap();

        let result = deliver(&tx, &signal("/site/b.html"), Duration::from_millis(10)).await;

        assert_eq!(result, Err(DeliveryError::Timeout));
    }

    #[tokio::test]
    async fn test_dropped_subscriber_does_not_block_others() {
        let (hub, _cancel) = spawn_hub(4);
        let mut a = hub.subscribe().await.unwrap();
        let b = hub.subscribe().await.unwrap();

        drop(b);
        hub.broadcast(signal("/site/index.html"));

        assert_eq!(recv_now(&mut a).await, Some(signal("/site/index.html")));
        assert_eq!(hub.subscriber_count().await, 1);
    }

    #[tokio::test]
    async fn test_unsubscribe_is_idempotent() {
        let (hub, _cancel) = spawn_hub(4);
        let handle = hub.subscribe().await.unwrap();
        let id = handle.id();
        assert_eq!(hub.subscriber_count().await, 1);

        hub.unsubscribe(id);
        hub.unsubscribe(id);
        drop(handle);

        assert_eq!(hub.subscriber_count().await, 0);
    }

    #[tokio::test]
    async fn test_drop_unsubscribes() {
        let (hub, _cancel) = spawn_hub(4);
        let handle = hub.subscribe().await.unwrap();
        assert_eq!(hub.subscriber_count().await, 1);

        drop(handle);

        assert_eq!(hub.subscriber_count().await, 0);
    }

    #[tokio::test]
    async fn test_removed_subscriber_gets_nothing_more() {
        let (hub, _cancel) = spawn_hub(4);
        let mut a = hub.subscribe().await.unwrap();

        hub.unsubscribe(a.id());
        hub.broadcast(signal("/site/index.html"));

        assert_eq!(recv_now(&mut a).await, None);
    }

    #[tokio::test]
    async fn test_shutdown_ends_subscriptions() {
        let (hub, cancel) = spawn_hub(4);
        let mut a = hub.subscribe().await.unwrap();

        cancel.cancel();

        assert_eq!(recv_now(&mut a).await, None);
        assert!(hub.subscribe().await.is_err());
        assert_eq!(hub.subscriber_count().await, 0);
    }
}
