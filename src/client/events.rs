// src/client/events.rs

//! Completion events between module pages and the result aggregator.
//!
//! Events travel over a broadcast channel. When the publisher lives in another
//! process sharing the same store, [`spawn_store_poller`] watches the store
//! instead and republishes what it finds.

use std::{collections::BTreeSet, sync::Arc, time::Duration};

use tokio::{
    sync::{broadcast, watch},
    task::JoinHandle,
};

use super::store::{SessionStore, keys};
use crate::exam::ModuleId;

pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(250);
pub const MAX_POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExamEvent {
    ModuleCompleted { session_id: String, module: ModuleId },
    ExamTerminated { session_id: String, violations: u32 },
    ExamSubmitted { session_id: String },
    /// A stored session was picked up again after a reload.
    SessionResumed { session_id: String },
}

/// Fan-out of [`ExamEvent`]s. Cloning shares the channel.
#[derive(Debug, Clone)]
pub struct CompletionBus {
    tx: broadcast::Sender<ExamEvent>,
}

impl Default for CompletionBus {
    fn default() -> Self {
        Self::new(64)
    }
}

impl CompletionBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publishes to current subscribers; returns how many there were.
    pub fn publish(&self, event: ExamEvent) -> usize {
        tracing::debug!(?event, "exam event");
        self.tx.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExamEvent> {
        self.tx.subscribe()
    }
}

pub fn clamp_poll_interval(interval: Duration) -> Duration {
    interval.clamp(MIN_POLL_INTERVAL, MAX_POLL_INTERVAL)
}

/// Polls the store for interim module results and publishes a
/// `ModuleCompleted` event the first time each one appears.
///
/// Stops when `cancel` turns true or its sender is dropped.
pub fn spawn_store_poller(
    store: Arc<dyn SessionStore>,
    bus: CompletionBus,
    session_id: String,
    exam_id: String,
    interval: Duration,
    mut cancel: watch::Receiver<bool>,
) -> JoinHandle<()> {
    let interval = clamp_poll_interval(interval);
    tokio::spawn(async move {
        let mut seen = BTreeSet::new();
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                changed = cancel.changed() => {
                    if changed.is_err() || *cancel.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    for module in ModuleId::ORDER {
                        if seen.contains(&module) {
                            continue;
                        }
                        match store.get(&keys::result(&exam_id, module)) {
                            Ok(Some(_)) => {
                                seen.insert(module);
                                bus.publish(ExamEvent::ModuleCompleted {
                                    session_id: session_id.clone(),
                                    module,
                                });
                            }
                            Ok(None) => {}
                            Err(e) => tracing::warn!(%e, "store poll failed"),
                        }
                    }
                    if seen.len() == ModuleId::ORDER.len() {
                        break;
                    }
                }
            }
        }
        tracing::debug!(%session_id, "store poller stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::store::MemoryStore;
    use serde_json::json;

    #[test]
    fn poll_interval_is_bounded() {
        assert_eq!(clamp_poll_interval(Duration::ZERO), MIN_POLL_INTERVAL);
        assert_eq!(clamp_poll_interval(Duration::from_secs(60)), MAX_POLL_INTERVAL);
        assert_eq!(
            clamp_poll_interval(Duration::from_secs(1)),
            Duration::from_secs(1)
        );
    }

    #[tokio::test]
    async fn bus_delivers_to_every_subscriber() {
        let bus = CompletionBus::default();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();
        let event = ExamEvent::ExamSubmitted {
            session_id: "s-1".to_string(),
        };
        assert_eq!(bus.publish(event.clone()), 2);
        assert_eq!(a.recv().await.unwrap(), event);
        assert_eq!(b.recv().await.unwrap(), event);
    }

    #[tokio::test(start_paused = true)]
    async fn poller_reports_results_written_by_others() {
        let store: Arc<dyn SessionStore> = Arc::new(MemoryStore::new());
        let bus = CompletionBus::default();
        let mut rx = bus.subscribe();
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let handle = spawn_store_poller(
            store.clone(),
            bus.clone(),
            "s-1".to_string(),
            "BAC2500123".to_string(),
            Duration::from_millis(10),
            cancel_rx,
        );

        store
            .set(&keys::result("BAC2500123", ModuleId::Listening), json!({}))
            .unwrap();
        assert_eq!(
            rx.recv().await.unwrap(),
            ExamEvent::ModuleCompleted {
                session_id: "s-1".to_string(),
                module: ModuleId::Listening,
            }
        );

        cancel_tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
