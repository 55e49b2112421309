use crate::core::events::EngineEvent;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};
use uuid::Uuid;

pub type ObserverId = Uuid;

/// Events a channel observer may have queued before it counts as stalled.
pub const CHANNEL_CAPACITY: usize = 1024;

#[derive(thiserror::Error, Debug)]
pub enum DeliveryError {
    #[error("observer disconnected")]
    Disconnected,
    #[error("observer queue is full")]
    Lagging,
    #[error("observer rejected payload: {0}")]
    Rejected(String),
}

/// A live subscriber to the event stream.
pub trait Observer: Send + Sync {
    fn deliver(&self, payload: &Arc<str>) -> Result<(), DeliveryError>;
}

/// Observer backed by a bounded channel; the receiving half is drained by
/// whatever transport owns the connection. A receiver that falls a full
/// queue behind is treated like a closed one.
pub struct ChannelObserver {
    tx: mpsc::Sender<Arc<str>>,
}

impl ChannelObserver {
    pub fn new(tx: mpsc::Sender<Arc<str>>) -> Self {
        Self { tx }
    }
}

impl Observer for ChannelObserver {
    fn deliver(&self, payload: &Arc<str>) -> Result<(), DeliveryError> {
        self.tx.try_send(payload.clone()).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryError::Lagging,
            TrySendError::Closed(_) => DeliveryError::Disconnected,
        })
    }
}

/// Fans every published event out to all current observers.
///
/// Delivery is best effort: an observer that fails is dropped from the set
/// and the others still receive the event. Nothing is buffered for
/// observers that subscribe later.
#[derive(Clone, Default)]
pub struct Broadcaster {
    observers: Arc<Mutex<HashMap<ObserverId, Arc<dyn Observer>>>>,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, observer: Arc<dyn Observer>) -> ObserverId {
        let id = Uuid::new_v4();
        self.observers.lock().insert(id, observer);
        debug!(observer = %id, "observer subscribed");
        id
    }

    pub fn subscribe_channel(&self) -> (ObserverId, mpsc::Receiver<Arc<str>>) {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let id = self.subscribe(Arc::new(ChannelObserver::new(tx)));
        (id, rx)
    }

    pub fn unsubscribe(&self, id: ObserverId) {
        if self.observers.lock().remove(&id).is_some() {
            debug!(observer = %id, "observer unsubscribed");
        }
    }

    pub fn observer_count(&self) -> usize {
        self.observers.lock().len()
    }

    pub fn publish(&self, event: &EngineEvent) {
        let payload: Arc<str> = match serde_json::to_string(event) {
            Ok(s) => s.into(),
            Err(e) => {
                warn!("failed to serialize event: {e}");
                return;
            }
        };

        let mut observers = self.observers.lock();
        let failed: Vec<ObserverId> = observers
            .iter()
            .filter_map(|(id, obs)| match obs.deliver(&payload) {
                Ok(()) => None,
                Err(e) => {
                    warn!(observer = %id, "dropping observer: {e}");
                    Some(*id)
                }
            })
            .collect();
        for id in failed {
            observers.remove(&id);
        }
    }
}
