//! Cross-context change signaling.
//!
//! A mutation that settles publishes a `ChangeSignal` naming the entity
//! class that changed, never a payload diff. Subscribers in the same
//! process receive it over a broadcast channel; other execution contexts
//! (other tabs, other views) are reached through pluggable transports
//! that carry the serialized signal, and feed what they hear back in
//! through `ingest`. Every receiver invalidates and refetches on its own.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use metrics::counter;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::domain::types::EntityClass;

use super::lock::{mutex_lock, rw_read, rw_write};

const SOURCE: &str = "cache::signal";

const METRIC_SIGNAL_PUBLISHED: &str = "piatto_signal_published_total";
const METRIC_SIGNAL_DROPPED: &str = "piatto_signal_dropped_total";

/// The only thing that crosses context boundaries: which entity class
/// changed, and when. Receivers decide for themselves what to refetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeSignal {
    pub class: EntityClass,
    /// Monotonic within the publishing hub; lets a receiver drop
    /// duplicates and reordered deliveries from the same producer.
    pub epoch: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub at: OffsetDateTime,
}

impl ChangeSignal {
    /// Wire encoding for out-of-process transports.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

/// One way out of this process. A storage-event bridge and a WebSocket
/// fan-out are both just transports.
pub trait SignalTransport: Send + Sync {
    fn forward(&self, signal: &ChangeSignal);
}

/// Publishes change signals to in-process subscribers and to every
/// attached transport, and deduplicates what comes back in.
pub struct SignalHub {
    sender: broadcast::Sender<ChangeSignal>,
    epoch: AtomicU64,
    seen: Mutex<HashMap<EntityClass, (OffsetDateTime, u64)>>,
    transports: RwLock<Vec<Arc<dyn SignalTransport>>>,
}

impl SignalHub {
    pub fn new(capacity: NonZeroUsize) -> Self {
        let (sender, _) = broadcast::channel(capacity.get());
        Self {
            sender,
            epoch: AtomicU64::new(0),
            seen: Mutex::new(HashMap::new()),
            transports: RwLock::new(Vec::new()),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeSignal> {
        self.sender.subscribe()
    }

    pub fn attach_transport(&self, transport: Arc<dyn SignalTransport>) {
        rw_write(&self.transports, SOURCE, "attach_transport").push(transport);
    }

    /// Announce that an entity class changed.
    ///
    /// Local subscribers hear it over the broadcast channel; transports
    /// carry it to other contexts. The hub's own signals are recorded so
    /// that a transport echoing them back is dropped by `ingest`.
    pub fn publish(&self, class: EntityClass) -> ChangeSignal {
        let signal = ChangeSignal {
            class,
            epoch: self.epoch.fetch_add(1, Ordering::SeqCst) + 1,
            at: OffsetDateTime::now_utc(),
        };
        mutex_lock(&self.seen, SOURCE, "publish").insert(class, (signal.at, signal.epoch));

        info!(
            class = %signal.class,
            epoch = signal.epoch,
            "Change signal published"
        );
        counter!(METRIC_SIGNAL_PUBLISHED).increment(1);

        // No receivers is fine; subscribers come and go.
        let _ = self.sender.send(signal.clone());
        for transport in rw_read(&self.transports, SOURCE, "publish").iter() {
            transport.forward(&signal);
        }
        signal
    }

    /// Feed in a signal received from another context.
    ///
    /// Returns whether the signal was fresh. Fresh signals are
    /// rebroadcast to local subscribers (but not to transports, to keep
    /// echoes from looping); stale and duplicate ones are dropped.
    pub fn ingest(&self, signal: &ChangeSignal) -> bool {
        let mut seen = mutex_lock(&self.seen, SOURCE, "ingest");
        let newer = match seen.get(&signal.class) {
            Some(&(at, epoch)) => (signal.at, signal.epoch) > (at, epoch),
            None => true,
        };
        if !newer {
            debug!(
                class = %signal.class,
                epoch = signal.epoch,
                "Duplicate change signal dropped"
            );
            counter!(METRIC_SIGNAL_DROPPED).increment(1);
            return false;
        }
        seen.insert(signal.class, (signal.at, signal.epoch));
        drop(seen);

        let _ = self.sender.send(signal.clone());
        true
    }
}
