//! # Ledger Events
//!
//! Events the core raises towards its collaborators (gossip, API, the
//! voting oracle bridge). Delivery is synchronous per registered sink,
//! at-least-once, with best-effort ordering.

use parking_lot::Mutex;

use serde::{Deserialize, Serialize};
use shared_types::{RealityId, TransferHash};

/// All events published by the ledger core.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerEvent {
    /// A transfer was successfully booked into a reality.
    ValueTransactionReceived {
        transfer_hash: TransferHash,
        reality_id: RealityId,
    },

    /// A reality came into existence, either forked by a conflicting
    /// transfer or created explicitly.
    RealityCreated {
        reality_id: RealityId,
        parent_realities: Vec<RealityId>,
    },

    /// The external voting oracle declared a reality winning.
    Confirmed { reality_id: RealityId },
}

/// Receiver of ledger events. Implementations must tolerate duplicate
/// delivery.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: &LedgerEvent);
}

/// Sink that records every published event, for test assertions.
#[derive(Default)]
pub struct CollectingSink {
    events: Mutex<Vec<LedgerEvent>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the events published so far.
    pub fn events(&self) -> Vec<LedgerEvent> {
        self.events.lock().clone()
    }
}

impl EventSink for CollectingSink {
    fn publish(&self, event: &LedgerEvent) {
        self.events.lock().push(event.clone());
    }
}
