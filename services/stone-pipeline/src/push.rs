use tokio::sync::broadcast;

/// One notification on the push bus. Subscribers see these strictly after
/// the handler's transaction has committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushEvent {
    MarketUpdated { market_id: String },
    PositionUpdated { user_address: String },
    NewTransaction { market_id: String },
}

/// In-process topic publisher (C7). A single broadcast channel carries all
/// three topics; subscribers filter by variant. Delivery is best-effort:
/// a lagging subscriber drops the oldest events rather than blocking the
/// block processor (`tokio::sync::broadcast`'s native behavior).
#[derive(Clone)]
pub struct PushBus {
    sender: broadcast::Sender<PushEvent>,
}

impl PushBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PushEvent> {
        self.sender.subscribe()
    }

    /// Publish, ignoring the "no active subscribers" error — the bus has
    /// no required listeners.
    pub fn publish(&self, event: PushEvent) {
        let _ = self.sender.send(event);
    }
}

impl Default for PushBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
