use std::sync::Arc;

use tokio::sync::watch;

/// Leadership capability backed by an external election mechanism.
///
/// `is_leader` is answered from current state on every call, never cached by
/// the caller.
pub trait LeaderElector: Send + Sync + 'static {
    /// Whether this instance currently holds leadership.
    fn is_leader(&self) -> bool;

    /// Receiver that observes every leadership change.
    fn subscribe(&self) -> watch::Receiver<bool>;
}

/// Leadership flag updated by whichever mechanism runs the election.
#[derive(Debug, Clone)]
pub struct LeadershipFlag {
    tx: Arc<watch::Sender<bool>>,
}

impl LeadershipFlag {
    /// Create a flag with the given initial state.
    pub fn new(is_leader: bool) -> Self {
        let (tx, _) = watch::channel(is_leader);
        Self { tx: Arc::new(tx) }
    }

    /// Record a leadership change. Returns true if the value changed.
    pub fn set(&self, is_leader: bool) -> bool {
        self.tx.send_if_modified(|current| {
            if *current == is_leader {
                false
            } else {
                *current = is_leader;
                true
            }
        })
    }
}

impl Default for LeadershipFlag {
    fn default() -> Self {
        Self::new(false)
    }
}

impl LeaderElector for LeadershipFlag {
    fn is_leader(&self) -> bool {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}
