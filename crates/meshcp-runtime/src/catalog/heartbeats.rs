use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

use meshcp_core::Instance;

/// Instances that pinged the leader since the last collection.
///
/// An instance stays alive for exactly one writer interval after its last
/// ping; there is no per-entry expiry.
#[derive(Debug, Default)]
pub struct Heartbeats {
    instances: Mutex<HashSet<Instance>>,
}

impl Heartbeats {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a heartbeat. Keyed by full value equality.
    pub fn add(&self, instance: Instance) {
        self.lock().insert(instance);
    }

    /// Forget an instance that announced it is going away.
    pub fn remove(&self, instance: &Instance) {
        self.lock().remove(instance);
    }

    /// Swap in an empty set and return everything that was recorded.
    pub fn reset_and_collect(&self) -> Vec<Instance> {
        std::mem::take(&mut *self.lock()).into_iter().collect()
    }

    /// Number of instances recorded since the last collection.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Check if nothing was recorded since the last collection.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // Each critical section is a single set operation; the set stays
    // consistent after a panic while the lock is held.
    fn lock(&self) -> MutexGuard<'_, HashSet<Instance>> {
        self.instances.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Heartbeat set lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_collect_is_a_true_reset() {
        let heartbeats = Heartbeats::new();
        let a = Instance::new("a", "10.0.0.1", 5683);
        let b = Instance::new("b", "10.0.0.2", 5683);

        heartbeats.add(a.clone());
        heartbeats.add(b.clone());

        let mut collected = heartbeats.reset_and_collect();
        collected.sort_by(|x, y| x.id.cmp(&y.id));
        assert_eq!(collected, vec![a, b]);

        assert!(heartbeats.reset_and_collect().is_empty());
    }

    #[test]
    fn test_repeated_add_is_deduplicated() {
        let heartbeats = Heartbeats::new();
        let a = Instance::new("a", "10.0.0.1", 5683);
        heartbeats.add(a.clone());
        heartbeats.add(a);
        assert_eq!(heartbeats.len(), 1);
    }

    #[test]
    fn test_remove() {
        let heartbeats = Heartbeats::new();
        let a = Instance::new("a", "10.0.0.1", 5683);
        heartbeats.add(a.clone());
        heartbeats.remove(&a);
        assert!(heartbeats.is_empty());
    }

    #[test]
    fn test_remove_requires_matching_leader_flag() {
        let heartbeats = Heartbeats::new();
        let a = Instance::new("a", "10.0.0.1", 5683);
        heartbeats.add(a.clone());
        heartbeats.remove(&a.as_leader());
        assert_eq!(heartbeats.len(), 1);
    }

    #[test]
    fn test_survives_poisoned_lock() {
        let heartbeats = Arc::new(Heartbeats::new());
        let a = Instance::new("a", "10.0.0.1", 5683);
        heartbeats.add(a.clone());

        let poisoner = heartbeats.clone();
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.instances.lock().unwrap();
            panic!("poison the heartbeat lock");
        })
        .join();
        assert!(heartbeats.instances.is_poisoned());

        let b = Instance::new("b", "10.0.0.2", 5683);
        heartbeats.add(b.clone());
        assert_eq!(heartbeats.len(), 2);

        let mut collected = heartbeats.reset_and_collect();
        collected.sort_by(|x, y| x.id.cmp(&y.id));
        assert_eq!(collected, vec![a, b]);
        assert!(heartbeats.is_empty());
    }

    #[test]
    fn test_concurrent_adds() {
        let heartbeats = Arc::new(Heartbeats::new());
        let handles: Vec<_> = (0..8)
            .map(|n| {
                let heartbeats = heartbeats.clone();
                std::thread::spawn(move || {
                    for i in 0..50 {
                        heartbeats.add(Instance::new(format!("cp-{}-{}", n, i), "10.0.0.1", 5683));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(heartbeats.reset_and_collect().len(), 400);
        assert!(heartbeats.is_empty());
    }
}
