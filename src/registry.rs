use parking_lot::Mutex;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

/// Point-in-time view of the registry, served as-is by `/debug`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistrySnapshot {
    #[serde(rename = "nbTotal")]
    pub issued_count: u64,
    #[serde(rename = "nbPending")]
    pub pending_count: usize,
    #[serde(rename = "queue")]
    pub pending_ids: Vec<String>,
}

#[derive(Debug)]
struct PendingRequest {
    id: String,
    cancel: CancellationToken,
}

#[derive(Debug, Default)]
struct RegistryInner {
    total_issued: u64,
    pending: Vec<PendingRequest>,
}

/// Table of in-flight generation requests.
///
/// Every operation takes the lock once and never awaits while holding it, so
/// `issue`, `register`, `remove` and `is_pending` are each atomic with respect
/// to one another.
#[derive(Debug, Default)]
pub struct RequestRegistry {
    inner: Mutex<RegistryInner>,
}

impl RequestRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hands out the next request id. Ids are never reused.
    pub fn issue(&self) -> String {
        let mut guard = self.inner.lock();
        let id = guard.total_issued;
        guard.total_issued += 1;
        id.to_string()
    }

    /// Marks `id` as pending and returns the token cancelled on its removal.
    pub fn register(&self, id: &str) -> CancellationToken {
        let cancel = CancellationToken::new();
        let mut guard = self.inner.lock();
        guard.pending.push(PendingRequest {
            id: id.to_string(),
            cancel: cancel.clone(),
        });
        cancel
    }

    /// Drops `id` from the pending set. Returns `false` (and does nothing)
    /// when the id is empty or already gone, so every trigger may call it.
    pub fn remove(&self, id: &str, reason: &str) -> bool {
        if id.is_empty() {
            return false;
        }

        let removed = {
            let mut guard = self.inner.lock();
            let position = guard.pending.iter().position(|p| p.id == id);
            position.map(|index| guard.pending.remove(index))
        };

        match removed {
            Some(request) => {
                request.cancel.cancel();
                tracing::info!(id, reason, "request removed");
                true
            }
            None => false,
        }
    }

    pub fn is_pending(&self, id: &str) -> bool {
        let guard = self.inner.lock();
        guard.pending.iter().any(|p| p.id == id)
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        let guard = self.inner.lock();
        RegistrySnapshot {
            issued_count: guard.total_issued,
            pending_count: guard.pending.len(),
            pending_ids: guard.pending.iter().map(|p| p.id.clone()).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn issued_ids_strictly_increase() {
        let registry = RequestRegistry::new();
        let ids: Vec<u64> = (0..100)
            .map(|_| registry.issue().parse().unwrap())
            .collect();

        assert_eq!(ids[0], 0);
        assert!(ids.windows(2).all(|w| w[1] == w[0] + 1));
        assert_eq!(registry.snapshot().issued_count, 100);
    }

    #[test]
    fn ids_are_not_reused_after_removal() {
        let registry = RequestRegistry::new();
        let first = registry.issue();
        registry.register(&first);
        registry.remove(&first, "done");

        let second = registry.issue();
        assert_ne!(first, second);
        assert_eq!(second, "1");
    }

    #[test]
    fn register_then_remove_flips_pending() {
        let registry = RequestRegistry::new();
        let id = registry.issue();
        let cancel = registry.register(&id);

        assert!(registry.is_pending(&id));
        assert!(!cancel.is_cancelled());

        assert!(registry.remove(&id, "normal end of stream"));
        assert!(!registry.is_pending(&id));
        assert!(cancel.is_cancelled());
    }

    #[test]
    fn remove_is_idempotent() {
        let registry = RequestRegistry::new();
        let keep = registry.issue();
        let gone = registry.issue();
        registry.register(&keep);
        registry.register(&gone);

        assert!(registry.remove(&gone, "timed out after 900s"));
        let before = registry.snapshot();

        assert!(!registry.remove(&gone, "normal end of stream"));
        assert!(!registry.remove("", "empty"));
        assert!(!registry.remove("42", "never registered"));
        assert_eq!(registry.snapshot(), before);
        assert_eq!(before.pending_ids, vec![keep]);
    }

    #[test]
    fn snapshot_keeps_insertion_order() {
        let registry = RequestRegistry::new();
        let ids: Vec<String> = (0..4).map(|_| registry.issue()).collect();
        for id in &ids {
            registry.register(id);
        }
        registry.remove(&ids[1], "client closed connection");

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.issued_count, 4);
        assert_eq!(snapshot.pending_count, snapshot.pending_ids.len());
        assert_eq!(snapshot.pending_ids, vec!["0", "2", "3"]);
    }

    #[test]
    fn snapshot_serializes_with_wire_names() {
        let registry = RequestRegistry::new();
        let id = registry.issue();
        registry.register(&id);

        let json = serde_json::to_value(registry.snapshot()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "nbTotal": 1, "nbPending": 1, "queue": ["0"] })
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_removals_count_once() {
        let registry = Arc::new(RequestRegistry::new());
        let id = registry.issue();
        registry.register(&id);

        let timeout = {
            let registry = registry.clone();
            let id = id.clone();
            tokio::spawn(async move { registry.remove(&id, "timed out after 1s") })
        };
        let natural = {
            let registry = registry.clone();
            let id = id.clone();
            tokio::spawn(async move { registry.remove(&id, "normal end of stream") })
        };

        let (a, b) = (timeout.await.unwrap(), natural.await.unwrap());
        assert!(a ^ b, "exactly one removal must take effect");

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.issued_count, 1);
        assert_eq!(snapshot.pending_count, 0);
        assert!(snapshot.pending_ids.is_empty());
    }
}
