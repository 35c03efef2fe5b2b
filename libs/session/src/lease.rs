use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Per-address mutual exclusion for job processing.
///
/// Two messages from the same sender processed by concurrent workers would
/// otherwise race on the session's read-modify-write cycle and silently lose
/// one transition. A worker takes the lease before reading the session and
/// holds it until the updated state is persisted. Jobs for different
/// addresses never contend.
#[derive(Default)]
pub struct SessionLeases {
    inner: DashMap<String, Arc<Mutex<()>>>,
}

impl SessionLeases {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires the lease for `address`, waiting if another job holds it.
    pub async fn acquire(&self, address: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .inner
            .entry(address.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_address_serializes() {
        let leases = Arc::new(SessionLeases::new());
        let counter = Arc::new(tokio::sync::Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for i in 0..4 {
            let leases = leases.clone();
            let counter = counter.clone();
            handles.push(tokio::spawn(async move {
                let _guard = leases.acquire("551").await;
                counter.lock().await.push((i, "enter"));
                tokio::time::sleep(Duration::from_millis(5)).await;
                counter.lock().await.push((i, "exit"));
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        // Every enter must be immediately followed by the same task's exit.
        let events = counter.lock().await;
        for pair in events.chunks(2) {
            assert_eq!(pair[0].0, pair[1].0);
            assert_eq!(pair[0].1, "enter");
            assert_eq!(pair[1].1, "exit");
        }
    }

    #[tokio::test]
    async fn different_addresses_do_not_block() {
        let leases = SessionLeases::new();
        let _a = leases.acquire("a").await;
        // Must not deadlock while `a` is held.
        let _b = leases.acquire("b").await;
    }
}
