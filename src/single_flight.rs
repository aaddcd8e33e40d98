//! # Single-Flight Coordinator
//!
//! Collapses concurrent executions for the same key into one.
//!
//! The first caller for a key (the leader) spawns the work on the runtime and
//! publishes a shared handle to it; every caller arriving while the work runs awaits
//! that handle and receives a clone of the same result. The spawned task evicts its
//! own map entry when it finishes, so the next call after completion starts a fresh
//! execution.
//!
//! Check-and-insert happens under the map's entry lock, so two callers can never
//! both become leader for one key. Because the work runs on its own task, dropping
//! any waiter (the leader included) never cancels it.
//!
//! ```rust
//! use checkup_relay::single_flight::SingleFlightCoordinator;
//!
//! # tokio_test::block_on(async {
//! let flights: SingleFlightCoordinator<u32> = SingleFlightCoordinator::new();
//! let outcome = flights.run("account-1|a1b2", || async { Ok(42) }).await;
//!
//! assert!(outcome.leader);
//! assert_eq!(outcome.value, Ok(42));
//! assert_eq!(flights.in_flight(), 0);
//! # });
//! ```

use crate::error::{RelayError, RelayResult};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error};

type SharedFlight<T> = Shared<BoxFuture<'static, RelayResult<T>>>;

/// Result of [`SingleFlightCoordinator::run`]
#[derive(Debug, Clone)]
pub struct FlightOutcome<T> {
    pub value: RelayResult<T>,
    /// `true` for the caller whose work actually ran
    pub leader: bool,
}

pub struct SingleFlightCoordinator<T>
where
    T: Clone + Send + Sync + 'static,
{
    inflight: Arc<DashMap<String, (u64, SharedFlight<T>)>>,
    generation: AtomicU64,
}

impl<T> fmt::Debug for SingleFlightCoordinator<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SingleFlightCoordinator")
            .field("in_flight", &self.inflight.len())
            .finish()
    }
}

impl<T> Default for SingleFlightCoordinator<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self {
            inflight: Arc::new(DashMap::new()),
            generation: AtomicU64::new(0),
        }
    }
}

impl<T> SingleFlightCoordinator<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `work` for `key` unless an execution is already in flight, in which case
    /// wait for that one instead. `work` is only invoked by the leader.
    pub async fn run<F, Fut>(&self, key: &str, work: F) -> FlightOutcome<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = RelayResult<T>> + Send + 'static,
    {
        let (flight, leader) = match self.inflight.entry(key.to_string()) {
            Entry::Occupied(occupied) => (occupied.get().1.clone(), false),
            Entry::Vacant(vacant) => {
                let generation = self.generation.fetch_add(1, Ordering::Relaxed);
                let flight = self.spawn_flight(key.to_string(), generation, work());
                vacant.insert((generation, flight.clone()));
                (flight, true)
            }
        };

        if !leader {
            debug!(key = %key, "Joining in-flight execution");
        }

        FlightOutcome {
            value: flight.await,
            leader,
        }
    }

    /// Number of keys currently executing
    pub fn in_flight(&self) -> usize {
        self.inflight.len()
    }

    pub fn is_in_flight(&self, key: &str) -> bool {
        self.inflight.contains_key(key)
    }

    fn spawn_flight<Fut>(&self, key: String, generation: u64, work: Fut) -> SharedFlight<T>
    where
        Fut: Future<Output = RelayResult<T>> + Send + 'static,
    {
        let eviction = EvictOnDrop {
            inflight: Arc::clone(&self.inflight),
            key: key.clone(),
            generation,
        };
        let handle = tokio::spawn(async move {
            let _eviction = eviction;
            work.await
        });

        async move {
            match handle.await {
                Ok(result) => result,
                Err(join_error) => {
                    error!(key = %key, error = %join_error, "Single-flight task failed");
                    Err(RelayError::Internal(format!(
                        "single-flight task for {key} failed: {join_error}"
                    )))
                }
            }
        }
        .boxed()
        .shared()
    }
}

/// Removes a flight's map entry when its task ends, including by panic
struct EvictOnDrop<T>
where
    T: Clone + Send + Sync + 'static,
{
    inflight: Arc<DashMap<String, (u64, SharedFlight<T>)>>,
    key: String,
    generation: u64,
}

impl<T> Drop for EvictOnDrop<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        // a newer flight may own the key by now
        let generation = self.generation;
        self.inflight
            .remove_if(&self.key, |_, (owner, _)| *owner == generation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    async fn explode() -> RelayResult<u32> {
        panic!("executor exploded")
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_callers_share_one_execution() {
        let coordinator = Arc::new(SingleFlightCoordinator::<u32>::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let (release_tx, release_rx) = tokio::sync::watch::channel(false);
        let barrier = Arc::new(tokio::sync::Barrier::new(9));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let coordinator = Arc::clone(&coordinator);
            let calls = Arc::clone(&calls);
            let mut release_rx = release_rx.clone();
            let barrier = Arc::clone(&barrier);
            handles.push(tokio::spawn(async move {
                barrier.wait().await;
                coordinator
                    .run("acct-1|req", move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        let _ = release_rx.wait_for(|released| *released).await;
                        Ok(42)
                    })
                    .await
            }));
        }

        barrier.wait().await;
        // wait until the flight is registered before releasing it
        while !coordinator.is_in_flight("acct-1|req") {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        release_tx.send(true).unwrap();

        let mut leaders = 0;
        for handle in handles {
            let outcome = handle.await.unwrap();
            assert_eq!(outcome.value, Ok(42));
            if outcome.leader {
                leaders += 1;
            }
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(leaders, 1);
    }

    #[tokio::test]
    async fn test_key_is_evicted_after_completion() {
        let coordinator = SingleFlightCoordinator::<u32>::new();
        let calls = Arc::new(AtomicUsize::new(0));

        for expected in 1..=2 {
            let counter = Arc::clone(&calls);
            let outcome = coordinator
                .run("k", move || async move {
                    Ok(counter.fetch_add(1, Ordering::SeqCst) as u32)
                })
                .await;
            assert!(outcome.leader);
            assert_eq!(calls.load(Ordering::SeqCst), expected);
            tokio::task::yield_now().await;
        }
        assert_eq!(coordinator.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_errors_are_shared_and_cleared() {
        let coordinator = SingleFlightCoordinator::<u32>::new();
        let outcome = coordinator
            .run("k", || async { Err::<u32, _>(RelayError::Executor("boom".into())) })
            .await;
        assert_eq!(outcome.value, Err(RelayError::Executor("boom".into())));
        assert!(!coordinator.is_in_flight("k"));
    }

    #[tokio::test]
    async fn test_dropped_leader_does_not_cancel_work() {
        let coordinator = Arc::new(SingleFlightCoordinator::<u32>::new());
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();

        let leader = {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move {
                coordinator
                    .run("k", move || async move {
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        let _ = done_tx.send(());
                        Ok(7)
                    })
                    .await
            })
        };
        while !coordinator.is_in_flight("k") {
            tokio::task::yield_now().await;
        }
        leader.abort();

        let follower = coordinator.run("k", || async { Ok(0) }).await;
        assert!(!follower.leader);
        assert_eq!(follower.value, Ok(7));
        assert!(done_rx.await.is_ok());
    }

    #[tokio::test]
    async fn test_panicking_work_becomes_internal_error() {
        let coordinator = SingleFlightCoordinator::<u32>::new();
        let outcome = coordinator
            .run("k", explode)
            .await;
        assert!(matches!(outcome.value, Err(RelayError::Internal(_))));
        assert!(!coordinator.is_in_flight("k"));
    }
}
