//! Isolated units of work.
//!
//! Every accepted event is processed in its own Tokio task. A supervising
//! task watches the unit's `JoinHandle`, so a panic ends only that unit and
//! is logged with the unit and delivery identifiers. Units own their data
//! and share nothing mutable with each other or with the listener.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::dispatch::dispatcher::panic_message;
use crate::error::LaunchError;
use crate::event::WebhookEvent;

/// Identifier of one isolated unit, unique within the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UnitId(u64);

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unit-{}", self.0)
    }
}

/// How a unit ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitExit {
    Completed,
    Panicked(String),
    Cancelled,
}

/// Handle to a launched unit. Dropping it detaches the unit.
#[derive(Debug)]
pub struct UnitHandle {
    pub id: UnitId,
    supervisor: JoinHandle<UnitExit>,
}

impl UnitHandle {
    /// Wait for the unit to finish.
    pub async fn wait(self) -> UnitExit {
        self.supervisor.await.unwrap_or(UnitExit::Cancelled)
    }
}

/// Launches isolated units.
#[derive(Debug, Clone, Default)]
pub struct Isolation {
    next_id: Arc<AtomicU64>,
    in_flight: Arc<AtomicUsize>,
}

/// Decrements the in-flight count when the supervisor finishes.
struct InFlight(Arc<AtomicUsize>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Isolation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of units launched and not yet finished.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Wait up to `limit` for launched units to finish. Returns how many
    /// are still running.
    pub async fn drain(&self, limit: Duration) -> usize {
        let deadline = tokio::time::Instant::now() + limit;
        while self.in_flight() > 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        self.in_flight()
    }

    /// Run `work` for `event` in a new unit. Returns once the unit is
    /// scheduled, not once it completes.
    pub fn isolate<F>(&self, event: &WebhookEvent, work: F) -> Result<UnitHandle, LaunchError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let runtime = Handle::try_current().map_err(|e| LaunchError::NoRuntime(e.to_string()))?;

        let id = UnitId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let delivery_id = event.delivery_id.clone();
        let span = tracing::info_span!(
            "unit",
            unit = %id,
            delivery = %event.delivery_id,
            event = %event.event_type
        );

        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let guard = InFlight(Arc::clone(&self.in_flight));

        let unit = runtime.spawn(work.instrument(span));
        let supervisor = runtime.spawn(async move {
            let _guard = guard;
            match unit.await {
                Ok(()) => {
                    tracing::debug!(unit = %id, delivery = %delivery_id, "Unit finished");
                    UnitExit::Completed
                }
                Err(e) if e.is_panic() => {
                    let message = panic_message(e.into_panic().as_ref());
                    tracing::error!(unit = %id, delivery = %delivery_id, "Unit crashed: {message}");
                    UnitExit::Panicked(message)
                }
                Err(e) => {
                    tracing::warn!(unit = %id, delivery = %delivery_id, "Unit cancelled: {e}");
                    UnitExit::Cancelled
                }
            }
        });

        tracing::info!(unit = %id, delivery = %event.delivery_id, "Launched isolated unit");
        Ok(UnitHandle { id, supervisor })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::oneshot;

    fn event() -> WebhookEvent {
        WebhookEvent::new("abc-123", "push", json!({}))
    }

    #[tokio::test]
    async fn test_unit_runs_to_completion() {
        let isolation = Isolation::new();
        let (tx, rx) = oneshot::channel();

        let handle = isolation
            .isolate(&event(), async move {
                let _ = tx.send(42);
            })
            .unwrap();

        assert_eq!(handle.wait().await, UnitExit::Completed);
        assert_eq!(rx.await.unwrap(), 42);
        assert_eq!(isolation.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_panic_is_contained() {
        let isolation = Isolation::new();

        let crashed = isolation
            .isolate(&event(), async {
                panic!("unit blew up");
            })
            .unwrap();
        assert_eq!(crashed.wait().await, UnitExit::Panicked("unit blew up".into()));

        // The runtime and the isolation layer keep working.
        let ok = isolation.isolate(&event(), async {}).unwrap();
        assert_eq!(ok.wait().await, UnitExit::Completed);
    }

    #[tokio::test]
    async fn test_launch_returns_before_completion() {
        let isolation = Isolation::new();
        let (release_tx, release_rx) = oneshot::channel::<()>();

        let handle = isolation
            .isolate(&event(), async move {
                let _ = release_rx.await;
            })
            .unwrap();

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(isolation.in_flight(), 1);

        release_tx.send(()).unwrap();
        assert_eq!(handle.wait().await, UnitExit::Completed);
        assert_eq!(isolation.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_drain_waits_for_units() {
        let isolation = Isolation::new();
        isolation
            .isolate(&event(), async {
                tokio::time::sleep(Duration::from_millis(100)).await;
            })
            .unwrap();

        assert_eq!(isolation.drain(Duration::from_secs(5)).await, 0);
    }

    #[tokio::test]
    async fn test_drain_gives_up_after_limit() {
        let isolation = Isolation::new();
        let (_keep, rx) = oneshot::channel::<()>();
        isolation
            .isolate(&event(), async move {
                let _ = rx.await;
            })
            .unwrap();

        assert_eq!(isolation.drain(Duration::from_millis(100)).await, 1);
    }

    #[tokio::test]
    async fn test_unit_ids_are_unique() {
        let isolation = Isolation::new();
        let a = isolation.isolate(&event(), async {}).unwrap();
        let b = isolation.isolate(&event(), async {}).unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(a.id.to_string(), "unit-1");
        assert_eq!(b.id.to_string(), "unit-2");
    }

    #[test]
    fn test_launch_without_runtime_fails() {
        let isolation = Isolation::new();
        let err = isolation.isolate(&event(), async {}).unwrap_err();
        assert!(matches!(err, LaunchError::NoRuntime(_)));
        assert_eq!(isolation.in_flight(), 0);
    }
}
