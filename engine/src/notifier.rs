//! Event notification with asynchronous listeners.
//!
//! Listeners return futures, and the two publication modes differ in how
//! listener failures are treated: `publish_serial` awaits each listener in
//! registration order and aborts on the first failure (gating events, e.g.
//! `beforePush`); `settle_serial` awaits every listener and logs failures
//! without propagating them (non-gating events, e.g. `transform`).

use crate::error::Result;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Handle for unsubscribing a listener.
pub type ListenerId = u64;

type Listener<E> = Arc<dyn Fn(E) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Registry of asynchronous event listeners for one event type.
pub struct Notifier<E> {
    listeners: Mutex<Vec<(ListenerId, Listener<E>)>>,
    next_id: AtomicU64,
}

impl<E> Default for Notifier<E> {
    fn default() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }
}

impl<E: Clone + Send + 'static> Notifier<E> {
    /// Create a notifier with no listeners.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe a listener. Listeners fire in registration order.
    pub fn on<F, Fut>(&self, listener: F) -> ListenerId
    where
        F: Fn(E) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let listener: Listener<E> = Arc::new(move |event| listener(event).boxed());
        self.listeners.lock().unwrap().push((id, listener));
        id
    }

    /// Unsubscribe a listener. Returns whether it was registered.
    pub fn off(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock().unwrap();
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        listeners.len() != before
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.lock().unwrap().len()
    }

    // Snapshot so the lock is not held across awaits; listeners registered
    // mid-publication see only subsequent events.
    fn snapshot(&self) -> Vec<(ListenerId, Listener<E>)> {
        self.listeners.lock().unwrap().clone()
    }

    /// Fulfill in series: await each listener, first failure aborts.
    pub async fn publish_serial(&self, event: &E) -> Result<()> {
        for (_, listener) in self.snapshot() {
            listener(event.clone()).await?;
        }
        Ok(())
    }

    /// Settle in series: await each listener, failures are logged and
    /// swallowed so a broken subscriber cannot fail the triggering
    /// operation.
    pub async fn settle_serial(&self, event: &E) {
        for (id, listener) in self.snapshot() {
            if let Err(error) = listener(event.clone()).await {
                tracing::warn!(listener = id, %error, "event listener failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::atomic::AtomicUsize;

    fn counter() -> Arc<AtomicUsize> {
        Arc::new(AtomicUsize::new(0))
    }

    #[tokio::test]
    async fn listeners_fire_in_registration_order() {
        let notifier: Notifier<u32> = Notifier::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let order = Arc::clone(&order);
            notifier.on(move |_| {
                let order = Arc::clone(&order);
                async move {
                    order.lock().unwrap().push(tag);
                    Ok(())
                }
            });
        }

        notifier.publish_serial(&1).await.unwrap();
        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn publish_serial_aborts_on_first_failure() {
        let notifier: Notifier<u32> = Notifier::new();
        let calls = counter();

        notifier.on(|_| async { Err(Error::Assertion("listener rejected".into())) });
        {
            let calls = Arc::clone(&calls);
            notifier.on(move |_| {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            });
        }

        let result = notifier.publish_serial(&1).await;
        assert_eq!(result, Err(Error::Assertion("listener rejected".into())));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn settle_serial_swallows_failures() {
        let notifier: Notifier<u32> = Notifier::new();
        let calls = counter();

        notifier.on(|_| async { Err(Error::Assertion("broken listener".into())) });
        {
            let calls = Arc::clone(&calls);
            notifier.on(move |_| {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            });
        }

        notifier.settle_serial(&1).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn off_unsubscribes() {
        let notifier: Notifier<u32> = Notifier::new();
        let calls = counter();

        let id = {
            let calls = Arc::clone(&calls);
            notifier.on(move |_| {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
        };

        assert_eq!(notifier.listener_count(), 1);
        assert!(notifier.off(id));
        assert!(!notifier.off(id));
        assert_eq!(notifier.listener_count(), 0);

        notifier.publish_serial(&1).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
