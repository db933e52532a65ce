//! Ordered observer registry with a liveness gate.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, ThreadId};

pub type Handler<N> = Arc<dyn Fn(&N) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(u64);

/// Handlers fire in registration order. Once [`Observers::close`] returns no
/// handler is running or will run again: close waits for a fan-out in
/// progress on another thread. Closing from inside a handler skips the
/// handlers after it.
pub struct Observers<N> {
    inner: Arc<Inner<N>>,
}

struct Inner<N> {
    next: AtomicU64,
    alive: AtomicBool,
    handlers: Mutex<Vec<(ObserverId, Handler<N>)>>,
    /// Held for a whole fan-out.
    delivery: Mutex<()>,
    deliverer: Mutex<Option<ThreadId>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

/// Marks the current thread as delivering until dropped.
struct Delivering<'a> {
    deliverer: &'a Mutex<Option<ThreadId>>,
    _held: MutexGuard<'a, ()>,
}

impl Drop for Delivering<'_> {
    fn drop(&mut self) {
        *lock(self.deliverer) = None;
    }
}

impl<N> Clone for Observers<N> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<N> Default for Observers<N> {
    fn default() -> Self {
        Self {
            inner: Arc::new(Inner {
                next: AtomicU64::new(1),
                alive: AtomicBool::new(true),
                handlers: Mutex::new(Vec::new()),
                delivery: Mutex::new(()),
                deliverer: Mutex::new(None),
            }),
        }
    }
}

impl<N> Observers<N> {
    pub fn new() -> Self {
        Self::default()
    }

    fn handlers(&self) -> MutexGuard<'_, Vec<(ObserverId, Handler<N>)>> {
        lock(&self.inner.handlers)
    }

    pub fn subscribe<F>(&self, f: F) -> ObserverId
    where
        F: Fn(&N) + Send + Sync + 'static,
    {
        let id = ObserverId(self.inner.next.fetch_add(1, Ordering::Relaxed));
        self.handlers().push((id, Arc::new(f)));
        id
    }

    /// Returns false when `id` was not registered.
    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        let mut hs = self.handlers();
        let before = hs.len();
        hs.retain(|(h, _)| *h != id);
        hs.len() != before
    }

    pub fn len(&self) -> usize {
        self.handlers().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_alive(&self) -> bool {
        self.inner.alive.load(Ordering::Acquire)
    }

    /// Stop delivery for good and drop every handler. Blocks until a fan-out
    /// running on another thread has finished.
    pub fn close(&self) {
        self.inner.alive.store(false, Ordering::Release);
        self.handlers().clear();
        if *lock(&self.inner.deliverer) != Some(thread::current().id()) {
            drop(lock(&self.inner.delivery));
        }
    }

    /// Deliver `n` to every handler. The handler list is copied first so a
    /// handler may subscribe or unsubscribe without deadlocking.
    pub fn notify(&self, n: &N) {
        let held = lock(&self.inner.delivery);
        if !self.is_alive() {
            return;
        }
        *lock(&self.inner.deliverer) = Some(thread::current().id());
        let _delivering = Delivering { deliverer: &self.inner.deliverer, _held: held };
        let hs: Vec<Handler<N>> = self.handlers().iter().map(|(_, h)| Arc::clone(h)).collect();
        for h in hs {
            if !self.is_alive() {
                return;
            }
            h(n);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivers_in_registration_order() {
        let obs: Observers<u32> = Observers::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for tag in ["a", "b", "c"] {
            let seen = Arc::clone(&seen);
            obs.subscribe(move |n: &u32| seen.lock().unwrap().push(format!("{}{}", tag, n)));
        }
        obs.notify(&1);
        assert_eq!(*seen.lock().unwrap(), vec!["a1", "b1", "c1"]);
    }

    #[test]
    fn unsubscribe_and_close_stop_delivery() {
        let obs: Observers<u32> = Observers::new();
        let hits = Arc::new(AtomicU64::new(0));
        let h = Arc::clone(&hits);
        let id = obs.subscribe(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        obs.notify(&0);
        assert!(obs.unsubscribe(id));
        assert!(!obs.unsubscribe(id));
        obs.notify(&0);
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        let h = Arc::clone(&hits);
        obs.subscribe(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        obs.close();
        obs.notify(&0);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(obs.is_empty());
    }

    #[test]
    fn close_from_inside_a_handler_skips_the_rest() {
        let obs: Observers<u32> = Observers::new();
        let hits = Arc::new(AtomicU64::new(0));
        let closer = obs.clone();
        obs.subscribe(move |_| closer.close());
        let h = Arc::clone(&hits);
        obs.subscribe(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        obs.notify(&0);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        obs.notify(&1);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn close_waits_for_a_running_handler() {
        let obs: Observers<u32> = Observers::new();
        let (entered_tx, entered_rx) = std::sync::mpsc::channel();
        let finished = Arc::new(AtomicBool::new(false));
        let f = Arc::clone(&finished);
        obs.subscribe(move |_| {
            let _ = entered_tx.send(());
            thread::sleep(std::time::Duration::from_millis(100));
            f.store(true, Ordering::SeqCst);
        });
        let notifier = obs.clone();
        let t = thread::spawn(move || notifier.notify(&0));
        entered_rx.recv().expect("handler entered");
        obs.close();
        assert!(finished.load(Ordering::SeqCst));
        t.join().expect("notifier thread");
    }
}
