use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinHandle;

type Work = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

struct Queued<K> {
    key: K,
    work: Work,
}

struct Shared<K> {
    queue: Mutex<VecDeque<Queued<K>>>,
    slots: Arc<Semaphore>,
    wake: Notify,
    running: AtomicUsize,
    peak_running: AtomicUsize,
    closed: AtomicBool,
    capacity: usize,
}

impl<K> Shared<K> {
    fn queue(&self) -> MutexGuard<'_, VecDeque<Queued<K>>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Pops the oldest item and counts it as running under the same lock,
    /// so `queued + running` never dips while an item changes hands.
    fn take_next(&self) -> Option<Queued<K>> {
        let mut q = self.queue();
        let item = q.pop_front()?;
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_running.fetch_max(now, Ordering::SeqCst);
        Some(item)
    }
}

struct RunningGuard<K>(Arc<Shared<K>>);

impl<K> Drop for RunningGuard<K> {
    fn drop(&mut self) {
        self.0.running.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("worker pool is shut down")]
pub struct PoolClosed;

/// Fixed number of execution slots fed from one FIFO queue.
///
/// Work items carry a key (the owning job) so queued items can be withdrawn
/// together. Items already running are never interrupted.
pub struct WorkerPool<K> {
    shared: Arc<Shared<K>>,
    dispatcher: JoinHandle<()>,
}

impl<K: PartialEq + Send + 'static> WorkerPool<K> {
    /// Must be called inside a tokio runtime. A capacity of 0 is treated as 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let shared = Arc::new(Shared {
            queue: Mutex::new(VecDeque::new()),
            slots: Arc::new(Semaphore::new(capacity)),
            wake: Notify::new(),
            running: AtomicUsize::new(0),
            peak_running: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            capacity,
        });
        let dispatcher = tokio::spawn(dispatch(shared.clone()));
        Self { shared, dispatcher }
    }

    pub fn submit<F>(&self, key: K, work: F) -> Result<(), PoolClosed>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.is_closed() {
            return Err(PoolClosed);
        }
        self.shared.queue().push_back(Queued {
            key,
            work: Box::pin(work),
        });
        self.shared.wake.notify_one();
        Ok(())
    }

    /// Withdraws every queued item for `key`; returns how many were removed.
    pub fn cancel(&self, key: &K) -> usize {
        let mut q = self.shared.queue();
        let before = q.len();
        q.retain(|item| &item.key != key);
        before - q.len()
    }

    pub fn queued(&self) -> usize {
        self.shared.queue().len()
    }

    pub fn running(&self) -> usize {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Highest number of items ever running at once.
    pub fn peak_running(&self) -> usize {
        self.shared.peak_running.load(Ordering::SeqCst)
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Stops dispatching. Queued items are dropped and their keys returned,
    /// one per withdrawn item; running items finish.
    pub fn shutdown(&self) -> Vec<K> {
        self.shared.closed.store(true, Ordering::SeqCst);
        self.shared.slots.close();
        let withdrawn = self.shared.queue().drain(..).map(|item| item.key).collect();
        self.shared.wake.notify_one();
        withdrawn
    }
}

impl<K> Drop for WorkerPool<K> {
    fn drop(&mut self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        self.shared.slots.close();
        self.dispatcher.abort();
    }
}

async fn dispatch<K: Send + 'static>(shared: Arc<Shared<K>>) {
    loop {
        let permit = match shared.slots.clone().acquire_owned().await {
            Ok(p) => p,
            Err(_) => return,
        };

        let next = loop {
            if shared.closed.load(Ordering::SeqCst) {
                return;
            }
            // Register interest before checking the queue so a submit that
            // lands in between is not missed.
            let notified = shared.wake.notified();
            if let Some(item) = shared.take_next() {
                break item;
            }
            notified.await;
        };

        let guard = RunningGuard(shared.clone());
        tokio::spawn(async move {
            let _permit = permit;
            let _guard = guard;
            next.work.await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn runs_in_fifo_order_with_one_slot() {
        let pool = WorkerPool::new(1);
        let (tx, mut rx) = mpsc::unbounded_channel();
        for i in 0..5u32 {
            let tx = tx.clone();
            pool.submit(0u8, async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                let _ = tx.send(i);
            })
            .unwrap();
        }
        drop(tx);
        let mut got = Vec::new();
        while let Some(i) = rx.recv().await {
            got.push(i);
        }
        assert_eq!(got, vec![0, 1, 2, 3, 4]);
        assert_eq!(pool.peak_running(), 1);
    }

    #[tokio::test]
    async fn never_exceeds_capacity() {
        let pool = WorkerPool::new(3);
        let live = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (tx, mut rx) = mpsc::unbounded_channel::<()>();
        for _ in 0..20 {
            let (live, peak, tx) = (live.clone(), peak.clone(), tx.clone());
            pool.submit((), async move {
                let now = live.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                live.fetch_sub(1, Ordering::SeqCst);
                let _ = tx.send(());
            })
            .unwrap();
        }
        drop(tx);
        let mut done = 0;
        while rx.recv().await.is_some() {
            done += 1;
        }
        assert_eq!(done, 20);
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert!(pool.peak_running() <= 3);
        assert!(pool.peak_running() >= 2);
    }

    #[tokio::test]
    async fn cancel_withdraws_only_queued_items_for_key() {
        let pool = WorkerPool::new(1);
        let (gate_tx, gate_rx) = tokio::sync::oneshot::channel::<()>();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let t = tx.clone();
        pool.submit("a", async move {
            let _ = gate_rx.await;
            let _ = t.send("a0");
        })
        .unwrap();
        for (key, label) in [("a", "a1"), ("b", "b1"), ("a", "a2")] {
            let t = tx.clone();
            pool.submit(key, async move {
                let _ = t.send(label);
            })
            .unwrap();
        }
        drop(tx);

        // Let the first item occupy the only slot.
        while pool.running() == 0 {
            tokio::task::yield_now().await;
        }
        assert_eq!(pool.queued(), 3);
        assert_eq!(pool.cancel(&"a"), 2);
        assert_eq!(pool.queued(), 1);

        let _ = gate_tx.send(());
        let mut got = Vec::new();
        while let Some(l) = rx.recv().await {
            got.push(l);
        }
        assert_eq!(got, vec!["a0", "b1"]);
    }

    #[tokio::test]
    async fn shutdown_returns_only_items_still_queued() {
        let pool = WorkerPool::new(1);
        let (gate_tx, gate_rx) = tokio::sync::oneshot::channel::<()>();
        let (done_tx, done_rx) = tokio::sync::oneshot::channel::<()>();
        pool.submit("a", async move {
            let _ = gate_rx.await;
            let _ = done_tx.send(());
        })
        .unwrap();
        for key in ["a", "b", "a"] {
            pool.submit(key, async {}).unwrap();
        }
        while pool.running() == 0 {
            tokio::task::yield_now().await;
        }

        let mut withdrawn = pool.shutdown();
        withdrawn.sort();
        assert_eq!(withdrawn, vec!["a", "a", "b"]);
        assert_eq!(pool.queued(), 0);

        // The running item is left to finish.
        let _ = gate_tx.send(());
        done_rx.await.unwrap();
    }

    #[tokio::test]
    async fn submit_after_shutdown_fails() {
        let pool: WorkerPool<u8> = WorkerPool::new(2);
        assert!(pool.shutdown().is_empty());
        assert_eq!(pool.submit(1, async {}), Err(PoolClosed));
        assert_eq!(pool.capacity(), 2);
    }
}
