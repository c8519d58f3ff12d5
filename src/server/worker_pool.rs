//! Bounded worker pool servicing accepted connections.
//!
//! Idle workers park on a ready stack (LIFO, so warm workers are reused
//! first) and exit after an idle interval; fresh workers are spawned on
//! demand up to the cap. `serve` returns `false` when the cap is reached
//! and no worker is free - the caller drops the connection.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tokio::sync::Notify;
use tracing::trace;

const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(10);

type ServeFn<T> = Arc<dyn Fn(T) -> BoxFuture<'static, ()> + Send + Sync>;

pub struct WorkerPool<T: Send + 'static> {
    shared: Arc<Shared<T>>,
}

struct Shared<T> {
    serve: ServeFn<T>,
    max_workers: usize,
    idle_timeout: Duration,
    stopped: AtomicBool,
    shutdown: Notify,
    inner: Mutex<Inner<T>>,
}

struct Inner<T> {
    ready: Vec<IdleWorker<T>>,
    count: usize,
    next_id: u64,
}

struct IdleWorker<T> {
    id: u64,
    tx: mpsc::Sender<T>,
}

impl<T: Send + 'static> WorkerPool<T> {
    pub fn new<F, Fut>(max_workers: usize, serve: F) -> Self
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        Self::with_idle_timeout(max_workers, DEFAULT_IDLE_TIMEOUT, serve)
    }

    pub fn with_idle_timeout<F, Fut>(max_workers: usize, idle_timeout: Duration, serve: F) -> Self
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        WorkerPool {
            shared: Arc::new(Shared {
                serve: Arc::new(move |job| -> BoxFuture<'static, ()> { Box::pin(serve(job)) }),
                max_workers: max_workers.max(1),
                idle_timeout,
                stopped: AtomicBool::new(false),
                shutdown: Notify::new(),
                inner: Mutex::new(Inner {
                    ready: Vec::new(),
                    count: 0,
                    next_id: 0,
                }),
            }),
        }
    }

    /// Hands `job` to an idle worker, or spawns one if below the cap.
    /// Returns `false` when the pool is saturated or stopped; the job is
    /// dropped.
    pub fn serve(&self, mut job: T) -> bool {
        if self.shared.stopped.load(Ordering::Acquire) {
            return false;
        }
        let mut inner = self.shared.inner.lock().unwrap();
        // the send happens under the same lock as the pop, so a worker that
        // finds itself removed from the ready stack always has a job queued
        while let Some(worker) = inner.ready.pop() {
            match worker.tx.try_send(job) {
                Ok(()) => return true,
                Err(mpsc::error::TrySendError::Closed(j))
                | Err(mpsc::error::TrySendError::Full(j)) => job = j,
            }
        }
        if inner.count >= self.shared.max_workers {
            return false;
        }
        inner.count += 1;
        let id = inner.next_id;
        inner.next_id += 1;
        drop(inner);

        let (tx, rx) = mpsc::channel(1);
        let shared = Arc::clone(&self.shared);
        tokio::spawn(worker_loop(shared, id, tx, rx, job));
        true
    }

    pub fn worker_count(&self) -> usize {
        self.shared.inner.lock().unwrap().count
    }

    /// Stops the pool. Busy workers finish their current connection; idle
    /// workers exit immediately.
    pub fn stop(&self) {
        self.shared.stopped.store(true, Ordering::Release);
        self.shared.inner.lock().unwrap().ready.clear();
        self.shared.shutdown.notify_waiters();
    }
}

enum Wait<T> {
    Job(Option<T>),
    Shutdown,
    IdleTimeout,
}

async fn worker_loop<T: Send + 'static>(
    shared: Arc<Shared<T>>,
    id: u64,
    tx: mpsc::Sender<T>,
    mut rx: mpsc::Receiver<T>,
    first: T,
) {
    let mut job = Some(first);
    loop {
        if let Some(j) = job.take() {
            (shared.serve)(j).await;
        }
        if shared.stopped.load(Ordering::Acquire) {
            break;
        }
        {
            let mut inner = shared.inner.lock().unwrap();
            inner.ready.push(IdleWorker {
                id,
                tx: tx.clone(),
            });
        }
        let wait = tokio::select! {
            got = rx.recv() => Wait::Job(got),
            _ = shared.shutdown.notified() => Wait::Shutdown,
            _ = tokio::time::sleep(shared.idle_timeout) => Wait::IdleTimeout,
        };
        match wait {
            Wait::Job(Some(j)) => job = Some(j),
            Wait::Job(None) => break,
            Wait::Shutdown => {
                // a connection may have been queued right before the stop
                if let Ok(j) = rx.try_recv() {
                    (shared.serve)(j).await;
                }
                remove_ready(&shared, id);
                break;
            }
            Wait::IdleTimeout => {
                if remove_ready(&shared, id) {
                    trace!(worker = id, "idle worker exiting");
                    break;
                }
                // already popped by serve(): the job is in flight
                match rx.recv().await {
                    Some(j) => job = Some(j),
                    None => break,
                }
            }
        }
    }
    shared.inner.lock().unwrap().count -= 1;
}

fn remove_ready<T>(shared: &Shared<T>, id: u64) -> bool {
    let mut inner = shared.inner.lock().unwrap();
    match inner.ready.iter().position(|w| w.id == id) {
        Some(pos) => {
            inner.ready.remove(pos);
            true
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn serves_jobs_and_reuses_workers() {
        let served = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&served);
        let pool = WorkerPool::new(4, move |_: u32| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        for i in 0..10 {
            while !pool.serve(i) {
                tokio::task::yield_now().await;
            }
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(served.load(Ordering::SeqCst), 10);
        // sequential jobs should have been handled by a small warm set
        assert!(pool.worker_count() <= 4);
    }

    #[tokio::test]
    async fn saturated_pool_rejects() {
        let (release_tx, release_rx) = oneshot::channel::<()>();
        let release_rx = Arc::new(tokio::sync::Mutex::new(Some(release_rx)));
        let pool = WorkerPool::new(1, move |_: u32| {
            let release_rx = Arc::clone(&release_rx);
            async move {
                let rx = release_rx.lock().await.take();
                if let Some(rx) = rx {
                    let _ = rx.await;
                }
            }
        });

        assert!(pool.serve(1));
        tokio::time::sleep(Duration::from_millis(20)).await;
        // single worker is busy and the cap is reached
        assert!(!pool.serve(2));
        let _ = release_tx.send(());
    }

    #[tokio::test(start_paused = true)]
    async fn idle_workers_exit() {
        let pool = WorkerPool::with_idle_timeout(4, Duration::from_millis(100), |_: u32| async {});
        assert!(pool.serve(1));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(pool.worker_count(), 1);
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(pool.worker_count(), 0);
    }

    #[tokio::test]
    async fn stop_rejects_new_jobs() {
        let pool = WorkerPool::new(4, |_: u32| async {});
        assert!(pool.serve(1));
        pool.stop();
        assert!(!pool.serve(2));
    }
}
