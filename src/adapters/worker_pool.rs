//! Bounded task pool shared by all federated runs

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::domain::FederationError;

/// At most `size` submitted tasks run at once; the rest wait in FIFO order.
pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
    size: usize,
    closing: AtomicBool,
    outstanding: Arc<Outstanding>,
}

/// Tasks accepted by `submit` that have not yet finished or been dropped.
#[derive(Default)]
struct Outstanding {
    count: AtomicUsize,
    drained: Notify,
}

/// Held by an accepted task until it completes, panics or is aborted.
struct Accepted(Arc<Outstanding>);

impl Accepted {
    fn enter(outstanding: &Arc<Outstanding>) -> Self {
        outstanding.count.fetch_add(1, Ordering::SeqCst);
        Self(outstanding.clone())
    }
}

impl Drop for Accepted {
    fn drop(&mut self) {
        if self.0.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.drained.notify_waiters();
        }
    }
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(size)),
            size,
            closing: AtomicBool::new(false),
            outstanding: Arc::new(Outstanding::default()),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Workers not currently running a task.
    pub fn idle(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Accepted tasks that are queued or running.
    pub fn outstanding(&self) -> usize {
        self.outstanding.count.load(Ordering::SeqCst)
    }

    pub fn is_shut_down(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    /// Queue `task`. The handle resolves once the task has run.
    ///
    /// A task accepted here always runs, even if `shutdown` is called before a
    /// worker picks it up.
    pub fn submit<F>(
        &self,
        task: F,
    ) -> Result<JoinHandle<Result<F::Output, FederationError>>, FederationError>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        // Counted before the closing check so `shutdown` either sees this task
        // or this call sees the pool closing.
        let accepted = Accepted::enter(&self.outstanding);
        if self.is_shut_down() {
            return Err(FederationError::WorkerPool(
                "worker pool is shutting down".to_string(),
            ));
        }

        let semaphore = self.semaphore.clone();
        Ok(tokio::spawn(async move {
            let _accepted = accepted;
            let _permit = semaphore.acquire_owned().await.map_err(|_| {
                FederationError::WorkerPool("worker pool closed before the task started".to_string())
            })?;
            Ok(task.await)
        }))
    }

    /// Stop accepting work and wait for queued and running tasks to finish.
    pub async fn shutdown(&self) {
        if self.closing.swap(true, Ordering::SeqCst) {
            return;
        }

        info!(size = self.size, outstanding = self.outstanding(), "draining worker pool");
        loop {
            let drained = self.outstanding.drained.notified();
            tokio::pin!(drained);
            drained.as_mut().enable();
            if self.outstanding() == 0 {
                break;
            }
            drained.await;
        }
        debug!("worker pool drained");
        self.semaphore.close();
        info!("worker pool stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let pool = WorkerPool::new(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles = (0..6)
            .map(|i| {
                let running = running.clone();
                let peak = peak.clone();
                pool.submit(async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(30)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    i
                })
                .unwrap()
            })
            .collect::<Vec<_>>();

        let outputs = futures::future::join_all(handles).await;
        let outputs = outputs
            .into_iter()
            .map(|joined| joined.unwrap().unwrap())
            .collect::<Vec<_>>();

        assert_eq!(outputs, vec![0, 1, 2, 3, 4, 5]);
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(pool.idle(), 2);
    }

    #[tokio::test]
    async fn test_zero_size_still_runs() {
        let pool = WorkerPool::new(0);
        assert_eq!(pool.size(), 1);
        let handle = pool.submit(async { 7 }).unwrap();
        assert_eq!(handle.await.unwrap().unwrap(), 7);
    }

    #[tokio::test]
    async fn test_shutdown_drains_then_rejects() {
        let pool = WorkerPool::new(1);
        let finished = Arc::new(AtomicBool::new(false));

        let flag = finished.clone();
        let (started_tx, started_rx) = tokio::sync::oneshot::channel();
        let handle = pool
            .submit(async move {
                let _ = started_tx.send(());
                tokio::time::sleep(Duration::from_millis(50)).await;
                flag.store(true, Ordering::SeqCst);
            })
            .unwrap();

        started_rx.await.unwrap();
        pool.shutdown().await;
        assert!(finished.load(Ordering::SeqCst));
        assert!(handle.await.unwrap().is_ok());

        let rejected = pool.submit(async {});
        assert!(matches!(rejected, Err(FederationError::WorkerPool(_))));
        assert!(pool.is_shut_down());
        assert_eq!(pool.outstanding(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_shutdown_right_after_submit_runs_accepted_tasks() {
        for _ in 0..200 {
            let pool = WorkerPool::new(1);
            let first = pool.submit(async { 1 }).unwrap();
            let second = pool.submit(async { 2 }).unwrap();
            pool.shutdown().await;

            assert_eq!(pool.outstanding(), 0);
            assert_eq!(first.await.unwrap().unwrap(), 1);
            assert_eq!(second.await.unwrap().unwrap(), 2);
        }
    }

    #[tokio::test]
    async fn test_aborted_task_does_not_block_shutdown() {
        let pool = WorkerPool::new(1);
        let handle = pool
            .submit(async {
                tokio::time::sleep(Duration::from_secs(60)).await;
            })
            .unwrap();
        handle.abort();

        tokio::time::timeout(Duration::from_secs(5), pool.shutdown())
            .await
            .expect("shutdown waits only for live tasks");
        assert_eq!(pool.outstanding(), 0);
    }
}
