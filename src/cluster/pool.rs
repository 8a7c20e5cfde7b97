//! Bounded worker pools.
//!
//! A pool admits at most `size` concurrent requests. A request that cannot
//! get a slot within the queue budget fails fast instead of queueing
//! behind everyone else.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use log::warn;
use tokio::sync::Semaphore;

use crate::error::{LindenError, Result};

#[derive(Debug, Clone)]
pub struct WorkerPool {
    name: String,
    size: usize,
    permits: Arc<Semaphore>,
    max_wait: Duration,
}

impl WorkerPool {
    pub fn new(name: impl Into<String>, size: usize, max_wait: Duration) -> Self {
        let size = size.max(1);
        Self {
            name: name.into(),
            size,
            permits: Arc::new(Semaphore::new(size)),
            max_wait,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Free slots right now.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    async fn admit(&self) -> Result<tokio::sync::OwnedSemaphorePermit> {
        match tokio::time::timeout(self.max_wait, self.permits.clone().acquire_owned()).await {
            Ok(Ok(permit)) => Ok(permit),
            Ok(Err(_)) => Err(LindenError::closed(format!("{} pool is closed", self.name))),
            Err(_) => {
                warn!(
                    "request waited too long in {} pool ({:?}, {} workers)",
                    self.name, self.max_wait, self.size
                );
                Err(LindenError::pool_saturated(format!(
                    "waited too long in {} pool: no worker free after {:?}",
                    self.name, self.max_wait
                )))
            }
        }
    }

    /// Run `task` once a slot is free.
    pub async fn run<F, T>(&self, task: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let _permit = self.admit().await?;
        task.await
    }

    /// Run blocking `work` on tokio's blocking threads once a slot is free.
    pub async fn run_blocking<F, T>(&self, work: F) -> Result<T>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let _permit = self.admit().await?;
        tokio::task::spawn_blocking(work)
            .await
            .map_err(|e| LindenError::internal(format!("{} pool task failed: {e}", self.name)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_saturated_pool_fails_fast() {
        let pool = WorkerPool::new("test", 1, Duration::from_millis(20));
        let busy = pool.clone();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let holder = tokio::spawn(async move {
            busy.run(async {
                let _ = rx.await;
                Ok(())
            })
            .await
        });
        tokio::task::yield_now().await;
        while pool.available() > 0 {
            tokio::task::yield_now().await;
        }

        let err = pool.run(async { Ok(()) }).await.unwrap_err();
        assert!(matches!(err, LindenError::PoolSaturated(_)));
        assert!(err.to_string().contains("waited too long"));

        tx.send(()).unwrap();
        holder.await.unwrap().unwrap();
        assert_eq!(pool.run(async { Ok(7) }).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_blocking_work_and_panics() {
        let pool = WorkerPool::new("node", 2, Duration::from_secs(1));
        assert_eq!(pool.run_blocking(|| Ok(1 + 1)).await.unwrap(), 2);

        let err = pool
            .run_blocking(|| -> Result<()> { panic!("boom") })
            .await
            .unwrap_err();
        assert!(matches!(err, LindenError::Internal(_)));
        assert_eq!(pool.available(), 2);
    }
}
