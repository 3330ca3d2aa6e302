use crate::{Error, Result};
use rayon::ThreadPool;
use std::fmt::Debug;
use std::{sync::Arc, time::Duration};
use tokio::{sync::Semaphore, task::JoinHandle, time::sleep};
use tracing::{error, warn};

/// Bounded pool for CPU-bound work (nonce searches) kept off the async executor
#[derive(Debug, Clone)]
pub struct MiningPool {
    semaphore: Arc<Semaphore>,
    thread_pool: Arc<ThreadPool>,
}

impl MiningPool {
    pub fn new(threads: usize, max_tasks: usize) -> Result<MiningPool> {
        let thread_pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .thread_name(|i| format!("votechain-miner-{}", i))
            .build()
            .map_err(|e| Error::WorkerPool(e.to_string()))?;

        Ok(Self {
            thread_pool: Arc::new(thread_pool),
            semaphore: Arc::new(Semaphore::new(max_tasks.max(1))),
        })
    }

    pub fn threads(&self) -> usize {
        self.thread_pool.current_num_threads()
    }

    pub async fn spawn<OP, T: Debug + Send + 'static>(&self, task_name: String, op: OP) -> Result<T>
    where
        OP: FnOnce() -> T + Send + 'static,
    {
        // Excess jobs wait here rather than queueing inside rayon
        let _permit = self.semaphore.acquire().await?;

        let _warnings = AbortOnDrop(tokio::spawn(async move {
            sleep(Duration::from_secs(10)).await;
            warn!(job = %task_name, "job has been running for more than 10 seconds");
            sleep(Duration::from_secs(30)).await;
            error!(job = %task_name, "job has been running for more than 40 seconds");
        }));

        let (tx, rx) = tokio::sync::oneshot::channel();
        self.thread_pool.spawn(move || {
            let t = op();
            if let Err(res) = tx.send(t) {
                error!(result = ?res, "mining result receiver dropped");
            }
        });

        Ok(rx.await?)
    }
}

/// Aborts the wrapped task when dropped, including when the owning future is cancelled
struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}
