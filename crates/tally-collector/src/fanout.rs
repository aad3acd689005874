use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Runs `task` once per entity on the tokio runtime with at most
/// `concurrency` tasks in flight, and waits for all of them.
///
/// Tasks report their own failures; a task that panics is logged and does
/// not affect its siblings. Returns the number of tasks that ran to
/// completion.
pub async fn fan_out<T, F, Fut>(entities: Vec<T>, concurrency: usize, task: F) -> usize
where
    T: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let task = Arc::new(task);
    let mut handles = Vec::with_capacity(entities.len());

    for entity in entities {
        let sem = Arc::clone(&semaphore);
        let task = Arc::clone(&task);

        handles.push(tokio::spawn(async move {
            let Ok(_permit) = sem.acquire_owned().await else {
                return;
            };
            task(entity).await;
        }));
    }

    let mut completed = 0;
    for handle in handles {
        match handle.await {
            Ok(()) => completed += 1,
            Err(e) => tracing::error!(error = %e, "fan-out task panicked"),
        }
    }
    completed
}
