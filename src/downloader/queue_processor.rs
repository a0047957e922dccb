//! Queue processor - hands queued tasks to runners as concurrency slots free up.

use super::DownloadManager;
use super::runner::TaskRunner;
use super::table::RunAssignment;

impl DownloadManager {
    /// Start the queue processor task
    ///
    /// This method spawns a background task that continuously:
    /// 1. Acquires a permit from the concurrency limiter (respects max_concurrent_tasks)
    /// 2. Waits for the oldest queued task and marks it Running
    /// 3. Spawns a runner that holds the permit until the run ends
    /// 4. Repeats until shutdown
    ///
    /// Dispatch itself publishes nothing; the task's next event comes from its runner.
    pub(crate) fn start_queue_processor(&self) -> tokio::task::JoinHandle<()> {
        let manager = self.clone();

        tokio::spawn(async move {
            let shutdown = manager.queue_state.shutdown_token.clone();
            let concurrent_limit = manager.queue_state.concurrent_limit.clone();

            loop {
                // Acquire a slot before taking work so a queued task is never marked Running early
                let permit = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    permit = concurrent_limit.clone().acquire_owned() => match permit {
                        Ok(p) => p,
                        // Semaphore closed during shutdown
                        Err(_) => break,
                    },
                };

                let assignment = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    assignment = manager.next_assignment() => assignment,
                };

                tracing::debug!(
                    task_key = %assignment.key,
                    run_id = assignment.run_id,
                    available_slots = concurrent_limit.available_permits(),
                    "Dispatching task"
                );

                let runner = TaskRunner::new(&manager, assignment);
                tokio::spawn(async move {
                    let _permit = permit;
                    runner.run().await;
                });
            }

            tracing::debug!("Queue processor stopped");
        })
    }

    /// Wait until a queued task can be started, then start it
    async fn next_assignment(&self) -> RunAssignment {
        loop {
            if let Some(assignment) = self.tasks.lock().await.start_next() {
                return assignment;
            }
            self.queue_state.dispatch_notify.notified().await;
        }
    }
}
