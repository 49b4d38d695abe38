//! The unit of work run by a job.

use std::future::Future;

use async_trait::async_trait;

/// Error returned by a failed task run.
pub type TaskError = Box<dyn std::error::Error + Send + Sync>;

/// Result of one task run.
pub type TaskResult = Result<(), TaskError>;

/// Work executed by a [`Job`](crate::Job) on its own tokio task.
#[async_trait]
pub trait Task: Send + Sync + 'static {
    /// Run the work once.
    async fn run(&self) -> TaskResult;

    /// Called exactly once per failed run, from the scheduler's check.
    async fn on_failure(&self, _error: &TaskError) {}
}

type FailureHook = Box<dyn Fn(&TaskError) + Send + Sync>;

/// A [`Task`] backed by a closure returning a future.
pub struct FnTask<F> {
    run: F,
    on_failure: Option<FailureHook>,
}

/// Wrap a closure as a [`Task`].
pub fn task_fn<F, Fut>(run: F) -> FnTask<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = TaskResult> + Send + 'static,
{
    FnTask {
        run,
        on_failure: None,
    }
}

impl<F> FnTask<F> {
    /// Attach a failure hook.
    pub fn on_failure(mut self, hook: impl Fn(&TaskError) + Send + Sync + 'static) -> Self {
        self.on_failure = Some(Box::new(hook));
        self
    }
}

#[async_trait]
impl<F, Fut> Task for FnTask<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = TaskResult> + Send + 'static,
{
    async fn run(&self) -> TaskResult {
        (self.run)().await
    }

    async fn on_failure(&self, error: &TaskError) {
        if let Some(hook) = &self.on_failure {
            hook(error);
        }
    }
}
