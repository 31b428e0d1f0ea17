//! `BimaTask` named task wrapper.

use std::borrow::Cow;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::task::{JoinError, JoinHandle};
use tracing::{error, info, warn};

/// A thin wrapper around [`tokio::task::JoinHandle`] that (1) adds the
/// `#[must_use]` lint to ensure that all spawned tasks are joined or
/// explicitly annotated that no joining is required, and (2) attaches a
/// name to the task for use in logs.
#[must_use]
pub struct BimaTask<T> {
    task: JoinHandle<T>,
    name: Cow<'static, str>,
}

impl<T: Send + 'static> BimaTask<T> {
    pub fn spawn_named<F>(
        name: impl Into<Cow<'static, str>>,
        future: F,
    ) -> Self
    where
        F: Future<Output = T> + Send + 'static,
    {
        Self {
            task: tokio::spawn(future),
            name: name.into(),
        }
    }

    pub fn spawn<F>(future: F) -> Self
    where
        F: Future<Output = T> + Send + 'static,
    {
        Self::spawn_named("<unnamed>", future)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Signal that this task doesn't need to be joined, and can be safely
    /// dropped.
    pub fn detach(self) {
        drop(self.task);
    }

    pub fn abort(&self) {
        self.task.abort();
    }
}

impl BimaTask<()> {
    /// Await the task and log its outcome, consuming the handle. Returns the
    /// task name, which is handy inside `FuturesUnordered` join loops.
    pub async fn logged(self) -> Cow<'static, str> {
        let name = self.name.clone();
        match self.await {
            Ok(()) => info!("Task finished: {name}"),
            Err(e) if e.is_cancelled() => warn!("Task cancelled: {name}"),
            Err(e) => error!("Task panicked: {name}: {e:#}"),
        }
        name
    }
}

impl<T> Future for BimaTask<T> {
    type Output = Result<T, JoinError>;
    fn poll(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Self::Output> {
        Pin::new(&mut self.task).poll(cx)
    }
}

impl<T> fmt::Debug for BimaTask<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BimaTask({})", self.name)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn join_returns_output() {
        let task = BimaTask::spawn_named("adder", async { 1 + 1 });
        assert_eq!(task.name(), "adder");
        assert_eq!(task.await.unwrap(), 2);
    }
}
