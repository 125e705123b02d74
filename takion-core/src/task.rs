//! Named background tasks sharing one cancellation token.
//!
//! A session runs several long-lived loops (receivers, sink pumps, the
//! feedback and congestion timers). They are spawned into a [`TaskSet`]
//! and torn down together: cancel first, give each task a grace period to
//! notice, abort whatever is still running.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub struct TaskSet {
    tasks: Vec<(&'static str, JoinHandle<()>)>,
    cancel: CancellationToken,
}

impl TaskSet {
    /// Tasks are cancelled when `parent` is, or on [`TaskSet::shutdown`].
    pub fn new(parent: &CancellationToken) -> Self {
        Self {
            tasks: Vec::new(),
            cancel: parent.child_token(),
        }
    }

    /// Token handed to every task in the set.
    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Spawn `f` with the set's cancellation token.
    pub fn spawn<F, Fut>(&mut self, name: &'static str, f: F)
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let fut = f(self.cancel.clone());
        debug!(task = name, "spawned");
        self.tasks.push((name, tokio::spawn(fut)));
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.tasks.iter().map(|(name, _)| *name)
    }

    /// Cancel everything and wait up to `grace` per task. Returns how many
    /// tasks had to be aborted.
    pub async fn shutdown(self, grace: Duration) -> usize {
        self.cancel.cancel();
        let mut aborted = 0;
        for (name, mut handle) in self.tasks {
            match tokio::time::timeout(grace, &mut handle).await {
                Ok(Ok(())) => debug!(task = name, "stopped"),
                Ok(Err(e)) if e.is_panic() => warn!(task = name, "task panicked"),
                Ok(Err(_)) => debug!(task = name, "task cancelled"),
                Err(_) => {
                    warn!(task = name, "task ignored cancellation, aborting");
                    handle.abort();
                    aborted += 1;
                }
            }
        }
        aborted
    }
}

impl std::fmt::Debug for TaskSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskSet")
            .field("tasks", &self.names().collect::<Vec<_>>())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;

    #[tokio::test]
    async fn shutdown_cancels_cooperative_tasks() {
        let root = CancellationToken::new();
        let mut set = TaskSet::new(&root);
        let stopped = Arc::new(AtomicBool::new(false));
        let flag = stopped.clone();
        set.spawn("loop", move |cancel| async move {
            cancel.cancelled().await;
            flag.store(true, Ordering::SeqCst);
        });
        assert_eq!(set.names().collect::<Vec<_>>(), vec!["loop"]);
        assert_eq!(set.shutdown(Duration::from_secs(1)).await, 0);
        assert!(stopped.load(Ordering::SeqCst));
        assert!(!root.is_cancelled());
    }

    #[tokio::test]
    async fn stubborn_tasks_are_aborted() {
        let mut set = TaskSet::new(&CancellationToken::new());
        set.spawn("stubborn", |_cancel| async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });
        assert_eq!(set.shutdown(Duration::from_millis(20)).await, 1);
    }

    #[tokio::test]
    async fn parent_cancellation_reaches_tasks() {
        let root = CancellationToken::new();
        let set = TaskSet::new(&root);
        let token = set.token();
        root.cancel();
        tokio_test::assert_ready!(tokio_test::task::spawn(token.cancelled()).poll());
    }
}
