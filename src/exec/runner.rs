//! Single-flight command queue.
//!
//! One worker task dequeues and runs jobs strictly one at a time, so any
//! number of concurrent requests from the listen loop results in at most one
//! shell process. An epoch counter invalidates queued-but-not-started jobs
//! when the connection cycles: a job only runs (and its callback only fires)
//! if its epoch still matches at dequeue time.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use shrike_proto::IStr;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::ExecError;
use crate::exec::supervisor::Supervisor;

/// Callback invoked with the reply target and the execution result.
/// Invoked at most once per accepted job, and not at all for jobs
/// invalidated by [`CommandRunner::reset`].
pub type Completion = Box<dyn FnOnce(IStr, Result<Vec<String>, ExecError>) + Send>;

struct Job {
    command: String,
    target: IStr,
    epoch: u64,
    complete: Completion,
}

/// Handle to the single-worker execution queue.
#[derive(Clone)]
pub struct CommandRunner {
    tx: mpsc::UnboundedSender<Job>,
    epoch: Arc<AtomicU64>,
}

impl CommandRunner {
    /// Spawn the worker task over the given supervisor.
    #[must_use]
    pub fn spawn(supervisor: Supervisor) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        let epoch = Arc::new(AtomicU64::new(0));
        let current = Arc::clone(&epoch);

        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                if job.epoch != current.load(Ordering::SeqCst) {
                    debug!(command = %job.command, "skipping job from a previous epoch");
                    continue;
                }
                let result = supervisor.run(&job.command).await;
                (job.complete)(job.target, result);
            }
        });

        CommandRunner { tx, epoch }
    }

    /// Queue a command for execution, tagged with the current epoch.
    ///
    /// Returns `false` if the worker has shut down.
    pub fn enqueue(
        &self,
        command: impl Into<String>,
        target: IStr,
        complete: impl FnOnce(IStr, Result<Vec<String>, ExecError>) + Send + 'static,
    ) -> bool {
        self.tx
            .send(Job {
                command: command.into(),
                target,
                epoch: self.epoch.load(Ordering::SeqCst),
                complete: Box::new(complete),
            })
            .is_ok()
    }

    /// Invalidate every job queued before this call.
    ///
    /// A job already in flight is unaffected; its callback still runs.
    pub fn reset(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
    }
}
