use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use futures::FutureExt;
use log::{debug, warn};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::dispatcher::SubmittedTask;
use crate::id::WorkerId;
use crate::options::ProcessorOptions;
use crate::task::{BoxError, TaskContext, TaskResult};

/// Worker state shared between the worker's run loop and the dispatcher.
///
/// The run loop is the only writer of `idle` and `processed` on completion,
/// and the dispatcher is the only reader. Loads are relaxed: the dispatch
/// heuristic tolerates observing slightly stale values.
#[derive(Debug)]
struct WorkerMonitor {
    idle: AtomicBool,
    processed: AtomicU64,
    defunct: AtomicBool,
}

impl WorkerMonitor {
    fn new() -> Self {
        Self {
            idle: AtomicBool::new(true),
            processed: AtomicU64::new(0),
            defunct: AtomicBool::new(false),
        }
    }
}

/// The dispatcher-side handle of one worker: a single-slot hand-off channel
/// and the shared monitor used for load-balanced assignment.
pub(crate) struct Worker<P, R> {
    id: WorkerId,
    slot: mpsc::Sender<SubmittedTask<P, R>>,
    monitor: Arc<WorkerMonitor>,
    runner: JoinHandle<()>,
}

impl<P, R> Worker<P, R>
where
    P: Send + 'static,
    R: Send + 'static,
{
    pub fn launch(
        id: WorkerId,
        options: Arc<ProcessorOptions>,
        output: mpsc::Sender<TaskResult<R>>,
        runtime: &Handle,
        shutdown: &CancellationToken,
    ) -> Self {
        let (slot, slot_rx) = mpsc::channel(1);
        let monitor = Arc::new(WorkerMonitor::new());
        let runner = runtime.spawn(run(
            id,
            options,
            slot_rx,
            output,
            shutdown.clone(),
            Arc::clone(&monitor),
        ));
        Self {
            id,
            slot,
            monitor,
            runner,
        }
    }

    /// Whether the dispatcher may route a task to this worker.
    pub fn is_available(&self) -> bool {
        !self.monitor.defunct.load(Ordering::Relaxed) && self.monitor.idle.load(Ordering::Relaxed)
    }

    /// The number of tasks this worker has processed over its lifetime.
    pub fn processed_count(&self) -> u64 {
        self.monitor.processed.load(Ordering::Relaxed)
    }

    /// Hands a task to the worker, marking it busy so that one dispatch
    /// decision is never spent twice. Gives the task back if the worker
    /// cannot take it.
    pub fn assign(&self, task: SubmittedTask<P, R>) -> Result<(), SubmittedTask<P, R>> {
        self.monitor.idle.store(false, Ordering::Relaxed);
        match self.slot.try_send(task) {
            Ok(()) => Ok(()),
            // The slot is occupied, so the worker is busy regardless of
            // what the monitor said.
            Err(mpsc::error::TrySendError::Full(task)) => Err(task),
            Err(mpsc::error::TrySendError::Closed(task)) => {
                self.monitor.defunct.store(true, Ordering::Relaxed);
                Err(task)
            }
        }
    }

    /// Stops accepting hand-offs and waits for the in-flight execution, if
    /// any, and its result emission to finish.
    pub async fn close(self) {
        let Self {
            id, slot, runner, ..
        } = self;
        drop(slot);
        if let Err(e) = runner.await {
            warn!("worker {id} terminated abnormally: {e}");
        }
    }
}

async fn run<P, R>(
    id: WorkerId,
    options: Arc<ProcessorOptions>,
    mut slot: mpsc::Receiver<SubmittedTask<P, R>>,
    output: mpsc::Sender<TaskResult<R>>,
    shutdown: CancellationToken,
    monitor: Arc<WorkerMonitor>,
) where
    P: Send + 'static,
    R: Send + 'static,
{
    debug!("worker {id} started");
    while let Some(task) = slot.recv().await {
        let identifier = task.identifier;
        let result = match execute(&options, &shutdown, task).await {
            Ok(result) => result,
            Err(error) => {
                // A propagated failure is fatal for this worker: report it,
                // leave the pool, and emit no result for the task.
                options.failure_handler.handle(&format!("worker {id}"), &error);
                monitor.defunct.store(true, Ordering::Relaxed);
                break;
            }
        };
        if output.send(result).await.is_err() {
            debug!("worker {id} discarding the result of {identifier}: output channel closed");
        }
        // The result must be observable before the task counts as processed.
        monitor.idle.store(true, Ordering::Relaxed);
        monitor.processed.fetch_add(1, Ordering::Relaxed);
    }
    debug!("worker {id} stopped after {} tasks", monitor.processed.load(Ordering::Relaxed));
}

async fn execute<P, R>(
    options: &ProcessorOptions,
    shutdown: &CancellationToken,
    task: SubmittedTask<P, R>,
) -> Result<TaskResult<R>, BoxError>
where
    P: Send + 'static,
    R: Send + 'static,
{
    let SubmittedTask { identifier, task } = task;
    let token = shutdown.child_token();
    let context = TaskContext::new(token.clone());
    let action = AssertUnwindSafe((task.action)(context, task.payload)).catch_unwind();
    match tokio::time::timeout(options.task_execution_timeout, action).await {
        Err(_) => {
            // The deadline elapsed. The computation is signaled to cancel,
            // but it may not have fully stopped when the result is emitted.
            token.cancel();
            debug!("{identifier} timed out after {:?}", options.task_execution_timeout);
            Ok(TaskResult::timeout(identifier))
        }
        Ok(Ok(Ok(value))) => Ok(TaskResult::success(identifier, value)),
        Ok(Ok(Err(error))) => {
            if options.fail_on_error {
                Err(error)
            } else {
                Ok(TaskResult::failure(identifier, error))
            }
        }
        Ok(Err(panic)) => {
            let error: BoxError = format!("task panicked: {}", panic_message(&panic)).into();
            if options.fail_on_error {
                Err(error)
            } else {
                Ok(TaskResult::failure(identifier, error))
            }
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
