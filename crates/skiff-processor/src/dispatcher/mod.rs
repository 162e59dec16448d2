mod core;
mod event;

use std::sync::{Arc, OnceLock};

use skiff_actor::RetryStrategy;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub(crate) use event::SubmittedTask;

use crate::error::ProcessorError;
use crate::id::{IdGenerator, WorkerId};
use crate::options::ProcessorOptions;
use crate::task::TaskResult;
use crate::worker::Worker;

pub(crate) struct DispatcherOptions<R> {
    pub options: Arc<ProcessorOptions>,
    pub output: mpsc::Sender<TaskResult<R>>,
    pub runtime: Handle,
    pub shutdown: CancellationToken,
    pub failure: Arc<OnceLock<ProcessorError>>,
}

/// The single decision-maker that owns the worker pool.
///
/// The actor mailbox is the intake queue, so tasks are dispatched strictly
/// in submission order, and a retry delay for one task holds back the tasks
/// behind it. All pool membership and load accounting happens on this loop.
pub(crate) struct DispatcherActor<P, R> {
    options: Arc<ProcessorOptions>,
    workers: Vec<Worker<P, R>>,
    worker_ids: IdGenerator<WorkerId>,
    retry: RetryStrategy,
    output: mpsc::Sender<TaskResult<R>>,
    runtime: Handle,
    shutdown: CancellationToken,
    failure: Arc<OnceLock<ProcessorError>>,
}
