use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio_util::sync::CancellationToken;

use crate::id::{ProcessorId, TaskId};

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The cancellation context handed to a task action.
///
/// The token is cancelled when the task exceeds its execution timeout or
/// when the processor's parent lifetime context is cancelled. Observing it
/// is cooperative: an action that ignores the token keeps running in the
/// background after its TIMEOUT result has been emitted.
#[derive(Debug, Clone)]
pub struct TaskContext {
    cancellation: CancellationToken,
}

impl TaskContext {
    pub(crate) fn new(cancellation: CancellationToken) -> Self {
        Self { cancellation }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.cancellation.cancelled().await
    }
}

pub(crate) type TaskAction<P, R> =
    Arc<dyn Fn(TaskContext, P) -> BoxFuture<'static, Result<Option<R>, BoxError>> + Send + Sync>;

/// One unit of submitted work: a payload and the computation to apply to it.
///
/// The action is expected to be a pure function of the payload and the
/// cancellation context. A successful action may still produce no value.
pub struct Task<P, R> {
    pub payload: P,
    pub(crate) action: TaskAction<P, R>,
}

impl<P, R> Task<P, R>
where
    P: Send + 'static,
    R: Send + 'static,
{
    pub fn new<F, Fut>(payload: P, action: F) -> Self
    where
        F: Fn(TaskContext, P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<R>, BoxError>> + Send + 'static,
    {
        Self {
            payload,
            action: Arc::new(move |context, payload| action(context, payload).boxed()),
        }
    }
}

/// Associates a submitted task with its eventual result.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct TaskIdentifier {
    /// The processor that accepted the task.
    pub processor_id: ProcessorId,
    /// The task identifier, unique within the processor.
    pub task_id: TaskId,
}

impl std::fmt::Display for TaskIdentifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "task {} of processor {}", self.task_id, self.processor_id)
    }
}

/// How the execution of a task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionState {
    Success,
    Failure,
    Timeout,
}

impl std::fmt::Display for CompletionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompletionState::Success => write!(f, "SUCCESS"),
            CompletionState::Failure => write!(f, "FAILURE"),
            CompletionState::Timeout => write!(f, "TIMEOUT"),
        }
    }
}

/// The outcome of one task, emitted exactly once on the output channel.
#[derive(Debug)]
pub struct TaskResult<R> {
    pub identifier: TaskIdentifier,
    /// The computed value; present only on success, and a successful
    /// action may still legitimately produce `None`.
    pub result: Option<R>,
    pub state: CompletionState,
    /// The error that caused the failure; set iff the state is `Failure`.
    pub failure_cause: Option<BoxError>,
}

impl<R> TaskResult<R> {
    pub(crate) fn success(identifier: TaskIdentifier, result: Option<R>) -> Self {
        Self {
            identifier,
            result,
            state: CompletionState::Success,
            failure_cause: None,
        }
    }

    pub(crate) fn failure(identifier: TaskIdentifier, cause: BoxError) -> Self {
        Self {
            identifier,
            result: None,
            state: CompletionState::Failure,
            failure_cause: Some(cause),
        }
    }

    pub(crate) fn timeout(identifier: TaskIdentifier) -> Self {
        Self {
            identifier,
            result: None,
            state: CompletionState::Timeout,
            failure_cause: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.state == CompletionState::Success
    }

    pub fn is_failure(&self) -> bool {
        self.state == CompletionState::Failure
    }

    pub fn is_timeout(&self) -> bool {
        self.state == CompletionState::Timeout
    }
}
