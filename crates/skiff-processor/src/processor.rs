use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use log::info;
use skiff_actor::actor::ActorHandle;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::dispatcher::{DispatcherActor, DispatcherOptions, SubmittedTask};
use crate::error::{ProcessorError, ProcessorResult};
use crate::id::{ProcessorId, TaskId};
use crate::options::ProcessorOptions;
use crate::runtime::ExecutionContext;
use crate::task::{Task, TaskIdentifier, TaskResult};

/// The runtime and lifetime of the caller that a processor can attach to.
///
/// The runtime is used for the processor's internal tasks when
/// `use_external_runtime` is set. If a cancellation token is supplied, the
/// processor's tasks observe it through their own child tokens, so
/// cancelling the caller's token cancels the engine.
#[derive(Debug, Clone)]
pub struct ParentContext {
    runtime: Handle,
    cancellation: Option<CancellationToken>,
}

impl ParentContext {
    pub fn new(runtime: Handle) -> Self {
        Self {
            runtime,
            cancellation: None,
        }
    }

    /// The context of the current tokio runtime.
    pub fn current() -> Self {
        Self::new(Handle::current())
    }

    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = Some(cancellation);
        self
    }
}

/// The public surface of the engine: accepts tasks, issues identifiers, and
/// drives the shutdown protocol.
///
/// `submit` and `close` may be called from multiple tasks concurrently.
/// Results are read from the receiver returned by `take_output`; there is a
/// single consumer, and results surface in completion order, not submission
/// order — use the returned identifiers to correlate.
#[derive(Debug)]
pub struct TaskProcessor<P, R>
where
    P: Send + 'static,
    R: Send + 'static,
{
    id: ProcessorId,
    options: Arc<ProcessorOptions>,
    dispatcher: Mutex<Option<ActorHandle<DispatcherActor<P, R>>>>,
    output: Mutex<Option<mpsc::Receiver<TaskResult<R>>>>,
    next_task_id: AtomicU64,
    failure: Arc<OnceLock<ProcessorError>>,
    context: Mutex<Option<ExecutionContext>>,
}

impl<P, R> TaskProcessor<P, R>
where
    P: Send + 'static,
    R: Send + 'static,
{
    /// Creates a processor after validating the options as a whole.
    ///
    /// A parent context is required when `use_external_runtime` is set;
    /// otherwise the processor provisions its own fixed-size runtime and
    /// releases it on `close`.
    pub fn try_new(
        options: ProcessorOptions,
        parent: Option<ParentContext>,
    ) -> ProcessorResult<Self> {
        options.validate()?;
        let context = if options.use_external_runtime {
            let Some(parent) = &parent else {
                return Err(ProcessorError::InvalidOptions(
                    "use_external_runtime requires a parent context".to_string(),
                ));
            };
            ExecutionContext::external(parent.runtime.clone())
        } else {
            ExecutionContext::dedicated(&options)?
        };
        let shutdown = parent
            .as_ref()
            .and_then(|parent| parent.cancellation.as_ref())
            .map(|token| token.child_token())
            .unwrap_or_default();

        let id = ProcessorId::random();
        let options = Arc::new(options);
        let failure = Arc::new(OnceLock::new());
        let (output_tx, output_rx) = mpsc::channel(options.output_buffer_capacity);
        let dispatcher_options = DispatcherOptions {
            options: Arc::clone(&options),
            output: output_tx,
            runtime: context.handle(),
            shutdown,
            failure: Arc::clone(&failure),
        };
        let dispatcher = {
            // The dispatch loop runs on the provisioned execution context.
            let _guard = context.handle().enter();
            ActorHandle::with_capacity(dispatcher_options, options.intake_buffer_capacity)
        };
        info!("processor {id} started");
        Ok(Self {
            id,
            options,
            dispatcher: Mutex::new(Some(dispatcher)),
            output: Mutex::new(Some(output_rx)),
            next_task_id: AtomicU64::new(1),
            failure,
            context: Mutex::new(Some(context)),
        })
    }

    pub fn id(&self) -> ProcessorId {
        self.id
    }

    pub fn options(&self) -> &ProcessorOptions {
        &self.options
    }

    /// Submits a task and returns the identifier its result will carry.
    ///
    /// Suspends while the intake queue is full and returns once the task is
    /// queued, not once it is dispatched or completed. Fails fast with
    /// `Closed` after shutdown began, or with the recorded fatal error once
    /// dispatch has been exhausted.
    pub async fn submit(&self, task: Task<P, R>) -> ProcessorResult<TaskIdentifier> {
        if let Some(error) = self.failure.get() {
            return Err(error.clone());
        }
        let dispatcher = self
            .dispatcher
            .lock()?
            .as_ref()
            .cloned()
            .ok_or(ProcessorError::Closed)?;
        let task_id = TaskId::from(self.next_task_id.fetch_add(1, Ordering::Relaxed));
        let identifier = TaskIdentifier {
            processor_id: self.id,
            task_id,
        };
        if let Err(error) = dispatcher.send(SubmittedTask { identifier, task }).await {
            return Err(self.failure.get().cloned().unwrap_or(error));
        }
        Ok(identifier)
    }

    /// Takes the receiving end of the output channel.
    ///
    /// The channel has a single consumer, so this succeeds once. The facade
    /// never closes the channel itself: it ends after the workers are
    /// released and the pending results are drained.
    pub fn take_output(&self) -> ProcessorResult<mpsc::Receiver<TaskResult<R>>> {
        self.output.lock()?.take().ok_or_else(|| {
            ProcessorError::Internal("the output channel has already been taken".to_string())
        })
    }

    /// Shuts the processor down exactly once.
    ///
    /// Stops task intake, waits until the dispatch loop has dispatched every
    /// queued task, then closes each worker, waiting for in-flight
    /// executions and their result emissions. A dedicated runtime is
    /// released afterwards. Calling `close` again, or `submit` after it,
    /// fails fast with `Closed`.
    pub async fn close(&self) -> ProcessorResult<()> {
        let dispatcher = self.dispatcher.lock()?.take().ok_or(ProcessorError::Closed)?;
        info!("processor {} closing", self.id);
        dispatcher.wait_for_stop().await;
        if let Some(context) = self.context.lock()?.take() {
            context.shutdown();
        }
        if let Some(error) = self.failure.get() {
            return Err(error.clone());
        }
        info!("processor {} closed", self.id);
        Ok(())
    }
}

impl<P, R> Drop for TaskProcessor<P, R>
where
    P: Send + 'static,
    R: Send + 'static,
{
    fn drop(&mut self) {
        // Release a dedicated runtime even when the processor was never
        // closed; `shutdown_background` is safe within async contexts.
        if let Ok(mut context) = self.context.lock() {
            if let Some(context) = context.take() {
                context.shutdown();
            }
        }
    }
}

/// Runs `block` with the processor and closes the processor on every exit
/// path. An error from the block takes precedence over a close error.
pub async fn with_processor<'a, P, R, T, F, Fut>(
    processor: &'a TaskProcessor<P, R>,
    block: F,
) -> ProcessorResult<T>
where
    P: Send + 'static,
    R: Send + 'static,
    F: FnOnce(&'a TaskProcessor<P, R>) -> Fut,
    Fut: Future<Output = ProcessorResult<T>>,
{
    let result = block(processor).await;
    let closed = processor.close().await;
    match (result, closed) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(error)) => Err(error),
        (Err(error), _) => Err(error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doubling_task(payload: u64) -> Task<u64, u64> {
        Task::new(payload, |_context, payload| async move {
            Ok(Some(payload * 2))
        })
    }

    #[tokio::test]
    async fn test_submit_close_and_drain() {
        let processor =
            TaskProcessor::try_new(ProcessorOptions::default(), Some(ParentContext::current()))
                .unwrap();
        let mut output = processor.take_output().unwrap();

        let mut submitted = vec![];
        for payload in 0..3 {
            submitted.push(processor.submit(doubling_task(payload)).await.unwrap());
        }
        processor.close().await.unwrap();

        let mut results = vec![];
        while let Some(result) = output.recv().await {
            results.push(result);
        }
        assert_eq!(results.len(), submitted.len());
        for result in &results {
            assert!(result.is_success());
            assert!(submitted.contains(&result.identifier));
        }
    }

    #[tokio::test]
    async fn test_operations_fail_fast_after_close() {
        let processor = TaskProcessor::<u64, u64>::try_new(
            ProcessorOptions::default(),
            Some(ParentContext::current()),
        )
        .unwrap();
        processor.close().await.unwrap();

        let error = processor.submit(doubling_task(1)).await.unwrap_err();
        assert!(matches!(error, ProcessorError::Closed));
        let error = processor.close().await.unwrap_err();
        assert!(matches!(error, ProcessorError::Closed));
    }

    #[tokio::test]
    async fn test_output_channel_has_a_single_consumer() {
        let processor = TaskProcessor::<u64, u64>::try_new(
            ProcessorOptions::default(),
            Some(ParentContext::current()),
        )
        .unwrap();
        assert!(processor.take_output().is_ok());
        assert!(processor.take_output().is_err());
        processor.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_external_runtime_requires_a_parent_context() {
        let error = TaskProcessor::<u64, u64>::try_new(ProcessorOptions::default(), None)
            .unwrap_err();
        assert!(error.to_string().contains("parent context"));
    }

    #[tokio::test]
    async fn test_with_processor_closes_on_success_and_failure() {
        let processor =
            TaskProcessor::try_new(ProcessorOptions::default(), Some(ParentContext::current()))
                .unwrap();
        let out = with_processor(&processor, |processor| async move {
            processor.submit(doubling_task(21)).await?;
            Ok(21)
        })
        .await
        .unwrap();
        assert_eq!(out, 21);
        // The helper closed the processor on the way out.
        let error = processor.submit(doubling_task(1)).await.unwrap_err();
        assert!(matches!(error, ProcessorError::Closed));

        let processor = TaskProcessor::<u64, u64>::try_new(
            ProcessorOptions::default(),
            Some(ParentContext::current()),
        )
        .unwrap();
        let error = with_processor(&processor, |_processor| async move {
            Err::<(), _>(ProcessorError::Internal("boom".to_string()))
        })
        .await
        .unwrap_err();
        assert!(matches!(error, ProcessorError::Internal(_)));
        let error = processor.close().await.unwrap_err();
        assert!(matches!(error, ProcessorError::Closed));
    }
}
