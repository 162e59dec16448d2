use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, info, warn};
use skiff_actor::actor::{Actor, ActorAction};
use skiff_actor::RetryStrategy;

use crate::dispatcher::{DispatcherActor, DispatcherOptions, SubmittedTask};
use crate::error::{ProcessorError, ProcessorResult};
use crate::id::IdGenerator;
use crate::worker::Worker;

#[async_trait]
impl<P, R> Actor for DispatcherActor<P, R>
where
    P: Send + 'static,
    R: Send + 'static,
{
    type Message = SubmittedTask<P, R>;
    type Options = DispatcherOptions<R>;
    type Error = ProcessorError;

    fn new(options: DispatcherOptions<R>) -> Self {
        let DispatcherOptions {
            options,
            output,
            runtime,
            shutdown,
            failure,
        } = options;
        let retry = RetryStrategy::Fixed {
            max_count: options.max_dispatch_attempts,
            delay: options.dispatch_retry_delay,
        };
        Self {
            options,
            workers: vec![],
            worker_ids: IdGenerator::new(),
            retry,
            output,
            runtime,
            shutdown,
            failure,
        }
    }

    fn start(&mut self) -> ProcessorResult<()> {
        debug!("dispatcher started");
        Ok(())
    }

    async fn receive(&mut self, message: SubmittedTask<P, R>) -> ProcessorResult<ActorAction> {
        match self.dispatch(message).await {
            Ok(()) => Ok(ActorAction::Continue),
            Err(error) => {
                // Sustained saturation is fatal for the whole processor.
                // The recorded error is surfaced on later submissions.
                let _ = self.failure.set(error.clone());
                Err(error)
            }
        }
    }

    async fn stop(self) -> ProcessorResult<()> {
        info!("dispatcher finished; closing {} workers", self.workers.len());
        for worker in self.workers {
            worker.close().await;
        }
        Ok(())
    }
}

impl<P, R> DispatcherActor<P, R>
where
    P: Send + 'static,
    R: Send + 'static,
{
    /// Routes one task to a worker: the least-loaded idle worker if there is
    /// one, a newly created worker while the pool may still grow, and
    /// otherwise a delayed retry until the attempt budget runs out.
    async fn dispatch(&mut self, task: SubmittedTask<P, R>) -> ProcessorResult<()> {
        let mut task = task;
        let mut delays = self.retry.delays();
        loop {
            task = match self.assign(task) {
                Ok(()) => return Ok(()),
                Err(task) => task,
            };
            match delays.next() {
                Some(delay) => {
                    debug!(
                        "no worker available for {}; retrying in {delay:?}",
                        task.identifier
                    );
                    tokio::time::sleep(delay).await;
                }
                None => {
                    warn!(
                        "dropping {}: no worker available after {} attempts",
                        task.identifier, self.options.max_dispatch_attempts
                    );
                    return Err(ProcessorError::DispatchExhausted {
                        attempts: self.options.max_dispatch_attempts,
                    });
                }
            }
        }
    }

    fn assign(&mut self, task: SubmittedTask<P, R>) -> Result<(), SubmittedTask<P, R>> {
        // Ties on the processed count go to the earliest-created worker.
        let candidate = self
            .workers
            .iter()
            .filter(|worker| worker.is_available())
            .min_by_key(|worker| worker.processed_count());
        if let Some(worker) = candidate {
            return worker.assign(task);
        }
        // Defunct workers keep occupying their pool slot, so losing a worker
        // permanently shrinks the effective capacity.
        if self.workers.len() < self.options.max_workers {
            match self.worker_ids.next() {
                Ok(worker_id) => {
                    debug!(
                        "growing the pool with worker {worker_id} ({} of {})",
                        self.workers.len() + 1,
                        self.options.max_workers
                    );
                    let worker = Worker::launch(
                        worker_id,
                        Arc::clone(&self.options),
                        self.output.clone(),
                        &self.runtime,
                        &self.shutdown,
                    );
                    let assigned = worker.assign(task);
                    self.workers.push(worker);
                    return assigned;
                }
                Err(e) => warn!("failed to allocate a worker ID: {e}"),
            }
        }
        Err(task)
    }
}
