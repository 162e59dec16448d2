use std::sync::Arc;
use std::time::Duration;

use log::error;

use crate::error::{ProcessorError, ProcessorResult};
use crate::task::BoxError;

pub const MAX_WORKER_POOL_SIZE: usize = 10;
pub const DEFAULT_WORKER_POOL_SIZE: usize = 5;

pub const MAX_WORKER_COUNT: usize = 1000;
pub const DEFAULT_WORKER_COUNT: usize = 10;

pub const MAX_DISPATCH_RETRY_DELAY: Duration = Duration::from_secs(10);
pub const DEFAULT_DISPATCH_RETRY_DELAY: Duration = Duration::from_secs(1);

pub const MAX_DISPATCH_ATTEMPTS: usize = 10;
pub const DEFAULT_DISPATCH_ATTEMPTS: usize = 3;

pub const DEFAULT_TASK_EXECUTION_TIMEOUT: Duration = Duration::from_secs(10);

pub const MAX_OUTPUT_BUFFER_CAPACITY: usize = 100;
pub const DEFAULT_OUTPUT_BUFFER_CAPACITY: usize = 10;

pub const MAX_INTAKE_BUFFER_CAPACITY: usize = 100;
pub const DEFAULT_INTAKE_BUFFER_CAPACITY: usize = 10;

/// Receives failures that escape a worker when `fail_on_error` is set.
///
/// The processor reports `(context label, error)` pairs and never formats
/// or writes log output for this path itself.
pub trait FailureHandler: Send + Sync {
    fn handle(&self, context: &str, error: &BoxError);
}

/// The default failure handler, reporting through the `log` facade.
pub struct LogFailureHandler;

impl FailureHandler for LogFailureHandler {
    fn handle(&self, context: &str, error: &BoxError) {
        error!("unhandled failure in {context}: {error}");
    }
}

/// Parameters governing one processor instance.
///
/// All fields are fixed once the processor is constructed. `validate` checks
/// the options as a whole and rejects out-of-range values instead of
/// adjusting them.
#[derive(Clone)]
pub struct ProcessorOptions {
    /// Run workers on the runtime supplied by the parent context instead of
    /// provisioning a dedicated one.
    pub use_external_runtime: bool,
    /// The number of threads of the dedicated worker runtime. Must be zero
    /// when `use_external_runtime` is set, and within
    /// `1..=MAX_WORKER_POOL_SIZE` otherwise.
    pub worker_pool_size: usize,
    /// Propagate an action error out of the worker instead of converting it
    /// into a FAILURE result. The failing worker reports the error through
    /// `failure_handler` and permanently leaves the pool.
    pub fail_on_error: bool,
    /// The upper bound on the number of workers ever created.
    pub max_workers: usize,
    /// The delay before the next dispatch attempt when all workers are busy
    /// and the pool is at capacity.
    pub dispatch_retry_delay: Duration,
    /// The total dispatch attempt budget per task.
    pub max_dispatch_attempts: usize,
    /// The execution deadline applied to each task, measured from the
    /// moment a worker starts running it.
    pub task_execution_timeout: Duration,
    /// The capacity of the result channel shared by all workers.
    pub output_buffer_capacity: usize,
    /// The number of submitted tasks that can wait for dispatch before
    /// `submit` suspends the caller.
    pub intake_buffer_capacity: usize,
    /// Receives uncaught worker failures when `fail_on_error` is set.
    pub failure_handler: Arc<dyn FailureHandler>,
}

impl std::fmt::Debug for ProcessorOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessorOptions")
            .field("use_external_runtime", &self.use_external_runtime)
            .field("worker_pool_size", &self.worker_pool_size)
            .field("fail_on_error", &self.fail_on_error)
            .field("max_workers", &self.max_workers)
            .field("dispatch_retry_delay", &self.dispatch_retry_delay)
            .field("max_dispatch_attempts", &self.max_dispatch_attempts)
            .field("task_execution_timeout", &self.task_execution_timeout)
            .field("output_buffer_capacity", &self.output_buffer_capacity)
            .field("intake_buffer_capacity", &self.intake_buffer_capacity)
            .field("failure_handler", &"<dyn FailureHandler>")
            .finish()
    }
}

impl Default for ProcessorOptions {
    fn default() -> Self {
        Self {
            use_external_runtime: true,
            worker_pool_size: 0,
            fail_on_error: false,
            max_workers: DEFAULT_WORKER_COUNT,
            dispatch_retry_delay: DEFAULT_DISPATCH_RETRY_DELAY,
            max_dispatch_attempts: DEFAULT_DISPATCH_ATTEMPTS,
            task_execution_timeout: DEFAULT_TASK_EXECUTION_TIMEOUT,
            output_buffer_capacity: DEFAULT_OUTPUT_BUFFER_CAPACITY,
            intake_buffer_capacity: DEFAULT_INTAKE_BUFFER_CAPACITY,
            failure_handler: Arc::new(LogFailureHandler),
        }
    }
}

impl ProcessorOptions {
    pub fn validate(&self) -> ProcessorResult<()> {
        if self.use_external_runtime {
            if self.worker_pool_size != 0 {
                return Err(ProcessorError::InvalidOptions(
                    "worker_pool_size must be 0 when use_external_runtime is set".to_string(),
                ));
            }
        } else {
            Self::validate_range("worker_pool_size", self.worker_pool_size, MAX_WORKER_POOL_SIZE)?;
        }
        Self::validate_range("max_workers", self.max_workers, MAX_WORKER_COUNT)?;
        Self::validate_delay(
            "dispatch_retry_delay",
            self.dispatch_retry_delay,
            MAX_DISPATCH_RETRY_DELAY,
        )?;
        Self::validate_range(
            "max_dispatch_attempts",
            self.max_dispatch_attempts,
            MAX_DISPATCH_ATTEMPTS,
        )?;
        if self.task_execution_timeout.is_zero() {
            return Err(ProcessorError::InvalidOptions(
                "task_execution_timeout must be positive".to_string(),
            ));
        }
        Self::validate_range(
            "output_buffer_capacity",
            self.output_buffer_capacity,
            MAX_OUTPUT_BUFFER_CAPACITY,
        )?;
        Self::validate_range(
            "intake_buffer_capacity",
            self.intake_buffer_capacity,
            MAX_INTAKE_BUFFER_CAPACITY,
        )?;
        Ok(())
    }

    fn validate_range(field: &str, value: usize, max: usize) -> ProcessorResult<()> {
        if (1..=max).contains(&value) {
            Ok(())
        } else {
            Err(ProcessorError::InvalidOptions(format!(
                "{field} must be within 1..={max}, got {value}"
            )))
        }
    }

    fn validate_delay(field: &str, value: Duration, max: Duration) -> ProcessorResult<()> {
        if !value.is_zero() && value <= max {
            Ok(())
        } else {
            Err(ProcessorError::InvalidOptions(format!(
                "{field} must be within 1ms..={max:?}, got {value:?}"
            )))
        }
    }
}
