use tokio::runtime::{Builder, Handle, Runtime};

use crate::error::{ProcessorError, ProcessorResult};
use crate::options::ProcessorOptions;

/// The execution context that tasks of one processor run on: either a
/// dedicated fixed-size runtime owned by the processor, or a runtime
/// supplied by the caller. The choice is a resource-provisioning decision
/// and does not affect dispatch semantics.
#[derive(Debug)]
pub(crate) enum ExecutionContext {
    Dedicated { runtime: Runtime },
    External { handle: Handle },
}

impl ExecutionContext {
    pub fn dedicated(options: &ProcessorOptions) -> ProcessorResult<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(options.worker_pool_size)
            .thread_name("skiff-worker")
            .enable_all()
            .build()
            .map_err(|e| ProcessorError::Internal(e.to_string()))?;
        Ok(Self::Dedicated { runtime })
    }

    pub fn external(handle: Handle) -> Self {
        Self::External { handle }
    }

    pub fn handle(&self) -> Handle {
        match self {
            Self::Dedicated { runtime } => runtime.handle().clone(),
            Self::External { handle } => handle.clone(),
        }
    }

    /// Releases a dedicated runtime without blocking, so teardown is safe
    /// from within an async context. An external runtime stays untouched.
    pub fn shutdown(self) {
        match self {
            Self::Dedicated { runtime } => runtime.shutdown_background(),
            Self::External { .. } => {}
        }
    }
}
