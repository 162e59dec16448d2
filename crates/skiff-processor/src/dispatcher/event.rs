use crate::task::{Task, TaskIdentifier};

/// A submitted task paired with the identifier issued for it, queued for
/// dispatch in the order of submission.
pub(crate) struct SubmittedTask<P, R> {
    pub identifier: TaskIdentifier,
    pub task: Task<P, R>,
}
