pub mod engine;
pub mod merge;

use crate::stack::StackId;

pub use engine::{integrate_pending, FrameOutcome, IntegrationContext, IntegrationPhase, IntegrationReport};
pub use merge::{merge_image, MergeGuard, MergeStats};

/// Progress callbacks of the integration loop.
///
/// Implementors can drive spinners or logs. All methods default to no-ops.
pub trait ProgressReporter: Send + Sync {
    /// Frame `index` of `total` entered `phase`.
    fn phase(&self, _stack: StackId, _phase: IntegrationPhase, _index: usize, _total: usize) {}

    /// A frame left the queue.
    fn frame_done(&self, _stack: StackId, _name: &str, _outcome: &FrameOutcome) {}
}

pub struct NoOpReporter;
impl ProgressReporter for NoOpReporter {}
