// Coalescing batch scheduling for naturally batchable transforms

pub mod scheduler;
pub mod window;

pub use scheduler::{BatchHandle, BatchOutcome, BatchProgress, BatchScheduler, BatchTransformer};
pub use window::FlushWindow;
