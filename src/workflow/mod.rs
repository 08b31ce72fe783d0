pub mod batch_session;
pub mod file_ctx;
pub mod file_flow;

pub use batch_session::{BatchSession, TransitionError};
pub use file_ctx::FileCtx;
pub use file_flow::{FileFlow, ProcessResult};
