pub mod failure_log;

pub use failure_log::FailureLog;
