pub mod persistence;
pub mod restore;

pub use persistence::{PersistedSession, SessionStore};
pub use restore::{restore, FreshReason, RestoreOutcome, RestorePolicy};
