//! Recording session management
//!
//! `SessionCoordinator` owns the one authoritative `Session` and is the only
//! component that changes it. Everyone else talks to it through a
//! `CoordinatorHandle` and learns about changes from `STATE_CHANGED`
//! broadcasts.

mod coordinator;
mod state;

pub use coordinator::{CoordinatorHandle, CoordinatorMessage, SessionCoordinator};
pub use state::{Session, SessionSnapshot, SessionStatus};
