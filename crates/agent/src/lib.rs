//! Voice room agent
//!
//! Session orchestration for the WorldWeaver history assistant:
//! - Turn model and the single-writer turn controller (barge-in, announcements)
//! - Connection observer feeding room events and side-channel context to the bus
//! - Session lifecycle manager (authenticated join, reconnection, shutdown)

pub mod controller;
pub mod lifecycle;
pub mod observer;
pub mod turn;

pub use controller::{TurnController, TurnControllerConfig};
pub use lifecycle::{
    ConnectionState, LifecycleManager, Providers, Session, SessionEnd, SessionError,
    SessionReport, ShutdownHandle,
};
pub use observer::ConnectionObserver;
pub use turn::{Turn, TurnId, TurnOrigin, TurnRecord, TurnState, TurnStatus, TurnTransition};
pub use weaver_core::AccessCredential;
