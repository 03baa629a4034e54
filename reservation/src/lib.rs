//! Client-side reservation core for conference sessions.
//!
//! Two pieces do the real work:
//! - [`clash::ClashDetector`] decides which of the user's reservations overlap
//!   a candidate session.
//! - [`machine::ReservationStateMachine`] observes one session's seat
//!   availability, confirmed status and request outcomes, and writes
//!   reserve / cancel / swap requests to the user's request queue.
//!
//! Seat arbitration happens server-side; this crate only issues requests and
//! observes confirmed state through a [`store::ReservationStore`].

pub mod clash;
pub mod config;
pub mod document;
pub mod error;
pub mod identity;
pub mod machine;
pub mod model;
pub mod planner;
pub mod provider;
pub mod request;
pub mod store;
pub mod subscription;

pub use clash::ClashDetector;
pub use config::ReservationConfig;
pub use error::{ListenerError, ReservationError, StoreError};
pub use identity::{IdentityProvider, SignedInUser};
pub use machine::ReservationStateMachine;
pub use model::{
    ActionFamily, ReservationResult, ReservationStatus, ReservedSession, Session, SessionId,
    TimeInterval, UserId,
};
pub use planner::{ToggleAction, plan_toggle};
pub use provider::{ReservationEvent, ReservationTracker, SessionCatalog, SessionProvider};
pub use request::{RequestAction, ReservationQueueActionType, ReservationRequest};
pub use store::ReservationStore;
