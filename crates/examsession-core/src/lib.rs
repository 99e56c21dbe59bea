//! examsession-core: Timed exam session engine.
//!
//! This crate defines the exam data model, the gateway and clock traits, and
//! the session machinery built on them: the deadline clock, the answer commit
//! pipeline, the session controller and the result aggregator.

pub mod aggregate;
pub mod clock;
pub mod controller;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod session;
pub mod traits;

pub use aggregate::{ExamResult, ReviewItem, ReviewStatus};
pub use clock::{Clock, DeadlineClock, ManualClock, SystemClock};
pub use controller::{ExamSession, LoadOutcome, SessionConfig};
pub use error::{GatewayError, SessionError};
pub use pipeline::CommitOutcome;
pub use session::{
    Action, Direction, EndReason, Outcome, SessionSnapshot, SessionStatus, StaleState,
};
pub use traits::{CommitRequest, CredentialProvider, ExamGateway, StaticCredentials};
