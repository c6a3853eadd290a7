//! Core data model definitions shared across Tribuna crates.
//!
//! This crate is the leaf of the workspace: envelope schemas and domain
//! records live here so that services and handlers can both depend on them
//! without depending on each other.

pub mod envelope;
pub mod event;
pub mod ids;
pub mod poll;
pub mod presence;
pub mod question;
pub mod role;
pub mod session;

// Intentionally curated re-exports for downstream consumers.
pub use envelope::{InboundFrame, OutboundFrame};
pub use event::{Event, EventStatus, RegistrationField, RegistrationMode};
pub use ids::{EventId, PollId, QuestionId, UserId};
pub use poll::{FinalResults, LivePoll, PollRecord, PollStatus, PollTally, StoredOptionResult};
pub use presence::{ChatMessageView, EngagementSeries, LiveViewer, ReportsCharts, ReportsSnapshot, TimeSeries};
pub use question::{QuestionBoards, QuestionRecord, QuestionStatus, QuestionView};
pub use role::{GlobalRole, SocketRole, StaffRole};
pub use session::SessionRecord;
