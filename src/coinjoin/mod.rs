pub mod messages;
pub mod session;

pub use messages::{ClientMessage, CoordinatorMessage, WireTransaction};
pub use session::{
    join_message_bytes, Coordinator, CoordinatorKey, JoinSubmission, Outgoing, ParticipantId,
    SessionId, SessionState,
};
