//! Conversation memory
//!
//! Bounded per-session turn history, the last computed BAS report, and an
//! in-process session registry. Nothing here is durable.

pub mod session;
pub mod store;

pub use session::{ConversationState, SessionPhase, SessionStore, DEFAULT_SESSION_IDLE_TTL};
pub use store::{ConversationHistory, ConversationTurn, HISTORY_CAPACITY};
