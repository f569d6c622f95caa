//! Business engine
//!
//! The per-session half of the command pipeline: bounded conversation
//! memory with the customer ring, the confidence-gated confirmation state
//! machine, intent dispatch onto the transactional data services, and the
//! response generator (templates first, LLM fallback).

pub mod engine;
pub mod gate;
pub mod memory;
pub mod responder;

pub use engine::{BusinessEngine, SessionCtx};
pub use gate::{ConfirmOutcome, ConfirmationGate, GateDecision, PendingIntent};
pub use memory::{ConversationMemory, MentionedCustomer, Turn, TurnRole};
pub use responder::ResponseGenerator;
