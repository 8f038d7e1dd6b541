//! padsync Core - documents, presence and the change channel
//!
//! This crate provides the shared vocabulary of padsync:
//! - Documents addressed by caller-supplied identifiers
//! - Participant and cursor presence types
//! - The `ChangeChannel` abstraction and an in-process `ChannelHub`

pub mod channel;
pub mod document;
pub mod error;
pub mod hub;
pub mod presence;

pub use channel::{ChangeChannel, ChannelError, ChannelEvent, Subscription};
pub use document::{now_millis, Document, DocumentId};
pub use error::{Error, Result};
pub use hub::{ChannelHub, HubStats};
pub use presence::{CursorPayload, Participant, ParticipantId, PresenceMember};
