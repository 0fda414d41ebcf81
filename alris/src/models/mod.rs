//! Data models for the chat transcript.

mod message;

pub use message::{Message, MessageId, Role};
