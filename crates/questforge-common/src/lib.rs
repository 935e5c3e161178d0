//! Shared domain types for questforge.
//!
//! - `adventure`: the document aggregate built up by the generation pipeline
//! - `parse`: line-oriented parsers for the outline and illustration grammars
//! - `message`: session states and the status message pushed to viewers

pub mod adventure;
pub mod message;
pub mod parse;

pub use adventure::{Adventure, Episode, Illustration};
pub use message::{GenerationState, MessageKind, StatusMessage, UnknownState};
pub use parse::{parse_episodes, parse_illustrations};
