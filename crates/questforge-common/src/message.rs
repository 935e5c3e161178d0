use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle of one generation session.
///
/// ```text
/// initialized ──> connected ──> generating ──> completed
///      │                            ^   │
///      └────────────────────────────┘   └────> error   (reachable from any state)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationState {
    #[default]
    Initialized,
    Connected,
    Generating,
    Completed,
    Error,
}

impl GenerationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationState::Initialized => "initialized",
            GenerationState::Connected => "connected",
            GenerationState::Generating => "generating",
            GenerationState::Completed => "completed",
            GenerationState::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, GenerationState::Completed | GenerationState::Error)
    }

    /// Whether moving from `self` to `next` is a legal transition.
    ///
    /// The pipeline may start before any viewer connects, so `generating`
    /// is reachable straight from `initialized`. `error` may be forced from
    /// anywhere except itself.
    pub fn can_transition_to(&self, next: GenerationState) -> bool {
        use GenerationState::*;
        match (self, next) {
            (Error, _) => false,
            (_, Error) => true,
            (Initialized, Connected) => true,
            (Initialized | Connected, Generating) => true,
            (Generating, Completed) => true,
            _ => false,
        }
    }

    /// Default viewer-facing text announcing the state.
    pub fn announcement(&self) -> &'static str {
        match self {
            GenerationState::Initialized => "Session created",
            GenerationState::Connected => "🔌 Viewer connected",
            GenerationState::Generating => "🎲 Generating your adventure...",
            GenerationState::Completed => "✨ Adventure generation completed!",
            GenerationState::Error => "❌ Error generating adventure",
        }
    }
}

impl fmt::Display for GenerationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown generation state '{0}'")]
pub struct UnknownState(pub String);

impl FromStr for GenerationState {
    type Err = UnknownState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "initialized" => Ok(GenerationState::Initialized),
            "connected" => Ok(GenerationState::Connected),
            "generating" => Ok(GenerationState::Generating),
            "completed" => Ok(GenerationState::Completed),
            "error" => Ok(GenerationState::Error),
            _ => Err(UnknownState(s.to_string())),
        }
    }
}

/// What produced a status message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// A state transition.
    State,
    /// An explicit progress report from the pipeline.
    Update,
}

/// One frame pushed to viewers and kept in the session's message history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusMessage {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub status: GenerationState,
    pub message: String,
    #[serde(default)]
    pub output: String,
    pub timestamp: DateTime<Utc>,
}

impl StatusMessage {
    pub fn new(
        kind: MessageKind,
        status: GenerationState,
        message: impl Into<String>,
        output: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            status,
            message: message.into(),
            output: output.into(),
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use GenerationState::*;

    #[test]
    fn forward_transitions_are_allowed() {
        assert!(Initialized.can_transition_to(Connected));
        assert!(Initialized.can_transition_to(Generating));
        assert!(Connected.can_transition_to(Generating));
        assert!(Generating.can_transition_to(Completed));
    }

    #[test]
    fn backward_and_skipping_transitions_are_rejected() {
        assert!(!Generating.can_transition_to(Connected));
        assert!(!Completed.can_transition_to(Generating));
        assert!(!Initialized.can_transition_to(Completed));
        assert!(!Connected.can_transition_to(Connected));
    }

    #[test]
    fn error_is_reachable_from_everywhere_but_itself() {
        for state in [Initialized, Connected, Generating, Completed] {
            assert!(state.can_transition_to(Error), "{state} -> error");
        }
        assert!(!Error.can_transition_to(Error));
        assert!(!Error.can_transition_to(Completed));
    }

    #[test]
    fn state_round_trips_through_str() {
        for state in [Initialized, Connected, Generating, Completed, Error] {
            assert_eq!(state.as_str().parse::<GenerationState>().unwrap(), state);
        }
        assert!("running".parse::<GenerationState>().is_err());
    }

    #[test]
    fn status_message_wire_shape() {
        let msg = StatusMessage::new(MessageKind::Update, Generating, "Designing dungeons", "");
        let json: serde_json::Value = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "update");
        assert_eq!(json["status"], "generating");
        assert_eq!(json["message"], "Designing dungeons");
        assert_eq!(json["output"], "");
        assert!(json["timestamp"].is_string());
    }
}
