//! Moderation actions and their normalized outcomes.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// What to do to a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionKind {
    #[serde(rename = "blockUser")]
    Block,
    #[serde(rename = "unblockUser")]
    Unblock,
}

impl ActionKind {
    /// `act` value understood by `/x/relation/modify`.
    pub fn action_code(self) -> u8 {
        match self {
            ActionKind::Block => 5,
            ActionKind::Unblock => 6,
        }
    }

    pub fn verb(self) -> &'static str {
        match self {
            ActionKind::Block => "block",
            ActionKind::Unblock => "unblock",
        }
    }

    /// Present participle for progress lines.
    pub fn progressive(self) -> &'static str {
        match self {
            ActionKind::Block => "blocking",
            ActionKind::Unblock => "unblocking",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.verb())
    }
}

impl FromStr for ActionKind {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "block" | "blockuser" => Ok(ActionKind::Block),
            "unblock" | "unblockuser" => Ok(ActionKind::Unblock),
            _ => Err(()),
        }
    }
}

/// Result of a single block/unblock invocation. Also the reply envelope of
/// the session worker (`{success, message, data?}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub success: bool,
    pub message: String,
    #[serde(rename = "data", default, skip_serializing_if = "Option::is_none")]
    pub raw_response: Option<Value>,
}

impl ActionOutcome {
    pub fn succeeded(message: impl Into<String>, raw_response: Option<Value>) -> Self {
        Self {
            success: true,
            message: message.into(),
            raw_response,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            raw_response: None,
        }
    }

    pub fn rejected(message: impl Into<String>, raw_response: Value) -> Self {
        Self {
            success: false,
            message: message.into(),
            raw_response: Some(raw_response),
        }
    }
}
