//! Wire messages and the channel categories they are routed to.
//!
//! Client → server frames are JSON objects whose top-level key names the
//! event kind. Server → client frames are single-key envelopes naming a UI
//! element category, or the bare string `"done"` when the trial ends.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{HippoError, Result};

/// Terminal message sent to the client when a trial completes.
pub const DONE_MESSAGE: &str = "done";

/// Error text carried by events built from unparseable frames.
pub const PARSE_ERROR_TEXT: &str = "unable to parse message";

// ─── Channel kinds ───────────────────────────────────────────────

/// Inbound event categories. Each kind gets its own FIFO channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Keyboard,
    Button,
    /// Generic actions, also the fallback for untagged or malformed frames.
    Action,
    Window,
    ControlPanel,
    TextBox,
    Grid,
    Info,
}

impl ChannelKind {
    pub const ALL: [Self; 8] = [
        Self::Keyboard,
        Self::Button,
        Self::Action,
        Self::Window,
        Self::ControlPanel,
        Self::TextBox,
        Self::Grid,
        Self::Info,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Keyboard => "keyboard",
            Self::Button => "button",
            Self::Action => "action",
            Self::Window => "window",
            Self::ControlPanel => "control_panel",
            Self::TextBox => "textbox",
            Self::Grid => "grid",
            Self::Info => "info",
        }
    }

    /// Map a top-level message key to its channel.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "KEYDOWN" | "KEYUP" => Some(Self::Keyboard),
            "BUTTONPRESSED" => Some(Self::Button),
            "ACTION" => Some(Self::Action),
            "GameWindow" | "WINDOW" => Some(Self::Window),
            "ControlPanel" => Some(Self::ControlPanel),
            "TextBox" => Some(Self::TextBox),
            "Grid" => Some(Self::Grid),
            "InfoPanel" => Some(Self::Info),
            _ => None,
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Inbound ─────────────────────────────────────────────────────

/// A client frame after routing. Parsing failures travel as `Malformed`
/// so the worker can stamp them with its own frame id.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    Parsed(Value),
    Malformed(String),
}

impl InboundFrame {
    /// Resolve the frame into an event value, converting parse failures into
    /// `{"error": "unable to parse message", "frameId": frame_id}`.
    pub fn into_event(self, frame_id: u64) -> Value {
        match self {
            Self::Parsed(value) => value,
            Self::Malformed(_) => parse_error_event(frame_id),
        }
    }
}

pub fn parse_error_event(frame_id: u64) -> Value {
    serde_json::json!({ "error": PARSE_ERROR_TEXT, "frameId": frame_id })
}

/// Decode a text frame and pick the channel it belongs to.
///
/// The first recognised top-level key wins. Untagged objects, non-object
/// JSON and unparseable text all go to the action channel.
pub fn classify(text: &str) -> (ChannelKind, InboundFrame) {
    match serde_json::from_str::<Value>(text) {
        Ok(value) => {
            let kind = value
                .as_object()
                .and_then(|obj| obj.keys().find_map(|k| ChannelKind::from_tag(k)))
                .unwrap_or(ChannelKind::Action);
            (kind, InboundFrame::Parsed(value))
        }
        Err(_) => (ChannelKind::Action, InboundFrame::Malformed(text.to_string())),
    }
}

/// First frame sent by the client.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    #[serde(default)]
    pub user_id: Option<Value>,
    #[serde(default)]
    pub project_id: Option<String>,
}

impl Handshake {
    /// Extract a non-empty user id. Numeric ids are accepted and stringified.
    pub fn parse(text: &str) -> Result<(String, Option<String>)> {
        let hs: Handshake = serde_json::from_str(text).map_err(|_| HippoError::MissingUserId)?;
        let user_id = match hs.user_id {
            Some(Value::String(s)) if !s.trim().is_empty() => s,
            Some(Value::Number(n)) => n.to_string(),
            _ => return Err(HippoError::MissingUserId),
        };
        Ok((user_id, hs.project_id))
    }
}

// ─── Outbound ────────────────────────────────────────────────────

/// UI element categories used as envelope keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementCategory {
    GameWindow,
    ControlPanel,
    InfoPanel,
    TextBox,
    Grid,
}

impl ElementCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::GameWindow => "GameWindow",
            Self::ControlPanel => "ControlPanel",
            Self::InfoPanel => "InfoPanel",
            Self::TextBox => "TextBox",
            Self::Grid => "Grid",
        }
    }

    /// Inbound channel carrying client events for this category.
    pub fn channel(self) -> ChannelKind {
        match self {
            Self::GameWindow => ChannelKind::Window,
            Self::ControlPanel => ChannelKind::ControlPanel,
            Self::InfoPanel => ChannelKind::Info,
            Self::TextBox => ChannelKind::TextBox,
            Self::Grid => ChannelKind::Grid,
        }
    }
}

/// Message travelling on the outbound channel, worker → communicator.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// `{ "<category>": <state> }`; a `Null` state hides the element.
    Ui {
        category: ElementCategory,
        state: Value,
    },
    Done,
}

impl Outbound {
    pub fn ui(category: ElementCategory, state: Value) -> Self {
        Self::Ui { category, state }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }

    /// Encode as a JSON text frame.
    pub fn encode(&self) -> Result<String> {
        let value = match self {
            Self::Ui { category, state } => {
                let mut envelope = serde_json::Map::with_capacity(1);
                envelope.insert(category.as_str().to_string(), state.clone());
                Value::Object(envelope)
            }
            Self::Done => Value::String(DONE_MESSAGE.to_string()),
        };
        Ok(serde_json::to_string(&value)?)
    }
}
