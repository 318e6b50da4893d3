//! UI elements shown to the participant.
//!
//! Every element exposes the same capability set: apply an update, produce
//! its outbound envelope, and reset. The element set is closed; dispatch goes
//! through [`UiElement`].
//!
//! `update` is the server-side path (configuration, experiment code) and may
//! reshape an element. `input` is the only path client frames take and
//! accepts just what a participant can change in the browser.

mod game_window;
mod grid;
mod panels;

pub use game_window::{EventBuffer, GameWindow, WINDOW_EVENT_CAPACITY, WindowMode};
pub use grid::{Grid, MAX_GRID_DIM};
pub use panels::{ControlPanel, InfoPanel, Slider, TextBox};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{HippoError, Result};
use crate::message::{ElementCategory, Outbound};

pub trait Element {
    fn category(&self) -> ElementCategory;

    /// Apply a partial update. Returns whether the renderable state changed.
    fn update(&mut self, patch: &Value) -> Result<bool>;

    /// Apply an event sent by the client. Elements without client-side
    /// controls ignore it.
    fn input(&mut self, _event: &Value) -> Result<bool> {
        Ok(false)
    }

    /// Current renderable state.
    fn state(&self) -> Result<Value>;

    fn reset(&mut self);

    /// Envelope carrying the current state to the client.
    fn send(&self) -> Result<Outbound> {
        Ok(Outbound::ui(self.category(), self.state()?))
    }
}

pub(crate) fn apply_patch<T: DeserializeOwned + Default>(patch: &Value) -> Result<T> {
    match patch {
        Value::Null => Ok(T::default()),
        other => T::deserialize(other)
            .map_err(|e| HippoError::InvalidArgument(format!("invalid element update: {e}"))),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum UiElement {
    InfoPanel(InfoPanel),
    TextBox(TextBox),
    GameWindow(GameWindow),
    ControlPanel(ControlPanel),
    Grid(Grid),
}

impl UiElement {
    /// Default element of the given category.
    pub fn new(category: ElementCategory) -> Self {
        match category {
            ElementCategory::InfoPanel => Self::InfoPanel(InfoPanel::default()),
            ElementCategory::TextBox => Self::TextBox(TextBox::default()),
            ElementCategory::GameWindow => Self::GameWindow(GameWindow::default()),
            ElementCategory::ControlPanel => Self::ControlPanel(ControlPanel::default()),
            ElementCategory::Grid => Self::Grid(Grid::default()),
        }
    }

    pub fn from_spec(spec: &UiElementSpec) -> Result<Self> {
        let mut element = Self::new(spec.kind);
        element.update(&spec.options)?;
        Ok(element)
    }

    pub fn as_game_window_mut(&mut self) -> Option<&mut GameWindow> {
        match self {
            Self::GameWindow(w) => Some(w),
            _ => None,
        }
    }

    fn inner(&self) -> &dyn Element {
        match self {
            Self::InfoPanel(e) => e,
            Self::TextBox(e) => e,
            Self::GameWindow(e) => e,
            Self::ControlPanel(e) => e,
            Self::Grid(e) => e,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn Element {
        match self {
            Self::InfoPanel(e) => e,
            Self::TextBox(e) => e,
            Self::GameWindow(e) => e,
            Self::ControlPanel(e) => e,
            Self::Grid(e) => e,
        }
    }
}

impl Element for UiElement {
    fn category(&self) -> ElementCategory {
        self.inner().category()
    }

    fn update(&mut self, patch: &Value) -> Result<bool> {
        self.inner_mut().update(patch)
    }

    fn input(&mut self, event: &Value) -> Result<bool> {
        self.inner_mut().input(event)
    }

    fn state(&self) -> Result<Value> {
        self.inner().state()
    }

    fn reset(&mut self) {
        self.inner_mut().reset();
    }
}

/// Declarative element definition, as found in trial configuration.
///
/// ```toml
/// [[trial.steps.ui]]
/// kind = "GameWindow"
/// options = { width = 300, height = 300 }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UiElementSpec {
    pub kind: ElementCategory,
    #[serde(default)]
    pub options: Value,
}

impl UiElementSpec {
    pub fn new(kind: ElementCategory) -> Self {
        Self {
            kind,
            options: Value::Null,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn from_spec_applies_options() {
        let spec = UiElementSpec {
            kind: ElementCategory::TextBox,
            options: json!({"text": "Hello", "buttons": ["save"]}),
        };
        let element = UiElement::from_spec(&spec).unwrap();
        assert_eq!(element.category(), ElementCategory::TextBox);
        let state = element.state().unwrap();
        assert_eq!(state["text"], "Hello");
        assert_eq!(state["buttons"], json!(["save"]));
    }

    #[test]
    fn bad_options_fail_at_build() {
        let spec = UiElementSpec {
            kind: ElementCategory::GameWindow,
            options: json!({"width": "wide"}),
        };
        assert!(UiElement::from_spec(&spec).is_err());
    }

    #[test]
    fn info_panel_ignores_client_input() {
        let mut element = UiElement::from_spec(&UiElementSpec {
            kind: ElementCategory::InfoPanel,
            options: json!({"text": "instructions"}),
        })
        .unwrap();
        assert!(!element.input(&json!({"text": "overwritten"})).unwrap());
        assert_eq!(element.state().unwrap()["text"], "instructions");
    }

    #[test]
    fn send_wraps_state_in_envelope() {
        let element = UiElement::new(ElementCategory::Grid);
        let msg = element.send().unwrap();
        match msg {
            Outbound::Ui { category, state } => {
                assert_eq!(category, ElementCategory::Grid);
                assert_eq!(state["rows"], 3);
            }
            other => panic!("expected Ui message, got {other:?}"),
        }
    }
}
