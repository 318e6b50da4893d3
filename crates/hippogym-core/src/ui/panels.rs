use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Element, apply_patch};
use crate::error::Result;
use crate::message::ElementCategory;

// ─── InfoPanel ───────────────────────────────────────────────────

/// Read-only panel of free text, a bullet list and key/value pairs.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InfoPanel {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    items: Vec<Value>,
    kv: BTreeMap<String, Value>,
}

#[derive(Debug, Default, Deserialize)]
struct InfoPatch {
    text: Option<String>,
    items: Option<Vec<Value>>,
    kv: Option<BTreeMap<String, Value>>,
}

impl InfoPanel {
    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    pub fn kv(&self) -> &BTreeMap<String, Value> {
        &self.kv
    }
}

impl Element for InfoPanel {
    fn category(&self) -> ElementCategory {
        ElementCategory::InfoPanel
    }

    fn update(&mut self, patch: &Value) -> Result<bool> {
        let p: InfoPatch = apply_patch(patch)?;
        let mut changed = false;
        if let Some(text) = p.text {
            self.text = Some(text);
            changed = true;
        }
        if let Some(items) = p.items {
            self.items = items;
            changed = true;
        }
        if let Some(kv) = p.kv {
            self.kv.extend(kv);
            changed = true;
        }
        Ok(changed)
    }

    fn state(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    fn reset(&mut self) {
        *self = Self::default();
    }
}

// ─── TextBox ─────────────────────────────────────────────────────

/// Editable text area with optional buttons underneath.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TextBox {
    text: String,
    buttons: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct TextBoxPatch {
    text: Option<String>,
    buttons: Option<Vec<String>>,
}

/// What a participant can send from a text box: the typed text.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct TextInput {
    text: Option<String>,
}

impl TextBox {
    pub fn text(&self) -> &str {
        &self.text
    }

    fn set_text(&mut self, text: String) -> bool {
        let changed = text != self.text;
        self.text = text;
        changed
    }
}

impl Element for TextBox {
    fn category(&self) -> ElementCategory {
        ElementCategory::TextBox
    }

    fn update(&mut self, patch: &Value) -> Result<bool> {
        let p: TextBoxPatch = apply_patch(patch)?;
        let mut changed = false;
        if let Some(text) = p.text {
            changed |= self.set_text(text);
        }
        if let Some(buttons) = p.buttons {
            changed |= buttons != self.buttons;
            self.buttons = buttons;
        }
        Ok(changed)
    }

    fn input(&mut self, event: &Value) -> Result<bool> {
        let p: TextInput = apply_patch(event)?;
        Ok(p.text.is_some_and(|text| self.set_text(text)))
    }

    fn state(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    fn reset(&mut self) {
        self.text.clear();
    }
}

// ─── ControlPanel ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Slider {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub min: f64,
    #[serde(default = "default_slider_max")]
    pub max: f64,
    #[serde(default)]
    pub value: f64,
}

fn default_slider_max() -> f64 {
    100.0
}

/// Buttons and sliders. The client reports slider moves back as
/// `{"ControlPanel": {"values": {"<slider id>": <value>}}}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControlPanel {
    buttons: Vec<String>,
    sliders: Vec<Slider>,
}

impl Default for ControlPanel {
    fn default() -> Self {
        Self {
            buttons: ["left", "right", "up", "down", "start", "pause"]
                .into_iter()
                .map(String::from)
                .collect(),
            sliders: Vec::new(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ControlPatch {
    buttons: Option<Vec<String>>,
    sliders: Option<Vec<Slider>>,
    values: Option<BTreeMap<String, f64>>,
}

/// What a participant can send from a control panel: slider positions.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct SliderInput {
    values: Option<BTreeMap<String, f64>>,
}

impl ControlPanel {
    pub fn slider(&self, id: &str) -> Option<&Slider> {
        self.sliders.iter().find(|s| s.id == id)
    }

    /// Move sliders, clamped to their range. Unknown ids are ignored.
    fn set_values(&mut self, values: BTreeMap<String, f64>) -> bool {
        let mut changed = false;
        for (id, value) in values {
            if let Some(slider) = self.sliders.iter_mut().find(|s| s.id == id) {
                let clamped = value.clamp(slider.min, slider.max);
                if clamped != slider.value {
                    slider.value = clamped;
                    changed = true;
                }
            }
        }
        changed
    }
}

impl Element for ControlPanel {
    fn category(&self) -> ElementCategory {
        ElementCategory::ControlPanel
    }

    fn update(&mut self, patch: &Value) -> Result<bool> {
        let p: ControlPatch = apply_patch(patch)?;
        let mut changed = false;
        if let Some(buttons) = p.buttons {
            self.buttons = buttons;
            changed = true;
        }
        if let Some(sliders) = p.sliders {
            self.sliders = sliders;
            changed = true;
        }
        if let Some(values) = p.values {
            changed |= self.set_values(values);
        }
        Ok(changed)
    }

    fn input(&mut self, event: &Value) -> Result<bool> {
        let p: SliderInput = apply_patch(event)?;
        Ok(p.values.is_some_and(|values| self.set_values(values)))
    }

    fn state(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    fn reset(&mut self) {
        for slider in &mut self.sliders {
            slider.value = slider.min;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn info_panel_merges_kv() {
        let mut panel = InfoPanel::default();
        panel.update(&json!({"kv": {"score": 1}})).unwrap();
        panel.update(&json!({"kv": {"episode": 2}, "text": "hi"})).unwrap();
        assert_eq!(panel.kv().len(), 2);
        assert_eq!(panel.text(), Some("hi"));
        panel.reset();
        assert!(panel.kv().is_empty());
    }

    #[test]
    fn text_box_reports_only_real_changes() {
        let mut tb = TextBox::default();
        assert!(tb.update(&json!({"text": "hello"})).unwrap());
        assert!(!tb.update(&json!({"text": "hello"})).unwrap());
        assert_eq!(tb.text(), "hello");
    }

    #[test]
    fn control_panel_clamps_slider_values() {
        let mut cp = ControlPanel::default();
        cp.update(&json!({"sliders": [{"id": "speed", "min": 1.0, "max": 10.0, "value": 5.0}]}))
            .unwrap();
        assert!(cp.update(&json!({"values": {"speed": 50.0}})).unwrap());
        assert_eq!(cp.slider("speed").unwrap().value, 10.0);
        // unknown slider ids are ignored
        assert!(!cp.update(&json!({"values": {"nope": 1.0}})).unwrap());
        cp.reset();
        assert_eq!(cp.slider("speed").unwrap().value, 1.0);
    }

    #[test]
    fn control_panel_client_input_only_moves_sliders() {
        let mut cp = ControlPanel::default();
        cp.update(&json!({"sliders": [{"id": "speed", "min": 0.0, "max": 10.0}]}))
            .unwrap();
        assert!(cp.input(&json!({"values": {"speed": 4.0}})).unwrap());
        assert_eq!(cp.slider("speed").unwrap().value, 4.0);

        assert!(cp.input(&json!({"buttons": []})).is_err());
        assert!(cp.input(&json!({"sliders": [], "values": {"speed": 1.0}})).is_err());
        assert_eq!(cp.slider("speed").unwrap().value, 4.0);
        assert_eq!(cp.state().unwrap()["buttons"].as_array().unwrap().len(), 6);
    }

    #[test]
    fn text_box_client_input_cannot_change_buttons() {
        let mut tb = TextBox::default();
        tb.update(&json!({"buttons": ["save"]})).unwrap();
        assert!(tb.input(&json!({"text": "typed"})).unwrap());
        assert!(tb.input(&json!({"buttons": []})).is_err());
        assert_eq!(tb.state().unwrap()["buttons"], json!(["save"]));
    }

    #[test]
    fn invalid_patch_is_an_error() {
        let mut tb = TextBox::default();
        assert!(tb.update(&json!({"text": 5})).is_err());
    }
}
