//! UI element message handlers.
//!
//! A handler owns the inbound channel of one element category and applies
//! every queued client event to the element bound to it through
//! [`Element::input`], so a client can click, type and move sliders but never
//! reshape an element. Draining never waits: an empty channel returns
//! immediately.

use hippogym_core::message::ElementCategory;
use hippogym_core::ui::{Element, UiElement};
use serde_json::Value;
use tracing::{debug, warn};

use crate::channels::{InboundReceiver, OutboundSender, drain_now};

pub struct MessageHandler {
    category: ElementCategory,
    rx: InboundReceiver,
}

impl MessageHandler {
    pub fn new(category: ElementCategory, rx: InboundReceiver) -> Self {
        Self { category, rx }
    }

    pub fn category(&self) -> ElementCategory {
        self.category
    }

    /// Apply all queued events to `element` and return them for recording.
    ///
    /// With no bound element (the current step does not show this category)
    /// events are drained and returned untouched.
    pub fn drain(
        &mut self,
        element: Option<&mut UiElement>,
        frame_id: u64,
        outbound: &OutboundSender,
    ) -> Vec<Value> {
        let events: Vec<Value> = drain_now(&mut self.rx)
            .into_iter()
            .map(|frame| frame.into_event(frame_id))
            .collect();

        let Some(element) = element else {
            if !events.is_empty() {
                debug!(
                    category = self.category.as_str(),
                    count = events.len(),
                    "no element bound, events ignored"
                );
            }
            return events;
        };

        let mut changed = false;
        for event in &events {
            let Some(payload) = element_payload(self.category, event) else {
                continue;
            };
            match &mut *element {
                UiElement::GameWindow(window) => {
                    if let Some(evicted) = window.add_event(payload.clone()) {
                        debug!(evicted = %evicted, "window event buffer full, dropped oldest");
                    }
                }
                other => match other.input(payload) {
                    Ok(c) => changed |= c,
                    Err(e) => {
                        warn!(category = self.category.as_str(), error = %e, "rejected client input");
                    }
                },
            }
        }

        if changed {
            send_element(element, outbound);
        }
        events
    }
}

/// Payload addressed to an element, i.e. the value under its category tag.
fn element_payload(category: ElementCategory, event: &Value) -> Option<&Value> {
    let obj = event.as_object()?;
    if obj.contains_key("error") {
        return None;
    }
    match category {
        ElementCategory::GameWindow => obj.get("GameWindow").or_else(|| obj.get("WINDOW")),
        other => obj.get(other.as_str()),
    }
}

/// Push the element's current state onto the outbound channel. A state that
/// fails to serialize is reported and skipped.
pub fn send_element(element: &UiElement, outbound: &OutboundSender) {
    match element.send() {
        Ok(msg) => {
            if outbound.send(msg).is_err() {
                debug!(category = element.category().as_str(), "outbound channel closed");
            }
        }
        Err(e) => {
            warn!(category = element.category().as_str(), error = %e, "failed to serialize element state");
        }
    }
}
