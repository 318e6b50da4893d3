use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Element, apply_patch};
use crate::error::Result;
use crate::experiment::Frame;
use crate::message::ElementCategory;

/// Number of raw window input events kept by a [`GameWindow`].
pub const WINDOW_EVENT_CAPACITY: usize = 10;

/// Fixed-capacity FIFO that evicts its oldest entry when full.
#[derive(Debug, Clone, PartialEq)]
pub struct EventBuffer {
    events: VecDeque<Value>,
    capacity: usize,
}

impl EventBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// Append `event`, returning the evicted oldest event if the buffer was full.
    pub fn push(&mut self, event: Value) -> Option<Value> {
        let evicted = if self.events.len() >= self.capacity {
            self.events.pop_front()
        } else {
            None
        };
        self.events.push_back(event);
        evicted
    }

    pub fn pop(&mut self) -> Option<Value> {
        self.events.pop_front()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = &Value> {
        self.events.iter()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowMode {
    Responsive,
    Fixed,
}

#[derive(Debug, Default, Deserialize)]
struct WindowPatch {
    idx: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
    mode: Option<WindowMode>,
    image: Option<String>,
    text: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WindowState<'a> {
    idx: u32,
    size: (u32, u32),
    mode: WindowMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    frame: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<&'a str>,
    frame_id: u64,
}

/// Main display surface. Shows either an encoded image frame or text, and
/// buffers the most recent raw input events sent from the client window.
#[derive(Debug, Clone, PartialEq)]
pub struct GameWindow {
    idx: u32,
    width: u32,
    height: u32,
    mode: WindowMode,
    frame: Option<String>,
    text: Option<String>,
    frame_id: u64,
    events: EventBuffer,
}

impl Default for GameWindow {
    fn default() -> Self {
        Self {
            idx: 0,
            width: 700,
            height: 600,
            mode: WindowMode::Responsive,
            frame: None,
            text: None,
            frame_id: 0,
            events: EventBuffer::new(WINDOW_EVENT_CAPACITY),
        }
    }
}

impl GameWindow {
    /// Display a rendered frame. Image and text are mutually exclusive.
    pub fn show_frame(&mut self, frame: Frame, frame_id: u64) {
        match frame {
            Frame::Image(data) => {
                self.frame = Some(data);
                self.text = None;
            }
            Frame::Text(text) => {
                self.text = Some(text);
                self.frame = None;
            }
        }
        self.frame_id = frame_id;
    }

    /// Buffer a raw client input event, dropping the oldest one when full.
    pub fn add_event(&mut self, event: Value) -> Option<Value> {
        self.events.push(event)
    }

    /// Take the oldest buffered input event.
    pub fn next_event(&mut self) -> Option<Value> {
        self.events.pop()
    }

    pub fn clear_events(&mut self) {
        self.events.clear();
    }

    pub fn events(&self) -> &EventBuffer {
        &self.events
    }

    pub fn frame_id(&self) -> u64 {
        self.frame_id
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

impl Element for GameWindow {
    fn category(&self) -> ElementCategory {
        ElementCategory::GameWindow
    }

    fn update(&mut self, patch: &Value) -> Result<bool> {
        let p: WindowPatch = apply_patch(patch)?;
        let mut changed = false;
        if let Some(idx) = p.idx {
            self.idx = idx;
            changed = true;
        }
        if let Some(width) = p.width {
            self.width = width;
            changed = true;
        }
        if let Some(height) = p.height {
            self.height = height;
            changed = true;
        }
        if let Some(mode) = p.mode {
            self.mode = mode;
            changed = true;
        }
        if let Some(text) = p.text {
            self.show_frame(Frame::Text(text), self.frame_id);
            changed = true;
        }
        if let Some(image) = p.image {
            self.show_frame(Frame::Image(image), self.frame_id);
            changed = true;
        }
        Ok(changed)
    }

    fn state(&self) -> Result<Value> {
        Ok(serde_json::to_value(WindowState {
            idx: self.idx,
            size: (self.width, self.height),
            mode: self.mode,
            frame: self.frame.as_deref(),
            text: self.text.as_deref(),
            frame_id: self.frame_id,
        })?)
    }

    fn reset(&mut self) {
        self.frame = None;
        self.text = None;
        self.frame_id = 0;
        self.events.clear();
    }
}
