//! Trial worker: one isolated experiment run for one user.
//!
//! State machine: `Unbuilt → Built → Running ⇄ Paused → Done`.
//!
//! Every iteration polls all inbound channels without blocking, steps the
//! experiment when playing with an action pending, records what happened and
//! then sleeps `1 / framerate`. The worker owns everything it touches; the
//! only things shared with the rest of the server are its channels.

use std::sync::Arc;
use std::time::Duration;

use hippogym_core::experiment::{Experiment, ExperimentFactory, Recorder, StepOutcome};
use hippogym_core::message::{ChannelKind, ElementCategory, Outbound};
use hippogym_core::trial_config::{TrialSpec, TrialStepSpec};
use hippogym_core::ui::{Element, UiElement};
use hippogym_core::{HippoError, Result};
use serde_json::{Value, json};
use tracing::{debug, error, info, warn};

use crate::channels::{InboundReceiver, OutboundSender, WorkerChannels, drain_now};
use crate::handlers::{MessageHandler, send_element};
use crate::recorder::{JsonlRecorder, RecordingConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrialState {
    Unbuilt,
    Built,
    Running,
    Paused,
    Done,
}

impl TrialState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unbuilt => "unbuilt",
            Self::Built => "built",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Done => "done",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Continue,
    Done,
}

/// Worker-side endpoints, split by consumer.
struct TrialIo {
    keyboard: InboundReceiver,
    button: InboundReceiver,
    action: InboundReceiver,
    handlers: Vec<MessageHandler>,
    outbound: OutboundSender,
}

impl TrialIo {
    fn new(mut channels: WorkerChannels) -> Result<Self> {
        let mut take = |kind: ChannelKind| {
            channels.inbound.take(kind).ok_or(HippoError::TrialState {
                expected: "fresh channel set",
                actual: "channel already consumed",
            })
        };
        let keyboard = take(ChannelKind::Keyboard)?;
        let button = take(ChannelKind::Button)?;
        let action = take(ChannelKind::Action)?;
        let mut handlers = Vec::new();
        for category in [
            ElementCategory::GameWindow,
            ElementCategory::ControlPanel,
            ElementCategory::InfoPanel,
            ElementCategory::TextBox,
            ElementCategory::Grid,
        ] {
            handlers.push(MessageHandler::new(category, take(category.channel())?));
        }
        Ok(Self {
            keyboard,
            button,
            action,
            handlers,
            outbound: channels.outbound,
        })
    }
}

pub struct Trial {
    id: String,
    user_id: String,
    seed: u64,
    spec: TrialSpec,
    factory: Arc<dyn ExperimentFactory>,
    recording: RecordingConfig,
    state: TrialState,
    step_index: usize,
    episode: u32,
    frame_id: u64,
    pending_action: Option<Value>,
    experiment: Option<Box<dyn Experiment>>,
    elements: Vec<UiElement>,
    recorders: Vec<Box<dyn Recorder>>,
}

impl Trial {
    pub fn new(
        user_id: impl Into<String>,
        seed: u64,
        spec: TrialSpec,
        factory: Arc<dyn ExperimentFactory>,
        recording: RecordingConfig,
    ) -> Self {
        let pending_action = spec.default_action.clone();
        Self {
            id: uuid::Uuid::now_v7().to_string(),
            user_id: user_id.into(),
            seed,
            spec,
            factory,
            recording,
            state: TrialState::Unbuilt,
            step_index: 0,
            episode: 0,
            frame_id: 0,
            pending_action,
            experiment: None,
            elements: Vec::new(),
            recorders: Vec::new(),
        }
    }

    /// Attach an additional recorder. Must be called before `build`.
    pub fn with_recorder(mut self, recorder: Box<dyn Recorder>) -> Self {
        self.recorders.push(recorder);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn state(&self) -> TrialState {
        self.state
    }

    pub fn episode(&self) -> u32 {
        self.episode
    }

    pub fn step_index(&self) -> usize {
        self.step_index
    }

    pub fn frame_id(&self) -> u64 {
        self.frame_id
    }

    pub fn is_done(&self) -> bool {
        self.state == TrialState::Done
    }

    fn play(&self) -> bool {
        self.state == TrialState::Running
    }

    fn current_step(&self) -> &TrialStepSpec {
        &self.spec.steps[self.step_index]
    }

    /// Materialize the experiment, UI elements and recorders. Runs once.
    pub fn build(&mut self) -> Result<()> {
        if self.state != TrialState::Unbuilt {
            return Err(HippoError::TrialState {
                expected: TrialState::Unbuilt.as_str(),
                actual: self.state.as_str(),
            });
        }
        if self.spec.steps.is_empty() {
            return Err(HippoError::Configuration("trial has no steps".into()));
        }
        if let Some(root) = &self.recording.dir {
            let recorder = JsonlRecorder::create(root, &self.id, self.recording.per_episode)?;
            self.recorders.push(Box::new(recorder));
        }
        self.load_step()?;
        self.state = TrialState::Built;
        self.record(json!({
            "kind": "trial_start",
            "trialId": self.id,
            "userId": self.user_id,
            "seed": self.seed,
        }));
        debug!(trial_id = %self.id, user_id = %self.user_id, seed = self.seed, "trial built");
        Ok(())
    }

    /// Create the experiment and elements for `step_index`.
    fn load_step(&mut self) -> Result<()> {
        let step = self.current_step().clone();
        let mut experiment = self.factory.create(&step.experiment)?;
        experiment.start(&step.experiment.options)?;
        self.elements = step
            .ui
            .iter()
            .map(UiElement::from_spec)
            .collect::<Result<Vec<_>>>()?;
        self.experiment = Some(experiment);
        Ok(())
    }

    /// Drive the trial until it is done. Consumes the trial.
    pub async fn run(mut self, channels: WorkerChannels) {
        let mut io = match TrialIo::new(channels) {
            Ok(io) => io,
            Err(e) => {
                error!(trial_id = %self.id, error = %e, "trial cannot attach to channels");
                return;
            }
        };
        if let Err(e) = self.start(&io) {
            error!(trial_id = %self.id, error = %e, "trial failed to start");
            self.finish(&io);
            return;
        }
        info!(trial_id = %self.id, user_id = %self.user_id, seed = self.seed, "trial running");

        let period = Duration::from_secs_f64(1.0 / f64::from(self.spec.framerate.max(1)));
        while self.tick(&mut io) == TickOutcome::Continue {
            tokio::time::sleep(period).await;
        }
        info!(trial_id = %self.id, user_id = %self.user_id, episodes = self.episode, "trial done");
    }

    /// Built → Running/Paused, and show the initial UI.
    fn start(&mut self, io: &TrialIo) -> Result<()> {
        if self.state != TrialState::Built {
            return Err(HippoError::TrialState {
                expected: TrialState::Built.as_str(),
                actual: self.state.as_str(),
            });
        }
        self.state = if self.spec.auto_start {
            TrialState::Running
        } else {
            TrialState::Paused
        };
        self.send_ui(io);
        Ok(())
    }

    fn send_ui(&self, io: &TrialIo) {
        for element in &self.elements {
            send_element(element, &io.outbound);
        }
    }

    /// One loop iteration.
    fn tick(&mut self, io: &mut TrialIo) -> TickOutcome {
        if self.is_done() {
            return TickOutcome::Done;
        }

        self.poll(io);
        if self.is_done() {
            return TickOutcome::Done;
        }

        if self.play() {
            self.render(io);
            if let Some(action) = self.pending_action.take() {
                match self.step(&action) {
                    Ok(outcome) => {
                        self.pending_action = self.spec.default_action.clone();
                        if outcome.done {
                            self.end_episode(io);
                        }
                    }
                    Err(e) => {
                        error!(trial_id = %self.id, error = %e, "experiment step failed, ending trial");
                        self.finish(io);
                    }
                }
            }
        }

        if self.is_done() {
            TickOutcome::Done
        } else {
            TickOutcome::Continue
        }
    }

    // ─── Polling ─────────────────────────────────────────────────

    fn poll(&mut self, io: &mut TrialIo) {
        for event in self.take_events(&mut io.keyboard) {
            self.record_message(ChannelKind::Keyboard, &event);
            if let Some(key) = event.get("KEYDOWN").and_then(Value::as_str) {
                if let Some(action) = self.current_step().key_actions.get(key) {
                    self.pending_action = Some(action.clone());
                }
            }
        }

        for event in self.take_events(&mut io.button) {
            self.record_message(ChannelKind::Button, &event);
            if let Some(button) = event.get("BUTTONPRESSED").and_then(Value::as_str) {
                self.press(button, io);
                if self.is_done() {
                    return;
                }
            }
        }

        for event in self.take_events(&mut io.action) {
            self.record_message(ChannelKind::Action, &event);
            if event.get("error").is_some() {
                warn!(trial_id = %self.id, event = %event, "unparseable client message");
            } else if let Some(action) = event.get("ACTION") {
                self.pending_action = Some(action.clone());
            }
        }

        for handler in &mut io.handlers {
            let category = handler.category();
            let element = self.elements.iter_mut().find(|e| e.category() == category);
            let events = handler.drain(element, self.frame_id, &io.outbound);
            for event in events {
                self.record_message(category.channel(), &event);
            }
        }

        if self.pending_action.is_none() {
            self.pending_action = self
                .elements
                .iter_mut()
                .find_map(UiElement::as_game_window_mut)
                .and_then(|window| window.next_event());
        }
    }

    fn take_events(&self, rx: &mut InboundReceiver) -> Vec<Value> {
        drain_now(rx)
            .into_iter()
            .map(|frame| frame.into_event(self.frame_id))
            .collect()
    }

    fn press(&mut self, button: &str, io: &TrialIo) {
        match button {
            "start" | "resume" => {
                if self.state == TrialState::Paused {
                    self.state = TrialState::Running;
                }
            }
            "pause" => {
                if self.state == TrialState::Running {
                    self.state = TrialState::Paused;
                }
            }
            "stop" | "end" => self.finish(io),
            "reset" => self.reset_episode(io),
            other => debug!(trial_id = %self.id, button = other, "unhandled button"),
        }
    }

    // ─── Stepping ────────────────────────────────────────────────

    fn render(&mut self, io: &TrialIo) {
        let Some(experiment) = self.experiment.as_mut() else {
            return;
        };
        let frame = match experiment.render() {
            Ok(frame) => frame,
            Err(e) => {
                warn!(trial_id = %self.id, error = %e, "render failed");
                return;
            }
        };
        self.frame_id += 1;
        self.record(json!({ "kind": "render", "frameId": self.frame_id, "frame": frame }));
        let frame_id = self.frame_id;
        if let Some(window) = self.elements.iter_mut().find_map(UiElement::as_game_window_mut) {
            window.show_frame(frame, frame_id);
        }
        if let Some(element) = self
            .elements
            .iter()
            .find(|e| e.category() == ElementCategory::GameWindow)
        {
            send_element(element, &io.outbound);
        }
    }

    fn step(&mut self, action: &Value) -> Result<StepOutcome> {
        let experiment = self.experiment.as_mut().ok_or(HippoError::TrialState {
            expected: "experiment loaded",
            actual: "no experiment",
        })?;
        let outcome = experiment.step(action)?;
        self.record(json!({
            "kind": "step",
            "step": self.step_index,
            "episode": self.episode,
            "frameId": self.frame_id,
            "action": action,
            "outcome": outcome,
        }));
        Ok(outcome)
    }

    // ─── Episode and trial boundaries ────────────────────────────

    fn end_episode(&mut self, io: &TrialIo) {
        self.episode += 1;
        self.record(json!({ "kind": "episode_end", "step": self.step_index, "episode": self.episode }));
        debug!(trial_id = %self.id, step = self.step_index, episode = self.episode, "episode complete");

        if self.episode < self.spec.episodes(self.current_step()) {
            self.reset_episode(io);
            return;
        }

        self.close_experiment();
        self.step_index += 1;
        self.episode = 0;
        if self.step_index >= self.spec.steps.len() {
            self.finish(io);
            return;
        }

        self.reset_recorders();
        if let Err(e) = self.load_step() {
            error!(trial_id = %self.id, step = self.step_index, error = %e, "failed to load next step");
            self.finish(io);
            return;
        }
        info!(trial_id = %self.id, step = self.step_index, "advanced to next trial step");
        self.send_ui(io);
    }

    /// Fresh episode within the current step.
    fn reset_episode(&mut self, io: &TrialIo) {
        if let Some(experiment) = self.experiment.as_mut() {
            if let Err(e) = experiment.reset() {
                warn!(trial_id = %self.id, error = %e, "experiment reset failed");
            }
        }
        let ui = self.current_step().ui.clone();
        for (element, spec) in self.elements.iter_mut().zip(&ui) {
            match UiElement::from_spec(spec) {
                Ok(fresh) => *element = fresh,
                Err(e) => {
                    warn!(trial_id = %self.id, category = spec.kind.as_str(), error = %e, "element rebuild failed");
                    element.reset();
                }
            }
        }
        self.reset_recorders();
        self.pending_action = self.spec.default_action.clone();
        self.send_ui(io);
    }

    /// Enter `Done`: close recorders and the experiment, tell the client.
    fn finish(&mut self, io: &TrialIo) {
        if self.is_done() {
            return;
        }
        self.record(json!({ "kind": "trial_end", "episode": self.episode, "step": self.step_index }));
        self.close_experiment();
        for recorder in &mut self.recorders {
            if let Err(e) = recorder.close() {
                warn!(trial_id = %self.id, error = %e, "recorder close failed");
            }
        }
        self.state = TrialState::Done;
        if io.outbound.send(Outbound::Done).is_err() {
            debug!(trial_id = %self.id, "outbound closed before done could be sent");
        }
    }

    /// Tear down a trial that will never run: close whatever `build`
    /// opened and remove its recording directory.
    pub fn discard(mut self) {
        self.close_experiment();
        for recorder in &mut self.recorders {
            if let Err(e) = recorder.close() {
                warn!(trial_id = %self.id, error = %e, "recorder close failed");
            }
        }
        self.recorders.clear();
        let Some(root) = &self.recording.dir else {
            return;
        };
        let dir = root.join(&self.id);
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => debug!(trial_id = %self.id, dir = %dir.display(), "discarded trial recording"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(trial_id = %self.id, dir = %dir.display(), error = %e, "failed to remove trial recording"),
        }
    }

    fn close_experiment(&mut self) {
        if let Some(mut experiment) = self.experiment.take() {
            experiment.close();
        }
    }

    // ─── Recording ───────────────────────────────────────────────

    fn record_message(&mut self, channel: ChannelKind, event: &Value) {
        self.record(json!({
            "kind": "message",
            "channel": channel.as_str(),
            "frameId": self.frame_id,
            "event": event,
        }));
    }

    fn record(&mut self, event: Value) {
        for recorder in &mut self.recorders {
            if let Err(e) = recorder.record(event.clone()) {
                warn!(trial_id = %self.id, error = %e, "recorder write failed");
            }
        }
    }

    fn reset_recorders(&mut self) {
        for recorder in &mut self.recorders {
            if let Err(e) = recorder.reset() {
                warn!(trial_id = %self.id, error = %e, "recorder reset failed");
            }
        }
    }
}
