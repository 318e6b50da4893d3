//! Built-in experiments shipped with the server binary.

use hippogym_core::experiment::{Experiment, ExperimentFactory, ExperimentSpec, Frame, StepOutcome};
use hippogym_core::{HippoError, Result};
use serde::Deserialize;
use serde_json::{Value, json};

pub const GRID_WALK: &str = "grid_walk";

/// Registry of the experiments this binary knows how to build.
#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltinExperiments;

impl ExperimentFactory for BuiltinExperiments {
    fn knows(&self, id: &str) -> bool {
        id == GRID_WALK
    }

    fn create(&self, spec: &ExperimentSpec) -> Result<Box<dyn Experiment>> {
        match spec.id.as_str() {
            GRID_WALK => Ok(Box::new(GridWalk::default())),
            other => Err(HippoError::Configuration(format!("unknown experiment {other:?}"))),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct GridWalkOptions {
    size: usize,
    max_steps: u32,
}

impl Default for GridWalkOptions {
    fn default() -> Self {
        Self {
            size: 5,
            max_steps: 100,
        }
    }
}

/// Walk from the top-left corner to the bottom-right goal.
///
/// Actions are `"left" | "right" | "up" | "down"`; anything else is a no-op.
/// Each move costs 1, reaching the goal pays 10.
#[derive(Debug, Default)]
pub struct GridWalk {
    options: GridWalkOptions,
    pos: (usize, usize),
    steps: u32,
}

impl GridWalk {
    fn goal(&self) -> (usize, usize) {
        (self.options.size - 1, self.options.size - 1)
    }

    fn observation(&self) -> Value {
        json!({ "x": self.pos.0, "y": self.pos.1, "steps": self.steps })
    }
}

impl Experiment for GridWalk {
    fn start(&mut self, options: &Value) -> Result<()> {
        self.options = match options {
            Value::Null => GridWalkOptions::default(),
            other => GridWalkOptions::deserialize(other)
                .map_err(|e| HippoError::Experiment(format!("grid_walk options: {e}")))?,
        };
        if self.options.size < 2 {
            return Err(HippoError::Experiment("grid_walk size must be at least 2".into()));
        }
        self.reset()
    }

    fn step(&mut self, action: &Value) -> Result<StepOutcome> {
        let last = self.options.size - 1;
        let (x, y) = self.pos;
        let next = match action.as_str() {
            Some("left") => (x.saturating_sub(1), y),
            Some("right") => ((x + 1).min(last), y),
            Some("up") => (x, y.saturating_sub(1)),
            Some("down") => (x, (y + 1).min(last)),
            _ => {
                return Ok(StepOutcome {
                    observation: self.observation(),
                    reward: 0.0,
                    done: false,
                    info: json!({ "ignored": action }),
                });
            }
        };
        self.pos = next;
        self.steps += 1;

        let at_goal = self.pos == self.goal();
        Ok(StepOutcome {
            observation: self.observation(),
            reward: if at_goal { 10.0 } else { -1.0 },
            done: at_goal || self.steps >= self.options.max_steps,
            info: json!({ "goal": at_goal }),
        })
    }

    fn render(&mut self) -> Result<Frame> {
        let size = self.options.size;
        let goal = self.goal();
        let rows: Vec<String> = (0..size)
            .map(|y| {
                (0..size)
                    .map(|x| {
                        if (x, y) == self.pos {
                            '@'
                        } else if (x, y) == goal {
                            'G'
                        } else {
                            '.'
                        }
                    })
                    .collect()
            })
            .collect();
        Ok(Frame::Text(rows.join("\n")))
    }

    fn reset(&mut self) -> Result<()> {
        self.pos = (0, 0);
        self.steps = 0;
        Ok(())
    }

    fn close(&mut self) {}
}
