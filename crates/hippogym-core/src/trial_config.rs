//! Trial templates and the resolver that turns a seed into a concrete trial
//! definition.
//!
//! Configurations are immutable. `sample` hands out an independent clone so
//! concurrent trials never share mutable sub-objects, and the same seed on
//! the same configuration always yields the same definition. Seed → arm
//! mapping is a SHA-256 digest, so it does not change across releases.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::bucket::digest_mod;
use crate::error::{HippoError, Result};
use crate::experiment::{ExperimentFactory, ExperimentSpec};
use crate::message::ElementCategory;
use crate::ui::UiElementSpec;

pub const DEFAULT_FRAMERATE: u32 = 30;
pub const DEFAULT_MAX_EPISODES: u32 = 20;

fn default_framerate() -> u32 {
    DEFAULT_FRAMERATE
}

fn default_max_episodes() -> u32 {
    DEFAULT_MAX_EPISODES
}

/// One stage of a trial: a single experiment run for a number of episodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrialStepSpec {
    #[serde(default)]
    pub name: String,
    pub experiment: ExperimentSpec,
    /// Overrides the trial-wide `max_episodes` for this step.
    #[serde(default)]
    pub max_episodes: Option<u32>,
    #[serde(default = "default_ui")]
    pub ui: Vec<UiElementSpec>,
    /// Keyboard key → action sent to the experiment on `KEYDOWN`.
    #[serde(default)]
    pub key_actions: BTreeMap<String, Value>,
}

fn default_ui() -> Vec<UiElementSpec> {
    vec![
        UiElementSpec::new(ElementCategory::GameWindow),
        UiElementSpec::new(ElementCategory::ControlPanel),
    ]
}

impl TrialStepSpec {
    pub fn new(name: impl Into<String>, experiment: ExperimentSpec) -> Self {
        Self {
            name: name.into(),
            experiment,
            max_episodes: None,
            ui: default_ui(),
            key_actions: BTreeMap::new(),
        }
    }

    pub fn with_max_episodes(mut self, max_episodes: u32) -> Self {
        self.max_episodes = Some(max_episodes);
        self
    }

    pub fn with_ui(mut self, ui: Vec<UiElementSpec>) -> Self {
        self.ui = ui;
        self
    }

    pub fn with_key_action(mut self, key: impl Into<String>, action: Value) -> Self {
        self.key_actions.insert(key.into(), action);
        self
    }
}

/// Template for a whole trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrialSpec {
    pub steps: Vec<TrialStepSpec>,
    #[serde(default = "default_framerate")]
    pub framerate: u32,
    /// Episodes per step for steps that do not set their own.
    #[serde(default = "default_max_episodes")]
    pub max_episodes: u32,
    /// Action restored after every step; `None` means "wait for input".
    #[serde(default)]
    pub default_action: Option<Value>,
    /// Whether the trial starts playing without a `start` button press.
    #[serde(default)]
    pub auto_start: bool,
}

impl TrialSpec {
    pub fn new(steps: Vec<TrialStepSpec>) -> Self {
        Self {
            steps,
            framerate: DEFAULT_FRAMERATE,
            max_episodes: DEFAULT_MAX_EPISODES,
            default_action: None,
            auto_start: false,
        }
    }

    /// Episode budget of `step`, falling back to the trial-wide default.
    pub fn episodes(&self, step: &TrialStepSpec) -> u32 {
        step.max_episodes.unwrap_or(self.max_episodes)
    }

    /// Reject templates that could never run to completion.
    pub fn validate(&self, factory: &dyn ExperimentFactory) -> Result<()> {
        if self.steps.is_empty() {
            return Err(HippoError::Configuration("trial has no steps".into()));
        }
        if self.framerate == 0 {
            return Err(HippoError::Configuration("framerate must be positive".into()));
        }
        for (i, step) in self.steps.iter().enumerate() {
            if self.episodes(step) == 0 {
                return Err(HippoError::Configuration(format!(
                    "step {i} ({}) has max_episodes = 0",
                    step.name
                )));
            }
            if !factory.knows(&step.experiment.id) {
                return Err(HippoError::Configuration(format!(
                    "step {i} ({}) uses unknown experiment {:?}",
                    step.name, step.experiment.id
                )));
            }
            // Each category has a single inbound channel, hence a single consumer.
            let mut seen = Vec::with_capacity(step.ui.len());
            for element in &step.ui {
                if seen.contains(&element.kind) {
                    return Err(HippoError::Configuration(format!(
                        "step {i} ({}) declares more than one {}",
                        step.name,
                        element.kind.as_str()
                    )));
                }
                seen.push(element.kind);
            }
        }
        Ok(())
    }
}

impl From<TrialStepSpec> for TrialSpec {
    fn from(step: TrialStepSpec) -> Self {
        Self::new(vec![step])
    }
}

/// Non-empty arm set of a seeded configuration. Only [`TrialConfig::seeded`]
/// builds one.
#[derive(Debug, Clone, PartialEq)]
pub struct SeededArms {
    arms: Vec<TrialSpec>,
}

impl SeededArms {
    pub fn arms(&self) -> &[TrialSpec] {
        &self.arms
    }

    fn index(&self, seed: u64) -> usize {
        digest_mod(&seed.to_be_bytes(), self.arms.len())
    }
}

/// Resolver from seed to trial definition.
#[derive(Debug, Clone, PartialEq)]
pub enum TrialConfig {
    /// Every user gets the same trial.
    Deterministic(TrialSpec),
    /// The seed picks one arm, reproducibly.
    Seeded(SeededArms),
}

impl TrialConfig {
    /// Seeded configuration over `arms`. An empty arm set is rejected here,
    /// before any user can connect.
    pub fn seeded(arms: Vec<TrialSpec>) -> Result<Self> {
        if arms.is_empty() {
            return Err(HippoError::Configuration(
                "seeded trial config needs at least one arm".into(),
            ));
        }
        Ok(Self::Seeded(SeededArms { arms }))
    }

    pub fn arm_count(&self) -> usize {
        match self {
            Self::Deterministic(_) => 1,
            Self::Seeded(seeded) => seeded.arms.len(),
        }
    }

    /// Index of the arm `seed` selects: SHA-256 of the seed's big-endian
    /// bytes, modulo the arm count.
    pub fn arm_index(&self, seed: u64) -> usize {
        match self {
            Self::Deterministic(_) => 0,
            Self::Seeded(seeded) => seeded.index(seed),
        }
    }

    /// Fresh trial definition for `seed`.
    pub fn sample(&self, seed: u64) -> TrialSpec {
        match self {
            Self::Deterministic(spec) => spec.clone(),
            Self::Seeded(seeded) => seeded.arms[seeded.index(seed)].clone(),
        }
    }

    pub fn validate(&self, factory: &dyn ExperimentFactory) -> Result<()> {
        match self {
            Self::Deterministic(spec) => spec.validate(factory),
            Self::Seeded(seeded) => seeded.arms.iter().try_for_each(|arm| arm.validate(factory)),
        }
    }
}

impl From<TrialSpec> for TrialConfig {
    fn from(spec: TrialSpec) -> Self {
        Self::Deterministic(spec)
    }
}

impl From<TrialStepSpec> for TrialConfig {
    fn from(step: TrialStepSpec) -> Self {
        Self::Deterministic(step.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experiment::Experiment;
    use serde_json::json;

    struct OnlyGrid;

    impl ExperimentFactory for OnlyGrid {
        fn knows(&self, id: &str) -> bool {
            id == "grid_walk"
        }

        fn create(&self, _spec: &ExperimentSpec) -> Result<Box<dyn Experiment>> {
            Err(HippoError::Experiment("not used in these tests".into()))
        }
    }

    fn arm(name: &str) -> TrialSpec {
        TrialStepSpec::new(name, ExperimentSpec::new("grid_walk")).into()
    }

    #[test]
    fn deterministic_ignores_seed() {
        let config = TrialConfig::from(arm("only"));
        let a = config.sample(0);
        let b = config.sample(12345);
        assert_eq!(a, b);
        assert_eq!(a.steps[0].name, "only");
    }

    #[test]
    fn empty_arms_fail_at_construction() {
        let err = TrialConfig::seeded(Vec::new()).unwrap_err();
        assert!(matches!(err, HippoError::Configuration(_)));
    }

    #[test]
    fn same_seed_same_arm() {
        let config = TrialConfig::seeded(vec![arm("a"), arm("b"), arm("c")]).unwrap();
        for seed in 0..50 {
            assert_eq!(config.sample(seed), config.sample(seed));
            assert_eq!(config.arm_index(seed), config.arm_index(seed));
        }
    }

    #[test]
    fn seeds_reach_every_arm() {
        let config = TrialConfig::seeded(vec![arm("a"), arm("b"), arm("c")]).unwrap();
        let mut hit = [false; 3];
        for seed in 0..100 {
            hit[config.arm_index(seed)] = true;
        }
        assert_eq!(hit, [true; 3]);
    }

    #[test]
    fn sample_does_not_alias_template() {
        let config = TrialConfig::from(arm("a"));
        let mut first = config.sample(0);
        first.steps[0].name = "mutated".into();
        assert_eq!(config.sample(0).steps[0].name, "a");
    }

    #[test]
    fn validate_catches_unknown_experiment_and_zero_episodes() {
        let factory = OnlyGrid;
        assert!(TrialConfig::from(arm("ok")).validate(&factory).is_ok());

        let unknown: TrialSpec = TrialStepSpec::new("x", ExperimentSpec::new("mystery")).into();
        assert!(TrialConfig::from(unknown).validate(&factory).is_err());

        let zero: TrialSpec = TrialStepSpec::new("z", ExperimentSpec::new("grid_walk"))
            .with_max_episodes(0)
            .into();
        assert!(zero.validate(&factory).is_err());

        let mut fast = arm("f");
        fast.framerate = 0;
        assert!(fast.validate(&factory).is_err());

        assert!(TrialSpec::new(Vec::new()).validate(&factory).is_err());

        let twice: TrialSpec = TrialStepSpec::new("t", ExperimentSpec::new("grid_walk"))
            .with_ui(vec![
                UiElementSpec::new(ElementCategory::TextBox),
                UiElementSpec::new(ElementCategory::TextBox),
            ])
            .into();
        assert!(twice.validate(&factory).is_err());
    }

    #[test]
    fn step_spec_deserializes_with_defaults() {
        let step: TrialStepSpec = serde_json::from_value(json!({
            "experiment": {"id": "grid_walk"}
        }))
        .unwrap();
        assert_eq!(step.max_episodes, None);
        assert_eq!(step.ui.len(), 2);
        assert!(step.key_actions.is_empty());
    }

    #[test]
    fn steps_inherit_the_trial_episode_budget() {
        let spec: TrialSpec = serde_json::from_value(json!({
            "max_episodes": 2,
            "steps": [
                {"experiment": {"id": "grid_walk"}},
                {"experiment": {"id": "grid_walk"}, "max_episodes": 7}
            ]
        }))
        .unwrap();
        assert_eq!(spec.episodes(&spec.steps[0]), 2);
        assert_eq!(spec.episodes(&spec.steps[1]), 7);

        let defaulted = arm("d");
        assert_eq!(defaulted.episodes(&defaulted.steps[0]), DEFAULT_MAX_EPISODES);
    }

    #[test]
    fn zero_trial_budget_fails_validation_unless_overridden() {
        let mut spec = arm("z");
        spec.max_episodes = 0;
        assert!(spec.validate(&OnlyGrid).is_err());

        spec.steps[0].max_episodes = Some(3);
        assert!(spec.validate(&OnlyGrid).is_ok());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let trial = serde_json::from_value::<TrialSpec>(json!({
            "max_episode": 2,
            "steps": [{"experiment": {"id": "grid_walk"}}]
        }));
        assert!(trial.is_err());

        let step = serde_json::from_value::<TrialStepSpec>(json!({
            "experiment": {"id": "grid_walk"},
            "episodes": 2
        }));
        assert!(step.is_err());
    }

    #[test]
    fn arm_choice_is_stable_across_instances() {
        let first = TrialConfig::seeded(vec![arm("a"), arm("b")]).unwrap();
        let second = TrialConfig::seeded(vec![arm("a"), arm("b")]).unwrap();
        for seed in 0..64 {
            assert_eq!(first.arm_index(seed), second.arm_index(seed));
            assert_eq!(
                first.sample(seed).steps[0].name,
                ["a", "b"][first.arm_index(seed)]
            );
        }
        match &first {
            TrialConfig::Seeded(seeded) => assert_eq!(seeded.arms().len(), 2),
            TrialConfig::Deterministic(_) => panic!("expected seeded config"),
        }
    }
}
