//! Session-independent building blocks for HippoGym: group assignment,
//! wire messages, UI elements, trial templates and collaborator traits.
//!
//! Nothing in this crate performs IO or spawns tasks.

pub mod bucket;
pub mod error;
pub mod experiment;
pub mod message;
pub mod trial_config;
pub mod ui;

pub use bucket::bucket;
pub use error::{HippoError, Result};
