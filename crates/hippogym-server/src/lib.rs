pub mod channels;
pub mod communicator;
pub mod config;
pub mod experiments;
pub mod handlers;
pub mod orchestrator;
pub mod recorder;
pub mod server;
pub mod trial;
