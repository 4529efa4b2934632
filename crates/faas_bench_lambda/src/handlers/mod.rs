pub mod orchestrator;
pub mod setup;
