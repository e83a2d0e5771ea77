pub mod archive;
pub mod converter;
pub mod orchestrator;
pub mod submission;
pub mod sweeper;
