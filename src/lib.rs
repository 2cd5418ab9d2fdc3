pub mod config;
pub mod consensus;
pub mod error;
pub mod logger;
pub mod network;
pub mod orchestrator;
pub mod simulation;
