pub mod vocabulary;
pub mod command;
pub mod script;
pub mod script_diagnostics;
pub mod codec;

// Peer coordination
pub mod transport;
pub mod sync_policy;
pub mod executor;
pub mod run_log;

// Capabilities
pub mod avatar;
pub mod viewer;

pub mod config;
pub mod session;
pub mod simulation;
pub mod data_log;
pub mod cli;
