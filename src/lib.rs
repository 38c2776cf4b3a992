pub mod config;
pub mod errors;
pub mod gateway;
pub mod logging;
pub mod orchestrator;
pub mod prompts;
pub mod tdd;
pub mod tracking;
pub mod ui;
pub mod util;
pub mod workspace;
