pub mod cli;
pub mod config;
pub mod error;
pub mod git;
pub mod host;
pub mod inject;
pub mod llm;
pub mod orchestrator;
pub mod process;
pub mod prompts;
