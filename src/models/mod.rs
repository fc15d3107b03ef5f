pub mod agent;
pub mod cost;
pub mod execution;
pub mod llm_model;
pub mod prompt;
pub mod tool;
pub mod workflow;
