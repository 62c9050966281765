pub mod action;
pub mod engine;
pub mod error_expert;
pub mod history;
pub mod loop_control;
pub mod planning;
pub mod prompts;
pub mod reflection;
pub mod state;
