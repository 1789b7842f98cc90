pub mod ai_provider;
pub mod chat;
pub mod cli;
pub mod config;
pub mod core;
pub mod parser;
pub mod prompt;
pub mod scheduler;
pub mod tracker;
