pub mod app;
pub mod cmd;
pub mod commands;
pub mod prompt;
