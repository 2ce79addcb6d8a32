pub mod commands;
pub mod interactive;
pub mod prompt;
