pub mod cli;
pub mod clipboard;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod hotkeys;
pub mod runtime;
pub mod speech;
pub mod term;
