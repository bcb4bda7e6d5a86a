pub mod config;
pub mod message;
pub mod process;

mod emit_warnings;
