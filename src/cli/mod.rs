//! CLI module for actloop - command-line interface and subcommands.

pub mod commands;

pub use commands::Cli;
