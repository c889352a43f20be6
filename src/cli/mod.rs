//! CLI module for pacer - command-line interface and subcommands.

pub mod commands;

pub use commands::Cli;
