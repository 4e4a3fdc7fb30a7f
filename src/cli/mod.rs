//! Command-line interface components
//!
//! This module contains CLI-specific code for the download cache binary:
//! argument parsing and command handlers.

pub mod args;
pub mod commands;

pub use args::{Cli, Commands, GlobalArgs};
pub use commands::{
    cache_config, handle_clear, handle_command, handle_info, handle_list, handle_maintain,
    handle_remove, open_index,
};
