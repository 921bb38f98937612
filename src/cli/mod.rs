//! Command-line console for a running node

pub mod commands;

pub use commands::{
    detect_local_ip, find_ip_address, parse_line, run_console, CliResult, ConsoleCommand,
};
