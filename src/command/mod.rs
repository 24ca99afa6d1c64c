//! Operator commands and their translation to hub programs
//!
//! This module handles:
//! - The fixed set of operator commands
//! - Building the MicroPython program shipped to the hub for each command
//! - Scanning captured program output for sensor readings

pub mod output;
pub mod program;

pub use output::{scan_color, COLOR_SENTINEL};
pub use program::{build_program, HubCommand};
